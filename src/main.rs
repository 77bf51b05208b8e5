//! # Phoenix
//!
//! Peer-to-peer emergency locator over Bluetooth Low Energy.
//!
//! This binary runs the whole pipeline on one machine: a simulated
//! emitter and a receiver joined by a loopback radio, with a precision
//! finder ticking at the UI cadence and logging guidance. It exists to
//! exercise the core; real deployments supply platform BLE and sensor
//! adapters instead of the loopback pair.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::oneshot;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use phoenix::config::Config;
use phoenix::emitter::Emitter;
use phoenix::finder::PrecisionFinder;
use phoenix::platform::loopback::loopback_pair;
use phoenix::platform::sim::SimulatedSensors;
use phoenix::platform::{Clock, LocationSample, MonotonicClock, SystemRng};
use phoenix::receiver::Receiver;

/// Simulated signal strength on the loopback radio, dBm
const LOOPBACK_RSSI_DBM: i16 = -63;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Phoenix v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_default("config/default.toml")?;

    let clock = Arc::new(MonotonicClock::new());
    let (peripheral, central) = loopback_pair(clock.clone(), LOOPBACK_RSSI_DBM);

    // The emitter wanders near the receiver's fixed position
    let sensors = SimulatedSensors::new(37.4221, -122.0841, 12.0);
    let receiver_position = LocationSample {
        latitude: 37.4220,
        longitude: -122.0840,
        altitude_m: 12.0,
        accuracy_m: 5.0,
    };

    let mut emitter = Emitter::new(
        peripheral,
        sensors,
        SharedClock(clock.clone()),
        &config,
        &mut SystemRng,
    );
    let device_id = emitter.device_id();
    info!("emitter device id {:08X}", device_id);

    let mut rx = Receiver::new(central, SharedClock(clock.clone()), &config);
    let mut updates = rx.subscribe();

    let (emitter_shutdown_tx, emitter_shutdown_rx) = oneshot::channel();
    let (receiver_shutdown_tx, receiver_shutdown_rx) = oneshot::channel();

    let emitter_task = tokio::spawn(async move {
        if let Err(e) = emitter.run(emitter_shutdown_rx).await {
            warn!("emitter stopped with error: {}", e);
        }
    });

    let receiver_task = tokio::spawn(async move {
        if let Err(e) = rx.run(receiver_shutdown_rx).await {
            warn!("receiver stopped with error: {}", e);
        }
    });

    // Guidance loop: track the newest snapshot and tick the finder
    let mut finder = PrecisionFinder::new(config.finder.clone());
    let mut latest = None;
    let mut ui_tick = interval(Duration::from_millis(config.finder.ui_tick_ms));

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            update = updates.recv() => {
                if let Ok(record) = update {
                    latest = Some(record);
                }
            }
            _ = ui_tick.tick() => {
                if let Some(record) = &latest {
                    // The walker faces north; a compass adapter would feed this
                    finder.push_heading(0.0);
                    let guidance = finder.tick(record, Some(&receiver_position), clock.now_ms());
                    info!(
                        distance = %guidance.distance_text,
                        proximity = ?guidance.proximity,
                        bearing = ?guidance.bearing_deg.map(|b| b.round()),
                        gps_fallback = guidance.using_gps_fallback,
                        "guidance"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    let _ = emitter_shutdown_tx.send(());
    let _ = receiver_shutdown_tx.send(());
    let _ = emitter_task.await;
    let _ = receiver_task.await;

    Ok(())
}

/// `Clock` passthrough for a shared `Arc<MonotonicClock>`
struct SharedClock(Arc<MonotonicClock>);

impl Clock for SharedClock {
    fn now_ms(&self) -> u64 {
        self.0.now_ms()
    }
}
