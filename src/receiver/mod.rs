//! # Receiver Module
//!
//! The scanning side of Phoenix: filters advertisements down to valid
//! beacon frames, maintains one record per emitter (smoothed RSSI,
//! cached GPS, location history) and evicts emitters that fall silent.
//!
//! This module handles:
//! - The Idle → Starting → Scanning → Stopping lifecycle
//! - The ingress pipeline: unwrap → decode → validate → upsert → notify
//! - Periodic stale-record eviction on the receiver tick

pub mod store;

pub use store::{EmitterRecord, LocationFix, RecordStore};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::beacon::{decode_payload, unwrap_frame, validate};
use crate::config::Config;
use crate::error::{PhoenixError, Result};
use crate::platform::{Advertisement, Central, Clock, RadioState};

/// Observer channel depth; slow observers miss snapshots, never block
const UPDATE_CHANNEL_DEPTH: usize = 32;

/// Receiver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverStatus {
    Idle,
    Starting,
    Scanning,
    Stopping,
    Error,
}

/// The receiver: owns its central, the record store and the observers
pub struct Receiver<C, K> {
    central: C,
    clock: K,
    accepted_company_ids: Vec<u16>,
    tick_ms: u64,
    store: RecordStore,
    status: ReceiverStatus,
    update_tx: broadcast::Sender<EmitterRecord>,
}

impl<C: Central, K: Clock> Receiver<C, K> {
    pub fn new(central: C, clock: K, config: &Config) -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_DEPTH);
        Self {
            central,
            clock,
            accepted_company_ids: config.radio.accepted_company_ids.clone(),
            tick_ms: config.finder.ui_tick_ms,
            store: RecordStore::new(config.receiver.clone()),
            status: ReceiverStatus::Idle,
            update_tx,
        }
    }

    pub fn status(&self) -> ReceiverStatus {
        self.status
    }

    /// Read-only view of the record store
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Subscribe to record snapshots published after every ingest
    pub fn subscribe(&self) -> broadcast::Receiver<EmitterRecord> {
        self.update_tx.subscribe()
    }

    /// Enter the scanning state and obtain the advertisement stream
    ///
    /// # Errors
    ///
    /// Returns `BleUnavailable` when the adapter is not powered on, or
    /// `ScanFailed` when the platform refuses the scan; the receiver
    /// returns to Idle either way.
    pub async fn start_scanning(&mut self) -> Result<mpsc::Receiver<Advertisement>> {
        if self.status == ReceiverStatus::Scanning {
            return Err(PhoenixError::ScanFailed {
                cause: "already scanning".to_string(),
            });
        }
        self.status = ReceiverStatus::Starting;

        self.central.initialize().await?;
        let state = self.central.state();
        if state != RadioState::PoweredOn {
            self.status = ReceiverStatus::Idle;
            return Err(PhoenixError::BleUnavailable { state });
        }

        match self.central.start_scanning().await {
            Ok(stream) => {
                self.status = ReceiverStatus::Scanning;
                info!("receiver scanning");
                Ok(stream)
            }
            Err(e) => {
                warn!("scan start refused: {}", e);
                self.status = ReceiverStatus::Error;
                self.stop_scanning().await;
                Err(e)
            }
        }
    }

    /// Leave the scanning state (best effort, idempotent)
    pub async fn stop_scanning(&mut self) {
        if self.status == ReceiverStatus::Idle {
            return;
        }
        self.status = ReceiverStatus::Stopping;
        if let Err(e) = self.central.stop_scanning().await {
            debug!("central stop failed: {}", e);
        }
        self.status = ReceiverStatus::Idle;
        info!("receiver stopped");
    }

    /// Run one advertisement through the ingress pipeline
    ///
    /// Returns whether a record was updated. Foreign manufacturer data
    /// drops silently; a frame whose advertiser calls itself Phoenix
    /// but fails to parse is worth a debug line.
    pub fn ingest(&mut self, advertisement: &Advertisement) -> bool {
        if self.status != ReceiverStatus::Scanning {
            return false;
        }

        let payload_bytes =
            match unwrap_frame(&advertisement.manufacturer_data, &self.accepted_company_ids) {
                Ok((_, bytes)) => bytes,
                Err(_) => {
                    let name_hints_phoenix = advertisement
                        .local_name
                        .as_deref()
                        .map_or(false, |name| name.contains("Phoenix"));
                    if name_hints_phoenix {
                        self.store.note_dropped_frame();
                        debug!(
                            peer = %advertisement.peer_id,
                            "Phoenix-named peer sent an unparseable frame"
                        );
                    }
                    return false;
                }
            };

        let payload = match decode_payload(&payload_bytes) {
            Ok(payload) => payload,
            Err(e) => {
                self.store.note_dropped_frame();
                debug!(peer = %advertisement.peer_id, "payload decode failed: {}", e);
                return false;
            }
        };

        if !validate(&payload) {
            self.store.note_rejected_payload();
            debug!("payload from {:08X} failed validation", payload.device_id);
            return false;
        }

        let record = self.store.upsert(
            &advertisement.peer_id,
            advertisement.local_name.as_deref(),
            payload,
            advertisement.rssi_dbm,
            advertisement.received_at_ms,
        );
        // Lagging observers lose snapshots, never block the ingress
        let _ = self.update_tx.send(record.clone());
        true
    }

    /// Evict records older than the stale timeout
    pub fn evict_stale(&mut self) -> usize {
        self.store.evict_stale(self.clock.now_ms())
    }

    /// Drive the ingress until shutdown fires or the stream fails
    pub async fn run(&mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut advertisements = self.start_scanning().await?;
        let mut tick = interval(Duration::from_millis(self.tick_ms));

        loop {
            tokio::select! {
                received = advertisements.recv() => match received {
                    Some(advertisement) => {
                        self.ingest(&advertisement);
                    }
                    None => {
                        warn!("advertisement stream closed");
                        self.status = ReceiverStatus::Error;
                        self.stop_scanning().await;
                        return Err(PhoenixError::ScanFailed {
                            cause: "advertisement stream closed".to_string(),
                        });
                    }
                },
                _ = tick.tick() => {
                    let evicted = self.evict_stale();
                    if evicted > 0 {
                        debug!(evicted, "stale records removed");
                    }
                }
                _ = &mut shutdown => {
                    self.stop_scanning().await;
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{encode_payload, wrap_frame, BeaconFields, BeaconFlags, COMPANY_ID_APPLE};
    use crate::platform::loopback::{loopback_pair, LoopbackCentral};
    use crate::platform::mocks::FakeClock;
    use std::sync::Arc;

    fn beacon_frame(device_id: u32, battery_pct: f64) -> Vec<u8> {
        let fields = BeaconFields {
            device_id,
            latitude: 37.422,
            longitude: -122.084,
            altitude_msl_m: 12.0,
            relative_altitude_cm: 0.0,
            battery_pct,
            timestamp_s: 0.0,
            flags: BeaconFlags {
                gps_valid: true,
                ..Default::default()
            },
        };
        wrap_frame(&encode_payload(&fields), COMPANY_ID_APPLE).to_vec()
    }

    fn advertisement(manufacturer_data: Vec<u8>, name: Option<&str>, at_ms: u64) -> Advertisement {
        Advertisement {
            peer_id: "peer-1".to_string(),
            local_name: name.map(str::to_string),
            manufacturer_data,
            rssi_dbm: -60,
            received_at_ms: at_ms,
        }
    }

    async fn scanning_receiver(
        clock: FakeClock,
    ) -> (
        Receiver<LoopbackCentral, FakeClock>,
        mpsc::Receiver<Advertisement>,
    ) {
        let (_peripheral, central) = loopback_pair(Arc::new(clock.clone()), -60);
        let mut receiver = Receiver::new(central, clock, &Config::default());
        let stream = receiver.start_scanning().await.unwrap();
        (receiver, stream)
    }

    #[tokio::test]
    async fn test_ingest_creates_record() {
        let (mut receiver, _stream) = scanning_receiver(FakeClock::new()).await;

        let accepted = receiver.ingest(&advertisement(beacon_frame(7, 80.0), Some("Phoenix"), 100));
        assert!(accepted);

        let record = receiver.store().get(7).unwrap();
        assert_eq!(record.ble_peer_id, "peer-1");
        assert_eq!(record.display_name.as_deref(), Some("Phoenix"));
        assert_eq!(record.rssi_smoothed, -60);
        assert_eq!(record.last_seen_ms, 100);
    }

    #[tokio::test]
    async fn test_foreign_data_drops_silently() {
        let (mut receiver, _stream) = scanning_receiver(FakeClock::new()).await;

        // iBeacon-sized noise: wrong magic, no Phoenix name
        assert!(!receiver.ingest(&advertisement(vec![0x4C, 0x00, 0x02, 0x15, 0xAA], None, 0)));
        assert!(receiver.store().is_empty());
        assert_eq!(receiver.store().dropped_frames(), 0);

        // Same noise from a Phoenix-named peer is worth counting
        assert!(!receiver.ingest(&advertisement(
            vec![0x4C, 0x00, 0x02, 0x15, 0xAA],
            Some("Phoenix-7"),
            0
        )));
        assert_eq!(receiver.store().dropped_frames(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_counted() {
        let (mut receiver, _stream) = scanning_receiver(FakeClock::new()).await;

        let mut frame = beacon_frame(7, 80.0);
        frame[4 + 16] = 101; // battery out of range
        assert!(!receiver.ingest(&advertisement(frame, None, 0)));
        assert!(receiver.store().is_empty());
        assert_eq!(receiver.store().rejected_payloads(), 1);
    }

    #[tokio::test]
    async fn test_ingest_noop_when_idle() {
        let clock = FakeClock::new();
        let (_peripheral, central) = loopback_pair(Arc::new(clock.clone()), -60);
        let mut receiver = Receiver::new(central, clock, &Config::default());

        assert!(!receiver.ingest(&advertisement(beacon_frame(7, 80.0), None, 0)));
        assert!(receiver.store().is_empty());
    }

    #[tokio::test]
    async fn test_observers_receive_snapshots() {
        let (mut receiver, _stream) = scanning_receiver(FakeClock::new()).await;
        let mut updates = receiver.subscribe();

        receiver.ingest(&advertisement(beacon_frame(9, 55.0), None, 42));

        let snapshot = updates.recv().await.unwrap();
        assert_eq!(snapshot.device_id, 9);
        assert_eq!(snapshot.payload.battery_pct, 55);
        assert_eq!(snapshot.last_seen_ms, 42);
    }

    #[tokio::test]
    async fn test_stale_records_evicted_on_tick() {
        let clock = FakeClock::new();
        let (mut receiver, _stream) = scanning_receiver(clock.clone()).await;

        receiver.ingest(&advertisement(beacon_frame(7, 80.0), None, 0));
        assert_eq!(receiver.store().len(), 1);

        clock.set(60_001);
        assert_eq!(receiver.evict_stale(), 1);
        assert!(receiver.store().is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_over_loopback() {
        use crate::emitter::Emitter;
        use crate::platform::mocks::{FixedRng, MockSensors};
        use crate::platform::{AccelSample, BatterySample, LocationSample, SensorSnapshot};

        let clock = FakeClock::new();
        let (peripheral, central) = loopback_pair(Arc::new(clock.clone()), -59);

        let snapshot = SensorSnapshot {
            location: Some(LocationSample {
                latitude: 37.422,
                longitude: -122.084,
                altitude_m: 12.0,
                accuracy_m: 8.0,
            }),
            accel: Some(AccelSample {
                x: 0.0,
                y: 0.0,
                z: 1.0,
            }),
            battery: BatterySample {
                level: 0.87,
                charging: false,
            },
            ..Default::default()
        };

        let config = Config::default();
        let mut emitter = Emitter::new(
            peripheral,
            MockSensors::new(vec![snapshot]),
            clock.clone(),
            &config,
            &mut FixedRng(0x0BAD_CAFE),
        );
        let mut receiver = Receiver::new(central, clock.clone(), &config);

        emitter.start_advertising().await.unwrap();
        let mut stream = receiver.start_scanning().await.unwrap();

        emitter.advertise_once().await.unwrap();
        let advertisement = stream.recv().await.unwrap();
        assert!(receiver.ingest(&advertisement));

        let record = receiver.store().get(0x0BAD_CAFE).unwrap();
        assert_eq!(record.rssi_smoothed, -59);
        assert!(record.payload.flags.gps_valid);
        assert_eq!(record.payload.battery_pct, 87);
        assert!((record.payload.latitude - 37.422).abs() < 1e-4);
    }
}
