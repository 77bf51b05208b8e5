//! # Emitter Module
//!
//! The advertisement side of Phoenix: fuses sensors into a payload each
//! tick, picks the next transmission interval from the device's
//! condition, and drives the platform peripheral.
//!
//! This module handles:
//! - The Idle → Starting → Advertising → Stopping lifecycle
//! - Per-tick payload build (fusion + codec + framing)
//! - Adaptive cadence (emergencies dominate battery saving)
//! - Best-effort teardown; outstanding ticks after stop are no-ops

pub mod fusion;

pub use fusion::{FusionOutput, SensorFusion};

use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::beacon::{encode_payload, wrap_frame, BeaconFields, BeaconFlags};
use crate::config::{Config, EmitterConfig, RadioConfig};
use crate::error::{PhoenixError, Result};
use crate::platform::{Clock, Peripheral, RadioState, Rng, SensorSuite};

/// Battery percentage below which the critical cadence applies
const CRITICAL_BATTERY_PCT: f64 = 10.0;

/// Emitter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterStatus {
    Idle,
    Starting,
    Advertising,
    Stopping,
    Error,
}

/// Pick the next transmission interval from the packet just built
///
/// Priority order, first match wins: emergencies, critical battery,
/// low battery, motion, idle.
pub fn next_interval_ms(flags: &BeaconFlags, battery_pct: f64, config: &EmitterConfig) -> u64 {
    if flags.is_emergency() {
        config.interval_emergency_ms
    } else if battery_pct < CRITICAL_BATTERY_PCT {
        config.interval_critical_ms
    } else if flags.low_battery {
        config.interval_power_save_ms
    } else if flags.motion_detected {
        config.interval_active_ms
    } else {
        config.interval_normal_ms
    }
}

/// The emitter: owns its peripheral, sensors and fusion state
///
/// All mutation happens on the task that owns the value; platform
/// calls are awaited in place, never raced.
pub struct Emitter<P, S, C> {
    peripheral: P,
    sensors: S,
    clock: C,
    radio: RadioConfig,
    config: EmitterConfig,
    device_id: u32,
    fusion: SensorFusion,
    status: EmitterStatus,
    boot_ms: Option<u64>,
}

impl<P: Peripheral, S: SensorSuite, C: Clock> Emitter<P, S, C> {
    /// Create an emitter
    ///
    /// The device identity comes from configuration when present,
    /// otherwise it is drawn from the entropy source once and kept for
    /// the process lifetime.
    pub fn new(peripheral: P, sensors: S, clock: C, config: &Config, rng: &mut dyn Rng) -> Self {
        let device_id = config.emitter.device_id.unwrap_or_else(|| rng.next_u32());
        Self {
            peripheral,
            sensors,
            clock,
            radio: config.radio.clone(),
            config: config.emitter.clone(),
            device_id,
            fusion: SensorFusion::new(&config.emitter),
            status: EmitterStatus::Idle,
            boot_ms: None,
        }
    }

    pub fn status(&self) -> EmitterStatus {
        self.status
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Assert or clear the external SOS input
    pub fn set_sos(&mut self, active: bool) {
        self.fusion.set_sos(active);
    }

    /// Enter the advertising state
    ///
    /// Idempotent: calling while already advertising is a no-op.
    /// Individual sensor-stream failures are logged and non-fatal.
    ///
    /// # Errors
    ///
    /// Returns `BleUnavailable` when the adapter is not powered on; the
    /// emitter stays Idle.
    pub async fn start_advertising(&mut self) -> Result<()> {
        if self.status == EmitterStatus::Advertising {
            return Ok(());
        }
        self.status = EmitterStatus::Starting;

        self.peripheral.initialize().await?;
        let state = self.peripheral.state();
        if state != RadioState::PoweredOn {
            self.status = EmitterStatus::Idle;
            return Err(PhoenixError::BleUnavailable { state });
        }

        for modality in self.sensors.start().await {
            warn!(
                "{}, continuing without it",
                PhoenixError::SensorUnavailable { modality }
            );
        }

        if self.boot_ms.is_none() {
            self.boot_ms = Some(self.clock.now_ms());
        }

        self.status = EmitterStatus::Advertising;
        info!("emitter {:08X} advertising", self.device_id);
        Ok(())
    }

    /// Leave the advertising state (best effort, idempotent)
    ///
    /// Cancels the pending tick by state change; peripheral and sensor
    /// stop failures are not fatal.
    pub async fn stop_advertising(&mut self) {
        if self.status == EmitterStatus::Idle {
            return;
        }
        self.status = EmitterStatus::Stopping;
        if let Err(e) = self.peripheral.stop_advertising().await {
            debug!("peripheral stop failed: {}", e);
        }
        self.sensors.stop().await;
        self.status = EmitterStatus::Idle;
        info!("emitter stopped");
    }

    /// Drive the transmit loop until shutdown fires or transmission fails
    pub async fn run(&mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        self.start_advertising().await?;

        loop {
            if self.status != EmitterStatus::Advertising {
                break;
            }
            let interval_ms = self.advertise_once().await?;

            tokio::select! {
                _ = sleep(Duration::from_millis(interval_ms)) => {}
                _ = &mut shutdown => {
                    self.stop_advertising().await;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Build and hand one advertisement to the peripheral
    ///
    /// Returns the interval until the next tick. A tick arriving after
    /// stop is a no-op returning the idle interval.
    ///
    /// # Errors
    ///
    /// A peripheral refusal surfaces as `Transmission`; the emitter
    /// transitions through Error back to Idle and does not retry within
    /// the current tick.
    pub async fn advertise_once(&mut self) -> Result<u64> {
        if self.status != EmitterStatus::Advertising {
            return Ok(self.config.interval_normal_ms);
        }

        let now_ms = self.clock.now_ms();
        let snapshot = self.sensors.snapshot().await;
        let fused = self.fusion.fuse(&snapshot, now_ms);

        let boot_ms = self.boot_ms.unwrap_or(now_ms);
        let fields = BeaconFields {
            device_id: self.device_id,
            latitude: fused.latitude,
            longitude: fused.longitude,
            altitude_msl_m: fused.altitude_msl_m,
            relative_altitude_cm: fused.relative_altitude_cm,
            battery_pct: fused.battery_pct,
            timestamp_s: ((now_ms.saturating_sub(boot_ms)) / 1000) as f64,
            flags: fused.flags,
        };
        let frame = wrap_frame(&encode_payload(&fields), self.radio.company_id);

        // Stop before start forces a data refresh; stop errors are ignored
        if let Err(e) = self.peripheral.stop_advertising().await {
            debug!("pre-tick stop failed: {}", e);
        }
        if let Err(e) = self.peripheral.start_advertising(frame).await {
            self.status = EmitterStatus::Error;
            self.stop_advertising().await;
            return Err(e);
        }

        let interval_ms = next_interval_ms(&fused.flags, fused.battery_pct, &self.config);
        debug!(
            flags = fused.flags.to_byte(),
            battery = fused.battery_pct,
            next_ms = interval_ms,
            "advertisement refreshed"
        );
        Ok(interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{decode_payload, unwrap_frame, ACCEPTED_COMPANY_IDS, FRAME_LEN};
    use crate::platform::mocks::{FakeClock, FixedRng, MockPeripheral, MockSensors};
    use crate::platform::{AccelSample, BatterySample, LocationSample, SensorSnapshot};

    fn test_config() -> Config {
        Config::default()
    }

    fn quiet_snapshot() -> SensorSnapshot {
        SensorSnapshot {
            accel: Some(AccelSample {
                x: 0.0,
                y: 0.0,
                z: 1.0,
            }),
            ..Default::default()
        }
    }

    fn emitter_with(
        peripheral: MockPeripheral,
        snapshots: Vec<SensorSnapshot>,
        clock: FakeClock,
    ) -> Emitter<MockPeripheral, MockSensors, FakeClock> {
        Emitter::new(
            peripheral,
            MockSensors::new(snapshots),
            clock,
            &test_config(),
            &mut FixedRng(0xDEAD_BEEF),
        )
    }

    #[test]
    fn test_cadence_priority() {
        let config = EmitterConfig::default();

        let quiet = BeaconFlags::default();
        assert_eq!(next_interval_ms(&quiet, 80.0, &config), 5_000);

        let moving = BeaconFlags {
            motion_detected: true,
            ..Default::default()
        };
        assert_eq!(next_interval_ms(&moving, 80.0, &config), 3_000);

        let low = BeaconFlags {
            low_battery: true,
            motion_detected: true,
            ..Default::default()
        };
        assert_eq!(next_interval_ms(&low, 15.0, &config), 10_000);

        assert_eq!(next_interval_ms(&low, 5.0, &config), 15_000);
    }

    #[test]
    fn test_emergency_dominates_battery() {
        let config = EmitterConfig::default();
        let sos = BeaconFlags {
            sos_activated: true,
            low_battery: true,
            ..Default::default()
        };
        // Emergencies win even at 5% battery
        assert_eq!(next_interval_ms(&sos, 5.0, &config), 1_000);

        let fall = BeaconFlags {
            fall_detected: true,
            ..Default::default()
        };
        assert_eq!(next_interval_ms(&fall, 3.0, &config), 1_000);
    }

    #[tokio::test]
    async fn test_start_requires_powered_on_adapter() {
        let peripheral = MockPeripheral::with_state(RadioState::Unauthorized);
        let mut emitter = emitter_with(peripheral, vec![quiet_snapshot()], FakeClock::new());

        let result = emitter.start_advertising().await;
        assert!(matches!(
            result,
            Err(PhoenixError::BleUnavailable {
                state: RadioState::Unauthorized
            })
        ));
        assert_eq!(emitter.status(), EmitterStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let peripheral = MockPeripheral::new();
        let mut emitter = emitter_with(peripheral, vec![quiet_snapshot()], FakeClock::new());

        emitter.start_advertising().await.unwrap();
        emitter.start_advertising().await.unwrap();
        assert_eq!(emitter.status(), EmitterStatus::Advertising);
    }

    #[tokio::test]
    async fn test_advertise_once_emits_valid_frame() {
        let peripheral = MockPeripheral::new();
        let clock = FakeClock::new();
        let snapshot = SensorSnapshot {
            location: Some(LocationSample {
                latitude: 37.422,
                longitude: -122.084,
                altitude_m: 12.0,
                accuracy_m: 10.0,
            }),
            battery: BatterySample {
                level: 0.87,
                charging: false,
            },
            ..quiet_snapshot()
        };
        let mut emitter = emitter_with(peripheral.clone(), vec![snapshot], clock.clone());

        emitter.start_advertising().await.unwrap();
        clock.advance(2_500);
        let interval = emitter.advertise_once().await.unwrap();

        let frames = peripheral.advertised_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_LEN);

        let (company_id, payload_bytes) = unwrap_frame(&frames[0], &ACCEPTED_COMPANY_IDS).unwrap();
        assert_eq!(company_id, 0x004C);

        let payload = decode_payload(&payload_bytes).unwrap();
        assert_eq!(payload.device_id, 0xDEAD_BEEF);
        assert!(payload.flags.gps_valid);
        assert_eq!(payload.battery_pct, 87);
        assert_eq!(payload.timestamp_s, 2);

        // Quiet device at healthy battery: idle cadence
        assert_eq!(interval, 5_000);

        // Data refresh forces a stop before every start
        assert!(*peripheral.stop_count.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_transmission_failure_returns_to_idle() {
        let peripheral = MockPeripheral::new();
        peripheral.set_fail_start(true);
        let mut emitter = emitter_with(peripheral, vec![quiet_snapshot()], FakeClock::new());

        emitter.start_advertising().await.unwrap();
        let result = emitter.advertise_once().await;
        assert!(matches!(result, Err(PhoenixError::Transmission { .. })));
        assert_eq!(emitter.status(), EmitterStatus::Idle);
    }

    #[tokio::test]
    async fn test_tick_after_stop_is_noop() {
        let peripheral = MockPeripheral::new();
        let mut emitter = emitter_with(peripheral.clone(), vec![quiet_snapshot()], FakeClock::new());

        emitter.start_advertising().await.unwrap();
        emitter.stop_advertising().await;
        assert_eq!(emitter.status(), EmitterStatus::Idle);

        emitter.advertise_once().await.unwrap();
        assert!(peripheral.advertised_frames().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let peripheral = MockPeripheral::new();
        let mut emitter = emitter_with(peripheral, vec![quiet_snapshot()], FakeClock::new());

        emitter.stop_advertising().await;
        emitter.stop_advertising().await;
        assert_eq!(emitter.status(), EmitterStatus::Idle);
    }

    #[tokio::test]
    async fn test_device_id_from_config_or_entropy() {
        let mut config = test_config();
        config.emitter.device_id = Some(0x0102_0304);
        let emitter = Emitter::new(
            MockPeripheral::new(),
            MockSensors::new(vec![]),
            FakeClock::new(),
            &config,
            &mut FixedRng(0xFFFF_FFFF),
        );
        assert_eq!(emitter.device_id(), 0x0102_0304);

        let emitter = Emitter::new(
            MockPeripheral::new(),
            MockSensors::new(vec![]),
            FakeClock::new(),
            &test_config(),
            &mut FixedRng(0xCAFE_F00D),
        );
        assert_eq!(emitter.device_id(), 0xCAFE_F00D);
    }

    #[tokio::test]
    async fn test_sos_accelerates_cadence() {
        let peripheral = MockPeripheral::new();
        let mut emitter = emitter_with(peripheral.clone(), vec![quiet_snapshot()], FakeClock::new());

        emitter.start_advertising().await.unwrap();
        emitter.set_sos(true);
        let interval = emitter.advertise_once().await.unwrap();
        assert_eq!(interval, 1_000);

        let (_, payload_bytes) =
            unwrap_frame(&peripheral.advertised_frames()[0], &ACCEPTED_COMPANY_IDS).unwrap();
        assert!(decode_payload(&payload_bytes).unwrap().flags.sos_activated);
    }
}
