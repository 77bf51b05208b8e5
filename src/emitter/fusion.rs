//! # Emitter Sensor Fusion
//!
//! Derives the per-packet condition flags from raw sensor snapshots and
//! short internal histories: motion, fall (with a latched cooldown),
//! unstable environment, stationarity, GPS validity and the relative
//! altitude against the boot baseline.

use std::collections::VecDeque;

use crate::beacon::BeaconFlags;
use crate::config::EmitterConfig;
use crate::platform::SensorSnapshot;

/// Deviation from 1 g that counts as motion
const MOTION_ACCEL_DEVIATION_G: f64 = 0.1;

/// Rotation rate that counts as motion when no accelerometer is present
const MOTION_GYRO_RAD_S: f64 = 0.5;

/// Acceleration magnitudes retained for fall detection
const ACCEL_WINDOW_LEN: usize = 10;

/// Samples required before fall detection arms
const FALL_ARM_LEN: usize = 5;

/// Free-fall threshold, g
const FREE_FALL_G: f64 = 0.5;

/// Impact threshold, g
const IMPACT_G: f64 = 2.5;

/// How far |z| may deviate from 1 g in the post-fall posture check
const POSTURE_Z_TOLERANCE_G: f64 = 0.3;

/// Maximum |x| and |y| in the post-fall posture check
const POSTURE_XY_MAX_G: f64 = 0.5;

/// Gyro magnitudes retained for the unstable-environment gate
const GYRO_WINDOW_LEN: usize = 20;

/// Samples required before the unstable-environment gate arms
const UNSTABLE_ARM_LEN: usize = 10;

/// Mean rotation rate above which the environment counts as unstable
const UNSTABLE_MEAN_RAD_S: f64 = 1.0;

/// Rotation-rate variance above which the environment counts as unstable
const UNSTABLE_VARIANCE: f64 = 0.5;

/// Battery fraction below which the low-battery flag is set
const LOW_BATTERY_FRACTION: f64 = 0.20;

/// Altitude baseline captured at the first usable snapshot after boot
#[derive(Debug, Clone, Copy)]
enum AltitudeBaseline {
    /// Barometric reference, metres
    Barometric(f64),

    /// GPS altitude reference, metres (no barometer on this device)
    Gps(f64),
}

/// Fusion output feeding the payload encoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOutput {
    pub flags: BeaconFlags,
    pub battery_pct: f64,
    pub latitude: f32,
    pub longitude: f32,
    pub altitude_msl_m: f64,
    pub relative_altitude_cm: f64,
}

/// Stateful sensor fusion for one emitter
pub struct SensorFusion {
    gps_valid_max_m: f64,
    fall_cooldown_ms: u64,
    accel_window: VecDeque<f64>,
    gyro_window: VecDeque<f64>,
    baseline: Option<AltitudeBaseline>,
    fall_latched_until_ms: Option<u64>,
    sos_active: bool,
}

impl SensorFusion {
    pub fn new(config: &EmitterConfig) -> Self {
        Self {
            gps_valid_max_m: config.gps_valid_max_m,
            fall_cooldown_ms: config.fall_cooldown_ms,
            accel_window: VecDeque::with_capacity(ACCEL_WINDOW_LEN),
            gyro_window: VecDeque::with_capacity(GYRO_WINDOW_LEN),
            baseline: None,
            fall_latched_until_ms: None,
            sos_active: false,
        }
    }

    /// Assert or clear the external SOS input
    pub fn set_sos(&mut self, active: bool) {
        self.sos_active = active;
    }

    /// Fuse one sensor snapshot into payload fields
    ///
    /// Call exactly once per transmit tick; the call advances the
    /// acceleration and gyro windows.
    pub fn fuse(&mut self, snapshot: &SensorSnapshot, now_ms: u64) -> FusionOutput {
        if let Some(accel) = snapshot.accel {
            push_bounded(&mut self.accel_window, accel.magnitude(), ACCEL_WINDOW_LEN);
        }
        if let Some(gyro) = snapshot.gyro {
            push_bounded(&mut self.gyro_window, gyro.magnitude(), GYRO_WINDOW_LEN);
        }
        self.capture_baseline(snapshot);

        let motion_detected = self.detect_motion(snapshot);
        let fall_detected = self.detect_fall(snapshot, now_ms);
        let unstable_environment = self.detect_unstable_environment();

        let battery_level = snapshot.battery.level.clamp(0.0, 1.0);
        let low_battery = snapshot.battery.level >= 0.0 && snapshot.battery.level < LOW_BATTERY_FRACTION;

        let gps_valid = snapshot
            .location
            .map(|loc| loc.accuracy_m.is_finite() && loc.accuracy_m < self.gps_valid_max_m)
            .unwrap_or(false);

        // Without a valid fix the coordinates are blanked; the receiver
        // retains the last known position, never the emitter.
        let (latitude, longitude, altitude_msl_m) = match snapshot.location {
            Some(loc) if gps_valid => (
                loc.latitude as f32,
                loc.longitude as f32,
                loc.altitude_m.clamp(-500.0, 9000.0),
            ),
            _ => (0.0, 0.0, 0.0),
        };

        let flags = BeaconFlags {
            motion_detected,
            is_charging: snapshot.battery.charging,
            sos_activated: self.sos_active,
            low_battery,
            gps_valid,
            stationary: !motion_detected,
            fall_detected,
            unstable_environment,
        };

        FusionOutput {
            flags,
            battery_pct: battery_level * 100.0,
            latitude,
            longitude,
            altitude_msl_m,
            relative_altitude_cm: self.relative_altitude_cm(snapshot),
        }
    }

    fn capture_baseline(&mut self, snapshot: &SensorSnapshot) {
        if self.baseline.is_some() {
            return;
        }
        if let Some(altimeter) = snapshot.altimeter {
            self.baseline = Some(AltitudeBaseline::Barometric(altimeter.relative_m));
        } else if let Some(location) = snapshot.location {
            self.baseline = Some(AltitudeBaseline::Gps(location.altitude_m));
        }
    }

    fn detect_motion(&self, snapshot: &SensorSnapshot) -> bool {
        if let Some(accel) = snapshot.accel {
            (accel.magnitude() - 1.0).abs() > MOTION_ACCEL_DEVIATION_G
        } else if let Some(gyro) = snapshot.gyro {
            gyro.magnitude() > MOTION_GYRO_RAD_S
        } else {
            false
        }
    }

    fn detect_fall(&mut self, snapshot: &SensorSnapshot, now_ms: u64) -> bool {
        let cooldown_expired = self.fall_latched_until_ms.map_or(true, |until| now_ms >= until);

        if cooldown_expired && self.accel_window.len() >= FALL_ARM_LEN {
            let free_fall = self.accel_window.iter().any(|&m| m < FREE_FALL_G);
            let impact = self.accel_window.iter().any(|&m| m > IMPACT_G);
            let posture = snapshot.accel.map_or(false, |a| {
                (a.z.abs() - 1.0).abs() <= POSTURE_Z_TOLERANCE_G
                    && a.x.abs() < POSTURE_XY_MAX_G
                    && a.y.abs() < POSTURE_XY_MAX_G
            });

            if free_fall && impact && posture {
                self.fall_latched_until_ms = Some(now_ms + self.fall_cooldown_ms);
            }
        }

        // Latched until the cooldown deadline regardless of live sensors
        self.fall_latched_until_ms
            .map_or(false, |until| now_ms < until)
    }

    fn detect_unstable_environment(&self) -> bool {
        if self.gyro_window.len() < UNSTABLE_ARM_LEN {
            return false;
        }
        let n = self.gyro_window.len() as f64;
        let mean = self.gyro_window.iter().sum::<f64>() / n;
        let variance = self
            .gyro_window
            .iter()
            .map(|m| (m - mean) * (m - mean))
            .sum::<f64>()
            / n;
        mean > UNSTABLE_MEAN_RAD_S && variance > UNSTABLE_VARIANCE
    }

    fn relative_altitude_cm(&self, snapshot: &SensorSnapshot) -> f64 {
        match (self.baseline, snapshot.altimeter, snapshot.location) {
            (Some(AltitudeBaseline::Barometric(start)), Some(altimeter), _) => {
                (altimeter.relative_m - start) * 100.0
            }
            (Some(AltitudeBaseline::Gps(start)), None, Some(location)) => {
                (location.altitude_m - start) * 100.0
            }
            _ => 0.0,
        }
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64, cap: usize) {
    window.push_back(value);
    while window.len() > cap {
        window.pop_front();
    }
}
