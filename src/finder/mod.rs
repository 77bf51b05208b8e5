//! # Precision Finder Module
//!
//! Turns a chosen emitter record plus receiver-local location and
//! compass samples into guidance: a smoothed distance estimate, a
//! chatter-free proximity level, an arrow bearing and a haptic cadence.
//!
//! This module handles:
//! - RSSI→distance via the log-distance path-loss model
//! - GPS fallback with short-horizon motion prediction when BLE lapses
//! - Proximity hysteresis (instant when closing, sticky when receding)
//! - Imperial distance text and the bearing deadzone

pub mod geo;

use std::collections::VecDeque;

use crate::config::FinderConfig;
use crate::error::{PhoenixError, Result};
use crate::platform::{LocationSample, PulsePattern};
use crate::receiver::EmitterRecord;

use geo::{angular_difference_deg, haversine_m, initial_bearing_deg, normalize_deg};

/// Feet per metre
const FEET_PER_METRE: f64 = 3.28084;

/// Haptics stop entirely beyond this range, metres
const HAPTIC_FAR_LIMIT_M: f64 = 3.0;

/// Pulse interval inside the near band, milliseconds
const HAPTIC_NEAR_INTERVAL_MS: u64 = 700;

/// Pulse interval endpoints for the linear band, milliseconds
const HAPTIC_LERP_MIN_MS: f64 = 1_000.0;
const HAPTIC_LERP_MAX_MS: f64 = 2_000.0;

/// Double-pulse timing used in the near band
const DOUBLE_PULSE: PulsePattern = PulsePattern::Double {
    pulse_ms: 80,
    gap_ms: 50,
};

/// Single pulse used in the linear band
const SINGLE_PULSE: PulsePattern = PulsePattern::Single { duration_ms: 100 };

/// Prediction horizon on the first GPS recomputation, seconds
const GPS_PREDICT_FIRST_S: f64 = 0.5;

/// Prediction horizon on subsequent periodic recomputations, seconds
const GPS_PREDICT_PERIODIC_S: f64 = 0.125;

/// Proximity bands, closest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProximityLevel {
    Here,
    Near,
    Medium,
    Far,
}

impl ProximityLevel {
    /// The band containing a distance, ignoring hysteresis
    fn natural(distance_m: f64, config: &FinderConfig) -> Self {
        if distance_m < config.here_m {
            Self::Here
        } else if distance_m < config.near_m {
            Self::Near
        } else if distance_m < config.medium_m {
            Self::Medium
        } else {
            Self::Far
        }
    }

    /// The threshold separating this band from the next farther one
    fn upper_bound_m(self, config: &FinderConfig) -> Option<f64> {
        match self {
            Self::Here => Some(config.here_m),
            Self::Near => Some(config.near_m),
            Self::Medium => Some(config.medium_m),
            Self::Far => None,
        }
    }
}

/// One tick of guidance for the UI and haptics
#[derive(Debug, Clone, PartialEq)]
pub struct Guidance {
    /// Smoothed distance estimate, metres
    pub distance_m: Option<f64>,

    /// Human-readable distance, imperial
    pub distance_text: String,

    /// Hysteresis-filtered proximity level
    pub proximity: ProximityLevel,

    /// Arrow rotation relative to device heading, degrees [0, 360);
    /// `None` renders the searching wiggle
    pub bearing_deg: Option<f64>,

    /// Whether the distance came from GPS rather than a fresh BLE link
    pub using_gps_fallback: bool,

    /// Whether the target is close enough for fine-tuning UI
    pub fine_tuning: bool,

    /// Haptic pattern to fire this tick, already cadence-gated
    pub haptic: Option<PulsePattern>,
}

/// Stateful guidance engine for one chosen emitter
pub struct PrecisionFinder {
    config: FinderConfig,
    distance_window: VecDeque<f64>,
    proximity: ProximityLevel,
    last_raw_distance: Option<f64>,
    gps_prev_distance: Option<f64>,
    gps_prev_t_ms: Option<u64>,
    gps_predictions: u32,
    compass_window: VecDeque<f64>,
    emitted_bearing: Option<f64>,
    last_pulse_ms: Option<u64>,
}

impl PrecisionFinder {
    pub fn new(config: FinderConfig) -> Self {
        Self {
            config,
            distance_window: VecDeque::new(),
            proximity: ProximityLevel::Far,
            last_raw_distance: None,
            gps_prev_distance: None,
            gps_prev_t_ms: None,
            gps_predictions: 0,
            compass_window: VecDeque::new(),
            emitted_bearing: None,
            last_pulse_ms: None,
        }
    }

    /// Feed one compass heading sample, degrees
    ///
    /// Samples arrive closely spaced, so a plain arithmetic mean over
    /// the short window is an acceptable wrap approximation.
    pub fn push_heading(&mut self, heading_deg: f64) {
        self.compass_window.push_back(normalize_deg(heading_deg));
        while self.compass_window.len() > self.config.compass_smoothing_len {
            self.compass_window.pop_front();
        }
    }

    /// Absolute great-circle bearing from the receiver to the beacon
    ///
    /// # Errors
    ///
    /// Returns `NoLocationYet` when the receiver has no fix or the
    /// beacon record carries no usable coordinates.
    pub fn bearing_to(
        &self,
        record: &EmitterRecord,
        receiver_location: Option<&LocationSample>,
    ) -> Result<f64> {
        let location = receiver_location.ok_or(PhoenixError::NoLocationYet)?;
        if !beacon_has_coordinates(record) {
            return Err(PhoenixError::NoLocationYet);
        }
        Ok(initial_bearing_deg(
            location.latitude,
            location.longitude,
            record.payload.latitude as f64,
            record.payload.longitude as f64,
        ))
    }

    /// Produce one tick of guidance from a record snapshot
    pub fn tick(
        &mut self,
        record: &EmitterRecord,
        receiver_location: Option<&LocationSample>,
        now_ms: u64,
    ) -> Guidance {
        let (raw_distance, using_gps_fallback) =
            self.estimate_distance(record, receiver_location, now_ms);

        if let Some(distance) = raw_distance {
            self.last_raw_distance = Some(distance);
            self.distance_window.push_back(distance);
            while self.distance_window.len() > self.config.distance_smoothing_len {
                self.distance_window.pop_front();
            }
        }

        let smoothed = self.smoothed_distance();
        if let Some(distance) = smoothed {
            self.apply_proximity(distance);
        }

        let bearing_deg = self.update_bearing(record, receiver_location);
        let haptic = smoothed.and_then(|d| self.fire_haptic(d, now_ms));

        Guidance {
            distance_m: smoothed,
            distance_text: self.distance_text(smoothed),
            proximity: self.proximity,
            bearing_deg,
            using_gps_fallback,
            fine_tuning: smoothed.map_or(false, |d| d < self.config.near_m),
            haptic,
        }
    }

    /// Raw distance for this tick, and whether GPS fallback produced it
    fn estimate_distance(
        &mut self,
        record: &EmitterRecord,
        receiver_location: Option<&LocationSample>,
        now_ms: u64,
    ) -> (Option<f64>, bool) {
        let ble_fresh = now_ms.saturating_sub(record.last_seen_ms) <= self.config.ble_fresh_ms;

        if ble_fresh {
            // Back on BLE: the GPS predictor restarts next time it is needed
            self.gps_prev_distance = None;
            self.gps_prev_t_ms = None;
            self.gps_predictions = 0;
            return (Some(self.path_loss_distance(record.rssi_smoothed)), false);
        }

        if beacon_has_coordinates(record) {
            if let Some(location) = receiver_location {
                let gps_distance = haversine_m(
                    location.latitude,
                    location.longitude,
                    record.payload.latitude as f64,
                    record.payload.longitude as f64,
                );
                let predicted = self.predict_closing(gps_distance, now_ms);
                self.gps_prev_distance = Some(gps_distance);
                self.gps_prev_t_ms = Some(now_ms);
                return (Some(predicted), true);
            }
        }

        // Neither link: hold the last known distance
        (self.last_raw_distance, false)
    }

    /// Log-distance path-loss model: d = 10^((P₀ − RSSI) / (10·n))
    fn path_loss_distance(&self, rssi_dbm: i16) -> f64 {
        let exponent = (self.config.measured_power_dbm - rssi_dbm as f64)
            / (10.0 * self.config.path_loss_exponent);
        10f64.powf(exponent)
    }

    /// Project a closing approach slightly ahead of the GPS estimate
    ///
    /// Receding or steady targets pass through unchanged.
    fn predict_closing(&mut self, gps_distance: f64, now_ms: u64) -> f64 {
        match (self.gps_prev_distance, self.gps_prev_t_ms) {
            (Some(previous), Some(t_prev)) if now_ms > t_prev => {
                let dt_s = (now_ms - t_prev) as f64 / 1000.0;
                let speed = ((previous - gps_distance) / dt_s).max(0.0);
                if gps_distance < previous {
                    let horizon = if self.gps_predictions == 0 {
                        GPS_PREDICT_FIRST_S
                    } else {
                        GPS_PREDICT_PERIODIC_S
                    };
                    self.gps_predictions += 1;
                    (gps_distance - speed * horizon).max(0.0)
                } else {
                    gps_distance
                }
            }
            _ => gps_distance,
        }
    }

    fn smoothed_distance(&self) -> Option<f64> {
        if self.distance_window.is_empty() {
            return None;
        }
        Some(self.distance_window.iter().sum::<f64>() / self.distance_window.len() as f64)
    }

    /// Advance the proximity state machine
    ///
    /// Closing transitions fire instantly; receding ones demand the
    /// hysteresis margin past the current band's threshold.
    fn apply_proximity(&mut self, distance_m: f64) {
        let natural = ProximityLevel::natural(distance_m, &self.config);
        if natural < self.proximity {
            self.proximity = natural;
        } else if natural > self.proximity {
            if let Some(bound) = self.proximity.upper_bound_m(&self.config) {
                if distance_m >= bound + self.config.hysteresis_m {
                    self.proximity = natural;
                }
            }
        }
    }

    fn smoothed_heading(&self) -> Option<f64> {
        if self.compass_window.is_empty() {
            return None;
        }
        Some(self.compass_window.iter().sum::<f64>() / self.compass_window.len() as f64)
    }

    /// Relative bearing with the emission deadzone applied
    fn update_bearing(
        &mut self,
        record: &EmitterRecord,
        receiver_location: Option<&LocationSample>,
    ) -> Option<f64> {
        let absolute = self.bearing_to(record, receiver_location).ok()?;
        let heading = self.smoothed_heading()?;
        let candidate = normalize_deg(absolute - heading);

        match self.emitted_bearing {
            Some(previous)
                if angular_difference_deg(previous, candidate)
                    <= self.config.bearing_deadzone_deg =>
            {
                Some(previous)
            }
            _ => {
                self.emitted_bearing = Some(candidate);
                Some(candidate)
            }
        }
    }

    /// Cadence-gated haptic for this tick
    fn fire_haptic(&mut self, distance_m: f64, now_ms: u64) -> Option<PulsePattern> {
        let (interval_ms, pattern) = haptic_plan(distance_m, &self.config)?;
        let due = self
            .last_pulse_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms);
        if due {
            self.last_pulse_ms = Some(now_ms);
            Some(pattern)
        } else {
            None
        }
    }

    fn distance_text(&self, smoothed: Option<f64>) -> String {
        let Some(distance_m) = smoothed else {
            return "Searching".to_string();
        };
        if self.proximity == ProximityLevel::Here {
            return "Here".to_string();
        }
        let feet = distance_m * FEET_PER_METRE;
        if feet < 5.0 {
            format!("{}\"", (feet * 12.0).round() as i64)
        } else if feet < 100.0 {
            format!("{:.1}ft", feet)
        } else {
            format!("{}ft", feet.round() as i64)
        }
    }
}

/// Whether a record carries usable beacon coordinates (live or cached)
fn beacon_has_coordinates(record: &EmitterRecord) -> bool {
    record.payload.flags.gps_valid || record.using_cached_gps
}

/// Haptic interval and pattern for a distance, or silence
fn haptic_plan(distance_m: f64, config: &FinderConfig) -> Option<(u64, PulsePattern)> {
    if distance_m < config.here_m || distance_m >= HAPTIC_FAR_LIMIT_M {
        return None;
    }
    if distance_m < config.near_m {
        return Some((HAPTIC_NEAR_INTERVAL_MS, DOUBLE_PULSE));
    }
    let span = HAPTIC_FAR_LIMIT_M - config.near_m;
    let fraction = (distance_m - config.near_m) / span;
    let interval = HAPTIC_LERP_MIN_MS + (HAPTIC_LERP_MAX_MS - HAPTIC_LERP_MIN_MS) * fraction;
    Some((interval.round() as u64, SINGLE_PULSE))
}
