//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub emitter: EmitterConfig,

    #[serde(default)]
    pub receiver: ReceiverConfig,

    #[serde(default)]
    pub finder: FinderConfig,
}

/// Radio framing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    /// Company identifier the platform accepts for advertising
    #[serde(default = "default_company_id")]
    pub company_id: u16,

    /// Company identifiers recognized on decode
    #[serde(default = "default_accepted_company_ids")]
    pub accepted_company_ids: Vec<u16>,
}

/// Emitter configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EmitterConfig {
    /// Fixed device identity; generated from entropy when absent
    #[serde(default)]
    pub device_id: Option<u32>,

    #[serde(default = "default_interval_emergency_ms")]
    pub interval_emergency_ms: u64,

    #[serde(default = "default_interval_critical_ms")]
    pub interval_critical_ms: u64,

    #[serde(default = "default_interval_power_save_ms")]
    pub interval_power_save_ms: u64,

    #[serde(default = "default_interval_active_ms")]
    pub interval_active_ms: u64,

    #[serde(default = "default_interval_normal_ms")]
    pub interval_normal_ms: u64,

    /// How long a detected fall stays latched
    #[serde(default = "default_fall_cooldown_ms")]
    pub fall_cooldown_ms: u64,

    /// Worst GPS accuracy still flagged as a valid fix, metres
    #[serde(default = "default_gps_valid_max_m")]
    pub gps_valid_max_m: f64,
}

/// Receiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReceiverConfig {
    /// Records older than this are evicted, milliseconds
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,

    /// RSSI samples retained per emitter
    #[serde(default = "default_rssi_history_len")]
    pub rssi_history_len: usize,

    /// Minimum history length before outlier rejection arms
    #[serde(default = "default_rssi_outlier_arm_len")]
    pub rssi_outlier_arm_len: usize,

    /// Minimum samples surviving outlier rejection; otherwise all are kept
    #[serde(default = "default_rssi_iqr_min_retained")]
    pub rssi_iqr_min_retained: usize,

    /// Location fixes retained per emitter
    #[serde(default = "default_location_history_len")]
    pub location_history_len: usize,

    /// Minimum movement before a new fix enters the history, metres
    #[serde(default = "default_gps_history_min_step_m")]
    pub gps_history_min_step_m: f64,
}

/// Precision-finder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FinderConfig {
    /// Age beyond which the BLE link counts as lapsed, milliseconds
    #[serde(default = "default_ble_fresh_ms")]
    pub ble_fresh_ms: u64,

    /// Expected RSSI at one metre, dBm
    #[serde(default = "default_measured_power_dbm")]
    pub measured_power_dbm: f64,

    /// Path-loss exponent of the log-distance model
    #[serde(default = "default_path_loss_exponent")]
    pub path_loss_exponent: f64,

    /// Distance samples averaged before display
    #[serde(default = "default_distance_smoothing_len")]
    pub distance_smoothing_len: usize,

    /// Proximity thresholds, metres (here < near < medium)
    #[serde(default = "default_here_m")]
    pub here_m: f64,

    #[serde(default = "default_near_m")]
    pub near_m: f64,

    #[serde(default = "default_medium_m")]
    pub medium_m: f64,

    /// Extra distance demanded before moving to a farther level, metres
    #[serde(default = "default_hysteresis_m")]
    pub hysteresis_m: f64,

    /// Compass samples averaged for the bearing arrow
    #[serde(default = "default_compass_smoothing_len")]
    pub compass_smoothing_len: usize,

    /// Bearing change below which the arrow holds, degrees
    #[serde(default = "default_bearing_deadzone_deg")]
    pub bearing_deadzone_deg: f64,

    /// UI tick period, milliseconds
    #[serde(default = "default_ui_tick_ms")]
    pub ui_tick_ms: u64,
}

// Default value functions
fn default_company_id() -> u16 { 0x004C }
fn default_accepted_company_ids() -> Vec<u16> { vec![0x004C, 0x0075] }

fn default_interval_emergency_ms() -> u64 { 1_000 }
fn default_interval_critical_ms() -> u64 { 15_000 }
fn default_interval_power_save_ms() -> u64 { 10_000 }
fn default_interval_active_ms() -> u64 { 3_000 }
fn default_interval_normal_ms() -> u64 { 5_000 }
fn default_fall_cooldown_ms() -> u64 { 60_000 }
fn default_gps_valid_max_m() -> f64 { 200.0 }

fn default_stale_timeout_ms() -> u64 { 60_000 }
fn default_rssi_history_len() -> usize { 10 }
fn default_rssi_outlier_arm_len() -> usize { 5 }
fn default_rssi_iqr_min_retained() -> usize { 3 }
fn default_location_history_len() -> usize { 10 }
fn default_gps_history_min_step_m() -> f64 { 5.0 }

fn default_ble_fresh_ms() -> u64 { 3_000 }
fn default_measured_power_dbm() -> f64 { -59.0 }
fn default_path_loss_exponent() -> f64 { 2.0 }
fn default_distance_smoothing_len() -> usize { 10 }
fn default_here_m() -> f64 { 0.5 }
fn default_near_m() -> f64 { 1.5 }
fn default_medium_m() -> f64 { 5.0 }
fn default_hysteresis_m() -> f64 { 0.15 }
fn default_compass_smoothing_len() -> usize { 5 }
fn default_bearing_deadzone_deg() -> f64 { 5.0 }
fn default_ui_tick_ms() -> u64 { 250 }

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            company_id: default_company_id(),
            accepted_company_ids: default_accepted_company_ids(),
        }
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            interval_emergency_ms: default_interval_emergency_ms(),
            interval_critical_ms: default_interval_critical_ms(),
            interval_power_save_ms: default_interval_power_save_ms(),
            interval_active_ms: default_interval_active_ms(),
            interval_normal_ms: default_interval_normal_ms(),
            fall_cooldown_ms: default_fall_cooldown_ms(),
            gps_valid_max_m: default_gps_valid_max_m(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            stale_timeout_ms: default_stale_timeout_ms(),
            rssi_history_len: default_rssi_history_len(),
            rssi_outlier_arm_len: default_rssi_outlier_arm_len(),
            rssi_iqr_min_retained: default_rssi_iqr_min_retained(),
            location_history_len: default_location_history_len(),
            gps_history_min_step_m: default_gps_history_min_step_m(),
        }
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            ble_fresh_ms: default_ble_fresh_ms(),
            measured_power_dbm: default_measured_power_dbm(),
            path_loss_exponent: default_path_loss_exponent(),
            distance_smoothing_len: default_distance_smoothing_len(),
            here_m: default_here_m(),
            near_m: default_near_m(),
            medium_m: default_medium_m(),
            hysteresis_m: default_hysteresis_m(),
            compass_smoothing_len: default_compass_smoothing_len(),
            bearing_deadzone_deg: default_bearing_deadzone_deg(),
            ui_tick_ms: default_ui_tick_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            emitter: EmitterConfig::default(),
            receiver: ReceiverConfig::default(),
            finder: FinderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file when present, otherwise use defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.radio.accepted_company_ids.is_empty() {
            return Err(crate::error::PhoenixError::Config(
                toml::de::Error::custom("accepted_company_ids cannot be empty"),
            ));
        }

        if !self
            .radio
            .accepted_company_ids
            .contains(&self.radio.company_id)
        {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "company_id must be in accepted_company_ids",
            )));
        }

        for (name, value) in [
            ("interval_emergency_ms", self.emitter.interval_emergency_ms),
            ("interval_critical_ms", self.emitter.interval_critical_ms),
            ("interval_power_save_ms", self.emitter.interval_power_save_ms),
            ("interval_active_ms", self.emitter.interval_active_ms),
            ("interval_normal_ms", self.emitter.interval_normal_ms),
            ("stale_timeout_ms", self.receiver.stale_timeout_ms),
            ("ble_fresh_ms", self.finder.ble_fresh_ms),
            ("ui_tick_ms", self.finder.ui_tick_ms),
        ] {
            if value == 0 {
                return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                    format!("{} must be greater than 0", name),
                )));
            }
        }

        if self.emitter.gps_valid_max_m <= 0.0 {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "gps_valid_max_m must be positive",
            )));
        }

        if self.receiver.rssi_history_len == 0 || self.receiver.location_history_len == 0 {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "history lengths must be greater than 0",
            )));
        }

        if self.receiver.rssi_iqr_min_retained == 0 {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "rssi_iqr_min_retained must be greater than 0",
            )));
        }

        if self.finder.path_loss_exponent <= 0.0 {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "path_loss_exponent must be positive",
            )));
        }

        if self.finder.distance_smoothing_len == 0 || self.finder.compass_smoothing_len == 0 {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "smoothing lengths must be greater than 0",
            )));
        }

        if !(self.finder.here_m < self.finder.near_m && self.finder.near_m < self.finder.medium_m) {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "proximity thresholds must satisfy here_m < near_m < medium_m",
            )));
        }

        if self.finder.hysteresis_m < 0.0 {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "hysteresis_m cannot be negative",
            )));
        }

        if self.finder.bearing_deadzone_deg < 0.0 || self.finder.bearing_deadzone_deg >= 180.0 {
            return Err(crate::error::PhoenixError::Config(toml::de::Error::custom(
                "bearing_deadzone_deg must be in [0, 180)",
            )));
        }

        Ok(())
    }
}
