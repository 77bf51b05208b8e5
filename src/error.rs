//! # Error Types
//!
//! Custom error types for Phoenix using `thiserror`.

use thiserror::Error;

use crate::platform::RadioState;

/// Main error type for Phoenix
#[derive(Debug, Error)]
pub enum PhoenixError {
    /// Payload buffer has the wrong length
    #[error("bad payload size: expected {expected} bytes, got {actual}")]
    BadSize { expected: usize, actual: usize },

    /// A field violates its encoding range
    #[error("field out of range: {0}")]
    BadRange(String),

    /// Manufacturer data is not a Phoenix frame
    #[error("not a Phoenix frame")]
    NotPhoenix,

    /// The BLE radio cannot be used in its current state
    #[error("Bluetooth unavailable (adapter state: {state:?})")]
    BleUnavailable { state: RadioState },

    /// The peripheral refused or failed to start advertising
    #[error("advertisement transmission failed: {cause}")]
    Transmission { cause: String },

    /// The central reported a scan failure
    #[error("scan failed: {cause}")]
    ScanFailed { cause: String },

    /// A sensor modality could not be started; fusion degrades
    #[error("sensor unavailable: {modality}")]
    SensorUnavailable { modality: &'static str },

    /// The receiver has no location fix yet; bearing is unavailable
    #[error("no receiver location yet")]
    NoLocationYet,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Phoenix
pub type Result<T> = std::result::Result<T, PhoenixError>;
