//! # Platform Adapter Module
//!
//! Trait abstractions over platform BLE and sensor sources so the core
//! stays testable on any host.
//!
//! The core never talks to a concrete radio or sensor API: emitters
//! drive a [`Peripheral`], receivers consume advertisements from a
//! [`Central`], and fusion reads [`SensorSuite`] snapshots. Platform
//! callbacks are delivered as messages on tokio channels, which keeps
//! all state mutation on the owning task.

pub mod loopback;
pub mod sim;

use async_trait::async_trait;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::beacon::FRAME_LEN;
use crate::error::Result;

/// BLE adapter power/authorization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Resetting,
    Unknown,
}

/// A GPS fix with horizontal accuracy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Altitude above mean sea level in metres
    pub altitude_m: f64,

    /// Horizontal accuracy radius in metres
    pub accuracy_m: f64,
}

/// Accelerometer reading in g
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelSample {
    /// Vector magnitude in g
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Gyroscope reading in rad/s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GyroSample {
    /// Rotation-rate magnitude in rad/s
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Barometric altimeter reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltimeterSample {
    /// Altitude relative to the altimeter's own reference, metres
    pub relative_m: f64,
}

/// Battery source reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySample {
    /// Charge level, 0.0–1.0
    pub level: f64,

    /// Whether the device is charging
    pub charging: bool,
}

/// One snapshot of every sensor modality
///
/// Missing modalities are `None`; fusion degrades accordingly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub location: Option<LocationSample>,
    pub accel: Option<AccelSample>,
    pub gyro: Option<GyroSample>,
    pub compass_heading_deg: Option<f64>,
    pub altimeter: Option<AltimeterSample>,
    pub battery: BatterySample,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            location: None,
            accel: None,
            gyro: None,
            compass_heading_deg: None,
            altimeter: None,
            battery: BatterySample {
                level: 1.0,
                charging: false,
            },
        }
    }
}

/// A received BLE advertisement carrying manufacturer data
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Platform peer identifier (not a device identity)
    pub peer_id: String,

    /// Platform device name from scan response, display only
    pub local_name: Option<String>,

    /// Raw manufacturer-specific data
    pub manufacturer_data: Vec<u8>,

    /// Received signal strength in dBm
    pub rssi_dbm: i16,

    /// Arrival time on the receiver clock, milliseconds
    pub received_at_ms: u64,
}

/// BLE peripheral (advertiser) driver
#[async_trait]
pub trait Peripheral: Send {
    /// Prepare the adapter for advertising
    async fn initialize(&mut self) -> Result<()>;

    /// Current adapter state
    fn state(&self) -> RadioState;

    /// Begin (or refresh) advertising the given manufacturer-data frame
    async fn start_advertising(&mut self, frame: [u8; FRAME_LEN]) -> Result<()>;

    /// Stop advertising
    async fn stop_advertising(&mut self) -> Result<()>;
}

/// BLE central (scanner) driver
#[async_trait]
pub trait Central: Send {
    /// Prepare the adapter for scanning
    async fn initialize(&mut self) -> Result<()>;

    /// Current adapter state
    fn state(&self) -> RadioState;

    /// Start scanning with duplicates allowed; advertisements arrive on
    /// the returned channel
    async fn start_scanning(&mut self) -> Result<mpsc::Receiver<Advertisement>>;

    /// Stop scanning; the advertisement channel closes
    async fn stop_scanning(&mut self) -> Result<()>;
}

/// Platform sensor sources (GPS, IMU, barometer, compass, battery)
#[async_trait]
pub trait SensorSuite: Send {
    /// Start sensor streams
    ///
    /// Returns the names of modalities that failed to start. Individual
    /// failures are non-fatal; affected snapshot fields stay `None`.
    async fn start(&mut self) -> Vec<&'static str>;

    /// Read the latest value of every modality
    async fn snapshot(&mut self) -> SensorSnapshot;

    /// Stop sensor streams (best effort)
    async fn stop(&mut self);
}

/// Haptic engine
#[async_trait]
pub trait Haptics: Send {
    /// Play a pulse pattern
    async fn pulse(&mut self, pattern: PulsePattern);
}

/// Haptic pulse patterns used by the precision finder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulsePattern {
    /// One pulse of the given duration
    Single { duration_ms: u64 },

    /// Two pulses separated by a gap
    Double { pulse_ms: u64, gap_ms: u64 },
}

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Clock backed by `std::time::Instant`, origin at construction
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Entropy source, used only for default device-id generation
pub trait Rng: Send {
    fn next_u32(&mut self) -> u32;
}

/// Entropy source backed by the operating system
pub struct SystemRng;

impl Rng for SystemRng {
    fn next_u32(&mut self) -> u32 {
        rand::random()
    }
}
