//! # Phoenix Library
//!
//! Peer-to-peer emergency locator over Bluetooth Low Energy.
//!
//! Battery-powered emitters broadcast a compact 20-byte beacon in
//! manufacturer-data advertisements (position, altitude, battery,
//! condition flags); receivers scan, decode and guide a user to a
//! chosen emitter with distance, bearing and haptics, falling back to
//! GPS tracking when the BLE link lapses.

pub mod beacon;
pub mod config;
pub mod emitter;
pub mod error;
pub mod finder;
pub mod platform;
pub mod receiver;
