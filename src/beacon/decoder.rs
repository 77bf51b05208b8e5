//! # Beacon Payload Decoder
//!
//! Decodes the 20-byte payload, unwraps the manufacturer-data frame and
//! validates decoded fields against the wire-format invariants.

use super::protocol::*;
use crate::error::{PhoenixError, Result};

/// Decode a 20-byte payload into beacon fields
///
/// Returns the raw wire values without range enforcement; receivers run
/// [`validate`] before accepting a payload.
///
/// # Arguments
///
/// * `data` - Payload bytes
///
/// # Errors
///
/// Returns `BadSize` if `data` is not exactly 20 bytes.
pub fn decode_payload(data: &[u8]) -> Result<BeaconPayload> {
    if data.len() != PAYLOAD_LEN {
        return Err(PhoenixError::BadSize {
            expected: PAYLOAD_LEN,
            actual: data.len(),
        });
    }

    Ok(BeaconPayload {
        device_id: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        latitude: f32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        longitude: f32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        altitude_msl_m: i16::from_be_bytes([data[12], data[13]]),
        relative_altitude_cm: i16::from_be_bytes([data[14], data[15]]),
        battery_pct: data[16],
        timestamp_s: u16::from_be_bytes([data[17], data[18]]),
        flags: BeaconFlags::from_byte(data[19]),
    })
}

/// Unwrap a manufacturer-data frame into company id and payload
///
/// # Arguments
///
/// * `data` - Raw manufacturer data from an advertisement
/// * `accepted_company_ids` - Company identifiers recognized on decode
///
/// # Errors
///
/// Returns `NotPhoenix` if the frame is not exactly 24 bytes, the magic
/// word does not match, or the company id is not in the accepted set.
pub fn unwrap_frame(data: &[u8], accepted_company_ids: &[u16]) -> Result<(u16, [u8; PAYLOAD_LEN])> {
    if data.len() != FRAME_LEN {
        return Err(PhoenixError::NotPhoenix);
    }

    let company_id = u16::from_le_bytes([data[0], data[1]]);
    let magic = u16::from_le_bytes([data[2], data[3]]);

    if magic != PHOENIX_MAGIC || !accepted_company_ids.contains(&company_id) {
        return Err(PhoenixError::NotPhoenix);
    }

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&data[4..]);

    Ok((company_id, payload))
}

/// Check a decoded payload against the wire-format invariants
///
/// Receivers drop payloads that fail this check. The invariants:
/// - latitude in [-90, 90], longitude in [-180, 180] (NaN fails both)
/// - battery in [0, 100]
/// - altitude MSL in [-500, 9000] metres
/// - the low-battery flag implies battery below 20%
pub fn validate(payload: &BeaconPayload) -> bool {
    if !(-90.0..=90.0).contains(&payload.latitude) {
        return false;
    }
    if !(-180.0..=180.0).contains(&payload.longitude) {
        return false;
    }
    if payload.battery_pct > 100 {
        return false;
    }
    if payload.altitude_msl_m < ALTITUDE_MSL_MIN_M || payload.altitude_msl_m > ALTITUDE_MSL_MAX_M {
        return false;
    }
    if payload.flags.low_battery && payload.battery_pct >= LOW_BATTERY_THRESHOLD_PCT {
        return false;
    }
    true
}
