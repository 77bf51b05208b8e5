//! # Beacon Payload Encoder
//!
//! Encodes beacon fields into the fixed 20-byte payload and wraps the
//! payload in the 24-byte manufacturer-data frame.

use super::protocol::*;

/// Encode beacon fields into the 20-byte payload
///
/// Applies the canonicalization rules:
/// - battery clamped to 0–100 and rounded
/// - altitude MSL rounded to the nearest metre (no clamp; the producer
///   pre-clamps to the validator range)
/// - relative altitude rounded to the nearest centimetre
/// - timestamp floored and saturated at 65535
///
/// Multi-byte fields are written big-endian; latitude and longitude as
/// IEEE-754 binary32.
///
/// # Arguments
///
/// * `fields` - Raw field values, measured units
///
/// # Returns
///
/// * `[u8; PAYLOAD_LEN]` - The 20-byte wire payload
pub fn encode_payload(fields: &BeaconFields) -> [u8; PAYLOAD_LEN] {
    let mut payload = [0u8; PAYLOAD_LEN];

    payload[0..4].copy_from_slice(&fields.device_id.to_be_bytes());
    payload[4..8].copy_from_slice(&fields.latitude.to_be_bytes());
    payload[8..12].copy_from_slice(&fields.longitude.to_be_bytes());

    let altitude_msl = fields.altitude_msl_m.round() as i16;
    payload[12..14].copy_from_slice(&altitude_msl.to_be_bytes());

    let relative_altitude = fields.relative_altitude_cm.round() as i16;
    payload[14..16].copy_from_slice(&relative_altitude.to_be_bytes());

    payload[16] = fields.battery_pct.clamp(0.0, 100.0).round() as u8;

    let timestamp = fields.timestamp_s.max(0.0).floor().min(65535.0) as u16;
    payload[17..19].copy_from_slice(&timestamp.to_be_bytes());

    payload[19] = fields.flags.to_byte();

    payload
}

/// Wrap a payload in the manufacturer-data frame
///
/// Frame layout: `[CompanyID:2 LE] [Magic:2 LE] [Payload:20]`. The
/// little-endian framing fields follow BLE manufacturer-data convention;
/// the payload itself stays big-endian.
///
/// # Arguments
///
/// * `payload` - The 20-byte encoded payload
/// * `company_id` - Company identifier the advertising platform accepts
///
/// # Returns
///
/// * `[u8; FRAME_LEN]` - The 24-byte manufacturer-data frame
pub fn wrap_frame(payload: &[u8; PAYLOAD_LEN], company_id: u16) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0..2].copy_from_slice(&company_id.to_le_bytes());
    frame[2..4].copy_from_slice(&PHOENIX_MAGIC.to_le_bytes());
    frame[4..].copy_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_fields() -> BeaconFields {
        BeaconFields {
            device_id: 0xDEAD_BEEF,
            latitude: 37.422,
            longitude: -122.084,
            altitude_msl_m: 12.0,
            relative_altitude_cm: 50.0,
            battery_pct: 87.0,
            timestamp_s: 1234.0,
            flags: BeaconFlags {
                gps_valid: true,
                motion_detected: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_encode_canonical_payload() {
        let payload = encode_payload(&canonical_fields());

        let expected: [u8; PAYLOAD_LEN] = [
            0xDE, 0xAD, 0xBE, 0xEF, // device id
            0x42, 0x15, 0xB0, 0x21, // 37.422 as binary32
            0xC2, 0xF4, 0x2B, 0x02, // -122.084 as binary32
            0x00, 0x0C, // altitude MSL: 12 m
            0x00, 0x32, // relative altitude: 50 cm
            0x57, // battery: 87%
            0x04, 0xD2, // timestamp: 1234 s
            0x11, // flags: gps_valid | motion_detected
        ];
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_encode_battery_clamped_and_rounded() {
        let mut fields = canonical_fields();

        fields.battery_pct = 150.0;
        assert_eq!(encode_payload(&fields)[16], 100);

        fields.battery_pct = -5.0;
        assert_eq!(encode_payload(&fields)[16], 0);

        fields.battery_pct = 49.6;
        assert_eq!(encode_payload(&fields)[16], 50);
    }

    #[test]
    fn test_encode_altitude_rounding() {
        let mut fields = canonical_fields();

        fields.altitude_msl_m = 11.5;
        let payload = encode_payload(&fields);
        assert_eq!(i16::from_be_bytes([payload[12], payload[13]]), 12);

        fields.altitude_msl_m = -3.6;
        let payload = encode_payload(&fields);
        assert_eq!(i16::from_be_bytes([payload[12], payload[13]]), -4);

        fields.relative_altitude_cm = -120.4;
        let payload = encode_payload(&fields);
        assert_eq!(i16::from_be_bytes([payload[14], payload[15]]), -120);
    }

    #[test]
    fn test_encode_timestamp_saturates() {
        let mut fields = canonical_fields();

        fields.timestamp_s = 99999.0;
        let payload = encode_payload(&fields);
        assert_eq!(u16::from_be_bytes([payload[17], payload[18]]), 65535);

        fields.timestamp_s = 12.9;
        let payload = encode_payload(&fields);
        assert_eq!(u16::from_be_bytes([payload[17], payload[18]]), 12);

        fields.timestamp_s = -1.0;
        let payload = encode_payload(&fields);
        assert_eq!(u16::from_be_bytes([payload[17], payload[18]]), 0);
    }

    #[test]
    fn test_wrap_frame_layout() {
        let payload = encode_payload(&canonical_fields());
        let frame = wrap_frame(&payload, COMPANY_ID_APPLE);

        assert_eq!(frame.len(), FRAME_LEN);
        // Company id and magic are little-endian
        assert_eq!(frame[0], 0x4C);
        assert_eq!(frame[1], 0x00);
        assert_eq!(frame[2], 0x48);
        assert_eq!(frame[3], 0x50);
        assert_eq!(&frame[4..], &payload);
    }

    #[test]
    fn test_wrap_frame_alternate_company() {
        let payload = [0u8; PAYLOAD_LEN];
        let frame = wrap_frame(&payload, COMPANY_ID_ALT);
        assert_eq!(frame[0], 0x75);
        assert_eq!(frame[1], 0x00);
    }
}
