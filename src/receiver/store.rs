//! # Receiver Record Store
//!
//! Per-emitter records built from decoded advertisements: smoothed RSSI
//! with outlier rejection, cached GPS retention, bounded location
//! history and stale eviction. The scan ingress is the sole writer;
//! everything else sees cloned snapshots.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::beacon::BeaconPayload;
use crate::config::ReceiverConfig;
use crate::finder::geo::haversine_m;

/// One retained GPS fix from an emitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub t_ms: u64,
}

/// Everything the receiver knows about one emitter
#[derive(Debug, Clone)]
pub struct EmitterRecord {
    /// Device identity from the payload
    pub device_id: u32,

    /// Platform peer identifier of the most recent advertisement
    pub ble_peer_id: String,

    /// Platform device name, display only, never identity
    pub display_name: Option<String>,

    /// Latest payload, with cached coordinates substituted when the
    /// emitter lost its fix
    pub payload: BeaconPayload,

    /// Signal strength of the most recent advertisement, dBm
    pub rssi_raw: i16,

    /// Outlier-rejected weighted mean of recent signal strength, dBm
    pub rssi_smoothed: i16,

    /// Recent RSSI samples, oldest first
    pub rssi_history: VecDeque<i16>,

    /// Whether the stored coordinates come from an earlier packet
    pub using_cached_gps: bool,

    /// Recent GPS fixes, oldest first
    pub location_history: VecDeque<LocationFix>,

    /// Arrival time of the most recent advertisement
    pub last_seen_ms: u64,
}

/// The single-writer store of emitter records
pub struct RecordStore {
    config: ReceiverConfig,
    records: HashMap<u32, EmitterRecord>,
    rejected_payloads: u64,
    dropped_frames: u64,
}

impl RecordStore {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
            rejected_payloads: 0,
            dropped_frames: 0,
        }
    }

    /// Apply one decoded, validated payload to the store
    ///
    /// Creates the record on first contact, otherwise updates signal
    /// smoothing, cached coordinates, location history and last-seen.
    pub fn upsert(
        &mut self,
        peer_id: &str,
        local_name: Option<&str>,
        payload: BeaconPayload,
        rssi_dbm: i16,
        now_ms: u64,
    ) -> &EmitterRecord {
        let config = &self.config;
        let record = self
            .records
            .entry(payload.device_id)
            .or_insert_with(|| EmitterRecord {
                device_id: payload.device_id,
                ble_peer_id: peer_id.to_string(),
                display_name: None,
                payload,
                rssi_raw: rssi_dbm,
                rssi_smoothed: rssi_dbm,
                rssi_history: VecDeque::with_capacity(config.rssi_history_len),
                using_cached_gps: false,
                location_history: VecDeque::with_capacity(config.location_history_len),
                last_seen_ms: now_ms,
            });

        record.ble_peer_id = peer_id.to_string();
        if let Some(name) = local_name {
            record.display_name = Some(name.to_string());
        }

        record.rssi_history.push_back(rssi_dbm);
        while record.rssi_history.len() > config.rssi_history_len {
            record.rssi_history.pop_front();
        }
        record.rssi_raw = rssi_dbm;
        record.rssi_smoothed = smoothed_rssi(
            &record.rssi_history,
            config.rssi_outlier_arm_len,
            config.rssi_iqr_min_retained,
        );

        // An emitter that lost its fix broadcasts 0/0; keep the last
        // position we saw instead of jumping to the null island.
        let had_coordinates = record.payload.flags.gps_valid || record.using_cached_gps;
        if !payload.flags.gps_valid && had_coordinates {
            let cached = record.payload;
            record.payload = payload;
            record.payload.latitude = cached.latitude;
            record.payload.longitude = cached.longitude;
            record.payload.altitude_msl_m = cached.altitude_msl_m;
            record.using_cached_gps = true;
        } else {
            record.payload = payload;
            record.using_cached_gps = false;
        }

        if payload.flags.gps_valid {
            let fix = LocationFix {
                latitude: payload.latitude as f64,
                longitude: payload.longitude as f64,
                altitude_m: payload.altitude_msl_m as f64,
                t_ms: now_ms,
            };
            let moved_enough = record.location_history.back().map_or(true, |last| {
                haversine_m(last.latitude, last.longitude, fix.latitude, fix.longitude)
                    > config.gps_history_min_step_m
            });
            if moved_enough {
                record.location_history.push_back(fix);
                while record.location_history.len() > config.location_history_len {
                    record.location_history.pop_front();
                }
            }
        }

        record.last_seen_ms = now_ms;
        record
    }

    /// Remove records not heard from within the stale timeout
    pub fn evict_stale(&mut self, now_ms: u64) -> usize {
        let timeout = self.config.stale_timeout_ms;
        let before = self.records.len();
        self.records
            .retain(|_, record| now_ms.saturating_sub(record.last_seen_ms) <= timeout);
        before - self.records.len()
    }

    pub fn get(&self, device_id: u32) -> Option<&EmitterRecord> {
        self.records.get(&device_id)
    }

    /// Cloned snapshot for read-only consumers
    pub fn snapshot(&self, device_id: u32) -> Option<EmitterRecord> {
        self.records.get(&device_id).cloned()
    }

    pub fn records(&self) -> impl Iterator<Item = &EmitterRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn note_rejected_payload(&mut self) {
        self.rejected_payloads += 1;
    }

    pub fn note_dropped_frame(&mut self) {
        self.dropped_frames += 1;
    }

    pub fn rejected_payloads(&self) -> u64 {
        self.rejected_payloads
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

/// Outlier-rejecting weighted mean of an RSSI history
///
/// With at least `arm_len` samples, values outside
/// `[Q1 - 1.5·IQR, Q3 + 1.5·IQR]` are discarded unless fewer than
/// `min_retained` survive. The mean weights newer samples more
/// (weights 1..n over the surviving sequence) and rounds to whole dBm.
fn smoothed_rssi(history: &VecDeque<i16>, arm_len: usize, min_retained: usize) -> i16 {
    if history.is_empty() {
        return 0;
    }

    let all: Vec<i16> = history.iter().copied().collect();
    let retained: Vec<i16> = if all.len() >= arm_len {
        let mut sorted = all.clone();
        sorted.sort_unstable();
        let q1 = sorted[sorted.len() / 4] as f64;
        let q3 = sorted[(3 * sorted.len()) / 4] as f64;
        let iqr = q3 - q1;
        let lo = q1 - 1.5 * iqr;
        let hi = q3 + 1.5 * iqr;

        let kept: Vec<i16> = all
            .iter()
            .copied()
            .filter(|&v| (v as f64) >= lo && (v as f64) <= hi)
            .collect();
        if kept.len() < min_retained {
            all
        } else {
            kept
        }
    } else {
        all
    };

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (i, &value) in retained.iter().enumerate() {
        let weight = (i + 1) as f64;
        weighted_sum += weight * value as f64;
        weight_total += weight;
    }
    (weighted_sum / weight_total).round() as i16
}
