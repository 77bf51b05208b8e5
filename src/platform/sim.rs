//! # Simulated Sensor Suite
//!
//! A `SensorSuite` implementation producing a plausible walk: GPS jitter
//! around a fixed point, bursts of motion, a slowly draining battery.
//! Drives the demo binary so the whole pipeline can run on a desk.

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng};

use super::{
    AccelSample, BatterySample, GyroSample, LocationSample, SensorSnapshot, SensorSuite,
};

/// Roughly one metre of latitude in degrees
const DEG_PER_METRE: f64 = 1.0 / 111_320.0;

/// Simulated walker around a fixed origin
pub struct SimulatedSensors {
    rng: SmallRng,
    latitude: f64,
    longitude: f64,
    altitude_m: f64,
    battery_level: f64,
    heading_deg: f64,
    tick: u64,
}

impl SimulatedSensors {
    pub fn new(latitude: f64, longitude: f64, altitude_m: f64) -> Self {
        Self {
            rng: SmallRng::from_entropy(),
            latitude,
            longitude,
            altitude_m,
            battery_level: 0.93,
            heading_deg: 0.0,
            tick: 0,
        }
    }
}

#[async_trait]
impl SensorSuite for SimulatedSensors {
    async fn start(&mut self) -> Vec<&'static str> {
        // The walker has no barometer; fusion falls back to GPS altitude
        vec!["altimeter"]
    }

    async fn snapshot(&mut self) -> SensorSnapshot {
        self.tick += 1;

        // Wander a metre or two every few ticks
        let moving = self.tick % 7 < 3;
        if moving {
            self.latitude += self.rng.gen_range(-1.5..1.5) * DEG_PER_METRE;
            self.longitude += self.rng.gen_range(-1.5..1.5) * DEG_PER_METRE;
        }

        self.battery_level = (self.battery_level - 0.0001).max(0.0);
        self.heading_deg = (self.heading_deg + self.rng.gen_range(-4.0..4.0)).rem_euclid(360.0);

        let accel_noise = if moving { 0.25 } else { 0.02 };
        let accel = AccelSample {
            x: self.rng.gen_range(-accel_noise..accel_noise),
            y: self.rng.gen_range(-accel_noise..accel_noise),
            z: 1.0 + self.rng.gen_range(-accel_noise..accel_noise),
        };

        let gyro_noise = if moving { 0.4 } else { 0.05 };
        let gyro = GyroSample {
            x: self.rng.gen_range(-gyro_noise..gyro_noise),
            y: self.rng.gen_range(-gyro_noise..gyro_noise),
            z: self.rng.gen_range(-gyro_noise..gyro_noise),
        };

        SensorSnapshot {
            location: Some(LocationSample {
                latitude: self.latitude,
                longitude: self.longitude,
                altitude_m: self.altitude_m,
                accuracy_m: self.rng.gen_range(3.0..15.0),
            }),
            accel: Some(accel),
            gyro: Some(gyro),
            compass_heading_deg: Some(self.heading_deg),
            altimeter: None,
            battery: BatterySample {
                level: self.battery_level,
                charging: false,
            },
        }
    }

    async fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_snapshot_shape() {
        let mut sensors = SimulatedSensors::new(37.422, -122.084, 12.0);
        assert_eq!(sensors.start().await, vec!["altimeter"]);

        let snapshot = sensors.snapshot().await;
        let location = snapshot.location.unwrap();
        assert!((location.latitude - 37.422).abs() < 0.001);
        assert!(location.accuracy_m >= 3.0 && location.accuracy_m <= 15.0);
        assert!(snapshot.accel.is_some());
        assert!(snapshot.altimeter.is_none());
        assert!(snapshot.battery.level > 0.9);
    }

    #[tokio::test]
    async fn test_simulated_battery_drains() {
        let mut sensors = SimulatedSensors::new(0.0, 0.0, 0.0);
        let first = sensors.snapshot().await.battery.level;
        for _ in 0..10 {
            sensors.snapshot().await;
        }
        let later = sensors.snapshot().await.battery.level;
        assert!(later < first);
    }
}
