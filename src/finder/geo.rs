//! # Great-Circle Geometry
//!
//! Haversine distance and initial bearing over the spherical earth
//! model. Accuracy is well inside GPS error at beacon-hunt ranges; no
//! datum correction is attempted.

use std::f64::consts::PI;

/// Mean earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Convert degrees to radians.
fn deg2rad(d: f64) -> f64 {
    d * PI / 180.0
}

/// Convert radians to degrees.
fn rad2deg(r: f64) -> f64 {
    r * 180.0 / PI
}

/// Normalize an angle to the range [0, 360).
pub fn normalize_deg(a: f64) -> f64 {
    ((a % 360.0) + 360.0) % 360.0
}

/// Smallest rotation between two angles, in degrees [0, 180].
pub fn angular_difference_deg(a: f64, b: f64) -> f64 {
    let diff = (normalize_deg(a) - normalize_deg(b)).abs();
    diff.min(360.0 - diff)
}

/// Compute haversine distance between two points in metres.
///
/// All inputs in degrees.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = deg2rad(lat2 - lat1);
    let dlon = deg2rad(lon2 - lon1);
    let lat1r = deg2rad(lat1);
    let lat2r = deg2rad(lat2);

    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Compute the great-circle initial bearing from one point to another.
///
/// All inputs in degrees; returns bearing in degrees [0, 360).
pub fn initial_bearing_deg(from_lat: f64, from_lon: f64, to_lat: f64, to_lon: f64) -> f64 {
    let lat1 = deg2rad(from_lat);
    let lat2 = deg2rad(to_lat);
    let dlon = deg2rad(to_lon - from_lon);

    let x = dlon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    normalize_deg(rad2deg(x.atan2(y)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_m(37.422, -122.084, 37.422, -122.084), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is about 111.2 km
        let d = haversine_m(37.0, -122.0, 38.0, -122.0);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);

        // Short range: ~11.1 m per 1e-4 degree of latitude
        let d = haversine_m(37.0, -122.0, 37.0001, -122.0);
        assert!((d - 11.1).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_initial_bearing_cardinals() {
        let north = initial_bearing_deg(37.0, -122.0, 38.0, -122.0);
        assert!(north.abs() < 1e-6 || (north - 360.0).abs() < 1e-6);

        let south = initial_bearing_deg(38.0, -122.0, 37.0, -122.0);
        assert!((south - 180.0).abs() < 1e-6);

        let east = initial_bearing_deg(0.0, 0.0, 0.0, 1.0);
        assert!((east - 90.0).abs() < 1e-6);

        let west = initial_bearing_deg(0.0, 1.0, 0.0, 0.0);
        assert!((west - 270.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_deg() {
        assert_eq!(normalize_deg(0.0), 0.0);
        assert_eq!(normalize_deg(360.0), 0.0);
        assert_eq!(normalize_deg(-90.0), 270.0);
        assert_eq!(normalize_deg(725.0), 5.0);
    }

    #[test]
    fn test_angular_difference() {
        assert_eq!(angular_difference_deg(10.0, 350.0), 20.0);
        assert_eq!(angular_difference_deg(0.0, 180.0), 180.0);
        assert_eq!(angular_difference_deg(90.0, 95.0), 5.0);
    }
}
