//! Geometry helpers over the pipeline's fixed-point coordinates.

use geo::{HaversineBearing, HaversineDistance, Point};

use crate::graph::COORDINATE_PRECISION;

fn to_point(lat: i32, lon: i32) -> Point<f64> {
    Point::new(
        lon as f64 / COORDINATE_PRECISION,
        lat as f64 / COORDINATE_PRECISION,
    )
}

/// Great-circle distance in meters between two fixed-point coordinates.
pub fn haversine_m(lat1: i32, lon1: i32, lat2: i32, lon2: i32) -> f64 {
    to_point(lat1, lon1).haversine_distance(&to_point(lat2, lon2))
}

/// Forward bearing from the first to the second coordinate, in whole
/// degrees normalized to `[0, 360)`.
pub fn bearing_deg(lat1: i32, lon1: i32, lat2: i32, lon2: i32) -> i16 {
    let deg = to_point(lat1, lon1).haversine_bearing(to_point(lat2, lon2));
    let normalized = deg.rem_euclid(360.0);
    normalized.round() as i16 % 360
}

/// Clockwise angle between an incoming and an outgoing bearing, in
/// `[0, 360)`. 180 is straight ahead, 0/360 a full u-turn.
pub fn turn_angle(bearing_in: i16, bearing_out: i16) -> i16 {
    ((bearing_out as i32 - bearing_in as i32 + 540).rem_euclid(360)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearing_cardinal_directions() {
        // Due north.
        assert_eq!(bearing_deg(0, 0, 100_000, 0), 0);
        // Due east.
        assert_eq!(bearing_deg(0, 0, 0, 100_000), 90);
        // Due south.
        assert_eq!(bearing_deg(100_000, 0, 0, 0), 180);
    }

    #[test]
    fn straight_through_is_180() {
        assert_eq!(turn_angle(90, 90), 180);
        assert_eq!(turn_angle(0, 0), 180);
    }

    #[test]
    fn uturn_is_zero() {
        assert_eq!(turn_angle(90, 270), 0);
    }

    #[test]
    fn haversine_one_degree_latitude() {
        let d = haversine_m(0, 0, 100_000, 0);
        // One degree of latitude is roughly 111 km.
        assert!((d - 111_000.0).abs() < 1_000.0, "got {d}");
    }
}
