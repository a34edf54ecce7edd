//! Great-circle distance helpers.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by every distance computation, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Haversine distance between two points, in meters.
pub fn haversine(from: GeoPoint, to: GeoPoint) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let delta_phi = (to.latitude - from.latitude).to_radians();
    let delta_lambda = (to.longitude - from.longitude).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Point reached by moving `meters` due north of `origin`.
///
/// Used to build positions at a known distance from a geofence center.
pub fn offset_north(origin: GeoPoint, meters: f64) -> GeoPoint {
    let delta = (meters / EARTH_RADIUS_METERS).to_degrees();
    GeoPoint::new(origin.latitude + delta, origin.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZOCALO: GeoPoint = GeoPoint::new(19.4326, -99.1332);

    #[test]
    fn distance_to_self_is_zero() {
        assert!(haversine(ZOCALO, ZOCALO).abs() < f64::EPSILON);
        let pole = GeoPoint::new(90.0, 0.0);
        assert!(haversine(pole, pole).abs() < f64::EPSILON);
    }

    #[test]
    fn distance_is_symmetric() {
        let guadalajara = GeoPoint::new(20.6597, -103.3496);
        let there = haversine(ZOCALO, guadalajara);
        let back = haversine(guadalajara, ZOCALO);
        assert!((there - back).abs() < 1e-6);
    }

    #[test]
    fn known_city_distance_matches_reference() {
        // Mexico City -> Guadalajara is roughly 461 km great-circle.
        let guadalajara = GeoPoint::new(20.6597, -103.3496);
        let km = haversine(ZOCALO, guadalajara) / 1000.0;
        assert!((455.0..468.0).contains(&km), "unexpected distance {km}");
    }

    #[test]
    fn one_degree_of_latitude_uses_mean_radius() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let expected = EARTH_RADIUS_METERS * 1f64.to_radians();
        assert!((haversine(a, b) - expected).abs() < 1e-6);
    }

    #[test]
    fn offset_north_produces_requested_distance() {
        for meters in [50.0, 100.0, 500.0] {
            let moved = offset_north(ZOCALO, meters);
            assert!((haversine(ZOCALO, moved) - meters).abs() < 0.01);
        }
    }

    #[test]
    fn validity_checks_ranges() {
        assert!(ZOCALO.is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
}
