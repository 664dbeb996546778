//! # Geographic points
//!
//! Positions used by navigation, expressed as WGS84 latitude/longitude in degrees. Distances and
//! bearings use the spherical formulas in [`util::maths`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use util::maths;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great circle distance to another point in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        maths::haversine_distance_m(self.lat, self.lon, other.lat, other.lon)
    }

    /// Initial bearing towards another point, degrees clockwise from north in [0, 360).
    pub fn bearing_deg(&self, other: &GeoPoint) -> f64 {
        maths::initial_bearing_deg(self.lat, self.lon, other.lat, other.lon)
    }

    /// Point reached by moving along a bearing.
    pub fn destination(&self, bearing_deg: f64, distance_m: f64) -> GeoPoint {
        let (lat, lon) = maths::destination_point(self.lat, self.lon, bearing_deg, distance_m);
        GeoPoint { lat, lon }
    }

    /// Point offset by a local east/north displacement in meters.
    pub fn offset(&self, east_m: f64, north_m: f64) -> GeoPoint {
        let (lat, lon) = maths::offset_by_enu(self.lat, self.lon, east_m, north_m);
        GeoPoint { lat, lon }
    }

    /// Local east/north coordinates of `other` relative to this point, in meters.
    ///
    /// Uses an equirectangular approximation, valid over the size of a garden.
    pub fn enu_to(&self, other: &GeoPoint) -> (f64, f64) {
        let north = (other.lat - self.lat).to_radians() * maths::EARTH_RADIUS_M;
        let east = (other.lon - self.lon).to_radians()
            * maths::EARTH_RADIUS_M
            * self.lat.to_radians().cos();
        (east, north)
    }
}

impl From<(f64, f64)> for GeoPoint {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_enu_matches_offset() {
        let origin = GeoPoint::new(52.0, 4.0);
        let p = origin.offset(3.0, -4.0);

        let (e, n) = origin.enu_to(&p);
        assert!((e - 3.0).abs() < 1e-3);
        assert!((n + 4.0).abs() < 1e-3);
        assert!((origin.distance_m(&p) - 5.0).abs() < 1e-6);
    }
}
