//! Utility maths functions, including the spherical geodesy used by navigation.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Mean earth radius of the WGS84 sphere used for all distance calculations.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Approximate length of one degree of latitude in meters.
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

// ---------------------------------------------------------------------------
// GENERIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap an angle in degrees into the range [-180, 180).
pub fn wrap_deg_180<T>(angle_deg: T) -> T
where
    T: Float,
{
    let half = T::from(180.0).unwrap_or_else(T::zero);
    let full = half + half;

    rem_euclid(angle_deg + half, full) - half
}

/// Wrap an angle in degrees into the range [0, 360).
pub fn wrap_deg_360<T>(angle_deg: T) -> T
where
    T: Float,
{
    rem_euclid(angle_deg, T::from(360.0).unwrap_or_else(T::zero))
}

/// Get the signed angular distance in degrees to turn from heading `from` to heading `to`.
///
/// Positive values are a clockwise (right) turn, the result is in [-180, 180).
pub fn heading_error_deg<T>(from: T, to: T) -> T
where
    T: Float,
{
    wrap_deg_180(to - from)
}

// ---------------------------------------------------------------------------
// GEODESY
// ---------------------------------------------------------------------------

/// Great circle distance in meters between two (latitude, longitude) points in degrees, using
/// the haversine formula.
pub fn haversine_distance_m(lat_0: f64, lon_0: f64, lat_1: f64, lon_1: f64) -> f64 {
    let phi_0 = lat_0.to_radians();
    let phi_1 = lat_1.to_radians();
    let d_phi = (lat_1 - lat_0).to_radians();
    let d_lambda = (lon_1 - lon_0).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi_0.cos() * phi_1.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial great circle bearing in degrees [0, 360) from the first point towards the second.
///
/// 0 is north, 90 is east.
pub fn initial_bearing_deg(lat_0: f64, lon_0: f64, lat_1: f64, lon_1: f64) -> f64 {
    let phi_0 = lat_0.to_radians();
    let phi_1 = lat_1.to_radians();
    let d_lambda = (lon_1 - lon_0).to_radians();

    let y = d_lambda.sin() * phi_1.cos();
    let x = phi_0.cos() * phi_1.sin() - phi_0.sin() * phi_1.cos() * d_lambda.cos();

    wrap_deg_360(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance_m` from the start along the given initial bearing.
///
/// Returns `(latitude, longitude)` in degrees.
pub fn destination_point(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi_0 = lat.to_radians();
    let lambda_0 = lon.to_radians();

    let phi_1 = (phi_0.sin() * delta.cos() + phi_0.cos() * delta.sin() * theta.cos()).asin();
    let lambda_1 = lambda_0
        + (theta.sin() * delta.sin() * phi_0.cos()).atan2(delta.cos() - phi_0.sin() * phi_1.sin());

    (phi_1.to_degrees(), wrap_deg_180(lambda_1.to_degrees()))
}

/// Apply a local east/north offset in meters to a point.
///
/// Returns `(latitude, longitude)` in degrees.
pub fn offset_by_enu(lat: f64, lon: f64, east_m: f64, north_m: f64) -> (f64, f64) {
    let distance_m = east_m.hypot(north_m);
    if distance_m == 0.0 {
        return (lat, lon);
    }

    // atan2(east, north) gives the compass bearing of the offset
    let bearing_deg = east_m.atan2(north_m).to_degrees();
    destination_point(lat, lon, bearing_deg, distance_m)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_deg() {
        assert_eq!(wrap_deg_180(190.0f64), -170.0);
        assert_eq!(wrap_deg_180(-190.0f64), 170.0);
        assert_eq!(wrap_deg_180(180.0f64), -180.0);
        assert_eq!(wrap_deg_360(-90.0f64), 270.0);
        assert_eq!(wrap_deg_360(720.0f64), 0.0);
    }

    #[test]
    fn test_heading_error_deg() {
        assert_eq!(heading_error_deg(10.0f64, 20.0), 10.0);
        assert_eq!(heading_error_deg(20.0f64, 10.0), -10.0);
        assert_eq!(heading_error_deg(350.0f64, 10.0), 20.0);
        assert_eq!(heading_error_deg(10.0f64, 350.0), -20.0);
    }

    #[test]
    fn test_haversine() {
        // One degree of latitude on the 6371 km sphere
        let d = haversine_distance_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.9).abs() < 1.0);

        assert_eq!(haversine_distance_m(51.5, -0.1, 51.5, -0.1), 0.0);
    }

    #[test]
    fn test_bearing() {
        assert!((initial_bearing_deg(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((initial_bearing_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        assert!((initial_bearing_deg(0.0, 0.0, -1.0, 0.0) - 180.0).abs() < 1e-9);
        assert!((initial_bearing_deg(0.0, 0.0, 0.0, -1.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_destination_inverts_distance() {
        let (lat, lon) = destination_point(52.0, 4.0, 45.0, 100.0);
        let d = haversine_distance_m(52.0, 4.0, lat, lon);
        assert!((d - 100.0).abs() < 1e-6);
        assert!((initial_bearing_deg(52.0, 4.0, lat, lon) - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_offset_by_enu() {
        let (lat, lon) = offset_by_enu(52.0, 4.0, 0.0, 10.0);
        assert!(lat > 52.0);
        assert!((lon - 4.0).abs() < 1e-12);
        assert!((haversine_distance_m(52.0, 4.0, lat, lon) - 10.0).abs() < 1e-6);
    }
}
