//! # Geofence
//!
//! The polygon the mower must stay within. A point closer to the boundary than the safety buffer
//! is treated as outside.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::Serialize;
use thiserror::Error;

use super::GeoPoint;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Geofence {
    polygon: Vec<GeoPoint>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum GeofenceError {
    #[error("A geofence needs at least 3 points, got {0}")]
    TooFewPoints(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Geofence {
    pub fn new(polygon: Vec<GeoPoint>) -> Result<Self, GeofenceError> {
        if polygon.len() < 3 {
            return Err(GeofenceError::TooFewPoints(polygon.len()));
        }
        Ok(Self { polygon })
    }

    pub fn polygon(&self) -> &[GeoPoint] {
        &self.polygon
    }

    /// Ray casting point in polygon test, using the half-open edge rule.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let n = self.polygon.len();
        let mut inside = false;

        for k in 0..n {
            let a = self.polygon[k];
            let b = self.polygon[(k + 1) % n];

            if (a.lat <= point.lat) != (b.lat <= point.lat) {
                let t = (point.lat - a.lat) / (b.lat - a.lat);
                let lon_cross = a.lon + t * (b.lon - a.lon);
                if point.lon < lon_cross {
                    inside = !inside;
                }
            }
        }

        inside
    }

    /// Distance from the point to the nearest boundary edge in meters.
    pub fn distance_to_edge_m(&self, point: &GeoPoint) -> f64 {
        let n = self.polygon.len();

        (0..n)
            .map(|k| {
                let (ax, ay) = point.enu_to(&self.polygon[k]);
                let (bx, by) = point.enu_to(&self.polygon[(k + 1) % n]);
                point_segment_distance(Vector2::new(ax, ay), Vector2::new(bx, by))
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// True if the point is inside the fence and at least `buffer_m` from its boundary.
    pub fn is_safely_inside(&self, point: &GeoPoint, buffer_m: f64) -> bool {
        self.contains(point) && self.distance_to_edge_m(point) >= buffer_m
    }

    /// How far the point is past the safe boundary, 0 if it is safely inside.
    ///
    /// Inside points within the buffer give `buffer - distance`, outside points give `buffer +
    /// distance`.
    pub fn violation_m(&self, point: &GeoPoint, buffer_m: f64) -> f64 {
        let d = self.distance_to_edge_m(point);
        if self.contains(point) {
            (buffer_m - d).max(0.0)
        } else {
            buffer_m + d
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Distance from the origin to the segment `a`-`b`.
fn point_segment_distance(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();

    if len_sq == 0.0 {
        return a.norm();
    }

    let t = (-a.dot(&ab) / len_sq).clamp(0.0, 1.0);
    (a + ab * t).norm()
}
