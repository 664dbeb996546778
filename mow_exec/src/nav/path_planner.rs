//! # Path planner
//!
//! Coverage and return path planning.
//!
//! Coverage paths are serpentine (boustrophedon): the area is cut by horizontal scanlines
//! `spacing_m` apart, each scanline is intersected with the boundary polygon to find the inside
//! intervals, exclusion zones are subtracted from those intervals, and consecutive rows are driven
//! in opposite directions. Only axis aligned scanning is supported, any other angle gives an empty
//! path.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, warn};
use thiserror::Error;
use util::maths::METERS_PER_DEG_LAT;

use super::GeoPoint;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Tolerance within which interval ends are considered touching, in degrees.
const MERGE_TOLERANCE: f64 = 1e-12;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct PathPlanner;

/// A closed longitude interval on one scanline.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Interval {
    start: f64,
    end: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("Path point separation must be positive, got {0}")]
    InvalidSeparation(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PathPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan a serpentine coverage path over `boundary` avoiding `exclusions`.
    ///
    /// Returns an empty path for a non-zero `angle_deg`, a degenerate boundary or a non-positive
    /// spacing.
    pub fn plan_coverage(
        &self,
        boundary: &[GeoPoint],
        exclusions: &[Vec<GeoPoint>],
        spacing_m: f64,
        angle_deg: f64,
    ) -> Vec<GeoPoint> {
        if angle_deg != 0.0 {
            warn!(
                "Coverage planning only supports axis aligned scanning, {} deg requested",
                angle_deg
            );
            return Vec::new();
        }
        if boundary.len() < 3 || !(spacing_m > 0.0) {
            warn!("Cannot plan coverage over a degenerate boundary or spacing");
            return Vec::new();
        }

        let step_deg = spacing_m / METERS_PER_DEG_LAT;

        let (lat_min, lat_max) = boundary
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.lat), hi.max(p.lat))
            });

        let mut path = Vec::new();
        let mut row = 0usize;
        let mut i = 0usize;

        loop {
            // Index based so the rows do not accumulate rounding error
            let lat = lat_min + i as f64 * step_deg;
            if lat > lat_max {
                break;
            }
            i += 1;

            let mut intervals = scanline_intervals(boundary, lat);
            for zone in exclusions {
                let cuts = scanline_intervals(zone, lat);
                intervals = subtract(&intervals, &cuts);
            }

            if intervals.is_empty() {
                continue;
            }

            if row % 2 == 0 {
                for iv in &intervals {
                    path.push(GeoPoint::new(lat, iv.start));
                    path.push(GeoPoint::new(lat, iv.end));
                }
            } else {
                for iv in intervals.iter().rev() {
                    path.push(GeoPoint::new(lat, iv.end));
                    path.push(GeoPoint::new(lat, iv.start));
                }
            }
            row += 1;
        }

        debug!("Coverage path planned: {} rows, {} points", row, path.len());
        path
    }

    /// Plan a straight path from `from` to `home` with points at most `separation_m` apart.
    ///
    /// The starting point is not included, the last point is `home`.
    pub fn plan_return_path(
        &self,
        from: GeoPoint,
        home: GeoPoint,
        separation_m: f64,
    ) -> Result<Vec<GeoPoint>, PlanError> {
        if !(separation_m > 0.0) {
            return Err(PlanError::InvalidSeparation(separation_m));
        }

        let distance_m = from.distance_m(&home);
        let bearing_deg = from.bearing_deg(&home);

        // Number of whole steps strictly before home
        let steps = (distance_m / separation_m).ceil() as usize;

        let mut path: Vec<GeoPoint> = (1..steps)
            .map(|k| from.destination(bearing_deg, k as f64 * separation_m))
            .collect();
        path.push(home);

        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Inside intervals of a polygon on the scanline at `lat`.
///
/// Uses the half-open rule `min_lat <= lat < max_lat` per edge, so a vertex shared by two edges is
/// only counted once and horizontal edges never count.
fn scanline_intervals(polygon: &[GeoPoint], lat: f64) -> Vec<Interval> {
    let n = polygon.len();
    if n < 3 {
        return Vec::new();
    }

    let mut crossings: Vec<f64> = Vec::new();
    for k in 0..n {
        let a = polygon[k];
        let b = polygon[(k + 1) % n];

        let (lo, hi) = if a.lat <= b.lat { (a.lat, b.lat) } else { (b.lat, a.lat) };
        if lo <= lat && lat < hi {
            let t = (lat - a.lat) / (b.lat - a.lat);
            crossings.push(a.lon + t * (b.lon - a.lon));
        }
    }

    crossings.sort_by(|x, y| x.total_cmp(y));

    crossings
        .chunks_exact(2)
        .map(|c| Interval {
            start: c[0],
            end: c[1],
        })
        .collect()
}

/// Subtract `cuts` from `intervals`, merging pieces whose ends touch.
fn subtract(intervals: &[Interval], cuts: &[Interval]) -> Vec<Interval> {
    let mut pieces: Vec<Interval> = intervals.to_vec();

    for cut in cuts {
        let mut next = Vec::with_capacity(pieces.len() + 1);
        for iv in pieces {
            // No overlap
            if cut.end <= iv.start || cut.start >= iv.end {
                next.push(iv);
                continue;
            }
            if cut.start > iv.start {
                next.push(Interval {
                    start: iv.start,
                    end: cut.start,
                });
            }
            if cut.end < iv.end {
                next.push(Interval {
                    start: cut.end,
                    end: iv.end,
                });
            }
        }
        pieces = next;
    }

    pieces.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Interval> = Vec::with_capacity(pieces.len());
    for iv in pieces {
        if iv.end - iv.start <= MERGE_TOLERANCE {
            continue;
        }
        match merged.last_mut() {
            Some(last) if iv.start - last.end <= MERGE_TOLERANCE => {
                last.end = last.end.max(iv.end);
            }
            _ => merged.push(iv),
        }
    }

    merged
}

#[cfg(test)]
mod test {
    use super::*;

    fn rectangle(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(lat0, lon0),
            GeoPoint::new(lat0, lon1),
            GeoPoint::new(lat1, lon1),
            GeoPoint::new(lat1, lon0),
        ]
    }

    fn rows(path: &[GeoPoint]) -> Vec<f64> {
        let mut lats: Vec<f64> = path.iter().map(|p| p.lat).collect();
        lats.dedup();
        lats
    }

    #[test]
    fn test_rectangle_serpentine() {
        let spacing_m = 1.0;
        let step = spacing_m / METERS_PER_DEG_LAT;
        let height = 20.0 * step;
        let boundary = rectangle(51.0, -1.0, 51.0 + height, -0.9997);

        let path = PathPlanner::new().plan_coverage(&boundary, &[], spacing_m, 0.0);
        assert!(!path.is_empty());

        let row_lats = rows(&path);
        let expected = height / step;
        assert!((row_lats.len() as f64 - expected).abs() <= 1.0);

        // Direction alternates every row
        for (r, pair) in path.chunks(2).enumerate() {
            if r % 2 == 0 {
                assert!(pair[0].lon < pair[1].lon);
            } else {
                assert!(pair[0].lon > pair[1].lon);
            }
        }
    }

    #[test]
    fn test_angle_not_supported() {
        let boundary = rectangle(51.0, -1.0, 51.001, -0.999);
        assert!(PathPlanner::new()
            .plan_coverage(&boundary, &[], 1.0, 15.0)
            .is_empty());
    }

    #[test]
    fn test_exclusion_splits_rows() {
        let boundary = rectangle(0.0, 0.0, 0.0001, 0.001);
        let hole = rectangle(-0.1, 0.0004, 0.1, 0.0006);

        let path = PathPlanner::new().plan_coverage(&boundary, &[hole], 1.0, 0.0);

        // Two intervals per row, four points
        let first_row: Vec<&GeoPoint> = path.iter().filter(|p| p.lat == 0.0).collect();
        assert_eq!(first_row.len(), 4);
        assert!(path
            .iter()
            .all(|p| p.lon <= 0.0004 + 1e-12 || p.lon >= 0.0006 - 1e-12));
    }

    #[test]
    fn test_subtract_merges_touching() {
        let intervals = [
            Interval { start: 0.0, end: 1.0 },
            Interval { start: 1.0, end: 2.0 },
        ];
        assert_eq!(
            subtract(&intervals, &[]),
            vec![Interval { start: 0.0, end: 2.0 }]
        );

        assert_eq!(
            subtract(&intervals, &[Interval { start: 0.5, end: 1.5 }]),
            vec![
                Interval { start: 0.0, end: 0.5 },
                Interval { start: 1.5, end: 2.0 }
            ]
        );

        assert!(subtract(&intervals, &[Interval { start: -1.0, end: 3.0 }]).is_empty());
    }

    #[test]
    fn test_half_open_vertex() {
        // Diamond: the scanline through the side vertices must give one interval, not two
        let diamond = vec![
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 2.0),
            GeoPoint::new(2.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ];
        assert_eq!(
            scanline_intervals(&diamond, 1.0),
            vec![Interval { start: 0.0, end: 2.0 }]
        );
        assert!(scanline_intervals(&diamond, 2.0).is_empty());
    }

    #[test]
    fn test_return_path() -> Result<(), PlanError> {
        let planner = PathPlanner::new();
        let from = GeoPoint::new(52.0, 4.0);
        let home = from.offset(0.0, 9.0);

        let path = planner.plan_return_path(from, home, 2.0)?;
        assert_eq!(path.len(), 5);
        assert_eq!(path.last(), Some(&home));
        assert!((from.distance_m(&path[0]) - 2.0).abs() < 1e-6);

        // Closer than one separation goes straight home
        assert_eq!(planner.plan_return_path(from, home, 20.0)?, vec![home]);

        assert_eq!(
            planner.plan_return_path(from, home, 0.0),
            Err(PlanError::InvalidSeparation(0.0))
        );
        Ok(())
    }
}
