//! Bounding-box to search-grid expansion.
//!
//! A job in `full` coverage mode is fanned out over a deterministic grid of
//! latitude/longitude points so one job can cover a whole metro area. Step
//! sizes derive from the search radius: one degree of latitude is ~111,320 m
//! everywhere, while a degree of longitude shrinks with the cosine of the
//! latitude.

use crate::models::BoundingBox;

/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Hard cap on grid size; larger boxes are truncated, not rejected.
pub const MAX_GRID_POINTS: usize = 100;

/// Minimum usable radius in meters. Smaller values would explode the grid.
const MIN_RADIUS_METERS: u32 = 100;

/// A single search point inside a bounding box.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GridPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Expand `bbox` into a row-major grid of points spaced `radius_meters`
/// apart, starting at `(min_lat, min_lon)` inclusive.
///
/// Deterministic: the same inputs always yield the same sequence. Output is
/// capped at [`MAX_GRID_POINTS`]; radii below 100 m are clamped to 100 m.
pub fn expand(bbox: &BoundingBox, radius_meters: u32) -> Vec<GridPoint> {
    let radius = radius_meters.max(MIN_RADIUS_METERS) as f64;

    let (center_lat, _) = bbox.center();
    let lat_step = radius / METERS_PER_DEGREE;
    let lon_step = radius / (METERS_PER_DEGREE * center_lat.to_radians().cos());

    let mut points = Vec::new();
    let mut lat = bbox.min_lat;
    'rows: while lat <= bbox.max_lat {
        let mut lon = bbox.min_lon;
        while lon <= bbox.max_lon {
            points.push(GridPoint { lat, lon });
            if points.len() >= MAX_GRID_POINTS {
                break 'rows;
            }
            lon += lon_step;
        }
        lat += lat_step;
    }
    points
}

/// Grid for a job config: a full-coverage job with a valid box expands it;
/// everything else degrades to the single configured center point (or 0,0
/// when no center was given, leaving the scraper to geocode by name).
pub fn plan(
    bbox: Option<&BoundingBox>,
    center: Option<(f64, f64)>,
    radius_meters: u32,
    full_coverage: bool,
) -> Vec<GridPoint> {
    match bbox {
        Some(b) if full_coverage && b.is_valid() => expand(b, radius_meters),
        _ => {
            let (lat, lon) = center.unwrap_or((0.0, 0.0));
            vec![GridPoint { lat, lon }]
        }
    }
}
