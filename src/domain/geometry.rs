//! Containment tests for circular and polygon regions
//!
//! Polygons are evaluated in a planar lon/lat projection, which is accurate
//! enough for the few-hundred-metre areas regions describe. Points on an edge
//! or vertex count as inside: the on-segment test runs first, then the
//! even-odd ray cast decides strict interior points.

use crate::domain::types::{Coordinate, Region, RegionGeometry};

/// Mean Earth radius in metres
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Tolerance in degrees for treating a point as lying on an edge (~0.1 mm)
const EDGE_EPSILON: f64 = 1e-9;

/// Great-circle distance between two coordinates in metres
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Whether `point` lies within `radius_m` of `center` (boundary inclusive)
pub fn circle_contains(center: Coordinate, radius_m: f64, point: Coordinate) -> bool {
    haversine_m(center, point) <= radius_m
}

/// Point-in-polygon with edges and vertices counted as inside
///
/// Returns false for degenerate polygons (fewer than 3 vertices).
pub fn polygon_contains(vertices: &[Coordinate], point: Coordinate) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let (px, py) = (point.lon, point.lat);
    let mut inside = false;
    let mut j = n - 1;

    for i in 0..n {
        let (xi, yi) = (vertices[i].lon, vertices[i].lat);
        let (xj, yj) = (vertices[j].lon, vertices[j].lat);

        if on_segment(xi, yi, xj, yj, px, py) {
            return true;
        }

        if (yi > py) != (yj > py) {
            let x_cross = xi + (py - yi) * (xj - xi) / (yj - yi);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

fn on_segment(x1: f64, y1: f64, x2: f64, y2: f64, px: f64, py: f64) -> bool {
    let cross = (px - x1) * (y2 - y1) - (py - y1) * (x2 - x1);
    let len = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
    if len == 0.0 {
        return (px - x1).abs() <= EDGE_EPSILON && (py - y1).abs() <= EDGE_EPSILON;
    }
    if cross.abs() / len > EDGE_EPSILON {
        return false;
    }
    px >= x1.min(x2) - EDGE_EPSILON
        && px <= x1.max(x2) + EDGE_EPSILON
        && py >= y1.min(y2) - EDGE_EPSILON
        && py <= y1.max(y2) + EDGE_EPSILON
}

/// Containment for any region geometry
pub fn region_contains(region: &Region, point: Coordinate) -> bool {
    match &region.geometry {
        RegionGeometry::Circle { center, radius_m } => circle_contains(*center, *radius_m, point),
        RegionGeometry::Polygon { vertices } => polygon_contains(vertices, point),
    }
}
