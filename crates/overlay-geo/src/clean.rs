//! Coordinate cleaning applied to clipping output before it is compared or
//! fed back into another boolean operation.

use crate::bbox::{normalize_latitude, normalize_longitude};
use overlay_core::models::Geometry;

fn clean_coord(c: &[f64; 2]) -> [f64; 2] {
    [normalize_longitude(c[0]), normalize_latitude(c[1])]
}

/// Wrap every coordinate of a line or ring and drop consecutive repeats.
///
/// The closing coordinate of a ring is kept because it differs from its
/// predecessor whenever the ring has more than one distinct vertex.
fn clean_line(line: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut cleaned: Vec<[f64; 2]> = Vec::with_capacity(line.len());
    for c in line {
        let c = clean_coord(c);
        if cleaned.last() != Some(&c) {
            cleaned.push(c);
        }
    }
    cleaned
}

/// Return a copy of `geom` with coordinates inside world bounds.
///
/// Points are returned untouched, multipoints lose duplicate members, and
/// every line or ring is wrapped and stripped of repeated vertices.
pub fn clean_coords(geom: &Geometry) -> Geometry {
    match geom {
        Geometry::Point { .. } => geom.clone(),
        Geometry::MultiPoint { coordinates } => {
            let mut seen: Vec<[f64; 2]> = Vec::with_capacity(coordinates.len());
            for c in coordinates {
                if !seen.contains(c) {
                    seen.push(*c);
                }
            }
            Geometry::MultiPoint { coordinates: seen }
        }
        Geometry::LineString { coordinates } => Geometry::LineString {
            coordinates: clean_line(coordinates),
        },
        Geometry::MultiLineString { coordinates } => Geometry::MultiLineString {
            coordinates: coordinates.iter().map(|l| clean_line(l)).collect(),
        },
        Geometry::Polygon { coordinates } => Geometry::Polygon {
            coordinates: coordinates.iter().map(|r| clean_line(r)).collect(),
        },
        Geometry::MultiPolygon { coordinates } => Geometry::MultiPolygon {
            coordinates: coordinates
                .iter()
                .map(|p| p.iter().map(|r| clean_line(r)).collect())
                .collect(),
        },
    }
}
