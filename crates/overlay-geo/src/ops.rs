//! Thin helpers over `geo` boolean operations on polygon sets

use geo::{Area, BooleanOps, MultiPolygon, Polygon};

/// Planar area below which a boolean result is treated as empty
pub const EMPTY_AREA_EPSILON: f64 = 1e-10;

/// Union of many multipolygons
pub fn union_all<I>(shapes: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = MultiPolygon<f64>>,
{
    shapes
        .into_iter()
        .reduce(|a, b| a.union(&b))
        .unwrap_or_else(|| MultiPolygon::new(vec![]))
}

/// Union of single polygons
pub fn union_polygons<'a, I>(polygons: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = &'a Polygon<f64>>,
{
    union_all(polygons.into_iter().map(|p| MultiPolygon::new(vec![p.clone()])))
}

/// Drop parts with no planar area
pub fn drop_slivers(mp: MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        mp.0.into_iter()
            .filter(|p| p.unsigned_area() > EMPTY_AREA_EPSILON)
            .collect(),
    )
}

/// True when the multipolygon has no meaningful area
pub fn is_effectively_empty(mp: &MultiPolygon<f64>) -> bool {
    mp.0.is_empty() || mp.unsigned_area() <= EMPTY_AREA_EPSILON
}

/// Intersection of two polygons with slivers removed
pub fn polygon_intersection(a: &Polygon<f64>, b: &Polygon<f64>) -> MultiPolygon<f64> {
    drop_slivers(a.intersection(b))
}

/// Difference `a - b` with slivers removed
pub fn polygon_difference(a: &Polygon<f64>, b: &Polygon<f64>) -> MultiPolygon<f64> {
    drop_slivers(a.difference(b))
}

/// True when two polygons share a positive planar area
pub fn polygons_overlap(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    a.intersection(b).unsigned_area() > EMPTY_AREA_EPSILON
}
