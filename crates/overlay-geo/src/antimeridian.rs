//! Re-joining geometry that was split at the antimeridian

use geo::{MultiPolygon, Polygon, Translate};

use crate::models::{multi_polygon_to_geometry, to_multi_polygon};
use crate::ops::union_all;
use overlay_core::models::Geometry;

const SEAM_EPSILON: f64 = 1e-9;

fn touches_western_seam(polygon: &Polygon<f64>) -> bool {
    polygon.exterior().coords().any(|c| c.x <= -180.0 + SEAM_EPSILON)
}

/// Union the halves of a multipolygon split at the antimeridian.
///
/// Parts touching -180 are shifted east by 360 before everything is unioned,
/// so a shape cut in two at the seam comes back as one contiguous polygon
/// with longitudes past 180.
pub fn union_at_antimeridian(mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if !mp.iter().any(touches_western_seam) {
        return union_all(std::iter::once(mp.clone()));
    }
    let shifted = mp.iter().map(|polygon| {
        let mut polygon = polygon.clone();
        if touches_western_seam(&polygon) {
            polygon.translate_mut(360.0, 0.0);
        }
        MultiPolygon::new(vec![polygon])
    });
    union_all(shifted)
}

/// [`union_at_antimeridian`] over a canonical geometry; other types are returned unchanged
pub fn union_geometry_at_antimeridian(geom: &Geometry) -> Geometry {
    match to_multi_polygon(geom) {
        Some(mp) => multi_polygon_to_geometry(&union_at_antimeridian(&mp)),
        None => geom.clone(),
    }
}
