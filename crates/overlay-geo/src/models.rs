//! Conversions between the canonical geometry model and the `geo` crate.

use geo::{Coord, Geometry as GeoGeometry, LineString, MultiPolygon, Polygon};

pub use overlay_core::models::{BBox, Envelope, Geometry, GeometryType};

fn ring_to_line_string(ring: &[[f64; 2]]) -> LineString<f64> {
    LineString::new(ring.iter().map(|c| Coord { x: c[0], y: c[1] }).collect())
}

fn rings_to_polygon(rings: &[Vec<[f64; 2]>]) -> Polygon<f64> {
    match rings.split_first() {
        Some((exterior, interiors)) => Polygon::new(
            ring_to_line_string(exterior),
            interiors.iter().map(|r| ring_to_line_string(r)).collect(),
        ),
        None => Polygon::new(LineString::new(vec![]), vec![]),
    }
}

fn line_string_coords(ls: &LineString<f64>) -> Vec<[f64; 2]> {
    ls.coords().map(|c| [c.x, c.y]).collect()
}

/// Rings of a polygon, exterior first
pub fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(line_string_coords)
        .collect()
}

/// Convert a canonical Geometry to a geo::Geometry
pub fn to_geo_geometry(geom: &Geometry) -> GeoGeometry<f64> {
    match geom {
        Geometry::Point { coordinates } => {
            GeoGeometry::Point(geo::Point::new(coordinates[0], coordinates[1]))
        }
        Geometry::MultiPoint { coordinates } => GeoGeometry::MultiPoint(geo::MultiPoint::new(
            coordinates.iter().map(|c| geo::Point::new(c[0], c[1])).collect(),
        )),
        Geometry::LineString { coordinates } => {
            GeoGeometry::LineString(ring_to_line_string(coordinates))
        }
        Geometry::MultiLineString { coordinates } => GeoGeometry::MultiLineString(
            geo::MultiLineString::new(coordinates.iter().map(|l| ring_to_line_string(l)).collect()),
        ),
        Geometry::Polygon { coordinates } => GeoGeometry::Polygon(rings_to_polygon(coordinates)),
        Geometry::MultiPolygon { coordinates } => GeoGeometry::MultiPolygon(MultiPolygon::new(
            coordinates.iter().map(|p| rings_to_polygon(p)).collect(),
        )),
    }
}

/// Convert a geo::Geometry to a canonical Geometry.
///
/// Collections are not part of the canonical model and are rejected.
pub fn from_geo_geometry(geom: &GeoGeometry<f64>) -> Option<Geometry> {
    Some(match geom {
        GeoGeometry::Point(p) => Geometry::point(p.x(), p.y()),
        GeoGeometry::Line(l) => {
            Geometry::line_string(vec![[l.start.x, l.start.y], [l.end.x, l.end.y]])
        }
        GeoGeometry::LineString(ls) => Geometry::line_string(line_string_coords(ls)),
        GeoGeometry::Polygon(p) => Geometry::polygon(polygon_rings(p)),
        GeoGeometry::MultiPoint(mp) => Geometry::MultiPoint {
            coordinates: mp.iter().map(|p| [p.x(), p.y()]).collect(),
        },
        GeoGeometry::MultiLineString(mls) => Geometry::MultiLineString {
            coordinates: mls.iter().map(line_string_coords).collect(),
        },
        GeoGeometry::MultiPolygon(mp) => multi_polygon_to_geometry(mp),
        GeoGeometry::Rect(r) => Geometry::polygon(polygon_rings(&r.to_polygon())),
        GeoGeometry::Triangle(t) => Geometry::polygon(polygon_rings(&t.to_polygon())),
        GeoGeometry::GeometryCollection(_) => return None,
    })
}

/// Polygonal geometry as a geo MultiPolygon, `None` for other types
pub fn to_multi_polygon(geom: &Geometry) -> Option<MultiPolygon<f64>> {
    match geom {
        Geometry::Polygon { coordinates } => Some(MultiPolygon::new(vec![rings_to_polygon(coordinates)])),
        Geometry::MultiPolygon { coordinates } => Some(MultiPolygon::new(
            coordinates.iter().map(|p| rings_to_polygon(p)).collect(),
        )),
        _ => None,
    }
}

/// Always produces a `MultiPolygon` geometry, even for a single part
pub fn multi_polygon_to_geometry(mp: &MultiPolygon<f64>) -> Geometry {
    Geometry::multi_polygon(mp.iter().map(polygon_rings).collect())
}

pub fn polygon_to_geometry(polygon: &Polygon<f64>) -> Geometry {
    Geometry::polygon(polygon_rings(polygon))
}

/// Convert a single-part canonical polygon
pub fn to_polygon(geom: &Geometry) -> Option<Polygon<f64>> {
    match geom {
        Geometry::Polygon { coordinates } => Some(rings_to_polygon(coordinates)),
        _ => None,
    }
}

/// Bounding box of a geo MultiPolygon
pub fn multi_polygon_bbox(mp: &MultiPolygon<f64>) -> Option<BBox> {
    use geo::BoundingRect;
    mp.bounding_rect().map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
}

pub fn polygon_bbox(polygon: &Polygon<f64>) -> Option<BBox> {
    use geo::BoundingRect;
    polygon.bounding_rect().map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
}

/// Extension trait for Geometry with geo-crate operations
pub trait GeometryExt {
    /// Convert to geo::Geometry
    fn to_geo(&self) -> GeoGeometry<f64>;

    /// Polygon parts as a geo MultiPolygon
    fn to_geo_multi_polygon(&self) -> Option<MultiPolygon<f64>>;
}

impl GeometryExt for Geometry {
    fn to_geo(&self) -> GeoGeometry<f64> {
        to_geo_geometry(self)
    }

    fn to_geo_multi_polygon(&self) -> Option<MultiPolygon<f64>> {
        to_multi_polygon(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_conversion() {
        let geom = Geometry::point(178.5, -17.9);
        let back = from_geo_geometry(&to_geo_geometry(&geom)).unwrap();
        assert_eq!(back, geom);
    }

    #[test]
    fn test_polygon_with_hole_conversion() {
        let geom = Geometry::polygon(vec![
            vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]],
            vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 1.0]],
        ]);
        let polygon = to_polygon(&geom).unwrap();
        assert_eq!(polygon.interiors().len(), 1);
        assert_eq!(polygon_to_geometry(&polygon), geom);
    }

    #[test]
    fn test_polygon_to_multi_polygon() {
        let geom = Geometry::rectangle(0.0, 0.0, 1.0, 1.0);
        let mp = to_multi_polygon(&geom).unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(multi_polygon_to_geometry(&mp).geometry_type(), GeometryType::MultiPolygon);
        assert_eq!(multi_polygon_bbox(&mp), Some([0.0, 0.0, 1.0, 1.0]));
        assert!(to_multi_polygon(&Geometry::point(0.0, 0.0)).is_none());
    }
}
