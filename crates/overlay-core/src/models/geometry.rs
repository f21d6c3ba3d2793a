//! Closed geometry variant shared by every crate in the workspace.
//!
//! Coordinates are longitude/latitude degrees. Longitudes are allowed to leave
//! [-180, 180] so that a ring crossing the antimeridian stays contiguous; they
//! are only wrapped back at explicit cleaning boundaries.

use serde::{Deserialize, Serialize};

use super::envelope::BBox;

/// Geometry type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::LineString => "LineString",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPolygon => "MultiPolygon",
        }
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GeoJSON-compatible geometry representation
///
/// Serializes with a `type` tag exactly like a GeoJSON geometry object, so
/// reference features and sketches can be read straight from GeoJSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: [f64; 2],
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl Geometry {
    /// Create a Point geometry
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point { coordinates: [x, y] }
    }

    /// Create a LineString geometry
    pub fn line_string(coords: Vec<[f64; 2]>) -> Self {
        Geometry::LineString { coordinates: coords }
    }

    /// Create a Polygon geometry
    pub fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Geometry::Polygon { coordinates: rings }
    }

    /// Create a MultiPolygon geometry
    pub fn multi_polygon(polygons: Vec<Vec<Vec<[f64; 2]>>>) -> Self {
        Geometry::MultiPolygon { coordinates: polygons }
    }

    /// Axis-aligned rectangle as a closed polygon
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Geometry::polygon(vec![vec![
            [min_x, min_y],
            [max_x, min_y],
            [max_x, max_y],
            [min_x, max_y],
            [min_x, min_y],
        ]])
    }

    /// Get the geometry type
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point { .. } => GeometryType::Point,
            Geometry::MultiPoint { .. } => GeometryType::MultiPoint,
            Geometry::LineString { .. } => GeometryType::LineString,
            Geometry::MultiLineString { .. } => GeometryType::MultiLineString,
            Geometry::Polygon { .. } => GeometryType::Polygon,
            Geometry::MultiPolygon { .. } => GeometryType::MultiPolygon,
        }
    }

    pub fn is_polygonal(&self) -> bool {
        matches!(self, Geometry::Polygon { .. } | Geometry::MultiPolygon { .. })
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Geometry::LineString { .. } | Geometry::MultiLineString { .. })
    }

    pub fn is_puntal(&self) -> bool {
        matches!(self, Geometry::Point { .. } | Geometry::MultiPoint { .. })
    }

    /// Polygon parts as a multipolygon coordinate array, `None` for non-polygonal geometry
    pub fn polygon_parts(&self) -> Option<Vec<Vec<Vec<[f64; 2]>>>> {
        match self {
            Geometry::Polygon { coordinates } => Some(vec![coordinates.clone()]),
            Geometry::MultiPolygon { coordinates } => Some(coordinates.clone()),
            _ => None,
        }
    }

    /// Iterate over every coordinate, rings and parts included
    pub fn coords(&self) -> Box<dyn Iterator<Item = &[f64; 2]> + '_> {
        match self {
            Geometry::Point { coordinates } => Box::new(std::iter::once(coordinates)),
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                Box::new(coordinates.iter())
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                Box::new(coordinates.iter().flatten())
            }
            Geometry::MultiPolygon { coordinates } => {
                Box::new(coordinates.iter().flatten().flatten())
            }
        }
    }

    /// Number of stored vertices
    pub fn vertex_count(&self) -> usize {
        self.coords().count()
    }

    /// Bounding box `[min_x, min_y, max_x, max_y]`, `None` when the geometry has no coordinates
    pub fn bbox(&self) -> Option<BBox> {
        let mut iter = self.coords();
        let first = iter.next()?;
        let mut bbox = [first[0], first[1], first[0], first[1]];
        for c in iter {
            bbox[0] = bbox[0].min(c[0]);
            bbox[1] = bbox[1].min(c[1]);
            bbox[2] = bbox[2].max(c[0]);
            bbox[3] = bbox[3].max(c[1]);
        }
        Some(bbox)
    }

    /// Try to parse from a serde_json::Value (GeoJSON)
    pub fn from_geojson(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Convert to serde_json::Value (GeoJSON)
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geojson_round_trip_shape() {
        let json = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        });
        let geom = Geometry::from_geojson(&json).unwrap();
        assert_eq!(geom.geometry_type(), GeometryType::Polygon);
        assert_eq!(geom.to_geojson()["type"], "Polygon");
    }

    #[test]
    fn test_bbox_and_vertex_count() {
        let geom = Geometry::multi_polygon(vec![
            vec![vec![[0.0, 0.0], [2.0, 0.0], [2.0, 1.0], [0.0, 0.0]]],
            vec![vec![[5.0, -3.0], [6.0, -3.0], [6.0, -1.0], [5.0, -3.0]]],
        ]);
        assert_eq!(geom.bbox(), Some([0.0, -3.0, 6.0, 1.0]));
        assert_eq!(geom.vertex_count(), 8);
    }

    #[test]
    fn test_empty_geometry_has_no_bbox() {
        let geom = Geometry::line_string(vec![]);
        assert_eq!(geom.bbox(), None);
    }

    #[test]
    fn test_rectangle_is_closed() {
        let rect = Geometry::rectangle(0.0, 0.0, 2.0, 3.0);
        if let Geometry::Polygon { coordinates } = &rect {
            assert_eq!(coordinates[0].first(), coordinates[0].last());
        } else {
            panic!("expected polygon");
        }
        assert!(rect.is_polygonal());
        assert!(!rect.is_linear());
    }
}
