//! Geodesic measurements on lon/lat geometry

use geo::{Distance, GeodesicArea, Haversine, LineString, MultiPolygon, Point, Polygon};

use crate::models::to_multi_polygon;
use overlay_core::models::Geometry;

pub const SQ_METERS_PER_SQ_KM: f64 = 1_000_000.0;

/// Unsigned geodesic area of a polygon in square meters
pub fn polygon_area_m2(polygon: &Polygon<f64>) -> f64 {
    polygon.geodesic_area_unsigned()
}

/// Unsigned geodesic area of a multipolygon in square meters
pub fn multi_polygon_area_m2(mp: &MultiPolygon<f64>) -> f64 {
    mp.iter().map(polygon_area_m2).sum()
}

/// Geodesic area of a canonical geometry in square meters, zero for non-polygonal input
pub fn geodesic_area_m2(geom: &Geometry) -> f64 {
    to_multi_polygon(geom).map_or(0.0, |mp| multi_polygon_area_m2(&mp))
}

/// Geodesic area in square kilometers
pub fn area_sq_km(geom: &Geometry) -> f64 {
    geodesic_area_m2(geom) / SQ_METERS_PER_SQ_KM
}

/// Haversine length of a geo line string in meters
pub fn line_string_length_m(line: &LineString<f64>) -> f64 {
    line.lines()
        .map(|segment| Haversine.distance(Point::from(segment.start), Point::from(segment.end)))
        .sum()
}

/// Haversine length of a linear geometry in kilometers, zero for other types
pub fn length_km(geom: &Geometry) -> f64 {
    let meters: f64 = match geom {
        Geometry::LineString { coordinates } => segments_length_m(coordinates),
        Geometry::MultiLineString { coordinates } => {
            coordinates.iter().map(|l| segments_length_m(l)).sum()
        }
        _ => 0.0,
    };
    meters / 1000.0
}

fn segments_length_m(coords: &[[f64; 2]]) -> f64 {
    coords
        .windows(2)
        .map(|w| Haversine.distance(Point::new(w[0][0], w[0][1]), Point::new(w[1][0], w[1][1])))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_square_at_equator() {
        let area = area_sq_km(&Geometry::rectangle(0.0, 0.0, 1.0, 1.0));
        // roughly 111.3 km on each side
        assert!(area > 12_000.0 && area < 12_500.0, "area was {area}");
    }

    #[test]
    fn test_non_polygonal_area_is_zero() {
        assert_eq!(geodesic_area_m2(&Geometry::point(1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_line_length() {
        let km = length_km(&Geometry::line_string(vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]));
        assert!((km - 222.39).abs() < 0.5, "length was {km}");
        assert_eq!(length_km(&Geometry::rectangle(0.0, 0.0, 1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_crossing_rings_keep_area() {
        let contiguous = area_sq_km(&Geometry::rectangle(179.0, -1.0, 181.0, 1.0));
        let split = area_sq_km(&Geometry::multi_polygon(vec![
            vec![vec![[179.0, -1.0], [180.0, -1.0], [180.0, 1.0], [179.0, 1.0], [179.0, -1.0]]],
            vec![vec![[-180.0, -1.0], [-179.0, -1.0], [-179.0, 1.0], [-180.0, 1.0], [-180.0, -1.0]]],
        ]));
        assert!((contiguous - split).abs() / split < 1e-6);
    }
}
