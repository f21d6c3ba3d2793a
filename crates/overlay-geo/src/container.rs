//! Inside/outside/mixed classification against a fixed subject polygon.
//!
//! The subject's boundary segments are bulk loaded into an R-tree once.
//! Classifying a candidate first rejects on bounding boxes, then tests every
//! candidate edge against the nearby subject edges. Only when no edge touches
//! the subject boundary is a point-in-polygon test run, on one vertex per
//! candidate part, since a candidate that crosses no boundary lies entirely
//! on one side of it.

use geo::algorithm::coordinate_position::{CoordPos, CoordinatePosition};
use geo::algorithm::line_intersection::line_intersection;
use geo::{Coord, Line, LineString, MultiPolygon, Polygon};
use rstar::{RTree, RTreeObject, AABB};

use crate::bbox::{bbox_contains, bbox_intersects};
use crate::models::{multi_polygon_bbox, to_multi_polygon};
use overlay_core::models::{BBox, Geometry};

/// Samples taken when checking whether a candidate swallows the subject
const CONTAINER_SAMPLES: usize = 5;
const CANDIDATE_SAMPLES: usize = 5;
const HOLE_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Entirely within the subject
    Inside,
    /// No shared area with the subject
    Outside,
    /// Crosses or touches the subject boundary
    Mixed,
}

/// One boundary segment of the subject
#[derive(Debug, Clone, Copy, PartialEq)]
struct BoundarySegment {
    line: Line<f64>,
}

impl RTreeObject for BoundarySegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.line.start.x, self.line.start.y],
            [self.line.end.x, self.line.end.y],
        )
    }
}

#[derive(Debug, Clone)]
struct Hole {
    polygon: Polygon<f64>,
    bbox: BBox,
}

/// Classifier bound to one subject polygon
#[derive(Debug, Clone)]
pub struct ContainerIndex {
    container: MultiPolygon<f64>,
    bbox: Option<BBox>,
    holes: Vec<Hole>,
    segments: RTree<BoundarySegment>,
}

fn closed_ring(ring: &LineString<f64>) -> LineString<f64> {
    let mut ring = ring.clone();
    ring.close();
    ring
}

fn ring_bbox(ring: &LineString<f64>) -> Option<BBox> {
    let mut coords = ring.coords();
    let first = coords.next()?;
    let mut bbox = [first.x, first.y, first.x, first.y];
    for c in coords {
        bbox[0] = bbox[0].min(c.x);
        bbox[1] = bbox[1].min(c.y);
        bbox[2] = bbox[2].max(c.x);
        bbox[3] = bbox[3].max(c.y);
    }
    Some(bbox)
}

fn point_in_bbox(c: &Coord<f64>, bbox: &BBox) -> bool {
    c.x >= bbox[0] && c.x <= bbox[2] && c.y >= bbox[1] && c.y <= bbox[3]
}

/// Segments of a candidate, rings closed
fn candidate_segments(geom: &Geometry) -> Vec<Line<f64>> {
    fn push_segments(coords: &[[f64; 2]], close: bool, out: &mut Vec<Line<f64>>) {
        for w in coords.windows(2) {
            out.push(Line::new(
                Coord { x: w[0][0], y: w[0][1] },
                Coord { x: w[1][0], y: w[1][1] },
            ));
        }
        if let (true, Some(first), Some(last)) = (close, coords.first(), coords.last()) {
            if coords.len() > 2 && first != last {
                out.push(Line::new(
                    Coord { x: last[0], y: last[1] },
                    Coord { x: first[0], y: first[1] },
                ));
            }
        }
    }

    let mut segments = Vec::new();
    match geom {
        Geometry::LineString { coordinates } => push_segments(coordinates, false, &mut segments),
        Geometry::MultiLineString { coordinates } => {
            for line in coordinates {
                push_segments(line, false, &mut segments);
            }
        }
        Geometry::Polygon { coordinates } => {
            for ring in coordinates {
                push_segments(ring, true, &mut segments);
            }
        }
        Geometry::MultiPolygon { coordinates } => {
            for ring in coordinates.iter().flatten() {
                push_segments(ring, true, &mut segments);
            }
        }
        Geometry::Point { .. } | Geometry::MultiPoint { .. } => {}
    }
    segments
}

/// First vertex of every polygon part, or both endpoints of every line
fn classification_vertices(geom: &Geometry) -> Vec<Coord<f64>> {
    let to_coord = |c: &[f64; 2]| Coord { x: c[0], y: c[1] };
    match geom {
        Geometry::Polygon { coordinates } => {
            coordinates.first().and_then(|r| r.first()).map(to_coord).into_iter().collect()
        }
        Geometry::MultiPolygon { coordinates } => coordinates
            .iter()
            .filter_map(|p| p.first().and_then(|r| r.first()))
            .map(to_coord)
            .collect(),
        Geometry::LineString { coordinates } => line_endpoints(coordinates),
        Geometry::MultiLineString { coordinates } => {
            coordinates.iter().flat_map(|l| line_endpoints(l)).collect()
        }
        Geometry::Point { coordinates } => vec![to_coord(coordinates)],
        Geometry::MultiPoint { coordinates } => coordinates.iter().map(to_coord).collect(),
    }
}

fn line_endpoints(line: &[[f64; 2]]) -> Vec<Coord<f64>> {
    match line {
        [] => vec![],
        [only] => vec![Coord { x: only[0], y: only[1] }],
        [first, .., last] => vec![
            Coord { x: first[0], y: first[1] },
            Coord { x: last[0], y: last[1] },
        ],
    }
}

/// Exterior vertices spread evenly over every part, at most `max_samples`
fn sample_vertices(polygons: &MultiPolygon<f64>, max_samples: usize) -> Vec<Coord<f64>> {
    let per_polygon = (max_samples / polygons.0.len().max(1)).max(1);
    let mut samples = Vec::with_capacity(max_samples);
    for polygon in polygons {
        let ring = &polygon.exterior().0;
        let distinct = if ring.first() == ring.last() {
            ring.len().saturating_sub(1)
        } else {
            ring.len()
        };
        if distinct < 2 {
            continue;
        }
        let take = per_polygon.min(distinct);
        for i in 0..take {
            samples.push(ring[i * distinct / take]);
            if samples.len() >= max_samples {
                return samples;
            }
        }
    }
    samples
}

impl ContainerIndex {
    /// Index the boundary of `container`
    pub fn new(container: &MultiPolygon<f64>) -> Self {
        let mut segments = Vec::new();
        let mut holes = Vec::new();

        for polygon in container {
            let exterior = closed_ring(polygon.exterior());
            segments.extend(exterior.lines().map(|line| BoundarySegment { line }));
            for interior in polygon.interiors() {
                let ring = closed_ring(interior);
                segments.extend(ring.lines().map(|line| BoundarySegment { line }));
                if let Some(bbox) = ring_bbox(&ring) {
                    holes.push(Hole { polygon: Polygon::new(ring, vec![]), bbox });
                }
            }
        }

        tracing::debug!(
            segments = segments.len(),
            holes = holes.len(),
            "Built container index"
        );

        Self {
            container: container.clone(),
            bbox: multi_polygon_bbox(container),
            holes,
            segments: RTree::bulk_load(segments),
        }
    }

    /// Build an index from a canonical polygonal geometry
    pub fn from_geometry(geom: &Geometry) -> Option<Self> {
        to_multi_polygon(geom).map(|mp| Self::new(&mp))
    }

    pub fn bbox(&self) -> Option<BBox> {
        self.bbox
    }

    pub fn container(&self) -> &MultiPolygon<f64> {
        &self.container
    }

    /// Number of indexed boundary segments
    pub fn segment_count(&self) -> usize {
        self.segments.size()
    }

    /// Classify a candidate relative to the subject
    pub fn classify(&self, candidate: &Geometry) -> Classification {
        if candidate.is_puntal() {
            return if self.point_in_container(candidate) {
                Classification::Inside
            } else {
                Classification::Outside
            };
        }

        let (Some(container_bbox), Some(candidate_bbox)) = (self.bbox, candidate.bbox()) else {
            return Classification::Outside;
        };
        if !bbox_intersects(&candidate_bbox, &container_bbox) {
            return Classification::Outside;
        }

        if self.touches_boundary(candidate) {
            return Classification::Mixed;
        }

        let vertices = classification_vertices(candidate);
        if vertices.is_empty() {
            return Classification::Outside;
        }

        let mut inside = 0usize;
        let mut outside = 0usize;
        for vertex in &vertices {
            match self.container.coordinate_position(vertex) {
                CoordPos::OnBoundary => return Classification::Mixed,
                CoordPos::Inside => inside += 1,
                CoordPos::Outside => outside += 1,
            }
        }
        if inside > 0 && outside > 0 {
            return Classification::Mixed;
        }

        let candidate_polygons = to_multi_polygon(candidate);

        if outside > 0 {
            // the candidate may still enclose the whole subject
            if let Some(polygons) = &candidate_polygons {
                if bbox_contains(&candidate_bbox, &container_bbox) {
                    let swallowed = sample_vertices(&self.container, CONTAINER_SAMPLES)
                        .iter()
                        .any(|c| polygons.coordinate_position(c) != CoordPos::Outside);
                    if swallowed {
                        return Classification::Mixed;
                    }
                }
            }
            return Classification::Outside;
        }

        if let Some(polygons) = &candidate_polygons {
            if self.overlaps_hole(polygons, &candidate_bbox) {
                return Classification::Mixed;
            }
        }

        Classification::Inside
    }

    /// True when any point of a puntal geometry lies within the subject.
    ///
    /// Points inside a hole are outside the subject. Non-puntal geometries are
    /// tested with [`ContainerIndex::classify`].
    pub fn point_in_container(&self, geom: &Geometry) -> bool {
        match geom {
            Geometry::Point { coordinates } => self.coord_in_container(coordinates),
            Geometry::MultiPoint { coordinates } => {
                coordinates.iter().any(|c| self.coord_in_container(c))
            }
            _ => self.classify(geom) == Classification::Inside,
        }
    }

    fn coord_in_container(&self, c: &[f64; 2]) -> bool {
        let coord = Coord { x: c[0], y: c[1] };
        let Some(bbox) = &self.bbox else {
            return false;
        };
        if !point_in_bbox(&coord, bbox) {
            return false;
        }
        self.container.coordinate_position(&coord) != CoordPos::Outside
    }

    fn touches_boundary(&self, candidate: &Geometry) -> bool {
        candidate_segments(candidate).iter().any(|segment| {
            let query = AABB::from_corners(
                [segment.start.x, segment.start.y],
                [segment.end.x, segment.end.y],
            );
            self.segments
                .locate_in_envelope_intersecting(&query)
                .any(|hit| line_intersection(*segment, hit.line).is_some())
        })
    }

    fn overlaps_hole(&self, candidate: &MultiPolygon<f64>, candidate_bbox: &BBox) -> bool {
        let nearby: Vec<&Hole> = self
            .holes
            .iter()
            .filter(|hole| bbox_intersects(candidate_bbox, &hole.bbox))
            .collect();
        if nearby.is_empty() {
            return false;
        }

        // candidate vertices falling in a hole
        for sample in sample_vertices(candidate, CANDIDATE_SAMPLES) {
            for hole in &nearby {
                if point_in_bbox(&sample, &hole.bbox)
                    && hole.polygon.coordinate_position(&sample) != CoordPos::Outside
                {
                    return true;
                }
            }
        }

        // a hole enclosed by the candidate
        nearby.iter().filter(|hole| bbox_contains(candidate_bbox, &hole.bbox)).any(|hole| {
            sample_vertices(&MultiPolygon::new(vec![hole.polygon.clone()]), HOLE_SAMPLES)
                .iter()
                .any(|c| candidate.coordinate_position(c) != CoordPos::Outside)
        })
    }
}
