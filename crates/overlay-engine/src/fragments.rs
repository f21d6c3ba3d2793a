//! Fragment builder.
//!
//! A sketch that overlaps several geographies is cut into fragments: polygons
//! that never overlap each other, each tagged with every geography it lies
//! in. Metrics are then computed once per fragment and combined per
//! geography, so overlapping geographies never double count area.
//!
//! The same machinery keeps the fragments of a sketch collection disjoint,
//! where each fragment also records which sketches cover it.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use futures::future::join_all;
use geo::{Coord, Intersects, LineString, MultiPolygon, Polygon};
use overlay_core::models::{BBox, Feature, GeographyId, GeographySettings, Geometry};
use overlay_core::{OverlayError, Result};
use overlay_geo::bbox::bbox_intersects;
use overlay_geo::measure::polygon_area_m2;
use overlay_geo::models::{polygon_bbox, polygon_to_geometry, to_polygon};
use overlay_geo::ops::{is_effectively_empty, polygon_difference, polygon_intersection, polygons_overlap, union_polygons};
use overlay_geo::{clean_coords, union_at_antimeridian, PreparedSketch};
use serde_json::json;

use crate::clipping::ClippingFn;
use crate::geographies::clip_to_geography;
use crate::ids::FragmentIdGenerator;

/// Passes of [`merge_touching_fragments`] before giving up
pub const MAX_MERGE_PASSES: usize = 10;

const COORD_TOLERANCE: f64 = 1e-9;
const COLLINEAR_TOLERANCE: f64 = 1e-12;

/// A single-part piece of a sketch
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub id: u64,
    pub polygon: Polygon<f64>,
    /// Sorted, without duplicates
    pub geography_ids: Vec<GeographyId>,
    /// Sorted, without duplicates; empty outside sketch collections
    pub sketch_ids: Vec<u64>,
    bbox: Option<BBox>,
}

impl Fragment {
    pub fn new(id: u64, polygon: Polygon<f64>, mut geography_ids: Vec<GeographyId>) -> Self {
        geography_ids.sort_unstable();
        geography_ids.dedup();
        let bbox = polygon_bbox(&polygon);
        Self { id, polygon, geography_ids, sketch_ids: Vec::new(), bbox }
    }

    pub fn with_sketch_ids(mut self, mut sketch_ids: Vec<u64>) -> Self {
        sketch_ids.sort_unstable();
        sketch_ids.dedup();
        self.sketch_ids = sketch_ids;
        self
    }

    /// Same tags, new id and shape
    fn derive(&self, id: u64, polygon: Polygon<f64>) -> Self {
        Fragment::new(id, polygon, self.geography_ids.clone()).with_sketch_ids(self.sketch_ids.clone())
    }

    fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn bbox(&self) -> Option<BBox> {
        self.bbox
    }

    pub fn geometry(&self) -> Geometry {
        polygon_to_geometry(&self.polygon)
    }

    /// Geodesic area in square meters
    pub fn area_m2(&self) -> f64 {
        polygon_area_m2(&self.polygon)
    }

    pub fn in_geography(&self, id: GeographyId) -> bool {
        self.geography_ids.binary_search(&id).is_ok()
    }

    /// GeoJSON-style feature with `__id`, `__geographyIds` and, for sketch
    /// collections, `__sketchIds`
    pub fn to_feature(&self) -> Feature {
        let feature = Feature::new(self.geometry())
            .property("__id", self.id)
            .property("__geographyIds", json!(self.geography_ids));
        if self.sketch_ids.is_empty() {
            feature
        } else {
            feature.property("__sketchIds", json!(self.sketch_ids))
        }
    }

    fn bbox_intersects(&self, other: &Fragment) -> bool {
        match (&self.bbox, &other.bbox) {
            (Some(a), Some(b)) => bbox_intersects(a, b),
            _ => false,
        }
    }

    fn overlaps(&self, other: &Fragment) -> bool {
        self.bbox_intersects(other) && polygons_overlap(&self.polygon, &other.polygon)
    }
}

/// Bounds for the decomposition loop
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentOptions {
    /// Decompose/merge iterations before failing with
    /// [`OverlayError::NonConvergentDecomposition`]
    pub max_iterations: usize,
    /// Fragments at or below this geodesic area are dropped
    pub min_fragment_area_m2: f64,
}

impl Default for FragmentOptions {
    fn default() -> Self {
        Self { max_iterations: 10, min_fragment_area_m2: 1.0 }
    }
}

fn merge_ids<T: Ord + Copy>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().chain(b).copied().collect::<BTreeSet<T>>().into_iter().collect()
}

fn ensure_unique_ids(fragments: &[Fragment]) -> Result<()> {
    let mut seen = HashSet::with_capacity(fragments.len());
    for fragment in fragments {
        if !seen.insert(fragment.id) {
            return Err(OverlayError::DuplicateFragmentId { id: fragment.id });
        }
    }
    Ok(())
}

/// For each fragment, the later fragments it overlaps
fn overlap_relations(fragments: &[Fragment]) -> Vec<Vec<usize>> {
    let mut relations = vec![Vec::new(); fragments.len()];
    for i in 0..fragments.len() {
        for j in (i + 1)..fragments.len() {
            if fragments[i].overlaps(&fragments[j]) {
                relations[i].push(j);
                relations[j].push(i);
            }
        }
    }
    relations
}

fn cross(o: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn close(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= COORD_TOLERANCE && (a.y - b.y).abs() <= COORD_TOLERANCE
}

/// Ring without closing vertex, duplicates or collinear vertices, wound
/// counter-clockwise and starting at its smallest coordinate
fn normalized_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords = ring.0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    coords.dedup_by(|a, b| close(*a, *b));
    while coords.len() > 1 && close(coords[0], coords[coords.len() - 1]) {
        coords.pop();
    }

    let mut i = 0;
    while coords.len() > 3 && i < coords.len() {
        let n = coords.len();
        let prev = coords[(i + n - 1) % n];
        let next = coords[(i + 1) % n];
        if cross(prev, coords[i], next).abs() <= COLLINEAR_TOLERANCE {
            coords.remove(i);
            i = i.saturating_sub(1);
        } else {
            i += 1;
        }
    }

    let twice_area: f64 = (0..coords.len())
        .map(|i| {
            let a = coords[i];
            let b = coords[(i + 1) % coords.len()];
            a.x * b.y - b.x * a.y
        })
        .sum();
    if twice_area < 0.0 {
        coords.reverse();
    }

    if let Some(start) = (0..coords.len()).min_by(|&a, &b| {
        coords[a]
            .x
            .total_cmp(&coords[b].x)
            .then(coords[a].y.total_cmp(&coords[b].y))
    }) {
        coords.rotate_left(start);
    }
    coords
}

fn rings_equal(a: &[Coord<f64>], b: &[Coord<f64>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| close(*x, *y))
}

/// Same shape regardless of ring start, winding or redundant vertices
fn same_geometry(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    if a.interiors().len() != b.interiors().len() {
        return false;
    }
    if !rings_equal(&normalized_ring(a.exterior()), &normalized_ring(b.exterior())) {
        return false;
    }
    let sorted_holes = |p: &Polygon<f64>| {
        let mut holes: Vec<Vec<Coord<f64>>> = p.interiors().iter().map(normalized_ring).collect();
        holes.sort_by(|x, y| match (x.first(), y.first()) {
            (Some(x), Some(y)) => x.x.total_cmp(&y.x).then(x.y.total_cmp(&y.y)),
            _ => x.len().cmp(&y.len()),
        });
        holes
    };
    sorted_holes(a).iter().zip(&sorted_holes(b)).all(|(x, y)| rings_equal(x, y))
}

/// Merge overlapping fragments that share the same geometry. Returns whether
/// anything was merged.
fn merge_matching_geometry(fragments: &mut Vec<Fragment>, relations: &[Vec<usize>]) -> bool {
    let mut removed = vec![false; fragments.len()];
    for i in 0..fragments.len() {
        if removed[i] {
            continue;
        }
        for &j in &relations[i] {
            if j <= i || removed[j] {
                continue;
            }
            if same_geometry(&fragments[i].polygon, &fragments[j].polygon) {
                let geography_ids = merge_ids(&fragments[i].geography_ids, &fragments[j].geography_ids);
                let sketch_ids = merge_ids(&fragments[i].sketch_ids, &fragments[j].sketch_ids);
                fragments[i].geography_ids = geography_ids;
                fragments[i].sketch_ids = sketch_ids;
                removed[j] = true;
            }
        }
    }
    let any = removed.iter().any(|r| *r);
    if any {
        let mut keep = removed.iter().map(|r| !r);
        fragments.retain(|_| keep.next().unwrap_or(true));
    }
    any
}

/// Split an overlapping pair into intersection and both differences.
///
/// `None` when the pair has no real intersection.
fn split_pair(a: &Fragment, b: &Fragment, ids: &mut FragmentIdGenerator) -> Option<Vec<Fragment>> {
    let intersection = polygon_intersection(&a.polygon, &b.polygon);
    if is_effectively_empty(&intersection) {
        return None;
    }
    let geography_ids = merge_ids(&a.geography_ids, &b.geography_ids);
    let sketch_ids = merge_ids(&a.sketch_ids, &b.sketch_ids);

    let mut pieces = Vec::new();
    for polygon in intersection {
        pieces.push(
            Fragment::new(ids.next_id(), polygon, geography_ids.clone()).with_sketch_ids(sketch_ids.clone()),
        );
    }
    for polygon in polygon_difference(&a.polygon, &b.polygon) {
        pieces.push(a.derive(ids.next_id(), polygon));
    }
    for polygon in polygon_difference(&b.polygon, &a.polygon) {
        pieces.push(b.derive(ids.next_id(), polygon));
    }
    Some(pieces)
}

/// One decomposition pass. Each fragment takes part in at most one split.
fn decompose_pass(fragments: Vec<Fragment>, relations: &[Vec<usize>], ids: &mut FragmentIdGenerator) -> Vec<Fragment> {
    let mut processed = vec![false; fragments.len()];
    let mut output = Vec::with_capacity(fragments.len());
    for i in 0..fragments.len() {
        if processed[i] {
            continue;
        }
        processed[i] = true;
        let mut split = None;
        for &j in &relations[i] {
            if processed[j] {
                continue;
            }
            if let Some(pieces) = split_pair(&fragments[i], &fragments[j], ids) {
                processed[j] = true;
                split = Some(pieces);
                break;
            }
        }
        match split {
            Some(pieces) => output.extend(pieces),
            None => output.push(fragments[i].clone()),
        }
    }
    output
}

/// Decompose and merge until no two fragments overlap
fn decompose(
    mut fragments: Vec<Fragment>,
    ids: &mut FragmentIdGenerator,
    options: &FragmentOptions,
) -> Result<Vec<Fragment>> {
    let mut iteration = 0;
    loop {
        ensure_unique_ids(&fragments)?;
        let relations = overlap_relations(&fragments);
        if relations.iter().all(Vec::is_empty) {
            tracing::debug!(iterations = iteration, fragments = fragments.len(), "Fragments are disjoint");
            return Ok(fragments);
        }
        if iteration >= options.max_iterations {
            return Err(OverlayError::NonConvergentDecomposition {
                iterations: iteration,
                fragments: fragments.len(),
            });
        }
        iteration += 1;

        if merge_matching_geometry(&mut fragments, &relations) {
            continue;
        }
        fragments = decompose_pass(fragments, &relations, ids);
    }
}

fn clean_polygon(polygon: Polygon<f64>) -> Polygon<f64> {
    to_polygon(&clean_coords(&polygon_to_geometry(&polygon))).unwrap_or(polygon)
}

/// Cut a sketch into geography-disjoint fragments.
///
/// Each geography is clipped concurrently. Every resulting part becomes a
/// fragment tagged with its geography, then overlapping fragments are
/// decomposed until all are pairwise interior-disjoint. Fragments at or
/// below the minimum area are dropped.
pub async fn create_fragments(
    sketch: &PreparedSketch,
    geographies: &[GeographySettings],
    clipping: &dyn ClippingFn,
    ids: &mut FragmentIdGenerator,
    options: &FragmentOptions,
) -> Result<Vec<Fragment>> {
    if geographies.iter().any(|g| !g.has_intersect_layer()) {
        return Err(OverlayError::MissingIntersectLayer);
    }

    let clipped =
        join_all(geographies.iter().map(|g| clip_to_geography(sketch, &g.clipping_layers, clipping))).await;

    let mut fragments = Vec::new();
    for (geography, result) in geographies.iter().zip(clipped) {
        let Some(mp) = result? else {
            tracing::debug!(geography = geography.id, "Sketch is outside geography");
            continue;
        };
        for polygon in mp {
            fragments.push(Fragment::new(ids.next_id(), clean_polygon(polygon), vec![geography.id]));
        }
    }

    let fragments: Vec<Fragment> = decompose(fragments, ids, options)?
        .into_iter()
        .filter(|f| f.area_m2() > options.min_fragment_area_m2)
        .collect();

    tracing::info!(geographies = geographies.len(), fragments = fragments.len(), "Created fragments");
    Ok(fragments)
}

/// Make the fragments of a sketch collection interior-disjoint.
///
/// `new` holds the fragments of the sketch being saved, `existing` those
/// already in the collection (all of them, or just the ones near the new
/// sketch). Overlaps are decomposed with both sketch and geography ids
/// merged, slivers are dropped and touching pieces with identical tags are
/// joined again.
pub fn eliminate_overlap(
    new: Vec<Fragment>,
    existing: Vec<Fragment>,
    ids: &mut FragmentIdGenerator,
    options: &FragmentOptions,
) -> Result<Vec<Fragment>> {
    let pending: Vec<Fragment> =
        new.into_iter().chain(existing).map(|f| f.with_id(ids.next_id())).collect();
    let fragments: Vec<Fragment> = decompose(pending, ids, options)?
        .into_iter()
        .filter(|f| f.area_m2() > options.min_fragment_area_m2)
        .collect();
    Ok(merge_touching_fragments(fragments, ids))
}

/// Groups of mutually reachable touching fragments, as indexes
fn connected_components(fragments: &[&Fragment]) -> Vec<Vec<usize>> {
    let mut visited = vec![false; fragments.len()];
    let mut components = Vec::new();
    for start in 0..fragments.len() {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if visited[current] {
                continue;
            }
            visited[current] = true;
            component.push(current);
            for other in 0..fragments.len() {
                if !visited[other]
                    && fragments[current].bbox_intersects(fragments[other])
                    && fragments[current].polygon.intersects(&fragments[other].polygon)
                {
                    stack.push(other);
                }
            }
        }
        components.push(component);
    }
    components
}

/// Join touching fragments that carry the same geography and sketch ids.
///
/// A connected group is replaced only when its union is a single polygon.
/// Runs up to [`MAX_MERGE_PASSES`] passes.
pub fn merge_touching_fragments(fragments: Vec<Fragment>, ids: &mut FragmentIdGenerator) -> Vec<Fragment> {
    if fragments.len() < 2 {
        return fragments;
    }
    let mut current = fragments;
    let mut passes = 0;
    let mut changed = true;
    while changed && passes < MAX_MERGE_PASSES {
        changed = false;
        passes += 1;

        let mut groups: BTreeMap<(Vec<GeographyId>, Vec<u64>), Vec<Fragment>> = BTreeMap::new();
        for fragment in current {
            groups
                .entry((fragment.geography_ids.clone(), fragment.sketch_ids.clone()))
                .or_default()
                .push(fragment);
        }

        let mut merged = Vec::new();
        for ((geography_ids, sketch_ids), group) in groups {
            if group.len() < 2 {
                merged.extend(group);
                continue;
            }
            let refs: Vec<&Fragment> = group.iter().collect();
            for component in connected_components(&refs) {
                if component.len() < 2 {
                    merged.extend(component.iter().map(|&i| group[i].clone()));
                    continue;
                }
                let union = union_polygons(component.iter().map(|&i| &group[i].polygon));
                match <[Polygon<f64>; 1]>::try_from(union.0) {
                    Ok([polygon]) => {
                        merged.push(
                            Fragment::new(ids.next_id(), polygon, geography_ids.clone())
                                .with_sketch_ids(sketch_ids.clone()),
                        );
                        changed = true;
                    }
                    Err(_) => merged.extend(component.iter().map(|&i| group[i].clone())),
                }
            }
        }
        current = merged;
    }
    if changed && passes >= MAX_MERGE_PASSES {
        tracing::warn!(
            "merge_touching_fragments: maximum passes ({}) reached, some fragments may not be fully merged",
            MAX_MERGE_PASSES
        );
    }
    current
}

/// Inputs for [`clip_to_geographies`]
#[derive(Debug, Clone, Default)]
pub struct ClipToGeographiesRequest {
    /// Every geography fragments are created for
    pub geographies: Vec<GeographySettings>,
    /// Geographies the sketch itself is clipped to
    pub clipping_geography_ids: Vec<GeographyId>,
    /// Fragments already stored for the sketch's collection
    pub existing_fragments: Vec<Fragment>,
    /// Id the sketch was previously saved under, if any. Its old fragments
    /// in `existing_fragments` are replaced.
    pub existing_sketch_id: Option<u64>,
    /// Id recorded in `sketch_ids` of the new fragments
    pub sketch_id: u64,
}

/// Clipped sketch and its fragments
#[derive(Debug, Clone, PartialEq)]
pub struct ClipToGeographiesResult {
    /// The sketch clipped to its primary geography, rejoined across the
    /// antimeridian. `None` when it overlaps none of the clipping geographies.
    pub clipped: Option<MultiPolygon<f64>>,
    pub fragments: Vec<Fragment>,
}

/// Clipping geography with the largest fragment area
fn primary_geography(fragments: &[&Fragment], matching: &BTreeSet<GeographyId>) -> Result<GeographyId> {
    if matching.len() == 1 {
        return matching.iter().next().copied().ok_or(OverlayError::NoPrimaryGeography);
    }
    let mut areas: BTreeMap<GeographyId, f64> = matching.iter().map(|&id| (id, 0.0)).collect();
    for fragment in fragments {
        let area = fragment.area_m2();
        for id in &fragment.geography_ids {
            if let Some(total) = areas.get_mut(id) {
                *total += area;
            }
        }
    }
    let mut primary = None;
    let mut biggest = 0.0;
    for (id, area) in areas {
        if area > biggest {
            biggest = area;
            primary = Some(id);
        }
    }
    primary.ok_or(OverlayError::NoPrimaryGeography)
}

/// Replace stale fragments of a re-saved sketch.
///
/// Fragments owned only by `stale_sketch_id` are dropped. The rest are split
/// per remaining sketch and unioned by `(sketch, geographies)`, so editing a
/// sketch does not keep multiplying its neighbours' fragments.
fn consolidate_existing(existing: Vec<Fragment>, stale_sketch_id: u64, ids: &mut FragmentIdGenerator) -> Vec<Fragment> {
    let mut by_owner: BTreeMap<(u64, Vec<GeographyId>), Vec<Polygon<f64>>> = BTreeMap::new();
    for fragment in existing {
        if fragment.sketch_ids == [stale_sketch_id] {
            continue;
        }
        for &sketch_id in &fragment.sketch_ids {
            if sketch_id == stale_sketch_id {
                continue;
            }
            by_owner
                .entry((sketch_id, fragment.geography_ids.clone()))
                .or_default()
                .push(fragment.polygon.clone());
        }
    }

    let mut consolidated = Vec::new();
    for ((sketch_id, geography_ids), polygons) in by_owner {
        for polygon in union_polygons(&polygons) {
            consolidated.push(
                Fragment::new(ids.next_id(), polygon, geography_ids.clone()).with_sketch_ids(vec![sketch_id]),
            );
        }
    }
    consolidated
}

/// Clip a sketch to its primary geography and fragment it against its
/// collection.
///
/// The primary geography is the clipping geography the sketch overlaps, or
/// the one with the largest overlap when there are several. Only fragments
/// in the primary geography are kept.
pub async fn clip_to_geographies(
    sketch: &PreparedSketch,
    request: ClipToGeographiesRequest,
    clipping: &dyn ClippingFn,
    options: &FragmentOptions,
) -> Result<ClipToGeographiesResult> {
    let mut ids = FragmentIdGenerator::new();
    let fragments: Vec<Fragment> = create_fragments(sketch, &request.geographies, clipping, &mut ids, options)
        .await?
        .into_iter()
        .map(|f| f.with_sketch_ids(vec![request.sketch_id]))
        .collect();

    let mut matching = BTreeSet::new();
    let mut in_clipping: Vec<&Fragment> = Vec::new();
    for fragment in &fragments {
        let hits: Vec<GeographyId> = fragment
            .geography_ids
            .iter()
            .copied()
            .filter(|id| request.clipping_geography_ids.contains(id))
            .collect();
        if !hits.is_empty() {
            in_clipping.push(fragment);
            matching.extend(hits);
        }
    }

    if in_clipping.is_empty() {
        return Ok(ClipToGeographiesResult { clipped: None, fragments });
    }

    let primary = primary_geography(&in_clipping, &matching)?;
    let clipped =
        union_polygons(in_clipping.iter().copied().filter(|f| f.in_geography(primary)).map(|f| &f.polygon));
    let mut fragments: Vec<Fragment> = fragments.into_iter().filter(|f| f.in_geography(primary)).collect();
    tracing::debug!(primary, fragments = fragments.len(), "Chose primary geography");

    if !request.existing_fragments.is_empty() {
        let existing = match request.existing_sketch_id {
            Some(stale) => consolidate_existing(request.existing_fragments, stale, &mut ids),
            None => request.existing_fragments,
        };
        fragments = eliminate_overlap(fragments, existing, &mut ids, options)?;
    }

    Ok(ClipToGeographiesResult { clipped: Some(union_at_antimeridian(&clipped)), fragments })
}
