//! Batch jobs.
//!
//! Every operation has a pure function here that turns one [`WorkerRequest`]
//! into a partial [`BatchResult`]. Worker tasks call [`run_job`] on a blocking
//! thread; processors without a pool call it inline.

use std::collections::{BTreeMap, BTreeSet};

use geo::{BooleanOps, Geometry as GeoGeometry, Intersects, MultiLineString, MultiPolygon};
use overlay_core::models::{
    pick_properties, ColumnValueSamples, Feature, Geometry, GroupedValues, PresenceTableValue,
    Properties, TOTAL_GROUP_KEY,
};
use overlay_core::{OverlayError, Result};
use overlay_geo::measure::{line_string_length_m, multi_polygon_area_m2, SQ_METERS_PER_SQ_KM};
use overlay_geo::models::{to_geo_geometry, to_multi_polygon};
use overlay_geo::ops::union_all;
use serde_json::Value;

use super::protocol::{BatchFeature, BatchResult, Operation, WorkerRequest};

/// Run one batch
pub fn run_job(request: &WorkerRequest) -> Result<BatchResult> {
    match request.operation {
        Operation::OverlayArea => overlay_area(request).map(BatchResult::OverlayArea),
        Operation::Count => count_features(request).map(BatchResult::Count),
        Operation::Presence => Ok(BatchResult::Presence(test_for_presence(request))),
        Operation::PresenceTable => create_presence_table(request).map(BatchResult::PresenceTable),
        Operation::ColumnValues => collect_column_values(request).map(BatchResult::ColumnValues),
    }
}

/// Linear geometry as a geo MultiLineString, `None` for other types
pub(crate) fn to_multi_line_string(geom: &Geometry) -> Option<MultiLineString<f64>> {
    match to_geo_geometry(geom) {
        GeoGeometry::LineString(line) => Some(MultiLineString::new(vec![line])),
        GeoGeometry::MultiLineString(lines) => Some(lines),
        _ => None,
    }
}

/// Whether a geometry shares any point with a polygon set, boundary included
pub(crate) fn intersects_polygons(geom: &Geometry, polygons: &MultiPolygon<f64>) -> bool {
    if polygons.0.is_empty() {
        return false;
    }
    match to_geo_geometry(geom) {
        GeoGeometry::Point(p) => p.intersects(polygons),
        GeoGeometry::MultiPoint(mp) => mp.intersects(polygons),
        GeoGeometry::LineString(line) => line.intersects(polygons),
        GeoGeometry::MultiLineString(lines) => lines.intersects(polygons),
        GeoGeometry::Polygon(p) => p.intersects(polygons),
        GeoGeometry::MultiPolygon(mp) => mp.intersects(polygons),
        _ => false,
    }
}

/// Whether a feature still counts once the difference polygons are removed.
///
/// Point sets survive when any point lies outside the difference. Lines and
/// polygons are dropped as soon as they touch it.
pub(crate) fn survives_difference(geom: &Geometry, difference: &MultiPolygon<f64>) -> bool {
    if difference.0.is_empty() {
        return true;
    }
    match geom {
        Geometry::Point { .. } => !intersects_polygons(geom, difference),
        Geometry::MultiPoint { coordinates } => coordinates
            .iter()
            .any(|c| !geo::Point::new(c[0], c[1]).intersects(difference)),
        _ => !intersects_polygons(geom, difference),
    }
}

/// Length in kilometers of lines after the requested clipping
fn clipped_line_length_km(
    lines: MultiLineString<f64>,
    feature: &BatchFeature,
    subject: &MultiPolygon<f64>,
    difference: &MultiPolygon<f64>,
) -> f64 {
    let mut lines = lines;
    if feature.requires_intersection {
        lines = subject.clip(&lines, false);
    }
    if feature.requires_difference && !difference.0.is_empty() {
        lines = difference.clip(&lines, true);
    }
    lines.iter().map(line_string_length_m).sum::<f64>() / 1000.0
}

/// Overlap size of a single feature: square kilometers for polygons,
/// kilometers for lines and `None` for points
fn clipped_feature_size(
    feature: &BatchFeature,
    subject: &MultiPolygon<f64>,
    difference: &MultiPolygon<f64>,
) -> Option<f64> {
    let geom = feature.feature.geometry();
    if let Some(mut polygons) = to_multi_polygon(geom) {
        if feature.requires_intersection {
            polygons = polygons.intersection(subject);
        }
        if feature.requires_difference && !difference.0.is_empty() {
            polygons = polygons.difference(difference);
        }
        return Some(multi_polygon_area_m2(&polygons) / SQ_METERS_PER_SQ_KM);
    }
    to_multi_line_string(geom).map(|lines| clipped_line_length_km(lines, feature, subject, difference))
}

/// Combined overlap of a group of features.
///
/// Polygons are unioned before measuring so overlapping reference features
/// are not counted twice.
fn clipped_overlap_size(
    features: &[&BatchFeature],
    subject: &MultiPolygon<f64>,
    difference: &MultiPolygon<f64>,
) -> Result<f64> {
    let mut product = Vec::new();
    let mut for_clipping = Vec::new();
    let mut length_km = 0.0;
    for f in features {
        let geom = f.feature.geometry();
        if let Some(polygons) = to_multi_polygon(geom) {
            if f.requires_intersection {
                for_clipping.push(polygons);
            } else {
                product.push(polygons);
            }
        } else if let Some(lines) = to_multi_line_string(geom) {
            length_km += clipped_line_length_km(lines, f, subject, difference);
        } else {
            return Err(OverlayError::UnsupportedGeometry {
                geometry_type: geom.geometry_type().as_str().to_string(),
            });
        }
    }
    if product.is_empty() && for_clipping.is_empty() {
        return Ok(length_km);
    }

    let mut polygons = union_all(product);
    if !for_clipping.is_empty() {
        let clipped = union_all(for_clipping).intersection(subject);
        polygons = if polygons.0.is_empty() { clipped } else { polygons.union(&clipped) };
    }
    if !difference.0.is_empty() {
        polygons = polygons.difference(difference);
    }
    Ok(multi_polygon_area_m2(&polygons) / SQ_METERS_PER_SQ_KM + length_km)
}

fn overlay_area(request: &WorkerRequest) -> Result<GroupedValues<f64>> {
    let subject = request.subject.as_ref();
    let difference = &request.difference;
    let mut results = GroupedValues::new();
    let total = match request.options.group_by.as_deref() {
        Some(group_by) => {
            let mut groups: BTreeMap<String, Vec<&BatchFeature>> = BTreeMap::new();
            let mut ungrouped = Vec::new();
            for f in &request.features {
                match f.feature.feature.group_key(group_by) {
                    Some(key) => groups.entry(key).or_default().push(f),
                    None => ungrouped.push(f),
                }
            }
            let mut total = clipped_overlap_size(&ungrouped, subject, difference)?;
            for (key, members) in groups {
                let size = clipped_overlap_size(&members, subject, difference)?;
                total += size;
                results.insert(key, size);
            }
            total
        }
        None => {
            let all: Vec<&BatchFeature> = request.features.iter().collect();
            clipped_overlap_size(&all, subject, difference)?
        }
    };
    results.insert(TOTAL_GROUP_KEY.to_string(), total);
    Ok(results)
}

/// Whether a batched feature contributes to count-like operations
fn is_present(f: &BatchFeature, request: &WorkerRequest) -> bool {
    let geom = f.feature.geometry();
    if f.requires_intersection && !intersects_polygons(geom, &request.subject) {
        return false;
    }
    !f.requires_difference || survives_difference(geom, &request.difference)
}

fn count_features(request: &WorkerRequest) -> Result<BTreeMap<String, Vec<i64>>> {
    let mut ids: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    ids.insert(TOTAL_GROUP_KEY.to_string(), BTreeSet::new());
    for f in request.features.iter().filter(|f| is_present(f, request)) {
        let oidx = f.feature.oidx.ok_or(OverlayError::MissingFeatureId)?;
        if let Some(key) = request.options.group_by.as_deref().and_then(|g| f.feature.feature.group_key(g)) {
            ids.entry(key).or_default().insert(oidx);
        }
        ids.entry(TOTAL_GROUP_KEY.to_string()).or_default().insert(oidx);
    }
    Ok(ids.into_iter().map(|(key, set)| (key, set.into_iter().collect())).collect())
}

fn test_for_presence(request: &WorkerRequest) -> bool {
    request.features.iter().any(|f| is_present(f, request))
}

/// Presence table row: the feature id under `__id` plus the selected properties
pub(crate) fn presence_row(oidx: i64, properties: &Properties, included: Option<&[String]>) -> Properties {
    let mut row = Properties::new();
    row.insert("__id".to_string(), Value::from(oidx));
    row.extend(pick_properties(properties, included));
    row
}

fn create_presence_table(request: &WorkerRequest) -> Result<PresenceTableValue> {
    let options = &request.options;
    let mut table = PresenceTableValue::default();
    for f in request.features.iter().filter(|f| is_present(f, request)) {
        if table.exceeded_limit {
            break;
        }
        let oidx = f.feature.oidx.ok_or(OverlayError::MissingFeatureId)?;
        table.values.push(presence_row(oidx, f.feature.properties(), options.included_properties.as_deref()));
        if table.values.len() >= options.results_limit {
            table.exceeded_limit = true;
        }
    }
    Ok(table)
}

/// Column value usable for statistics
pub(crate) fn column_value(feature: &Feature, property: &str) -> Option<Value> {
    feature
        .properties
        .get(property)
        .filter(|v| v.is_number() || v.is_string() || v.is_boolean())
        .cloned()
}

/// Record one sample under the total group and the feature's own group
pub(crate) fn push_column_sample(
    samples: &mut ColumnValueSamples,
    feature: &Feature,
    property: &str,
    group_by: Option<&str>,
    value: Value,
    weight: Option<f64>,
) {
    if let Some(key) = group_by.and_then(|g| feature.group_key(g)) {
        samples
            .entry(key)
            .or_default()
            .entry(property.to_string())
            .or_default()
            .push((value.clone(), weight));
    }
    samples
        .entry(TOTAL_GROUP_KEY.to_string())
        .or_default()
        .entry(property.to_string())
        .or_default()
        .push((value, weight));
}

fn collect_column_values(request: &WorkerRequest) -> Result<ColumnValueSamples> {
    let property = request.options.property.as_deref().ok_or(OverlayError::MissingColumnProperty)?;
    let group_by = request.options.group_by.as_deref();
    let mut samples = ColumnValueSamples::new();
    samples.insert(TOTAL_GROUP_KEY.to_string(), BTreeMap::new());

    for f in &request.features {
        let feature = &f.feature.feature;
        let weight = if feature.geometry.is_puntal() {
            if !is_present(f, request) {
                continue;
            }
            None
        } else {
            match clipped_feature_size(f, &request.subject, &request.difference) {
                Some(size) if size.is_finite() && size > 0.0 => Some(size),
                Some(_) => continue,
                None => {
                    return Err(OverlayError::UnsupportedGeometry {
                        geometry_type: feature.geometry.geometry_type().as_str().to_string(),
                    })
                }
            }
        };
        if let Some(value) = column_value(feature, property) {
            push_column_sample(&mut samples, feature, property, group_by, value, weight);
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::protocol::OperationOptions;
    use overlay_core::models::SourceFeature;
    use overlay_geo::models::to_multi_polygon;
    use std::sync::Arc;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        to_multi_polygon(&Geometry::rectangle(min_x, min_y, max_x, max_y)).unwrap()
    }

    fn batch_feature(feature: Feature, oidx: i64, intersection: bool, difference: bool) -> BatchFeature {
        let mut source = SourceFeature::new(feature);
        source.oidx = Some(oidx);
        BatchFeature { feature: source, requires_intersection: intersection, requires_difference: difference }
    }

    fn request(operation: Operation, features: Vec<BatchFeature>, difference: MultiPolygon<f64>) -> WorkerRequest {
        WorkerRequest {
            operation,
            features,
            difference,
            subject: Arc::new(rect(0.0, 0.0, 1.0, 1.0)),
            options: Arc::new(OperationOptions {
                group_by: Some("class".into()),
                results_limit: 2,
                property: Some("depth".into()),
                ..Default::default()
            }),
        }
    }

    fn area_km2(mp: &MultiPolygon<f64>) -> f64 {
        multi_polygon_area_m2(mp) / SQ_METERS_PER_SQ_KM
    }

    #[test]
    fn test_overlay_area_clips_mixed_features() {
        let features = vec![
            batch_feature(Feature::new(Geometry::rectangle(0.5, 0.0, 2.0, 1.0)).property("class", "a"), 0, true, false),
            batch_feature(Feature::new(Geometry::rectangle(0.0, 0.0, 0.25, 0.25)).property("class", "b"), 1, false, false),
        ];
        let result = run_job(&request(Operation::OverlayArea, features, MultiPolygon::new(vec![]))).unwrap();
        let BatchResult::OverlayArea(values) = result else { panic!("wrong result type") };
        let expected_a = area_km2(&rect(0.5, 0.0, 1.0, 1.0));
        let expected_b = area_km2(&rect(0.0, 0.0, 0.25, 0.25));
        assert!((values["a"] - expected_a).abs() / expected_a < 1e-6);
        assert!((values["b"] - expected_b).abs() / expected_b < 1e-6);
        assert!((values[TOTAL_GROUP_KEY] - expected_a - expected_b).abs() / expected_a < 1e-6);
    }

    #[test]
    fn test_overlay_area_removes_difference() {
        let features = vec![batch_feature(Feature::new(Geometry::rectangle(0.0, 0.0, 1.0, 1.0)), 0, false, true)];
        let result = run_job(&request(Operation::OverlayArea, features, rect(0.0, 0.0, 0.5, 1.0))).unwrap();
        let BatchResult::OverlayArea(values) = result else { panic!("wrong result type") };
        let expected = area_km2(&rect(0.5, 0.0, 1.0, 1.0));
        assert!((values[TOTAL_GROUP_KEY] - expected).abs() / expected < 1e-6);
    }

    #[test]
    fn test_overlay_area_line_length() {
        let line = Geometry::line_string(vec![[-1.0, 0.5], [2.0, 0.5]]);
        let features = vec![batch_feature(Feature::new(line), 0, true, false)];
        let result = run_job(&request(Operation::OverlayArea, features, MultiPolygon::new(vec![]))).unwrap();
        let BatchResult::OverlayArea(values) = result else { panic!("wrong result type") };
        // one degree of longitude at 0.5 degrees latitude
        assert!((values[TOTAL_GROUP_KEY] - 111.2).abs() < 0.5, "length was {}", values[TOTAL_GROUP_KEY]);
    }

    #[test]
    fn test_count_drops_features_touching_difference() {
        let features = vec![
            batch_feature(Feature::new(Geometry::point(0.2, 0.2)).property("class", "a"), 7, false, true),
            batch_feature(Feature::new(Geometry::point(0.8, 0.8)).property("class", "a"), 8, false, true),
            batch_feature(Feature::new(Geometry::rectangle(0.1, 0.1, 0.3, 0.3)), 9, false, true),
        ];
        let result = run_job(&request(Operation::Count, features, rect(0.0, 0.0, 0.5, 0.5))).unwrap();
        let BatchResult::Count(ids) = result else { panic!("wrong result type") };
        assert_eq!(ids[TOTAL_GROUP_KEY], vec![8]);
        assert_eq!(ids["a"], vec![8]);
    }

    #[test]
    fn test_count_requires_feature_id() {
        let mut feature = batch_feature(Feature::new(Geometry::point(0.5, 0.5)), 0, false, false);
        feature.feature.oidx = None;
        let err = run_job(&request(Operation::Count, vec![feature], MultiPolygon::new(vec![]))).unwrap_err();
        assert!(matches!(err, OverlayError::MissingFeatureId));
    }

    #[test]
    fn test_presence() {
        let inside = batch_feature(Feature::new(Geometry::point(0.2, 0.2)), 0, false, true);
        let difference = rect(0.0, 0.0, 0.5, 0.5);
        let result = run_job(&request(Operation::Presence, vec![inside.clone()], difference.clone())).unwrap();
        assert_eq!(result, BatchResult::Presence(false));

        let outside_difference = batch_feature(Feature::new(Geometry::point(0.7, 0.7)), 1, false, true);
        let result = run_job(&request(Operation::Presence, vec![inside, outside_difference], difference)).unwrap();
        assert_eq!(result, BatchResult::Presence(true));
    }

    #[test]
    fn test_presence_table_stops_at_limit() {
        let features = (0..4)
            .map(|i| batch_feature(Feature::new(Geometry::point(0.5, 0.5)).property("name", format!("f{i}")), i, false, false))
            .collect();
        let result = run_job(&request(Operation::PresenceTable, features, MultiPolygon::new(vec![]))).unwrap();
        let BatchResult::PresenceTable(table) = result else { panic!("wrong result type") };
        assert!(table.exceeded_limit);
        assert_eq!(table.values.len(), 2);
        assert_eq!(table.values[0]["__id"], 0);
        assert_eq!(table.values[1]["name"], "f1");
    }

    #[test]
    fn test_column_values_weights_by_overlap() {
        let features = vec![
            batch_feature(Feature::new(Geometry::rectangle(0.5, 0.0, 2.0, 1.0)).property("depth", 10).property("class", "a"), 0, true, false),
            batch_feature(Feature::new(Geometry::rectangle(1.5, 0.0, 2.0, 1.0)).property("depth", 20), 1, true, false),
            batch_feature(Feature::new(Geometry::point(0.5, 0.5)).property("depth", "shallow"), 2, false, false),
        ];
        let result = run_job(&request(Operation::ColumnValues, features, MultiPolygon::new(vec![]))).unwrap();
        let BatchResult::ColumnValues(samples) = result else { panic!("wrong result type") };
        let total = &samples[TOTAL_GROUP_KEY]["depth"];
        assert_eq!(total.len(), 2);
        assert_eq!(total[0].0, Value::from(10));
        let expected = area_km2(&rect(0.5, 0.0, 1.0, 1.0));
        assert!((total[0].1.unwrap() - expected).abs() / expected < 1e-6);
        assert_eq!(total[1], (Value::from("shallow"), None));
        assert_eq!(samples["a"]["depth"].len(), 1);
    }

    #[test]
    fn test_column_values_requires_property() {
        let mut req = request(Operation::ColumnValues, vec![], MultiPolygon::new(vec![]));
        req.options = Arc::new(OperationOptions::default());
        assert!(matches!(run_job(&req), Err(OverlayError::MissingColumnProperty)));
    }
}
