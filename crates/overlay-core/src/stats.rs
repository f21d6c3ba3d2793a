//! Combination of partial metrics.
//!
//! Partial results from batches and fragments are merged with rules that are
//! associative and commutative, so the order in which partials arrive never
//! changes the result. Means are weighted, never averaged.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::error::{OverlayError, Result};
use crate::models::{
    ColumnValueStats, CountValue, DistanceToShore, DistinctValueStats, GeographyId,
    GroupedValues, HistogramEntry, Metric, MetricSubject, NumberColumnValueStats,
    PresenceTableValue, RasterBandStats, RasterStatsValue, SubjectMetric,
};
use crate::unique_ids::UniqueIdIndex;

/// Histogram size cap used when merging partials
pub const MAX_HISTOGRAM_ENTRIES: usize = 200;

/// Row cap for combined presence tables
pub const DEFAULT_RESULTS_LIMIT: usize = 50;

/// Downsample a `[value, count]` histogram to at most `max_entries` entries.
///
/// Values are binned uniformly across the observed min..max range so that
/// sparse and dense regions of the range both stay represented.
pub fn downsample_histogram(histogram: &[HistogramEntry], max_entries: usize) -> Vec<HistogramEntry> {
    if histogram.len() <= max_entries || max_entries == 0 {
        return histogram.to_vec();
    }

    let mut sorted = histogram.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let min = sorted[0].0;
    let max = sorted[sorted.len() - 1].0;

    if !min.is_finite() || !max.is_finite() || min == max || max_entries == 1 {
        let total: f64 = sorted.iter().map(|(_, c)| c).sum();
        return vec![(min, total)];
    }

    let bins = max_entries;
    let span = max - min;
    let mut counts = vec![0.0; bins];
    for (value, count) in &sorted {
        let normalized = (value - min) / span;
        let idx = (normalized * (bins - 1) as f64).round();
        let idx = (idx.max(0.0) as usize).min(bins - 1);
        counts[idx] += count;
    }

    counts
        .into_iter()
        .enumerate()
        .filter(|(_, count)| *count != 0.0)
        .map(|(i, count)| (min + span * i as f64 / (bins - 1) as f64, count))
        .collect()
}

/// Merge histograms by exact value, sorted by value
fn merge_histograms<'a, I: IntoIterator<Item = &'a [HistogramEntry]>>(
    histograms: I,
) -> Vec<HistogramEntry> {
    let mut merged: BTreeMap<u64, HistogramEntry> = BTreeMap::new();
    for histogram in histograms {
        for &(value, count) in histogram {
            merged.entry(sortable_bits(value)).or_insert((value, 0.0)).1 += count;
        }
    }
    merged.into_values().collect()
}

/// Order-preserving key for an f64 so a BTreeMap sorts values numerically
fn sortable_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// Combine band statistics from several fragments.
///
/// The mean is recomputed as `sum / count` rather than averaged.
pub fn combine_raster_band_stats(stats: &[RasterBandStats]) -> Result<RasterBandStats> {
    match stats {
        [] => Err(OverlayError::EmptyMetricSet),
        [single] => Ok(single.clone()),
        _ => {
            let count: u64 = stats.iter().map(|s| s.count).sum();
            let sum: f64 = stats.iter().map(|s| s.sum).sum();
            let invalid: u64 = stats.iter().map(|s| s.invalid).sum();
            let min = stats.iter().map(|s| s.min).fold(f64::INFINITY, f64::min);
            let max = stats.iter().map(|s| s.max).fold(f64::NEG_INFINITY, f64::max);
            let histogram = merge_histograms(stats.iter().map(|s| s.histogram.as_slice()));

            Ok(RasterBandStats {
                count,
                min,
                max,
                mean: if count > 0 { sum / count as f64 } else { f64::NAN },
                median: f64::NAN,
                range: max - min,
                histogram,
                invalid,
                sum,
            })
        }
    }
}

/// Combine numeric column statistics.
///
/// Partials are weighted by `total_area_sq_km` when every partial carries a
/// positive area, otherwise by count. The standard deviation is recovered from
/// the weighted second moment `E[x^2] = variance + mean^2`.
pub fn combine_number_column_value_stats(
    stats: &[NumberColumnValueStats],
) -> Option<NumberColumnValueStats> {
    match stats {
        [] => return None,
        [single] => return Some(single.clone()),
        _ => {}
    }

    let use_area_weight = stats.iter().all(|s| s.total_area_sq_km.is_some_and(|a| a > 0.0));

    let mut count = 0u64;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut mean_numerator = 0.0;
    let mut mean_weight = 0.0;
    let mut second_moment = 0.0;
    let mut moment_weight = 0.0;
    let mut included: Vec<&[HistogramEntry]> = Vec::with_capacity(stats.len());

    for s in stats {
        let weight = if use_area_weight {
            s.total_area_sq_km.unwrap_or(0.0)
        } else {
            s.count as f64
        };
        if !weight.is_finite() || weight <= 0.0 {
            continue;
        }

        count += s.count;
        sum += s.sum;
        min = min.min(s.min);
        max = max.max(s.max);
        included.push(s.histogram.as_slice());

        // non-finite partials still contribute to count and sum
        if s.mean.is_finite() {
            mean_numerator += s.mean * weight;
            mean_weight += weight;
            if s.std_dev.is_finite() {
                second_moment += (s.std_dev * s.std_dev + s.mean * s.mean) * weight;
                moment_weight += weight;
            }
        }
    }

    let mut mean = f64::NAN;
    let mut std_dev = f64::NAN;
    if mean_weight > 0.0 {
        mean = mean_numerator / mean_weight;
        if moment_weight > 0.0 {
            let variance = second_moment / moment_weight - mean * mean;
            std_dev = variance.max(0.0).sqrt();
        }
    } else if count > 0 {
        mean = sum / count as f64;
    }

    let included_any = !included.is_empty();
    let merged = merge_histograms(included);
    let count_distinct = merged.len();
    let histogram = downsample_histogram(&merged, MAX_HISTOGRAM_ENTRIES);

    let positive_area: f64 = stats
        .iter()
        .filter_map(|s| s.total_area_sq_km)
        .filter(|a| *a > 0.0)
        .sum();

    Some(NumberColumnValueStats {
        count,
        min: if included_any { min } else { f64::NAN },
        max: if included_any { max } else { f64::NAN },
        mean,
        std_dev,
        histogram,
        count_distinct,
        sum,
        total_area_sq_km: (positive_area > 0.0).then_some(positive_area),
    })
}

/// Combine distinct-value counts of string or boolean attributes.
///
/// The output type follows the first partial.
pub fn combine_string_or_boolean_column_value_stats(
    stats: &[ColumnValueStats],
) -> Option<ColumnValueStats> {
    match stats {
        [] => return None,
        [single] => return Some(single.clone()),
        _ => {}
    }

    let mut distinct_values: Vec<(Value, f64)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for s in stats {
        let partial = match s {
            ColumnValueStats::String(d) | ColumnValueStats::Boolean(d) => d,
            ColumnValueStats::Number(_) => continue,
        };
        for (value, count) in &partial.distinct_values {
            let key = value.to_string();
            match positions.get(&key) {
                Some(&i) => distinct_values[i].1 += count,
                None => {
                    positions.insert(key, distinct_values.len());
                    distinct_values.push((value.clone(), *count));
                }
            }
        }
    }

    let combined = DistinctValueStats { count_distinct: distinct_values.len(), distinct_values };
    Some(match stats[0] {
        ColumnValueStats::Boolean(_) => ColumnValueStats::Boolean(combined),
        _ => ColumnValueStats::String(combined),
    })
}

/// Combine grouped values over the union of their group keys
pub fn combine_grouped_values<T, R, F>(values: &[&GroupedValues<T>], mut combine: F) -> Result<GroupedValues<R>>
where
    F: FnMut(&[&T]) -> Result<R>,
{
    let keys: BTreeSet<&String> = values.iter().flat_map(|v| v.keys()).collect();
    let mut result = GroupedValues::new();
    for key in keys {
        let group: Vec<&T> = values.iter().filter_map(|v| v.get(key)).collect();
        if !group.is_empty() {
            result.insert(key.clone(), combine(&group)?);
        }
    }
    Ok(result)
}

/// Combine same-typed metrics computed for separate fragments into one
pub fn combine_metrics_for_fragments(metrics: &[Metric]) -> Result<Metric> {
    combine_metrics_for_fragments_with_limit(metrics, DEFAULT_RESULTS_LIMIT)
}

/// Like [`combine_metrics_for_fragments`], capping presence tables at `results_limit` rows
pub fn combine_metrics_for_fragments_with_limit(metrics: &[Metric], results_limit: usize) -> Result<Metric> {
    let first = metrics.first().ok_or(OverlayError::EmptyMetricSet)?;

    let types: BTreeSet<&'static str> = metrics.iter().map(Metric::type_name).collect();
    if types.len() > 1 {
        return Err(OverlayError::MetricTypeMismatch {
            found: types.into_iter().collect::<Vec<_>>().join(", "),
        });
    }

    match first {
        Metric::RasterStats(_) => {
            let mut bands = Vec::with_capacity(metrics.len());
            for metric in metrics {
                if let Metric::RasterStats(value) = metric {
                    match value.bands.as_slice() {
                        [band] => bands.push(band.clone()),
                        [] => bands.push(RasterBandStats::empty()),
                        _ => return Err(OverlayError::MultipleRasterBands),
                    }
                }
            }
            Ok(Metric::RasterStats(RasterStatsValue { bands: vec![combine_raster_band_stats(&bands)?] }))
        }
        Metric::ColumnValues(_) => {
            let values: Vec<_> = metrics
                .iter()
                .filter_map(|m| match m {
                    Metric::ColumnValues(v) => Some(v),
                    _ => None,
                })
                .collect();
            let combined = combine_grouped_values(&values, |entries| Ok(combine_attribute_stats(entries)))?;
            Ok(Metric::ColumnValues(combined))
        }
        Metric::TotalArea(_) => Ok(Metric::TotalArea(
            metrics
                .iter()
                .map(|m| match m {
                    Metric::TotalArea(v) => *v,
                    _ => 0.0,
                })
                .sum(),
        )),
        Metric::Count(_) => {
            let values: Vec<_> = metrics
                .iter()
                .filter_map(|m| match m {
                    Metric::Count(v) => Some(v),
                    _ => None,
                })
                .collect();
            let combined = combine_grouped_values(&values, |entries| {
                let index = UniqueIdIndex::merge(entries.iter().map(|e| &e.unique_id_index));
                Ok(CountValue { count: index.count(), unique_id_index: index })
            })?;
            Ok(Metric::Count(combined))
        }
        Metric::DistanceToShore(_) => {
            let mut closest: Option<&DistanceToShore> = None;
            for metric in metrics {
                if let Metric::DistanceToShore(value) = metric {
                    // ties keep the first candidate
                    if closest.map_or(true, |current| value.meters < current.meters) {
                        closest = Some(value);
                    }
                }
            }
            match closest {
                Some(value) => Ok(Metric::DistanceToShore(value.clone())),
                None => Err(OverlayError::EmptyMetricSet),
            }
        }
        Metric::Presence(_) => Ok(Metric::Presence(
            metrics.iter().any(|m| matches!(m, Metric::Presence(true))),
        )),
        Metric::PresenceTable(_) => {
            let mut combined = PresenceTableValue::default();
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for metric in metrics {
                if let Metric::PresenceTable(value) = metric {
                    combined.exceeded_limit |= value.exceeded_limit;
                    for row in &value.values {
                        if seen.insert(PresenceTableValue::row_key(row)) {
                            combined.values.push(row.clone());
                        }
                    }
                }
            }
            combined.apply_limit(results_limit);
            Ok(Metric::PresenceTable(combined))
        }
        Metric::OverlayArea(_) => {
            let values: Vec<_> = metrics
                .iter()
                .filter_map(|m| match m {
                    Metric::OverlayArea(v) => Some(v),
                    _ => None,
                })
                .collect();
            let combined = combine_grouped_values(&values, |entries| Ok(entries.iter().copied().sum::<f64>()))?;
            Ok(Metric::OverlayArea(combined))
        }
    }
}

/// Combine the per-attribute statistics of one group
fn combine_attribute_stats(
    entries: &[&BTreeMap<String, ColumnValueStats>],
) -> BTreeMap<String, ColumnValueStats> {
    let attributes: BTreeSet<&String> = entries.iter().flat_map(|e| e.keys()).collect();
    let mut stats = BTreeMap::new();
    for attr in attributes {
        let values: Vec<&ColumnValueStats> = entries.iter().filter_map(|e| e.get(attr)).collect();
        let Some(first) = values.first() else { continue };
        let combined = if first.is_number() {
            let numbers: Vec<NumberColumnValueStats> = values
                .iter()
                .filter_map(|v| match v {
                    ColumnValueStats::Number(n) => Some(n.clone()),
                    _ => None,
                })
                .collect();
            combine_number_column_value_stats(&numbers).map(ColumnValueStats::Number)
        } else {
            let owned: Vec<ColumnValueStats> = values.into_iter().cloned().collect();
            combine_string_or_boolean_column_value_stats(&owned)
        };
        if let Some(combined) = combined {
            stats.insert(attr.clone(), combined);
        }
    }
    stats
}

/// Turn raw `[value, weight]` samples into final column statistics.
///
/// Weights are overlap sizes; entries without a positive weight count once.
pub fn calculate_column_value_stats(
    samples: &[(Value, Option<f64>)],
    max_histogram_entries: usize,
) -> ColumnValueStats {
    let Some((first, _)) = samples.first() else {
        return ColumnValueStats::Number(NumberColumnValueStats {
            count: 0,
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            std_dev: f64::NAN,
            histogram: Vec::new(),
            count_distinct: 0,
            sum: 0.0,
            total_area_sq_km: None,
        });
    };

    if first.is_string() || first.is_boolean() {
        let mut distinct_values: Vec<(Value, f64)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (value, _) in samples {
            let key = value.to_string();
            match positions.get(&key) {
                Some(&i) => distinct_values[i].1 += 1.0,
                None => {
                    positions.insert(key, distinct_values.len());
                    distinct_values.push((value.clone(), 1.0));
                }
            }
        }
        let stats = DistinctValueStats { count_distinct: distinct_values.len(), distinct_values };
        return if first.is_boolean() {
            ColumnValueStats::Boolean(stats)
        } else {
            ColumnValueStats::String(stats)
        };
    }

    let numeric: Vec<(f64, Option<f64>)> = samples
        .iter()
        .filter_map(|(value, weight)| {
            let weight = weight.filter(|w| w.is_finite() && *w > 0.0);
            value.as_f64().map(|v| (v, weight))
        })
        .collect();
    let count = numeric.len();

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut histogram: BTreeMap<u64, HistogramEntry> = BTreeMap::new();

    for &(value, weight) in &numeric {
        min = min.min(value);
        max = max.max(value);
        sum += value;
        if let Some(w) = weight {
            if value.is_finite() {
                weighted_sum += value * w;
                total_weight += w;
            }
        }
        histogram.entry(sortable_bits(value)).or_insert((value, 0.0)).1 += weight.unwrap_or(1.0);
    }

    let mean = if total_weight > 0.0 {
        weighted_sum / total_weight
    } else if count > 0 {
        sum / count as f64
    } else {
        f64::NAN
    };

    let variance = if total_weight > 0.0 {
        numeric
            .iter()
            .filter_map(|&(value, weight)| weight.map(|w| w * (value - mean).powi(2)))
            .sum::<f64>()
            / total_weight
    } else if count > 0 {
        numeric.iter().map(|(value, _)| (value - mean).powi(2)).sum::<f64>() / count as f64
    } else {
        f64::NAN
    };

    let count_distinct = histogram.len();
    let merged: Vec<HistogramEntry> = histogram.into_values().collect();

    ColumnValueStats::Number(NumberColumnValueStats {
        count: count as u64,
        min: if count > 0 { min } else { f64::NAN },
        max: if count > 0 { max } else { f64::NAN },
        mean,
        std_dev: variance.sqrt(),
        histogram: downsample_histogram(&merged, max_histogram_entries),
        count_distinct,
        sum,
        total_area_sq_km: (total_weight > 0.0).then_some(total_weight),
    })
}

/// Find the geography present in every fragment metric
pub fn find_primary_geography_id(metrics: &[SubjectMetric]) -> Result<GeographyId> {
    let fragments: Vec<&[GeographyId]> = metrics
        .iter()
        .filter_map(|m| match &m.subject {
            MetricSubject::Fragment { geographies, .. } => Some(geographies.as_slice()),
            MetricSubject::Geography { .. } => None,
        })
        .collect();

    let mut occurrences: BTreeMap<GeographyId, usize> = BTreeMap::new();
    for geographies in &fragments {
        let unique: BTreeSet<&GeographyId> = geographies.iter().collect();
        for id in unique {
            *occurrences.entry(*id).or_default() += 1;
        }
    }

    let mut in_all = occurrences
        .into_iter()
        .filter(|(_, n)| *n == fragments.len())
        .map(|(id, _)| id);
    match (in_all.next(), in_all.next()) {
        (Some(id), None) => Ok(id),
        (Some(_), Some(_)) => Err(OverlayError::MultiplePrimaryGeographies),
        (None, _) => Err(OverlayError::NoPrimaryGeography),
    }
}

/// Stable 8-character hash of a metric dependency description.
///
/// Object keys are sorted, the `hash` key is ignored and string arrays are
/// sorted, so equivalent dependencies always hash the same.
pub fn hash_metric_dependency(dependency: &Value) -> String {
    let mut canonical = String::new();
    stable_serialize(dependency, &mut canonical);
    format!("{:08x}", fnv1a(&canonical))
}

fn stable_serialize(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            let mut items: Vec<&Value> = items.iter().collect();
            if items.iter().all(|v| v.is_string()) {
                items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            }
            out.push('[');
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                stable_serialize(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| k.as_str() != "hash").collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                stable_serialize(&map[key], out);
            }
            out.push('}');
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => out.push_str(&format!("{}", f as i64)),
            _ => out.push_str(&n.to_string()),
        },
        other => out.push_str(&other.to_string()),
    }
}

/// 32-bit FNV-1a over UTF-16 code units
fn fnv1a(input: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for unit in input.encode_utf16() {
        hash ^= unit as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}
