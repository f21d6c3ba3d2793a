//! Compact deduplicated sets of integer feature identifiers.

use serde::{Deserialize, Serialize};

/// Sorted ranges plus isolated individuals.
///
/// Ranges are inclusive, sorted, and separated by gaps of at least two.
/// Individuals are sorted and never adjacent to a range or to each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueIdIndex {
    pub ranges: Vec<[i64; 2]>,
    pub individuals: Vec<i64>,
}

impl UniqueIdIndex {
    /// Build an index from any collection of ids, duplicates allowed
    pub fn from_ids<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        let mut sorted: Vec<i64> = ids.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        let intervals = sorted.into_iter().map(|id| [id, id]).collect();
        Self::from_sorted_intervals(intervals)
    }

    /// Number of distinct ids
    pub fn count(&self) -> u64 {
        let in_ranges: u64 = self.ranges.iter().map(|[s, e]| (e - s + 1) as u64).sum();
        in_ranges + self.individuals.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.individuals.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.individuals.binary_search(&id).is_ok()
            || self.ranges.iter().any(|[s, e]| *s <= id && id <= *e)
    }

    /// Merge any number of indexes, coalescing overlapping and adjacent ids
    pub fn merge<'a, I: IntoIterator<Item = &'a UniqueIdIndex>>(indexes: I) -> Self {
        let mut intervals: Vec<[i64; 2]> = Vec::new();
        for index in indexes {
            intervals.extend(index.ranges.iter().copied());
            intervals.extend(index.individuals.iter().map(|&id| [id, id]));
        }
        intervals.sort_unstable_by_key(|iv| (iv[0], iv[1]));
        Self::from_sorted_intervals(intervals)
    }

    fn from_sorted_intervals(intervals: Vec<[i64; 2]>) -> Self {
        let mut coalesced: Vec<[i64; 2]> = Vec::with_capacity(intervals.len());
        for [start, end] in intervals {
            match coalesced.last_mut() {
                Some(current) if start <= current[1].saturating_add(1) => {
                    current[1] = current[1].max(end);
                }
                _ => coalesced.push([start, end]),
            }
        }

        let mut index = UniqueIdIndex::default();
        for [start, end] in coalesced {
            if start == end {
                index.individuals.push(start);
            } else {
                index.ranges.push([start, end]);
            }
        }
        index
    }
}

/// Build an index from a list of ids
pub fn create_unique_id_index<I: IntoIterator<Item = i64>>(ids: I) -> UniqueIdIndex {
    UniqueIdIndex::from_ids(ids)
}

pub fn merge_unique_id_indexes(indexes: &[UniqueIdIndex]) -> UniqueIdIndex {
    UniqueIdIndex::merge(indexes)
}

pub fn count_unique_ids(index: &UniqueIdIndex) -> u64 {
    index.count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_create_empty() {
        assert_eq!(create_unique_id_index(Vec::new()), UniqueIdIndex::default());
    }

    #[test]
    fn test_create_mixed_ranges_and_individuals() {
        let index = create_unique_id_index(vec![1, 2, 3, 7, 10, 11, 12, 15]);
        assert_eq!(index.ranges, vec![[1, 3], [10, 12]]);
        assert_eq!(index.individuals, vec![7, 15]);
        assert_eq!(index.count(), 8);
    }

    #[test]
    fn test_create_removes_duplicates_and_sorts() {
        let index = create_unique_id_index(vec![5, 1, 3, 2, 4, 4, 2]);
        assert_eq!(index.ranges, vec![[1, 5]]);
        assert!(index.individuals.is_empty());
    }

    #[test]
    fn test_negative_ids() {
        let index = create_unique_id_index(vec![-5, -4, -3, -1]);
        assert_eq!(index.ranges, vec![[-5, -3]]);
        assert_eq!(index.individuals, vec![-1]);
    }

    #[test]
    fn test_merge_overlapping_ranges() {
        let a = UniqueIdIndex { ranges: vec![[1, 5]], individuals: vec![] };
        let b = UniqueIdIndex { ranges: vec![[3, 7]], individuals: vec![] };
        let merged = merge_unique_id_indexes(&[a, b]);
        assert_eq!(merged, UniqueIdIndex { ranges: vec![[1, 7]], individuals: vec![] });
    }

    #[test]
    fn test_merge_adjacent_ranges() {
        let a = UniqueIdIndex { ranges: vec![[1, 5]], individuals: vec![] };
        let b = UniqueIdIndex { ranges: vec![[6, 10]], individuals: vec![] };
        assert_eq!(merge_unique_id_indexes(&[a, b]).ranges, vec![[1, 10]]);
    }

    #[test]
    fn test_merge_promotes_adjacent_individuals() {
        let a = UniqueIdIndex { ranges: vec![[1, 4], [10, 12]], individuals: vec![20] };
        let b = UniqueIdIndex { ranges: vec![[5, 7]], individuals: vec![11, 21] };
        let merged = merge_unique_id_indexes(&[a, b]);
        assert_eq!(merged.ranges, vec![[1, 7], [10, 12], [20, 21]]);
        assert!(merged.individuals.is_empty());
        assert_eq!(count_unique_ids(&merged), 12);
    }

    #[test]
    fn test_merge_keeps_isolated_individuals() {
        let a = UniqueIdIndex { ranges: vec![[1, 5]], individuals: vec![10] };
        let b = UniqueIdIndex { ranges: vec![], individuals: vec![6, 7, 15] };
        let merged = merge_unique_id_indexes(&[a, b]);
        assert_eq!(merged.ranges, vec![[1, 7]]);
        assert_eq!(merged.individuals, vec![10, 15]);
    }

    proptest! {
        #[test]
        fn test_merge_count_matches_set_union(
            a in proptest::collection::vec(-50i64..50, 0..40),
            b in proptest::collection::vec(-50i64..50, 0..40),
        ) {
            let ia = create_unique_id_index(a.clone());
            let ib = create_unique_id_index(b.clone());
            let merged = UniqueIdIndex::merge([&ia, &ib]);

            let union: BTreeSet<i64> = a.iter().chain(b.iter()).copied().collect();
            prop_assert_eq!(merged.count(), union.len() as u64);
            prop_assert!(merged.count() <= ia.count() + ib.count());

            let sa: BTreeSet<i64> = a.into_iter().collect();
            let sb: BTreeSet<i64> = b.into_iter().collect();
            let disjoint = sa.is_disjoint(&sb);
            prop_assert_eq!(merged.count() == ia.count() + ib.count(), disjoint);

            for id in &union {
                prop_assert!(merged.contains(*id));
            }
            for pair in merged.ranges.windows(2) {
                prop_assert!(pair[1][0] - pair[0][1] >= 2);
            }
        }
    }
}
