//! Value overlap between two columns' distinct-value sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::profile::{value_hash, ValueHash, ValueSet};
use crate::profiling::{DEFAULT_MAX_DISTINCT_VALUES, DEFAULT_MAX_KEY_VALUES};

/// Default number of sampled values a containment estimate needs.
pub const DEFAULT_MIN_SAMPLED_VALUES: usize = 10;

/// Containment and similarity of two distinct-value sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlapStats {
    /// `|A ∩ B| / |A|`, 0 when A is empty
    pub containment_a_in_b: f64,
    /// `|A ∩ B| / |B|`, 0 when B is empty
    pub containment_b_in_a: f64,
    /// `|A ∩ B| / |A ∪ B|`, 0 when both are empty
    pub jaccard: f64,
    pub intersection: usize,
    /// Computed from capped sets
    pub approximate: bool,
    /// False when sampling left too few of A's values to judge containment
    #[serde(default = "verified")]
    pub verifiable: bool,
}

fn verified() -> bool {
    true
}

/// Overlap of two ordered sets.
pub fn overlap<V: Ord>(a: &BTreeSet<V>, b: &BTreeSet<V>, approximate: bool) -> OverlapStats {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|v| large.contains(*v)).count();
    let union = a.len() + b.len() - intersection;

    OverlapStats {
        containment_a_in_b: ratio(intersection, a.len()),
        containment_b_in_a: ratio(intersection, b.len()),
        jaccard: ratio(intersection, union),
        intersection,
        approximate,
        verifiable: true,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Computes [`OverlapStats`] over [`ValueSet`]s, enforcing a size cap.
#[derive(Debug, Clone, Copy)]
pub struct ValueOverlapEstimator {
    max_values: usize,
    max_key_values: usize,
    min_sampled_values: usize,
}

impl Default for ValueOverlapEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DISTINCT_VALUES)
    }
}

impl ValueOverlapEstimator {
    pub fn new(max_values: usize) -> Self {
        Self {
            max_values,
            max_key_values: DEFAULT_MAX_KEY_VALUES,
            min_sampled_values: DEFAULT_MIN_SAMPLED_VALUES,
        }
    }

    /// Cap applied to the key side in [`Self::estimate_key`].
    pub fn with_max_key_values(mut self, cap: usize) -> Self {
        self.max_key_values = cap;
        self
    }

    /// Sampled values of A below which a restricted estimate is unverifiable.
    pub fn with_min_sampled_values(mut self, count: usize) -> Self {
        self.min_sampled_values = count;
        self
    }

    pub fn max_values(&self) -> usize {
        self.max_values
    }

    /// Overlap of `a` against `b`.
    ///
    /// Sets above the cap are cut down to their `max_values` smallest-hash
    /// values. When either side is sampled, both sides are restricted to the
    /// hashes every sample still covers, so a value missing from one side is
    /// really missing from that column. The result is then flagged approximate.
    ///
    /// When the restriction leaves fewer than `min_sampled_values` of A's
    /// values (and not all of them), containment of A is not judged and the
    /// result is flagged unverifiable.
    pub fn estimate(&self, a: &ValueSet, b: &ValueSet) -> OverlapStats {
        self.estimate_capped(a, self.max_values, b, self.max_values)
    }

    /// Overlap of a candidate foreign key `child` against a key column.
    ///
    /// The key side is held to `max_key_values` instead of `max_values`, so
    /// a complete child is tested against the whole key set whenever the
    /// profile kept it.
    pub fn estimate_key(&self, child: &ValueSet, key: &ValueSet) -> OverlapStats {
        let key_cap = self.max_key_values.max(self.max_values);
        self.estimate_capped(child, self.max_values, key, key_cap)
    }

    fn estimate_capped(
        &self,
        a: &ValueSet,
        cap_a: usize,
        b: &ValueSet,
        cap_b: usize,
    ) -> OverlapStats {
        let bound = match (bound_of(a, cap_a), bound_of(b, cap_b)) {
            (None, None) => return overlap(a.values(), b.values(), false),
            (Some(x), Some(y)) => x.min(y),
            (Some(x), None) | (None, Some(x)) => x,
        };

        let sampled_a = restrict(a, &bound);
        let sampled_b = restrict(b, &bound);
        let mut stats = overlap(&sampled_a, &sampled_b, true);
        stats.verifiable = a.is_empty()
            || sampled_a.len() == a.len()
            || (!sampled_a.is_empty() && sampled_a.len() >= self.min_sampled_values);
        stats
    }
}

/// Hash bound of `set` once `cap` is applied; `None` when it is complete.
fn bound_of(set: &ValueSet, cap: usize) -> Option<ValueHash> {
    if set.len() > cap {
        let mut hashes: Vec<ValueHash> = set.values().iter().map(|v| value_hash(v)).collect();
        hashes.sort_unstable();
        let kept = hashes.get(cap.saturating_sub(1)).copied();
        return kept.into_iter().chain(set.hash_bound()).min();
    }
    set.hash_bound()
}

fn restrict<'a>(set: &'a ValueSet, bound: &ValueHash) -> BTreeSet<&'a String> {
    set.values()
        .iter()
        .filter(|v| value_hash(v) <= *bound)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> ValueSet {
        ValueSet::collect(values.iter().copied(), 1000)
    }

    #[test]
    fn test_containment() {
        let child = set(&["NYSE", "NASDAQ"]);
        let parent = set(&["NYSE", "NASDAQ", "AMEX"]);
        let stats = ValueOverlapEstimator::default().estimate(&child, &parent);

        assert_eq!(stats.containment_a_in_b, 1.0);
        assert!((stats.containment_b_in_a - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.jaccard - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.intersection, 2);
        assert!(!stats.approximate);
    }

    #[test]
    fn test_empty_sets() {
        let empty = set(&[]);
        let other = set(&["a"]);
        let stats = ValueOverlapEstimator::default().estimate(&empty, &other);
        assert_eq!(stats.containment_a_in_b, 0.0);
        assert_eq!(stats.containment_b_in_a, 0.0);
        assert_eq!(stats.jaccard, 0.0);

        let stats = ValueOverlapEstimator::default().estimate(&empty, &empty);
        assert_eq!(stats.jaccard, 0.0);
    }

    #[test]
    fn test_cap_flags_approximate() {
        let a = set(&["1", "2", "3", "4"]);
        let stats = ValueOverlapEstimator::new(2).estimate(&a, &a.clone());
        assert!(stats.approximate);
        assert_eq!(stats.containment_a_in_b, 1.0);
        assert_eq!(stats.intersection, 2);

        let b = set(&["1", "2"]);
        let capped = ValueSet::collect(["x", "y", "z"], 2);
        let stats = ValueOverlapEstimator::default().estimate(&capped, &b);
        assert!(stats.approximate);
        assert_eq!(stats.intersection, 0);
    }

    #[test]
    fn test_capped_parent_still_contains_child() {
        let parent: Vec<String> = (0..300).map(|i| format!("C{i:04}")).collect();
        let child: Vec<String> = (0..300).step_by(2).map(|i| format!("C{i:04}")).collect();

        let parent = ValueSet::collect(parent, 100);
        let child = ValueSet::collect(child, 100);
        assert!(parent.is_approximate());
        assert!(child.is_approximate());

        let stats = ValueOverlapEstimator::new(100).estimate(&child, &parent);
        assert!(stats.approximate);
        assert!(stats.intersection > 0);
        assert_eq!(stats.containment_a_in_b, 1.0);
        assert!(stats.containment_b_in_a < 1.0);
    }

    #[test]
    fn test_estimator_cap_samples_complete_sets() {
        let parent: Vec<String> = (0..500).map(|i| i.to_string()).collect();
        let child: Vec<String> = (0..500).step_by(5).map(|i| i.to_string()).collect();

        let stats = ValueOverlapEstimator::new(50).estimate(
            &ValueSet::collect(child, 1000),
            &ValueSet::collect(parent, 1000),
        );
        assert!(stats.approximate);
        assert_eq!(stats.containment_a_in_b, 1.0);
    }

    fn key_range(step: usize) -> Vec<String> {
        (0..10_000).step_by(step).map(|i| format!("C{i:05}")).collect()
    }

    #[test]
    fn test_sparse_sample_is_unverifiable() {
        let parent = ValueSet::collect(key_range(1), 100);
        let child = ValueSet::collect(key_range(500), 100);
        assert_eq!(child.len(), 20);
        assert!(!child.is_approximate());

        let stats = ValueOverlapEstimator::new(100).estimate_key(&child, &parent);
        assert!(stats.approximate);
        assert!(!stats.verifiable);
        assert!(stats.intersection <= 1);
    }

    #[test]
    fn test_key_side_uses_key_cap() {
        let parent = ValueSet::collect(key_range(1), 20_000);
        let child = ValueSet::collect(key_range(500), 100);

        let estimator = ValueOverlapEstimator::new(100);
        let stats = estimator.estimate_key(&child, &parent);
        assert!(!stats.approximate);
        assert!(stats.verifiable);
        assert_eq!(stats.containment_a_in_b, 1.0);
        assert_eq!(stats.intersection, 20);

        // the plain estimate caps both sides alike
        let stats = estimator.estimate(&child, &parent);
        assert!(stats.approximate);
        assert!(!stats.verifiable);

        let stats = estimator.with_max_key_values(100).estimate_key(&child, &parent);
        assert!(!stats.verifiable);
    }

    #[test]
    fn test_small_complete_sample_stays_verifiable() {
        let a = set(&["1", "2", "3", "4"]);
        let stats = ValueOverlapEstimator::new(2)
            .with_min_sampled_values(1)
            .estimate(&a, &a.clone());
        assert!(stats.verifiable);

        let stats = ValueOverlapEstimator::new(2).estimate(&a, &a.clone());
        assert!(!stats.verifiable);

        let empty = set(&[]);
        let capped = ValueSet::collect(["x", "y", "z"], 2);
        assert!(ValueOverlapEstimator::default().estimate(&empty, &capped).verifiable);
    }

    #[test]
    fn test_generic_overlap() {
        let a: BTreeSet<i64> = [1, 2, 3].into_iter().collect();
        let b: BTreeSet<i64> = [2, 3, 4, 5].into_iter().collect();
        let stats = overlap(&a, &b, false);
        assert!((stats.containment_a_in_b - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.containment_b_in_a, 0.5);
        assert!((stats.jaccard - 0.4).abs() < 1e-12);
    }
}
