//! Property-based tests for the relationship engine.
//!
//! ## Test Categories
//!
//! ### 1. Overlap
//! - Containment and Jaccard ratios stay within `[0, 1]`
//! - Containment matches the intersection size, and Jaccard never exceeds it
//!
//! ### 2. Cardinality
//! - Classification is a pure lookup on the two uniqueness sides
//!
//! ### 3. Diagram output
//! - Mermaid output does not depend on the order relationships were found in

use std::collections::BTreeSet;

use proptest::prelude::*;
use term_profiler::profile::ValueSet;
use term_profiler::relationships::{
    overlap, Cardinality, CardinalityClassifier, Relationship, RelationshipGraphBuilder,
    RelationshipSource, ValueOverlapEstimator,
};

fn relationship(parent: &str, child: &str, cardinality: Cardinality) -> Relationship {
    let key = format!("{}_id", parent.trim_end_matches('s'));
    Relationship {
        parent_entity: format!("{parent}.csv"),
        parent_column: key.clone(),
        child_entity: format!("{child}.csv"),
        child_column: key,
        cardinality,
        confidence: 1.0,
        source: RelationshipSource::Auto,
    }
}

fn warehouse() -> Vec<Relationship> {
    vec![
        relationship("customers", "orders", Cardinality::OneToMany),
        relationship("orders", "order_items", Cardinality::OneToMany),
        relationship("products", "order_items", Cardinality::OneToMany),
        relationship("suppliers", "products", Cardinality::OneToMany),
        relationship("customers", "loyalty_cards", Cardinality::OneToOne),
        relationship("regions", "customers", Cardinality::ManyToMany),
    ]
}

proptest! {
    #[test]
    fn test_overlap_ratios_are_bounded(
        a in prop::collection::btree_set(0u32..200, 0..60),
        b in prop::collection::btree_set(0u32..200, 0..60),
    ) {
        let stats = overlap(&a, &b, false);
        let intersection = a.intersection(&b).count();

        prop_assert!((0.0..=1.0).contains(&stats.containment_a_in_b));
        prop_assert!((0.0..=1.0).contains(&stats.containment_b_in_a));
        prop_assert!((0.0..=1.0).contains(&stats.jaccard));
        prop_assert_eq!(stats.intersection, intersection);
        if !a.is_empty() {
            prop_assert!((stats.containment_a_in_b - intersection as f64 / a.len() as f64).abs() < 1e-12);
        }
        prop_assert!(stats.jaccard <= stats.containment_a_in_b + 1e-12);
        prop_assert!(stats.jaccard <= stats.containment_b_in_a + 1e-12);
    }

    #[test]
    fn test_subset_is_fully_contained(
        b in prop::collection::btree_set("[a-z]{1,6}", 1..40),
        take in 0usize..40,
    ) {
        let a: BTreeSet<String> = b.iter().take(take).cloned().collect();
        let estimator = ValueOverlapEstimator::default();
        let stats = estimator.estimate(&ValueSet::new(a.clone(), false), &ValueSet::new(b, false));
        if !a.is_empty() {
            prop_assert_eq!(stats.containment_a_in_b, 1.0);
        }
        prop_assert!(!stats.approximate);
    }

    #[test]
    fn test_classification_is_a_lookup(parent in 0.0f64..=1.0, child in 0.0f64..=1.0) {
        let classifier = CardinalityClassifier::new();
        let threshold = classifier.unique_threshold();
        let expected = match (parent >= threshold, child >= threshold) {
            (true, true) => Cardinality::OneToOne,
            (true, false) => Cardinality::OneToMany,
            (false, true) => Cardinality::ManyToOne,
            (false, false) => Cardinality::ManyToMany,
        };
        prop_assert_eq!(classifier.classify_ratios(parent, child), expected);
    }

    #[test]
    fn test_mermaid_ignores_discovery_order(order in Just(warehouse()).prop_shuffle()) {
        let builder = RelationshipGraphBuilder::new();
        let reference = builder.build(Vec::new(), warehouse()).to_mermaid();
        let shuffled = builder.build(Vec::new(), order).to_mermaid();
        prop_assert_eq!(shuffled, reference);
    }
}

#[test]
fn test_mermaid_output_shape() {
    let mermaid = RelationshipGraphBuilder::new()
        .build(Vec::new(), warehouse())
        .to_mermaid();
    assert!(mermaid.starts_with("erDiagram"));
    assert!(mermaid.contains("Customer ||--o{ Order : \"customer_id -> customer_id\""));
    assert!(mermaid.contains("Customer ||--|| LoyaltyCard"));
}
