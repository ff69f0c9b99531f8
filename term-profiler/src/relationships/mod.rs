//! Relationship discovery between the files of a dataset.
//!
//! Detection runs in three passes over [`FileProfile`](crate::profile::FileProfile)s:
//!
//! 1. user hints become relationships with confidence 1.0,
//! 2. naming conventions (or, when disabled, type compatibility alone) propose
//!    parent/child column pairs whose child values must be contained in the
//!    parent's distinct values,
//! 3. competing parents for one child column are reduced to the best match.
//!
//! Each survivor is classified by [`CardinalityClassifier`] and the result is
//! assembled into a [`RelationshipGraph`].
//!
//! # Example
//!
//! ```rust
//! use term_profiler::profile::{ColumnProfile, Engine, FileProfile};
//! use term_profiler::relationships::{
//!     Cardinality, RelationshipDetector, RelationshipGraphBuilder,
//! };
//!
//! let customers = FileProfile::new("customers.csv", 3, Engine::External).with_column(
//!     ColumnProfile::from_values("customer_id", "Int64", ["1", "2", "3"].map(Some), 100),
//! );
//! let orders = FileProfile::new("orders.csv", 4, Engine::External).with_column(
//!     ColumnProfile::from_values("customer_id", "Int64", ["1", "1", "2", "3"].map(Some), 100),
//! );
//! let profiles = vec![customers, orders];
//!
//! let relationships = RelationshipDetector::default().detect(&profiles, &[]).unwrap();
//! assert_eq!(relationships[0].cardinality, Cardinality::OneToMany);
//!
//! let graph = RelationshipGraphBuilder::new().build_from_profiles(&profiles, relationships);
//! assert!(graph.to_mermaid().contains("Customer ||--o{ Order"));
//! ```

mod cardinality;
mod detector;
mod graph;
mod hints;
mod naming;
mod overlap;

pub use cardinality::{Cardinality, CardinalityClassifier, DEFAULT_UNIQUE_THRESHOLD};
pub use detector::{
    DetectionConfig, MatchKind, Relationship, RelationshipCandidate, RelationshipDetector,
    RelationshipSource,
};
pub use graph::{
    Entity, EntityExport, EntityId, GraphExport, GraphSummary, JoinStep, KeyColumns, RelationshipEdge,
    RelationshipGraph, RelationshipGraphBuilder,
};
pub use hints::{
    match_file, resolve_reference, ColumnRef, HintsDocument, NamingOverrides, RelationshipHint,
};
pub use naming::{entity_name, entity_stem, singularize, NamingConventions};
pub use overlap::{overlap, OverlapStats, ValueOverlapEstimator};
