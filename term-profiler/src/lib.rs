//! # Term Profiler - Multi-file relationship and consistency analysis
//!
//! Term Profiler inspects a collection of tabular files (CSV, Parquet, NDJSON)
//! that together form one dataset. It answers three questions that single-file
//! profilers cannot: do partitioned files still share one schema, how do the
//! files reference each other, and how are rows distributed across groups
//! without blowing up on near-unique keys. Queries run on DataFusion.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use datafusion::prelude::SessionContext;
//! use term_profiler::prelude::*;
//!
//! # async fn example() -> term_profiler::error::Result<()> {
//! let ctx = SessionContext::new();
//! let paths = vec![PathBuf::from("customers.csv"), PathBuf::from("orders.csv")];
//!
//! // Profile every file; tables are registered under their file name
//! let profiles = profile_files(&ctx, &DataFusionProfiler::default(), &paths).await?;
//!
//! // Compare schemas, detect relationships, build the graph
//! let analysis = DatasetAnalyzer::new(AnalysisConfig::default()).analyze(profiles, None)?;
//! println!("{}", analysis.graph.to_mermaid());
//!
//! // Group orders by a column of the related customers file
//! let spec = GroupingSpec::new(["customer.region"])
//!     .with_cross_file(true)
//!     .with_stats_level(StatsLevel::Basic);
//! let result = GroupingEngine::default()
//!     .group(&ctx, GroupingSource::cross_file("orders.csv", &analysis.graph), &spec)
//!     .await?;
//! println!("{}", result.to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Features
//!
//! ### Schema drift detection
//!
//! Files are grouped into datasets by name (`prices_2024_01.csv` and
//! `prices_2024_02.csv` are both `prices`), and each dataset's files are
//! compared against its first file. Added,
//! removed and retyped columns are reported per file, and a [`DriftPolicy`]
//! decides whether drift fails the run (`strict`), becomes a warning (`warn`)
//! or is dropped (`ignore`).
//!
//! ### Relationship discovery
//!
//! User hints are taken as given. Remaining foreign keys are proposed from
//! naming conventions (`customer_id` -> `customers`) and confirmed by value
//! containment against the parent's distinct values. Each relationship is
//! classified as one-to-one, one-to-many, many-to-one or many-to-many and
//! exported as JSON, Mermaid or Graphviz.
//!
//! ### Grouping with cardinality protection
//!
//! Grouping always counts first. When the number of groups exceeds
//! `max_groups`, per-group statistics are skipped and the result carries a
//! warning instead of an error.
//!
//! ### Observability
//!
//! Structured logging with the `tracing` crate; see [`logging::setup`] for a
//! ready-made subscriber.
//!
//! ## Architecture
//!
//! - **`profile`**: the per-file schema and statistics summary every engine consumes
//! - **`profiling`**: DataFusion-backed producer of those summaries
//! - **`sources`**: file format detection and table registration
//! - **`schema`**: schema signatures and drift comparison
//! - **`relationships`**: hints, detection, cardinality and the relationship graph
//! - **`grouping`**: grouped aggregation, protection and per-group statistics
//! - **`analysis`**: the dataset-level pipeline
//!
//! [`DriftPolicy`]: schema::DriftPolicy

pub mod analysis;
pub mod error;
pub mod grouping;
pub mod logging;
pub mod prelude;
pub mod profile;
pub mod profiling;
pub mod relationships;
pub mod schema;
pub mod security;
pub mod sources;
