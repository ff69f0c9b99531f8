//! Prelude for commonly used types and traits in term-profiler.

pub use crate::analysis::{AnalysisConfig, DatasetAnalysis, DatasetAnalyzer};
pub use crate::error::{ExitCode, ProfilerError, Result};
pub use crate::grouping::{
    GroupingEngine, GroupingResult, GroupingSource, GroupingSpec, StatsLevel,
};
pub use crate::logging::LogConfig;
pub use crate::profile::{ColumnProfile, Engine, FileProfile};
pub use crate::profiling::{profile_files, DataFusionProfiler, ProfilingBackend, ProfilingConfig};
pub use crate::relationships::{
    Cardinality, DetectionConfig, HintsDocument, Relationship, RelationshipDetector,
    RelationshipGraph, RelationshipGraphBuilder,
};
pub use crate::schema::{DriftPolicy, SchemaComparator};
