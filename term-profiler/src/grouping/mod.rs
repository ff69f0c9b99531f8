//! Grouped aggregation with cardinality protection.
//!
//! A grouping call moves through `VALIDATING -> COUNTING`, then either
//! `PROTECTED_SKIP` when the number of distinct keys exceeds
//! [`GroupingSpec::max_groups`], or `COMPUTING -> DONE`. Counting is always
//! performed; per-group statistics only run once the group count is known to
//! be within bounds.
//!
//! ```rust
//! use term_profiler::grouping::{CardinalityProtector, ProtectionDecision};
//!
//! let decision = CardinalityProtector::default().check(1000, 10);
//! assert!(matches!(decision, ProtectionDecision::Skip { .. }));
//! ```

mod engine;
mod protection;
mod result;
mod spec;
mod stats;

pub use engine::{GroupingEngine, GroupingPhase, GroupingSource};
pub use protection::{CardinalityProtector, ProtectionConfig, ProtectionDecision};
pub use result::{
    BasicStats, GroupAggregate, GroupKey, GroupStats, GroupingExport, GroupingResult,
};
pub use spec::{GroupingSpec, StatsLevel, DEFAULT_MAX_GROUPS};
pub use stats::GroupStatsCalculator;
