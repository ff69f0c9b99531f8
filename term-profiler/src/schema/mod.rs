//! Schema signatures and drift detection for partitioned datasets.
//!
//! Files that are expected to share one schema (monthly partitions, daily
//! exports) are compared against the first file of their dataset. A file's
//! dataset is its name without trailing partition numbers, see
//! [`dataset_name`]. The comparator only reports;
//! the [`DriftPolicy`] chosen by the caller decides whether drift is fatal.
//!
//! ```rust
//! use term_profiler::schema::{SchemaComparator, SchemaSignature};
//!
//! let jan = SchemaSignature::new([("date", "Date32"), ("symbol", "Utf8"), ("close", "Float64")]);
//! let feb = SchemaSignature::new([
//!     ("date", "Date32"), ("symbol", "Utf8"), ("close", "Float64"), ("volume", "Int64"),
//! ]);
//!
//! let result = SchemaComparator::new().compare(&[
//!     ("prices_2024_01.parquet".to_string(), jan),
//!     ("prices_2024_02.parquet".to_string(), feb),
//! ]);
//! assert!(!result.consistent);
//! assert_eq!(result.drift_details[0].added, vec!["volume"]);
//! ```

mod comparator;
mod signature;

pub use comparator::{dataset_name, DriftPolicy, SchemaComparator, SchemaComparisonResult};
pub use signature::{SchemaDiff, SchemaSignature, TypeChange};
