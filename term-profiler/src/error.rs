//! Error types for term-profiler.
//!
//! All fallible operations in the crate return [`ProfilerError`]. Variants are
//! grouped the way callers need to branch on them: fatal input problems
//! (hints, missing columns, impossible joins), schema drift under a strict
//! policy, and failures bubbling up from the data engine.
//!
//! Cardinality protection has no variant here. An oversized grouping is
//! reported through [`GroupingResult::skipped`](crate::grouping::GroupingResult)
//! and never surfaces as an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for term-profiler.
#[derive(Error, Debug)]
pub enum ProfilerError {
    /// The relationship hints document could not be parsed.
    #[error("Invalid relationship hints: {message}")]
    InvalidHints {
        /// Human-readable description, including the entry index when known
        message: String,
    },

    /// A hint names a file or column that is not part of the profiled dataset.
    #[error("Hint references unknown column '{column}' in '{file}'")]
    HintReference { file: String, column: String },

    /// A grouping or join column does not exist in the source schema.
    #[error("Column '{column}' not found in '{file}'")]
    ColumnNotFound { file: String, column: String },

    /// Cross-file grouping needs a join path that the relationship graph lacks.
    #[error("No relationship path between '{from}' and '{to}'")]
    NoRelationshipPath { from: String, to: String },

    /// Schema drift detected while running under the strict drift policy.
    #[error("Schema drift detected in {files:?}: {summary}")]
    SchemaDrift { files: Vec<String>, summary: String },

    /// Error from data source registration or reading.
    #[error("Data source error ({source_type}): {message}")]
    DataSource {
        /// Type of data source (e.g., "csv", "parquet")
        source_type: String,
        /// Detailed error message
        message: String,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Security-related error.
    #[error("Security error: {0}")]
    Security(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, ProfilerError>`.
pub type Result<T> = std::result::Result<T, ProfilerError>;

/// Process exit codes shared with the command line front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitCode {
    Success,
    Failure,
    Usage,
    FileNotFound,
    InvalidFormat,
    SchemaError,
    CardinalityWarning,
}

impl ExitCode {
    /// Numeric process status for this outcome.
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
            ExitCode::Usage => 2,
            ExitCode::FileNotFound => 10,
            ExitCode::InvalidFormat => 11,
            ExitCode::SchemaError => 12,
            ExitCode::CardinalityWarning => 13,
        }
    }
}

impl ProfilerError {
    /// Creates a new invalid hints error.
    pub fn invalid_hints(message: impl Into<String>) -> Self {
        Self::InvalidHints {
            message: message.into(),
        }
    }

    /// Creates a new column not found error.
    pub fn column_not_found(file: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            file: file.into(),
            column: column.into(),
        }
    }

    /// Creates a new missing join path error.
    pub fn no_relationship_path(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::NoRelationshipPath {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a new data source error.
    pub fn data_source(source_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors caused by user input rather than the engine.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidHints { .. }
                | Self::HintReference { .. }
                | Self::ColumnNotFound { .. }
                | Self::NoRelationshipPath { .. }
        )
    }

    /// Maps this error onto the process exit code automation branches on.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::SchemaDrift { .. } => ExitCode::SchemaError,
            Self::InvalidHints { .. } | Self::HintReference { .. } => ExitCode::InvalidFormat,
            Self::ColumnNotFound { .. } | Self::NoRelationshipPath { .. } => ExitCode::Usage,
            Self::Configuration(_) => ExitCode::Usage,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ExitCode::FileNotFound,
            Self::DataSource { .. } | Self::Serialization(_) => ExitCode::InvalidFormat,
            _ => ExitCode::Failure,
        }
    }
}

impl From<serde_json::Error> for ProfilerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProfilerError::column_not_found("orders.csv", "region");
        assert_eq!(err.to_string(), "Column 'region' not found in 'orders.csv'");

        let err = ProfilerError::no_relationship_path("orders.csv", "suppliers");
        assert_eq!(
            err.to_string(),
            "No relationship path between 'orders.csv' and 'suppliers'"
        );
    }

    #[test]
    fn test_exit_codes() {
        let drift = ProfilerError::SchemaDrift {
            files: vec!["b.csv".to_string()],
            summary: "+volume".to_string(),
        };
        assert_eq!(drift.exit_code().code(), 12);
        assert_eq!(
            ProfilerError::invalid_hints("bad").exit_code(),
            ExitCode::InvalidFormat
        );
        assert_eq!(
            ProfilerError::column_not_found("a", "b").exit_code(),
            ExitCode::Usage
        );
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ProfilerError::from(missing).exit_code().code(), 10);
        assert_eq!(ExitCode::CardinalityWarning.code(), 13);
    }

    #[test]
    fn test_fatal_input_classification() {
        assert!(ProfilerError::invalid_hints("x").is_fatal_input());
        assert!(ProfilerError::no_relationship_path("a", "b").is_fatal_input());
        assert!(!ProfilerError::Internal("x".to_string()).is_fatal_input());
    }
}
