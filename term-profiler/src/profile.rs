//! Per-file schema and statistics summaries.
//!
//! A [`FileProfile`] is the only view of a data file the relationship and
//! schema layers ever see. Profiles are produced by a
//! [`ProfilingBackend`](crate::profiling::ProfilingBackend) or assembled by
//! hand, and every profile records which [`Engine`] produced it.
//!
//! # Example
//!
//! ```rust
//! use term_profiler::profile::{ColumnProfile, Engine, FileProfile};
//!
//! let exchanges = FileProfile::new("exchanges.csv", 3, Engine::External).with_column(
//!     ColumnProfile::from_values("exchange_code", "Utf8", ["NYSE", "NASDAQ", "AMEX"].map(Some), 100),
//! );
//!
//! let code = exchanges.column("exchange_code").unwrap();
//! assert_eq!(code.uniqueness_ratio(), 1.0);
//! assert_eq!(exchanges.non_null_ratio(code), 1.0);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The execution engine that computed a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Computed by [`DataFusionProfiler`](crate::profiling::DataFusionProfiler)
    DataFusion,
    /// Supplied by the caller or another tool
    External,
}

/// Broad type families used to decide whether two columns can hold the same keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    Integer,
    Float,
    String,
    Temporal,
    Boolean,
    Other,
}

impl TypeFamily {
    /// Classifies a logical type name.
    ///
    /// Accepts Arrow display names (`Int64`, `Utf8View`, `Timestamp(ns)`) as
    /// well as common dataframe spellings (`int64`, `object`, `varchar`).
    pub fn of(data_type: &str) -> Self {
        let lower = data_type.to_ascii_lowercase();
        let head = lower.split('(').next().unwrap_or_default().trim();

        match head {
            "int" | "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16" | "uint32"
            | "uint64" | "integer" | "bigint" | "smallint" | "tinyint" | "i32" | "i64" => {
                Self::Integer
            }
            "float" | "float16" | "float32" | "float64" | "double" | "real" | "f32" | "f64" => {
                Self::Float
            }
            "utf8" | "largeutf8" | "utf8view" | "string" | "str" | "object" | "varchar"
            | "text" | "char" => Self::String,
            "boolean" | "bool" => Self::Boolean,
            _ if head.starts_with("decimal") => Self::Float,
            _ if head.starts_with("date")
                || head.starts_with("timestamp")
                || head.starts_with("time") =>
            {
                Self::Temporal
            }
            _ => Self::Other,
        }
    }

    /// Whether the family holds numbers.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// Whether two logical types can be joined on.
pub fn types_compatible(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    let family = TypeFamily::of(a);
    family != TypeFamily::Other && family == TypeFamily::of(b)
}

/// Digest ordering the values of a [`ValueSet`] sample.
pub type ValueHash = [u8; 32];

/// SHA-256 of a canonical value string.
pub fn value_hash(value: &str) -> ValueHash {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(value.as_bytes()));
    hash
}

/// Distinct values of a column rendered as canonical strings.
///
/// Past the cap a set keeps the `cap` values with the smallest
/// [`value_hash`], so two capped sets hold the same slice of the value space
/// and can still be compared. Such a set is flagged approximate, and any
/// overlap computed from it is approximate as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSet {
    values: BTreeSet<String>,
    approximate: bool,
}

impl ValueSet {
    /// Wraps an already collected set.
    ///
    /// An approximate set must hold the smallest-hash values of its column.
    pub fn new(values: BTreeSet<String>, approximate: bool) -> Self {
        Self {
            values,
            approximate,
        }
    }

    /// Collects values, keeping the `cap` distinct entries with the smallest hash.
    pub fn collect<I, S>(values: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sample: BTreeMap<ValueHash, String> = BTreeMap::new();
        let mut approximate = false;
        for value in values {
            let value = value.into();
            sample.insert(value_hash(&value), value);
            if sample.len() > cap {
                sample.pop_last();
                approximate = true;
            }
        }
        Self::new(sample.into_values().collect(), approximate)
    }

    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    /// True when the set was truncated by a cap.
    pub fn is_approximate(&self) -> bool {
        self.approximate
    }

    /// Largest hash kept, for an approximate set.
    ///
    /// Every value of the column hashing at or below it is in the set.
    pub fn hash_bound(&self) -> Option<ValueHash> {
        if !self.approximate {
            return None;
        }
        // a set capped at zero covers no hash at all
        Some(self.values.iter().map(|v| value_hash(v)).max().unwrap_or([0u8; 32]))
    }
}

/// Per-kind column statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnStats {
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
        mean: Option<f64>,
        std_dev: Option<f64>,
    },
    Text {
        min_length: Option<u64>,
        max_length: Option<u64>,
    },
    Temporal {
        min: Option<String>,
        max: Option<String>,
    },
    Boolean {
        true_count: u64,
    },
    Other,
}

impl ColumnStats {
    /// Minimum and maximum for numeric columns.
    pub fn numeric_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Numeric {
                min: Some(min),
                max: Some(max),
                ..
            } => Some((*min, *max)),
            _ => None,
        }
    }
}

/// Schema and statistics for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    /// Logical type name as reported by the engine
    pub data_type: String,
    pub non_null_count: u64,
    pub null_count: u64,
    pub distinct_count: u64,
    pub stats: ColumnStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct_values: Option<ValueSet>,
}

impl ColumnProfile {
    /// Creates an empty profile for a column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            non_null_count: 0,
            null_count: 0,
            distinct_count: 0,
            stats: ColumnStats::Other,
            distinct_values: None,
        }
    }

    /// Builds a profile from raw cell values, `None` standing for null.
    ///
    /// Used by producers that hold rows in memory rather than in DataFusion.
    pub fn from_values<I, S>(
        name: impl Into<String>,
        data_type: impl Into<String>,
        values: I,
        cap: usize,
    ) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let mut non_null = Vec::new();
        let mut null_count = 0u64;
        for value in values {
            match value {
                Some(v) => non_null.push(v.into()),
                None => null_count += 1,
            }
        }

        let distinct: BTreeSet<&str> = non_null.iter().map(String::as_str).collect();
        let mut profile = Self::new(name, data_type);
        profile.non_null_count = non_null.len() as u64;
        profile.null_count = null_count;
        profile.distinct_count = distinct.len() as u64;

        if profile.family().is_numeric() {
            let numbers: Vec<f64> = non_null.iter().filter_map(|v| v.parse().ok()).collect();
            profile.stats = numeric_stats(&numbers);
        } else if profile.family() == TypeFamily::String {
            profile.stats = ColumnStats::Text {
                min_length: non_null.iter().map(|v| v.chars().count() as u64).min(),
                max_length: non_null.iter().map(|v| v.chars().count() as u64).max(),
            };
        }

        profile.distinct_values = Some(ValueSet::collect(distinct, cap));
        profile
    }

    pub fn with_counts(mut self, non_null: u64, null: u64, distinct: u64) -> Self {
        self.non_null_count = non_null;
        self.null_count = null;
        self.distinct_count = distinct;
        self
    }

    pub fn with_stats(mut self, stats: ColumnStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_values(mut self, values: ValueSet) -> Self {
        self.distinct_values = Some(values);
        self
    }

    /// Rows seen for this column, nulls included.
    pub fn row_count(&self) -> u64 {
        self.non_null_count + self.null_count
    }

    /// Distinct values over non-null values; 0.0 for an all-null column.
    pub fn uniqueness_ratio(&self) -> f64 {
        if self.non_null_count == 0 {
            return 0.0;
        }
        self.distinct_count as f64 / self.non_null_count as f64
    }

    pub fn family(&self) -> TypeFamily {
        TypeFamily::of(&self.data_type)
    }
}

fn numeric_stats(numbers: &[f64]) -> ColumnStats {
    if numbers.is_empty() {
        return ColumnStats::Numeric {
            min: None,
            max: None,
            mean: None,
            std_dev: None,
        };
    }
    let n = numbers.len() as f64;
    let mean = numbers.iter().sum::<f64>() / n;
    let std_dev = if numbers.len() > 1 {
        let var = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    } else {
        None
    };
    ColumnStats::Numeric {
        min: numbers.iter().copied().reduce(f64::min),
        max: numbers.iter().copied().reduce(f64::max),
        mean: Some(mean),
        std_dev,
    }
}

/// Schema and statistics for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProfile {
    /// Identifier of the file within a run, normally its file name
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub row_count: u64,
    pub columns: Vec<ColumnProfile>,
    /// Provenance of every statistic in this profile
    pub engine: Engine,
}

impl FileProfile {
    pub fn new(file_id: impl Into<String>, row_count: u64, engine: Engine) -> Self {
        Self {
            file_id: file_id.into(),
            path: None,
            row_count,
            columns: Vec::new(),
            engine,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_column(mut self, column: ColumnProfile) -> Self {
        self.columns.push(column);
        self
    }

    /// Looks up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// File name without its extensions (`prices.csv.gz` -> `prices`).
    pub fn stem(&self) -> &str {
        file_stem(&self.file_id)
    }

    /// Fraction of this file's rows where the column is non-null.
    pub fn non_null_ratio(&self, column: &ColumnProfile) -> f64 {
        if self.row_count == 0 {
            return 0.0;
        }
        (column.non_null_count as f64 / self.row_count as f64).min(1.0)
    }

    /// Whether a column qualifies as a primary-key candidate at `threshold`.
    pub fn is_key_candidate(&self, column: &ColumnProfile, threshold: f64) -> bool {
        column.non_null_count > 0
            && column.uniqueness_ratio() >= threshold
            && self.non_null_ratio(column) >= threshold
    }
}

/// Strips directories and every extension from a file identifier.
pub fn file_stem(file_id: &str) -> &str {
    let name = Path::new(file_id)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_id);
    match name.find('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}
