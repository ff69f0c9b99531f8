//! Schema drift detection across the files of one dataset.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::signature::{SchemaDiff, SchemaSignature};
use crate::error::{ProfilerError, Result};
use crate::profile::{file_stem, FileProfile};

/// What the caller does with detected drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Any drift is a fatal error
    Strict,
    /// Drift is reported and processing continues
    #[default]
    Warn,
    /// Drift is computed but not reported
    Ignore,
}

impl DriftPolicy {
    /// Applies the policy to a comparison result.
    ///
    /// Returns the warning to attach to the output, if any. Under
    /// [`DriftPolicy::Strict`] an inconsistent result becomes
    /// [`ProfilerError::SchemaDrift`].
    pub fn enforce(&self, result: &SchemaComparisonResult) -> Result<Option<String>> {
        if result.consistent {
            return Ok(None);
        }
        let summary = result.summary();
        match self {
            DriftPolicy::Strict => Err(ProfilerError::SchemaDrift {
                files: result
                    .drift_details
                    .iter()
                    .map(|d| d.file_id.clone())
                    .collect(),
                summary,
            }),
            DriftPolicy::Warn => {
                warn!(drift = %summary, "Schema drift detected");
                Ok(Some(format!("Schema drift detected: {summary}")))
            }
            DriftPolicy::Ignore => Ok(None),
        }
    }
}

impl std::str::FromStr for DriftPolicy {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "warn" => Ok(Self::Warn),
            "ignore" => Ok(Self::Ignore),
            other => Err(ProfilerError::Configuration(format!(
                "Unknown drift policy '{other}' (expected strict, warn or ignore)"
            ))),
        }
    }
}

/// Outcome of comparing a dataset's signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaComparisonResult {
    /// Dataset the compared files belong to
    #[serde(default)]
    pub dataset: String,
    pub consistent: bool,
    /// One entry per file that deviates from the reference
    pub drift_details: Vec<SchemaDiff>,
    /// Signature of the first file; empty when there were no files
    pub reference: SchemaSignature,
    pub reference_file: Option<String>,
}

impl SchemaComparisonResult {
    /// One line per deviating file.
    pub fn summary(&self) -> String {
        self.drift_details
            .iter()
            .map(|d| format!("{}: {}", d.file_id, d.summary()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Compares file signatures against the first file's signature.
#[derive(Debug, Clone, Default)]
pub struct SchemaComparator {
    order_sensitive: bool,
}

impl SchemaComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat a different column order as drift.
    pub fn with_order_sensitive(mut self, enabled: bool) -> Self {
        self.order_sensitive = enabled;
        self
    }

    /// Compares `(file_id, signature)` pairs, in order.
    ///
    /// Zero or one signature is trivially consistent.
    #[instrument(skip(self, signatures), fields(files = signatures.len()))]
    pub fn compare(&self, signatures: &[(String, SchemaSignature)]) -> SchemaComparisonResult {
        let Some((reference_file, reference)) = signatures.first() else {
            return SchemaComparisonResult {
                dataset: String::new(),
                consistent: true,
                drift_details: Vec::new(),
                reference: SchemaSignature::default(),
                reference_file: None,
            };
        };

        let drift_details: Vec<SchemaDiff> = signatures[1..]
            .iter()
            .map(|(file_id, signature)| signature.diff(reference, file_id.clone()))
            .filter(|diff| !diff.is_empty() || (self.order_sensitive && diff.reordered))
            .collect();

        debug!(
            reference = %reference_file,
            deviating = drift_details.len(),
            "Compared schemas"
        );

        SchemaComparisonResult {
            dataset: dataset_name(reference_file).to_string(),
            consistent: drift_details.is_empty(),
            drift_details,
            reference: reference.clone(),
            reference_file: Some(reference_file.clone()),
        }
    }

    /// Convenience wrapper deriving signatures from profiles.
    ///
    /// Every profile is treated as a partition of one dataset.
    pub fn compare_profiles(&self, profiles: &[FileProfile]) -> SchemaComparisonResult {
        let signatures: Vec<(String, SchemaSignature)> = profiles
            .iter()
            .map(|p| (p.file_id.clone(), SchemaSignature::from_profile(p)))
            .collect();
        self.compare(&signatures)
    }

    /// Groups profiles by [`dataset_name`] and compares each group on its own.
    ///
    /// Results follow the order in which each dataset is first seen.
    #[instrument(skip(self, profiles), fields(files = profiles.len()))]
    pub fn compare_datasets(&self, profiles: &[FileProfile]) -> Vec<SchemaComparisonResult> {
        let mut groups: Vec<(String, Vec<(String, SchemaSignature)>)> = Vec::new();
        for profile in profiles {
            let dataset = dataset_of(profile);
            let entry = (profile.file_id.clone(), SchemaSignature::from_profile(profile));
            match groups.iter_mut().find(|(name, _)| *name == dataset) {
                Some((_, files)) => files.push(entry),
                None => groups.push((dataset, vec![entry])),
            }
        }

        groups
            .into_iter()
            .map(|(dataset, signatures)| SchemaComparisonResult {
                dataset,
                ..self.compare(&signatures)
            })
            .collect()
    }
}

/// Dataset a file id belongs to: its stem with trailing numeric partition
/// segments removed, so `prices_2024_01.csv` and `prices-2024-02.parquet`
/// are both `prices`.
///
/// Empty when the stem is nothing but partition segments.
pub fn dataset_name(file_id: &str) -> &str {
    let mut name = file_stem(file_id);
    loop {
        let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
        if trimmed.len() == name.len() {
            return name;
        }
        match trimmed.strip_suffix(['_', '-']) {
            Some(rest) => name = rest,
            None if trimmed.is_empty() => return trimmed,
            None => return name,
        }
    }
}

fn dataset_of(profile: &FileProfile) -> String {
    let name = dataset_name(&profile.file_id);
    if !name.is_empty() {
        return name.to_string();
    }
    // `2024_01.csv` style partitions are named by their directory
    profile
        .path
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or_else(|| file_stem(&profile.file_id))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file: &str, cols: &[(&str, &str)]) -> (String, SchemaSignature) {
        (file.to_string(), SchemaSignature::new(cols.iter().copied()))
    }

    #[test]
    fn test_trivial_inputs_are_consistent() {
        let comparator = SchemaComparator::new();
        let empty = comparator.compare(&[]);
        assert!(empty.consistent);
        assert!(empty.reference.is_empty());
        assert!(empty.reference_file.is_none());

        let single = comparator.compare(&[entry("a.csv", &[("x", "Int64")])]);
        assert!(single.consistent);
        assert!(single.drift_details.is_empty());
        assert_eq!(single.reference_file.as_deref(), Some("a.csv"));
    }

    #[test]
    fn test_added_column_is_drift() {
        let base = [("date", "Date32"), ("symbol", "Utf8"), ("close", "Float64")];
        let mut extended = base.to_vec();
        extended.push(("volume", "Int64"));

        let result = SchemaComparator::new().compare(&[
            entry("prices_2024_01.csv", &base),
            entry("prices_2024_02.csv", &extended),
        ]);
        assert!(!result.consistent);
        assert_eq!(result.drift_details.len(), 1);
        assert_eq!(result.drift_details[0].file_id, "prices_2024_02.csv");
        assert_eq!(result.drift_details[0].added, vec!["volume"]);
        assert!(result.drift_details[0].removed.is_empty());
    }

    #[test]
    fn test_reorder_respects_order_sensitivity() {
        let files = [
            entry("a.csv", &[("x", "Int64"), ("y", "Utf8")]),
            entry("b.csv", &[("y", "Utf8"), ("x", "Int64")]),
        ];
        assert!(SchemaComparator::new().compare(&files).consistent);
        assert!(
            !SchemaComparator::new()
                .with_order_sensitive(true)
                .compare(&files)
                .consistent
        );
    }

    #[test]
    fn test_drift_policies() {
        let result = SchemaComparator::new().compare(&[
            entry("a.csv", &[("x", "Int64")]),
            entry("b.csv", &[("x", "Utf8")]),
        ]);

        let err = DriftPolicy::Strict.enforce(&result).unwrap_err();
        assert_eq!(err.exit_code().code(), 12);
        assert!(err.to_string().contains("b.csv"));

        let warning = DriftPolicy::Warn.enforce(&result).unwrap();
        assert!(warning.unwrap().contains("~x: Int64 -> Utf8"));

        assert_eq!(DriftPolicy::Ignore.enforce(&result).unwrap(), None);
    }

    #[test]
    fn test_dataset_names() {
        assert_eq!(dataset_name("prices_2024_01.csv"), "prices");
        assert_eq!(dataset_name("prices-2024-02-15.parquet"), "prices");
        assert_eq!(dataset_name("part-00003.csv.gz"), "part");
        assert_eq!(dataset_name("orders.csv"), "orders");
        assert_eq!(dataset_name("q4trades.csv"), "q4trades");
        assert_eq!(dataset_name("2024_01.csv"), "");
    }

    #[test]
    fn test_compare_datasets_keeps_tables_apart() {
        use crate::profile::{ColumnProfile, Engine};

        let profile = |file: &str, cols: &[&str]| {
            cols.iter().fold(FileProfile::new(file, 1, Engine::External), |p, c| {
                p.with_column(ColumnProfile::new(*c, "Utf8"))
            })
        };
        let results = SchemaComparator::new().compare_datasets(&[
            profile("customers.csv", &["customer_id", "name"]),
            profile("prices_2024_01.csv", &["symbol", "close"]),
            profile("orders.csv", &["order_id", "customer_id"]),
            profile("prices_2024_02.csv", &["symbol", "close", "volume"]),
        ]);

        let datasets: Vec<&str> = results.iter().map(|r| r.dataset.as_str()).collect();
        assert_eq!(datasets, vec!["customers", "prices", "orders"]);
        assert!(results[0].consistent);
        assert!(results[2].consistent);
        assert!(!results[1].consistent);
        assert_eq!(results[1].drift_details[0].added, vec!["volume"]);
    }

    #[test]
    fn test_bare_partitions_group_by_directory() {
        use crate::profile::{ColumnProfile, Engine};

        let partition = |file: &str| {
            FileProfile::new(file, 1, Engine::External)
                .with_path(format!("/data/trades/{file}"))
                .with_column(ColumnProfile::new("symbol", "Utf8"))
        };
        let results = SchemaComparator::new()
            .compare_datasets(&[partition("2024_01.csv"), partition("2024_02.csv")]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].dataset, "trades");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("STRICT".parse::<DriftPolicy>().unwrap(), DriftPolicy::Strict);
        assert!("lenient".parse::<DriftPolicy>().is_err());
        assert_eq!(
            serde_json::to_string(&DriftPolicy::Warn).unwrap(),
            "\"warn\""
        );
    }
}
