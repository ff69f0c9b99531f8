//! Comparable column name/type signatures.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::profile::FileProfile;

/// Ordered `(column_name, logical_type)` pairs describing a file.
///
/// Two signatures are equal only when both names and types appear in the same
/// order. The pairs are private so a signature cannot change once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaSignature {
    columns: Vec<(String, String)>,
}

impl SchemaSignature {
    pub fn new<I, N, T>(columns: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(n, t)| (n.into(), t.into()))
                .collect(),
        }
    }

    pub fn from_profile(profile: &FileProfile) -> Self {
        Self::new(
            profile
                .columns
                .iter()
                .map(|c| (c.name.as_str(), c.data_type.as_str())),
        )
    }

    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns keyed by `(name, occurrence)`, so a repeated `close` is
    /// `("close", 2)` for its second appearance, paired with its type.
    fn keyed_columns(&self) -> Vec<(ColumnKey<'_>, &str)> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        self.columns
            .iter()
            .map(|(n, t)| {
                let count = seen.entry(n.as_str()).or_insert(0);
                *count += 1;
                ((n.as_str(), *count), t.as_str())
            })
            .collect()
    }

    /// Differences of `self` relative to `reference`.
    ///
    /// Added and removed columns keep the order in which they appear in their
    /// own signature. Repeated column names are compared by occurrence, so a
    /// dropped or extra duplicate shows up as `name#N`.
    pub fn diff(&self, reference: &SchemaSignature, file_id: impl Into<String>) -> SchemaDiff {
        let our_columns = self.keyed_columns();
        let their_columns = reference.keyed_columns();
        let ours: HashMap<ColumnKey<'_>, &str> = our_columns.iter().copied().collect();
        let theirs: HashMap<ColumnKey<'_>, &str> = their_columns.iter().copied().collect();

        let added = our_columns
            .iter()
            .filter(|(key, _)| !theirs.contains_key(key))
            .map(|(key, _)| label(*key))
            .collect();
        let removed = their_columns
            .iter()
            .filter(|(key, _)| !ours.contains_key(key))
            .map(|(key, _)| label(*key))
            .collect();
        let type_changed = their_columns
            .iter()
            .filter_map(|(key, old)| {
                ours.get(key)
                    .filter(|new| **new != *old)
                    .map(|new| TypeChange {
                        column: label(*key),
                        old_type: (*old).to_string(),
                        new_type: (*new).to_string(),
                    })
            })
            .collect();

        let shared_ours: Vec<ColumnKey<'_>> = our_columns
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| theirs.contains_key(key))
            .collect();
        let shared_theirs: Vec<ColumnKey<'_>> = their_columns
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| ours.contains_key(key))
            .collect();

        SchemaDiff {
            file_id: file_id.into(),
            added,
            removed,
            type_changed,
            reordered: shared_ours != shared_theirs,
        }
    }
}

/// Column name and its 1-based occurrence within a signature.
type ColumnKey<'a> = (&'a str, usize);

/// Display form of a key: the bare name for a first occurrence, else `name#N`.
fn label((name, occurrence): ColumnKey<'_>) -> String {
    if occurrence == 1 {
        name.to_string()
    } else {
        format!("{name}#{occurrence}")
    }
}

impl fmt::Display for SchemaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|(n, t)| format!("{n}: {t}"))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// A column whose type differs from the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub column: String,
    pub old_type: String,
    pub new_type: String,
}

/// Differences between one file's signature and the reference signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// File the diff was computed for
    pub file_id: String,
    /// Columns present in this file but not in the reference
    pub added: Vec<String>,
    /// Reference columns missing from this file
    pub removed: Vec<String>,
    pub type_changed: Vec<TypeChange>,
    /// Shared columns appear in a different order
    #[serde(default)]
    pub reordered: bool,
}

impl SchemaDiff {
    /// True when the column sets and types match. Ordering is judged separately.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.type_changed.is_empty()
    }

    /// Compact rendering such as `+volume; -close; ~price: Int64 -> Float64`.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.added.iter().map(|c| format!("+{c}")));
        parts.extend(self.removed.iter().map(|c| format!("-{c}")));
        parts.extend(
            self.type_changed
                .iter()
                .map(|t| format!("~{}: {} -> {}", t.column, t.old_type, t.new_type)),
        );
        if self.reordered {
            parts.push("column order changed".to_string());
        }
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(cols: &[(&str, &str)]) -> SchemaSignature {
        SchemaSignature::new(cols.iter().copied())
    }

    #[test]
    fn test_equality_is_sequence_based() {
        let a = sig(&[("date", "Date32"), ("close", "Float64")]);
        let b = sig(&[("close", "Float64"), ("date", "Date32")]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_diff_added_removed_changed() {
        let reference = sig(&[("date", "Date32"), ("symbol", "Utf8"), ("close", "Int64")]);
        let other = sig(&[("date", "Date32"), ("close", "Float64"), ("volume", "Int64")]);

        let diff = other.diff(&reference, "b.csv");
        assert_eq!(diff.added, vec!["volume"]);
        assert_eq!(diff.removed, vec!["symbol"]);
        assert_eq!(
            diff.type_changed,
            vec![TypeChange {
                column: "close".to_string(),
                old_type: "Int64".to_string(),
                new_type: "Float64".to_string(),
            }]
        );
        assert!(!diff.reordered);
        assert_eq!(diff.summary(), "+volume; -symbol; ~close: Int64 -> Float64");
    }

    #[test]
    fn test_reorder_only() {
        let reference = sig(&[("a", "Int64"), ("b", "Utf8")]);
        let other = sig(&[("b", "Utf8"), ("a", "Int64")]);
        let diff = other.diff(&reference, "x");
        assert!(diff.is_empty());
        assert!(diff.reordered);
    }

    #[test]
    fn test_duplicate_column_names_are_not_collapsed() {
        let reference = sig(&[("symbol", "Utf8"), ("close", "Float64"), ("close", "Float64")]);
        let other = sig(&[("symbol", "Utf8"), ("close", "Float64")]);

        let diff = other.diff(&reference, "prices_2024_02.csv");
        assert!(!diff.is_empty());
        assert_eq!(diff.removed, vec!["close#2"]);
        assert!(diff.added.is_empty());

        let retyped = sig(&[("symbol", "Utf8"), ("close", "Float64"), ("close", "Utf8")]);
        let diff = retyped.diff(&reference, "prices_2024_03.csv");
        assert_eq!(diff.type_changed.len(), 1);
        assert_eq!(diff.type_changed[0].column, "close#2");
        assert!(reference.diff(&reference, "same").is_empty());
    }

    #[test]
    fn test_literal_hash_name_is_not_an_occurrence() {
        let reference = sig(&[("close#2", "Float64"), ("close", "Float64")]);
        let other = sig(&[("close", "Float64"), ("close", "Float64")]);

        let diff = other.diff(&reference, "prices_2024_02.csv");
        assert!(!diff.is_empty());
        assert_eq!(diff.added, vec!["close#2"]);
        assert_eq!(diff.removed, vec!["close#2"]);
        assert!(diff.type_changed.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(sig(&[("a", "Int64")]).to_string(), "(a: Int64)");
    }
}
