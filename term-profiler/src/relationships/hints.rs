//! User-declared relationships.
//!
//! A hints document is either a bare array of entries or an object holding the
//! entries under `relationships` (or `hints`) with an optional
//! `naming_conventions` block:
//!
//! ```json
//! {
//!   "relationships": [
//!     {"parent": {"file": "exchanges.parquet", "column": "exchange_code"},
//!      "child":  {"file": "instruments.parquet", "column": "exchange"},
//!      "type": "one_to_many"},
//!     {"parent_file": "sectors.parquet", "parent_column": "sector_id",
//!      "child_file": "instruments.parquet", "child_column": "sector_id"}
//!   ],
//!   "naming_conventions": {"fk_suffixes": ["_id", "_code"], "match_by_name": true}
//! }
//! ```

use std::path::Path;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::cardinality::Cardinality;
use super::detector::DetectionConfig;
use crate::error::{ProfilerError, Result};
use crate::profile::{file_stem, FileProfile};

/// A `{file, column}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub file: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(file: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            column: column.into(),
        }
    }
}

/// One declared parent/child relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipHint {
    pub parent: ColumnRef,
    pub child: ColumnRef,
    /// Declared multiplicity; overrides the computed one
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub declared: Option<Cardinality>,
}

impl RelationshipHint {
    pub fn new(parent: ColumnRef, child: ColumnRef) -> Self {
        Self {
            parent,
            child,
            declared: None,
        }
    }

    pub fn with_declared(mut self, cardinality: Cardinality) -> Self {
        self.declared = Some(cardinality);
        self
    }
}

/// Detection settings carried by a hints document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk_suffixes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk_prefixes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_by_name: Option<bool>,
}

impl NamingOverrides {
    /// Returns `config` with every present override applied.
    pub fn apply(&self, mut config: DetectionConfig) -> DetectionConfig {
        if let Some(suffixes) = &self.fk_suffixes {
            config.naming.fk_suffixes = suffixes.clone();
        }
        if let Some(prefixes) = &self.fk_prefixes {
            config.naming.fk_prefixes = prefixes.clone();
        }
        if let Some(pk_names) = &self.pk_names {
            config.naming.pk_names = pk_names.clone();
        }
        if let Some(match_by_name) = self.match_by_name {
            config.match_by_name = match_by_name;
        }
        config
    }
}

/// A parsed hints file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintsDocument {
    pub hints: Vec<RelationshipHint>,
    pub naming: Option<NamingOverrides>,
}

impl HintsDocument {
    /// Reads and parses a hints file.
    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let document = Self::from_json_str(&text)?;
        debug!(hints = document.hints.len(), "Loaded relationship hints");
        Ok(document)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProfilerError::invalid_hints(format!("not valid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (entries, naming): (&[Value], Option<NamingOverrides>) = match value {
            Value::Array(entries) => (entries.as_slice(), None),
            Value::Object(map) => {
                let listed = map.get("relationships").or_else(|| map.get("hints"));
                let entries: &[Value] = match listed {
                    Some(Value::Array(entries)) => entries.as_slice(),
                    Some(_) => {
                        return Err(ProfilerError::invalid_hints(
                            "'relationships' must be a list",
                        ))
                    }
                    None => &[],
                };
                let naming = map
                    .get("naming_conventions")
                    .map(|block| {
                        serde_json::from_value::<NamingOverrides>(block.clone()).map_err(|e| {
                            ProfilerError::invalid_hints(format!("invalid naming_conventions: {e}"))
                        })
                    })
                    .transpose()?;
                (entries, naming)
            }
            _ => {
                return Err(ProfilerError::invalid_hints(
                    "expected a list of relationships or an object with 'relationships'",
                ))
            }
        };

        let hints = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                parse_entry(entry).map_err(|reason| {
                    ProfilerError::invalid_hints(format!(
                        "invalid relationship at index {index}: {reason}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { hints, naming })
    }
}

fn parse_entry(entry: &Value) -> std::result::Result<RelationshipHint, String> {
    let Value::Object(map) = entry else {
        return Err("entry must be an object".to_string());
    };

    let (parent, child) = if map.contains_key("parent") || map.contains_key("child") {
        (
            nested_ref(map.get("parent"), "parent")?,
            nested_ref(map.get("child"), "child")?,
        )
    } else {
        (
            ColumnRef::new(
                string_field(map.get("parent_file"), "parent_file")?,
                string_field(map.get("parent_column"), "parent_column")?,
            ),
            ColumnRef::new(
                string_field(map.get("child_file"), "child_file")?,
                string_field(map.get("child_column"), "child_column")?,
            ),
        )
    };

    let declared = match map.get("type").or_else(|| map.get("relationship_type")) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            Some(Cardinality::parse(s).ok_or_else(|| format!("unknown relationship type '{s}'"))?)
        }
        Some(_) => return Err("'type' must be a string".to_string()),
    };

    Ok(RelationshipHint {
        parent,
        child,
        declared,
    })
}

fn nested_ref(value: Option<&Value>, key: &str) -> std::result::Result<ColumnRef, String> {
    let Some(Value::Object(map)) = value else {
        return Err(format!("missing '{key}' object"));
    };
    Ok(ColumnRef::new(
        string_field(map.get("file"), &format!("{key}.file"))?,
        string_field(map.get("column"), &format!("{key}.column"))?,
    ))
}

fn string_field(value: Option<&Value>, key: &str) -> std::result::Result<String, String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(format!("'{key}' is empty")),
        Some(_) => Err(format!("'{key}' must be a string")),
        None => Err(format!("missing '{key}'")),
    }
}

/// Finds the profile a hint's file reference points at.
///
/// Tried in order: exact file id or path, equal stem, then a glob pattern
/// over file ids and paths.
pub fn match_file<'a>(reference: &str, profiles: &'a [FileProfile]) -> Option<&'a FileProfile> {
    let exact = profiles.iter().find(|p| {
        p.file_id == reference
            || p
                .path
                .as_deref()
                .is_some_and(|path| path == Path::new(reference))
    });
    if exact.is_some() {
        return exact;
    }

    let stem = file_stem(reference);
    if let Some(found) = profiles.iter().find(|p| p.stem() == stem) {
        return Some(found);
    }

    let pattern = Pattern::new(reference).ok()?;
    profiles.iter().find(|p| {
        pattern.matches(&p.file_id)
            || p
                .path
                .as_deref()
                .is_some_and(|path| pattern.matches_path(path))
    })
}

/// Resolves a column reference to its profile, failing on unknown files or columns.
pub fn resolve_reference<'a>(
    reference: &ColumnRef,
    profiles: &'a [FileProfile],
) -> Result<&'a FileProfile> {
    let profile = match_file(&reference.file, profiles).ok_or_else(|| {
        ProfilerError::HintReference {
            file: reference.file.clone(),
            column: reference.column.clone(),
        }
    })?;
    if profile.column(&reference.column).is_none() {
        return Err(ProfilerError::HintReference {
            file: profile.file_id.clone(),
            column: reference.column.clone(),
        });
    }
    Ok(profile)
}
