//! Grouping output types.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::spec::StatsLevel;
use crate::error::{ExitCode, Result};
use crate::profile::FileProfile;

/// Values of the grouping columns for one group, in grouping-column order.
///
/// Serialized as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupKey(Vec<(String, Value)>);

impl GroupKey {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.0
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Column-by-column order: null, booleans, numbers, strings, then anything else.
    pub fn natural_cmp(&self, other: &Self) -> Ordering {
        for ((_, a), (_, b)) in self.0.iter().zip(&other.0) {
            let ord = compare_values(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, value) in &self.0 {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GroupKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = GroupKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of grouping column to value")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<GroupKey, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, value)) = access.next_entry::<String, Value>()? {
                    entries.push((column, value));
                }
                Ok(GroupKey(entries))
            }
        }

        deserializer.deserialize_map(KeyVisitor)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(c, v)| format!("{c}={v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Numeric summary of one column within one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasicStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Sample standard deviation; absent for fewer than two values
    #[serde(default)]
    pub std_dev: Option<f64>,
}

/// Statistics for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub key: GroupKey,
    pub row_count: u64,
    /// Per numeric column, at `basic` level and above
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_stats: Option<BTreeMap<String, BasicStats>>,
    /// Profile of the group's rows, at `full` level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_profile: Option<FileProfile>,
}

impl GroupStats {
    pub fn new(key: GroupKey, row_count: u64) -> Self {
        Self {
            key,
            row_count,
            basic_stats: None,
            full_profile: None,
        }
    }
}

/// Group-size distribution of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub total_groups: usize,
    pub total_rows: u64,
    pub min_group_size: Option<u64>,
    pub max_group_size: Option<u64>,
    pub avg_group_size: Option<f64>,
}

/// The serialized shape of a [`GroupingResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingExport {
    pub columns: Vec<String>,
    pub stats_level: StatsLevel,
    pub total_rows: u64,
    pub group_count: usize,
    pub skipped: bool,
    pub warning: Option<String>,
    pub groups: Vec<GroupStats>,
}

/// Output of one grouping call.
///
/// A skipped result has no groups and always carries a warning. Otherwise the
/// group row counts sum to `total_rows`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingResult {
    pub columns: Vec<String>,
    pub stats_level: StatsLevel,
    pub groups: Vec<GroupStats>,
    pub skipped: bool,
    pub warning: Option<String>,
    pub total_rows: u64,
}

impl GroupingResult {
    /// A completed grouping; groups are put in output order.
    pub fn computed(
        columns: Vec<String>,
        stats_level: StatsLevel,
        mut groups: Vec<GroupStats>,
        warning: Option<String>,
    ) -> Self {
        groups.sort_by(|a, b| {
            b.row_count
                .cmp(&a.row_count)
                .then_with(|| a.key.natural_cmp(&b.key))
        });
        let total_rows = groups.iter().map(|g| g.row_count).sum();
        Self {
            columns,
            stats_level,
            groups,
            skipped: false,
            warning,
            total_rows,
        }
    }

    /// A grouping stopped by cardinality protection.
    pub fn skipped(
        columns: Vec<String>,
        stats_level: StatsLevel,
        warning: String,
        total_rows: u64,
    ) -> Self {
        Self {
            columns,
            stats_level,
            groups: Vec::new(),
            skipped: true,
            warning: Some(warning),
            total_rows,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// [`ExitCode::CardinalityWarning`] when skipped.
    pub fn exit_code(&self) -> ExitCode {
        if self.skipped {
            ExitCode::CardinalityWarning
        } else {
            ExitCode::Success
        }
    }

    pub fn aggregate(&self) -> GroupAggregate {
        let sizes = self.groups.iter().map(|g| g.row_count);
        GroupAggregate {
            total_groups: self.groups.len(),
            total_rows: self.total_rows,
            min_group_size: sizes.clone().min(),
            max_group_size: sizes.max(),
            avg_group_size: (!self.groups.is_empty())
                .then(|| self.total_rows as f64 / self.groups.len() as f64),
        }
    }

    pub fn export(&self) -> GroupingExport {
        GroupingExport {
            columns: self.columns.clone(),
            stats_level: self.stats_level,
            total_rows: self.total_rows,
            group_count: self.group_count(),
            skipped: self.skipped,
            warning: self.warning.clone(),
            groups: self.groups.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(entries: &[(&str, Value)]) -> GroupKey {
        GroupKey::new(
            entries
                .iter()
                .map(|(c, v)| (c.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_key_order_and_serialization() {
        let k = key(&[("model", json!("Civic")), ("make", json!("Honda"))]);
        assert_eq!(
            serde_json::to_string(&k).unwrap(),
            r#"{"model":"Civic","make":"Honda"}"#
        );
        let back: GroupKey = serde_json::from_str(r#"{"model":"Civic","make":"Honda"}"#).unwrap();
        assert_eq!(back, k);
        assert_eq!(k.get("make"), Some(&json!("Honda")));
    }

    #[test]
    fn test_natural_ordering() {
        let null = key(&[("a", Value::Null)]);
        let two = key(&[("a", json!(2))]);
        let ten = key(&[("a", json!(10))]);
        let text = key(&[("a", json!("10"))]);
        assert_eq!(null.natural_cmp(&two), Ordering::Less);
        assert_eq!(two.natural_cmp(&ten), Ordering::Less);
        assert_eq!(ten.natural_cmp(&text), Ordering::Less);
    }

    #[test]
    fn test_computed_ordering_and_totals() {
        let result = GroupingResult::computed(
            vec!["make".to_string()],
            StatsLevel::Count,
            vec![
                GroupStats::new(key(&[("make", json!("Toyota"))]), 2),
                GroupStats::new(key(&[("make", json!("Ford"))]), 5),
                GroupStats::new(key(&[("make", json!("Honda"))]), 2),
            ],
            None,
        );
        let makes: Vec<&Value> = result.groups.iter().map(|g| &g.key.entries()[0].1).collect();
        assert_eq!(makes, vec![&json!("Ford"), &json!("Honda"), &json!("Toyota")]);
        assert_eq!(result.total_rows, 9);
        assert_eq!(result.exit_code(), ExitCode::Success);

        let agg = result.aggregate();
        assert_eq!(agg.total_groups, 3);
        assert_eq!(agg.min_group_size, Some(2));
        assert_eq!(agg.max_group_size, Some(5));
        assert_eq!(agg.avg_group_size, Some(3.0));
    }

    #[test]
    fn test_skipped_export() {
        let result = GroupingResult::skipped(
            vec!["customer_id".to_string()],
            StatsLevel::Basic,
            "Group count (1000) exceeds max_groups (10)".to_string(),
            1000,
        );
        assert_eq!(result.exit_code().code(), 13);
        let json: Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["skipped"], true);
        assert_eq!(json["group_count"], 0);
        assert_eq!(json["stats_level"], "basic");
        assert_eq!(json["groups"], json!([]));
        assert!(result.aggregate().avg_group_size.is_none());
    }
}
