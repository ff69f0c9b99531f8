//! Grouping request types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::security::SqlSecurity;

/// Default upper bound on the number of groups computed in detail.
pub const DEFAULT_MAX_GROUPS: usize = 10;

/// How much is computed per group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsLevel {
    /// Row counts only
    #[default]
    Count,
    /// Row counts plus min/max/mean/std-dev of numeric columns
    Basic,
    /// Row counts plus a full profile of each group's rows
    Full,
}

impl StatsLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Basic => "basic",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for StatsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatsLevel {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "basic" => Ok(Self::Basic),
            "full" => Ok(Self::Full),
            other => Err(ProfilerError::Configuration(format!(
                "Unknown stats level '{other}' (expected count, basic or full)"
            ))),
        }
    }
}

/// A grouping request.
///
/// With `cross_file` set, columns may be written `entity.column` to group by
/// a column of a related file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingSpec {
    pub columns: Vec<String>,
    #[serde(default)]
    pub stats_level: StatsLevel,
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
    #[serde(default)]
    pub cross_file: bool,
}

fn default_max_groups() -> usize {
    DEFAULT_MAX_GROUPS
}

impl GroupingSpec {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            stats_level: StatsLevel::default(),
            max_groups: DEFAULT_MAX_GROUPS,
            cross_file: false,
        }
    }

    pub fn with_stats_level(mut self, level: StatsLevel) -> Self {
        self.stats_level = level;
        self
    }

    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups;
        self
    }

    pub fn with_cross_file(mut self, enabled: bool) -> Self {
        self.cross_file = enabled;
        self
    }

    /// Checks the request is well formed, independently of any data.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(ProfilerError::Configuration(
                "At least one grouping column is required".to_string(),
            ));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            SqlSecurity::validate_identifier(column)?;
            if self.columns[..idx].contains(column) {
                return Err(ProfilerError::Configuration(format!(
                    "Grouping column '{column}' is listed twice"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = GroupingSpec::new(["make", "model"]);
        assert_eq!(spec.max_groups, 10);
        assert_eq!(spec.stats_level, StatsLevel::Count);
        assert!(!spec.cross_file);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(GroupingSpec::new(Vec::<String>::new()).validate().is_err());
        assert!(GroupingSpec::new(["a", "a"]).validate().is_err());
        assert!(GroupingSpec::new([""]).validate().is_err());
    }

    #[test]
    fn test_deserialize_config_subset() {
        let spec: GroupingSpec =
            serde_json::from_str(r#"{"columns": ["region"], "stats_level": "basic"}"#).unwrap();
        assert_eq!(spec.stats_level, StatsLevel::Basic);
        assert_eq!(spec.max_groups, DEFAULT_MAX_GROUPS);
        assert!("FULL".parse::<StatsLevel>().is_ok());
        assert!("median".parse::<StatsLevel>().is_err());
    }
}
