//! Guard against per-group work on near-unique grouping keys.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::security::InputValidator;

/// Settings for [`CardinalityProtector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Fraction of `max_groups` above which an approaching-limit warning is attached
    pub warn_ratio: f64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self { warn_ratio: 0.8 }
    }
}

impl ProtectionConfig {
    pub fn with_warn_ratio(mut self, ratio: f64) -> Self {
        self.warn_ratio = ratio;
        self
    }

    pub fn validate(&self) -> Result<()> {
        InputValidator::validate_ratio(self.warn_ratio, "warn_ratio")
    }
}

/// Outcome of the group-count check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionDecision {
    /// Compute stats; the warning, if any, reports a count close to the limit
    Proceed { warning: Option<String> },
    /// Skip all per-group work
    Skip { warning: String },
}

impl ProtectionDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

/// Decides whether a grouping may proceed past counting.
#[derive(Debug, Clone, Default)]
pub struct CardinalityProtector {
    config: ProtectionConfig,
}

impl CardinalityProtector {
    pub fn new(config: ProtectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Checks `group_count` against `max_groups`.
    pub fn check(&self, group_count: usize, max_groups: usize) -> ProtectionDecision {
        if group_count > max_groups {
            let warning = format!(
                "Group count ({group_count}) exceeds max_groups ({max_groups}); \
                 per-group statistics skipped"
            );
            warn!(group_count, max_groups, "Cardinality protection triggered");
            return ProtectionDecision::Skip { warning };
        }

        let approaching = max_groups > 0
            && group_count as f64 > self.config.warn_ratio * max_groups as f64
            && group_count > 1;
        let warning = approaching.then(|| {
            format!("Group count ({group_count}) is approaching max_groups ({max_groups})")
        });
        ProtectionDecision::Proceed { warning }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_over_limit() {
        let decision = CardinalityProtector::default().check(1000, 10);
        let ProtectionDecision::Skip { warning } = decision else {
            panic!("expected skip");
        };
        assert!(warning.contains("1000"));
        assert!(warning.contains("10"));
    }

    #[test]
    fn test_limit_is_inclusive() {
        let decision = CardinalityProtector::default().check(10, 10);
        assert!(!decision.is_skip());
    }

    #[test]
    fn test_approaching_warning() {
        let protector = CardinalityProtector::default();
        assert_eq!(
            protector.check(9, 10),
            ProtectionDecision::Proceed {
                warning: Some("Group count (9) is approaching max_groups (10)".to_string())
            }
        );
        assert_eq!(
            protector.check(8, 10),
            ProtectionDecision::Proceed { warning: None }
        );
    }

    #[test]
    fn test_warn_ratio_validation() {
        assert!(ProtectionConfig::default().with_warn_ratio(1.2).validate().is_err());
        assert!(ProtectionConfig::default().validate().is_ok());
    }
}
