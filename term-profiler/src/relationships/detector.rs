//! Foreign-key discovery across file profiles.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::cardinality::{Cardinality, CardinalityClassifier, DEFAULT_UNIQUE_THRESHOLD};
use super::hints::{resolve_reference, ColumnRef, RelationshipHint};
use super::naming::NamingConventions;
use super::overlap::{OverlapStats, ValueOverlapEstimator, DEFAULT_MIN_SAMPLED_VALUES};
use crate::error::Result;
use crate::log_candidate;
use crate::logging::LogConfig;
use crate::profile::{types_compatible, ColumnProfile, FileProfile, TypeFamily};
use crate::profiling::{DEFAULT_MAX_DISTINCT_VALUES, DEFAULT_MAX_KEY_VALUES};
use crate::security::InputValidator;

/// Settings for [`RelationshipDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    #[serde(flatten)]
    pub naming: NamingConventions,
    /// Propose candidates from column names; when false every type-compatible
    /// column pair with a key-like parent is a candidate
    pub match_by_name: bool,
    /// Minimum fraction of child values found in the parent
    pub min_overlap: f64,
    /// Auto relationships below this confidence are dropped
    pub min_confidence: f64,
    /// Uniqueness and non-null ratio a parent column needs to be a key candidate
    pub pk_threshold: f64,
    /// Subtracted from the confidence of matches computed on capped value sets
    pub approximate_penalty: f64,
    /// Uniqueness ratio at which a column counts as unique-like for cardinality
    pub unique_threshold: f64,
    /// Cap on distinct values compared per column
    pub max_distinct_values: usize,
    /// Cap on distinct values compared for the parent key column
    pub max_key_values: usize,
    /// Sampled child values needed before a capped comparison is trusted
    pub min_sampled_values: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            naming: NamingConventions::default(),
            match_by_name: true,
            min_overlap: 0.95,
            min_confidence: 0.5,
            pk_threshold: 0.95,
            approximate_penalty: 0.1,
            unique_threshold: DEFAULT_UNIQUE_THRESHOLD,
            max_distinct_values: DEFAULT_MAX_DISTINCT_VALUES,
            max_key_values: DEFAULT_MAX_KEY_VALUES,
            min_sampled_values: DEFAULT_MIN_SAMPLED_VALUES,
        }
    }
}

impl DetectionConfig {
    pub fn with_naming(mut self, naming: NamingConventions) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_match_by_name(mut self, enabled: bool) -> Self {
        self.match_by_name = enabled;
        self
    }

    pub fn with_min_overlap(mut self, ratio: f64) -> Self {
        self.min_overlap = ratio;
        self
    }

    pub fn with_min_confidence(mut self, ratio: f64) -> Self {
        self.min_confidence = ratio;
        self
    }

    pub fn with_pk_threshold(mut self, ratio: f64) -> Self {
        self.pk_threshold = ratio;
        self
    }

    pub fn with_max_distinct_values(mut self, cap: usize) -> Self {
        self.max_distinct_values = cap;
        self
    }

    pub fn with_max_key_values(mut self, cap: usize) -> Self {
        self.max_key_values = cap;
        self
    }

    pub fn with_min_sampled_values(mut self, count: usize) -> Self {
        self.min_sampled_values = count;
        self
    }

    /// Checks every ratio is finite and within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        InputValidator::validate_ratio(self.min_overlap, "min_overlap")?;
        InputValidator::validate_ratio(self.min_confidence, "min_confidence")?;
        InputValidator::validate_ratio(self.pk_threshold, "pk_threshold")?;
        InputValidator::validate_ratio(self.approximate_penalty, "approximate_penalty")?;
        InputValidator::validate_ratio(self.unique_threshold, "unique_threshold")?;
        Ok(())
    }
}

/// How a relationship entered the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipSource {
    Hint,
    Auto,
}

/// How the child column's name relates to the parent column's, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Same column name
    Exact,
    /// Names agree once key affixes are stripped
    Stripped,
    /// Matched on values alone
    ValueOnly,
}

/// A parent/child pair that has not been classified yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    pub parent: ColumnRef,
    pub child: ColumnRef,
    pub match_kind: MatchKind,
    pub source: RelationshipSource,
    pub confidence: f64,
    /// Child-in-parent overlap; absent for hints
    pub overlap: Option<OverlapStats>,
    /// Multiplicity declared by a hint
    pub declared: Option<Cardinality>,
    /// Row count of the parent file, used to prefer dimension tables
    pub parent_rows: u64,
}

impl RelationshipCandidate {
    /// Ordering used to pick one parent per child column: higher confidence,
    /// then exact names, then the smaller parent file.
    fn preference(&self, other: &Self) -> Ordering {
        other
            .confidence
            .partial_cmp(&self.confidence)
            .unwrap_or(Ordering::Equal)
            .then(self.match_kind.cmp(&other.match_kind))
            .then(self.parent_rows.cmp(&other.parent_rows))
            .then_with(|| self.parent.cmp(&other.parent))
    }
}

/// A classified relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// File id of the parent entity
    pub parent_entity: String,
    pub parent_column: String,
    /// File id of the child entity
    pub child_entity: String,
    pub child_column: String,
    pub cardinality: Cardinality,
    pub confidence: f64,
    pub source: RelationshipSource,
}

impl Relationship {
    /// Whether parent and child are the same entity.
    pub fn is_self_reference(&self) -> bool {
        self.parent_entity == self.child_entity
    }
}

/// Proposes relationships from hints, column names and value overlap.
///
/// Detection is a pure function of its inputs: the same profiles and hints
/// always yield the same relationships in the same order.
#[derive(Debug, Clone, Default)]
pub struct RelationshipDetector {
    config: DetectionConfig,
    log_config: LogConfig,
}

impl RelationshipDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    fn estimator(&self) -> ValueOverlapEstimator {
        ValueOverlapEstimator::new(self.config.max_distinct_values)
            .with_max_key_values(self.config.max_key_values)
            .with_min_sampled_values(self.config.min_sampled_values)
    }

    fn classifier(&self) -> CardinalityClassifier {
        CardinalityClassifier::new().with_unique_threshold(self.config.unique_threshold)
    }

    /// Hint relationships first, then the surviving auto-detected ones.
    ///
    /// Fails only on invalid configuration or on hints naming files or columns
    /// absent from `profiles`. Finding nothing is an empty list.
    #[instrument(skip(self, profiles, hints), fields(files = profiles.len(), hints = hints.len()))]
    pub fn detect(
        &self,
        profiles: &[FileProfile],
        hints: &[RelationshipHint],
    ) -> Result<Vec<Relationship>> {
        self.config.validate()?;

        let hinted = self.hint_candidates(profiles, hints)?;
        let claimed: HashSet<(String, String)> = hinted
            .iter()
            .map(|c| (c.child.file.clone(), c.child.column.clone()))
            .collect();

        let auto: Vec<RelationshipCandidate> = self
            .resolve_conflicts(self.detect_candidates(profiles))
            .into_iter()
            .filter(|c| !claimed.contains(&(c.child.file.clone(), c.child.column.clone())))
            .filter(|c| {
                let keep = c.confidence >= self.config.min_confidence;
                if !keep {
                    log_candidate!(
                        self.log_config,
                        child = %format!("{}.{}", c.child.file, c.child.column),
                        confidence = c.confidence,
                        "Dropping low-confidence candidate"
                    );
                }
                keep
            })
            .collect();

        let classifier = self.classifier();
        let mut relationships = Vec::with_capacity(hinted.len() + auto.len());
        for candidate in hinted.iter().chain(auto.iter()) {
            let (Some(parent), Some(child)) = (
                column_of(profiles, &candidate.parent),
                column_of(profiles, &candidate.child),
            ) else {
                continue;
            };
            relationships.push(classifier.classify(
                candidate,
                parent.uniqueness_ratio(),
                child.uniqueness_ratio(),
            ));
        }

        info!(
            hinted = hinted.len(),
            auto = auto.len(),
            "Relationship detection complete"
        );
        Ok(relationships)
    }

    /// Materialises hints as full-confidence candidates.
    fn hint_candidates(
        &self,
        profiles: &[FileProfile],
        hints: &[RelationshipHint],
    ) -> Result<Vec<RelationshipCandidate>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(hints.len());
        for hint in hints {
            let parent = resolve_reference(&hint.parent, profiles)?;
            let child = resolve_reference(&hint.child, profiles)?;
            let parent_ref = ColumnRef::new(parent.file_id.clone(), hint.parent.column.clone());
            let child_ref = ColumnRef::new(child.file_id.clone(), hint.child.column.clone());

            if !seen.insert((parent_ref.clone(), child_ref.clone())) {
                warn!(
                    parent = %format!("{}.{}", parent_ref.file, parent_ref.column),
                    child = %format!("{}.{}", child_ref.file, child_ref.column),
                    "Ignoring duplicate relationship hint"
                );
                continue;
            }

            candidates.push(RelationshipCandidate {
                match_kind: if parent_ref.column == child_ref.column {
                    MatchKind::Exact
                } else {
                    MatchKind::Stripped
                },
                parent: parent_ref,
                child: child_ref,
                source: RelationshipSource::Hint,
                confidence: 1.0,
                overlap: None,
                declared: hint.declared,
                parent_rows: parent.row_count,
            });
        }
        Ok(candidates)
    }

    /// Every auto candidate whose child-in-parent containment reaches
    /// `min_overlap`, before conflicts between parents are resolved.
    #[instrument(skip(self, profiles))]
    pub fn detect_candidates(&self, profiles: &[FileProfile]) -> Vec<RelationshipCandidate> {
        let estimator = self.estimator();
        let naming = &self.config.naming;
        let mut candidates = Vec::new();

        for child_file in profiles {
            for child_col in &child_file.columns {
                if naming.is_own_key(&child_col.name, &child_file.file_id) {
                    continue;
                }
                let Some(child_values) = child_col.distinct_values.as_ref() else {
                    continue;
                };
                let child_bases = naming.child_bases(&child_col.name);
                if self.config.match_by_name && child_bases.is_empty() {
                    continue;
                }
                if !self.config.match_by_name && !joinable_family(child_col.family()) {
                    continue;
                }

                for parent_file in profiles {
                    let same_file = parent_file.file_id == child_file.file_id;
                    for parent_col in &parent_file.columns {
                        if same_file
                            && (parent_col.name == child_col.name
                                || !naming.is_own_key(&parent_col.name, &parent_file.file_id))
                        {
                            continue;
                        }
                        if !parent_file.is_key_candidate(parent_col, self.config.pk_threshold)
                            || !types_compatible(&child_col.data_type, &parent_col.data_type)
                        {
                            continue;
                        }
                        let Some(match_kind) =
                            self.match_kind(child_col, &child_bases, parent_col, parent_file)
                        else {
                            continue;
                        };
                        let Some(parent_values) = parent_col.distinct_values.as_ref() else {
                            continue;
                        };

                        let overlap = estimator.estimate_key(child_values, parent_values);
                        let child_label = format!("{}.{}", child_file.file_id, child_col.name);
                        let parent_label = format!("{}.{}", parent_file.file_id, parent_col.name);
                        if !overlap.verifiable {
                            warn!(
                                child = %child_label,
                                parent = %parent_label,
                                sampled = overlap.intersection,
                                "Skipped candidate: parent key set too sparse to verify; \
                                 raise max_key_values or declare a hint"
                            );
                            continue;
                        }
                        if overlap.containment_a_in_b < self.config.min_overlap {
                            log_candidate!(
                                self.log_config,
                                child = %child_label,
                                parent = %parent_label,
                                containment = overlap.containment_a_in_b,
                                "Rejected candidate below min_overlap"
                            );
                            continue;
                        }

                        let mut confidence = overlap.containment_a_in_b;
                        if overlap.approximate {
                            confidence = (confidence - self.config.approximate_penalty).max(0.0);
                        }
                        log_candidate!(
                            self.log_config,
                            child = %child_label,
                            parent = %parent_label,
                            confidence,
                            approximate = overlap.approximate,
                            "Accepted candidate"
                        );

                        candidates.push(RelationshipCandidate {
                            parent: ColumnRef::new(&parent_file.file_id, &parent_col.name),
                            child: ColumnRef::new(&child_file.file_id, &child_col.name),
                            match_kind,
                            source: RelationshipSource::Auto,
                            confidence,
                            overlap: Some(overlap),
                            declared: None,
                            parent_rows: parent_file.row_count,
                        });
                    }
                }
            }
        }

        debug!(candidates = candidates.len(), "Validated candidates");
        candidates
    }

    fn match_kind(
        &self,
        child: &ColumnProfile,
        child_bases: &[String],
        parent: &ColumnProfile,
        parent_file: &FileProfile,
    ) -> Option<MatchKind> {
        if child.name.eq_ignore_ascii_case(&parent.name) {
            return Some(MatchKind::Exact);
        }
        let parent_bases = self
            .config
            .naming
            .parent_bases(&parent.name, &parent_file.file_id);
        if child_bases.iter().any(|b| parent_bases.contains(b)) {
            Some(MatchKind::Stripped)
        } else if self.config.match_by_name {
            None
        } else {
            Some(MatchKind::ValueOnly)
        }
    }

    /// Keeps the single preferred parent for each child column.
    pub fn resolve_conflicts(
        &self,
        candidates: Vec<RelationshipCandidate>,
    ) -> Vec<RelationshipCandidate> {
        let mut by_child: BTreeMap<(String, String), Vec<RelationshipCandidate>> = BTreeMap::new();
        let mut order = Vec::new();
        for candidate in candidates {
            let key = (candidate.child.file.clone(), candidate.child.column.clone());
            if !by_child.contains_key(&key) {
                order.push(key.clone());
            }
            by_child.entry(key).or_default().push(candidate);
        }

        order
            .into_iter()
            .filter_map(|key| {
                let mut group = by_child.remove(&key)?;
                group.sort_by(|a, b| a.preference(b));
                if group.len() > 1 {
                    debug!(
                        child = %format!("{}.{}", key.0, key.1),
                        alternatives = group.len() - 1,
                        chosen = %format!("{}.{}", group[0].parent.file, group[0].parent.column),
                        "Resolved ambiguous parent"
                    );
                }
                group.into_iter().next()
            })
            .collect()
    }
}

/// Families whose values are plausible join keys without a naming hint.
fn joinable_family(family: TypeFamily) -> bool {
    matches!(
        family,
        TypeFamily::Integer | TypeFamily::String | TypeFamily::Temporal
    )
}

fn column_of<'a>(profiles: &'a [FileProfile], reference: &ColumnRef) -> Option<&'a ColumnProfile> {
    profiles
        .iter()
        .find(|p| p.file_id == reference.file)
        .and_then(|p| p.column(&reference.column))
}
