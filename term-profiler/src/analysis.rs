//! Dataset-level analysis tying the engines together.
//!
//! [`DatasetAnalyzer`] takes already computed [`FileProfile`]s, compares the
//! schemas of each dataset's partitions under a [`DriftPolicy`], detects and classifies relationships, and
//! assembles the [`RelationshipGraph`]. Non-fatal findings are collected as
//! warnings on the returned [`DatasetAnalysis`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::logging::LogConfig;
use crate::profile::FileProfile;
use crate::relationships::{
    DetectionConfig, GraphExport, GraphSummary, HintsDocument, Relationship, RelationshipDetector,
    RelationshipGraph, RelationshipGraphBuilder,
};
use crate::schema::{DriftPolicy, SchemaComparator, SchemaComparisonResult};

/// Settings for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detection: DetectionConfig,
    pub drift_policy: DriftPolicy,
    /// Report a changed column order as drift
    pub order_sensitive: bool,
    /// Compare every file as a partition of one dataset instead of grouping
    /// files by [`dataset_name`](crate::schema::dataset_name)
    pub single_dataset: bool,
    /// Skip relationship detection entirely when false
    pub detect_relationships: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            detection: Default::default(),
            drift_policy: DriftPolicy::Warn,
            order_sensitive: false,
            single_dataset: false,
            detect_relationships: true,
        }
    }
}

impl AnalysisConfig {
    pub fn with_detection(mut self, detection: DetectionConfig) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_drift_policy(mut self, policy: DriftPolicy) -> Self {
        self.drift_policy = policy;
        self
    }

    pub fn with_order_sensitive(mut self, enabled: bool) -> Self {
        self.order_sensitive = enabled;
        self
    }

    pub fn with_single_dataset(mut self, enabled: bool) -> Self {
        self.single_dataset = enabled;
        self
    }

    pub fn with_relationships(mut self, enabled: bool) -> Self {
        self.detect_relationships = enabled;
        self
    }
}

/// Everything learned about a dataset.
#[derive(Debug, Clone)]
pub struct DatasetAnalysis {
    pub analyzed_at: DateTime<Utc>,
    pub files: Vec<FileProfile>,
    /// One comparison per dataset
    pub schemas: Vec<SchemaComparisonResult>,
    pub relationships: Vec<Relationship>,
    pub graph: RelationshipGraph,
    pub warnings: Vec<String>,
}

/// Serialized shape of a [`DatasetAnalysis`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetExport {
    pub analyzed_at: DateTime<Utc>,
    /// Profiles without their distinct value sets
    pub files: Vec<FileProfile>,
    pub schema_comparison: Vec<SchemaComparisonResult>,
    pub relationship_graph: GraphExport,
    pub summary: GraphSummary,
    pub warnings: Vec<String>,
}

impl DatasetAnalysis {
    pub fn export(&self) -> DatasetExport {
        let files = self
            .files
            .iter()
            .cloned()
            .map(|mut profile| {
                for column in &mut profile.columns {
                    column.distinct_values = None;
                }
                profile
            })
            .collect();
        DatasetExport {
            analyzed_at: self.analyzed_at,
            files,
            schema_comparison: self.schemas.clone(),
            relationship_graph: self.graph.to_dict(),
            summary: self.graph.summary(),
            warnings: self.warnings.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }
}

/// Runs schema comparison, relationship detection and graph assembly.
#[derive(Debug, Clone, Default)]
pub struct DatasetAnalyzer {
    config: AnalysisConfig,
    log_config: LogConfig,
}

impl DatasetAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyzes `profiles`, with `hints` taking precedence over detection.
    ///
    /// Fails on strict-policy drift, on invalid configuration, and on hints
    /// that name unknown files or columns.
    #[instrument(skip_all, fields(files = profiles.len()))]
    pub fn analyze(
        &self,
        profiles: Vec<FileProfile>,
        hints: Option<&HintsDocument>,
    ) -> Result<DatasetAnalysis> {
        let mut warnings = Vec::new();

        let comparator = SchemaComparator::new().with_order_sensitive(self.config.order_sensitive);
        let schemas = if self.config.single_dataset {
            vec![comparator.compare_profiles(&profiles)]
        } else {
            comparator.compare_datasets(&profiles)
        };
        for schema in &schemas {
            if let Some(warning) = self.config.drift_policy.enforce(schema)? {
                warnings.push(warning);
            }
        }

        let detection = match hints.and_then(|h| h.naming.as_ref()) {
            Some(overrides) => overrides.apply(self.config.detection.clone()),
            None => self.config.detection.clone(),
        };
        let relationships = if self.config.detect_relationships {
            let hint_list = hints.map(|h| h.hints.as_slice()).unwrap_or_default();
            RelationshipDetector::new(detection.clone())
                .with_log_config(self.log_config.clone())
                .detect(&profiles, hint_list)?
        } else {
            Vec::new()
        };

        let graph = RelationshipGraphBuilder::new()
            .with_pk_threshold(detection.pk_threshold)
            .with_naming(detection.naming)
            .build_from_profiles(&profiles, relationships.clone());
        if graph.has_cycles() {
            warn!("Relationship graph contains cycles");
            warnings.push("Relationship graph contains cycles".to_string());
        }

        info!(
            relationships = relationships.len(),
            entities = graph.entities().len(),
            warnings = warnings.len(),
            "Dataset analysis complete"
        );
        Ok(DatasetAnalysis {
            analyzed_at: Utc::now(),
            files: profiles,
            schemas,
            relationships,
            graph,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfilerError;
    use crate::profile::{ColumnProfile, Engine};
    use crate::relationships::{Cardinality, ColumnRef, RelationshipHint, RelationshipSource};

    fn prices(file: &str, with_volume: bool) -> FileProfile {
        let mut profile = FileProfile::new(file, 2, Engine::External)
            .with_column(ColumnProfile::from_values("symbol", "Utf8", ["A", "B"].map(Some), 10))
            .with_column(ColumnProfile::from_values("close", "Float64", ["1.0", "2.0"].map(Some), 10));
        if with_volume {
            profile = profile.with_column(ColumnProfile::from_values(
                "volume",
                "Int64",
                ["10", "20"].map(Some),
                10,
            ));
        }
        profile
    }

    #[test]
    fn test_drift_warns_by_default() {
        let analysis = DatasetAnalyzer::default()
            .analyze(
                vec![prices("prices_2024_01.csv", false), prices("prices_2024_02.csv", true)],
                None,
            )
            .unwrap();
        assert_eq!(analysis.schemas.len(), 1);
        assert!(!analysis.schemas[0].consistent);
        assert_eq!(analysis.warnings.len(), 1);
        assert!(analysis.warnings[0].contains("volume"));
    }

    #[test]
    fn test_strict_drift_fails() {
        let analyzer = DatasetAnalyzer::new(
            AnalysisConfig::default().with_drift_policy(DriftPolicy::Strict),
        );
        let err = analyzer
            .analyze(
                vec![prices("prices_2024_01.csv", false), prices("prices_2024_02.csv", true)],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ProfilerError::SchemaDrift { .. }));
        assert_eq!(err.exit_code().code(), 12);
    }

    #[test]
    fn test_strict_drift_ignores_unrelated_tables() {
        let customers = FileProfile::new("customers.csv", 2, Engine::External)
            .with_column(ColumnProfile::from_values("customer_id", "Int64", ["1", "2"].map(Some), 10))
            .with_column(ColumnProfile::from_values("name", "Utf8", ["Ann", "Bob"].map(Some), 10));
        let orders = FileProfile::new("orders.csv", 3, Engine::External)
            .with_column(ColumnProfile::from_values("order_id", "Int64", ["7", "8", "9"].map(Some), 10))
            .with_column(ColumnProfile::from_values("customer_id", "Int64", ["1", "1", "2"].map(Some), 10));

        let config = AnalysisConfig::default()
            .with_drift_policy(DriftPolicy::Strict)
            .with_relationships(true);
        let analysis = DatasetAnalyzer::new(config.clone())
            .analyze(vec![customers.clone(), orders.clone()], None)
            .unwrap();
        assert!(analysis.schemas.iter().all(|s| s.consistent));
        assert!(analysis.warnings.is_empty());
        assert_eq!(analysis.relationships.len(), 1);

        let err = DatasetAnalyzer::new(config.with_single_dataset(true))
            .analyze(vec![customers, orders], None)
            .unwrap_err();
        assert!(matches!(err, ProfilerError::SchemaDrift { .. }));
    }

    #[test]
    fn test_hints_and_export() {
        let exchanges = FileProfile::new("exchanges.csv", 2, Engine::External).with_column(
            ColumnProfile::from_values("exchange_code", "Utf8", ["NYSE", "NASDAQ"].map(Some), 10),
        );
        let instruments = FileProfile::new("instruments.csv", 3, Engine::External).with_column(
            ColumnProfile::from_values("exchange", "Utf8", ["NYSE", "NYSE", "NASDAQ"].map(Some), 10),
        );
        let hints = HintsDocument {
            hints: vec![RelationshipHint::new(
                ColumnRef::new("exchanges.csv", "exchange_code"),
                ColumnRef::new("instruments.csv", "exchange"),
            )],
            naming: None,
        };

        let analysis = DatasetAnalyzer::new(AnalysisConfig::default())
            .analyze(vec![exchanges, instruments], Some(&hints))
            .unwrap();
        assert_eq!(analysis.relationships.len(), 1);
        let rel = &analysis.relationships[0];
        assert_eq!(rel.source, RelationshipSource::Hint);
        assert_eq!(rel.confidence, 1.0);
        assert_eq!(rel.cardinality, Cardinality::OneToMany);

        let export: serde_json::Value = serde_json::from_str(&analysis.to_json().unwrap()).unwrap();
        assert_eq!(export["relationship_graph"]["relationships"][0]["source"], "hint");
        assert!(export["files"][0]["columns"][0].get("distinct_values").is_none());
    }

    #[test]
    fn test_detection_can_be_disabled() {
        let config = AnalysisConfig::default().with_relationships(false);
        let analysis = DatasetAnalyzer::new(config)
            .analyze(vec![prices("jan.csv", false)], None)
            .unwrap();
        assert!(analysis.relationships.is_empty());
        assert!(analysis.graph.is_empty());
    }
}
