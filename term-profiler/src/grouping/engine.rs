//! The grouping state machine.

use std::collections::HashMap;
use std::fmt;

use arrow::datatypes::SchemaRef;
use datafusion::prelude::SessionContext;
use datafusion::sql::TableReference;
use tracing::{debug, info, instrument};

use super::protection::{CardinalityProtector, ProtectionDecision};
use super::result::GroupingResult;
use super::spec::GroupingSpec;
use super::stats::{GroupStatsCalculator, GroupedRelation};
use crate::error::{ProfilerError, Result};
use crate::logging::LogConfig;
use crate::profile::TypeFamily;
use crate::relationships::{EntityId, RelationshipGraph};
use crate::security::SqlSecurity;

/// Phases a grouping call moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingPhase {
    Validating,
    Counting,
    ProtectedSkip,
    Computing,
    Done,
}

impl fmt::Display for GroupingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "VALIDATING",
            Self::Counting => "COUNTING",
            Self::ProtectedSkip => "PROTECTED_SKIP",
            Self::Computing => "COMPUTING",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Rows to group: one registered table, or a table joined to related files.
#[derive(Debug, Clone, Copy)]
pub enum GroupingSource<'a> {
    File {
        table: &'a str,
    },
    /// `base` is the table whose rows are grouped; dotted columns reach
    /// other entities of `graph`
    CrossFile {
        base: &'a str,
        graph: &'a RelationshipGraph,
    },
}

impl<'a> GroupingSource<'a> {
    pub fn file(table: &'a str) -> Self {
        Self::File { table }
    }

    pub fn cross_file(base: &'a str, graph: &'a RelationshipGraph) -> Self {
        Self::CrossFile { base, graph }
    }

    pub fn base(&self) -> &'a str {
        match self {
            Self::File { table } => table,
            Self::CrossFile { base, .. } => base,
        }
    }
}

/// Where a grouping column comes from.
#[derive(Debug, Clone)]
struct ResolvedColumn {
    name: String,
    entity: Option<EntityId>,
    column: String,
}

/// Groups rows by one or more columns, guarded by cardinality protection.
///
/// # Examples
///
/// ```rust,no_run
/// use datafusion::prelude::SessionContext;
/// use term_profiler::grouping::{GroupingEngine, GroupingSource, GroupingSpec, StatsLevel};
///
/// # async fn example(ctx: &SessionContext) -> term_profiler::error::Result<()> {
/// let spec = GroupingSpec::new(["make", "model"]).with_stats_level(StatsLevel::Basic);
/// let result = GroupingEngine::default()
///     .group(ctx, GroupingSource::file("cars.csv"), &spec)
///     .await?;
/// println!("{}", result.to_json()?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct GroupingEngine {
    protector: CardinalityProtector,
    calculator: GroupStatsCalculator,
    log_config: LogConfig,
}

impl GroupingEngine {
    pub fn new(protector: CardinalityProtector, calculator: GroupStatsCalculator) -> Self {
        Self {
            protector,
            calculator,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.calculator = self.calculator.with_log_config(log_config.clone());
        self.log_config = log_config;
        self
    }

    /// Runs one grouping call.
    ///
    /// Missing columns, missing join paths and an invalid protection config
    /// are errors. Exceeding
    /// `max_groups` is not: it yields a skipped result.
    #[instrument(skip(self, ctx, source, spec), fields(source = source.base(), columns = ?spec.columns))]
    pub async fn group(
        &self,
        ctx: &SessionContext,
        source: GroupingSource<'_>,
        spec: &GroupingSpec,
    ) -> Result<GroupingResult> {
        let mut phase = GroupingPhase::Validating;
        debug!(%phase, "Grouping phase");
        let relation = self.validate(ctx, source, spec).await?;

        phase = GroupingPhase::Counting;
        debug!(%phase, "Grouping phase");
        let (group_count, total_rows) = self.calculator.count_groups(ctx, &relation).await?;

        let warning = match self.protector.check(group_count, spec.max_groups) {
            ProtectionDecision::Skip { warning } => {
                phase = GroupingPhase::ProtectedSkip;
                info!(%phase, group_count, max_groups = spec.max_groups, "Grouping skipped");
                return Ok(GroupingResult::skipped(
                    spec.columns.clone(),
                    spec.stats_level,
                    warning,
                    total_rows,
                ));
            }
            ProtectionDecision::Proceed { warning } => warning,
        };

        phase = GroupingPhase::Computing;
        debug!(%phase, group_count, level = %spec.stats_level, "Grouping phase");
        let groups = self
            .calculator
            .compute(ctx, &relation, spec.stats_level)
            .await?;

        let result = GroupingResult::computed(spec.columns.clone(), spec.stats_level, groups, warning);
        phase = GroupingPhase::Done;
        info!(%phase, groups = result.group_count(), rows = result.total_rows, "Grouping complete");
        Ok(result)
    }

    async fn validate(
        &self,
        ctx: &SessionContext,
        source: GroupingSource<'_>,
        spec: &GroupingSpec,
    ) -> Result<GroupedRelation> {
        spec.validate()?;
        self.protector.config().validate()?;
        let base = source.base();
        let base_schema = table_schema(ctx, base).await?;

        let graph = match source {
            GroupingSource::File { .. } if spec.cross_file => {
                return Err(ProfilerError::Configuration(
                    "Cross-file grouping needs a relationship graph".to_string(),
                ));
            }
            GroupingSource::File { .. } => None,
            GroupingSource::CrossFile { graph, .. } => spec.cross_file.then_some(graph),
        };

        let mut resolved = Vec::with_capacity(spec.columns.len());
        for name in &spec.columns {
            let column = match graph {
                Some(graph) if base_schema.field_with_name(name).is_err() => {
                    self.resolve_dotted(ctx, base, graph, name).await?
                }
                _ => {
                    if base_schema.field_with_name(name).is_err() {
                        return Err(ProfilerError::column_not_found(base, name));
                    }
                    ResolvedColumn {
                        name: name.clone(),
                        entity: None,
                        column: name.clone(),
                    }
                }
            };
            resolved.push(column);
        }

        let numeric_columns = base_schema
            .fields()
            .iter()
            .filter(|f| TypeFamily::of(&f.data_type().to_string()).is_numeric())
            .map(|f| f.name().clone())
            .filter(|name| !spec.columns.contains(name))
            .collect();

        let from_sql = match graph {
            Some(graph) if resolved.iter().any(|c| c.entity.is_some()) => {
                join_sql(base, graph, &resolved)?
            }
            _ => SqlSecurity::escape_identifier(base)?,
        };

        Ok(GroupedRelation {
            from_sql,
            label: base.to_string(),
            keys: spec.columns.clone(),
            numeric_columns,
        })
    }

    /// Resolves `entity.column` against the graph, trying every dot as the
    /// separator so file ids containing dots still match.
    async fn resolve_dotted(
        &self,
        ctx: &SessionContext,
        base: &str,
        graph: &RelationshipGraph,
        name: &str,
    ) -> Result<ResolvedColumn> {
        let splits: Vec<usize> = name.match_indices('.').map(|(i, _)| i).collect();
        if splits.is_empty() {
            return Err(ProfilerError::column_not_found(base, name));
        }
        let base_id = graph
            .entity_by_file(base)
            .or_else(|| graph.resolve_entity(base));

        let mut missing_column = None;
        for idx in splits.into_iter().rev() {
            let (entity_ref, column) = (&name[..idx], &name[idx + 1..]);
            let Some(entity) = graph.resolve_entity(entity_ref) else {
                continue;
            };
            let file = &graph.entity(entity).file;
            let schema = table_schema(ctx, file).await?;
            if schema.field_with_name(column).is_err() {
                missing_column.get_or_insert_with(|| (file.clone(), column.to_string()));
                continue;
            }

            let reachable = base_id.and_then(|from| graph.find_path(from, entity)).is_some();
            if !reachable {
                return Err(ProfilerError::no_relationship_path(base, file.as_str()));
            }
            self.log_resolution(name, file, column);
            return Ok(ResolvedColumn {
                name: name.to_string(),
                entity: Some(entity),
                column: column.to_string(),
            });
        }

        match missing_column {
            Some((file, column)) => Err(ProfilerError::column_not_found(file, column)),
            None => {
                let entity_ref = name.split('.').next().unwrap_or(name);
                Err(ProfilerError::no_relationship_path(base, entity_ref))
            }
        }
    }

    fn log_resolution(&self, name: &str, file: &str, column: &str) {
        crate::log_candidate!(
            self.log_config,
            grouping_column = name,
            file,
            column,
            "Resolved cross-file column"
        );
    }
}

async fn table_schema(ctx: &SessionContext, table: &str) -> Result<SchemaRef> {
    let df = ctx.table(TableReference::bare(table)).await.map_err(|e| {
        ProfilerError::data_source("table", format!("Table '{table}' is not registered: {e}"))
    })?;
    Ok(df.schema().inner().clone())
}

/// `FROM` clause joining the base table to every entity a column refers to.
fn join_sql(base: &str, graph: &RelationshipGraph, columns: &[ResolvedColumn]) -> Result<String> {
    let base_id = graph
        .entity_by_file(base)
        .or_else(|| graph.resolve_entity(base))
        .ok_or_else(|| ProfilerError::no_relationship_path(base, "graph"))?;

    let mut aliases: HashMap<EntityId, String> = HashMap::from([(base_id, "t0".to_string())]);
    let mut joins = Vec::new();
    for column in columns {
        let Some(target) = column.entity else {
            continue;
        };
        let path = graph.find_path(base_id, target).ok_or_else(|| {
            ProfilerError::no_relationship_path(base, graph.entity(target).file.as_str())
        })?;
        for step in path {
            if aliases.contains_key(&step.to) {
                continue;
            }
            let from_alias = aliases
                .get(&step.from)
                .cloned()
                .ok_or_else(|| ProfilerError::Internal("Join path is not contiguous".into()))?;
            let alias = format!("t{}", aliases.len());
            joins.push(format!(
                "JOIN {} AS {alias} ON {from_alias}.{} = {alias}.{}",
                SqlSecurity::escape_identifier(&graph.entity(step.to).file)?,
                SqlSecurity::escape_identifier(&step.from_column)?,
                SqlSecurity::escape_identifier(&step.to_column)?,
            ));
            aliases.insert(step.to, alias);
        }
    }

    let mut selects = vec!["t0.*".to_string()];
    for column in columns {
        if let Some(entity) = column.entity {
            let alias = aliases
                .get(&entity)
                .ok_or_else(|| ProfilerError::Internal("Unjoined entity".into()))?;
            selects.push(format!(
                "{alias}.{} AS {}",
                SqlSecurity::escape_identifier(&column.column)?,
                SqlSecurity::escape_identifier(&column.name)?
            ));
        }
    }

    Ok(format!(
        "(SELECT {} FROM {} AS t0 {}) AS grouped_source",
        selects.join(", "),
        SqlSecurity::escape_identifier(base)?,
        joins.join(" ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{ProtectionConfig, StatsLevel};
    use crate::relationships::{
        Cardinality, Entity, Relationship, RelationshipGraphBuilder, RelationshipSource,
    };
    use serde_json::json;

    async fn create_cars(ctx: &SessionContext) -> Result<()> {
        ctx.sql(
            "CREATE TABLE \"cars.csv\" (make VARCHAR, model VARCHAR, price DOUBLE) AS VALUES
                ('Honda', 'Civic', 22000.0),
                ('Honda', 'Civic', 23000.0),
                ('Honda', 'Accord', 27000.0),
                ('Toyota', 'Corolla', 21000.0),
                ('Toyota', 'Corolla', 21500.0),
                ('Ford', 'Focus', 19000.0)",
        )
        .await?
        .collect()
        .await?;
        Ok(())
    }

    async fn create_shop(ctx: &SessionContext) -> Result<RelationshipGraph> {
        ctx.sql(
            "CREATE TABLE \"customers.csv\" (customer_id BIGINT, region VARCHAR) AS VALUES
                (1, 'EU'), (2, 'EU'), (3, 'US')",
        )
        .await?
        .collect()
        .await?;
        ctx.sql(
            "CREATE TABLE \"orders.csv\" (order_id BIGINT, customer_id BIGINT, amount DOUBLE) AS VALUES
                (10, 1, 5.0), (11, 1, 7.0), (12, 2, 1.0), (13, 3, 4.0)",
        )
        .await?
        .collect()
        .await?;
        ctx.sql("CREATE TABLE \"stores.csv\" (store_id BIGINT) AS VALUES (1)")
            .await?
            .collect()
            .await?;

        let rel = Relationship {
            parent_entity: "customers.csv".to_string(),
            parent_column: "customer_id".to_string(),
            child_entity: "orders.csv".to_string(),
            child_column: "customer_id".to_string(),
            cardinality: Cardinality::OneToMany,
            confidence: 1.0,
            source: RelationshipSource::Hint,
        };
        Ok(RelationshipGraphBuilder::new().build(
            vec![Entity::new("stores.csv").with_primary_key(["store_id"])],
            vec![rel],
        ))
    }

    #[tokio::test]
    async fn test_group_counts_are_repeatable() -> Result<()> {
        let ctx = SessionContext::new();
        create_cars(&ctx).await?;
        let engine = GroupingEngine::default();
        let spec = GroupingSpec::new(["make", "model"]);

        let first = engine.group(&ctx, GroupingSource::file("cars.csv"), &spec).await?;
        let second = engine.group(&ctx, GroupingSource::file("cars.csv"), &spec).await?;
        assert_eq!(first, second);
        assert!(!first.skipped);
        assert_eq!(first.total_rows, 6);
        assert_eq!(first.group_count(), 4);
        assert_eq!(first.groups[0].row_count, 2);
        assert_eq!(first.groups[0].key.get("make"), Some(&json!("Honda")));
        assert_eq!(first.groups[0].key.get("model"), Some(&json!("Civic")));
        assert!(first.groups.iter().all(|g| g.basic_stats.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_basic_stats_exclude_grouping_columns() -> Result<()> {
        let ctx = SessionContext::new();
        create_cars(&ctx).await?;
        let spec = GroupingSpec::new(["make"]).with_stats_level(StatsLevel::Basic);
        let result = GroupingEngine::default()
            .group(&ctx, GroupingSource::file("cars.csv"), &spec)
            .await?;

        let honda = &result.groups[0];
        assert_eq!(honda.row_count, 3);
        let stats = honda.basic_stats.as_ref().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats["price"].min, Some(22000.0));
        assert_eq!(stats["price"].max, Some(27000.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_protection_skips_and_keeps_totals() -> Result<()> {
        let ctx = SessionContext::new();
        create_cars(&ctx).await?;
        let spec = GroupingSpec::new(["price"])
            .with_stats_level(StatsLevel::Full)
            .with_max_groups(3);
        let result = GroupingEngine::default()
            .group(&ctx, GroupingSource::file("cars.csv"), &spec)
            .await?;

        assert!(result.skipped);
        assert!(result.groups.is_empty());
        assert_eq!(result.total_rows, 6);
        let warning = result.warning.unwrap();
        assert!(warning.contains("(6)"));
        assert!(warning.contains("(3)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_warn_ratio_is_rejected() -> Result<()> {
        let ctx = SessionContext::new();
        create_cars(&ctx).await?;
        let spec = GroupingSpec::new(["make"]);

        for ratio in [1.5, f64::NAN] {
            let engine = GroupingEngine::new(
                CardinalityProtector::new(ProtectionConfig::default().with_warn_ratio(ratio)),
                GroupStatsCalculator::default(),
            );
            let err = engine
                .group(&ctx, GroupingSource::file("cars.csv"), &spec)
                .await
                .unwrap_err();
            assert!(matches!(err, ProfilerError::Configuration(_)));
            assert!(err.to_string().contains("warn_ratio"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_column_is_fatal() -> Result<()> {
        let ctx = SessionContext::new();
        create_cars(&ctx).await?;
        let err = GroupingEngine::default()
            .group(&ctx, GroupingSource::file("cars.csv"), &GroupingSpec::new(["colour"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProfilerError::ColumnNotFound { ref column, .. } if column == "colour"));
        Ok(())
    }

    #[tokio::test]
    async fn test_cross_file_group_by_parent_column() -> Result<()> {
        let ctx = SessionContext::new();
        let graph = create_shop(&ctx).await?;
        let spec = GroupingSpec::new(["customer.region"])
            .with_cross_file(true)
            .with_stats_level(StatsLevel::Basic);
        let result = GroupingEngine::default()
            .group(&ctx, GroupingSource::cross_file("orders.csv", &graph), &spec)
            .await?;

        assert_eq!(result.total_rows, 4);
        assert_eq!(result.groups.len(), 2);
        let eu = &result.groups[0];
        assert_eq!(eu.key.get("customer.region"), Some(&json!("EU")));
        assert_eq!(eu.row_count, 3);
        assert_eq!(eu.basic_stats.as_ref().unwrap()["amount"].max, Some(7.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_cross_file_without_path() -> Result<()> {
        let ctx = SessionContext::new();
        let graph = create_shop(&ctx).await?;
        let spec = GroupingSpec::new(["stores.store_id"]).with_cross_file(true);
        let err = GroupingEngine::default()
            .group(&ctx, GroupingSource::cross_file("orders.csv", &graph), &spec)
            .await
            .unwrap_err();
        assert!(matches!(err, ProfilerError::NoRelationshipPath { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_cross_file_flag_needs_graph() -> Result<()> {
        let ctx = SessionContext::new();
        create_cars(&ctx).await?;
        let spec = GroupingSpec::new(["make"]).with_cross_file(true);
        let err = GroupingEngine::default()
            .group(&ctx, GroupingSource::file("cars.csv"), &spec)
            .await
            .unwrap_err();
        assert!(matches!(err, ProfilerError::Configuration(_)));
        Ok(())
    }
}
