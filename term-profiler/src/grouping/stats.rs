//! Per-group statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use datafusion::prelude::SessionContext;
use datafusion::sql::TableReference;
use serde_json::Value;
use tracing::{debug, instrument};

use super::result::{BasicStats, GroupKey, GroupStats};
use super::spec::StatsLevel;
use crate::error::{ProfilerError, Result};
use crate::log_query;
use crate::logging::LogConfig;
use crate::profiling::{DataFusionProfiler, ProfilingBackend};
use crate::security::SqlSecurity;

/// A relation prepared for grouping.
#[derive(Debug, Clone)]
pub(crate) struct GroupedRelation {
    /// SQL `FROM` target, a table or an aliased subquery
    pub from_sql: String,
    /// Human-readable name of the source, used to label group profiles
    pub label: String,
    /// Output column names of the grouping keys, in grouping order
    pub keys: Vec<String>,
    /// Numeric non-key columns summarised at `basic` level
    pub numeric_columns: Vec<String>,
}

impl GroupedRelation {
    fn escaped_keys(&self) -> Result<Vec<String>> {
        self.keys
            .iter()
            .map(|k| SqlSecurity::escape_identifier(k))
            .collect()
    }
}

/// Computes [`GroupStats`] for a relation at a given [`StatsLevel`].
///
/// `count` and `basic` are answered by a single `GROUP BY` query. `full`
/// filters the relation once per group and hands each slice to the
/// profiling backend.
#[derive(Clone)]
pub struct GroupStatsCalculator {
    backend: Arc<dyn ProfilingBackend>,
    log_config: LogConfig,
}

impl std::fmt::Debug for GroupStatsCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupStatsCalculator")
            .field("engine", &self.backend.engine())
            .finish()
    }
}

impl Default for GroupStatsCalculator {
    fn default() -> Self {
        Self::new(Arc::new(DataFusionProfiler::default()))
    }
}

impl GroupStatsCalculator {
    pub fn new(backend: Arc<dyn ProfilingBackend>) -> Self {
        Self {
            backend,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    async fn query(&self, ctx: &SessionContext, sql: &str) -> Result<Vec<RecordBatch>> {
        log_query!(self.log_config, sql, "Executing grouping query");
        Ok(ctx.sql(sql).await?.collect().await?)
    }

    /// Number of distinct keys and total rows of the relation.
    pub(crate) async fn count_groups(
        &self,
        ctx: &SessionContext,
        relation: &GroupedRelation,
    ) -> Result<(usize, u64)> {
        let keys = relation.escaped_keys()?.join(", ");
        let sql = format!(
            "SELECT COUNT(*), CAST(COALESCE(SUM(n), 0) AS BIGINT) FROM \
             (SELECT COUNT(*) AS n FROM {} GROUP BY {keys}) AS grouped",
            relation.from_sql
        );
        let batches = self.query(ctx, &sql).await?;
        let batch = batches
            .iter()
            .find(|b| b.num_rows() > 0)
            .ok_or_else(|| ProfilerError::Internal("Group count query returned no rows".into()))?;
        let groups = u64_at(batch.column(0), 0).unwrap_or(0);
        let rows = u64_at(batch.column(1), 0).unwrap_or(0);
        Ok((groups as usize, rows))
    }

    /// Row counts, plus the statistics `level` asks for, of every group.
    #[instrument(skip(self, ctx, relation), fields(source = %relation.label))]
    pub(crate) async fn compute(
        &self,
        ctx: &SessionContext,
        relation: &GroupedRelation,
        level: StatsLevel,
    ) -> Result<Vec<GroupStats>> {
        let keys = relation.escaped_keys()?;
        let numeric: Vec<String> = if level == StatsLevel::Count {
            Vec::new()
        } else {
            relation.numeric_columns.clone()
        };

        let mut selects = keys.clone();
        selects.push("COUNT(*)".to_string());
        for column in &numeric {
            let c = SqlSecurity::escape_identifier(column)?;
            selects.push(format!("MIN(CAST({c} AS DOUBLE))"));
            selects.push(format!("MAX(CAST({c} AS DOUBLE))"));
            selects.push(format!("AVG(CAST({c} AS DOUBLE))"));
            selects.push(format!("STDDEV(CAST({c} AS DOUBLE))"));
        }
        let sql = format!(
            "SELECT {} FROM {} GROUP BY {}",
            selects.join(", "),
            relation.from_sql,
            keys.join(", ")
        );

        let key_count = keys.len();
        let mut groups = Vec::new();
        for batch in self.query(ctx, &sql).await? {
            for row in 0..batch.num_rows() {
                let mut entries = Vec::with_capacity(key_count);
                for (idx, name) in relation.keys.iter().enumerate() {
                    entries.push((name.clone(), json_value(batch.column(idx), row)?));
                }
                let row_count = u64_at(batch.column(key_count), row).unwrap_or(0);
                let mut stats = GroupStats::new(GroupKey::new(entries), row_count);

                if level != StatsLevel::Count {
                    let mut per_column = BTreeMap::new();
                    for (i, column) in numeric.iter().enumerate() {
                        let base = key_count + 1 + i * 4;
                        per_column.insert(
                            column.clone(),
                            BasicStats {
                                min: f64_at(batch.column(base), row),
                                max: f64_at(batch.column(base + 1), row),
                                mean: f64_at(batch.column(base + 2), row),
                                std_dev: f64_at(batch.column(base + 3), row),
                            },
                        );
                    }
                    stats.basic_stats = Some(per_column);
                }
                groups.push(stats);
            }
        }

        if level == StatsLevel::Full {
            for (idx, group) in groups.iter_mut().enumerate() {
                group.full_profile = Some(self.profile_group(ctx, relation, &group.key, idx).await?);
            }
        }

        debug!(groups = groups.len(), level = %level, "Computed group statistics");
        Ok(groups)
    }

    async fn profile_group(
        &self,
        ctx: &SessionContext,
        relation: &GroupedRelation,
        key: &GroupKey,
        idx: usize,
    ) -> Result<crate::profile::FileProfile> {
        let mut conditions = Vec::with_capacity(key.entries().len());
        for (column, value) in key.entries() {
            conditions.push(format!(
                "{} IS NOT DISTINCT FROM {}",
                SqlSecurity::escape_identifier(column)?,
                sql_literal(value)?
            ));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            relation.from_sql,
            conditions.join(" AND ")
        );
        log_query!(self.log_config, &sql, "Filtering group rows");
        let view = ctx.sql(&sql).await?.into_view();

        let table = format!("__term_profiler_group_{idx}");
        ctx.register_table(TableReference::bare(table.as_str()), view)?;
        let profile = self
            .backend
            .profile_table(ctx, &table, &format!("{}[{key}]", relation.label))
            .await;
        ctx.deregister_table(TableReference::bare(table.as_str()))?;
        profile
    }
}

/// SQL literal for a group key value.
fn sql_literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => SqlSecurity::escape_literal(s)?,
        other => SqlSecurity::escape_literal(&other.to_string())?,
    })
}

/// Converts one cell into a JSON value, keeping numbers and booleans typed.
pub(crate) fn json_value(array: &ArrayRef, row: usize) -> Result<Value> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let any = array.as_any();
    macro_rules! integer {
        ($($ty:ty),*) => {
            $(
                if let Some(arr) = any.downcast_ref::<$ty>() {
                    return Ok(Value::from(arr.value(row)));
                }
            )*
        };
    }
    integer!(
        Int8Array,
        Int16Array,
        Int32Array,
        Int64Array,
        UInt8Array,
        UInt16Array,
        UInt32Array,
        UInt64Array
    );

    if let Some(arr) = any.downcast_ref::<Float64Array>() {
        return Ok(float_value(arr.value(row)));
    }
    if let Some(arr) = any.downcast_ref::<Float32Array>() {
        return Ok(float_value(f64::from(arr.value(row))));
    }
    if let Some(arr) = any.downcast_ref::<BooleanArray>() {
        return Ok(Value::Bool(arr.value(row)));
    }
    Ok(Value::String(array_value_to_string(array, row)?))
}

fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn u64_at(array: &ArrayRef, row: usize) -> Option<u64> {
    if array.is_null(row) {
        return None;
    }
    if let Some(arr) = array.as_any().downcast_ref::<Int64Array>() {
        Some(arr.value(row).max(0) as u64)
    } else {
        array
            .as_any()
            .downcast_ref::<UInt64Array>()
            .map(|arr| arr.value(row))
    }
}

fn f64_at(array: &ArrayRef, row: usize) -> Option<f64> {
    if array.is_null(row) {
        return None;
    }
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .map(|arr| arr.value(row))
}
