//! Profiling backends that turn registered tables into [`FileProfile`]s.
//!
//! The relationship and schema layers are engine-agnostic. They consume
//! profiles, and the profile records which [`Engine`] computed it. The
//! bundled [`DataFusionProfiler`] issues one counting query per table plus one
//! statistics query and one distinct-value query per column.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use datafusion::prelude::SessionContext;
//! use term_profiler::profiling::{DataFusionProfiler, ProfilingBackend, ProfilingConfig};
//! use term_profiler::sources::register_file;
//!
//! # async fn example() -> term_profiler::error::Result<()> {
//! let ctx = SessionContext::new();
//! register_file(&ctx, Path::new("exchanges.csv"), "exchanges.csv").await?;
//!
//! let profiler = DataFusionProfiler::new(ProfilingConfig::default());
//! let profile = profiler.profile_table(&ctx, "exchanges.csv", "exchanges.csv").await?;
//! println!("{} rows, {} columns", profile.row_count, profile.columns.len());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, UInt64Array};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use async_trait::async_trait;
use datafusion::prelude::SessionContext;
use datafusion::sql::TableReference;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{ProfilerError, Result};
use crate::log_query;
use crate::logging::LogConfig;
use crate::profile::{ColumnProfile, ColumnStats, Engine, FileProfile, TypeFamily, ValueSet};
use crate::security::{InputValidator, SqlSecurity};
use crate::sources;

/// Default cap on the number of distinct values kept per column.
pub const DEFAULT_MAX_DISTINCT_VALUES: usize = 100_000;

/// Default cap for key-like columns, whose sets back foreign-key membership tests.
pub const DEFAULT_MAX_KEY_VALUES: usize = 10_000_000;

/// Uniqueness and non-null ratio at which a column is collected under the key cap.
pub const DEFAULT_KEY_THRESHOLD: f64 = 0.95;

/// Configuration for profile computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Maximum distinct values collected per column before the set is flagged approximate
    pub max_distinct_values: usize,
    /// Cap used instead for key-like columns; never lower than `max_distinct_values`
    pub max_key_values: usize,
    /// Uniqueness and non-null ratio that makes a column key-like
    pub key_threshold: f64,
    /// Whether to collect distinct value sets at all
    pub collect_values: bool,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            max_distinct_values: DEFAULT_MAX_DISTINCT_VALUES,
            max_key_values: DEFAULT_MAX_KEY_VALUES,
            key_threshold: DEFAULT_KEY_THRESHOLD,
            collect_values: true,
        }
    }
}

impl ProfilingConfig {
    pub fn with_max_distinct_values(mut self, cap: usize) -> Self {
        self.max_distinct_values = cap;
        self
    }

    pub fn with_max_key_values(mut self, cap: usize) -> Self {
        self.max_key_values = cap;
        self
    }

    pub fn with_key_threshold(mut self, ratio: f64) -> Self {
        self.key_threshold = ratio;
        self
    }

    pub fn with_collect_values(mut self, enabled: bool) -> Self {
        self.collect_values = enabled;
        self
    }

    /// Checks the key threshold is finite and within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        InputValidator::validate_ratio(self.key_threshold, "key_threshold")
    }

    /// Distinct-value cap for `column` of `profile`.
    pub fn value_cap(&self, profile: &FileProfile, column: &ColumnProfile) -> usize {
        if profile.is_key_candidate(column, self.key_threshold) {
            self.max_key_values.max(self.max_distinct_values)
        } else {
            self.max_distinct_values
        }
    }
}

/// An engine able to summarise a registered table.
#[async_trait]
pub trait ProfilingBackend: Send + Sync {
    /// Engine tag recorded on every profile this backend produces.
    fn engine(&self) -> Engine;

    /// Profiles `table`, labelling the result with `file_id`.
    async fn profile_table(
        &self,
        ctx: &SessionContext,
        table: &str,
        file_id: &str,
    ) -> Result<FileProfile>;
}

/// Profiling backend running SQL against a DataFusion session.
#[derive(Debug, Clone, Default)]
pub struct DataFusionProfiler {
    config: ProfilingConfig,
    log_config: LogConfig,
}

impl DataFusionProfiler {
    pub fn new(config: ProfilingConfig) -> Self {
        Self {
            config,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &ProfilingConfig {
        &self.config
    }

    async fn query(&self, ctx: &SessionContext, sql: &str) -> Result<Vec<RecordBatch>> {
        log_query!(self.log_config, sql, "Executing profiling query");
        Ok(ctx.sql(sql).await?.collect().await?)
    }

    async fn column_stats(
        &self,
        ctx: &SessionContext,
        table: &str,
        column: &str,
        family: TypeFamily,
    ) -> Result<ColumnStats> {
        let sql = match family {
            TypeFamily::Integer | TypeFamily::Float => format!(
                "SELECT MIN(CAST({column} AS DOUBLE)), MAX(CAST({column} AS DOUBLE)), \
                 AVG(CAST({column} AS DOUBLE)), STDDEV(CAST({column} AS DOUBLE)) FROM {table}"
            ),
            TypeFamily::String => format!(
                "SELECT MIN(CAST(CHARACTER_LENGTH({column}) AS BIGINT)), \
                 MAX(CAST(CHARACTER_LENGTH({column}) AS BIGINT)) FROM {table}"
            ),
            TypeFamily::Temporal => format!("SELECT MIN({column}), MAX({column}) FROM {table}"),
            TypeFamily::Boolean => format!(
                "SELECT CAST(COALESCE(SUM(CASE WHEN {column} THEN 1 ELSE 0 END), 0) AS BIGINT) FROM {table}"
            ),
            TypeFamily::Other => return Ok(ColumnStats::Other),
        };

        let batches = self.query(ctx, &sql).await?;
        let Some(batch) = batches.iter().find(|b| b.num_rows() > 0) else {
            return Ok(ColumnStats::Other);
        };

        let stats = match family {
            TypeFamily::Integer | TypeFamily::Float => ColumnStats::Numeric {
                min: optional_f64(batch.column(0)),
                max: optional_f64(batch.column(1)),
                mean: optional_f64(batch.column(2)),
                std_dev: optional_f64(batch.column(3)),
            },
            TypeFamily::String => ColumnStats::Text {
                min_length: optional_u64(batch.column(0)),
                max_length: optional_u64(batch.column(1)),
            },
            TypeFamily::Temporal => ColumnStats::Temporal {
                min: optional_string(batch.column(0))?,
                max: optional_string(batch.column(1))?,
            },
            TypeFamily::Boolean => ColumnStats::Boolean {
                true_count: optional_u64(batch.column(0)).unwrap_or(0),
            },
            TypeFamily::Other => ColumnStats::Other,
        };
        Ok(stats)
    }

    async fn distinct_values(
        &self,
        ctx: &SessionContext,
        table: &str,
        column: &str,
        cap: usize,
    ) -> Result<ValueSet> {
        // Values are ranked by SHA-256 of their string form, the order
        // `ValueSet` samples in, so a capped set is a bottom-k hash sample.
        let sql = format!(
            "SELECT v FROM (SELECT DISTINCT CAST({column} AS VARCHAR) AS v FROM {table} \
             WHERE {column} IS NOT NULL) AS distinct_values ORDER BY sha256(v) LIMIT {}",
            cap.saturating_add(1)
        );

        let mut values = Vec::new();
        for batch in self.query(ctx, &sql).await? {
            let array = batch.column(0);
            for row in 0..batch.num_rows() {
                if !array.is_null(row) {
                    values.push(array_value_to_string(array, row)?);
                }
            }
        }
        Ok(ValueSet::collect(values, cap))
    }
}

#[async_trait]
impl ProfilingBackend for DataFusionProfiler {
    fn engine(&self) -> Engine {
        Engine::DataFusion
    }

    #[instrument(skip(self, ctx))]
    async fn profile_table(
        &self,
        ctx: &SessionContext,
        table: &str,
        file_id: &str,
    ) -> Result<FileProfile> {
        self.config.validate()?;
        let schema = ctx
            .table(TableReference::bare(table))
            .await?
            .schema()
            .inner()
            .clone();
        let table_sql = SqlSecurity::escape_identifier(table)?;

        let mut selects = vec!["COUNT(*)".to_string()];
        let mut escaped = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let column = SqlSecurity::escape_identifier(field.name())?;
            selects.push(format!("COUNT({column})"));
            selects.push(format!("COUNT(DISTINCT {column})"));
            escaped.push(column);
        }

        let counts_sql = format!("SELECT {} FROM {table_sql}", selects.join(", "));
        let batches = self.query(ctx, &counts_sql).await?;
        let batch = batches
            .iter()
            .find(|b| b.num_rows() > 0)
            .ok_or_else(|| ProfilerError::Internal(format!("No count row for '{table}'")))?;

        let row_count = extract_u64(batch, 0)?;
        let mut profile = FileProfile::new(file_id, row_count, self.engine());

        for (idx, field) in schema.fields().iter().enumerate() {
            let non_null = extract_u64(batch, 1 + idx * 2)?;
            let distinct = extract_u64(batch, 2 + idx * 2)?;
            let data_type = field.data_type().to_string();
            let family = TypeFamily::of(&data_type);

            let mut column = ColumnProfile::new(field.name().clone(), data_type).with_counts(
                non_null,
                row_count.saturating_sub(non_null),
                distinct,
            );
            column.stats = self
                .column_stats(ctx, &table_sql, &escaped[idx], family)
                .await?;
            if self.config.collect_values && family != TypeFamily::Other {
                let cap = self.config.value_cap(&profile, &column);
                column.distinct_values = Some(
                    self.distinct_values(ctx, &table_sql, &escaped[idx], cap)
                        .await?,
                );
            }
            profile.columns.push(column);
        }

        info!(
            file = file_id,
            rows = row_count,
            columns = profile.columns.len(),
            "Profiled table"
        );
        Ok(profile)
    }
}

/// Registers each file under its file id and profiles it.
///
/// Registration is sequential so duplicate ids are rejected up front; the
/// tables are then profiled concurrently. Profiles keep the order of `paths`.
#[instrument(skip(ctx, backend, paths), fields(files = paths.len()))]
pub async fn profile_files(
    ctx: &SessionContext,
    backend: &dyn ProfilingBackend,
    paths: &[PathBuf],
) -> Result<Vec<FileProfile>> {
    let mut ids = Vec::with_capacity(paths.len());
    for path in paths {
        let id = sources::file_id(path);
        if ctx.table_exist(TableReference::bare(id.as_str()))? {
            return Err(ProfilerError::Configuration(format!(
                "Duplicate file id '{id}'; file names must be unique within a run"
            )));
        }
        sources::register_file(ctx, path, &id).await?;
        ids.push(id);
    }

    let profiles = try_join_all(ids.iter().map(|id| backend.profile_table(ctx, id, id))).await?;
    Ok(profiles
        .into_iter()
        .zip(paths)
        .map(|(profile, path)| profile.with_path(path.clone()))
        .collect())
}

fn extract_u64(batch: &RecordBatch, col_idx: usize) -> Result<u64> {
    optional_u64(batch.column(col_idx))
        .ok_or_else(|| ProfilerError::Internal(format!("Expected integer count at {col_idx}")))
}

fn optional_u64(column: &ArrayRef) -> Option<u64> {
    if column.is_null(0) {
        return None;
    }
    if let Some(arr) = column.as_any().downcast_ref::<Int64Array>() {
        Some(arr.value(0).max(0) as u64)
    } else {
        column
            .as_any()
            .downcast_ref::<UInt64Array>()
            .map(|arr| arr.value(0))
    }
}

fn optional_f64(column: &ArrayRef) -> Option<f64> {
    if column.is_null(0) {
        return None;
    }
    column
        .as_any()
        .downcast_ref::<Float64Array>()
        .map(|arr| arr.value(0))
}

fn optional_string(column: &ArrayRef) -> Result<Option<String>> {
    if column.is_null(0) {
        return Ok(None);
    }
    Ok(Some(array_value_to_string(column, 0)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_instruments(ctx: &SessionContext) -> Result<()> {
        ctx.sql(
            "CREATE TABLE instruments (symbol VARCHAR, exchange VARCHAR, price DOUBLE, active BOOLEAN) AS VALUES
                ('AAPL', 'NASDAQ', 190.5, true),
                ('MSFT', 'NASDAQ', 410.0, true),
                ('IBM', 'NYSE', 170.25, false),
                ('GE', 'NYSE', NULL, true)",
        )
        .await?
        .collect()
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_table_counts() -> Result<()> {
        let ctx = SessionContext::new();
        create_instruments(&ctx).await?;

        let profiler = DataFusionProfiler::default();
        let profile = profiler
            .profile_table(&ctx, "instruments", "instruments.csv")
            .await?;

        assert_eq!(profile.file_id, "instruments.csv");
        assert_eq!(profile.engine, Engine::DataFusion);
        assert_eq!(profile.row_count, 4);
        assert_eq!(profile.columns.len(), 4);

        let exchange = profile.column("exchange").unwrap();
        assert_eq!(exchange.distinct_count, 2);
        assert_eq!(exchange.non_null_count, 4);
        let values = exchange.distinct_values.as_ref().unwrap();
        assert!(values.contains("NYSE"));
        assert!(values.contains("NASDAQ"));
        assert!(!values.is_approximate());

        let price = profile.column("price").unwrap();
        assert_eq!(price.null_count, 1);
        assert_eq!(price.stats.numeric_range(), Some((170.25, 410.0)));

        let active = profile.column("active").unwrap();
        assert_eq!(active.stats, ColumnStats::Boolean { true_count: 3 });
        Ok(())
    }

    #[tokio::test]
    async fn test_distinct_value_cap() -> Result<()> {
        let ctx = SessionContext::new();
        create_instruments(&ctx).await?;

        let profiler = DataFusionProfiler::new(
            ProfilingConfig::default()
                .with_max_distinct_values(2)
                .with_max_key_values(2),
        );
        let profile = profiler
            .profile_table(&ctx, "instruments", "instruments")
            .await?;

        let symbol = profile.column("symbol").unwrap();
        assert_eq!(symbol.distinct_count, 4);
        let values = symbol.distinct_values.as_ref().unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.is_approximate());
        let expected = ValueSet::collect(["AAPL", "MSFT", "IBM", "GE"], 2);
        assert_eq!(values.values(), expected.values());
        Ok(())
    }

    #[tokio::test]
    async fn test_key_columns_use_key_cap() -> Result<()> {
        let ctx = SessionContext::new();
        create_instruments(&ctx).await?;

        let profiler =
            DataFusionProfiler::new(ProfilingConfig::default().with_max_distinct_values(1))
                .with_log_config(LogConfig::production());
        let profile = profiler
            .profile_table(&ctx, "instruments", "instruments")
            .await?;

        let symbol = profile.column("symbol").unwrap().distinct_values.as_ref().unwrap();
        assert_eq!(symbol.len(), 4);
        assert!(!symbol.is_approximate());

        let exchange = profile.column("exchange").unwrap().distinct_values.as_ref().unwrap();
        assert_eq!(exchange.len(), 1);
        assert!(exchange.is_approximate());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_key_threshold() -> Result<()> {
        let ctx = SessionContext::new();
        create_instruments(&ctx).await?;

        let profiler = DataFusionProfiler::new(ProfilingConfig::default().with_key_threshold(2.0));
        assert!(profiler.profile_table(&ctx, "instruments", "i").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_without_values() -> Result<()> {
        let ctx = SessionContext::new();
        create_instruments(&ctx).await?;

        let profiler = DataFusionProfiler::new(ProfilingConfig::default().with_collect_values(false));
        let profile = profiler.profile_table(&ctx, "instruments", "i").await?;
        assert!(profile.columns.iter().all(|c| c.distinct_values.is_none()));
        Ok(())
    }
}
