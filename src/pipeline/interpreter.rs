//! Sequential pipeline interpreter.
//!
//! Steps run strictly in order against one evolving [`Dataset`]. Each
//! record is decoded only when the interpreter reaches it, so a workflow
//! with a malformed tail still runs its valid prefix (including any sinks)
//! before failing. Nothing is rolled back.

use super::step::{Step, StepKind, StepRecord};
use crate::dataset::cloud::StorageOptions;
use crate::dataset::{Dataset, cloud, io, postgis};
use crate::error::{EtlError, Result};
use polars::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

/// Default database connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by every step of a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Passed to the object-store builder for cloud steps
    pub storage_options: StorageOptions,
    pub db_connect_timeout: Duration,
    /// Parquet row group size; adaptive when unset
    pub parquet_row_group_size: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            storage_options: StorageOptions::new(),
            db_connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            parquet_row_group_size: None,
        }
    }
}

/// Result of a run as seen by the entry points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    /// Description of the failing step's error
    pub error: Option<String>,
}

impl Outcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

impl<T> From<Result<T>> for Outcome {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => Self::succeeded(),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

/// Report generated after a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Number of steps executed
    pub steps_applied: usize,

    /// Rows of the final dataset, if one was bound
    pub rows: Option<usize>,

    /// Columns of the final dataset, if one was bound
    pub columns: Option<usize>,

    /// Number of sink steps that wrote output
    pub sinks_written: usize,

    /// Time taken for execution
    pub duration: Duration,
}

impl RunReport {
    /// Create a summary message
    pub fn summary(&self) -> String {
        let shape = match (self.rows, self.columns) {
            (Some(rows), Some(columns)) => format!("{rows} rows, {columns} columns"),
            _ => "no dataset".to_owned(),
        };
        format!(
            "Pipeline completed: {} steps, {shape}, {} sink{} written, {:.2}s",
            self.steps_applied,
            self.sinks_written,
            if self.sinks_written == 1 { "" } else { "s" },
            self.duration.as_secs_f64()
        )
    }
}

/// State carried from one step to the next
#[derive(Debug, Default)]
pub struct ExecutionContext {
    dataset: Option<Dataset>,
    sinks_written: usize,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current dataset, `None` until a source step has run
    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn into_dataset(self) -> Option<Dataset> {
        self.dataset
    }

    pub fn sinks_written(&self) -> usize {
        self.sinks_written
    }

    fn bind(&mut self, dataset: Dataset) {
        tracing::debug!(
            "Bound dataset: {} rows, {} columns{}",
            dataset.height(),
            dataset.width(),
            if dataset.is_geospatial() { " (geo)" } else { "" }
        );
        self.dataset = Some(dataset);
    }

    fn current(&self, kind: StepKind) -> Result<&Dataset> {
        self.dataset.as_ref().ok_or_else(|| EtlError::NoDataset {
            kind: kind.as_str().to_owned(),
        })
    }

    fn take(&mut self, kind: StepKind) -> Result<Dataset> {
        self.dataset.take().ok_or_else(|| EtlError::NoDataset {
            kind: kind.as_str().to_owned(),
        })
    }

    fn record_sink(&mut self, target: &str) {
        self.sinks_written += 1;
        if let Some(dataset) = &self.dataset {
            tracing::info!("Wrote {} rows to {target}", dataset.height());
        }
    }
}

/// Runs step sequences
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    options: RunOptions,
}

impl Interpreter {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run every record in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that fails to decode or execute.
    /// Sinks that ran before it keep their output.
    pub fn run(&self, records: &[StepRecord]) -> Result<RunReport> {
        let start = Instant::now();
        let mut ctx = ExecutionContext::new();

        for (idx, record) in records.iter().enumerate() {
            let kind = record.kind_str().unwrap_or("<missing>");
            let span = tracing::info_span!("step", index = idx + 1, kind);
            let _entered = span.enter();

            let step = Step::decode(record).inspect_err(|e| {
                tracing::error!("Step {} could not be decoded: {e}", idx + 1);
            })?;
            tracing::debug!("Running {}", step.label());
            self.apply(&step, &mut ctx).inspect_err(|e| {
                tracing::error!("Step {} ({}) failed: {e}", idx + 1, step.kind());
            })?;
        }

        let report = RunReport {
            steps_applied: records.len(),
            rows: ctx.dataset().map(Dataset::height),
            columns: ctx.dataset().map(Dataset::width),
            sinks_written: ctx.sinks_written(),
            duration: start.elapsed(),
        };
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Run and fold the result into an [`Outcome`].
    pub fn execute(&self, records: &[StepRecord]) -> Outcome {
        self.run(records).into()
    }

    /// Execute one decoded step against the context.
    ///
    /// # Errors
    ///
    /// Fails when a transform or sink runs with no dataset bound, or when
    /// the step's own I/O or computation fails.
    pub fn apply(&self, step: &Step, ctx: &mut ExecutionContext) -> Result<()> {
        let kind = step.kind();
        match step {
            Step::CsvSource { path } => {
                ctx.bind(Dataset::Table(io::read_csv(Path::new(path))?));
            }
            Step::ParquetSource { path } => {
                ctx.bind(io::read_parquet(Path::new(path))?);
            }
            Step::PostgisSource { url, sql } => {
                ctx.bind(postgis::read_query(
                    url,
                    sql,
                    self.options.db_connect_timeout,
                )?);
            }
            Step::CloudSource { url } => {
                ctx.bind(cloud::read_parquet(url, &self.options.storage_options)?);
            }

            Step::Filter { expr } => {
                let predicate = polars::sql::sql_expr(expr).map_err(|e| {
                    EtlError::InvalidField {
                        kind: kind.as_str().to_owned(),
                        field: "expr",
                        reason: e.to_string(),
                    }
                })?;
                let dataset = ctx.take(kind)?;
                let before = dataset.height();
                let filtered =
                    dataset.map_frame(|df| Ok(df.lazy().filter(predicate).collect()?))?;
                tracing::debug!("Filter kept {} of {before} rows", filtered.height());
                ctx.bind(filtered);
            }
            Step::Reproject { epsg } => {
                let dataset = ctx.take(kind)?;
                ctx.bind(reproject(dataset, *epsg)?);
            }
            Step::Join { path, left, right } => {
                let lookup = io::read_lookup(Path::new(path))?;
                let dataset = ctx.take(kind)?;
                ctx.bind(join(dataset, lookup, left, right)?);
            }

            Step::CsvSink { path } => {
                io::write_csv(ctx.current(kind)?, Path::new(path))?;
                ctx.record_sink(path);
            }
            Step::ParquetSink { path } => {
                let dataset = ctx.current(kind)?;
                io::write_parquet(dataset, Path::new(path), self.row_group_size(dataset))?;
                ctx.record_sink(path);
            }
            Step::PostgisSink { url, table } => {
                postgis::replace_table(
                    url,
                    table,
                    ctx.current(kind)?,
                    self.options.db_connect_timeout,
                )?;
                ctx.record_sink(&format!("{table} on {}", postgis::redact(url)));
            }
            Step::CloudSink { url } => {
                let dataset = ctx.current(kind)?;
                cloud::write_parquet(
                    dataset,
                    url,
                    &self.options.storage_options,
                    self.row_group_size(dataset),
                )?;
                ctx.record_sink(url);
            }
        }
        Ok(())
    }

    fn row_group_size(&self, dataset: &Dataset) -> usize {
        io::parquet_row_group_size(self.options.parquet_row_group_size, dataset.width())
    }
}

#[cfg(feature = "geo")]
fn reproject(dataset: Dataset, epsg: u32) -> Result<Dataset> {
    match dataset {
        Dataset::Table(df) => {
            tracing::debug!("Reproject to EPSG:{epsg} skipped, dataset has no geometry");
            Ok(Dataset::Table(df))
        }
        Dataset::Geo(geo) => crate::geo::reproject::reproject(geo, epsg).map(Dataset::Geo),
    }
}

#[cfg(not(feature = "geo"))]
fn reproject(dataset: Dataset, epsg: u32) -> Result<Dataset> {
    match dataset {
        Dataset::Table(df) => {
            tracing::debug!("Reproject to EPSG:{epsg} skipped, dataset has no geometry");
            Ok(Dataset::Table(df))
        }
        Dataset::Geo(_) => Err(EtlError::Geometry(
            "reprojection requires the `geo` feature".to_owned(),
        )),
    }
}

/// Left join keeping every current row exactly once.
///
/// Only the first lookup row per key is used, so duplicate keys in the
/// lookup never multiply rows. Lookup columns are appended, including the
/// lookup key when it is named differently from the current key.
fn join(dataset: Dataset, lookup: DataFrame, left: &str, right: &str) -> Result<Dataset> {
    for (frame, key, side) in [(dataset.frame(), left, "left"), (&lookup, right, "right")] {
        if frame.column(key).is_err() {
            return Err(EtlError::InvalidField {
                kind: StepKind::Join.as_str().to_owned(),
                field: side,
                reason: format!("column '{key}' not found in the {side} table"),
            });
        }
    }

    let lookup = lookup
        .lazy()
        .filter(col(right).is_first_distinct())
        .collect()?;
    let args = if left == right {
        JoinArgs::new(JoinType::Left)
    } else {
        JoinArgs::new(JoinType::Left).with_coalesce(JoinCoalesce::KeepColumns)
    };
    dataset.map_frame(|df| {
        Ok(df
            .lazy()
            .join(lookup.lazy(), [col(left)], [col(right)], args)
            .collect()?)
    })
}
