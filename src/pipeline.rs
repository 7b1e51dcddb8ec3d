//! End-to-end runs: collect, persist, build, render, write.
//!
//! Each entry point takes the settings built once at startup and returns
//! an outcome from which the process exit status is derived.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::collector::{CollectError, CollectionRun, Collector, Connector, QueryFailure, catalog};
use crate::config::Settings;
use crate::model::{format_run_tag, run_timestamp};
use crate::report::{ReportError, ReportOptions, build_report, write_new_report, write_report};
use crate::storage::{PersistenceError, RawStore};

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// A report was written, possibly with missing sections.
    Success,
    /// Nothing usable was produced, or raw data could not be kept.
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
        }
    }
}

/// Errors that end a run without a report.
#[derive(Debug)]
pub enum PipelineError {
    Collect(CollectError),
    Persistence(PersistenceError),
    Report(ReportError),
    /// The raw-data directory holds no runs at all.
    NoRuns(PathBuf),
    /// The requested run has no files in the raw-data directory.
    RunNotFound(DateTime<Utc>),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Collect(e) => write!(f, "collection failed: {}", e),
            PipelineError::Persistence(e) => write!(f, "{}", e),
            PipelineError::Report(e) => write!(f, "{}", e),
            PipelineError::NoRuns(dir) => {
                write!(f, "no collection runs found in {}", dir.display())
            }
            PipelineError::RunNotFound(ts) => {
                write!(f, "run {} not found", format_run_tag(*ts))
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Collect(e) => Some(e),
            PipelineError::Persistence(e) => Some(e),
            PipelineError::Report(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CollectError> for PipelineError {
    fn from(e: CollectError) -> Self {
        PipelineError::Collect(e)
    }
}

impl From<PersistenceError> for PipelineError {
    fn from(e: PersistenceError) -> Self {
        PipelineError::Persistence(e)
    }
}

impl From<ReportError> for PipelineError {
    fn from(e: ReportError) -> Self {
        PipelineError::Report(e)
    }
}

/// What a collect-and-report run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub collected_at: DateTime<Utc>,
    pub collected: usize,
    pub failures: Vec<QueryFailure>,
    pub raw_files: Vec<PathBuf>,
    pub persist_error: Option<PersistenceError>,
    pub report: Option<PathBuf>,
}

impl RunOutcome {
    pub fn status(&self) -> ExitStatus {
        if self.report.is_none() || self.persist_error.is_some() || self.collected == 0 {
            ExitStatus::Failure
        } else {
            ExitStatus::Success
        }
    }
}

fn report_options(settings: &Settings) -> ReportOptions {
    ReportOptions {
        top_n: settings.collection.top_n,
        expected: settings.collection.metrics.clone(),
    }
}

fn collect<C: Connector>(
    settings: &Settings,
    connector: C,
    collected_at: DateTime<Utc>,
) -> Result<CollectionRun, PipelineError> {
    let store = RawStore::open(&settings.collection.raw_dir)?;
    let queries = catalog::select(&settings.collection.metrics);
    let collector = Collector::new(connector, &store);
    Ok(collector.collect_at(&settings.connection, &queries, collected_at)?)
}

/// Collects, persists the raw data and writes the report.
///
/// Connection failure is fatal and leaves no files behind. A failure to
/// persist the raw data does not prevent the report from being written,
/// but an existing report with the same run timestamp is never replaced.
pub fn run<C: Connector>(settings: &Settings, connector: C) -> Result<RunOutcome, PipelineError> {
    run_at(settings, connector, run_timestamp(Utc::now()))
}

/// Like [`run`] with an explicit collection timestamp.
pub fn run_at<C: Connector>(
    settings: &Settings,
    connector: C,
    collected_at: DateTime<Utc>,
) -> Result<RunOutcome, PipelineError> {
    let run = collect(settings, connector, collected_at)?;

    let report = build_report(run.collected_at, &run.datasets, &report_options(settings))?;
    let report_path = match write_new_report(&report, &settings.collection.report_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            error!(error = %e, "report not written");
            None
        }
    };

    Ok(RunOutcome {
        collected_at: run.collected_at,
        collected: run.datasets.len(),
        failures: run.failures,
        raw_files: run.persisted,
        persist_error: run.persist_error,
        report: report_path,
    })
}

/// Collects and persists the raw data only.
pub fn collect_only<C: Connector>(
    settings: &Settings,
    connector: C,
) -> Result<CollectionRun, PipelineError> {
    let run = collect(settings, connector, run_timestamp(Utc::now()))?;
    if let Some(e) = &run.persist_error {
        warn!(error = %e, "collected data was not persisted");
    }
    Ok(run)
}

/// Rebuilds the report of a persisted run, the latest one by default.
pub fn report_from_store(
    settings: &Settings,
    run: Option<DateTime<Utc>>,
) -> Result<PathBuf, PipelineError> {
    let store = RawStore::open(&settings.collection.raw_dir)?;
    let collected_at = match run {
        Some(ts) => ts,
        None => store
            .latest_run()?
            .ok_or_else(|| PipelineError::NoRuns(store.dir().to_path_buf()))?,
    };

    let datasets = store.load_run(collected_at)?;
    if datasets.is_empty() {
        return Err(PipelineError::RunNotFound(collected_at));
    }
    info!(
        run = %format_run_tag(collected_at),
        datasets = datasets.len(),
        "rebuilding report from raw data"
    );

    let report = build_report(collected_at, &datasets, &report_options(settings))?;
    Ok(write_report(&report, &settings.collection.report_dir)?)
}

/// Timestamps of every persisted run, oldest first.
pub fn list_runs(settings: &Settings) -> Result<Vec<DateTime<Utc>>, PipelineError> {
    let store = RawStore::open(&settings.collection.raw_dir)?;
    Ok(store.list_runs()?)
}
