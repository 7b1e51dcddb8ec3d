//! Report generation.
//!
//! A [`Report`] is built from the datasets of exactly one collection run
//! and rendered to markdown. Sections always appear in the same order;
//! a section whose dataset was not collected says so instead of failing
//! the whole report.

pub mod advice;
mod render;
mod sections;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::collector::catalog;
use crate::model::{MetricDataset, format_run_tag};
use crate::storage::{PersistenceError, write_atomic, write_new};

pub use render::render;
pub use sections::{StatementStat, cache_hit_ratio, dead_tuple_percent, rank_statements};

/// Error type for report building and writing.
#[derive(Debug)]
pub enum ReportError {
    /// A dataset belongs to a different collection run than the report.
    MixedRuns {
        expected: DateTime<Utc>,
        query_id: String,
        found: DateTime<Utc>,
    },
    Persistence(PersistenceError),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::MixedRuns {
                expected,
                query_id,
                found,
            } => write!(
                f,
                "dataset {} was collected at {}, not in run {}",
                query_id,
                format_run_tag(*found),
                format_run_tag(*expected)
            ),
            ReportError::Persistence(e) => write!(f, "cannot write report: {}", e),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PersistenceError> for ReportError {
    fn from(e: PersistenceError) -> Self {
        ReportError::Persistence(e)
    }
}

/// Report sections in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKind {
    Overview,
    Connections,
    TopQueries,
    CacheEffectiveness,
    Bloat,
    Locks,
    BackgroundWriter,
    Recommendations,
}

impl SectionKind {
    pub const ALL: [SectionKind; 8] = [
        SectionKind::Overview,
        SectionKind::Connections,
        SectionKind::TopQueries,
        SectionKind::CacheEffectiveness,
        SectionKind::Bloat,
        SectionKind::Locks,
        SectionKind::BackgroundWriter,
        SectionKind::Recommendations,
    ];

    pub fn title(self) -> &'static str {
        match self {
            SectionKind::Overview => "Overview",
            SectionKind::Connections => "Connections",
            SectionKind::TopQueries => "Top Queries",
            SectionKind::CacheEffectiveness => "Cache Effectiveness",
            SectionKind::Bloat => "Table and Index Bloat",
            SectionKind::Locks => "Locks",
            SectionKind::BackgroundWriter => "Background Writer",
            SectionKind::Recommendations => "Recommendations",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// A rendered-ready table: every cell is already formatted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<(String, Align)>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[(&str, Align)]) -> Self {
        Self {
            headers: headers
                .iter()
                .map(|(title, align)| (title.to_string(), *align))
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.headers.len());
        self.rows.push(row);
    }
}

/// One piece of section content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// A sub-heading inside a section.
    Heading(String),
    Prose(String),
    Table(Table),
    /// The dataset of the given kind was not collected in this run.
    Missing(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub blocks: Vec<Block>,
}

impl Section {
    pub fn heading(&self) -> &'static str {
        self.kind.title()
    }

    /// Dataset kinds this section reported as not collected.
    pub fn missing(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Missing(kind) => Some(kind.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub collected_at: DateTime<Utc>,
    pub sections: Vec<Section>,
}

impl Report {
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

/// Knobs for [`build_report`].
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Number of statements in the top queries table.
    pub top_n: usize,
    /// Query ids that were enabled for the run, for the overview.
    pub expected: Vec<&'static str>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            expected: catalog::builtin().iter().map(|q| q.id).collect(),
        }
    }
}

/// The datasets of one run, indexed by query id.
pub struct ReportInput<'a> {
    pub collected_at: DateTime<Utc>,
    datasets: BTreeMap<&'a str, &'a MetricDataset>,
}

impl<'a> ReportInput<'a> {
    /// Indexes `datasets`, which must all belong to the run collected at
    /// `collected_at`.
    pub fn new(
        collected_at: DateTime<Utc>,
        datasets: &'a [MetricDataset],
    ) -> Result<Self, ReportError> {
        let mut index = BTreeMap::new();
        for dataset in datasets {
            if dataset.collected_at() != collected_at {
                return Err(ReportError::MixedRuns {
                    expected: collected_at,
                    query_id: dataset.query_id().to_string(),
                    found: dataset.collected_at(),
                });
            }
            index.insert(dataset.query_id(), dataset);
        }
        Ok(Self {
            collected_at,
            datasets: index,
        })
    }

    pub fn get(&self, query_id: &str) -> Option<&'a MetricDataset> {
        self.datasets.get(query_id).copied()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Builds the report for the run collected at `collected_at`.
///
/// Every dataset must belong to that run; mixing runs is an error.
pub fn build_report(
    collected_at: DateTime<Utc>,
    datasets: &[MetricDataset],
    options: &ReportOptions,
) -> Result<Report, ReportError> {
    let input = ReportInput::new(collected_at, datasets)?;
    let sections = SectionKind::ALL
        .iter()
        .map(|&kind| Section {
            kind,
            blocks: sections::build(kind, &input, options),
        })
        .collect();

    Ok(Report {
        collected_at,
        sections,
    })
}

pub fn report_path(dir: &Path, collected_at: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "performance_report_{}.md",
        format_run_tag(collected_at)
    ))
}

/// Renders `report` and writes it under `dir`, returning the file path.
/// An existing report of the same run is replaced.
pub fn write_report(report: &Report, dir: &Path) -> Result<PathBuf, ReportError> {
    let path = report_path(dir, report.collected_at);
    write_atomic(&path, render(report).as_bytes())?;
    info!(path = %path.display(), "report written");
    Ok(path)
}

/// Like [`write_report`], but fails with [`PersistenceError::Exists`] if a
/// report for the same run timestamp is already there.
pub fn write_new_report(report: &Report, dir: &Path) -> Result<PathBuf, ReportError> {
    let path = report_path(dir, report.collected_at);
    write_new(&path, render(report).as_bytes())?;
    info!(path = %path.display(), "report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MockSource, collect_from};
    use crate::collector::catalog::{CACHE_HIT_RATIO, TOP_STATEMENTS};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, sec).unwrap()
    }

    fn run(ts: DateTime<Utc>, source: MockSource, ids: &[&str]) -> Vec<MetricDataset> {
        let mut source = source;
        let (datasets, _) = collect_from(&mut source, &catalog::select(ids), ts);
        datasets
    }

    #[test]
    fn sections_follow_fixed_order() {
        let datasets = run(at(0), MockSource::typical(at(0)), &[TOP_STATEMENTS]);
        let report = build_report(at(0), &datasets, &ReportOptions::default()).unwrap();
        let kinds: Vec<_> = report.sections.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, SectionKind::ALL.to_vec());
        assert_eq!(report.sections[2].heading(), "Top Queries");
    }

    #[test]
    fn datasets_from_other_runs_are_rejected() {
        let mut datasets = run(at(0), MockSource::typical(at(0)), &[TOP_STATEMENTS]);
        datasets.extend(run(at(30), MockSource::typical(at(30)), &[CACHE_HIT_RATIO]));

        let err = build_report(at(0), &datasets, &ReportOptions::default()).unwrap_err();
        match err {
            ReportError::MixedRuns { query_id, found, .. } => {
                assert_eq!(query_id, CACHE_HIT_RATIO);
                assert_eq!(found, at(30));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_dataset_marks_only_its_section() {
        let all: Vec<_> = catalog::builtin()
            .iter()
            .map(|q| q.id)
            .filter(|id| *id != TOP_STATEMENTS)
            .collect();
        let datasets = run(at(0), MockSource::typical(at(0)), &all);
        let report = build_report(at(0), &datasets, &ReportOptions::default()).unwrap();

        let top = report.section(SectionKind::TopQueries).unwrap();
        assert_eq!(top.missing(), vec![TOP_STATEMENTS]);
        for kind in [
            SectionKind::Connections,
            SectionKind::CacheEffectiveness,
            SectionKind::Bloat,
            SectionKind::Locks,
            SectionKind::BackgroundWriter,
        ] {
            assert!(report.section(kind).unwrap().missing().is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn report_file_is_named_by_run() {
        let dir = tempdir().unwrap();
        let report = build_report(at(5), &[], &ReportOptions::default()).unwrap();
        let path = write_report(&report, dir.path()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "performance_report_20250601_080005.md"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("no data collected for top_statements"));
    }

    #[test]
    fn new_report_does_not_replace_existing_one() {
        let dir = tempdir().unwrap();
        let first = build_report(at(5), &[], &ReportOptions::default()).unwrap();
        let path = write_new_report(&first, dir.path()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();

        let datasets = run(at(5), MockSource::typical(at(5)), &[CACHE_HIT_RATIO]);
        let second = build_report(at(5), &datasets, &ReportOptions::default()).unwrap();
        let err = write_new_report(&second, dir.path()).unwrap_err();

        assert!(matches!(err, ReportError::Persistence(PersistenceError::Exists(p)) if p == path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), written);

        // Rebuilding a run's report replaces it.
        write_report(&second, dir.path()).unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), written);
    }
}
