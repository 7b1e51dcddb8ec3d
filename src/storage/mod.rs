//! Raw-data persistence.
//!
//! Each [`MetricDataset`] of a run is written as one CSV file
//! `<query_id>_<YYYYmmdd_HHMMSS>.csv` under the raw-data directory. Header
//! row is the query's column names in schema order, so files of different
//! runs stay comparable. Files are written to `*.tmp` and renamed into
//! place; a run is persisted completely or not at all.

mod codec;

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::collector::catalog::{self, QueryDefinition};
use crate::model::{MetricDataset, RUN_TAG_LEN, format_run_tag, parse_run_tag};

use codec::{decode_field, encode_field};

const RAW_EXT: &str = "csv";
const TMP_EXT: &str = "tmp";

/// Error type for writing or reading persisted artifacts.
#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Csv {
        path: PathBuf,
        message: String,
    },
    /// A file exists but does not have the expected layout.
    Format {
        path: PathBuf,
        reason: String,
    },
    /// A file for the same query and run already exists.
    Exists(PathBuf),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            PersistenceError::Csv { path, message } => {
                write!(f, "{}: CSV error: {}", path.display(), message)
            }
            PersistenceError::Format { path, reason } => {
                write!(f, "{}: {}", path.display(), reason)
            }
            PersistenceError::Exists(path) => write!(f, "{}: already exists", path.display()),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> PersistenceError + '_ {
    move |e| PersistenceError::Csv {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Writes `contents` to `path` via a temporary sibling file and a rename,
/// creating the parent directory if needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp = tmp_path(path);
    let result = File::create(&tmp)
        .and_then(|mut f| {
            f.write_all(contents)?;
            f.sync_all()
        })
        .map_err(io_error(&tmp))
        .and_then(|_| std::fs::rename(&tmp, path).map_err(io_error(path)));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Like [`write_atomic`], but never replaces an existing file: the
/// temporary file is hard-linked into place, which fails if `path` exists.
pub fn write_new(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp = tmp_path(path);
    let result = File::create(&tmp)
        .and_then(|mut f| {
            f.write_all(contents)?;
            f.sync_all()
        })
        .map_err(io_error(&tmp))
        .and_then(|_| {
            std::fs::hard_link(&tmp, path).map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    PersistenceError::Exists(path.to_path_buf())
                } else {
                    PersistenceError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                }
            })
        });
    let _ = std::fs::remove_file(&tmp);
    result
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(TMP_EXT);
    path.with_file_name(name)
}

/// Splits `<query_id>_<YYYYmmdd_HHMMSS>.csv` into its parts.
fn parse_file_name(name: &str) -> Option<(&str, DateTime<Utc>)> {
    let stem = name.strip_suffix(".csv")?;
    let split = stem.len().checked_sub(RUN_TAG_LEN + 1)?;
    if !stem.is_char_boundary(split) {
        return None;
    }
    let (query_id, rest) = stem.split_at(split);
    let tag = rest.strip_prefix('_')?;
    if query_id.is_empty() {
        return None;
    }
    Some((query_id, parse_run_tag(tag)?))
}

/// Directory of raw-data CSV files, one per (query id, run) pair.
#[derive(Debug, Clone)]
pub struct RawStore {
    dir: PathBuf,
}

impl RawStore {
    /// Opens the store, creating the directory and removing leftover
    /// temporary files from interrupted runs.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == TMP_EXT) {
                    debug!(path = %path.display(), "removing stale temporary file");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, query_id: &str, collected_at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.{}",
            query_id,
            format_run_tag(collected_at),
            RAW_EXT
        ))
    }

    /// Persists every dataset of one run.
    ///
    /// On any failure, files already written for this call are removed
    /// again so that a run is never left half-persisted.
    pub fn persist_run(&self, datasets: &[MetricDataset]) -> Result<Vec<PathBuf>, PersistenceError> {
        let mut written = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            match self.write_dataset(dataset) {
                Ok(path) => written.push(path),
                Err(e) => {
                    for path in &written {
                        let _ = std::fs::remove_file(path);
                    }
                    return Err(e);
                }
            }
        }
        if let Some(first) = datasets.first() {
            info!(
                run = %format_run_tag(first.collected_at()),
                files = written.len(),
                dir = %self.dir.display(),
                "raw data persisted"
            );
        }
        Ok(written)
    }

    fn write_dataset(&self, dataset: &MetricDataset) -> Result<PathBuf, PersistenceError> {
        let path = self.file_path(dataset.query_id(), dataset.collected_at());
        if path.exists() {
            return Err(PersistenceError::Exists(path));
        }

        let mut wtr = csv::WriterBuilder::new().from_writer(Vec::new());
        wtr.write_record(dataset.columns().iter().map(|c| c.name))
            .map_err(csv_error(&path))?;
        for row in dataset.raw_rows() {
            wtr.write_record(row.iter().map(encode_field))
                .map_err(csv_error(&path))?;
        }
        let bytes = wtr.into_inner().map_err(|e| PersistenceError::Csv {
            path: path.clone(),
            message: e.to_string(),
        })?;

        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), rows = dataset.len(), "dataset written");
        Ok(path)
    }

    /// Distinct run timestamps present in the store, oldest first.
    pub fn list_runs(&self) -> Result<Vec<DateTime<Utc>>, PersistenceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(io_error(&self.dir))?;
        let mut runs = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some((_, ts)) = name.to_str().and_then(parse_file_name) {
                runs.insert(ts);
            }
        }
        Ok(runs.into_iter().collect())
    }

    pub fn latest_run(&self) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        Ok(self.list_runs()?.pop())
    }

    /// Reads back all datasets of the run collected at `collected_at`, in
    /// catalog order. Files of unknown queries are skipped.
    pub fn load_run(&self, collected_at: DateTime<Utc>) -> Result<Vec<MetricDataset>, PersistenceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(io_error(&self.dir))?;
        let mut found: Vec<(&'static QueryDefinition, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((query_id, ts)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            if ts != collected_at {
                continue;
            }
            match catalog::find(query_id) {
                Some(def) => found.push((def, entry.path())),
                None => warn!(file = %entry.path().display(), "skipping file of unknown query"),
            }
        }

        let order = |def: &QueryDefinition| {
            catalog::builtin()
                .iter()
                .position(|q| q.id == def.id)
                .unwrap_or(usize::MAX)
        };
        found.sort_by_key(|(def, _)| order(def));

        found
            .into_iter()
            .map(|(def, path)| read_dataset(&path, def, collected_at))
            .collect()
    }
}

/// Reads one raw-data file, decoding cells with the query's schema.
pub fn read_dataset(
    path: &Path,
    def: &QueryDefinition,
    collected_at: DateTime<Utc>,
) -> Result<MetricDataset, PersistenceError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(csv_error(path))?;

    let headers = rdr.headers().map_err(csv_error(path))?.clone();
    let expected = def.column_names();
    if headers.iter().ne(expected.iter().copied()) {
        return Err(PersistenceError::Format {
            path: path.to_path_buf(),
            reason: format!(
                "header [{}] does not match [{}]",
                headers.iter().collect::<Vec<_>>().join(", "),
                expected.join(", ")
            ),
        });
    }

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_error(path))?;
        let row = record
            .iter()
            .zip(def.columns)
            .map(|(raw, col)| decode_field(raw, col.ty))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| PersistenceError::Format {
                path: path.to_path_buf(),
                reason: format!("row {}: {}", line + 1, reason),
            })?;
        rows.push(row);
    }

    Ok(MetricDataset::new(
        def.id,
        collected_at,
        def.columns.to_vec(),
        rows,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockSource;
    use crate::collector::catalog::{CACHE_HIT_RATIO, CONNECTION_COUNTS, TOP_STATEMENTS};
    use crate::collector::collect_from;
    use crate::model::Value;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, sec).unwrap()
    }

    fn typical_run(ts: DateTime<Utc>) -> Vec<MetricDataset> {
        let mut source = MockSource::typical(ts);
        let queries: Vec<_> = catalog::builtin().iter().collect();
        let (datasets, failures) = collect_from(&mut source, &queries, ts);
        assert!(failures.is_empty());
        datasets
    }

    #[test]
    fn run_round_trips_exactly() {
        let dir = tempdir().unwrap();
        let store = RawStore::open(dir.path()).unwrap();
        let datasets = typical_run(at(0));

        let paths = store.persist_run(&datasets).unwrap();
        assert_eq!(paths.len(), datasets.len());

        let loaded = store.load_run(at(0)).unwrap();
        assert_eq!(loaded, datasets);
    }

    #[test]
    fn file_names_carry_query_and_run() {
        let dir = tempdir().unwrap();
        let store = RawStore::open(dir.path()).unwrap();
        let path = store.file_path(TOP_STATEMENTS, at(7));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "top_statements_20250601_080007.csv"
        );
        assert_eq!(
            parse_file_name("top_statements_20250601_080007.csv"),
            Some((TOP_STATEMENTS, at(7)))
        );
        assert_eq!(parse_file_name("_20250601_080007.csv"), None);
        assert_eq!(parse_file_name("notes.csv"), None);
        assert_eq!(parse_file_name("top_statements_20250601_080007.csv.tmp"), None);
    }

    #[test]
    fn runs_do_not_overwrite_each_other() {
        let dir = tempdir().unwrap();
        let store = RawStore::open(dir.path()).unwrap();

        store.persist_run(&typical_run(at(0))).unwrap();
        store.persist_run(&typical_run(at(30))).unwrap();

        assert_eq!(store.list_runs().unwrap(), vec![at(0), at(30)]);
        assert_eq!(store.latest_run().unwrap(), Some(at(30)));
        assert_eq!(store.load_run(at(0)).unwrap().len(), catalog::builtin().len());
    }

    #[test]
    fn failed_run_leaves_no_files() {
        let dir = tempdir().unwrap();
        let store = RawStore::open(dir.path()).unwrap();
        let datasets = typical_run(at(0));

        // Occupy the slot of a later dataset so that persisting fails midway.
        let blocker = store.file_path(CACHE_HIT_RATIO, at(0));
        std::fs::write(&blocker, "occupied").unwrap();

        let err = store.persist_run(&datasets).unwrap_err();
        assert!(matches!(err, PersistenceError::Exists(_)));

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        assert_eq!(remaining, vec![blocker]);
    }

    #[test]
    fn open_removes_stale_tmp_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("connection_counts_20250601_080000.csv.tmp");
        std::fs::write(&stale, "partial").unwrap();

        RawStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn header_drift_is_a_format_error() {
        let dir = tempdir().unwrap();
        let store = RawStore::open(dir.path()).unwrap();
        let path = store.file_path(CONNECTION_COUNTS, at(0));
        std::fs::write(&path, "state,count\nidle,3\n").unwrap();

        let err = store.load_run(at(0)).unwrap_err();
        assert!(matches!(err, PersistenceError::Format { .. }));
    }

    #[test]
    fn unknown_files_are_skipped() {
        let dir = tempdir().unwrap();
        let store = RawStore::open(dir.path()).unwrap();
        std::fs::write(store.file_path("vacuum_progress", at(0)), "a\n1\n").unwrap();
        std::fs::write(
            store.file_path(CONNECTION_COUNTS, at(0)),
            "state,connections\nidle,3\nactive,\\N\n",
        )
        .unwrap();

        let loaded = store.load_run(at(0)).unwrap();
        assert_eq!(loaded.len(), 1);
        let rows: Vec<_> = loaded[0].rows().collect();
        assert_eq!(rows[0].i64("connections"), Some(3));
        assert_eq!(rows[1].get("connections"), &Value::Null);
    }

    #[test]
    fn write_new_never_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports/report.md");
        write_new(&path, b"first\n").unwrap();

        let err = write_new(&path, b"second\n").unwrap_err();

        assert!(matches!(err, PersistenceError::Exists(p) if p == path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn text_that_looks_like_null_round_trips() {
        let dir = tempdir().unwrap();
        let store = RawStore::open(dir.path()).unwrap();
        let dataset = MetricDataset::new(
            CONNECTION_COUNTS,
            at(0),
            catalog::find(CONNECTION_COUNTS).unwrap().columns.to_vec(),
            vec![
                vec![Value::Text("\\N".into()), Value::Integer(1)],
                vec![Value::Text("\\\\N".into()), Value::Integer(2)],
                vec![Value::Null, Value::Null],
            ],
        );

        store.persist_run(std::slice::from_ref(&dataset)).unwrap();

        assert_eq!(store.load_run(at(0)).unwrap(), vec![dataset]);
    }

    #[test]
    fn write_atomic_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports/nested/report.md");
        write_atomic(&path, b"# report\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# report\n");
        assert!(!tmp_path(&path).exists());
    }
}
