//! PostgreSQL statistics collector.
//!
//! One run opens a single connection, executes the enabled diagnostic
//! queries from the [`catalog`] in order, and turns each result set into a
//! [`MetricDataset`] tagged with the run's collection timestamp.
//!
//! ```text
//!   Collector::collect
//!     ├── Connector::connect ──────────► CollectError aborts the run
//!     ├── for each QueryDefinition
//!     │     ├── extension check
//!     │     ├── StatsSource::execute ──► QueryError: logged, query skipped
//!     │     └── MetricDataset
//!     ├── connection released
//!     └── RawStore::persist_run ───────► all files of the run, or none
//! ```
//!
//! A failing query never aborts the run; a failing connection always does,
//! and in that case nothing is written for the run.

pub mod catalog;
pub mod mock;
mod source;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ConnectionProfile;
use crate::model::{ColumnDef, ColumnType, MetricDataset, run_timestamp};
use crate::storage::{PersistenceError, RawStore};

pub use catalog::QueryDefinition;
pub use mock::{MockConnector, MockSource};
pub use source::{Connector, PgConnector, PgSource, QueryOutput, StatsSource};

/// Fatal error for a collection run.
#[derive(Debug)]
pub enum CollectError {
    /// The server could not be reached or refused the login.
    Connection(String),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Connection(msg) => write!(f, "PostgreSQL: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

/// Error for a single diagnostic query. Recoverable: the query is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A required extension is not installed in the connected database.
    ExtensionMissing(String),
    /// The statement's columns differ from the expected schema.
    SchemaMismatch {
        query: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    /// A value could not be decoded as the column's declared type.
    TypeMismatch {
        query: String,
        column: String,
        expected: ColumnType,
    },
    /// The server rejected or failed the statement.
    Execution(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::ExtensionMissing(name) => {
                write!(f, "extension {} is not installed", name)
            }
            QueryError::SchemaMismatch {
                query,
                expected,
                actual,
            } => write!(
                f,
                "{}: expected columns [{}], got [{}]",
                query,
                expected.join(", "),
                actual.join(", ")
            ),
            QueryError::TypeMismatch {
                query,
                column,
                expected,
            } => write!(f, "{}: column {} is not {}", query, column, expected),
            QueryError::Execution(msg) => write!(f, "PostgreSQL query error: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

/// Checks that `actual` names exactly the schema's columns, in order.
pub(crate) fn check_schema(
    query_id: &str,
    schema: &[ColumnDef],
    actual: &[String],
) -> Result<(), QueryError> {
    let matches = schema.len() == actual.len()
        && schema.iter().zip(actual).all(|(def, name)| def.name == name.as_str());
    if matches {
        Ok(())
    } else {
        Err(QueryError::SchemaMismatch {
            query: query_id.to_string(),
            expected: schema.iter().map(|c| c.name.to_string()).collect(),
            actual: actual.to_vec(),
        })
    }
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => format!("{}: {}", db_error.severity(), db_error.message()),
        None => shorten_error_message(&e.to_string()),
    }
}

/// Reduces a client-side error message to its useful part.
fn shorten_error_message(msg: &str) -> String {
    if msg.contains("Connection refused") {
        "connection refused".to_string()
    } else if msg.contains("password authentication failed") {
        "password authentication failed".to_string()
    } else if msg.contains("does not exist") {
        msg.rsplit("FATAL:").next().unwrap_or(msg).trim().to_string()
    } else {
        msg.to_string()
    }
}

/// A query that produced no dataset in this run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    pub query_id: String,
    pub error: QueryError,
}

/// Everything one collection run produced.
#[derive(Debug)]
pub struct CollectionRun {
    pub collected_at: DateTime<Utc>,
    /// One dataset per successfully executed query, in execution order.
    pub datasets: Vec<MetricDataset>,
    pub failures: Vec<QueryFailure>,
    /// Files written for the run.
    pub persisted: Vec<PathBuf>,
    /// Set when the raw-data files could not be written. The in-memory
    /// datasets are still valid.
    pub persist_error: Option<PersistenceError>,
}

/// Executes `queries` against an open source. Failing queries are logged
/// and reported in the returned failure list.
pub fn collect_from<S: StatsSource + ?Sized>(
    source: &mut S,
    queries: &[&QueryDefinition],
    collected_at: DateTime<Utc>,
) -> (Vec<MetricDataset>, Vec<QueryFailure>) {
    let server_version = source.server_version();
    let mut datasets = Vec::with_capacity(queries.len());
    let mut failures = Vec::new();

    for query in queries {
        match run_query(source, query, server_version, collected_at) {
            Ok(dataset) => {
                debug!(query = query.id, rows = dataset.len(), "query collected");
                datasets.push(dataset);
            }
            Err(error) => {
                warn!(query = query.id, error = %error, "query failed, skipping");
                failures.push(QueryFailure {
                    query_id: query.id.to_string(),
                    error,
                });
            }
        }
    }

    (datasets, failures)
}

fn run_query<S: StatsSource + ?Sized>(
    source: &mut S,
    query: &QueryDefinition,
    server_version: Option<i32>,
    collected_at: DateTime<Utc>,
) -> Result<MetricDataset, QueryError> {
    if let Some(ext) = query.requires_extension
        && !source.extension_installed(ext)?
    {
        return Err(QueryError::ExtensionMissing(ext.to_string()));
    }

    let output = source.execute(query.id, query.sql_for(server_version), query.columns)?;
    check_schema(query.id, query.columns, &output.columns)?;

    for row in &output.rows {
        if row.len() != query.columns.len() {
            return Err(QueryError::SchemaMismatch {
                query: query.id.to_string(),
                expected: query.column_names().iter().map(|c| c.to_string()).collect(),
                actual: output.columns.clone(),
            });
        }
        for (value, col) in row.iter().zip(query.columns) {
            if !value.fits(col.ty) {
                return Err(QueryError::TypeMismatch {
                    query: query.id.to_string(),
                    column: col.name.to_string(),
                    expected: col.ty,
                });
            }
        }
    }

    Ok(MetricDataset::new(
        query.id,
        collected_at,
        query.columns.to_vec(),
        output.rows,
    ))
}

/// Runs collection against whatever the connector connects to and persists
/// the results.
pub struct Collector<'a, C: Connector> {
    connector: C,
    store: &'a RawStore,
}

impl<'a, C: Connector> Collector<'a, C> {
    pub fn new(connector: C, store: &'a RawStore) -> Self {
        Self { connector, store }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Performs one collection run.
    ///
    /// Fails only when the connection cannot be established; nothing is
    /// written in that case.
    pub fn collect(
        &self,
        profile: &ConnectionProfile,
        queries: &[&QueryDefinition],
    ) -> Result<CollectionRun, CollectError> {
        self.collect_at(profile, queries, run_timestamp(Utc::now()))
    }

    /// Like [`collect`](Self::collect) with an explicit collection timestamp.
    pub fn collect_at(
        &self,
        profile: &ConnectionProfile,
        queries: &[&QueryDefinition],
        collected_at: DateTime<Utc>,
    ) -> Result<CollectionRun, CollectError> {
        info!(server = %profile, queries = queries.len(), "starting collection");

        let (datasets, failures) = {
            let mut source = self.connector.connect(profile)?;
            collect_from(&mut source, queries, collected_at)
        };

        let (persisted, persist_error) = match self.store.persist_run(&datasets) {
            Ok(paths) => (paths, None),
            Err(e) => {
                warn!(error = %e, "raw data not persisted");
                (Vec::new(), Some(e))
            }
        };

        info!(
            collected = datasets.len(),
            failed = failures.len(),
            files = persisted.len(),
            "collection finished"
        );

        Ok(CollectionRun {
            collected_at,
            datasets,
            failures,
            persisted,
            persist_error,
        })
    }
}
