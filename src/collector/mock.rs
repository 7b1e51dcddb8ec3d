//! In-memory statistics source for tests and dry runs.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use super::catalog;
use super::source::{Connector, QueryOutput, StatsSource};
use super::{CollectError, QueryError, check_schema};
use crate::config::ConnectionProfile;
use crate::model::{ColumnDef, Value};

/// A [`StatsSource`] answering from canned results keyed by query id.
///
/// Queries without a canned result return zero rows with the expected
/// columns.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    server_version: Option<i32>,
    extensions: Vec<String>,
    responses: HashMap<String, Result<QueryOutput, QueryError>>,
    executed: Rc<RefCell<Vec<String>>>,
    released: ReleaseCounter,
}

/// Counts dropped sources, i.e. released connections.
#[derive(Debug, Clone, Default)]
struct ReleaseCounter(Rc<Cell<u32>>);

impl Drop for ReleaseCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            server_version: Some(160002),
            ..Self::default()
        }
    }

    pub fn with_server_version(mut self, version: Option<i32>) -> Self {
        self.server_version = version;
        self
    }

    pub fn with_extension(mut self, name: &str) -> Self {
        self.extensions.push(name.to_string());
        self
    }

    /// Canned rows for `query_id`, reported under the catalog column names.
    pub fn with_rows(mut self, query_id: &str, rows: Vec<Vec<Value>>) -> Self {
        let columns = catalog::find(query_id)
            .map(|q| q.column_names().into_iter().map(String::from).collect())
            .unwrap_or_default();
        self.responses
            .insert(query_id.to_string(), Ok(QueryOutput { columns, rows }));
        self
    }

    /// Canned output with arbitrary column names, e.g. to simulate schema drift.
    pub fn with_output(mut self, query_id: &str, output: QueryOutput) -> Self {
        self.responses.insert(query_id.to_string(), Ok(output));
        self
    }

    pub fn with_failure(mut self, query_id: &str, error: QueryError) -> Self {
        self.responses.insert(query_id.to_string(), Err(error));
        self
    }

    /// Ids of the queries executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    /// A small but complete server: every built-in query returns rows.
    pub fn typical(now: DateTime<Utc>) -> Self {
        let ts = |secs_ago: i64| Value::Timestamp(now - chrono::Duration::seconds(secs_ago));
        let text = |s: &str| Value::Text(s.to_string());
        Self::new()
            .with_extension("pg_stat_statements")
            .with_rows(
                catalog::SERVER_INFO,
                vec![vec![
                    text("PostgreSQL 16.2 on x86_64-pc-linux-gnu"),
                    text("app"),
                    Value::Integer(160002),
                    ts(3 * 86400 + 7200),
                ]],
            )
            .with_rows(
                catalog::CONNECTION_COUNTS,
                vec![
                    vec![text("active"), Value::Integer(3)],
                    vec![text("idle"), Value::Integer(12)],
                    vec![text("idle in transaction"), Value::Integer(1)],
                ],
            )
            .with_rows(
                catalog::ACTIVE_QUERIES,
                vec![
                    vec![
                        Value::Integer(4242),
                        text("app"),
                        text("web"),
                        text("api"),
                        text("10.0.0.5/32"),
                        text("active"),
                        text("SELECT * FROM orders WHERE id = $1"),
                        ts(600),
                        ts(45),
                        ts(45),
                    ],
                    vec![
                        Value::Integer(4243),
                        text("app"),
                        text("batch"),
                        text("etl"),
                        Value::Null,
                        text("active"),
                        text("UPDATE stock SET qty = qty - 1"),
                        ts(900),
                        ts(300),
                        ts(300),
                    ],
                    vec![
                        Value::Integer(4250),
                        text("app"),
                        text("web"),
                        text("api"),
                        text("10.0.0.6/32"),
                        text("idle"),
                        text("COMMIT"),
                        ts(700),
                        ts(20),
                        ts(20),
                    ],
                ],
            )
            .with_rows(
                catalog::TOP_STATEMENTS,
                vec![
                    statement(11, "SELECT * FROM orders WHERE id = $1", 5000, 12500.0, 4.0),
                    statement(
                        12,
                        "SELECT name FROM customers ORDER BY created_at",
                        40,
                        9800.5,
                        310.0,
                    ),
                    statement(13, "UPDATE stock SET qty = qty - $1 WHERE sku = $2", 900, 300.25, 1.2),
                ],
            )
            .with_rows(
                catalog::CACHE_HIT_RATIO,
                vec![vec![
                    text("app"),
                    Value::Integer(9_500),
                    Value::Integer(500),
                    Value::Integer(512 * 1024 * 1024),
                ]],
            )
            .with_rows(
                catalog::TABLE_BLOAT,
                vec![
                    vec![
                        text("public"),
                        text("orders"),
                        Value::Integer(100_000),
                        Value::Integer(40_000),
                        Value::Integer(200 * 1024 * 1024),
                        Value::Integer(50 * 1024 * 1024),
                        Value::Integer(250 * 1024 * 1024),
                        ts(86400),
                    ],
                    vec![
                        text("public"),
                        text("customers"),
                        Value::Integer(5_000),
                        Value::Integer(10),
                        Value::Integer(8 * 1024 * 1024),
                        Value::Integer(2 * 1024 * 1024),
                        Value::Integer(10 * 1024 * 1024),
                        Value::Null,
                    ],
                ],
            )
            .with_rows(
                catalog::INDEX_USAGE,
                vec![
                    vec![
                        text("public"),
                        text("orders"),
                        text("orders_pkey"),
                        Value::Integer(120_000),
                        Value::Integer(30 * 1024 * 1024),
                    ],
                    vec![
                        text("public"),
                        text("orders"),
                        text("orders_note_idx"),
                        Value::Integer(0),
                        Value::Integer(20 * 1024 * 1024),
                    ],
                ],
            )
            .with_rows(
                catalog::LOCK_INFO,
                vec![
                    vec![
                        Value::Integer(4243),
                        text("RowExclusiveLock"),
                        Value::Boolean(false),
                        text("stock"),
                        ts(300),
                        text("UPDATE stock SET qty = qty - 1"),
                    ],
                    vec![
                        Value::Integer(4242),
                        text("AccessShareLock"),
                        Value::Boolean(true),
                        text("orders"),
                        ts(45),
                        text("SELECT * FROM orders WHERE id = $1"),
                    ],
                ],
            )
            .with_rows(
                catalog::BGWRITER_STATS,
                vec![vec![
                    Value::Integer(1_200),
                    Value::Integer(3),
                    Value::Integer(36_000),
                    ts(3600),
                ]],
            )
    }
}

fn statement(queryid: i64, query: &str, calls: i64, total_ms: f64, max_ms: f64) -> Vec<Value> {
    vec![
        Value::Integer(queryid),
        Value::Text(query.to_string()),
        Value::Integer(calls),
        Value::Float(total_ms),
        Value::Float(total_ms / calls as f64),
        Value::Float(0.1),
        Value::Float(max_ms),
        Value::Integer(calls),
        Value::Integer(calls * 10),
        Value::Integer(calls),
    ]
}

impl StatsSource for MockSource {
    fn server_version(&self) -> Option<i32> {
        self.server_version
    }

    fn extension_installed(&mut self, name: &str) -> Result<bool, QueryError> {
        Ok(self.extensions.iter().any(|e| e == name))
    }

    fn execute(
        &mut self,
        query_id: &str,
        _sql: &str,
        schema: &[ColumnDef],
    ) -> Result<QueryOutput, QueryError> {
        self.executed.borrow_mut().push(query_id.to_string());
        let output = match self.responses.get(query_id) {
            Some(response) => response.clone()?,
            None => QueryOutput {
                columns: schema.iter().map(|c| c.name.to_string()).collect(),
                rows: Vec::new(),
            },
        };
        check_schema(query_id, schema, &output.columns)?;
        Ok(output)
    }
}

/// Hands out clones of a [`MockSource`], or refuses to connect.
#[derive(Debug)]
pub struct MockConnector {
    source: Option<MockSource>,
    refusal: String,
    released: Rc<Cell<u32>>,
}

impl MockConnector {
    pub fn new(source: MockSource) -> Self {
        let released = Rc::new(Cell::new(0));
        Self {
            source: Some(MockSource {
                released: ReleaseCounter(Rc::clone(&released)),
                ..source.clone()
            }),
            refusal: String::new(),
            released,
        }
    }

    /// A connector whose every attempt fails with `message`.
    pub fn unreachable(message: &str) -> Self {
        Self {
            source: None,
            refusal: message.to_string(),
            released: Rc::new(Cell::new(0)),
        }
    }

    /// Number of sources handed out and since dropped.
    pub fn released(&self) -> u32 {
        self.released.get()
    }

    /// The query ids executed through this connector's sources.
    pub fn executed(&self) -> Vec<String> {
        self.source.as_ref().map(|s| s.executed()).unwrap_or_default()
    }
}

impl Connector for MockConnector {
    type Source = MockSource;

    fn connect(&self, _profile: &ConnectionProfile) -> Result<MockSource, CollectError> {
        match &self.source {
            Some(source) => Ok(source.clone()),
            None => Err(CollectError::Connection(self.refusal.clone())),
        }
    }
}
