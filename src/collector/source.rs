//! Database access seam.
//!
//! [`StatsSource`] is what the collector talks to; [`Connector`] opens one.
//! Production code uses [`PgConnector`] / [`PgSource`] over a blocking
//! `postgres::Client`. Tests use [`MockConnector`](super::mock::MockConnector).

use chrono::{DateTime, Utc};
use postgres::types::Type;
use postgres::{Client, NoTls};
use tracing::{debug, warn};

use super::{CollectError, QueryError, check_schema, format_postgres_error};
use crate::config::ConnectionProfile;
use crate::model::{ColumnDef, ColumnType, Value};

/// Column names and typed rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// A read-only connection to a statistics source.
pub trait StatsSource {
    /// `server_version_num` of the connected server, if it could be determined.
    fn server_version(&self) -> Option<i32>;

    fn extension_installed(&mut self, name: &str) -> Result<bool, QueryError>;

    /// Runs `sql` and decodes every row according to `schema`.
    fn execute(
        &mut self,
        query_id: &str,
        sql: &str,
        schema: &[ColumnDef],
    ) -> Result<QueryOutput, QueryError>;
}

/// Opens a [`StatsSource`] for a connection profile.
pub trait Connector {
    type Source: StatsSource;

    fn connect(&self, profile: &ConnectionProfile) -> Result<Self::Source, CollectError>;
}

/// Connects to PostgreSQL without TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

impl Connector for PgConnector {
    type Source = PgSource;

    fn connect(&self, profile: &ConnectionProfile) -> Result<PgSource, CollectError> {
        PgSource::connect(profile)
    }
}

/// One PostgreSQL session, owned by the collector for the duration of a run.
///
/// The session is put into read-only mode right after connecting. Dropping
/// the value closes the connection.
pub struct PgSource {
    client: Client,
    server_version_num: Option<i32>,
}

impl PgSource {
    pub fn connect(profile: &ConnectionProfile) -> Result<Self, CollectError> {
        let mut config = postgres::Config::new();
        config
            .host(&profile.host)
            .port(profile.port)
            .dbname(&profile.database)
            .user(&profile.user)
            .application_name(&profile.application_name)
            .connect_timeout(profile.connect_timeout);
        if let Some(password) = &profile.password {
            config.password(password);
        }

        let mut client = config
            .connect(NoTls)
            .map_err(|e| CollectError::Connection(format_postgres_error(&e)))?;

        // Non-fatal: without a version every query uses its current SQL text.
        let server_version_num = client
            .query_one("SHOW server_version_num", &[])
            .ok()
            .and_then(|row| row.try_get::<_, String>(0).ok())
            .and_then(|v| v.parse::<i32>().ok());

        if let Err(e) = client.batch_execute("SET default_transaction_read_only = on") {
            warn!(error = %format_postgres_error(&e), "could not switch session to read-only");
        }

        debug!(server = %profile, version = ?server_version_num, "connected");
        Ok(Self {
            client,
            server_version_num,
        })
    }
}

impl Drop for PgSource {
    fn drop(&mut self) {
        debug!("releasing database connection");
    }
}

impl StatsSource for PgSource {
    fn server_version(&self) -> Option<i32> {
        self.server_version_num
    }

    fn extension_installed(&mut self, name: &str) -> Result<bool, QueryError> {
        self.client
            .query_opt("SELECT 1 FROM pg_extension WHERE extname = $1", &[&name])
            .map(|row| row.is_some())
            .map_err(|e| QueryError::Execution(format_postgres_error(&e)))
    }

    fn execute(
        &mut self,
        query_id: &str,
        sql: &str,
        schema: &[ColumnDef],
    ) -> Result<QueryOutput, QueryError> {
        let statement = self
            .client
            .prepare(sql)
            .map_err(|e| QueryError::Execution(format_postgres_error(&e)))?;

        // Validate before fetching so that zero-row results are checked too.
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        check_schema(query_id, schema, &columns)?;

        let rows = self
            .client
            .query(&statement, &[])
            .map_err(|e| QueryError::Execution(format_postgres_error(&e)))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(schema.len());
            for (idx, col) in schema.iter().enumerate() {
                let value = decode_cell(row, idx, col.ty).map_err(|_| QueryError::TypeMismatch {
                    query: query_id.to_string(),
                    column: col.name.to_string(),
                    expected: col.ty,
                })?;
                values.push(value);
            }
            out.push(values);
        }

        Ok(QueryOutput { columns, rows: out })
    }
}

/// Decodes one cell into the declared semantic type.
fn decode_cell(row: &postgres::Row, idx: usize, ty: ColumnType) -> Result<Value, postgres::Error> {
    let pg_type = row.columns()[idx].type_();
    let value = match ty {
        ColumnType::Integer => {
            let v = if *pg_type == Type::INT2 {
                row.try_get::<_, Option<i16>>(idx)?.map(i64::from)
            } else if *pg_type == Type::INT4 {
                row.try_get::<_, Option<i32>>(idx)?.map(i64::from)
            } else if *pg_type == Type::OID {
                row.try_get::<_, Option<u32>>(idx)?.map(i64::from)
            } else {
                row.try_get::<_, Option<i64>>(idx)?
            };
            v.map(Value::Integer)
        }
        ColumnType::Float => {
            let v = if *pg_type == Type::FLOAT4 {
                row.try_get::<_, Option<f32>>(idx)?.map(f64::from)
            } else {
                row.try_get::<_, Option<f64>>(idx)?
            };
            v.map(Value::Float)
        }
        ColumnType::Text => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
        ColumnType::Boolean => row.try_get::<_, Option<bool>>(idx)?.map(Value::Boolean),
        ColumnType::Timestamp => row
            .try_get::<_, Option<i64>>(idx)?
            .and_then(DateTime::<Utc>::from_timestamp_micros)
            .map(Value::Timestamp),
    };
    Ok(value.unwrap_or(Value::Null))
}
