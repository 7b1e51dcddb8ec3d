use chrono::{DateTime, Utc};

use super::value::{ColumnType, Value};

/// One column of a query's expected schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// Result set of one diagnostic query from one collection run.
///
/// Immutable once built. Every dataset carries the id of the query that
/// produced it and the collection timestamp of its run, so report numbers
/// can always be attributed to a specific run.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDataset {
    query_id: String,
    collected_at: DateTime<Utc>,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Value>>,
}

impl MetricDataset {
    /// Builds a dataset. Every row must have one value per column.
    pub fn new(
        query_id: impl Into<String>,
        collected_at: DateTime<Utc>,
        columns: Vec<ColumnDef>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self {
            query_id: query_id.into(),
            collected_at,
            columns,
            rows,
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn raw_rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }
}

/// Borrowed view of one dataset row with by-name access.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [ColumnDef],
    values: &'a [Value],
}

static NULL: Value = Value::Null;

impl<'a> Row<'a> {
    /// Value of column `name`, or `Null` if the dataset has no such column.
    pub fn get(&self, name: &str) -> &'a Value {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| self.values.get(i))
            .unwrap_or(&NULL)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).as_i64()
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).as_f64()
    }

    pub fn str(&self, name: &str) -> Option<&'a str> {
        self.get(name).as_str()
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).as_bool()
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).as_timestamp()
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}
