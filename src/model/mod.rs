//! Data model shared by the collector, the raw-data store and the reporter.
//!
//! - [`Value`] / [`ColumnType`]: a typed scalar and its declared semantic type
//! - [`ColumnDef`]: one entry of a per-query column schema
//! - [`MetricDataset`]: one query's result set, tagged with the query id and
//!   the wall-clock time of the collection run that produced it
//! - run tags: the `YYYYmmdd_HHMMSS` form used in file names

mod dataset;
mod run_tag;
mod value;

pub use dataset::{ColumnDef, MetricDataset, Row};
pub(crate) use run_tag::RUN_TAG_LEN;
pub use run_tag::{format_run_tag, parse_run_tag, run_timestamp};
pub use value::{ColumnType, Value};
