//! pgprofile - PostgreSQL performance snapshot and report library.
//!
//! One invocation connects to a server, runs a fixed catalog of read-only
//! diagnostic queries, keeps every result set as a CSV file tagged with the
//! run timestamp and renders a markdown report from them:
//!
//! ```text
//! Settings ─► Collector ─► Vec<MetricDataset> ─┬─► RawStore (CSV)
//!                                              └─► build_report ─► render ─► report file
//! ```
//!
//! Reports can also be rebuilt later from the persisted CSV files.

pub mod collector;
pub mod config;
pub mod fmt;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod storage;
