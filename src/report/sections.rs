//! Per-section content and the derived numbers behind it.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::advice;
use super::{Align, Block, ReportInput, ReportOptions, SectionKind, Table};
use crate::collector::catalog::{
    ACTIVE_QUERIES, BGWRITER_STATS, CACHE_HIT_RATIO, CONNECTION_COUNTS, INDEX_USAGE, LOCK_INFO,
    SERVER_INFO, TABLE_BLOAT, TOP_STATEMENTS,
};
use crate::fmt::{
    format_bytes, format_duration, format_ms, format_percent, format_rate, normalize_query,
    truncate,
};
use crate::model::{MetricDataset, Row, format_run_tag};

const QUERY_WIDTH: usize = 100;
const ACTIVE_LIMIT: usize = 10;
const TABLE_LIMIT: usize = 10;
const CACHE_TARGET: f64 = 90.0;

pub(super) fn build(kind: SectionKind, input: &ReportInput, options: &ReportOptions) -> Vec<Block> {
    match kind {
        SectionKind::Overview => overview(input, options),
        SectionKind::Connections => connections(input),
        SectionKind::TopQueries => top_queries(input, options.top_n),
        SectionKind::CacheEffectiveness => cache_effectiveness(input),
        SectionKind::Bloat => bloat(input),
        SectionKind::Locks => locks(input),
        SectionKind::BackgroundWriter => background_writer(input),
        SectionKind::Recommendations => recommendations(input),
    }
}

/// Cache hit ratio in percent, rounded to two decimals.
///
/// `None` when there were no block accesses at all.
pub fn cache_hit_ratio(hits: i64, reads: i64) -> Option<f64> {
    percent_of(hits, hits.saturating_add(reads))
}

/// Share of dead tuples in percent, `None` for an empty table.
pub fn dead_tuple_percent(live: i64, dead: i64) -> Option<f64> {
    percent_of(dead, live.saturating_add(dead))
}

fn percent_of(part: i64, total: i64) -> Option<f64> {
    if total <= 0 {
        return None;
    }
    let pct = part as f64 * 100.0 / total as f64;
    Some((pct * 100.0).round() / 100.0)
}

/// One `pg_stat_statements` entry as shown in the top queries table.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementStat {
    pub queryid: Option<i64>,
    pub query: String,
    pub calls: i64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub hit_ratio: Option<f64>,
}

/// Statements ordered by total execution time, highest first.
///
/// Ties go to the smaller query id (entries without one last), then to
/// the query text, so the order is stable across runs.
pub fn rank_statements(dataset: &MetricDataset) -> Vec<StatementStat> {
    let mut stats: Vec<StatementStat> = dataset
        .rows()
        .map(|row| StatementStat {
            queryid: row.i64("queryid"),
            query: row.str("query").unwrap_or_default().to_string(),
            calls: row.i64("calls").unwrap_or(0),
            total_ms: row.f64("total_exec_time").unwrap_or(0.0),
            mean_ms: row.f64("mean_exec_time").unwrap_or(0.0),
            max_ms: row.f64("max_exec_time").unwrap_or(0.0),
            hit_ratio: cache_hit_ratio(
                row.i64("shared_blks_hit").unwrap_or(0),
                row.i64("shared_blks_read").unwrap_or(0),
            ),
        })
        .collect();
    stats.sort_by(|a, b| {
        b.total_ms
            .total_cmp(&a.total_ms)
            .then_with(|| some_first(id_text(a.queryid), id_text(b.queryid)))
            .then_with(|| a.query.cmp(&b.query))
    });
    stats
}

/// Query ids compare as decimal text, so that `10` sorts before `9`.
fn id_text(queryid: Option<i64>) -> Option<String> {
    queryid.map(|id| id.to_string())
}

fn some_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn missing(query_id: &str) -> Block {
    Block::Missing(query_id.to_string())
}

fn no_rows(query_id: &str) -> Block {
    Block::Prose(format!("{}: no rows.", query_id))
}

/// The dataset for `query_id` when it has rows, otherwise the block that
/// explains why there is nothing to show.
fn rows_of<'a>(input: &ReportInput<'a>, query_id: &str) -> Result<&'a MetricDataset, Block> {
    match input.get(query_id) {
        None => Err(missing(query_id)),
        Some(ds) if ds.is_empty() => Err(no_rows(query_id)),
        Some(ds) => Ok(ds),
    }
}

fn elapsed(now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> String {
    match since {
        Some(ts) => format_duration((now - ts).num_seconds()),
        None => "-".to_string(),
    }
}

fn opt_int(v: Option<i64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn opt_text(v: Option<&str>) -> String {
    v.unwrap_or("-").to_string()
}

fn short_query(q: Option<&str>) -> String {
    truncate(&normalize_query(q.unwrap_or_default()), QUERY_WIDTH)
}

fn overview(input: &ReportInput, options: &ReportOptions) -> Vec<Block> {
    let mut blocks = vec![Block::Prose(format!(
        "Collected at {} UTC (run {}).",
        input.collected_at.format("%Y-%m-%d %H:%M:%S"),
        format_run_tag(input.collected_at)
    ))];

    match rows_of(input, SERVER_INFO) {
        Ok(ds) => {
            let mut table = Table::new(&[("Property", Align::Left), ("Value", Align::Left)]);
            if let Some(row) = ds.rows().next() {
                table.push(vec!["Server".into(), opt_text(row.str("version"))]);
                table.push(vec!["Database".into(), opt_text(row.str("database"))]);
                table.push(vec![
                    "Uptime".into(),
                    elapsed(input.collected_at, row.timestamp("started_at")),
                ]);
            }
            if let Some(bytes) = input
                .get(CACHE_HIT_RATIO)
                .and_then(|ds| ds.rows().next())
                .and_then(|row| row.i64("database_bytes"))
            {
                table.push(vec!["Database size".into(), format_bytes(bytes)]);
            }
            blocks.push(Block::Table(table));
        }
        Err(block) => blocks.push(block),
    }

    let absent: Vec<&str> = options
        .expected
        .iter()
        .copied()
        .filter(|id| input.get(id).is_none())
        .collect();
    blocks.push(Block::Prose(format!(
        "Datasets collected: {} of {}.",
        options.expected.len() - absent.len(),
        options.expected.len()
    )));
    if !absent.is_empty() {
        blocks.push(Block::Prose(format!("Not collected: {}.", absent.join(", "))));
    }
    blocks
}

fn connections(input: &ReportInput) -> Vec<Block> {
    let mut blocks = Vec::new();

    match rows_of(input, CONNECTION_COUNTS) {
        Ok(ds) => {
            let mut counts: Vec<(&str, i64)> = ds
                .rows()
                .map(|r| {
                    (
                        r.str("state").unwrap_or("unknown"),
                        r.i64("connections").unwrap_or(0),
                    )
                })
                .collect();
            counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            let total: i64 = counts.iter().map(|c| c.1).sum();
            let of = |state: &str| {
                counts
                    .iter()
                    .filter(|c| c.0 == state)
                    .map(|c| c.1)
                    .sum::<i64>()
            };
            blocks.push(Block::Prose(format!(
                "{} connections: {} active, {} idle, {} idle in transaction.",
                total,
                of("active"),
                of("idle"),
                of("idle in transaction")
            )));

            let mut table = Table::new(&[
                ("State", Align::Left),
                ("Connections", Align::Right),
                ("Share (%)", Align::Right),
            ]);
            for (state, n) in &counts {
                table.push(vec![
                    state.to_string(),
                    n.to_string(),
                    format_percent(percent_of(*n, total)),
                ]);
            }
            blocks.push(Block::Table(table));
        }
        Err(block) => blocks.push(block),
    }

    blocks.push(Block::Heading("Longest-running active queries".into()));
    match rows_of(input, ACTIVE_QUERIES) {
        Ok(ds) => {
            let mut active: Vec<Row> = ds
                .rows()
                .filter(|r| r.str("state") == Some("active"))
                .collect();
            active.sort_by(|a, b| {
                some_first(a.timestamp("query_start"), b.timestamp("query_start"))
                    .then_with(|| some_first(a.i64("pid"), b.i64("pid")))
            });
            if active.is_empty() {
                blocks.push(Block::Prose("No active queries.".into()));
            } else {
                let mut table = Table::new(&[
                    ("PID", Align::Right),
                    ("User", Align::Left),
                    ("Application", Align::Left),
                    ("Running for", Align::Right),
                    ("Query", Align::Left),
                ]);
                for row in active.iter().take(ACTIVE_LIMIT) {
                    table.push(vec![
                        opt_int(row.i64("pid")),
                        opt_text(row.str("usename")),
                        opt_text(row.str("application_name")),
                        elapsed(input.collected_at, row.timestamp("query_start")),
                        short_query(row.str("query")),
                    ]);
                }
                blocks.push(Block::Table(table));
            }
        }
        Err(block) => blocks.push(block),
    }
    blocks
}

fn top_queries(input: &ReportInput, top_n: usize) -> Vec<Block> {
    let ds = match rows_of(input, TOP_STATEMENTS) {
        Ok(ds) => ds,
        Err(block) => return vec![block],
    };
    let ranked = rank_statements(ds);
    let total_ms: f64 = ranked.iter().map(|s| s.total_ms).sum();
    let mean_of_means = ranked.iter().map(|s| s.mean_ms).sum::<f64>() / ranked.len() as f64;
    let slowest = ranked.iter().map(|s| s.max_ms).fold(0.0, f64::max);

    let mut blocks = vec![
        Block::Prose(format!("Statements collected: {}.", ranked.len())),
        Block::Prose(format!(
            "Total execution time: {:.2} s.",
            total_ms / 1000.0
        )),
        Block::Prose(format!("Mean of mean time: {} ms.", format_ms(mean_of_means))),
        Block::Prose(format!("Slowest single execution: {} ms.", format_ms(slowest))),
    ];

    let mut table = Table::new(&[
        ("#", Align::Right),
        ("Query ID", Align::Right),
        ("Query", Align::Left),
        ("Calls", Align::Right),
        ("Total ms", Align::Right),
        ("Mean ms", Align::Right),
        ("Max ms", Align::Right),
        ("Cache hit (%)", Align::Right),
    ]);
    for (i, stat) in ranked.iter().take(top_n).enumerate() {
        table.push(vec![
            (i + 1).to_string(),
            opt_int(stat.queryid),
            short_query(Some(&stat.query)),
            stat.calls.to_string(),
            format_ms(stat.total_ms),
            format_ms(stat.mean_ms),
            format_ms(stat.max_ms),
            format_percent(stat.hit_ratio),
        ]);
    }
    blocks.push(Block::Table(table));
    blocks
}

/// Overall hit ratio over every row of the cache dataset.
pub(super) fn overall_hit_ratio(ds: &MetricDataset) -> Option<f64> {
    let (hits, reads) = ds.rows().fold((0i64, 0i64), |(h, r), row| {
        (
            h.saturating_add(row.i64("blks_hit").unwrap_or(0)),
            r.saturating_add(row.i64("blks_read").unwrap_or(0)),
        )
    });
    cache_hit_ratio(hits, reads)
}

fn cache_effectiveness(input: &ReportInput) -> Vec<Block> {
    let ds = match rows_of(input, CACHE_HIT_RATIO) {
        Ok(ds) => ds,
        Err(block) => return vec![block],
    };

    let mut table = Table::new(&[
        ("Database", Align::Left),
        ("Blocks hit", Align::Right),
        ("Blocks read", Align::Right),
        ("Hit ratio (%)", Align::Right),
        ("Size", Align::Right),
    ]);
    for row in ds.rows() {
        let hits = row.i64("blks_hit").unwrap_or(0);
        let reads = row.i64("blks_read").unwrap_or(0);
        table.push(vec![
            opt_text(row.str("datname")),
            hits.to_string(),
            reads.to_string(),
            format_percent(cache_hit_ratio(hits, reads)),
            row.i64("database_bytes")
                .map(format_bytes)
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    let ratio = overall_hit_ratio(ds);
    let verdict = match ratio {
        Some(r) if r < CACHE_TARGET => {
            "Warning: below 90%, the working set does not fit in shared_buffers."
        }
        Some(_) => "OK: at or above 90%.",
        None => "No block accesses recorded since the last statistics reset.",
    };
    vec![
        Block::Table(table),
        Block::Prose(format!("Cache hit ratio (%): {}.", format_percent(ratio))),
        Block::Prose(verdict.to_string()),
    ]
}

fn bloat(input: &ReportInput) -> Vec<Block> {
    let mut blocks = vec![Block::Heading("Largest tables".into())];

    match rows_of(input, TABLE_BLOAT) {
        Ok(ds) => {
            let mut tables: Vec<Row> = ds.rows().collect();
            tables.sort_by(|a, b| {
                size(b, "total_bytes")
                    .cmp(&size(a, "total_bytes"))
                    .then_with(|| a.str("schema_name").cmp(&b.str("schema_name")))
                    .then_with(|| a.str("table_name").cmp(&b.str("table_name")))
            });
            let mut table = Table::new(&[
                ("Table", Align::Left),
                ("Total", Align::Right),
                ("Heap", Align::Right),
                ("Indexes", Align::Right),
                ("Live", Align::Right),
                ("Dead", Align::Right),
                ("Dead (%)", Align::Right),
                ("Last vacuum", Align::Left),
            ]);
            for row in tables.iter().take(TABLE_LIMIT) {
                let live = row.i64("n_live_tup").unwrap_or(0);
                let dead = row.i64("n_dead_tup").unwrap_or(0);
                let bytes = |col: &str| row.i64(col).map(format_bytes).unwrap_or_else(|| "-".into());
                table.push(vec![
                    qualified(row, "table_name"),
                    bytes("total_bytes"),
                    bytes("table_bytes"),
                    bytes("indexes_bytes"),
                    live.to_string(),
                    dead.to_string(),
                    format_percent(dead_tuple_percent(live, dead)),
                    row.timestamp("last_vacuum")
                        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".to_string()),
                ]);
            }
            blocks.push(Block::Table(table));
        }
        Err(block) => blocks.push(block),
    }

    blocks.push(Block::Heading("Unused indexes".into()));
    match rows_of(input, INDEX_USAGE) {
        Ok(ds) => {
            let mut unused: Vec<Row> = ds.rows().filter(|r| r.i64("idx_scan") == Some(0)).collect();
            unused.sort_by(|a, b| {
                size(b, "index_bytes")
                    .cmp(&size(a, "index_bytes"))
                    .then_with(|| a.str("index_name").cmp(&b.str("index_name")))
            });
            if unused.is_empty() {
                blocks.push(Block::Prose("No unused indexes.".into()));
            } else {
                let mut table = Table::new(&[
                    ("Index", Align::Left),
                    ("Table", Align::Left),
                    ("Size", Align::Right),
                ]);
                for row in &unused {
                    table.push(vec![
                        qualified(row, "index_name"),
                        opt_text(row.str("table_name")),
                        row.i64("index_bytes")
                            .map(format_bytes)
                            .unwrap_or_else(|| "-".into()),
                    ]);
                }
                blocks.push(Block::Table(table));
            }
        }
        Err(block) => blocks.push(block),
    }
    blocks
}

/// Size column for descending sorts, unknown sizes last.
fn size(row: &Row, column: &str) -> i64 {
    row.i64(column).unwrap_or(i64::MIN)
}

/// `schema.name` for a relation row.
pub(super) fn qualified(row: &Row, name_column: &str) -> String {
    match row.str("schema_name") {
        Some(schema) => format!("{}.{}", schema, row.str(name_column).unwrap_or("?")),
        None => opt_text(row.str(name_column)),
    }
}

fn locks(input: &ReportInput) -> Vec<Block> {
    let ds = match rows_of(input, LOCK_INFO) {
        Ok(ds) => ds,
        Err(block) => return vec![block],
    };
    let waiting: Vec<Row> = ds.rows().filter(|r| r.bool("granted") == Some(false)).collect();
    let mut blocks = vec![Block::Prose(format!(
        "{} locks: {} granted, {} waiting.",
        ds.len(),
        ds.len() - waiting.len(),
        waiting.len()
    ))];
    if waiting.is_empty() {
        return blocks;
    }

    let mut table = Table::new(&[
        ("PID", Align::Right),
        ("Mode", Align::Left),
        ("Relation", Align::Left),
        ("Waiting for", Align::Right),
        ("Query", Align::Left),
    ]);
    for row in &waiting {
        table.push(vec![
            opt_int(row.i64("pid")),
            opt_text(row.str("mode")),
            opt_text(row.str("relation")),
            elapsed(input.collected_at, row.timestamp("query_start")),
            short_query(row.str("query")),
        ]);
    }
    blocks.push(Block::Heading("Waiting locks".into()));
    blocks.push(Block::Table(table));
    blocks
}

fn background_writer(input: &ReportInput) -> Vec<Block> {
    let ds = match rows_of(input, BGWRITER_STATS) {
        Ok(ds) => ds,
        Err(block) => return vec![block],
    };
    let mut blocks = Vec::new();
    for row in ds.rows() {
        let mut table = Table::new(&[("Counter", Align::Left), ("Value", Align::Right)]);
        for counter in ["buffers_clean", "maxwritten_clean", "buffers_alloc"] {
            table.push(vec![counter.to_string(), opt_int(row.i64(counter))]);
        }
        table.push(vec![
            "stats_reset".to_string(),
            row.timestamp("stats_reset")
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
        blocks.push(Block::Table(table));

        let since_reset = row
            .timestamp("stats_reset")
            .map(|ts| (input.collected_at - ts).num_seconds());
        match (row.i64("buffers_alloc"), since_reset) {
            (Some(alloc), Some(secs)) if secs > 0 => blocks.push(Block::Prose(format!(
                "Buffers allocated: {} over {} since the last reset.",
                format_rate(alloc as f64 / secs as f64),
                format_duration(secs)
            ))),
            _ => blocks.push(Block::Prose(
                "Buffers allocated per second: n/a (no statistics reset time).".into(),
            )),
        }
    }
    blocks
}

fn recommendations(input: &ReportInput) -> Vec<Block> {
    let advice = advice::evaluate(input);
    if advice.is_empty() {
        return vec![Block::Prose("No recommendations.".into())];
    }
    let mut table = Table::new(&[
        ("Severity", Align::Left),
        ("Rule", Align::Left),
        ("Subject", Align::Left),
        ("Advice", Align::Left),
    ]);
    for a in advice {
        table.push(vec![
            a.severity.to_string(),
            a.rule_id.to_string(),
            a.subject,
            a.message,
        ]);
    }
    vec![Block::Table(table)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::catalog;
    use crate::collector::{MockSource, collect_from};
    use crate::model::Value;
    use crate::report::{ReportOptions, build_report};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn datasets(source: MockSource, ids: &[&str]) -> Vec<MetricDataset> {
        let mut source = source;
        collect_from(&mut source, &catalog::select(ids), now()).0
    }

    fn section(kind: SectionKind, source: MockSource, ids: &[&str]) -> Vec<Block> {
        let ds = datasets(source, ids);
        let report = build_report(now(), &ds, &ReportOptions::default()).unwrap();
        report.section(kind).unwrap().blocks.clone()
    }

    fn tables(blocks: &[Block]) -> Vec<&Table> {
        blocks
            .iter()
            .filter_map(|b| match b {
                Block::Table(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn stmt(queryid: Option<i64>, query: &str, total: f64) -> Vec<Value> {
        vec![
            queryid.map(Value::Integer).unwrap_or(Value::Null),
            Value::Text(query.into()),
            Value::Integer(1),
            Value::Float(total),
            Value::Float(total),
            Value::Float(total),
            Value::Float(total),
            Value::Integer(1),
            Value::Integer(0),
            Value::Integer(0),
        ]
    }

    #[test]
    fn hit_ratio_is_rounded_or_undefined() {
        assert_eq!(format_percent(cache_hit_ratio(80, 20)), "80.00");
        assert_eq!(format_percent(cache_hit_ratio(0, 0)), "n/a");
        assert_eq!(cache_hit_ratio(2, 1), Some(66.67));
        assert_eq!(cache_hit_ratio(0, 5), Some(0.0));
    }

    #[test]
    fn dead_tuple_share() {
        assert_eq!(dead_tuple_percent(100_000, 40_000), Some(28.57));
        assert_eq!(dead_tuple_percent(0, 0), None);
    }

    #[test]
    fn ranking_breaks_ties_by_query_id() {
        let source = MockSource::new().with_extension("pg_stat_statements").with_rows(
            TOP_STATEMENTS,
            vec![
                stmt(Some(30), "c", 10.0),
                stmt(None, "n", 50.0),
                stmt(Some(20), "b", 50.0),
                stmt(Some(10), "a", 5.0),
                stmt(Some(5), "z", 50.0),
                stmt(Some(9), "y", 7.5),
                stmt(Some(10), "x", 7.5),
                stmt(Some(-3), "w", 50.0),
            ],
        );
        let ds = datasets(source, &[TOP_STATEMENTS]);
        let ids: Vec<_> = rank_statements(&ds[0]).iter().map(|s| s.queryid).collect();
        assert_eq!(
            ids,
            vec![Some(-3), Some(20), Some(5), None, Some(30), Some(10), Some(9), Some(10)]
        );
    }

    #[test]
    fn top_queries_limited_to_top_n() {
        let rows = (0..15).map(|i| stmt(Some(i), "q", i as f64)).collect();
        let source = MockSource::new()
            .with_extension("pg_stat_statements")
            .with_rows(TOP_STATEMENTS, rows);
        let ds = datasets(source, &[TOP_STATEMENTS]);
        let options = ReportOptions {
            top_n: 3,
            ..ReportOptions::default()
        };
        let report = build_report(now(), &ds, &options).unwrap();
        let blocks = &report.section(SectionKind::TopQueries).unwrap().blocks;
        let table = tables(blocks)[0];
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][1], "14");
        assert!(blocks.contains(&Block::Prose("Statements collected: 15.".into())));
    }

    #[test]
    fn cache_section_reports_na_without_accesses() {
        let source = MockSource::new().with_rows(
            CACHE_HIT_RATIO,
            vec![vec![
                Value::Text("app".into()),
                Value::Integer(0),
                Value::Integer(0),
                Value::Integer(8192),
            ]],
        );
        let blocks = section(SectionKind::CacheEffectiveness, source, &[CACHE_HIT_RATIO]);
        assert!(blocks.contains(&Block::Prose("Cache hit ratio (%): n/a.".into())));
    }

    #[test]
    fn cache_section_warns_below_target() {
        let source = MockSource::new().with_rows(
            CACHE_HIT_RATIO,
            vec![vec![
                Value::Text("app".into()),
                Value::Integer(80),
                Value::Integer(20),
                Value::Null,
            ]],
        );
        let blocks = section(SectionKind::CacheEffectiveness, source, &[CACHE_HIT_RATIO]);
        assert!(blocks.contains(&Block::Prose("Cache hit ratio (%): 80.00.".into())));
        assert!(matches!(&blocks[2], Block::Prose(p) if p.starts_with("Warning")));
    }

    #[test]
    fn zero_row_dataset_is_not_missing() {
        let blocks = section(SectionKind::Locks, MockSource::new(), &[LOCK_INFO]);
        assert_eq!(blocks, vec![Block::Prose("lock_info: no rows.".into())]);
    }

    #[test]
    fn oldest_active_queries_first() {
        let blocks = section(
            SectionKind::Connections,
            MockSource::typical(now()),
            &[CONNECTION_COUNTS, ACTIVE_QUERIES],
        );
        assert_eq!(
            blocks[0],
            Block::Prose("16 connections: 3 active, 12 idle, 1 idle in transaction.".into())
        );
        let active = tables(&blocks)[1];
        let pids: Vec<_> = active.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(pids, vec!["4243", "4242"]);
        assert_eq!(active.rows[0][3], "5m 0s");
    }

    #[test]
    fn bloat_lists_largest_tables_and_unused_indexes() {
        let blocks = section(
            SectionKind::Bloat,
            MockSource::typical(now()),
            &[TABLE_BLOAT, INDEX_USAGE],
        );
        let found = tables(&blocks);
        assert_eq!(found[0].rows[0][0], "public.orders");
        assert_eq!(found[0].rows[0][6], "28.57");
        assert_eq!(found[0].rows[1][7], "never");
        assert_eq!(found[1].rows.len(), 1);
        assert_eq!(found[1].rows[0][0], "public.orders_note_idx");
    }

    #[test]
    fn locks_count_waiting() {
        let blocks = section(SectionKind::Locks, MockSource::typical(now()), &[LOCK_INFO]);
        assert_eq!(blocks[0], Block::Prose("2 locks: 1 granted, 1 waiting.".into()));
        assert_eq!(tables(&blocks)[0].rows[0][0], "4243");
    }

    #[test]
    fn bgwriter_rate_since_reset() {
        let blocks = section(
            SectionKind::BackgroundWriter,
            MockSource::typical(now()),
            &[BGWRITER_STATS],
        );
        assert_eq!(
            blocks[1],
            Block::Prose("Buffers allocated: 10.0/s over 1h 0m since the last reset.".into())
        );
    }

    #[test]
    fn overview_lists_missing_datasets() {
        let blocks = section(
            SectionKind::Overview,
            MockSource::typical(now()),
            &[SERVER_INFO, CACHE_HIT_RATIO],
        );
        let overview = tables(&blocks)[0];
        assert_eq!(overview.rows[2], vec!["Uptime".to_string(), "3d 2h".to_string()]);
        assert_eq!(overview.rows[3][1], "512.0 MiB");
        assert!(blocks.contains(&Block::Prose("Datasets collected: 2 of 9.".into())));
    }
}
