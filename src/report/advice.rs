//! Tuning advice derived from one run's datasets.
//!
//! Each rule looks at the datasets it understands and returns zero or more
//! findings. Rules never fail: a dataset that was not collected simply
//! produces no advice.

use std::fmt;

use super::ReportInput;
use super::sections::{dead_tuple_percent, overall_hit_ratio, qualified};
use crate::collector::catalog::{
    ACTIVE_QUERIES, CACHE_HIT_RATIO, INDEX_USAGE, LOCK_INFO, TABLE_BLOAT, TOP_STATEMENTS,
};
use crate::fmt::{format_bytes, format_duration, normalize_query, truncate};
use crate::model::Row;

/// Findings beyond this are dropped, lowest severity first.
pub const MAX_ADVICE: usize = 20;

const MIB: i64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advice {
    pub rule_id: &'static str,
    pub severity: Severity,
    /// What the advice is about: a statement, table, index or the server.
    pub subject: String,
    pub message: String,
}

pub trait AdviceRule {
    fn id(&self) -> &'static str;
    fn evaluate(&self, input: &ReportInput) -> Vec<Advice>;
}

pub fn all_rules() -> Vec<Box<dyn AdviceRule>> {
    vec![
        // Statements
        Box::new(SelectStarRule),
        Box::new(LeadingWildcardLikeRule),
        Box::new(OrderByWithoutLimitRule),
        // Server
        Box::new(LowCacheHitRatioRule),
        Box::new(LongRunningQueryRule),
        Box::new(WaitingLocksRule),
        // Relations
        Box::new(DeadTuplesHighRule),
        Box::new(UnusedIndexRule),
    ]
}

/// Runs every rule and orders the findings, most severe first.
pub fn evaluate(input: &ReportInput) -> Vec<Advice> {
    let mut advice: Vec<Advice> = all_rules()
        .iter()
        .flat_map(|rule| rule.evaluate(input))
        .collect();
    advice.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.rule_id.cmp(b.rule_id))
            .then_with(|| a.subject.cmp(&b.subject))
    });
    advice.truncate(MAX_ADVICE);
    advice
}

fn rows<'a>(input: &ReportInput<'a>, query_id: &str) -> Vec<Row<'a>> {
    input
        .get(query_id)
        .map(|ds| ds.rows().collect())
        .unwrap_or_default()
}

/// Statements whose normalized, upper-cased text satisfies `matches`.
fn matching_statements(
    input: &ReportInput,
    rule_id: &'static str,
    severity: Severity,
    message: &str,
    matches: impl Fn(&str, &Row) -> bool,
) -> Vec<Advice> {
    rows(input, TOP_STATEMENTS)
        .iter()
        .filter_map(|row| {
            let text = normalize_query(row.str("query")?);
            if !matches(&text.to_uppercase(), row) {
                return None;
            }
            Some(Advice {
                rule_id,
                severity,
                subject: match row.i64("queryid") {
                    Some(id) => format!("queryid {}", id),
                    None => truncate(&text, 40),
                },
                message: format!("{}: `{}`", message, truncate(&text, 60)),
            })
        })
        .collect()
}

// ============================================================
// Statements
// ============================================================

pub struct SelectStarRule;

impl AdviceRule for SelectStarRule {
    fn id(&self) -> &'static str {
        "select_star"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        matching_statements(
            input,
            self.id(),
            Severity::Info,
            "select only the columns you need",
            |q, _| q.contains("SELECT *"),
        )
    }
}

pub struct LeadingWildcardLikeRule;

impl AdviceRule for LeadingWildcardLikeRule {
    fn id(&self) -> &'static str {
        "leading_wildcard_like"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        matching_statements(
            input,
            self.id(),
            Severity::Warning,
            "a leading wildcard cannot use a btree index, consider pg_trgm",
            |q, _| q.contains("LIKE '%"),
        )
    }
}

pub struct OrderByWithoutLimitRule;

impl OrderByWithoutLimitRule {
    const MIN_CALLS: i64 = 10;
}

impl AdviceRule for OrderByWithoutLimitRule {
    fn id(&self) -> &'static str {
        "order_by_without_limit"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        matching_statements(
            input,
            self.id(),
            Severity::Info,
            "sorts the full result on every call, add LIMIT if only the first rows are used",
            |q, row| {
                q.contains("ORDER BY")
                    && !q.contains("LIMIT")
                    && row.i64("calls").unwrap_or(0) > Self::MIN_CALLS
            },
        )
    }
}

// ============================================================
// Server
// ============================================================

pub struct LowCacheHitRatioRule;

impl AdviceRule for LowCacheHitRatioRule {
    fn id(&self) -> &'static str {
        "low_cache_hit_ratio"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        let Some(ratio) = input.get(CACHE_HIT_RATIO).and_then(overall_hit_ratio) else {
            return Vec::new();
        };
        if ratio >= 90.0 {
            return Vec::new();
        }
        let severity = if ratio < 80.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        vec![Advice {
            rule_id: self.id(),
            severity,
            subject: "shared_buffers".to_string(),
            message: format!(
                "cache hit ratio is {:.2}%, consider raising shared_buffers",
                ratio
            ),
        }]
    }
}

pub struct LongRunningQueryRule;

impl LongRunningQueryRule {
    const THRESHOLD_SECS: i64 = 300;
}

impl AdviceRule for LongRunningQueryRule {
    fn id(&self) -> &'static str {
        "long_running_query"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        rows(input, ACTIVE_QUERIES)
            .iter()
            .filter(|r| r.str("state") == Some("active"))
            .filter_map(|r| {
                let secs = (input.collected_at - r.timestamp("query_start")?).num_seconds();
                if secs < Self::THRESHOLD_SECS {
                    return None;
                }
                Some(Advice {
                    rule_id: self.id(),
                    severity: Severity::Warning,
                    subject: format!("pid {}", r.i64("pid")?),
                    message: format!(
                        "running for {}: `{}`",
                        format_duration(secs),
                        truncate(&normalize_query(r.str("query").unwrap_or_default()), 60)
                    ),
                })
            })
            .collect()
    }
}

pub struct WaitingLocksRule;

impl AdviceRule for WaitingLocksRule {
    fn id(&self) -> &'static str {
        "waiting_locks"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        let waiting = rows(input, LOCK_INFO)
            .iter()
            .filter(|r| r.bool("granted") == Some(false))
            .count();
        if waiting == 0 {
            return Vec::new();
        }
        vec![Advice {
            rule_id: self.id(),
            severity: Severity::Warning,
            subject: "locks".to_string(),
            message: format!(
                "{} lock(s) waiting, look for long transactions holding them",
                waiting
            ),
        }]
    }
}

// ============================================================
// Relations
// ============================================================

pub struct DeadTuplesHighRule;

impl DeadTuplesHighRule {
    const MIN_TUPLES: i64 = 1000;
    const MAX_DEAD_PCT: f64 = 20.0;
}

impl AdviceRule for DeadTuplesHighRule {
    fn id(&self) -> &'static str {
        "dead_tuples_high"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        rows(input, TABLE_BLOAT)
            .iter()
            .filter_map(|r| {
                let live = r.i64("n_live_tup").unwrap_or(0);
                let dead = r.i64("n_dead_tup").unwrap_or(0);
                if live.saturating_add(dead) < Self::MIN_TUPLES {
                    return None;
                }
                let pct = dead_tuple_percent(live, dead)?;
                if pct <= Self::MAX_DEAD_PCT {
                    return None;
                }
                Some(Advice {
                    rule_id: self.id(),
                    severity: Severity::Warning,
                    subject: qualified(r, "table_name"),
                    message: format!(
                        "{:.2}% dead tuples, run VACUUM or tune autovacuum for this table",
                        pct
                    ),
                })
            })
            .collect()
    }
}

pub struct UnusedIndexRule;

impl AdviceRule for UnusedIndexRule {
    fn id(&self) -> &'static str {
        "unused_index"
    }

    fn evaluate(&self, input: &ReportInput) -> Vec<Advice> {
        rows(input, INDEX_USAGE)
            .iter()
            .filter(|r| r.i64("idx_scan") == Some(0))
            .filter_map(|r| {
                let bytes = r.i64("index_bytes")?;
                if bytes < MIB {
                    return None;
                }
                Some(Advice {
                    rule_id: self.id(),
                    severity: Severity::Info,
                    subject: qualified(r, "index_name"),
                    message: format!(
                        "never scanned, dropping it saves {} and write overhead",
                        format_bytes(bytes)
                    ),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::catalog;
    use crate::collector::{MockSource, collect_from};
    use crate::model::{MetricDataset, Value};
    use crate::report::{Block, ReportOptions, SectionKind, build_report};
    use chrono::{DateTime, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn advice_for(source: MockSource, ids: &[&str]) -> Vec<Advice> {
        let mut source = source;
        let datasets: Vec<MetricDataset> =
            collect_from(&mut source, &catalog::select(ids), now()).0;
        let input = ReportInput::new(now(), &datasets).unwrap();
        evaluate(&input)
    }

    fn statement(queryid: i64, query: &str, calls: i64) -> Vec<Value> {
        vec![
            Value::Integer(queryid),
            Value::Text(query.into()),
            Value::Integer(calls),
            Value::Float(1.0),
            Value::Float(1.0),
            Value::Float(1.0),
            Value::Float(1.0),
            Value::Integer(1),
            Value::Integer(1),
            Value::Integer(0),
        ]
    }

    fn statements(rows: Vec<Vec<Value>>) -> MockSource {
        MockSource::new()
            .with_extension("pg_stat_statements")
            .with_rows(TOP_STATEMENTS, rows)
    }

    fn ids(advice: &[Advice]) -> Vec<&str> {
        advice.iter().map(|a| a.rule_id).collect()
    }

    #[test]
    fn typical_server_findings_ordered_by_severity() {
        let all: Vec<_> = catalog::builtin().iter().map(|q| q.id).collect();
        let advice = advice_for(MockSource::typical(now()), &all);
        assert_eq!(
            ids(&advice),
            vec![
                "dead_tuples_high",
                "long_running_query",
                "waiting_locks",
                "order_by_without_limit",
                "select_star",
                "unused_index",
            ]
        );
        assert_eq!(advice[0].subject, "public.orders");
        assert_eq!(advice[1].subject, "pid 4243");
    }

    #[test]
    fn statement_patterns() {
        let advice = advice_for(
            statements(vec![
                statement(1, "select *\n  from t", 1),
                statement(2, "SELECT id FROM t WHERE name LIKE '%son'", 1),
                statement(3, "SELECT id FROM t ORDER BY id", 11),
                statement(4, "SELECT id FROM t ORDER BY id", 10),
                statement(5, "SELECT id FROM t ORDER BY id LIMIT 5", 500),
            ]),
            &[TOP_STATEMENTS],
        );
        let found: Vec<_> = advice.iter().map(|a| (a.rule_id, a.subject.as_str())).collect();
        assert_eq!(
            found,
            vec![
                ("leading_wildcard_like", "queryid 2"),
                ("order_by_without_limit", "queryid 3"),
                ("select_star", "queryid 1"),
            ]
        );
    }

    #[test]
    fn low_cache_ratio_severity() {
        let cache = |hits, reads| {
            MockSource::new().with_rows(
                CACHE_HIT_RATIO,
                vec![vec![
                    Value::Text("app".into()),
                    Value::Integer(hits),
                    Value::Integer(reads),
                    Value::Null,
                ]],
            )
        };
        assert!(advice_for(cache(95, 5), &[CACHE_HIT_RATIO]).is_empty());
        assert_eq!(advice_for(cache(85, 15), &[CACHE_HIT_RATIO])[0].severity, Severity::Warning);
        assert_eq!(advice_for(cache(50, 50), &[CACHE_HIT_RATIO])[0].severity, Severity::Critical);
        assert!(advice_for(cache(0, 0), &[CACHE_HIT_RATIO]).is_empty());
    }

    #[test]
    fn small_tables_are_not_flagged() {
        let table = |live, dead| {
            vec![
                Value::Text("public".into()),
                Value::Text(format!("t{}", live)),
                Value::Integer(live),
                Value::Integer(dead),
                Value::Integer(0),
                Value::Integer(0),
                Value::Integer(0),
                Value::Null,
            ]
        };
        let source = MockSource::new().with_rows(TABLE_BLOAT, vec![table(500, 400), table(700, 300)]);
        let advice = advice_for(source, &[TABLE_BLOAT]);
        assert_eq!(ids(&advice), vec!["dead_tuples_high"]);
        assert_eq!(advice[0].subject, "public.t700");

        let huge = MockSource::new().with_rows(TABLE_BLOAT, vec![table(i64::MAX, i64::MAX)]);
        let advice = advice_for(huge, &[TABLE_BLOAT]);
        assert_eq!(ids(&advice), vec!["dead_tuples_high"]);
    }

    #[test]
    fn advice_is_capped() {
        let rows = (0..30).map(|i| statement(i, "SELECT * FROM t", 1)).collect();
        let advice = advice_for(statements(rows), &[TOP_STATEMENTS]);
        assert_eq!(advice.len(), MAX_ADVICE);
    }

    #[test]
    fn no_data_means_no_recommendations() {
        let report = build_report(now(), &[], &ReportOptions::default()).unwrap();
        assert_eq!(
            report.section(SectionKind::Recommendations).unwrap().blocks,
            vec![Block::Prose("No recommendations.".into())]
        );
    }
}
