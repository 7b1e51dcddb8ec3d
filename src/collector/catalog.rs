//! Built-in diagnostic queries.
//!
//! Every query is read-only. Timestamps are selected as epoch microseconds
//! (`bigint`) and sizes/counters as `bigint`, so decoding needs no driver
//! type extensions. Column names and order are fixed per query id: raw-data
//! files from different runs stay comparable.

use crate::model::ColumnDef;
use crate::model::ColumnType::{Boolean, Float, Integer, Text, Timestamp};

/// Bumped whenever a query's column schema changes.
pub const CATALOG_VERSION: u32 = 1;

/// Servers below this `server_version_num` use the pre-13 pg_stat_statements columns.
const PG13: i32 = 130000;

/// A named, versioned read-only statistics query and its expected schema.
#[derive(Debug, PartialEq, Eq)]
pub struct QueryDefinition {
    pub id: &'static str,
    pub description: &'static str,
    pub sql: &'static str,
    /// Variant for servers older than PostgreSQL 13.
    pub legacy_sql: Option<&'static str>,
    /// Extension that must be installed for the query to run.
    pub requires_extension: Option<&'static str>,
    pub columns: &'static [ColumnDef],
}

impl QueryDefinition {
    /// SQL text suited to the given `server_version_num`.
    ///
    /// An unknown version gets the current text.
    pub fn sql_for(&self, server_version: Option<i32>) -> &'static str {
        match (self.legacy_sql, server_version) {
            (Some(legacy), Some(v)) if v < PG13 => legacy,
            _ => self.sql,
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}

pub const SERVER_INFO: &str = "server_info";
pub const CONNECTION_COUNTS: &str = "connection_counts";
pub const ACTIVE_QUERIES: &str = "active_queries";
pub const TOP_STATEMENTS: &str = "top_statements";
pub const CACHE_HIT_RATIO: &str = "cache_hit_ratio";
pub const TABLE_BLOAT: &str = "table_bloat";
pub const INDEX_USAGE: &str = "index_usage";
pub const LOCK_INFO: &str = "lock_info";
pub const BGWRITER_STATS: &str = "bgwriter_stats";

const SERVER_INFO_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("version", Text),
    ColumnDef::new("database", Text),
    ColumnDef::new("server_version_num", Integer),
    ColumnDef::new("started_at", Timestamp),
];

const CONNECTION_COUNTS_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("state", Text),
    ColumnDef::new("connections", Integer),
];

const ACTIVE_QUERIES_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("pid", Integer),
    ColumnDef::new("datname", Text),
    ColumnDef::new("usename", Text),
    ColumnDef::new("application_name", Text),
    ColumnDef::new("client_addr", Text),
    ColumnDef::new("state", Text),
    ColumnDef::new("query", Text),
    ColumnDef::new("backend_start", Timestamp),
    ColumnDef::new("query_start", Timestamp),
    ColumnDef::new("state_change", Timestamp),
];

const TOP_STATEMENTS_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("queryid", Integer),
    ColumnDef::new("query", Text),
    ColumnDef::new("calls", Integer),
    ColumnDef::new("total_exec_time", Float),
    ColumnDef::new("mean_exec_time", Float),
    ColumnDef::new("min_exec_time", Float),
    ColumnDef::new("max_exec_time", Float),
    ColumnDef::new("rows", Integer),
    ColumnDef::new("shared_blks_hit", Integer),
    ColumnDef::new("shared_blks_read", Integer),
];

const CACHE_HIT_RATIO_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("datname", Text),
    ColumnDef::new("blks_hit", Integer),
    ColumnDef::new("blks_read", Integer),
    ColumnDef::new("database_bytes", Integer),
];

const TABLE_BLOAT_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("schema_name", Text),
    ColumnDef::new("table_name", Text),
    ColumnDef::new("n_live_tup", Integer),
    ColumnDef::new("n_dead_tup", Integer),
    ColumnDef::new("table_bytes", Integer),
    ColumnDef::new("indexes_bytes", Integer),
    ColumnDef::new("total_bytes", Integer),
    ColumnDef::new("last_vacuum", Timestamp),
];

const INDEX_USAGE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("schema_name", Text),
    ColumnDef::new("table_name", Text),
    ColumnDef::new("index_name", Text),
    ColumnDef::new("idx_scan", Integer),
    ColumnDef::new("index_bytes", Integer),
];

const LOCK_INFO_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("pid", Integer),
    ColumnDef::new("mode", Text),
    ColumnDef::new("granted", Boolean),
    ColumnDef::new("relation", Text),
    ColumnDef::new("query_start", Timestamp),
    ColumnDef::new("query", Text),
];

const BGWRITER_STATS_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("buffers_clean", Integer),
    ColumnDef::new("maxwritten_clean", Integer),
    ColumnDef::new("buffers_alloc", Integer),
    ColumnDef::new("stats_reset", Timestamp),
];

static BUILTIN: [QueryDefinition; 9] = [
    QueryDefinition {
        id: SERVER_INFO,
        description: "server version, current database and start time",
        sql: r#"
            SELECT
                version() AS version,
                current_database()::text AS database,
                current_setting('server_version_num')::bigint AS server_version_num,
                (EXTRACT(EPOCH FROM pg_postmaster_start_time()) * 1000000)::bigint AS started_at
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: SERVER_INFO_COLUMNS,
    },
    QueryDefinition {
        id: CONNECTION_COUNTS,
        description: "client connections per state",
        sql: r#"
            SELECT
                COALESCE(state, 'unknown') AS state,
                count(*)::bigint AS connections
            FROM pg_stat_activity
            WHERE pid <> pg_backend_pid()
              AND backend_type = 'client backend'
            GROUP BY 1
            ORDER BY 1
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: CONNECTION_COUNTS_COLUMNS,
    },
    QueryDefinition {
        id: ACTIVE_QUERIES,
        description: "client sessions and their current statements",
        sql: r#"
            SELECT
                pid::bigint AS pid,
                datname::text AS datname,
                usename::text AS usename,
                application_name AS application_name,
                client_addr::text AS client_addr,
                state AS state,
                query AS query,
                (EXTRACT(EPOCH FROM backend_start) * 1000000)::bigint AS backend_start,
                (EXTRACT(EPOCH FROM query_start) * 1000000)::bigint AS query_start,
                (EXTRACT(EPOCH FROM state_change) * 1000000)::bigint AS state_change
            FROM pg_stat_activity
            WHERE pid <> pg_backend_pid()
              AND backend_type = 'client backend'
            ORDER BY query_start NULLS LAST, pid
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: ACTIVE_QUERIES_COLUMNS,
    },
    QueryDefinition {
        id: TOP_STATEMENTS,
        description: "top statements by total execution time",
        sql: r#"
            SELECT
                s.queryid AS queryid,
                COALESCE(s.query, '') AS query,
                s.calls AS calls,
                s.total_exec_time::double precision AS total_exec_time,
                s.mean_exec_time::double precision AS mean_exec_time,
                s.min_exec_time::double precision AS min_exec_time,
                s.max_exec_time::double precision AS max_exec_time,
                s.rows AS rows,
                s.shared_blks_hit AS shared_blks_hit,
                s.shared_blks_read AS shared_blks_read
            FROM pg_stat_statements s
            ORDER BY s.total_exec_time DESC
            LIMIT 100
        "#,
        legacy_sql: Some(
            r#"
            SELECT
                s.queryid AS queryid,
                COALESCE(s.query, '') AS query,
                s.calls AS calls,
                s.total_time::double precision AS total_exec_time,
                s.mean_time::double precision AS mean_exec_time,
                s.min_time::double precision AS min_exec_time,
                s.max_time::double precision AS max_exec_time,
                s.rows AS rows,
                s.shared_blks_hit AS shared_blks_hit,
                s.shared_blks_read AS shared_blks_read
            FROM pg_stat_statements s
            ORDER BY s.total_time DESC
            LIMIT 100
        "#,
        ),
        requires_extension: Some("pg_stat_statements"),
        columns: TOP_STATEMENTS_COLUMNS,
    },
    QueryDefinition {
        id: CACHE_HIT_RATIO,
        description: "buffer cache hits and reads of the current database",
        sql: r#"
            SELECT
                datname::text AS datname,
                blks_hit AS blks_hit,
                blks_read AS blks_read,
                pg_database_size(datname) AS database_bytes
            FROM pg_stat_database
            WHERE datname = current_database()
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: CACHE_HIT_RATIO_COLUMNS,
    },
    QueryDefinition {
        id: TABLE_BLOAT,
        description: "table sizes and dead tuples",
        sql: r#"
            SELECT
                schemaname::text AS schema_name,
                relname::text AS table_name,
                n_live_tup AS n_live_tup,
                n_dead_tup AS n_dead_tup,
                pg_relation_size(relid) AS table_bytes,
                pg_indexes_size(relid) AS indexes_bytes,
                pg_total_relation_size(relid) AS total_bytes,
                (EXTRACT(EPOCH FROM GREATEST(last_vacuum, last_autovacuum)) * 1000000)::bigint AS last_vacuum
            FROM pg_stat_user_tables
            ORDER BY pg_total_relation_size(relid) DESC, schemaname, relname
            LIMIT 100
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: TABLE_BLOAT_COLUMNS,
    },
    QueryDefinition {
        id: INDEX_USAGE,
        description: "index sizes and scan counts",
        sql: r#"
            SELECT
                schemaname::text AS schema_name,
                relname::text AS table_name,
                indexrelname::text AS index_name,
                idx_scan AS idx_scan,
                pg_relation_size(indexrelid) AS index_bytes
            FROM pg_stat_user_indexes
            ORDER BY pg_relation_size(indexrelid) DESC, schemaname, indexrelname
            LIMIT 100
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: INDEX_USAGE_COLUMNS,
    },
    QueryDefinition {
        id: LOCK_INFO,
        description: "held and awaited locks",
        sql: r#"
            SELECT
                l.pid::bigint AS pid,
                l.mode AS mode,
                l.granted AS granted,
                c.relname::text AS relation,
                (EXTRACT(EPOCH FROM a.query_start) * 1000000)::bigint AS query_start,
                a.query AS query
            FROM pg_locks l
            JOIN pg_stat_activity a ON a.pid = l.pid
            LEFT JOIN pg_class c ON c.oid = l.relation
            WHERE l.pid <> pg_backend_pid()
            ORDER BY l.granted, l.pid
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: LOCK_INFO_COLUMNS,
    },
    QueryDefinition {
        id: BGWRITER_STATS,
        description: "background writer buffer activity",
        sql: r#"
            SELECT
                buffers_clean AS buffers_clean,
                maxwritten_clean AS maxwritten_clean,
                buffers_alloc AS buffers_alloc,
                (EXTRACT(EPOCH FROM stats_reset) * 1000000)::bigint AS stats_reset
            FROM pg_stat_bgwriter
        "#,
        legacy_sql: None,
        requires_extension: None,
        columns: BGWRITER_STATS_COLUMNS,
    },
];

/// All built-in queries in their fixed catalog order.
pub fn builtin() -> &'static [QueryDefinition] {
    &BUILTIN
}

pub fn find(id: &str) -> Option<&'static QueryDefinition> {
    BUILTIN.iter().find(|q| q.id == id)
}

/// Definitions for the given ids, in catalog order. Unknown ids are ignored.
pub fn select(ids: &[&str]) -> Vec<&'static QueryDefinition> {
    BUILTIN.iter().filter(|q| ids.contains(&q.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<_> = builtin().iter().map(|q| q.id).collect();
        assert_eq!(ids.len(), builtin().len());
    }

    #[test]
    fn every_column_is_aliased_in_sql() {
        for q in builtin() {
            for sql in std::iter::once(q.sql).chain(q.legacy_sql) {
                for col in q.columns {
                    assert!(
                        sql.contains(&format!("AS {}", col.name)),
                        "{}: column {} has no alias",
                        q.id,
                        col.name
                    );
                }
            }
        }
    }

    #[test]
    fn queries_are_read_only() {
        for q in builtin() {
            let upper = q.sql.to_uppercase();
            for verb in ["INSERT ", "UPDATE ", "DELETE ", "DROP ", "TRUNCATE ", "ALTER "] {
                assert!(!upper.contains(verb), "{} contains {}", q.id, verb);
            }
        }
    }

    #[test]
    fn legacy_text_only_for_old_servers() {
        let q = find(TOP_STATEMENTS).unwrap();
        assert!(q.sql_for(Some(120011)).contains("s.total_time"));
        assert!(q.sql_for(Some(160002)).contains("s.total_exec_time"));
        assert!(q.sql_for(None).contains("s.total_exec_time"));

        let activity = find(ACTIVE_QUERIES).unwrap();
        assert_eq!(activity.sql_for(Some(110000)), activity.sql);
    }

    #[test]
    fn select_keeps_catalog_order() {
        let picked = select(&[CACHE_HIT_RATIO, SERVER_INFO, "nope"]);
        let ids: Vec<_> = picked.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![SERVER_INFO, CACHE_HIT_RATIO]);
    }
}
