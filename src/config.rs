//! Run configuration.
//!
//! Settings come from an optional TOML file and the standard libpq
//! environment variables (`PGHOST`, `PGPORT`, `PGDATABASE`, `PGUSER`,
//! `PGPASSWORD`), which take precedence over the file. The resulting
//! [`Settings`] value is built once at startup and passed by reference.
//!
//! ```toml
//! [postgresql]
//! host = "db.internal"
//! port = 5432
//! database = "app"
//! user = "monitor"
//! password = "secret"
//!
//! [collection]
//! metrics = ["top_statements", "cache_hit_ratio"]
//! raw_dir = "data/raw"
//! report_dir = "reports"
//! top_n = 10
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::collector::catalog;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_APPLICATION_NAME: &str = "pgprofile";
const DEFAULT_RAW_DIR: &str = "data/raw";
const DEFAULT_REPORT_DIR: &str = "reports";
const DEFAULT_TOP_N: usize = 10;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// The settings file could not be read.
    Io { path: PathBuf, source: std::io::Error },
    /// The settings file is not valid TOML or has wrongly typed values.
    Parse { path: PathBuf, message: String },
    /// A required option has no value in either the file or the environment.
    Missing(&'static str),
    /// An option has a value that cannot be used.
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, message } => {
                write!(f, "invalid config {}: {}", path.display(), message)
            }
            ConfigError::Missing(field) => write!(f, "missing required option '{}'", field),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Where and as whom to connect. Immutable for the duration of a run.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub application_name: String,
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// What to collect and where the artifacts go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSettings {
    /// Ids of the enabled diagnostic queries, in catalog order.
    pub metrics: Vec<&'static str>,
    pub raw_dir: PathBuf,
    pub report_dir: PathBuf,
    /// Number of statements listed in the top queries section.
    pub top_n: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub connection: ConnectionProfile,
    pub collection: CollectionSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    postgresql: FilePostgres,
    #[serde(default)]
    collection: FileCollection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilePostgres {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    connect_timeout_secs: Option<u64>,
    application_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileCollection {
    metrics: Option<Vec<String>>,
    raw_dir: Option<PathBuf>,
    report_dir: Option<PathBuf>,
    top_n: Option<usize>,
}

impl Settings {
    /// Loads settings from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Some((path, content))
            }
            None => None,
        };
        Self::from_sources(
            file.as_ref().map(|(p, c)| (*p, c.as_str())),
            |name| std::env::var(name).ok(),
        )
    }

    /// Builds settings from file content and an environment lookup.
    ///
    /// Environment values override file values for the connection options.
    pub fn from_sources<F>(file: Option<(&Path, &str)>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed: FileConfig = match file {
            Some((path, content)) => toml::from_str(content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.message().to_string(),
            })?,
            None => FileConfig::default(),
        };
        let lookup = |name: &str| env(name).filter(|v| !v.is_empty());

        let pg = parsed.postgresql;
        let host = lookup("PGHOST")
            .or(pg.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match lookup("PGPORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                field: "port",
                reason: format!("'{}': {}", raw, e),
            })?,
            None => pg.port.unwrap_or(DEFAULT_PORT),
        };
        if port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        let user = lookup("PGUSER")
            .or(pg.user)
            .ok_or(ConfigError::Missing("user"))?;
        let database = lookup("PGDATABASE")
            .or(pg.database)
            .ok_or(ConfigError::Missing("database"))?;
        let password = lookup("PGPASSWORD").or(pg.password);

        let connection = ConnectionProfile {
            host,
            port,
            database,
            user,
            password,
            connect_timeout: Duration::from_secs(
                pg.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            application_name: pg
                .application_name
                .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_string()),
        };

        let coll = parsed.collection;
        let metrics = match coll.metrics {
            Some(ids) => resolve_metrics(&ids)?,
            None => catalog::builtin().iter().map(|q| q.id).collect(),
        };
        let top_n = coll.top_n.unwrap_or(DEFAULT_TOP_N);
        if top_n == 0 {
            return Err(ConfigError::Invalid {
                field: "top_n",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            connection,
            collection: CollectionSettings {
                metrics,
                raw_dir: coll
                    .raw_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RAW_DIR)),
                report_dir: coll
                    .report_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR)),
                top_n,
            },
        })
    }
}

/// Maps configured metric ids onto catalog ids, keeping catalog order and
/// dropping duplicates.
fn resolve_metrics(ids: &[String]) -> Result<Vec<&'static str>, ConfigError> {
    if ids.is_empty() {
        return Err(ConfigError::Invalid {
            field: "metrics",
            reason: "at least one metric must be enabled".to_string(),
        });
    }
    for id in ids {
        if catalog::find(id.trim()).is_none() {
            return Err(ConfigError::Invalid {
                field: "metrics",
                reason: format!("unknown metric '{}'", id),
            });
        }
    }
    Ok(catalog::builtin()
        .iter()
        .map(|q| q.id)
        .filter(|known| ids.iter().any(|id| id.trim() == *known))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const FILE: &str = r#"
        [postgresql]
        host = "db.internal"
        port = 6432
        database = "app"
        user = "monitor"
        password = "s3cret"

        [collection]
        metrics = ["cache_hit_ratio", "top_statements"]
        raw_dir = "/var/lib/pgprofile/raw"
        top_n = 5
    "#;

    #[test]
    fn file_values_are_used() {
        let s = Settings::from_sources(Some((Path::new("pg.toml"), FILE)), env_from(&[])).unwrap();
        assert_eq!(s.connection.host, "db.internal");
        assert_eq!(s.connection.port, 6432);
        assert_eq!(s.connection.database, "app");
        assert_eq!(s.connection.password.as_deref(), Some("s3cret"));
        assert_eq!(s.collection.top_n, 5);
        assert_eq!(s.collection.raw_dir, PathBuf::from("/var/lib/pgprofile/raw"));
        assert_eq!(s.collection.report_dir, PathBuf::from(DEFAULT_REPORT_DIR));
        // Catalog order, not file order.
        assert_eq!(s.collection.metrics, vec!["top_statements", "cache_hit_ratio"]);
    }

    #[test]
    fn environment_overrides_file() {
        let env = env_from(&[("PGHOST", "10.0.0.7"), ("PGPORT", "5433"), ("PGUSER", "ops")]);
        let s = Settings::from_sources(Some((Path::new("pg.toml"), FILE)), env).unwrap();
        assert_eq!(s.connection.host, "10.0.0.7");
        assert_eq!(s.connection.port, 5433);
        assert_eq!(s.connection.user, "ops");
        assert_eq!(s.connection.database, "app");
    }

    #[test]
    fn environment_only_uses_defaults() {
        let env = env_from(&[("PGUSER", "u"), ("PGDATABASE", "d")]);
        let s = Settings::from_sources(None, env).unwrap();
        assert_eq!(s.connection.host, DEFAULT_HOST);
        assert_eq!(s.connection.port, DEFAULT_PORT);
        assert_eq!(s.connection.password, None);
        assert_eq!(s.collection.metrics.len(), catalog::builtin().len());
        assert_eq!(s.collection.top_n, DEFAULT_TOP_N);
    }

    #[test]
    fn missing_user_fails_fast() {
        let env = env_from(&[("PGDATABASE", "d")]);
        let err = Settings::from_sources(None, env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("user")));
    }

    #[test]
    fn missing_database_fails_fast() {
        let env = env_from(&[("PGUSER", "u")]);
        let err = Settings::from_sources(None, env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("database")));
    }

    #[test]
    fn bad_port_is_invalid() {
        let env = env_from(&[("PGUSER", "u"), ("PGDATABASE", "d"), ("PGPORT", "abc")]);
        let err = Settings::from_sources(None, env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "port", .. }));
    }

    #[test]
    fn unknown_metric_is_invalid() {
        let file = r#"
            [postgresql]
            user = "u"
            database = "d"
            [collection]
            metrics = ["top_statements", "vacuum_progress"]
        "#;
        let err = Settings::from_sources(Some((Path::new("x.toml"), file)), env_from(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("vacuum_progress"));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Settings::from_sources(Some((Path::new("x.toml"), "[postgresql\n")), env_from(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn debug_output_redacts_password() {
        let s = Settings::from_sources(Some((Path::new("pg.toml"), FILE)), env_from(&[])).unwrap();
        let dbg = format!("{:?}", s);
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("<redacted>"));
    }
}
