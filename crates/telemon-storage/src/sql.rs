use crate::{MetricStore, Result, StorageError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use telemon_common::{Metric, MetricKind, MetricValue};

const TABLE_EXISTS_SQL: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'metrics'";

const CREATE_TABLE_SQL: &str = "CREATE TABLE metrics (
    name  TEXT NOT NULL,
    kind  TEXT NOT NULL CHECK (kind IN ('counter', 'gauge')),
    delta INTEGER,
    value REAL,
    PRIMARY KEY (name, kind)
)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Write-through store backed by a SQLite database.
pub struct SqlStorage {
    conn: Mutex<Option<Connection>>,
}

impl SqlStorage {
    /// Opens the database named by `dsn` and ensures the schema exists.
    ///
    /// Accepted forms: `sqlite://path/to/file.db`, `sqlite::memory:`,
    /// `:memory:` or a bare file path.
    pub fn open(dsn: &str) -> Result<Self> {
        let conn = match parse_dsn(dsn) {
            None => Connection::open_in_memory()?,
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let conn = Connection::open(path)?;
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                conn
            }
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if !table_exists(&conn)? {
            conn.execute_batch(CREATE_TABLE_SQL)?;
            tracing::info!("Created metrics table");
        }
        tracing::info!(dsn, "SQL metric store opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        f(conn)
    }

    fn query_one(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>> {
        self.with_conn(|conn| {
            let row = conn
                .prepare_cached("SELECT delta, value FROM metrics WHERE name = ?1 AND kind = ?2")?
                .query_row(params![name, kind.to_string()], |row| {
                    Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<f64>>(1)?))
                })
                .optional()?;
            row.map(|(delta, value)| row_to_metric(name.to_string(), kind, delta, value))
                .transpose()
        })
    }

    fn query_all(&self) -> Result<Vec<Metric>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT name, kind, delta, value FROM metrics ORDER BY kind, name")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?;

            let mut metrics = Vec::new();
            for row in rows {
                let (name, kind, delta, value) = row?;
                let kind: MetricKind = kind.parse().map_err(|_| StorageError::CorruptRow {
                    name: name.clone(),
                    reason: format!("unknown kind '{kind}'"),
                })?;
                metrics.push(row_to_metric(name, kind, delta, value)?);
            }
            Ok(metrics)
        })
    }
}

fn parse_dsn(dsn: &str) -> Option<&Path> {
    let dsn = dsn.trim();
    if matches!(dsn, "sqlite::memory:" | ":memory:" | "sqlite://:memory:") {
        return None;
    }
    let path = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn);
    Some(Path::new(path))
}

fn table_exists(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(TABLE_EXISTS_SQL, [], |row| row.get(0))?;
    Ok(count > 0)
}

fn row_to_metric(
    name: String,
    kind: MetricKind,
    delta: Option<i64>,
    value: Option<f64>,
) -> Result<Metric> {
    match (kind, delta, value) {
        (MetricKind::Counter, Some(total), _) => Ok(Metric::counter(name, total)),
        (MetricKind::Gauge, _, Some(value)) => Ok(Metric::gauge(name, value)),
        _ => Err(StorageError::CorruptRow {
            name,
            reason: format!("{kind} row has no stored value"),
        }),
    }
}

/// Merges one metric inside the caller's transaction and returns the
/// stored result.
fn upsert(conn: &Connection, metric: &Metric) -> Result<Metric> {
    match metric.value {
        MetricValue::Counter(delta) => {
            let current: Option<i64> = conn
                .prepare_cached("SELECT delta FROM metrics WHERE name = ?1 AND kind = 'counter'")?
                .query_row(params![metric.name], |row| row.get::<_, Option<i64>>(0))
                .optional()?
                .flatten();
            // Matches the in-memory store; SQLite arithmetic would turn an
            // overflow into a REAL.
            let total = current.unwrap_or(0).wrapping_add(delta);
            conn.prepare_cached(
                "INSERT INTO metrics (name, kind, delta, value) VALUES (?1, 'counter', ?2, NULL)
                 ON CONFLICT (name, kind) DO UPDATE SET delta = excluded.delta",
            )?
            .execute(params![metric.name, total])?;
            Ok(Metric::counter(metric.name.clone(), total))
        }
        MetricValue::Gauge(value) => {
            conn.prepare_cached(
                "INSERT INTO metrics (name, kind, delta, value) VALUES (?1, 'gauge', NULL, ?2)
                 ON CONFLICT (name, kind) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![metric.name, value])?;
            Ok(metric.clone())
        }
    }
}

impl MetricStore for SqlStorage {
    fn add(&self, metric: Metric) -> Result<Metric> {
        metric.validate()?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let merged = upsert(&tx, &metric)?;
            tx.commit()?;
            Ok(merged)
        })
    }

    fn batch(&self, metrics: &[Metric]) -> Result<()> {
        for metric in metrics {
            metric.validate()?;
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for metric in metrics {
                upsert(&tx, metric)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn get(&self, kind: MetricKind, name: &str) -> Option<Metric> {
        match self.query_one(kind, name) {
            Ok(metric) => metric,
            Err(e) => {
                tracing::error!(error = %e, %kind, name, "Metric lookup failed");
                None
            }
        }
    }

    fn list(&self) -> Vec<Metric> {
        match self.query_all() {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!(error = %e, "Metric listing failed");
                Vec::new()
            }
        }
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.lock().take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
            tracing::info!("SQL metric store closed");
        }
        Ok(())
    }

    fn check_connection(&self) -> bool {
        let probe = self.with_conn(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(one == 1)
        });
        match probe {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(error = %e, "Database probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_forms() {
        assert_eq!(parse_dsn("sqlite::memory:"), None);
        assert_eq!(parse_dsn(":memory:"), None);
        assert_eq!(
            parse_dsn("sqlite:///var/lib/telemon/metrics.db"),
            Some(Path::new("/var/lib/telemon/metrics.db"))
        );
        assert_eq!(
            parse_dsn("sqlite://data/metrics.db"),
            Some(Path::new("data/metrics.db"))
        );
        assert_eq!(parse_dsn("metrics.db"), Some(Path::new("metrics.db")));
    }

    #[test]
    fn schema_probe_sees_created_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!table_exists(&conn).unwrap());
        conn.execute_batch(CREATE_TABLE_SQL).unwrap();
        assert!(table_exists(&conn).unwrap());
    }

    #[test]
    fn counter_row_without_delta_is_corrupt() {
        let err = row_to_metric("x".into(), MetricKind::Counter, None, Some(1.0)).unwrap_err();
        assert!(matches!(err, StorageError::CorruptRow { .. }));
    }
}
