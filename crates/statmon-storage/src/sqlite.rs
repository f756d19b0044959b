use crate::error::{Result, StorageError};
use crate::{AggregateState, MetricStore};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction};
use statmon_common::id::next_id;
use statmon_common::types::{CounterSet, GaugeSet, MetricKind, MetricValue};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gauges (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    value REAL NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS counters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    value INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const UPSERT_GAUGE: &str = "INSERT INTO gauges (id, name, value, updated_at) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

const UPSERT_COUNTER: &str = "INSERT INTO counters (id, name, value, updated_at) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (name) DO UPDATE SET value = counters.value + excluded.value, updated_at = excluded.updated_at";

/// Relational backing on SQLite.
///
/// Every write is an `INSERT .. ON CONFLICT (name) DO UPDATE` carrying a
/// fresh Snowflake row id; the id is discarded when the row already exists.
/// SQLite silently promotes an overflowing integer sum to REAL, so counter
/// writes read the current total first and reject an overflow before the
/// upsert runs.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Maps a DSN to a database path. Accepts a bare path, `sqlite://path`, or
/// `:memory:` / `sqlite::memory:`.
fn dsn_path(dsn: &str) -> Option<&str> {
    let dsn = dsn.trim();
    if dsn == ":memory:" || dsn == "sqlite::memory:" {
        return None;
    }
    Some(
        dsn.strip_prefix("sqlite://")
            .or_else(|| dsn.strip_prefix("sqlite:"))
            .unwrap_or(dsn),
    )
}

impl SqliteStore {
    pub fn open(dsn: &str) -> Result<Self> {
        let conn = match dsn_path(dsn) {
            None => Connection::open_in_memory()?,
            Some(path) => {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            StorageError::Other(format!("cannot create {}: {e}", parent.display()))
                        })?;
                    }
                }
                Connection::open(path)?
            }
        };
        conn.execute_batch(SCHEMA)?;
        tracing::info!(dsn = %dsn, "SQLite metric store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn upsert_gauge(tx: &Transaction<'_>, name: &str, value: f64, now: i64) -> Result<()> {
    tx.prepare_cached(UPSERT_GAUGE)?
        .execute(rusqlite::params![next_id(), name, value, now])?;
    Ok(())
}

fn upsert_counter(tx: &Transaction<'_>, name: &str, delta: i64, now: i64) -> Result<()> {
    let current: Option<i64> = tx
        .prepare_cached("SELECT value FROM counters WHERE name = ?1")?
        .query_row([name], |row| row.get(0))
        .optional()?;
    if current.unwrap_or(0).checked_add(delta).is_none() {
        return Err(StorageError::CounterOverflow {
            name: name.to_string(),
        });
    }
    tx.prepare_cached(UPSERT_COUNTER)?
        .execute(rusqlite::params![next_id(), name, delta, now])?;
    Ok(())
}

impl MetricStore for SqliteStore {
    fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        upsert_gauge(&tx, name, value, Utc::now().timestamp_millis())?;
        tx.commit()?;
        Ok(())
    }

    fn update_counter(&self, name: &str, delta: i64) -> Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        upsert_counter(&tx, name, delta, Utc::now().timestamp_millis())?;
        tx.commit()?;
        Ok(())
    }

    fn update_all(&self, gauges: &GaugeSet, counters: &CounterSet) -> Result<()> {
        let conn = self.lock();
        let now = Utc::now().timestamp_millis();
        // Dropping the transaction on any error rolls the whole batch back.
        let tx = conn.unchecked_transaction()?;
        for (name, value) in gauges {
            upsert_gauge(&tx, name, *value, now)?;
        }
        for (name, delta) in counters {
            upsert_counter(&tx, name, *delta, now)?;
        }
        tx.commit()?;
        tracing::debug!(
            gauges = gauges.len(),
            counters = counters.len(),
            "Committed metric batch"
        );
        Ok(())
    }

    fn get(&self, kind: MetricKind, name: &str) -> Result<Option<MetricValue>> {
        let conn = self.lock();
        let value = match kind {
            MetricKind::Gauge => conn
                .prepare_cached("SELECT value FROM gauges WHERE name = ?1")?
                .query_row([name], |row| row.get::<_, f64>(0))
                .optional()?
                .map(MetricValue::Gauge),
            MetricKind::Counter => conn
                .prepare_cached("SELECT value FROM counters WHERE name = ?1")?
                .query_row([name], |row| row.get::<_, i64>(0))
                .optional()?
                .map(MetricValue::Counter),
        };
        Ok(value)
    }

    fn get_all(&self) -> Result<AggregateState> {
        let conn = self.lock();
        let mut state = AggregateState::default();
        {
            let mut stmt = conn.prepare_cached("SELECT name, value FROM gauges ORDER BY name")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;
            for row in rows {
                let (name, value) = row?;
                state.gauges.insert(name, value);
            }
        }
        {
            let mut stmt = conn.prepare_cached("SELECT name, value FROM counters ORDER BY name")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (name, value) = row?;
                state.counters.insert(name, value);
            }
        }
        Ok(state)
    }

    fn ping(&self) -> Result<()> {
        self.lock().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsn_forms() {
        assert_eq!(dsn_path(":memory:"), None);
        assert_eq!(dsn_path("sqlite::memory:"), None);
        assert_eq!(dsn_path("sqlite:///var/lib/m.db"), Some("/var/lib/m.db"));
        assert_eq!(dsn_path("data/metrics.db"), Some("data/metrics.db"));
    }

    #[test]
    fn test_row_id_kept_on_conflict() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.update_counter("c", 1).unwrap();
        let first: String = store
            .lock()
            .query_row("SELECT id FROM counters WHERE name = 'c'", [], |r| r.get(0))
            .unwrap();
        store.update_counter("c", 1).unwrap();
        let second: String = store
            .lock()
            .query_row("SELECT id FROM counters WHERE name = 'c'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(first, second);
        let rows: i64 = store
            .lock()
            .query_row("SELECT COUNT(*) FROM counters", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
