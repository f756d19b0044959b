use crate::error::Result;
use crate::memory::MemoryStore;
use crate::snapshot::SnapshotStore;
use crate::sqlite::SqliteStore;
use crate::MetricStore;
use std::path::Path;
use std::sync::Arc;

/// How aggregate state survives a restart, chosen once at startup.
pub enum Durability {
    /// In-memory maps plus a periodic snapshot file. `snapshot` is `None`
    /// when no store file is configured, in which case state is volatile.
    MemorySnapshot {
        store: Arc<MemoryStore>,
        snapshot: Option<SnapshotStore>,
    },
    /// The database is the durable store; no snapshot file is written.
    DatabaseBacked { store: Arc<SqliteStore> },
}

impl Durability {
    /// A database DSN, when present, selects the database backing.
    pub fn open(database_dsn: Option<&str>, store_file: Option<&Path>) -> Result<Self> {
        match database_dsn.filter(|d| !d.trim().is_empty()) {
            Some(dsn) => Ok(Durability::DatabaseBacked {
                store: Arc::new(SqliteStore::open(dsn)?),
            }),
            None => Ok(Durability::MemorySnapshot {
                store: Arc::new(MemoryStore::new()),
                snapshot: store_file.map(SnapshotStore::new),
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn MetricStore> {
        match self {
            Durability::MemorySnapshot { store, .. } => store.clone(),
            Durability::DatabaseBacked { store } => store.clone(),
        }
    }

    /// Replays the snapshot into the store. Must run once, before the store
    /// takes live traffic. Returns the number of records applied.
    pub fn restore(&self) -> Result<usize> {
        let Durability::MemorySnapshot {
            store,
            snapshot: Some(snapshot),
        } = self
        else {
            return Ok(0);
        };
        let records = snapshot.restore();
        for record in &records {
            store.apply(record)?;
        }
        tracing::info!(
            path = %snapshot.path().display(),
            records = records.len(),
            "Restored metrics from snapshot"
        );
        Ok(records.len())
    }

    /// Writes a snapshot if this backing uses one. `Ok(None)` means there
    /// was nothing to do.
    pub fn persist(&self) -> Result<Option<usize>> {
        match self {
            Durability::MemorySnapshot {
                store,
                snapshot: Some(snapshot),
            } => snapshot.save(&store.get_all()?).map(Some),
            _ => Ok(None),
        }
    }

    /// Whether periodic persistence has any work to do.
    pub fn has_snapshot(&self) -> bool {
        matches!(
            self,
            Durability::MemorySnapshot {
                snapshot: Some(_),
                ..
            }
        )
    }
}
