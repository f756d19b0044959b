use std::path::PathBuf;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use statmon_storage::error::StorageError;
///
/// let err = StorageError::CounterOverflow {
///     name: "PollCount".to_string(),
/// };
/// assert!(err.to_string().contains("PollCount"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Adding a delta would overflow the stored 64-bit counter. Nothing was
    /// applied.
    #[error("Storage: counter '{name}' would overflow")]
    CounterOverflow { name: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization failure while writing a snapshot.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing the snapshot file failed. The previous snapshot, if any, is
    /// left in place.
    #[error("Storage: snapshot write to {path} failed: {source}")]
    Snapshot {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
