/// Low-level storage errors (RocksDB, serialization). This is the error type
/// for the `Store` trait — storage operations can only fail with
/// infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// The backend's atomic lease routine is not registered (e.g. a script
    /// cache was cleared server-side). The engine re-registers it via
    /// [`crate::storage::Store::prepare`] and retries exactly once before
    /// surfacing anything else.
    #[error("atomic lease routine not loaded")]
    RoutineNotLoaded,
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the queue engine. Content problems (missing, corrupt,
/// exhausted messages) are resolved internally and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
