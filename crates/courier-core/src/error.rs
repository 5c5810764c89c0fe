use uuid::Uuid;

use crate::job::JobState;

/// Low-level storage errors (RocksDB, serialization, corrupt records).
/// This is the error type for the `Storage` trait — storage operations
/// can only fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),
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

/// Domain errors for the job queue. Storage failures pass through
/// transparently so callers can distinguish "the store is down" from
/// "you asked for an invalid transition".
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// An insert was attempted with an id that already exists. Always a
    /// producer bug — duplicate ids are rejected, never merged.
    #[error("duplicate job id: {0}")]
    DuplicateId(Uuid),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// A state transition was requested on a job that is not in the
    /// required state (e.g. completing a job that is not InFlight).
    #[error("invalid transition for job {id}: expected {expected}, found {found}")]
    InvalidTransition {
        id: Uuid,
        expected: JobState,
        found: JobState,
    },

    #[error("failed to spawn dispatcher worker: {0}")]
    WorkerSpawn(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
