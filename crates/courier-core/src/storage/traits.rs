use crate::error::StorageResult;
use crate::job::Job;

/// Represents a single operation in an atomic write batch.
#[derive(Debug)]
pub enum WriteBatchOp {
    PutJob { key: Vec<u8>, value: Vec<u8> },
    DeleteJob { key: Vec<u8> },
    PutPending { key: Vec<u8> },
    DeletePending { key: Vec<u8> },
    PutInFlight { key: Vec<u8> },
    DeleteInFlight { key: Vec<u8> },
}

/// Storage trait for all persistence operations. Implementations must
/// be thread-safe; state transitions that span column families go
/// through `write_batch` so they commit or fail as a unit.
pub trait Storage: Send + Sync {
    /// Store a job record in the `jobs` CF.
    fn put_job(&self, key: &[u8], job: &Job) -> StorageResult<()>;

    /// Retrieve a job record by key.
    fn get_job(&self, key: &[u8]) -> StorageResult<Option<Job>>;

    /// List every job record. Used by the audit surface; the queue hot
    /// path never calls this.
    fn list_jobs(&self) -> StorageResult<Vec<Job>>;

    /// The first key in the `pending` CF, i.e. the entry with the
    /// earliest eligibility time (FIFO on ties). `None` when no jobs
    /// are pending.
    fn first_pending(&self) -> StorageResult<Option<Vec<u8>>>;

    /// List in-flight index keys that sort at or before the given
    /// upper bound, earliest claim first.
    fn list_in_flight(&self, up_to_key: &[u8]) -> StorageResult<Vec<Vec<u8>>>;

    /// Atomically apply a batch of write operations across column families.
    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()>;

    /// Flush the write-ahead log so all acknowledged writes are durable.
    fn flush(&self) -> StorageResult<()>;
}
