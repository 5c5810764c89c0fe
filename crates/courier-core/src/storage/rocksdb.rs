use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded, Options, WriteBatch};

use crate::error::{StorageError, StorageResult};
use crate::job::Job;
use crate::storage::traits::{Storage, WriteBatchOp};

const CF_JOBS: &str = "jobs";
const CF_PENDING: &str = "pending";
const CF_IN_FLIGHT: &str = "in_flight";

/// All column family names (excluding `default`, which RocksDB creates
/// automatically).
const COLUMN_FAMILIES: &[&str] = &[CF_JOBS, CF_PENDING, CF_IN_FLIGHT];

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
///
/// Job records live in `jobs`; `pending` and `in_flight` are index
/// CFs whose keys encode dispatch order and claim age (see `keys`).
pub struct RocksDbStorage {
    db: DB,
}

impl RocksDbStorage {
    /// Open or create a RocksDB database at the given path with all
    /// column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> StorageResult<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }
}

impl Storage for RocksDbStorage {
    fn put_job(&self, key: &[u8], job: &Job) -> StorageResult<()> {
        let cf = self.cf(CF_JOBS)?;
        let value = serde_json::to_vec(job)?;
        self.db.put_cf(&cf, key, &value)?;
        Ok(())
    }

    fn get_job(&self, key: &[u8]) -> StorageResult<Option<Job>> {
        let cf = self.cf(CF_JOBS)?;
        match self.db.get_cf(&cf, key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_jobs(&self) -> StorageResult<Vec<Job>> {
        let cf = self.cf(CF_JOBS)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        let mut results = Vec::new();
        for item in iter {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            results.push(job);
        }
        Ok(results)
    }

    fn first_pending(&self) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf(CF_PENDING)?;
        let mut iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(key.to_vec()))
            }
            None => Ok(None),
        }
    }

    fn list_in_flight(&self, up_to_key: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        let cf = self.cf(CF_IN_FLIGHT)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        let mut results = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if key.as_ref() > up_to_key {
                break;
            }
            results.push(key.to_vec());
        }
        Ok(results)
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        let mut batch = WriteBatch::default();

        for op in ops {
            match op {
                WriteBatchOp::PutJob { key, value } => {
                    batch.put_cf(&self.cf(CF_JOBS)?, &key, &value);
                }
                WriteBatchOp::DeleteJob { key } => {
                    batch.delete_cf(&self.cf(CF_JOBS)?, &key);
                }
                WriteBatchOp::PutPending { key } => {
                    batch.put_cf(&self.cf(CF_PENDING)?, &key, b"");
                }
                WriteBatchOp::DeletePending { key } => {
                    batch.delete_cf(&self.cf(CF_PENDING)?, &key);
                }
                WriteBatchOp::PutInFlight { key } => {
                    batch.put_cf(&self.cf(CF_IN_FLIGHT)?, &key, b"");
                }
                WriteBatchOp::DeleteInFlight { key } => {
                    batch.delete_cf(&self.cf(CF_IN_FLIGHT)?, &key);
                }
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush_wal(true)?;
        Ok(())
    }
}
