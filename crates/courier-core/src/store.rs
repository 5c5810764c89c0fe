use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult, StorageError};
use crate::job::{Job, JobState};
use crate::storage::{keys, Storage, WriteBatchOp};

/// Aggregate job counts, one per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable job state machine over `Storage`.
///
/// Every transition commits as one atomic write batch, and all mutating
/// operations are serialized by an internal mutex, so concurrent
/// dispatchers can never claim the same job twice or observe a
/// half-applied transition. The mutex only covers storage bookkeeping —
/// the actual delivery side effect always runs outside it.
///
/// Terminal jobs (Completed, Failed) keep their record in the `jobs`
/// column family indefinitely so operators can audit outcomes.
pub struct JobStore {
    storage: Arc<dyn Storage>,
    lock: Mutex<()>,
}

impl JobStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock only means another thread panicked while
        // holding it; the guarded section never leaves storage in a
        // half-written state (single write_batch), so continue.
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self, id: &Uuid) -> QueueResult<Job> {
        self.storage
            .get_job(&keys::job_key(id))?
            .ok_or(QueueError::JobNotFound(*id))
    }

    /// The claim timestamp of an InFlight job, used to address its
    /// in-flight index entry.
    fn require_in_flight(&self, job: &Job) -> QueueResult<u64> {
        if job.state != JobState::InFlight {
            return Err(QueueError::InvalidTransition {
                id: job.id,
                expected: JobState::InFlight,
                found: job.state,
            });
        }
        job.claimed_at.ok_or_else(|| {
            StorageError::CorruptData(format!("in-flight job {} has no claim timestamp", job.id))
                .into()
        })
    }

    fn serialize(job: &Job) -> QueueResult<Vec<u8>> {
        Ok(serde_json::to_vec(job).map_err(StorageError::from)?)
    }

    /// Insert a freshly created Pending job. The job record and its
    /// pending index entry are written atomically and are durable when
    /// this returns. Rejects duplicate ids.
    pub fn insert(&self, job: &Job) -> QueueResult<()> {
        let _guard = self.guard();

        // Check-then-put is safe here: inserts are serialized by the
        // store mutex, and RocksDB put is an upsert, so the explicit
        // check is the only way to enforce id uniqueness.
        if self.storage.get_job(&keys::job_key(&job.id))?.is_some() {
            return Err(QueueError::DuplicateId(job.id));
        }

        let value = Self::serialize(job)?;
        self.storage.write_batch(vec![
            WriteBatchOp::PutJob {
                key: keys::job_key(&job.id),
                value,
            },
            WriteBatchOp::PutPending {
                key: keys::pending_key(job.next_eligible_at, job.enqueued_at, &job.id),
            },
        ])?;
        debug!(id = %job.id, "job inserted");
        Ok(())
    }

    /// Atomically claim the next dispatchable job: the Pending job with
    /// the earliest `next_eligible_at <= now`, FIFO on ties. Returns
    /// `None` when nothing is eligible yet.
    ///
    /// The pending index is sorted by eligibility, so only its first
    /// entry ever needs to be examined. Orphaned or corrupt index
    /// entries are dropped and the scan continues.
    pub fn claim_next(&self, now_ns: u64) -> QueueResult<Option<Job>> {
        let _guard = self.guard();

        loop {
            let Some(pending_key) = self.storage.first_pending()? else {
                return Ok(None);
            };

            let Some((eligible_ns, _, id)) = keys::parse_pending_key(&pending_key) else {
                warn!("corrupt pending index entry, dropping");
                self.storage
                    .write_batch(vec![WriteBatchOp::DeletePending { key: pending_key }])?;
                continue;
            };

            if eligible_ns > now_ns {
                return Ok(None);
            }

            let Some(mut job) = self.storage.get_job(&keys::job_key(&id))? else {
                warn!(%id, "orphaned pending entry, job record missing");
                self.storage
                    .write_batch(vec![WriteBatchOp::DeletePending { key: pending_key }])?;
                continue;
            };

            if job.state != JobState::Pending {
                warn!(%id, state = %job.state, "stale pending entry, dropping");
                self.storage
                    .write_batch(vec![WriteBatchOp::DeletePending { key: pending_key }])?;
                continue;
            }

            job.state = JobState::InFlight;
            job.claimed_at = Some(now_ns);
            let value = Self::serialize(&job)?;

            self.storage.write_batch(vec![
                WriteBatchOp::DeletePending { key: pending_key },
                WriteBatchOp::PutInFlight {
                    key: keys::in_flight_key(now_ns, &id),
                },
                WriteBatchOp::PutJob {
                    key: keys::job_key(&id),
                    value,
                },
            ])?;

            debug!(%id, attempt_count = job.attempt_count, "job claimed");
            return Ok(Some(job));
        }
    }

    /// Return a claimed job to Pending without recording an attempt.
    /// Eligibility is unchanged, so the job keeps its place in line.
    /// This is the admission-denied path: being rate limited is not a
    /// delivery failure.
    pub fn release(&self, id: &Uuid) -> QueueResult<()> {
        let _guard = self.guard();

        let mut job = self.load(id)?;
        let claimed_ns = self.require_in_flight(&job)?;

        job.state = JobState::Pending;
        job.claimed_at = None;
        let value = Self::serialize(&job)?;

        self.storage.write_batch(vec![
            WriteBatchOp::DeleteInFlight {
                key: keys::in_flight_key(claimed_ns, id),
            },
            WriteBatchOp::PutPending {
                key: keys::pending_key(job.next_eligible_at, job.enqueued_at, id),
            },
            WriteBatchOp::PutJob {
                key: keys::job_key(id),
                value,
            },
        ])?;

        debug!(%id, "job released without attempt");
        Ok(())
    }

    /// InFlight → Completed. Records the attempt.
    pub fn mark_completed(&self, id: &Uuid) -> QueueResult<()> {
        let _guard = self.guard();

        let mut job = self.load(id)?;
        let claimed_ns = self.require_in_flight(&job)?;

        job.state = JobState::Completed;
        job.attempt_count += 1;
        job.claimed_at = None;
        let value = Self::serialize(&job)?;

        self.storage.write_batch(vec![
            WriteBatchOp::DeleteInFlight {
                key: keys::in_flight_key(claimed_ns, id),
            },
            WriteBatchOp::PutJob {
                key: keys::job_key(id),
                value,
            },
        ])?;

        debug!(%id, attempt_count = job.attempt_count, "job completed");
        Ok(())
    }

    /// InFlight → Pending with backoff. Records the attempt and the
    /// failure, and pushes eligibility to `now + delay`. Eligibility
    /// never moves backward across successive failures.
    pub fn mark_failed_retry(
        &self,
        id: &Uuid,
        error: &str,
        delay: Duration,
        now_ns: u64,
    ) -> QueueResult<()> {
        let _guard = self.guard();

        let mut job = self.load(id)?;
        let claimed_ns = self.require_in_flight(&job)?;

        let eligible = now_ns
            .saturating_add(delay.as_nanos() as u64)
            .max(job.next_eligible_at);

        job.state = JobState::Pending;
        job.attempt_count += 1;
        job.claimed_at = None;
        job.next_eligible_at = eligible;
        job.last_error = Some(error.to_string());
        let value = Self::serialize(&job)?;

        self.storage.write_batch(vec![
            WriteBatchOp::DeleteInFlight {
                key: keys::in_flight_key(claimed_ns, id),
            },
            WriteBatchOp::PutPending {
                key: keys::pending_key(eligible, job.enqueued_at, id),
            },
            WriteBatchOp::PutJob {
                key: keys::job_key(id),
                value,
            },
        ])?;

        debug!(
            %id,
            attempt_count = job.attempt_count,
            delay_ms = delay.as_millis() as u64,
            error,
            "job scheduled for retry"
        );
        Ok(())
    }

    /// InFlight → Failed, permanently. Records the attempt and the
    /// final error. The record stays queryable for audit; it is never
    /// dispatched again.
    pub fn mark_failed_terminal(&self, id: &Uuid, error: &str) -> QueueResult<()> {
        let _guard = self.guard();

        let mut job = self.load(id)?;
        let claimed_ns = self.require_in_flight(&job)?;

        job.state = JobState::Failed;
        job.attempt_count += 1;
        job.claimed_at = None;
        job.last_error = Some(error.to_string());
        let value = Self::serialize(&job)?;

        self.storage.write_batch(vec![
            WriteBatchOp::DeleteInFlight {
                key: keys::in_flight_key(claimed_ns, id),
            },
            WriteBatchOp::PutJob {
                key: keys::job_key(id),
                value,
            },
        ])?;

        warn!(%id, attempt_count = job.attempt_count, error, "job failed permanently");
        Ok(())
    }

    /// Return every job claimed more than `stale_after` ago to Pending,
    /// immediately eligible. A dispatcher that crashed mid-delivery
    /// leaves its claim behind; this is what turns that claim back into
    /// deliverable work, and it is the at-least-once guarantee across
    /// process restarts. The aborted attempt is not counted.
    ///
    /// Returns the number of jobs recovered.
    pub fn recover_stale(&self, stale_after: Duration, now_ns: u64) -> QueueResult<u64> {
        let _guard = self.guard();

        let cutoff = now_ns.saturating_sub(stale_after.as_nanos() as u64);
        let stale_keys = self
            .storage
            .list_in_flight(&keys::in_flight_upper_bound(cutoff))?;

        let mut recovered = 0u64;
        for in_flight_key in stale_keys {
            let Some((claimed_ns, id)) = keys::parse_in_flight_key(&in_flight_key) else {
                warn!("corrupt in-flight index entry, dropping");
                self.storage
                    .write_batch(vec![WriteBatchOp::DeleteInFlight { key: in_flight_key }])?;
                continue;
            };

            let Some(mut job) = self.storage.get_job(&keys::job_key(&id))? else {
                warn!(%id, "orphaned in-flight entry, job record missing");
                self.storage
                    .write_batch(vec![WriteBatchOp::DeleteInFlight { key: in_flight_key }])?;
                continue;
            };

            // The record may already have moved on (e.g. a slow worker
            // finished between the scan and now). Only genuine InFlight
            // claims are reclaimed.
            if job.state != JobState::InFlight || job.claimed_at != Some(claimed_ns) {
                self.storage
                    .write_batch(vec![WriteBatchOp::DeleteInFlight { key: in_flight_key }])?;
                continue;
            }

            job.state = JobState::Pending;
            job.claimed_at = None;
            job.next_eligible_at = now_ns;
            let value = Self::serialize(&job)?;

            self.storage.write_batch(vec![
                WriteBatchOp::DeleteInFlight { key: in_flight_key },
                WriteBatchOp::PutPending {
                    key: keys::pending_key(now_ns, job.enqueued_at, &id),
                },
                WriteBatchOp::PutJob {
                    key: keys::job_key(&id),
                    value,
                },
            ])?;

            debug!(%id, attempt_count = job.attempt_count, "stale claim reclaimed");
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "reclaimed stale in-flight jobs");
        }
        Ok(recovered)
    }

    /// Fetch a job by id, any state.
    pub fn get(&self, id: &Uuid) -> QueueResult<Option<Job>> {
        Ok(self.storage.get_job(&keys::job_key(id))?)
    }

    /// All jobs currently in the given state, for operator inspection.
    pub fn jobs_in_state(&self, state: JobState) -> QueueResult<Vec<Job>> {
        Ok(self
            .storage
            .list_jobs()?
            .into_iter()
            .filter(|j| j.state == state)
            .collect())
    }

    /// Job counts by state. Full scan — audit surface, not a hot path.
    pub fn stats(&self) -> QueueResult<QueueStats> {
        let mut stats = QueueStats::default();
        for job in self.storage.list_jobs()? {
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::InFlight => stats.in_flight += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Flush the WAL so acknowledged writes survive a hard stop.
    pub fn flush(&self) -> QueueResult<()> {
        Ok(self.storage.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NotificationPayload;
    use crate::storage::RocksDbStorage;
    use std::collections::HashSet;

    fn test_store() -> (Arc<JobStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
        (Arc::new(JobStore::new(storage)), dir)
    }

    fn test_job(now_ns: u64) -> Job {
        Job::new(
            NotificationPayload {
                message: "BUY 42 USDC".to_string(),
                destination: "chan-1".to_string(),
            },
            now_ns,
        )
    }

    #[test]
    fn insert_then_claim() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();

        let claimed = store.claim_next(1_000).unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.state, JobState::InFlight);
        assert_eq!(claimed.claimed_at, Some(1_000));
        // Claiming does not count as an attempt
        assert_eq!(claimed.attempt_count, 0);
    }

    #[test]
    fn duplicate_id_rejected() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();

        let err = store.insert(&job).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateId(id) if id == job.id));
    }

    #[test]
    fn claim_respects_eligibility() {
        let (store, _dir) = test_store();
        let mut job = test_job(1_000);
        job.next_eligible_at = 5_000;
        store.insert(&job).unwrap();

        assert!(store.claim_next(4_999).unwrap().is_none());
        assert!(store.claim_next(5_000).unwrap().is_some());
    }

    #[test]
    fn claim_order_oldest_eligible_first_fifo_ties() {
        let (store, _dir) = test_store();

        let mut a = test_job(100);
        a.next_eligible_at = 3_000;
        let mut b = test_job(200);
        b.next_eligible_at = 1_000;
        let mut c = test_job(150);
        c.next_eligible_at = 1_000;

        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        store.insert(&c).unwrap();

        // b and c share an eligibility time; c enqueued earlier wins.
        assert_eq!(store.claim_next(10_000).unwrap().unwrap().id, c.id);
        assert_eq!(store.claim_next(10_000).unwrap().unwrap().id, b.id);
        assert_eq!(store.claim_next(10_000).unwrap().unwrap().id, a.id);
        assert!(store.claim_next(10_000).unwrap().is_none());
    }

    #[test]
    fn claimed_job_is_not_claimable_again() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();

        assert!(store.claim_next(1_000).unwrap().is_some());
        assert!(store.claim_next(1_000).unwrap().is_none());
    }

    #[test]
    fn mark_completed_records_attempt_and_is_terminal() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();
        store.claim_next(1_000).unwrap().unwrap();

        store.mark_completed(&job.id).unwrap();
        let done = store.get(&job.id).unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.attempt_count, 1);

        // Never claimable again
        assert!(store.claim_next(u64::MAX).unwrap().is_none());
        // And never transitionable again
        let err = store.mark_completed(&job.id).unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
    }

    #[test]
    fn mark_completed_requires_in_flight() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();

        let err = store.mark_completed(&job.id).unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                expected: JobState::InFlight,
                found: JobState::Pending,
                ..
            }
        ));
    }

    #[test]
    fn mark_unknown_job_is_not_found() {
        let (store, _dir) = test_store();
        let err = store.mark_completed(&Uuid::now_v7()).unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
    }

    #[test]
    fn retry_backoff_defers_and_records_error() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();
        store.claim_next(1_000).unwrap().unwrap();

        store
            .mark_failed_retry(&job.id, "connect timeout", Duration::from_secs(5), 2_000)
            .unwrap();

        let retried = store.get(&job.id).unwrap().unwrap();
        assert_eq!(retried.state, JobState::Pending);
        assert_eq!(retried.attempt_count, 1);
        assert_eq!(retried.last_error.as_deref(), Some("connect timeout"));
        assert_eq!(retried.next_eligible_at, 2_000 + 5_000_000_000);

        // Not claimable until the backoff elapses
        assert!(store.claim_next(2_000).unwrap().is_none());
        assert!(store
            .claim_next(2_000 + 5_000_000_000)
            .unwrap()
            .is_some());
    }

    #[test]
    fn eligibility_never_decreases_across_failures() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();

        let mut last_eligible = 0;
        for (i, delay_ms) in [5_000u64, 10_000, 20_000].iter().enumerate() {
            let now = (i as u64 + 1) * 1_000_000;
            let claimed = store.claim_next(u64::MAX / 2).unwrap().unwrap();
            assert_eq!(claimed.id, job.id);
            store
                .mark_failed_retry(&job.id, "boom", Duration::from_millis(*delay_ms), now)
                .unwrap();
            let current = store.get(&job.id).unwrap().unwrap();
            assert!(current.next_eligible_at >= last_eligible);
            last_eligible = current.next_eligible_at;
        }
    }

    #[test]
    fn terminal_failure_keeps_record_for_audit() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();
        store.claim_next(1_000).unwrap().unwrap();

        store
            .mark_failed_terminal(&job.id, "destination rejected")
            .unwrap();

        let failed = store.get(&job.id).unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempt_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("destination rejected"));

        assert!(store.claim_next(u64::MAX).unwrap().is_none());
        assert_eq!(store.jobs_in_state(JobState::Failed).unwrap().len(), 1);
    }

    #[test]
    fn release_does_not_count_an_attempt() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();
        store.claim_next(1_000).unwrap().unwrap();

        store.release(&job.id).unwrap();

        let released = store.get(&job.id).unwrap().unwrap();
        assert_eq!(released.state, JobState::Pending);
        assert_eq!(released.attempt_count, 0);
        // Eligibility unchanged: still first in line
        assert_eq!(released.next_eligible_at, 1_000);
        assert!(store.claim_next(1_000).unwrap().is_some());
    }

    #[test]
    fn recover_stale_returns_old_claims_to_pending() {
        let (store, _dir) = test_store();
        let job = test_job(1_000);
        store.insert(&job).unwrap();
        store.claim_next(1_000).unwrap().unwrap();

        let now = 1_000 + 60 * 1_000_000_000;

        // Claim is only 60s old; with a 120s threshold nothing happens.
        assert_eq!(
            store.recover_stale(Duration::from_secs(120), now).unwrap(),
            0
        );
        // With a 30s threshold the claim is stale.
        assert_eq!(
            store.recover_stale(Duration::from_secs(30), now).unwrap(),
            1
        );

        let recovered = store.get(&job.id).unwrap().unwrap();
        assert_eq!(recovered.state, JobState::Pending);
        assert_eq!(recovered.next_eligible_at, now);
        // The aborted attempt is not counted
        assert_eq!(recovered.attempt_count, 0);

        assert!(store.claim_next(now).unwrap().is_some());
    }

    #[test]
    fn recover_stale_skips_fresh_claims() {
        let (store, _dir) = test_store();
        let a = test_job(1_000);
        let b = test_job(1_000);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        // a claimed long ago, b claimed just now
        let first = store.claim_next(1_000).unwrap().unwrap();
        let now = 1_000 + 100 * 1_000_000_000;
        let second = store.claim_next(now).unwrap().unwrap();

        assert_eq!(
            store.recover_stale(Duration::from_secs(30), now).unwrap(),
            1
        );
        assert_eq!(
            store.get(&first.id).unwrap().unwrap().state,
            JobState::Pending
        );
        assert_eq!(
            store.get(&second.id).unwrap().unwrap().state,
            JobState::InFlight
        );
    }

    #[test]
    fn stats_counts_by_state() {
        let (store, _dir) = test_store();

        let a = test_job(1_000);
        let b = test_job(1_000);
        let c = test_job(1_000);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        store.insert(&c).unwrap();

        let first = store.claim_next(1_000).unwrap().unwrap();
        store.mark_completed(&first.id).unwrap();
        let second = store.claim_next(1_000).unwrap().unwrap();
        store.mark_failed_terminal(&second.id, "bad destination").unwrap();
        store.claim_next(1_000).unwrap().unwrap();

        assert_eq!(
            store.stats().unwrap(),
            QueueStats {
                pending: 0,
                in_flight: 1,
                completed: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn concurrent_claims_never_overlap() {
        let (store, _dir) = test_store();

        const JOBS: usize = 200;
        const WORKERS: usize = 8;

        for _ in 0..JOBS {
            store.insert(&test_job(1_000)).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..WORKERS {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(job) = store.claim_next(1_000).unwrap() {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut all: Vec<Uuid> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let unique: HashSet<Uuid> = all.iter().copied().collect();
        assert_eq!(all.len(), JOBS, "every job claimed exactly once");
        assert_eq!(unique.len(), JOBS, "no job claimed by two workers");
    }

    #[test]
    fn restart_preserves_pending_and_recovers_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let pending_job = test_job(1_000);
        let crashed_job = test_job(1_000);

        {
            let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
            let store = JobStore::new(storage);
            store.insert(&pending_job).unwrap();
            store.insert(&crashed_job).unwrap();
            // Claim one and "crash" without resolving it
            let claimed = store.claim_next(1_000).unwrap().unwrap();
            assert_eq!(claimed.id, crashed_job.id);
            store.flush().unwrap();
        }

        {
            let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
            let store = JobStore::new(storage);

            let now = 1_000 + 120 * 1_000_000_000;
            assert_eq!(store.recover_stale(Duration::from_secs(60), now).unwrap(), 1);

            // Both jobs deliverable again after restart — nothing lost
            let first = store.claim_next(now).unwrap().unwrap();
            let second = store.claim_next(now).unwrap().unwrap();
            let ids: HashSet<Uuid> = [first.id, second.id].into_iter().collect();
            assert!(ids.contains(&pending_job.id));
            assert!(ids.contains(&crashed_job.id));
        }
    }
}
