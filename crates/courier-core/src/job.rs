use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a job delivers: an already-formatted message body and the
/// identifier of the channel it goes to. The queue never inspects
/// either field — upstream formatting and downstream routing both
/// belong to the integration layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPayload {
    pub message: String,
    pub destination: String,
}

/// Lifecycle state of a delivery job.
///
/// Pending → InFlight → {Completed | Pending (retry) | Failed}.
/// Completed and Failed are terminal; a job in either state is never
/// dispatched again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::InFlight => "in_flight",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Core job domain type, persisted as a single record in the `jobs`
/// column family. Timestamps are nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub payload: NotificationPayload,
    pub state: JobState,
    /// Number of completed delivery attempts. Incremented when an
    /// attempt resolves (success, retryable failure, terminal failure)
    /// — never by claiming, rate-limit release, or stale recovery.
    pub attempt_count: u32,
    /// The job must not be dispatched before this time. Pushed forward
    /// by backoff on each retryable failure; never moves backward.
    pub next_eligible_at: u64,
    pub enqueued_at: u64,
    /// Set while the job is InFlight; used to locate its entry in the
    /// in-flight index.
    pub claimed_at: Option<u64>,
    pub last_error: Option<String>,
}

impl Job {
    /// Generate a new UUIDv7 job ID (time-ordered).
    pub fn new_id() -> Uuid {
        Uuid::now_v7()
    }

    /// Create a fresh Pending job, eligible immediately.
    pub fn new(payload: NotificationPayload, now_ns: u64) -> Self {
        Self {
            id: Self::new_id(),
            payload,
            state: JobState::Pending,
            attempt_count: 0,
            next_eligible_at: now_ns,
            enqueued_at: now_ns,
            claimed_at: None,
            last_error: None,
        }
    }
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn unix_ts_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
