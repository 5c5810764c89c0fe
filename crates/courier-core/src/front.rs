use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::dispatch::DispatcherSignal;
use crate::error::QueueResult;
use crate::job::{self, Job, NotificationPayload};
use crate::metrics::Metrics;
use crate::store::JobStore;

/// The producer-facing edge of the pipeline. `submit` persists the job
/// durably before returning, so a crash right after the call cannot
/// lose it; dispatch happens asynchronously and never blocks the
/// producer.
#[derive(Clone)]
pub struct QueueFront {
    store: Arc<JobStore>,
    wake: crossbeam_channel::Sender<DispatcherSignal>,
    metrics: Arc<Metrics>,
}

impl QueueFront {
    pub fn new(store: Arc<JobStore>, wake: crossbeam_channel::Sender<DispatcherSignal>) -> Self {
        Self {
            store,
            wake,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Accept a payload for delivery: assign a fresh id, persist the
    /// Pending job, nudge the dispatchers, return. Only a store failure
    /// propagates — the producer decides whether that fails its own
    /// event processing.
    pub fn submit(&self, payload: NotificationPayload) -> QueueResult<Uuid> {
        let job = Job::new(payload, job::unix_ts_ns());
        let id = job.id;
        self.store.insert(&job)?;
        self.metrics.record_submitted();

        // Best-effort nudge: workers poll on an interval anyway, and a
        // full channel means they are already awake.
        let _ = self.wake.try_send(DispatcherSignal::JobReady);

        debug!(%id, "job accepted");
        Ok(id)
    }
}
