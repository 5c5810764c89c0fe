use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::config::CourierConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{self, Job};
use crate::limiter::FixedWindowLimiter;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::sender::{SendError, Sender};
use crate::store::JobStore;

/// Wake-up signals delivered to dispatcher workers.
pub enum DispatcherSignal {
    /// A producer inserted a job; stop parking and poll now.
    JobReady,
    /// Stop the worker after the current delivery finishes.
    Shutdown,
}

/// A single dispatcher worker: drives jobs from Pending to a terminal
/// state. All workers share the store, the limiter, and the signal
/// channel; the store's claim atomicity is what makes them safe to run
/// in parallel.
struct Worker {
    store: Arc<JobStore>,
    limiter: Arc<FixedWindowLimiter>,
    retry: RetryPolicy,
    sender: Arc<dyn Sender>,
    signals: Receiver<DispatcherSignal>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
    stale_after: Duration,
    recover_interval: Duration,
}

impl Worker {
    fn run(&self) {
        info!("dispatcher worker started");
        let mut last_recover: Option<Instant> = None;

        loop {
            // Reclaim crashed work on the first pass and then on an
            // interval, not every iteration.
            if last_recover.map_or(true, |t| t.elapsed() >= self.recover_interval) {
                self.recover_stale();
                last_recover = Some(Instant::now());
            }

            match self.store.claim_next(job::unix_ts_ns()) {
                Ok(Some(claimed)) => {
                    if !self.limiter.try_admit() {
                        self.metrics.record_rate_limited();
                        // Being throttled is not a delivery failure:
                        // put the job back unchanged and sit out the
                        // rest of the window.
                        if let Err(e) = self.store.release(&claimed.id) {
                            error!(id = %claimed.id, error = %e, "failed to release throttled job");
                        }
                        debug!(id = %claimed.id, "send window exhausted, job requeued");
                        let wait = self.limiter.retry_after().max(Duration::from_millis(10));
                        if !self.park(wait) {
                            break;
                        }
                        continue;
                    }
                    self.deliver(claimed);
                }
                Ok(None) => {
                    // Nothing eligible: park until a producer nudges us
                    // or the poll interval elapses. Blocking wait, not
                    // a busy spin.
                    if !self.park(self.poll_interval) {
                        break;
                    }
                }
                Err(e) => {
                    // Fail closed: with the store unavailable no claim
                    // was made, so nothing can be lost. Pause and retry.
                    error!(error = %e, "claim failed, dispatch paused");
                    if !self.park(self.poll_interval) {
                        break;
                    }
                }
            }
        }

        info!("dispatcher worker stopped");
    }

    /// Wait on the signal channel for at most `timeout`. Returns false
    /// when the worker should stop.
    fn park(&self, timeout: Duration) -> bool {
        match self.signals.recv_timeout(timeout) {
            Ok(DispatcherSignal::JobReady) | Err(RecvTimeoutError::Timeout) => true,
            Ok(DispatcherSignal::Shutdown) => false,
            Err(RecvTimeoutError::Disconnected) => {
                info!("signal channel disconnected, stopping worker");
                false
            }
        }
    }

    /// Send one claimed job and record the outcome.
    ///
    /// The send runs outside every store and limiter lock. If an
    /// outcome write fails the job simply stays InFlight and stale
    /// recovery re-queues it later — an error is logged, the job is
    /// never dropped.
    fn deliver(&self, claimed: Job) {
        let id = claimed.id;
        let attempt = claimed.attempt_count + 1;

        match self.sender.send(&claimed.payload) {
            Ok(()) => {
                self.metrics.record_delivered();
                match self.store.mark_completed(&id) {
                    Ok(()) => info!(
                        %id,
                        destination = %claimed.payload.destination,
                        attempt,
                        "notification delivered"
                    ),
                    Err(e) => error!(%id, error = %e, "failed to record completion"),
                }
            }
            Err(SendError::Permanent(reason)) => {
                self.metrics.record_failed();
                warn!(%id, %reason, "permanent delivery failure");
                if let Err(e) = self.store.mark_failed_terminal(&id, &reason) {
                    error!(%id, error = %e, "failed to record terminal failure");
                }
            }
            Err(SendError::Retryable(reason)) => {
                if self.retry.is_exhausted(attempt) {
                    self.metrics.record_failed();
                    warn!(%id, %reason, attempt, "retries exhausted");
                    if let Err(e) = self.store.mark_failed_terminal(&id, &reason) {
                        error!(%id, error = %e, "failed to record terminal failure");
                    }
                } else {
                    self.metrics.record_retried();
                    let delay = self.retry.next_delay(attempt);
                    debug!(
                        %id,
                        %reason,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "delivery failed, retrying"
                    );
                    if let Err(e) =
                        self.store
                            .mark_failed_retry(&id, &reason, delay, job::unix_ts_ns())
                    {
                        error!(%id, error = %e, "failed to record retry");
                    }
                }
            }
        }
    }

    fn recover_stale(&self) {
        match self.store.recover_stale(self.stale_after, job::unix_ts_ns()) {
            Ok(0) => {}
            Ok(n) => self.metrics.record_stale_recovered(n),
            Err(e) => warn!(error = %e, "stale claim recovery failed"),
        }
    }
}

/// Owns the dispatcher worker threads and the signal channel. Producers
/// get a wake handle via `wake_handle()`; `shutdown()` stops every
/// worker, joins them, and flushes the WAL.
pub struct DispatcherPool {
    signal_tx: crossbeam_channel::Sender<DispatcherSignal>,
    workers: Vec<thread::JoinHandle<()>>,
    store: Arc<JobStore>,
}

impl DispatcherPool {
    /// Spawn the configured number of worker threads.
    pub fn start(
        config: &CourierConfig,
        store: Arc<JobStore>,
        limiter: Arc<FixedWindowLimiter>,
        retry: RetryPolicy,
        sender: Arc<dyn Sender>,
    ) -> QueueResult<Self> {
        let (signal_tx, signal_rx) =
            crossbeam_channel::bounded(config.dispatcher.wake_channel_capacity);
        let metrics = Arc::new(Metrics::new());

        let worker_count = config.dispatcher.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let worker = Worker {
                store: Arc::clone(&store),
                limiter: Arc::clone(&limiter),
                retry: retry.clone(),
                sender: Arc::clone(&sender),
                signals: signal_rx.clone(),
                metrics: Arc::clone(&metrics),
                poll_interval: Duration::from_millis(config.dispatcher.poll_interval_ms),
                stale_after: Duration::from_millis(config.dispatcher.stale_after_ms),
                recover_interval: Duration::from_millis(config.dispatcher.recover_interval_ms),
            };
            let handle = thread::Builder::new()
                .name(format!("courier-dispatch-{i}"))
                .spawn(move || worker.run())
                .map_err(|e| QueueError::WorkerSpawn(e.to_string()))?;
            workers.push(handle);
        }

        info!(workers = worker_count, "dispatcher pool started");
        Ok(Self {
            signal_tx,
            workers,
            store,
        })
    }

    /// Handle producers use to nudge parked workers after an insert.
    pub fn wake_handle(&self) -> crossbeam_channel::Sender<DispatcherSignal> {
        self.signal_tx.clone()
    }

    /// Stop all workers, join them, and flush the WAL. In-flight sends
    /// finish first; unfinished jobs stay durable and resume on the
    /// next start.
    pub fn shutdown(mut self) {
        info!("dispatcher pool shutting down");
        for _ in 0..self.workers.len() {
            let _ = self.signal_tx.send(DispatcherSignal::Shutdown);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("dispatcher worker panicked during shutdown");
            }
        }
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "failed to flush WAL during shutdown");
        }
        info!("dispatcher pool stopped");
    }
}
