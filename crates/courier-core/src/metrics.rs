use opentelemetry::metrics::{Counter, Meter};

/// Core OTel counters for the delivery pipeline. Created once per
/// dispatcher pool and recorded on each lifecycle event.
pub struct Metrics {
    pub jobs_submitted: Counter<u64>,
    pub jobs_delivered: Counter<u64>,
    pub jobs_retried: Counter<u64>,
    pub jobs_failed: Counter<u64>,
    pub rate_limited: Counter<u64>,
    pub stale_recovered: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter
    /// provider is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("courier");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with an
    /// in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            jobs_submitted: meter
                .u64_counter("courier.jobs.submitted")
                .with_description("Total jobs accepted by the queue front")
                .build(),
            jobs_delivered: meter
                .u64_counter("courier.jobs.delivered")
                .with_description("Total jobs delivered successfully")
                .build(),
            jobs_retried: meter
                .u64_counter("courier.jobs.retried")
                .with_description("Total delivery attempts scheduled for retry")
                .build(),
            jobs_failed: meter
                .u64_counter("courier.jobs.failed")
                .with_description("Total jobs parked as permanently failed")
                .build(),
            rate_limited: meter
                .u64_counter("courier.dispatch.rate_limited")
                .with_description("Claims released because the send window was exhausted")
                .build(),
            stale_recovered: meter
                .u64_counter("courier.jobs.stale_recovered")
                .with_description("In-flight jobs reclaimed from crashed workers")
                .build(),
        }
    }

    pub fn record_submitted(&self) {
        self.jobs_submitted.add(1, &[]);
    }

    pub fn record_delivered(&self) {
        self.jobs_delivered.add(1, &[]);
    }

    pub fn record_retried(&self) {
        self.jobs_retried.add(1, &[]);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.add(1, &[]);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.add(1, &[]);
    }

    pub fn record_stale_recovered(&self, count: u64) {
        self.stale_recovered.add(count, &[]);
    }
}
