use serde::Deserialize;

/// Top-level pipeline configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
    pub limiter: LimiterConfig,
}

/// Dispatcher pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker threads pulling jobs concurrently.
    pub workers: usize,
    /// How long an idle worker parks before re-polling the store.
    pub poll_interval_ms: u64,
    /// An in-flight job older than this is assumed to belong to a
    /// crashed worker and is returned to the queue.
    pub stale_after_ms: u64,
    /// How often each worker scans for stale claims.
    pub recover_interval_ms: u64,
    /// Capacity of the wake/shutdown signal channel.
    pub wake_channel_capacity: usize,
}

/// Retry/backoff configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total delivery attempts before a job is parked as Failed.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Global send-rate limit.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub max_per_window: u32,
    pub window_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 100,
            stale_after_ms: 60_000,
            recover_interval_ms: 5_000,
            wake_channel_capacity: 1_024,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_per_window: 1_000,
            window_ms: 2_000,
        }
    }
}
