pub mod config;
pub mod dispatch;
pub mod error;
pub mod front;
pub mod job;
pub mod limiter;
pub mod metrics;
pub mod retry;
pub mod sender;
pub mod storage;
pub mod store;
pub mod telemetry;

pub use config::CourierConfig;
pub use dispatch::{DispatcherPool, DispatcherSignal};
pub use error::{QueueError, QueueResult, StorageError, StorageResult};
pub use front::QueueFront;
pub use job::{Job, JobState, NotificationPayload};
pub use limiter::FixedWindowLimiter;
pub use retry::RetryPolicy;
pub use sender::{SendError, Sender};
pub use storage::{RocksDbStorage, Storage, WriteBatchOp};
pub use store::{JobStore, QueueStats};
