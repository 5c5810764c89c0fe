use crate::job::NotificationPayload;

/// How a delivery attempt failed. The integration layer decides the
/// split: transport problems and remote 5xx are `Retryable`; a rejected
/// payload or malformed destination is `Permanent` and must not loop
/// through backoff.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("retryable send failure: {0}")]
    Retryable(String),

    #[error("permanent send failure: {0}")]
    Permanent(String),
}

/// The delivery capability, supplied by the integration layer (e.g. a
/// messaging-platform client). Sends block the calling worker; any
/// timeout policy belongs to the implementation and surfaces as a
/// `Retryable` failure.
pub trait Sender: Send + Sync {
    fn send(&self, payload: &NotificationPayload) -> Result<(), SendError>;
}
