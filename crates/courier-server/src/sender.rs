use std::io::Write;

use courier_core::{NotificationPayload, SendError, Sender};

/// Delivery via stdout: each successful send is one JSON line. Stands
/// in for a real messaging-platform client when running the daemon as
/// part of a pipe; downstream tooling forwards the lines to the actual
/// channel.
pub struct StdoutSender;

impl Sender for StdoutSender {
    fn send(&self, payload: &NotificationPayload) -> Result<(), SendError> {
        let line = serde_json::json!({
            "destination": payload.destination,
            "message": payload.message,
        });
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")
            .and_then(|_| stdout.flush())
            .map_err(|e| SendError::Retryable(e.to_string()))
    }
}
