use courier_core::{NotificationPayload, QueueFront};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Upstream event boundary: each line on stdin is one JSON
/// `{"message": …, "destination": …}` payload produced by the event
/// decoder upstream of this process. Every valid line becomes one job
/// submission; delivery continues independently after the stream ends.
pub async fn run(front: QueueFront) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<NotificationPayload>(line) {
                    Ok(payload) => {
                        // Store-unavailable is the producer's call to
                        // make; this daemon's policy is log-and-drop so
                        // one bad write cannot stall the event stream.
                        if let Err(e) = front.submit(payload) {
                            error!(error = %e, "failed to persist job, event dropped");
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed event line, skipping"),
                }
            }
            Ok(None) => {
                info!("event stream closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read event line");
                break;
            }
        }
    }
}
