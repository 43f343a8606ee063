// ABOUTME: Reply delivery with oldest-first handle attempts and push fallback
// ABOUTME: The first successful send terminates; a turn's reply is never sent twice

use tracing::{debug, warn};

use confab_core::metrics;
use confab_core::traits::MessagingClient;

/// Tries reply handles strictly in arrival order, then falls back to a push
/// addressed to the primary participant. Handles expire in issuance order,
/// so the oldest is always the next to lapse. Returns true when any attempt
/// succeeded.
pub async fn deliver(
    client: &dyn MessagingClient,
    handles: &[String],
    participant: Option<&str>,
    messages: &[String],
) -> bool {
    for (index, handle) in handles.iter().enumerate() {
        match client.send_reply(handle, messages).await {
            Ok(()) => {
                debug!(attempt = index + 1, "reply delivered via handle");
                metrics::record_delivery("reply");
                return true;
            }
            Err(error) => {
                warn!(attempt = index + 1, error = %error, "reply handle failed, trying next");
                metrics::record_delivery_failure("reply");
            }
        }
    }

    let Some(participant) = participant else {
        warn!("no reply handle succeeded and no participant to push to");
        return false;
    };

    match client.send_push(participant, messages).await {
        Ok(()) => {
            debug!("reply delivered via push fallback");
            metrics::record_delivery("push");
            true
        }
        Err(error) => {
            warn!(error = %error, "push fallback failed, reply lost");
            metrics::record_delivery_failure("push");
            false
        }
    }
}
