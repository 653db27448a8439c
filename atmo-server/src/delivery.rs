use async_trait::async_trait;
use atmo_queue::{QueueReceipt, QueueTransport, TransportError};
use jiff::SignedDuration;
use tracing::info;
use ulid::Ulid;

/// Delivery-channel stand-in that logs outbound command messages.
///
/// Used when no broker is wired up (development, single-node installs);
/// the real channel only has to implement QueueTransport.
#[derive(Debug, Clone, Default)]
pub struct LogQueueTransport;

impl LogQueueTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueueTransport for LogQueueTransport {
    async fn send_message(
        &self,
        text: &str,
        delay: Option<SignedDuration>,
    ) -> Result<QueueReceipt, TransportError> {
        let now = jiff::Timestamp::now();
        let scheduled_at = delay
            .and_then(|d| now.checked_add(d).ok())
            .unwrap_or(now);

        let id = Ulid::new().to_string();
        info!(message_id = %id, %scheduled_at, text, "outbound command message");

        Ok(QueueReceipt {
            message_id: id.clone().into(),
            pop_receipt: id.into(),
            scheduled_at,
        })
    }

    async fn delete_message(
        &self,
        message_id: &str,
        _pop_receipt: &str,
    ) -> Result<(), TransportError> {
        info!(message_id, "deleted command message");
        Ok(())
    }

    async fn update_visibility(
        &self,
        message_id: &str,
        _pop_receipt: &str,
        timeout: SignedDuration,
    ) -> Result<(), TransportError> {
        info!(message_id, timeout_secs = timeout.as_secs(), "updated message visibility");
        Ok(())
    }
}
