use std::sync::Arc;
use std::time::Duration;

use atmo_core::Clock;
use jiff::SignedDuration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::QueuedCommand;
use crate::queue::CommandQueue;
use crate::transport::{QueueTransport, TransportError};

/// Wire form of a delivered command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub message_id: String,
    pub device_id: String,
    pub kind: String,
    pub payload: String,
}

impl From<&QueuedCommand> for CommandMessage {
    fn from(command: &QueuedCommand) -> Self {
        Self {
            message_id: command.id.0.to_string(),
            device_id: command.device_id.0.to_string(),
            kind: command.kind.as_str().to_string(),
            payload: command.payload.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PumpError<QE>
where
    QE: std::error::Error,
{
    #[error("command queue: {0}")]
    Queue(QE),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    /// How often due commands are polled.
    pub poll_interval: Duration,
    /// Delivery burst cap per poll.
    pub batch_limit: usize,
    /// How far a delivered-but-unacknowledged command is pushed out before
    /// it becomes due again (at-least-once redelivery).
    pub redelivery_after: SignedDuration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_limit: 32,
            redelivery_after: SignedDuration::from_mins(2),
        }
    }
}

/// Moves due commands from the durable queue onto the delivery channel.
///
/// Execution is acknowledged out-of-band through `CommandQueue::
/// mark_executed`; anything still pending when `redelivery_after` elapses
/// is sent again. Device-side handlers are expected to be idempotent.
pub struct DeliveryPump<Q, T> {
    queue: Q,
    transport: T,
    clock: Arc<dyn Clock>,
    config: PumpConfig,
}

impl<Q, T> DeliveryPump<Q, T>
where
    Q: CommandQueue,
    T: QueueTransport,
{
    pub fn new(queue: Q, transport: T, clock: Arc<dyn Clock>, config: PumpConfig) -> Self {
        Self {
            queue,
            transport,
            clock,
            config,
        }
    }

    /// One polling pass. Returns how many commands went out.
    pub async fn deliver_due(
        &self,
        now: jiff::Timestamp,
    ) -> Result<usize, PumpError<Q::Error>> {
        let due = self
            .queue
            .fetch_due(now, self.config.batch_limit)
            .await
            .map_err(PumpError::Queue)?;

        let mut delivered = 0;
        for command in &due {
            let text = serde_json::to_string(&CommandMessage::from(command))?;
            self.transport.send_message(&text, None).await?;

            let retry_at = now
                .checked_add(self.config.redelivery_after)
                .unwrap_or(now);
            self.queue
                .postpone(command.id, retry_at)
                .await
                .map_err(PumpError::Queue)?;

            delivered += 1;
        }

        Ok(delivered)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("delivery pump shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let now = self.clock.now();
                    match self.deliver_due(now).await {
                        Ok(0) => {}
                        Ok(count) => info!(count, "delivered due commands"),
                        // transport errors are transient: leave the commands
                        // due and let the next tick retry
                        Err(e) => warn!(error = %e, "command delivery pass failed"),
                    }
                }
            }
        }
    }
}
