use async_trait::async_trait;
use atmo_core::{CommandId, DeviceId};

use crate::command::{CancelOutcome, CommandKind, ExecutionOutcome, QueuedCommand};

/// Durable store of queued device commands.
///
/// Delivery is at-least-once from the queue's perspective; exactly-once
/// effect at the device is the device handler's responsibility. Concurrent
/// pollers are tolerated: the execution state transition is an optimistic
/// compare-and-set, not a global lock.
#[async_trait]
pub trait CommandQueue: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a new pending command. `scheduled_at` defaults to `now`.
    async fn enqueue(
        &self,
        device_id: DeviceId,
        kind: CommandKind,
        payload: &str,
        scheduled_at: Option<jiff::Timestamp>,
        now: jiff::Timestamp,
    ) -> Result<QueuedCommand, Self::Error>;

    async fn get(&self, id: CommandId) -> Result<Option<QueuedCommand>, Self::Error>;

    /// Pending, non-removed commands with `scheduled_at <= now`,
    /// oldest-first, at most `limit` (caps the delivery burst size).
    async fn fetch_due(
        &self,
        now: jiff::Timestamp,
        limit: usize,
    ) -> Result<Vec<QueuedCommand>, Self::Error>;

    /// Record execution. Idempotent: the first call wins, repeats get
    /// `AlreadyExecuted`.
    async fn mark_executed(
        &self,
        id: CommandId,
        now: jiff::Timestamp,
    ) -> Result<ExecutionOutcome, Self::Error>;

    /// Remove a not-yet-executed command from the delivery channel.
    async fn cancel(&self, id: CommandId) -> Result<CancelOutcome, Self::Error>;

    /// Push the next delivery attempt out to `until` (the visibility-timeout
    /// analogue for redelivery). Returns false when the command is no longer
    /// pending.
    async fn postpone(&self, id: CommandId, until: jiff::Timestamp)
    -> Result<bool, Self::Error>;

    /// When a command of this kind last executed on the device. Feeds the
    /// derived device view (e.g. "rebooted on").
    async fn last_executed(
        &self,
        device_id: DeviceId,
        kind: CommandKind,
    ) -> Result<Option<jiff::Timestamp>, Self::Error>;
}
