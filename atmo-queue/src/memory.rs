use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use atmo_core::{CommandId, DeviceId};
use thiserror::Error;
use ulid::Ulid;

use crate::command::{CancelOutcome, CommandKind, ExecutionOutcome, QueuedCommand};
use crate::queue::CommandQueue;

#[derive(Debug, Error)]
pub enum MemoryQueueError {
    #[error("internal error: {0}")]
    Internal(String),
}

/// In-memory command queue.
///
/// Primarily intended for tests and as a reference implementation of the
/// CommandQueue trait. All state transitions happen under a single mutex
/// guard, which gives the same check-and-set atomicity the SQLite backend
/// gets from conditional UPDATEs.
#[derive(Clone, Default)]
pub struct MemoryCommandQueue {
    commands: Arc<Mutex<HashMap<CommandId, QueuedCommand>>>,
}

impl MemoryCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<CommandId, QueuedCommand>>, MemoryQueueError>
    {
        self.commands
            .lock()
            .map_err(|_| MemoryQueueError::Internal("commands mutex poisoned".into()))
    }
}

#[async_trait]
impl CommandQueue for MemoryCommandQueue {
    type Error = MemoryQueueError;

    async fn enqueue(
        &self,
        device_id: DeviceId,
        kind: CommandKind,
        payload: &str,
        scheduled_at: Option<jiff::Timestamp>,
        now: jiff::Timestamp,
    ) -> Result<QueuedCommand, Self::Error> {
        let command = QueuedCommand {
            id: CommandId(Ulid::new()),
            device_id,
            kind,
            payload: payload.into(),
            scheduled_at: scheduled_at.unwrap_or(now),
            created_at: now,
            executed_at: None,
            removed: false,
        };

        let mut commands = self.lock()?;
        commands.insert(command.id, command.clone());

        Ok(command)
    }

    async fn get(&self, id: CommandId) -> Result<Option<QueuedCommand>, Self::Error> {
        let commands = self.lock()?;
        Ok(commands.get(&id).cloned())
    }

    async fn fetch_due(
        &self,
        now: jiff::Timestamp,
        limit: usize,
    ) -> Result<Vec<QueuedCommand>, Self::Error> {
        let commands = self.lock()?;

        let mut due: Vec<QueuedCommand> = commands
            .values()
            .filter(|c| c.is_pending() && c.scheduled_at <= now)
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.0.cmp(&b.id.0))
        });
        due.truncate(limit);

        Ok(due)
    }

    async fn mark_executed(
        &self,
        id: CommandId,
        now: jiff::Timestamp,
    ) -> Result<ExecutionOutcome, Self::Error> {
        let mut commands = self.lock()?;

        let Some(command) = commands.get_mut(&id) else {
            return Ok(ExecutionOutcome::NotFound);
        };

        if command.removed {
            // cancelled entries are gone from the delivery channel
            return Ok(ExecutionOutcome::NotFound);
        }

        if command.executed_at.is_some() {
            return Ok(ExecutionOutcome::AlreadyExecuted);
        }

        command.executed_at = Some(now);
        Ok(ExecutionOutcome::Executed)
    }

    async fn cancel(&self, id: CommandId) -> Result<CancelOutcome, Self::Error> {
        let mut commands = self.lock()?;

        let Some(command) = commands.get_mut(&id) else {
            return Ok(CancelOutcome::NotFound);
        };

        if command.executed_at.is_some() {
            return Ok(CancelOutcome::AlreadyExecuted);
        }

        command.removed = true;
        Ok(CancelOutcome::Cancelled)
    }

    async fn postpone(
        &self,
        id: CommandId,
        until: jiff::Timestamp,
    ) -> Result<bool, Self::Error> {
        let mut commands = self.lock()?;

        let Some(command) = commands.get_mut(&id) else {
            return Ok(false);
        };

        if !command.is_pending() {
            return Ok(false);
        }

        command.scheduled_at = until;
        Ok(true)
    }

    async fn last_executed(
        &self,
        device_id: DeviceId,
        kind: CommandKind,
    ) -> Result<Option<jiff::Timestamp>, Self::Error> {
        let commands = self.lock()?;
        Ok(commands
            .values()
            .filter(|c| c.device_id == device_id && c.kind == kind)
            .filter_map(|c| c.executed_at)
            .max())
    }
}
