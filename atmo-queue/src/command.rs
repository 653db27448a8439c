use atmo_core::{CommandId, DeviceId};
use serde::{Deserialize, Serialize};

type BoxStr = Box<str>;

/// Outbound instruction a device knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Reboot,
    SetMotionControl,
    SendAttributes,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Reboot => "reboot",
            CommandKind::SetMotionControl => "set_motion_control",
            CommandKind::SendAttributes => "send_attributes",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "reboot" => Some(CommandKind::Reboot),
            "set_motion_control" => Some(CommandKind::SetMotionControl),
            "send_attributes" => Some(CommandKind::SendAttributes),
            _ => None,
        }
    }
}

/// A durable, scheduled instruction awaiting delivery to a device.
///
/// Lifecycle: pending from creation, visible to the delivery channel once
/// `scheduled_at` passes, then exactly one terminal state — executed or
/// removed, never both. `executed_at` is set at most once; after that the
/// entry is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub id: CommandId,
    pub device_id: DeviceId,
    pub kind: CommandKind,
    pub payload: BoxStr,
    pub scheduled_at: jiff::Timestamp,
    pub created_at: jiff::Timestamp,
    pub executed_at: Option<jiff::Timestamp>,
    pub removed: bool,
}

impl QueuedCommand {
    pub fn is_pending(&self) -> bool {
        self.executed_at.is_none() && !self.removed
    }
}

/// Result of `mark_executed`. `AlreadyExecuted` is a benign idempotence
/// signal, not an error: redelivery on an at-least-once transport must not
/// corrupt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed,
    AlreadyExecuted,
    NotFound,
}

/// Result of `cancel`. Cancellation is refused once the command executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyExecuted,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_round_trip() {
        for kind in [
            CommandKind::Reboot,
            CommandKind::SetMotionControl,
            CommandKind::SendAttributes,
        ] {
            assert_eq!(CommandKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CommandKind::parse("self_destruct"), None);
    }
}
