use std::str::FromStr;

use atmo_core::{CommandId, Role};
use atmo_ingest::store::{DeviceDirectory, MeasurementStore};
use atmo_queue::{CancelOutcome, CommandKind, CommandQueue, ExecutionOutcome, QueuedCommand};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use super::ApiState;
use crate::identity::authorize;
use crate::registry::DeviceRegistry;

/// Request body for enqueueing a device command.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueCommandRequest {
    /// "reboot", "set_motion_control" or "send_attributes".
    pub kind: String,
    /// Opaque command payload, delivered verbatim.
    pub payload: Option<String>,
    /// ISO-8601 execution time; defaults to now.
    pub scheduled_at: Option<String>,
}

/// Response body for a queued command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResponse {
    pub message_id: String,
    pub device_id: String,
    pub kind: String,
    pub payload: String,
    pub scheduled_at: String,
    pub created_at: String,
    pub executed_at: Option<String>,
    pub removed: bool,
}

impl From<QueuedCommand> for CommandResponse {
    fn from(command: QueuedCommand) -> Self {
        Self {
            message_id: command.id.to_string(),
            device_id: command.device_id.to_string(),
            kind: command.kind.as_str().to_string(),
            payload: command.payload.to_string(),
            scheduled_at: command.scheduled_at.to_string(),
            created_at: command.created_at.to_string(),
            executed_at: command.executed_at.map(|t| t.to_string()),
            removed: command.removed,
        }
    }
}

/// Response body for idempotent command transitions.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandOutcomeResponse {
    pub message_id: String,
    pub outcome: String,
}

/// Enqueue a command for a device.
///
/// POST /api/devices/{id}/commands
pub async fn enqueue_command<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<EnqueueCommandRequest>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Admin) {
        return (e.status(), e.to_string()).into_response();
    }

    let device_id = match Uuid::parse_str(&id) {
        Ok(uuid) => atmo_core::DeviceId(uuid),
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid device ID").into_response(),
    };

    let Some(kind) = CommandKind::parse(&request.kind) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Invalid command kind: {}", request.kind),
        )
            .into_response();
    };

    let scheduled_at = match request.scheduled_at.as_deref() {
        None => None,
        Some(text) => match text.parse::<jiff::Timestamp>() {
            Ok(timestamp) => Some(timestamp),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    "scheduled_at must be an ISO-8601 instant",
                )
                    .into_response();
            }
        },
    };

    // the command must target a registered device
    match state.registry.get(device_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return (StatusCode::NOT_FOUND, "Device not found").into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to get device");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get device").into_response();
        }
    }

    let payload = request.payload.unwrap_or_else(|| "{}".to_string());
    let now = state.clock.now();

    match state
        .queue
        .enqueue(device_id, kind, &payload, scheduled_at, now)
        .await
    {
        Ok(command) => {
            tracing::info!(
                message_id = %command.id,
                device_id = %device_id,
                kind = command.kind.as_str(),
                "enqueued device command"
            );
            (StatusCode::CREATED, Json(CommandResponse::from(command))).into_response()
        }
        Err(e) => {
            tracing::error!(error = ?e, "Failed to enqueue command");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to enqueue command",
            )
                .into_response()
        }
    }
}

fn parse_command_id(id: &str) -> Result<CommandId, (StatusCode, &'static str)> {
    Ulid::from_str(id)
        .map(CommandId)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid command ID"))
}

/// Acknowledge device-side execution of a command.
///
/// POST /api/commands/{id}/ack
pub async fn ack_command<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::DeviceWriter) {
        return (e.status(), e.to_string()).into_response();
    }

    let command_id = match parse_command_id(&id) {
        Ok(command_id) => command_id,
        Err((status, message)) => return (status, message).into_response(),
    };

    let now = state.clock.now();
    match state.queue.mark_executed(command_id, now).await {
        Ok(ExecutionOutcome::Executed) => (
            StatusCode::OK,
            Json(CommandOutcomeResponse {
                message_id: command_id.to_string(),
                outcome: "executed".to_string(),
            }),
        )
            .into_response(),
        // benign: redelivery on an at-least-once transport
        Ok(ExecutionOutcome::AlreadyExecuted) => (
            StatusCode::OK,
            Json(CommandOutcomeResponse {
                message_id: command_id.to_string(),
                outcome: "already_executed".to_string(),
            }),
        )
            .into_response(),
        Ok(ExecutionOutcome::NotFound) => {
            (StatusCode::NOT_FOUND, "Command not found").into_response()
        }
        Err(e) => {
            tracing::error!(error = ?e, "Failed to acknowledge command");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to acknowledge command",
            )
                .into_response()
        }
    }
}

/// Cancel a pending command.
///
/// DELETE /api/commands/{id}
pub async fn cancel_command<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Admin) {
        return (e.status(), e.to_string()).into_response();
    }

    let command_id = match parse_command_id(&id) {
        Ok(command_id) => command_id,
        Err((status, message)) => return (status, message).into_response(),
    };

    match state.queue.cancel(command_id).await {
        Ok(CancelOutcome::Cancelled) => (
            StatusCode::OK,
            Json(CommandOutcomeResponse {
                message_id: command_id.to_string(),
                outcome: "cancelled".to_string(),
            }),
        )
            .into_response(),
        Ok(CancelOutcome::AlreadyExecuted) => (
            StatusCode::CONFLICT,
            "Command already executed; cancellation refused",
        )
            .into_response(),
        Ok(CancelOutcome::NotFound) => {
            (StatusCode::NOT_FOUND, "Command not found").into_response()
        }
        Err(e) => {
            tracing::error!(error = ?e, "Failed to cancel command");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to cancel command").into_response()
        }
    }
}
