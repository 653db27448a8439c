use atmo_core::{IngestSource, Role};
use atmo_ingest::store::{BatchOutcome, DeviceDirectory, MeasurementStore};
use atmo_ingest::{IngestError, IngestReport};
use atmo_queue::CommandQueue;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::identity::authorize;
use crate::registry::DeviceRegistry;

/// Response body for an accepted envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub device_id: String,
    pub accepted: usize,
    pub outcome: String,
    pub max_timestamp: Option<String>,
}

impl From<IngestReport> for IngestResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            device_id: report.device_id.to_string(),
            accepted: report.accepted,
            outcome: match report.outcome {
                BatchOutcome::Applied => "applied".to_string(),
                BatchOutcome::AlreadyApplied => "already_applied".to_string(),
            },
            max_timestamp: report.max_timestamp.map(|t| t.to_string()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IngestQuery {
    /// "rest" (default), "iot_hub" or "external": which delivery channel
    /// handed us the envelope.
    pub source: Option<String>,
}

fn parse_source(source: Option<&str>) -> Option<IngestSource> {
    match source {
        None | Some("rest") => Some(IngestSource::Rest),
        Some("iot_hub") => Some(IngestSource::IotHub),
        Some("external") => Some(IngestSource::ExternalProvider),
        Some(_) => None,
    }
}

/// Ingest a raw measurement envelope.
///
/// POST /api/ingest
pub async fn ingest_envelope<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Query(query): Query<IngestQuery>,
    body: Bytes,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    let identity = match authorize(&state.keys, &headers, Role::DeviceWriter) {
        Ok(identity) => identity,
        Err(e) => return (e.status(), e.to_string()).into_response(),
    };

    let Some(source) = parse_source(query.source.as_deref()) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Invalid source: {}", query.source.unwrap_or_default()),
        )
            .into_response();
    };

    let arrived_at = state.clock.now();

    match state
        .ingestor
        .ingest(&body, source, arrived_at, &identity)
        .await
    {
        Ok(report) => {
            // a fresh message invalidates any cached offline state
            if let Some(timestamp) = report.max_timestamp {
                state.watch.record_message(report.device_id, timestamp);
            }
            (StatusCode::ACCEPTED, Json(IngestResponse::from(report))).into_response()
        }
        Err(e) if e.is_client_error() => {
            let status = match &e {
                IngestError::Duplicate(_) => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to ingest envelope");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to ingest envelope").into_response()
        }
    }
}
