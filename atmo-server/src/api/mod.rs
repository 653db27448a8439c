pub mod commands;
pub mod devices;
pub mod ingest;

use std::sync::Arc;

use atmo_core::{Clock, HealthPolicy};
use atmo_ingest::Ingestor;
use atmo_ingest::store::{DeviceDirectory, MeasurementStore};
use atmo_notify::ConnectionWatch;
use atmo_queue::CommandQueue;
use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::identity::ApiKeys;
use crate::registry::DeviceRegistry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState<R, S, Q>
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    pub registry: R,
    pub ingestor: Ingestor<S, R>,
    pub queue: Q,
    pub watch: Arc<ConnectionWatch>,
    pub policy: HealthPolicy,
    pub clock: Arc<dyn Clock>,
    pub keys: Arc<ApiKeys>,
}

/// Create the full API router with all endpoints.
pub fn api_router<R, S, Q>(state: ApiState<R, S, Q>) -> Router
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    Router::new()
        .route("/api/ingest", post(ingest::ingest_envelope::<R, S, Q>))
        .route("/api/devices", post(devices::register_device::<R, S, Q>))
        .route("/api/devices", get(devices::list_devices::<R, S, Q>))
        .route("/api/devices/{id}", get(devices::get_device::<R, S, Q>))
        .route(
            "/api/devices/{id}/info",
            get(devices::get_device_info::<R, S, Q>),
        )
        .route(
            "/api/devices/{id}/measurements",
            get(devices::list_measurements::<R, S, Q>),
        )
        .route(
            "/api/devices/{id}/visibility",
            post(devices::set_visibility::<R, S, Q>),
        )
        .route(
            "/api/devices/{id}/commands",
            post(commands::enqueue_command::<R, S, Q>),
        )
        .route(
            "/api/commands/{id}/ack",
            post(commands::ack_command::<R, S, Q>),
        )
        .route(
            "/api/commands/{id}",
            delete(commands::cancel_command::<R, S, Q>),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}
