use atmo_core::{
    Device, DeviceId, DeviceInfo, DeviceKind, Measurement, MeasurementType, Role, Sensor, SensorId,
};
use atmo_ingest::store::{DeviceDirectory, MeasurementStore};
use atmo_queue::{CommandKind, CommandQueue};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiState;
use crate::identity::authorize;
use crate::registry::DeviceRegistry;

/// Request body for registering a new device.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    /// Optional ID. If not provided, a new UUID will be generated.
    pub id: Option<Uuid>,
    pub name: String,
    /// "physical" (default) or "virtual".
    pub kind: Option<String>,
    /// Hidden devices are excluded from default listings.
    pub visible: Option<bool>,
    #[serde(default)]
    pub sensors: Vec<SensorRequest>,
}

/// Request body for a sensor.
#[derive(Debug, Serialize, Deserialize)]
pub struct SensorRequest {
    /// Optional ID. If not provided, a new UUID will be generated.
    pub id: Option<Uuid>,
    /// Wire measurement type id (1-5).
    pub type_id: i64,
}

/// Response body for a sensor.
#[derive(Debug, Serialize, Deserialize)]
pub struct SensorResponse {
    pub id: String,
    pub type_id: i64,
    pub kind: String,
}

impl From<&Sensor> for SensorResponse {
    fn from(s: &Sensor) -> Self {
        Self {
            id: s.id.to_string(),
            type_id: s.kind.type_id(),
            kind: s.kind.display_name().to_string(),
        }
    }
}

/// Response body for a device.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub visible: bool,
    pub provisioned_at: String,
    pub sensors: Vec<SensorResponse>,
}

impl From<Device> for DeviceResponse {
    fn from(d: Device) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.to_string(),
            kind: match d.kind {
                DeviceKind::Physical => "physical".to_string(),
                DeviceKind::Virtual => "virtual".to_string(),
            },
            visible: d.visible,
            provisioned_at: d.provisioned_at.to_string(),
            sensors: d.sensors.iter().map(SensorResponse::from).collect(),
        }
    }
}

/// Response body for list of devices.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListDevicesResponse {
    pub devices: Vec<DeviceResponse>,
    pub total: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListDevicesQuery {
    #[serde(default)]
    pub include_hidden: bool,
}

/// Response body for the derived device view.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceInfoResponse {
    pub device: DeviceResponse,
    pub last_message: Option<String>,
    pub online_since: Option<String>,
    pub rebooted_on: Option<String>,
    pub health: String,
    pub show_warning: bool,
}

impl From<DeviceInfo> for DeviceInfoResponse {
    fn from(info: DeviceInfo) -> Self {
        Self {
            device: DeviceResponse::from(info.device),
            last_message: info.last_message.map(|t| t.to_string()),
            online_since: info.online_since.map(|t| t.to_string()),
            rebooted_on: info.rebooted_on.map(|t| t.to_string()),
            health: format!("{:?}", info.health),
            show_warning: info.show_warning,
        }
    }
}

/// Response body for one measurement.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeasurementResponse {
    pub id: String,
    pub sensor_id: String,
    pub type_id: i64,
    pub kind: String,
    pub value: f64,
    pub timestamp: String,
}

impl From<Measurement> for MeasurementResponse {
    fn from(m: Measurement) -> Self {
        Self {
            id: m.id.0.to_string(),
            sensor_id: m.sensor_id.to_string(),
            type_id: m.kind.type_id(),
            kind: m.kind.display_name().to_string(),
            value: m.value.into_inner(),
            timestamp: m.timestamp.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListMeasurementsResponse {
    pub measurements: Vec<MeasurementResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListMeasurementsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetVisibilityRequest {
    pub visible: bool,
}

fn parse_device_kind(kind: Option<&str>) -> Option<DeviceKind> {
    match kind {
        None | Some("physical") => Some(DeviceKind::Physical),
        Some("virtual") => Some(DeviceKind::Virtual),
        Some(_) => None,
    }
}

fn parse_device_id(id: &str) -> Result<DeviceId, (StatusCode, &'static str)> {
    Uuid::parse_str(id)
        .map(DeviceId)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid device ID"))
}

/// Register a new device.
///
/// POST /api/devices
pub async fn register_device<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Json(request): Json<RegisterDeviceRequest>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Admin) {
        return (e.status(), e.to_string()).into_response();
    }

    let Some(kind) = parse_device_kind(request.kind.as_deref()) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Invalid device kind: {}", request.kind.unwrap_or_default()),
        )
            .into_response();
    };

    let mut sensors = Vec::with_capacity(request.sensors.len());
    for sensor_req in request.sensors {
        let sensor_kind = MeasurementType::from_type_id(sensor_req.type_id);
        if sensor_kind == MeasurementType::Undefined && sensor_req.type_id != 0 {
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid sensor type id: {}", sensor_req.type_id),
            )
                .into_response();
        }
        sensors.push(Sensor {
            id: SensorId(sensor_req.id.unwrap_or_else(Uuid::new_v4)),
            kind: sensor_kind,
        });
    }

    let device = Device {
        id: DeviceId(request.id.unwrap_or_else(Uuid::new_v4)),
        name: request.name.into_boxed_str(),
        kind,
        visible: request.visible.unwrap_or(true),
        sensors: sensors.into_boxed_slice(),
        provisioned_at: state.clock.now(),
    };

    match state.registry.register(device.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(DeviceResponse::from(device))).into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to register device");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to register device",
            )
                .into_response()
        }
    }
}

/// Get a device by ID.
///
/// GET /api/devices/{id}
pub async fn get_device<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Viewer) {
        return (e.status(), e.to_string()).into_response();
    }

    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err((status, message)) => return (status, message).into_response(),
    };

    match state.registry.get(device_id).await {
        Ok(Some(device)) => (StatusCode::OK, Json(DeviceResponse::from(device))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Device not found").into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to get device");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get device").into_response()
        }
    }
}

/// List devices.
///
/// GET /api/devices
pub async fn list_devices<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Query(query): Query<ListDevicesQuery>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Viewer) {
        return (e.status(), e.to_string()).into_response();
    }

    match state.registry.list(query.include_hidden).await {
        Ok(devices) => {
            let total = devices.len();
            let response = ListDevicesResponse {
                devices: devices.into_iter().map(DeviceResponse::from).collect(),
                total,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = ?e, "Failed to list devices");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list devices").into_response()
        }
    }
}

/// Derived device view: last message, health, reboot and online-since info.
///
/// GET /api/devices/{id}/info
pub async fn get_device_info<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Viewer) {
        return (e.status(), e.to_string()).into_response();
    }

    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err((status, message)) => return (status, message).into_response(),
    };

    let device = match state.registry.get(device_id).await {
        Ok(Some(device)) => device,
        Ok(None) => return (StatusCode::NOT_FOUND, "Device not found").into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to get device");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get device").into_response();
        }
    };

    let last_message = match state.ingestor.store().last_message_time(device_id).await {
        Ok(last_message) => last_message,
        Err(e) => {
            tracing::error!(error = ?e, "Failed to read last message time");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read last message time",
            )
                .into_response();
        }
    };

    let rebooted_on = match state
        .queue
        .last_executed(device_id, CommandKind::Reboot)
        .await
    {
        Ok(rebooted_on) => rebooted_on,
        Err(e) => {
            tracing::error!(error = ?e, "Failed to read command history");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read command history",
            )
                .into_response();
        }
    };

    let now = state.clock.now();
    let health = state.policy.evaluate(
        now,
        last_message,
        device.kind,
        state.watch.warning_since(device_id),
    );

    let info = DeviceInfo {
        device,
        last_message,
        online_since: state.watch.connected_since(device_id),
        rebooted_on,
        health,
        show_warning: health.show_warning(),
    };

    (StatusCode::OK, Json(DeviceInfoResponse::from(info))).into_response()
}

/// Newest-first measurements for a device.
///
/// GET /api/devices/{id}/measurements
pub async fn list_measurements<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ListMeasurementsQuery>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Viewer) {
        return (e.status(), e.to_string()).into_response();
    }

    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err((status, message)) => return (status, message).into_response(),
    };

    let limit = query.limit.unwrap_or(100).min(1_000);

    match state.ingestor.store().list_for_device(device_id, limit).await {
        Ok(measurements) => {
            let response = ListMeasurementsResponse {
                measurements: measurements
                    .into_iter()
                    .map(MeasurementResponse::from)
                    .collect(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = ?e, "Failed to list measurements");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list measurements",
            )
                .into_response()
        }
    }
}

/// Show or hide a device in listings.
///
/// POST /api/devices/{id}/visibility
pub async fn set_visibility<R, S, Q>(
    State(state): State<ApiState<R, S, Q>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<SetVisibilityRequest>,
) -> impl IntoResponse
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    if let Err(e) = authorize(&state.keys, &headers, Role::Admin) {
        return (e.status(), e.to_string()).into_response();
    }

    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err((status, message)) => return (status, message).into_response(),
    };

    match state.registry.set_visible(device_id, request.visible).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Device not found").into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to update device visibility");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update device visibility",
            )
                .into_response()
        }
    }
}
