use std::ops::RangeInclusive;

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

pub mod clock;
pub mod health;

pub use clock::{Clock, ManualClock, SystemClock};
pub use health::{HealthPolicy, HealthState};

type BoxStr = Box<str>;
type BoxList<T> = Box<[T]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasurementId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Ulid);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What a sensor reading measures.
///
/// The wire protocol carries this as a numeric `typeId`; unknown ids map to
/// `Undefined` rather than failing the whole envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementType {
    Temperature,
    Humidity,
    Light,
    Motion,
    Pressure,
    Undefined,
}

impl MeasurementType {
    pub const ALL: [MeasurementType; 6] = [
        MeasurementType::Temperature,
        MeasurementType::Humidity,
        MeasurementType::Light,
        MeasurementType::Motion,
        MeasurementType::Pressure,
        MeasurementType::Undefined,
    ];

    pub fn from_type_id(id: i64) -> Self {
        match id {
            1 => MeasurementType::Temperature,
            2 => MeasurementType::Humidity,
            3 => MeasurementType::Light,
            4 => MeasurementType::Motion,
            5 => MeasurementType::Pressure,
            _ => MeasurementType::Undefined,
        }
    }

    pub fn type_id(self) -> i64 {
        match self {
            MeasurementType::Temperature => 1,
            MeasurementType::Humidity => 2,
            MeasurementType::Light => 3,
            MeasurementType::Motion => 4,
            MeasurementType::Pressure => 5,
            MeasurementType::Undefined => 0,
        }
    }

    /// Human-readable name, as an explicit variant-to-string table.
    pub fn display_name(self) -> &'static str {
        match self {
            MeasurementType::Temperature => "Temperature",
            MeasurementType::Humidity => "Humidity",
            MeasurementType::Light => "Light",
            MeasurementType::Motion => "Motion",
            MeasurementType::Pressure => "Pressure",
            MeasurementType::Undefined => "Undefined",
        }
    }

    /// Physically plausible value range, used by ingestion validation.
    ///
    /// Units: Celsius, percent RH, lux, 0/1 motion flag, hPa.
    pub fn plausible_range(self) -> RangeInclusive<f64> {
        match self {
            MeasurementType::Temperature => -40.0..=85.0,
            MeasurementType::Humidity => 0.0..=100.0,
            MeasurementType::Light => 0.0..=200_000.0,
            MeasurementType::Motion => 0.0..=1.0,
            MeasurementType::Pressure => 300.0..=1100.0,
            MeasurementType::Undefined => f64::MIN..=f64::MAX,
        }
    }
}

/// One typed sensor reading at a point in time. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub sensor_id: SensorId,
    pub device_id: DeviceId,
    pub kind: MeasurementType,
    pub value: NotNan<f64>,
    pub timestamp: jiff::Timestamp,
}

/// Where an inbound batch entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestSource {
    IotHub,
    Rest,
    ExternalProvider,
}

/// Transient inbound unit of work: all measurements from one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementBatch {
    pub device_id: DeviceId,
    pub source: IngestSource,
    pub measurements: Vec<Measurement>,
}

impl MeasurementBatch {
    /// Latest timestamp carried by the batch, if it has any records.
    pub fn max_timestamp(&self) -> Option<jiff::Timestamp> {
        self.measurements.iter().map(|m| m.timestamp).max()
    }
}

/// Physical devices report their own telemetry; virtual devices derive
/// theirs from other devices on a slower cadence, so they tolerate longer
/// silence before counting as unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Physical,
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub kind: MeasurementType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: BoxStr,
    pub kind: DeviceKind,
    pub visible: bool,
    pub sensors: BoxList<Sensor>,
    pub provisioned_at: jiff::Timestamp,
}

impl Device {
    pub fn sensor(&self, id: SensorId) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id == id)
    }
}

/// Derived per-device view: computed from measurement/event history on
/// demand, never persisted as its own row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: Device,
    pub last_message: Option<jiff::Timestamp>,
    pub online_since: Option<jiff::Timestamp>,
    pub rebooted_on: Option<jiff::Timestamp>,
    pub health: HealthState,
    pub show_warning: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Viewer,
    DeviceWriter,
    Location,
}

/// Explicit identity context threaded through operations instead of an
/// ambient current-user lookup. Core code records who acted; whether they
/// were allowed to is the upstream authorizer's call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub subject: BoxStr,
    pub roles: BoxList<Role>,
}

impl CallerIdentity {
    pub fn new(subject: impl Into<BoxStr>, roles: impl Into<BoxList<Role>>) -> Self {
        Self {
            subject: subject.into(),
            roles: roles.into(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}
