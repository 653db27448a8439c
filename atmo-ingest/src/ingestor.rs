use std::collections::HashSet;

use atmo_core::{
    CallerIdentity, DeviceId, IngestSource, Measurement, MeasurementBatch, MeasurementId,
    MeasurementType, SensorId,
};
use ordered_float::NotNan;
use thiserror::Error;
use ulid::Ulid;

use crate::envelope::{MalformedPayload, parse_envelope};
use crate::store::{BatchOutcome, DeviceDirectory, MeasurementStore};

/// Per-record constraint violation. Any single failure rejects the whole
/// batch; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("unknown sensor {0}")]
    UnknownSensor(SensorId),
    #[error("sensor {sensor_id} belongs to device {owner}, not {claimed}")]
    ForeignSensor {
        sensor_id: SensorId,
        owner: DeviceId,
        claimed: DeviceId,
    },
    #[error("sensor {sensor_id} is registered as {registered:?}, payload says {claimed:?}")]
    TypeMismatch {
        sensor_id: SensorId,
        registered: MeasurementType,
        claimed: MeasurementType,
    },
    #[error("value {value} outside plausible range for {kind:?}")]
    OutOfRange {
        sensor_id: SensorId,
        kind: MeasurementType,
        value: f64,
    },
    #[error("value {0} is not finite")]
    NotFinite(f64),
    #[error("duplicate reading for sensor {sensor_id} at {timestamp} within the batch")]
    DuplicateInBatch {
        sensor_id: SensorId,
        timestamp: jiff::Timestamp,
    },
}

#[derive(Debug, Error)]
pub enum IngestError<SE, DE>
where
    SE: std::error::Error,
    DE: std::error::Error,
{
    #[error(transparent)]
    Malformed(#[from] MalformedPayload),
    #[error(transparent)]
    Validation(ValidationFailure),
    /// Part of the batch was already persisted. A fully-applied batch is
    /// absorbed as a no-op instead; the partial case is a client error.
    #[error("batch overlaps already-persisted measurements: {0}")]
    Duplicate(SE),
    #[error("measurement store: {0}")]
    Store(SE),
    #[error("device directory: {0}")]
    Directory(DE),
}

impl<SE, DE> IngestError<SE, DE>
where
    SE: std::error::Error,
    DE: std::error::Error,
{
    /// Client-caused failures must not be retried by the transport.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::Malformed(_) | IngestError::Validation(_) | IngestError::Duplicate(_)
        )
    }
}

/// What a successful ingestion did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub device_id: DeviceId,
    pub accepted: usize,
    /// Latest timestamp in the batch; callers use it to refresh any cached
    /// device connection state.
    pub max_timestamp: Option<jiff::Timestamp>,
    pub outcome: BatchOutcome,
}

/// Measurement-ingestion pipeline: parse, stamp, validate, persist.
#[derive(Clone)]
pub struct Ingestor<S, D> {
    store: S,
    directory: D,
}

impl<S, D> Ingestor<S, D>
where
    S: MeasurementStore,
    D: DeviceDirectory,
{
    pub fn new(store: S, directory: D) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest one raw envelope.
    ///
    /// `arrived_at` is the externally supplied arrival instant; records
    /// without a device-asserted timestamp are stamped with it, so the time
    /// axis never depends on device clock skew. The batch is persisted
    /// atomically: one bad record rejects everything.
    pub async fn ingest(
        &self,
        payload: &[u8],
        source: IngestSource,
        arrived_at: jiff::Timestamp,
        identity: &CallerIdentity,
    ) -> Result<IngestReport, IngestError<S::Error, D::Error>> {
        let envelope = parse_envelope(payload, source)?;
        let device_id = envelope.device_id;

        let mut measurements = Vec::with_capacity(envelope.measurements.len());
        let mut keys: HashSet<(SensorId, i128)> = HashSet::new();

        for raw in &envelope.measurements {
            let binding = self
                .directory
                .sensor_binding(raw.sensor_id)
                .await
                .map_err(IngestError::Directory)?
                .ok_or(IngestError::Validation(ValidationFailure::UnknownSensor(
                    raw.sensor_id,
                )))?;

            if binding.device_id != device_id {
                return Err(IngestError::Validation(ValidationFailure::ForeignSensor {
                    sensor_id: raw.sensor_id,
                    owner: binding.device_id,
                    claimed: device_id,
                }));
            }

            if raw.kind != MeasurementType::Undefined
                && binding.kind != MeasurementType::Undefined
                && raw.kind != binding.kind
            {
                return Err(IngestError::Validation(ValidationFailure::TypeMismatch {
                    sensor_id: raw.sensor_id,
                    registered: binding.kind,
                    claimed: raw.kind,
                }));
            }

            let value = NotNan::new(raw.value)
                .map_err(|_| IngestError::Validation(ValidationFailure::NotFinite(raw.value)))?;

            if !raw.kind.plausible_range().contains(&raw.value) {
                return Err(IngestError::Validation(ValidationFailure::OutOfRange {
                    sensor_id: raw.sensor_id,
                    kind: raw.kind,
                    value: raw.value,
                }));
            }

            let timestamp = raw.timestamp.unwrap_or(arrived_at);

            if !keys.insert((raw.sensor_id, timestamp.as_nanosecond())) {
                return Err(IngestError::Validation(
                    ValidationFailure::DuplicateInBatch {
                        sensor_id: raw.sensor_id,
                        timestamp,
                    },
                ));
            }

            measurements.push(Measurement {
                id: MeasurementId(Ulid::new()),
                sensor_id: raw.sensor_id,
                device_id,
                kind: raw.kind,
                value,
                timestamp,
            });
        }

        let batch = MeasurementBatch {
            device_id,
            source,
            measurements,
        };

        let outcome = self.store.add_batch(&batch).await.map_err(|e| {
            if S::is_duplicate_error(&e) {
                IngestError::Duplicate(e)
            } else {
                IngestError::Store(e)
            }
        })?;

        let report = IngestReport {
            device_id,
            accepted: batch.measurements.len(),
            max_timestamp: batch.max_timestamp(),
            outcome,
        };

        tracing::info!(
            device_id = %device_id,
            source = ?source,
            accepted = report.accepted,
            outcome = ?outcome,
            subject = %identity.subject,
            "ingested measurement batch"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use atmo_core::{Device, DeviceKind, Role, Sensor};
    use uuid::Uuid;

    use super::*;
    use crate::store::{MemoryDirectory, MemoryMeasurementStore};

    fn writer() -> CallerIdentity {
        CallerIdentity::new("test-writer", [Role::DeviceWriter])
    }

    fn ts(text: &str) -> jiff::Timestamp {
        text.parse().unwrap()
    }

    fn device_with_sensors(sensors: &[(SensorId, MeasurementType)]) -> Device {
        Device {
            id: DeviceId(Uuid::new_v4()),
            name: "greenhouse-east".into(),
            kind: DeviceKind::Physical,
            visible: true,
            sensors: sensors
                .iter()
                .map(|&(id, kind)| Sensor { id, kind })
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            provisioned_at: ts("2024-01-01T00:00:00Z"),
        }
    }

    async fn fixture() -> (Ingestor<MemoryMeasurementStore, MemoryDirectory>, Device, SensorId)
    {
        let sensor_id = SensorId(Uuid::new_v4());
        let device = device_with_sensors(&[(sensor_id, MeasurementType::Temperature)]);

        let directory = MemoryDirectory::new();
        directory.register_device(&device).await;

        let ingestor = Ingestor::new(MemoryMeasurementStore::new(), directory);
        (ingestor, device, sensor_id)
    }

    fn envelope_json(device: &Device, sensor: SensorId, value: f64, timestamp: Option<&str>) -> Vec<u8> {
        let timestamp = match timestamp {
            Some(t) => format!(r#", "timestamp": "{t}""#),
            None => String::new(),
        };
        format!(
            r#"{{
                "deviceIdentifier": "{}",
                "measurements": [
                    {{ "sensorIdentifier": "{}", "sensorValue": {value}, "typeId": 1{timestamp} }}
                ]
            }}"#,
            device.id.0, sensor.0
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn stamps_arrival_time_when_record_has_none() {
        let (ingestor, device, sensor) = fixture().await;
        let arrived = ts("2024-06-01T12:00:00Z");

        let report = ingestor
            .ingest(
                &envelope_json(&device, sensor, 21.5, None),
                IngestSource::IotHub,
                arrived,
                &writer(),
            )
            .await
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.max_timestamp, Some(arrived));
        assert_eq!(
            ingestor.store().last_message_time(device.id).await.unwrap(),
            Some(arrived)
        );
    }

    #[tokio::test]
    async fn keeps_explicit_record_timestamps() {
        let (ingestor, device, sensor) = fixture().await;
        let arrived = ts("2024-06-01T12:00:00Z");
        let asserted = "2024-06-01T11:58:30Z";

        let report = ingestor
            .ingest(
                &envelope_json(&device, sensor, 21.5, Some(asserted)),
                IngestSource::Rest,
                arrived,
                &writer(),
            )
            .await
            .unwrap();

        assert_eq!(report.max_timestamp, Some(ts(asserted)));
    }

    #[tokio::test]
    async fn last_message_time_is_batch_maximum() {
        let (ingestor, device, sensor) = fixture().await;

        let payload = format!(
            r#"{{
                "deviceIdentifier": "{}",
                "measurements": [
                    {{ "sensorIdentifier": "{sid}", "sensorValue": 20.0, "typeId": 1,
                       "timestamp": "2024-06-01T10:00:00Z" }},
                    {{ "sensorIdentifier": "{sid}", "sensorValue": 22.0, "typeId": 1,
                       "timestamp": "2024-06-01T10:05:00Z" }},
                    {{ "sensorIdentifier": "{sid}", "sensorValue": 21.0, "typeId": 1,
                       "timestamp": "2024-06-01T10:02:00Z" }}
                ]
            }}"#,
            device.id.0,
            sid = sensor.0
        );

        ingestor
            .ingest(
                payload.as_bytes(),
                IngestSource::Rest,
                ts("2024-06-01T12:00:00Z"),
                &writer(),
            )
            .await
            .unwrap();

        assert_eq!(
            ingestor.store().last_message_time(device.id).await.unwrap(),
            Some(ts("2024-06-01T10:05:00Z"))
        );
    }

    #[tokio::test]
    async fn unknown_sensor_rejects_whole_batch() {
        let (ingestor, device, sensor) = fixture().await;
        let stranger = SensorId(Uuid::new_v4());

        let payload = format!(
            r#"{{
                "deviceIdentifier": "{}",
                "measurements": [
                    {{ "sensorIdentifier": "{}", "sensorValue": 20.0, "typeId": 1 }},
                    {{ "sensorIdentifier": "{}", "sensorValue": 21.0, "typeId": 1 }}
                ]
            }}"#,
            device.id.0, sensor.0, stranger.0
        );

        let err = ingestor
            .ingest(
                payload.as_bytes(),
                IngestSource::Rest,
                ts("2024-06-01T12:00:00Z"),
                &writer(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Validation(ValidationFailure::UnknownSensor(id)) if id == stranger
        ));
        assert!(err.is_client_error());
        // zero records persisted
        assert_eq!(ingestor.store().len().await, 0);
    }

    #[tokio::test]
    async fn out_of_range_value_rejects_batch() {
        let (ingestor, device, sensor) = fixture().await;

        let err = ingestor
            .ingest(
                &envelope_json(&device, sensor, 4000.0, None),
                IngestSource::Rest,
                ts("2024-06-01T12:00:00Z"),
                &writer(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Validation(ValidationFailure::OutOfRange { .. })
        ));
        assert_eq!(ingestor.store().len().await, 0);
    }

    #[tokio::test]
    async fn duplicate_within_batch_rejects_batch() {
        let (ingestor, device, sensor) = fixture().await;

        let payload = format!(
            r#"{{
                "deviceIdentifier": "{}",
                "measurements": [
                    {{ "sensorIdentifier": "{sid}", "sensorValue": 20.0, "typeId": 1,
                       "timestamp": "2024-06-01T10:00:00Z" }},
                    {{ "sensorIdentifier": "{sid}", "sensorValue": 21.0, "typeId": 1,
                       "timestamp": "2024-06-01T10:00:00Z" }}
                ]
            }}"#,
            device.id.0,
            sid = sensor.0
        );

        let err = ingestor
            .ingest(
                payload.as_bytes(),
                IngestSource::Rest,
                ts("2024-06-01T12:00:00Z"),
                &writer(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Validation(ValidationFailure::DuplicateInBatch { .. })
        ));
        assert_eq!(ingestor.store().len().await, 0);
    }

    #[tokio::test]
    async fn retried_batch_is_a_no_op() {
        let (ingestor, device, sensor) = fixture().await;
        let payload = envelope_json(&device, sensor, 21.5, Some("2024-06-01T10:00:00Z"));

        let first = ingestor
            .ingest(&payload, IngestSource::IotHub, ts("2024-06-01T12:00:00Z"), &writer())
            .await
            .unwrap();
        assert_eq!(first.outcome, BatchOutcome::Applied);

        let retry = ingestor
            .ingest(&payload, IngestSource::IotHub, ts("2024-06-01T12:00:05Z"), &writer())
            .await
            .unwrap();
        assert_eq!(retry.outcome, BatchOutcome::AlreadyApplied);
        assert_eq!(ingestor.store().len().await, 1);
    }

    #[tokio::test]
    async fn sensor_of_other_device_rejects_batch() {
        let (ingestor, _device, _sensor) = fixture().await;

        // a second device whose sensor is claimed by the wrong envelope
        let other_sensor = SensorId(Uuid::new_v4());
        let other = device_with_sensors(&[(other_sensor, MeasurementType::Temperature)]);

        let claiming = device_with_sensors(&[]);

        // register both devices in the shared directory
        let directory = MemoryDirectory::new();
        directory.register_device(&other).await;
        let ingestor = Ingestor::new(ingestor.store().clone(), directory);

        let err = ingestor
            .ingest(
                &envelope_json(&claiming, other_sensor, 20.0, None),
                IngestSource::Rest,
                ts("2024-06-01T12:00:00Z"),
                &writer(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Validation(ValidationFailure::ForeignSensor { .. })
        ));
    }
}
