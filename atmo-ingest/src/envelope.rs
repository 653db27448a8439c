use atmo_core::{DeviceId, IngestSource, MeasurementType, SensorId};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Client-caused parse failure: reject, log, never retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed payload: {0}")]
pub struct MalformedPayload(pub String);

/// One record as it appeared on the wire, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurement {
    pub sensor_id: SensorId,
    pub value: f64,
    pub kind: MeasurementType,
    /// Device-asserted timestamp; absent records are stamped with the
    /// arrival instant by the ingestor.
    pub timestamp: Option<jiff::Timestamp>,
}

/// A parsed inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    pub device_id: DeviceId,
    pub source: IngestSource,
    pub measurements: Vec<RawMeasurement>,
}

/// Parse an inbound measurement envelope.
///
/// Key matching is case-insensitive: `deviceIdentifier`, `DeviceIdentifier`
/// and `deviceidentifier` are the same field. Unknown keys are ignored.
///
/// ```
/// use atmo_core::IngestSource;
/// use atmo_ingest::parse_envelope;
///
/// let payload = br#"{
///     "deviceIdentifier": "7f1f3a52-08ad-4f4c-9f3b-111111111111",
///     "measurements": [
///         { "sensorIdentifier": "7f1f3a52-08ad-4f4c-9f3b-222222222222",
///           "sensorValue": 21.5,
///           "typeId": 1 }
///     ]
/// }"#;
/// let envelope = parse_envelope(payload, IngestSource::Rest).unwrap();
/// assert_eq!(envelope.measurements.len(), 1);
/// ```
pub fn parse_envelope(
    payload: &[u8],
    source: IngestSource,
) -> Result<RawEnvelope, MalformedPayload> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| MalformedPayload(format!("invalid JSON: {e}")))?;

    let root = as_object(&value, "envelope")?;

    let device_id = DeviceId(required_uuid(root, "deviceIdentifier")?);

    let raw_measurements = match field_ci(root, "measurements") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(MalformedPayload("'measurements' must be an array".into()));
        }
        None => return Err(MalformedPayload("missing field 'measurements'".into())),
    };

    let mut measurements = Vec::with_capacity(raw_measurements.len());
    for (index, item) in raw_measurements.iter().enumerate() {
        measurements.push(
            parse_measurement(item)
                .map_err(|MalformedPayload(msg)| {
                    MalformedPayload(format!("measurements[{index}]: {msg}"))
                })?,
        );
    }

    Ok(RawEnvelope {
        device_id,
        source,
        measurements,
    })
}

fn parse_measurement(value: &Value) -> Result<RawMeasurement, MalformedPayload> {
    let record = as_object(value, "measurement")?;

    let sensor_id = SensorId(required_uuid(record, "sensorIdentifier")?);

    let value = match field_ci(record, "sensorValue") {
        Some(v) => v
            .as_f64()
            .ok_or_else(|| MalformedPayload("'sensorValue' must be a number".into()))?,
        None => return Err(MalformedPayload("missing field 'sensorValue'".into())),
    };

    let kind = match field_ci(record, "typeId") {
        Some(v) => {
            let id = v
                .as_i64()
                .ok_or_else(|| MalformedPayload("'typeId' must be an integer".into()))?;
            MeasurementType::from_type_id(id)
        }
        None => return Err(MalformedPayload("missing field 'typeId'".into())),
    };

    let timestamp = match field_ci(record, "timestamp") {
        Some(Value::Null) | None => None,
        Some(Value::String(text)) => Some(text.parse::<jiff::Timestamp>().map_err(|e| {
            MalformedPayload(format!("'timestamp' is not an ISO-8601 instant: {e}"))
        })?),
        Some(_) => {
            return Err(MalformedPayload(
                "'timestamp' must be an ISO-8601 string".into(),
            ));
        }
    };

    Ok(RawMeasurement {
        sensor_id,
        value,
        kind,
        timestamp,
    })
}

/// Case-insensitive field lookup over a JSON object.
fn field_ci<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn as_object<'a>(
    value: &'a Value,
    what: &str,
) -> Result<&'a Map<String, Value>, MalformedPayload> {
    value
        .as_object()
        .ok_or_else(|| MalformedPayload(format!("{what} must be a JSON object")))
}

fn required_uuid(object: &Map<String, Value>, key: &str) -> Result<Uuid, MalformedPayload> {
    let text = match field_ci(object, key) {
        Some(Value::String(text)) => text,
        Some(_) => return Err(MalformedPayload(format!("'{key}' must be a string"))),
        None => return Err(MalformedPayload(format!("missing field '{key}'"))),
    };

    Uuid::parse_str(text).map_err(|_| MalformedPayload(format!("'{key}' is not a valid UUID")))
}
