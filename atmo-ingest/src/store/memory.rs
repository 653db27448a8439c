use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use atmo_core::{Device, DeviceId, Measurement, MeasurementBatch, SensorId};
use thiserror::Error;
use tokio::sync::RwLock;

use super::{BatchOutcome, DeviceDirectory, MeasurementStore, SensorBinding};

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("duplicate measurement for sensor {sensor_id} at {timestamp}")]
    Duplicate {
        sensor_id: SensorId,
        timestamp: jiff::Timestamp,
    },
}

/// In-memory measurement store.
///
/// Primarily intended for tests and as a reference implementation of the
/// MeasurementStore trait.
#[derive(Clone, Default)]
pub struct MemoryMeasurementStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    measurements: Vec<Measurement>,
    // natural key: (sensor, instant)
    seen: HashSet<(SensorId, i128)>,
}

impl MemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.measurements.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn natural_key(measurement: &Measurement) -> (SensorId, i128) {
    (measurement.sensor_id, measurement.timestamp.as_nanosecond())
}

#[async_trait]
impl MeasurementStore for MemoryMeasurementStore {
    type Error = MemoryStoreError;

    fn is_duplicate_error(error: &Self::Error) -> bool {
        matches!(error, MemoryStoreError::Duplicate { .. })
    }

    async fn add_batch(&self, batch: &MeasurementBatch) -> Result<BatchOutcome, Self::Error> {
        let mut inner = self.inner.write().await;

        let existing = batch
            .measurements
            .iter()
            .filter(|m| inner.seen.contains(&natural_key(m)))
            .count();

        if !batch.measurements.is_empty() && existing == batch.measurements.len() {
            return Ok(BatchOutcome::AlreadyApplied);
        }

        if let Some(clash) = batch
            .measurements
            .iter()
            .find(|m| inner.seen.contains(&natural_key(m)))
        {
            return Err(MemoryStoreError::Duplicate {
                sensor_id: clash.sensor_id,
                timestamp: clash.timestamp,
            });
        }

        for measurement in &batch.measurements {
            inner.seen.insert(natural_key(measurement));
            inner.measurements.push(measurement.clone());
        }

        Ok(BatchOutcome::Applied)
    }

    async fn last_message_time(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<jiff::Timestamp>, Self::Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .measurements
            .iter()
            .filter(|m| m.device_id == device_id)
            .map(|m| m.timestamp)
            .max())
    }

    async fn list_for_device(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<Measurement>, Self::Error> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Measurement> = inner
            .measurements
            .iter()
            .filter(|m| m.device_id == device_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);
        Ok(rows)
    }
}

/// In-memory sensor-to-device directory.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    bindings: Arc<RwLock<HashMap<SensorId, SensorBinding>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every sensor of the device.
    pub async fn register_device(&self, device: &Device) {
        let mut bindings = self.bindings.write().await;
        for sensor in device.sensors.iter() {
            bindings.insert(
                sensor.id,
                SensorBinding {
                    device_id: device.id,
                    kind: sensor.kind,
                },
            );
        }
    }

    pub async fn register_sensor(&self, sensor_id: SensorId, binding: SensorBinding) {
        self.bindings.write().await.insert(sensor_id, binding);
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    type Error = Infallible;

    async fn sensor_binding(
        &self,
        sensor_id: SensorId,
    ) -> Result<Option<SensorBinding>, Self::Error> {
        Ok(self.bindings.read().await.get(&sensor_id).copied())
    }
}
