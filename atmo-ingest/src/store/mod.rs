pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use atmo_core::{DeviceId, Measurement, MeasurementBatch, MeasurementType, SensorId};

pub use memory::{MemoryDirectory, MemoryMeasurementStore, MemoryStoreError};
pub use sqlite::{SqliteMeasurementStore, SqliteStoreError};

/// Result of handing a batch to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// All records were persisted.
    Applied,
    /// Every record was already present: a retried batch, absorbed as a
    /// no-op rather than reported as an error.
    AlreadyApplied,
}

/// Persistence collaborator for ingested measurements.
///
/// `add_batch` is atomic: either the whole batch lands or none of it does.
/// A batch that partially overlaps already-persisted records must fail, so
/// per-sensor time series stay gap-free and auditable.
#[async_trait]
pub trait MeasurementStore: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether a backend error reports a natural-key duplicate, so callers
    /// can classify it as client-caused rather than transient.
    fn is_duplicate_error(error: &Self::Error) -> bool;

    async fn add_batch(&self, batch: &MeasurementBatch) -> Result<BatchOutcome, Self::Error>;

    /// Maximum persisted measurement timestamp for the device.
    async fn last_message_time(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<jiff::Timestamp>, Self::Error>;

    /// Newest-first read of a device's measurements.
    async fn list_for_device(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<Measurement>, Self::Error>;
}

/// What a registered sensor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorBinding {
    pub device_id: DeviceId,
    pub kind: MeasurementType,
}

/// The narrow device-model lookup ingestion validation needs.
#[async_trait]
pub trait DeviceDirectory: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn sensor_binding(
        &self,
        sensor_id: SensorId,
    ) -> Result<Option<SensorBinding>, Self::Error>;
}
