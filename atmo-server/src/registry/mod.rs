pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use atmo_core::{Device, DeviceId, SensorId};
use atmo_ingest::store::SensorBinding;

pub use memory::InMemoryDeviceRegistry;
pub use sqlite::{SqliteDeviceRegistry, SqliteRegistryError};

/// Owner of the device model: registration, lookup and the sensor index
/// ingestion validates against.
#[async_trait]
pub trait DeviceRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Insert or replace a device and its sensors.
    async fn register(&self, device: Device) -> Result<(), Self::Error>;

    async fn get(&self, id: DeviceId) -> Result<Option<Device>, Self::Error>;

    /// All devices; hidden ones only when `include_hidden` is set.
    async fn list(&self, include_hidden: bool) -> Result<Vec<Device>, Self::Error>;

    /// Returns false when the device does not exist.
    async fn set_visible(&self, id: DeviceId, visible: bool) -> Result<bool, Self::Error>;

    async fn sensor_binding(
        &self,
        sensor_id: SensorId,
    ) -> Result<Option<SensorBinding>, Self::Error>;
}
