use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use atmo_core::{Device, DeviceId, SensorId};
use atmo_ingest::store::{DeviceDirectory, SensorBinding};
use tokio::sync::RwLock;

use super::DeviceRegistry;

#[derive(Clone, Default)]
pub struct InMemoryDeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceId, Device>>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    type Error = Infallible;

    async fn register(&self, device: Device) -> Result<(), Self::Error> {
        let mut devices = self.devices.write().await;
        let _ = devices.insert(device.id, device);
        Ok(())
    }

    async fn get(&self, id: DeviceId) -> Result<Option<Device>, Self::Error> {
        let devices = self.devices.read().await;
        Ok(devices.get(&id).cloned())
    }

    async fn list(&self, include_hidden: bool) -> Result<Vec<Device>, Self::Error> {
        let devices = self.devices.read().await;
        let mut listed: Vec<Device> = devices
            .values()
            .filter(|d| include_hidden || d.visible)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.provisioned_at.cmp(&b.provisioned_at));
        Ok(listed)
    }

    async fn set_visible(&self, id: DeviceId, visible: bool) -> Result<bool, Self::Error> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(&id) {
            Some(device) => {
                device.visible = visible;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sensor_binding(
        &self,
        sensor_id: SensorId,
    ) -> Result<Option<SensorBinding>, Self::Error> {
        let devices = self.devices.read().await;
        Ok(devices.values().find_map(|device| {
            device.sensor(sensor_id).map(|sensor| SensorBinding {
                device_id: device.id,
                kind: sensor.kind,
            })
        }))
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceRegistry {
    type Error = Infallible;

    async fn sensor_binding(
        &self,
        sensor_id: SensorId,
    ) -> Result<Option<SensorBinding>, Self::Error> {
        DeviceRegistry::sensor_binding(self, sensor_id).await
    }
}

#[cfg(test)]
mod tests {
    use atmo_core::{DeviceKind, MeasurementType, Sensor};
    use uuid::Uuid;

    use super::*;

    fn mock_device(name: &str, visible: bool) -> Device {
        Device {
            id: DeviceId(Uuid::new_v4()),
            name: name.into(),
            kind: DeviceKind::Physical,
            visible,
            sensors: Box::new([Sensor {
                id: SensorId(Uuid::new_v4()),
                kind: MeasurementType::Temperature,
            }]),
            provisioned_at: jiff::Timestamp::from_second(0).unwrap(),
        }
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = InMemoryDeviceRegistry::new();
        let device = mock_device("porch", true);

        registry.register(device.clone()).await.unwrap();

        let fetched = registry.get(device.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, device.name);
    }

    #[tokio::test]
    async fn list_honors_visibility() {
        let registry = InMemoryDeviceRegistry::new();
        registry.register(mock_device("visible", true)).await.unwrap();
        registry.register(mock_device("hidden", false)).await.unwrap();

        assert_eq!(registry.list(false).await.unwrap().len(), 1);
        assert_eq!(registry.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn set_visible_reports_missing_devices() {
        let registry = InMemoryDeviceRegistry::new();
        let device = mock_device("porch", true);
        registry.register(device.clone()).await.unwrap();

        assert!(registry.set_visible(device.id, false).await.unwrap());
        assert_eq!(registry.list(false).await.unwrap().len(), 0);

        let missing = DeviceId(Uuid::new_v4());
        assert!(!registry.set_visible(missing, true).await.unwrap());
    }

    #[tokio::test]
    async fn sensor_binding_resolves_owner() {
        let registry = InMemoryDeviceRegistry::new();
        let device = mock_device("porch", true);
        let sensor_id = device.sensors[0].id;
        registry.register(device.clone()).await.unwrap();

        let binding = DeviceRegistry::sensor_binding(&registry, sensor_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(binding.device_id, device.id);
        assert_eq!(binding.kind, MeasurementType::Temperature);

        let unknown = SensorId(Uuid::new_v4());
        assert!(
            DeviceRegistry::sensor_binding(&registry, unknown)
                .await
                .unwrap()
                .is_none()
        );
    }
}
