use std::sync::Arc;

use atmo_core::{
    CallerIdentity, Clock, Device, DeviceId, DeviceKind, IngestSource, MeasurementType, Role,
    Sensor, SensorId,
};
use atmo_ingest::Ingestor;
use atmo_ingest::store::{DeviceDirectory, MeasurementStore};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SimulatorConfig;
use crate::registry::DeviceRegistry;

/// Development telemetry generator: provisions a handful of fake devices
/// and pushes random envelopes through the regular ingestion path.
pub struct Simulator<R, S> {
    registry: R,
    ingestor: Ingestor<S, R>,
    clock: Arc<dyn Clock>,
    config: SimulatorConfig,
}

impl<R, S> Simulator<R, S>
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
{
    pub fn new(
        registry: R,
        ingestor: Ingestor<S, R>,
        clock: Arc<dyn Clock>,
        config: SimulatorConfig,
    ) -> Self {
        Self {
            registry,
            ingestor,
            clock,
            config,
        }
    }

    async fn provision(&self) -> Result<Vec<Device>, <R as DeviceRegistry>::Error> {
        let mut devices = Vec::with_capacity(self.config.device_count);

        for index in 0..self.config.device_count {
            let device = Device {
                id: DeviceId(Uuid::new_v4()),
                name: format!("sim-{index}").into_boxed_str(),
                kind: DeviceKind::Physical,
                visible: true,
                sensors: Box::new([
                    Sensor {
                        id: SensorId(Uuid::new_v4()),
                        kind: MeasurementType::Temperature,
                    },
                    Sensor {
                        id: SensorId(Uuid::new_v4()),
                        kind: MeasurementType::Humidity,
                    },
                ]),
                provisioned_at: self.clock.now(),
            };

            self.registry.register(device.clone()).await?;
            devices.push(device);
        }

        Ok(devices)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let devices = match self.provision().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = ?e, "simulator failed to provision devices");
                return;
            }
        };

        info!(
            device_count = devices.len(),
            interval_secs = self.config.interval_secs,
            "Starting telemetry simulator"
        );

        let identity = CallerIdentity::new("simulator", [Role::DeviceWriter]);
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("telemetry simulator shutting down");
                    break;
                }
                _ = interval.tick() => {
                    for device in &devices {
                        let payload = generate_envelope(device);
                        let arrived_at = self.clock.now();
                        if let Err(e) = self
                            .ingestor
                            .ingest(&payload, IngestSource::Rest, arrived_at, &identity)
                            .await
                        {
                            warn!(device_id = %device.id, error = %e, "simulated ingest failed");
                        }
                    }
                }
            }
        }
    }
}

fn generate_envelope(device: &Device) -> Vec<u8> {
    let mut rng = rand::rng();

    let measurements: Vec<serde_json::Value> = device
        .sensors
        .iter()
        .map(|sensor| {
            let value = match sensor.kind {
                MeasurementType::Temperature => rng.random_range(15.0..30.0),
                MeasurementType::Humidity => rng.random_range(30.0..90.0),
                MeasurementType::Light => rng.random_range(0.0..20_000.0),
                MeasurementType::Motion => f64::from(rng.random_range(0..=1)),
                MeasurementType::Pressure => rng.random_range(980.0..1_030.0),
                MeasurementType::Undefined => rng.random_range(0.0..1.0),
            };

            serde_json::json!({
                "sensorIdentifier": sensor.id.to_string(),
                "sensorValue": value,
                "typeId": sensor.kind.type_id(),
            })
        })
        .collect();

    let envelope = serde_json::json!({
        "deviceIdentifier": device.id.to_string(),
        "measurements": measurements,
    });

    serde_json::to_vec(&envelope).unwrap_or_default()
}
