use std::sync::Arc;
use std::time::Duration;

use atmo_core::{Clock, HealthPolicy};
use atmo_ingest::store::MeasurementStore;
use atmo_notify::{ConnectionWatch, EmailTransport, Notifier};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::DeviceRegistry;

#[derive(Debug, Error)]
pub enum SweepError<RE, SE>
where
    RE: std::error::Error,
    SE: std::error::Error,
{
    #[error("device registry: {0}")]
    Registry(RE),
    #[error("measurement store: {0}")]
    Store(SE),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub devices: usize,
    pub notified: usize,
}

/// Periodic offline detection: reads every device's last-message time,
/// evaluates health, feeds the connection watch and hands boundary
/// crossings to the notifier.
pub struct Sweeper<R, S, T> {
    registry: R,
    store: S,
    watch: Arc<ConnectionWatch>,
    notifier: Notifier<T>,
    policy: HealthPolicy,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl<R, S, T> Sweeper<R, S, T>
where
    R: DeviceRegistry,
    S: MeasurementStore,
    T: EmailTransport,
{
    pub fn new(
        registry: R,
        store: S,
        watch: Arc<ConnectionWatch>,
        notifier: Notifier<T>,
        policy: HealthPolicy,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            watch,
            notifier,
            policy,
            clock,
            interval,
        }
    }

    /// One pass over all devices, hidden ones included.
    pub async fn sweep_once(&self) -> Result<SweepReport, SweepError<R::Error, S::Error>> {
        let now = self.clock.now();
        let devices = self
            .registry
            .list(true)
            .await
            .map_err(SweepError::Registry)?;

        let mut notified = 0;
        let total = devices.len();

        for device in devices {
            let last_message = self
                .store
                .last_message_time(device.id)
                .await
                .map_err(SweepError::Store)?;

            let health = self.policy.evaluate(
                now,
                last_message,
                device.kind,
                self.watch.warning_since(device.id),
            );

            if let Some(transition) = self.watch.observe(device.id, health, last_message, now) {
                // a failed send is logged and dropped: the transition has
                // been recorded, and outage/recovery pairs must stay 1:1
                match self.notifier.notify(&device, &transition).await {
                    Ok(()) => notified += 1,
                    Err(e) => warn!(
                        device_id = %device.id,
                        error = %e,
                        "failed to send connection notification"
                    ),
                }
            }
        }

        Ok(SweepReport {
            devices: total,
            notified,
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("health sweep shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.notified > 0 => {
                            info!(
                                devices = report.devices,
                                notified = report.notified,
                                "health sweep sent notifications"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "health sweep failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use atmo_core::{
        Device, DeviceId, DeviceKind, IngestSource, ManualClock, Measurement, MeasurementBatch,
        MeasurementId, MeasurementType, Sensor, SensorId,
    };
    use atmo_ingest::store::MemoryMeasurementStore;
    use atmo_notify::{MemoryEmailTransport, TemplateSet};
    use jiff::SignedDuration;
    use ordered_float::NotNan;
    use ulid::Ulid;
    use uuid::Uuid;

    use super::*;
    use crate::registry::InMemoryDeviceRegistry;

    fn ts(second: i64) -> jiff::Timestamp {
        jiff::Timestamp::from_second(second).unwrap()
    }

    fn device(kind: DeviceKind, name: &str) -> Device {
        Device {
            id: DeviceId(Uuid::new_v4()),
            name: name.into(),
            kind,
            visible: true,
            sensors: Box::new([Sensor {
                id: SensorId(Uuid::new_v4()),
                kind: MeasurementType::Temperature,
            }]),
            provisioned_at: ts(0),
        }
    }

    async fn seed_measurement(
        store: &MemoryMeasurementStore,
        device: &Device,
        timestamp: jiff::Timestamp,
    ) {
        let batch = MeasurementBatch {
            device_id: device.id,
            source: IngestSource::IotHub,
            measurements: vec![Measurement {
                id: MeasurementId(Ulid::new()),
                sensor_id: device.sensors[0].id,
                device_id: device.id,
                kind: MeasurementType::Temperature,
                value: NotNan::new(21.0).unwrap(),
                timestamp,
            }],
        };
        store.add_batch(&batch).await.unwrap();
    }

    struct Fixture {
        sweeper: Sweeper<InMemoryDeviceRegistry, MemoryMeasurementStore, Arc<MemoryEmailTransport>>,
        registry: InMemoryDeviceRegistry,
        store: MemoryMeasurementStore,
        watch: Arc<ConnectionWatch>,
        clock: Arc<ManualClock>,
        outbox: Arc<MemoryEmailTransport>,
    }

    fn fixture() -> Fixture {
        let registry = InMemoryDeviceRegistry::new();
        let store = MemoryMeasurementStore::new();
        let watch = Arc::new(ConnectionWatch::new());
        let clock = Arc::new(ManualClock::new(ts(0)));
        let outbox = Arc::new(MemoryEmailTransport::new());

        let notifier = Notifier::new(
            TemplateSet::default(),
            outbox.clone(),
            vec!["ops@example.com".into()],
            "https://atmo.example.com",
        );

        let sweeper = Sweeper::new(
            registry.clone(),
            store.clone(),
            watch.clone(),
            notifier,
            HealthPolicy::default(),
            clock.clone(),
            Duration::from_secs(60),
        );

        Fixture {
            sweeper,
            registry,
            store,
            watch,
            clock,
            outbox,
        }
    }

    #[tokio::test]
    async fn full_outage_and_recovery_cycle() {
        let f = fixture();
        let device = device(DeviceKind::Physical, "greenhouse");
        f.registry.register(device.clone()).await.unwrap();

        // device reports at t=1000
        seed_measurement(&f.store, &device, ts(1_000)).await;
        f.clock.set(ts(1_060));
        let report = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.devices, 1);
        assert_eq!(report.notified, 0);

        // 11 minutes of silence: warning, no mail yet
        f.clock.set(ts(1_000 + 11 * 60));
        f.sweeper.sweep_once().await.unwrap();
        assert!(f.outbox.sent().is_empty());
        assert!(f.watch.warning_since(device.id).is_some());

        // warning persists past the confirmation window: offline, one mail
        f.clock.advance(SignedDuration::from_mins(5));
        let report = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.notified, 1);
        let sent = f.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("Connection lost"));
        assert!(sent[0].subject.contains("greenhouse"));

        // still offline on later sweeps: no re-fire
        f.clock.advance(SignedDuration::from_mins(30));
        let report = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.notified, 0);
        assert_eq!(f.outbox.sent().len(), 1);

        // device comes back: exactly one recovery mail
        let back_at = f.clock.now();
        seed_measurement(&f.store, &device, back_at).await;
        f.watch.record_message(device.id, back_at);
        f.clock.advance(SignedDuration::from_mins(1));
        let report = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.notified, 1);
        let sent = f.outbox.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].subject.contains("Connection restored"));

        f.sweeper.sweep_once().await.unwrap();
        assert_eq!(f.outbox.sent().len(), 2);
    }

    #[tokio::test]
    async fn virtual_devices_use_the_longer_threshold() {
        let f = fixture();
        let physical = device(DeviceKind::Physical, "porch");
        let virtual_dev = device(DeviceKind::Virtual, "site-average");
        f.registry.register(physical.clone()).await.unwrap();
        f.registry.register(virtual_dev.clone()).await.unwrap();

        seed_measurement(&f.store, &physical, ts(1_000)).await;
        seed_measurement(&f.store, &virtual_dev, ts(1_000)).await;

        // 11 minutes on: physical warns, virtual stays online
        f.clock.set(ts(1_000 + 11 * 60));
        f.sweeper.sweep_once().await.unwrap();
        assert!(f.watch.warning_since(physical.id).is_some());
        assert!(f.watch.warning_since(virtual_dev.id).is_none());
    }

    #[tokio::test]
    async fn never_seen_devices_warn_but_never_alert() {
        let f = fixture();
        let device = device(DeviceKind::Physical, "unseen");
        f.registry.register(device.clone()).await.unwrap();

        f.clock.set(ts(10_000));
        f.sweeper.sweep_once().await.unwrap();
        f.clock.set(ts(100_000));
        f.sweeper.sweep_once().await.unwrap();

        // warnings accumulate, but with no prior connection there is
        // nothing to report lost
        assert!(f.watch.warning_since(device.id).is_some());
        assert!(f.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_send_does_not_break_the_sweep() {
        let f = fixture();
        let device = device(DeviceKind::Physical, "flaky");
        f.registry.register(device.clone()).await.unwrap();
        seed_measurement(&f.store, &device, ts(1_000)).await;

        f.clock.set(ts(1_060));
        f.sweeper.sweep_once().await.unwrap();

        f.outbox.set_failing(true);
        f.clock.set(ts(1_000 + 11 * 60));
        f.sweeper.sweep_once().await.unwrap();
        f.clock.advance(SignedDuration::from_mins(5));

        let report = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.notified, 0);
        assert!(f.outbox.sent().is_empty());
    }
}
