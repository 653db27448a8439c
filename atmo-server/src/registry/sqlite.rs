use std::path::Path;

use async_trait::async_trait;
use atmo_core::{Device, DeviceId, DeviceKind, MeasurementType, Sensor, SensorId};
use atmo_ingest::store::{DeviceDirectory, SensorBinding};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::{Error as SqlxError, Row};
use thiserror::Error;
use uuid::Uuid;

use super::DeviceRegistry;

#[derive(Debug, Error)]
pub enum SqliteRegistryError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] SqlxError),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid uuid in row: {0}")]
    InvalidUuid(String),
    #[error("invalid device kind in row: {0}")]
    InvalidKind(String),
    #[error("invalid timestamp in row: {0}")]
    InvalidTimestamp(i64),
}

#[derive(Clone)]
pub struct SqliteDeviceRegistry {
    pool: SqlitePool,
}

impl SqliteDeviceRegistry {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, SqliteRegistryError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn kind_str(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Physical => "physical",
        DeviceKind::Virtual => "virtual",
    }
}

fn parse_kind(text: &str) -> Option<DeviceKind> {
    match text {
        "physical" => Some(DeviceKind::Physical),
        "virtual" => Some(DeviceKind::Virtual),
        _ => None,
    }
}

fn parse_uuid(text: &str) -> Result<Uuid, SqliteRegistryError> {
    Uuid::parse_str(text).map_err(|_| SqliteRegistryError::InvalidUuid(text.to_string()))
}

fn decode_device(row: &SqliteRow, sensors: Vec<Sensor>) -> Result<Device, SqliteRegistryError> {
    let device_id = row.try_get::<String, _>("device_id")?;
    let kind = row.try_get::<String, _>("kind")?;
    let kind = parse_kind(&kind).ok_or_else(|| SqliteRegistryError::InvalidKind(kind.clone()))?;

    let provisioned_at_us = row.try_get::<i64, _>("provisioned_at_us")?;
    let provisioned_at = jiff::Timestamp::from_microsecond(provisioned_at_us)
        .map_err(|_| SqliteRegistryError::InvalidTimestamp(provisioned_at_us))?;

    Ok(Device {
        id: DeviceId(parse_uuid(&device_id)?),
        name: row.try_get::<String, _>("name")?.into(),
        kind,
        visible: row.try_get::<i64, _>("visible")? != 0,
        sensors: sensors.into_boxed_slice(),
        provisioned_at,
    })
}

impl SqliteDeviceRegistry {
    async fn sensors_for(&self, device_id: &str) -> Result<Vec<Sensor>, SqliteRegistryError> {
        let rows = sqlx::query("SELECT sensor_id, type_id FROM sensors WHERE device_id = ?")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;

        let mut sensors = Vec::with_capacity(rows.len());
        for row in rows {
            let sensor_id = row.try_get::<String, _>("sensor_id")?;
            sensors.push(Sensor {
                id: SensorId(parse_uuid(&sensor_id)?),
                kind: MeasurementType::from_type_id(row.try_get::<i64, _>("type_id")?),
            });
        }

        Ok(sensors)
    }
}

#[async_trait]
impl DeviceRegistry for SqliteDeviceRegistry {
    type Error = SqliteRegistryError;

    async fn register(&self, device: Device) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;
        let device_id = device.id.0.to_string();

        sqlx::query(
            "INSERT INTO devices (device_id, name, kind, visible, provisioned_at_us) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (device_id) DO UPDATE SET \
                 name = excluded.name, \
                 kind = excluded.kind, \
                 visible = excluded.visible",
        )
        .bind(&device_id)
        .bind(device.name.as_ref())
        .bind(kind_str(device.kind))
        .bind(device.visible as i64)
        .bind(device.provisioned_at.as_microsecond())
        .execute(&mut *tx)
        .await?;

        // re-registering replaces the sensor set
        sqlx::query("DELETE FROM sensors WHERE device_id = ?")
            .bind(&device_id)
            .execute(&mut *tx)
            .await?;

        for sensor in device.sensors.iter() {
            sqlx::query("INSERT INTO sensors (sensor_id, device_id, type_id) VALUES (?, ?, ?)")
                .bind(sensor.id.0.to_string())
                .bind(&device_id)
                .bind(sensor.kind.type_id())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn get(&self, id: DeviceId) -> Result<Option<Device>, Self::Error> {
        let row = sqlx::query(
            "SELECT device_id, name, kind, visible, provisioned_at_us \
             FROM devices WHERE device_id = ?",
        )
        .bind(id.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let sensors = self.sensors_for(&id.0.to_string()).await?;
                Ok(Some(decode_device(&row, sensors)?))
            }
        }
    }

    async fn list(&self, include_hidden: bool) -> Result<Vec<Device>, Self::Error> {
        let rows = sqlx::query(
            "SELECT device_id, name, kind, visible, provisioned_at_us FROM devices \
             WHERE visible = 1 OR ? \
             ORDER BY provisioned_at_us ASC",
        )
        .bind(include_hidden as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            let device_id = row.try_get::<String, _>("device_id")?;
            let sensors = self.sensors_for(&device_id).await?;
            devices.push(decode_device(&row, sensors)?);
        }

        Ok(devices)
    }

    async fn set_visible(&self, id: DeviceId, visible: bool) -> Result<bool, Self::Error> {
        let updated = sqlx::query("UPDATE devices SET visible = ? WHERE device_id = ?")
            .bind(visible as i64)
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(updated > 0)
    }

    async fn sensor_binding(
        &self,
        sensor_id: SensorId,
    ) -> Result<Option<SensorBinding>, Self::Error> {
        let row = sqlx::query("SELECT device_id, type_id FROM sensors WHERE sensor_id = ?")
            .bind(sensor_id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let device_id = row.try_get::<String, _>("device_id")?;
            Ok(SensorBinding {
                device_id: DeviceId(parse_uuid(&device_id)?),
                kind: MeasurementType::from_type_id(row.try_get::<i64, _>("type_id")?),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl DeviceDirectory for SqliteDeviceRegistry {
    type Error = SqliteRegistryError;

    async fn sensor_binding(
        &self,
        sensor_id: SensorId,
    ) -> Result<Option<SensorBinding>, Self::Error> {
        DeviceRegistry::sensor_binding(self, sensor_id).await
    }
}
