use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use atmo_core::{
    DeviceId, IngestSource, Measurement, MeasurementBatch, MeasurementId, MeasurementType,
    SensorId,
};
use ordered_float::NotNan;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::{Error as SqlxError, Row};
use thiserror::Error;
use ulid::Ulid;
use uuid::Uuid;

use super::{BatchOutcome, MeasurementStore};

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] SqlxError),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("duplicate measurement for sensor {sensor_id} at {timestamp}")]
    Duplicate {
        sensor_id: SensorId,
        timestamp: jiff::Timestamp,
    },
    #[error("invalid uuid in row: {0}")]
    InvalidUuid(String),
    #[error("invalid ulid in row: {0}")]
    InvalidUlid(String),
    #[error("invalid timestamp in row: {0}")]
    InvalidTimestamp(i64),
    #[error("non-finite value in row: {0}")]
    InvalidValue(f64),
}

#[derive(Clone)]
pub struct SqliteMeasurementStore {
    pool: SqlitePool,
}

impl SqliteMeasurementStore {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, SqliteStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        // enable WAL for better concurrency
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn source_str(source: IngestSource) -> &'static str {
    match source {
        IngestSource::IotHub => "iot_hub",
        IngestSource::Rest => "rest",
        IngestSource::ExternalProvider => "external",
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<Measurement, SqliteStoreError> {
    let measurement_id = row.try_get::<String, _>("measurement_id")?;
    let measurement_id = Ulid::from_str(&measurement_id)
        .map_err(|_| SqliteStoreError::InvalidUlid(measurement_id.clone()))?;

    let sensor_id = row.try_get::<String, _>("sensor_id")?;
    let sensor_id =
        Uuid::parse_str(&sensor_id).map_err(|_| SqliteStoreError::InvalidUuid(sensor_id.clone()))?;

    let device_id = row.try_get::<String, _>("device_id")?;
    let device_id =
        Uuid::parse_str(&device_id).map_err(|_| SqliteStoreError::InvalidUuid(device_id.clone()))?;

    let timestamp_us = row.try_get::<i64, _>("timestamp_us")?;
    let timestamp = jiff::Timestamp::from_microsecond(timestamp_us)
        .map_err(|_| SqliteStoreError::InvalidTimestamp(timestamp_us))?;

    let value = row.try_get::<f64, _>("value")?;
    let value = NotNan::new(value).map_err(|_| SqliteStoreError::InvalidValue(value))?;

    Ok(Measurement {
        id: MeasurementId(measurement_id),
        sensor_id: SensorId(sensor_id),
        device_id: DeviceId(device_id),
        kind: MeasurementType::from_type_id(row.try_get::<i64, _>("type_id")?),
        value,
        timestamp,
    })
}

#[async_trait]
impl MeasurementStore for SqliteMeasurementStore {
    type Error = SqliteStoreError;

    fn is_duplicate_error(error: &Self::Error) -> bool {
        matches!(error, SqliteStoreError::Duplicate { .. })
    }

    async fn add_batch(&self, batch: &MeasurementBatch) -> Result<BatchOutcome, Self::Error> {
        if batch.measurements.is_empty() {
            return Ok(BatchOutcome::Applied);
        }

        let mut tx = self.pool.begin().await?;

        let mut existing = 0usize;
        let mut first_clash: Option<&Measurement> = None;
        for measurement in &batch.measurements {
            let found: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM measurements WHERE sensor_id = ? AND timestamp_us = ?",
            )
            .bind(measurement.sensor_id.0.to_string())
            .bind(measurement.timestamp.as_microsecond())
            .fetch_optional(&mut *tx)
            .await?;

            if found.is_some() {
                existing += 1;
                first_clash.get_or_insert(measurement);
            }
        }

        if existing == batch.measurements.len() {
            tx.rollback().await?;
            return Ok(BatchOutcome::AlreadyApplied);
        }

        if let Some(clash) = first_clash {
            tx.rollback().await?;
            return Err(SqliteStoreError::Duplicate {
                sensor_id: clash.sensor_id,
                timestamp: clash.timestamp,
            });
        }

        for measurement in &batch.measurements {
            sqlx::query(
                "INSERT INTO measurements \
                 (measurement_id, sensor_id, device_id, type_id, value, timestamp_us, source) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(measurement.id.0.to_string())
            .bind(measurement.sensor_id.0.to_string())
            .bind(measurement.device_id.0.to_string())
            .bind(measurement.kind.type_id())
            .bind(measurement.value.into_inner())
            .bind(measurement.timestamp.as_microsecond())
            .bind(source_str(batch.source))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(BatchOutcome::Applied)
    }

    async fn last_message_time(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<jiff::Timestamp>, Self::Error> {
        let max_us: Option<i64> =
            sqlx::query_scalar("SELECT MAX(timestamp_us) FROM measurements WHERE device_id = ?")
                .bind(device_id.0.to_string())
                .fetch_one(&self.pool)
                .await?;

        max_us
            .map(|us| {
                jiff::Timestamp::from_microsecond(us)
                    .map_err(|_| SqliteStoreError::InvalidTimestamp(us))
            })
            .transpose()
    }

    async fn list_for_device(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<Measurement>, Self::Error> {
        let rows = sqlx::query(
            "SELECT measurement_id, sensor_id, device_id, type_id, value, timestamp_us \
             FROM measurements WHERE device_id = ? \
             ORDER BY timestamp_us DESC LIMIT ?",
        )
        .bind(device_id.0.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut measurements = Vec::with_capacity(rows.len());
        for row in rows {
            measurements.push(decode_row(&row)?);
        }

        Ok(measurements)
    }
}
