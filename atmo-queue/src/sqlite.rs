use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use atmo_core::{CommandId, DeviceId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::{Error as SqlxError, Row};
use thiserror::Error;
use ulid::Ulid;
use uuid::Uuid;

use crate::command::{CancelOutcome, CommandKind, ExecutionOutcome, QueuedCommand};
use crate::queue::CommandQueue;

#[derive(Debug, Error)]
pub enum SqliteQueueError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] SqlxError),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid ulid in row: {0}")]
    InvalidUlid(String),
    #[error("invalid uuid in row: {0}")]
    InvalidUuid(String),
    #[error("invalid command kind in row: {0}")]
    InvalidKind(String),
    #[error("invalid timestamp in row: {0}")]
    InvalidTimestamp(i64),
}

#[derive(Clone)]
pub struct SqliteCommandQueue {
    pool: SqlitePool,
}

impl SqliteCommandQueue {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, SqliteQueueError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn timestamp(us: i64) -> Result<jiff::Timestamp, SqliteQueueError> {
    jiff::Timestamp::from_microsecond(us).map_err(|_| SqliteQueueError::InvalidTimestamp(us))
}

fn decode_row(row: &SqliteRow) -> Result<QueuedCommand, SqliteQueueError> {
    let command_id = row.try_get::<String, _>("command_id")?;
    let command_id = Ulid::from_str(&command_id)
        .map_err(|_| SqliteQueueError::InvalidUlid(command_id.clone()))?;

    let device_id = row.try_get::<String, _>("device_id")?;
    let device_id =
        Uuid::parse_str(&device_id).map_err(|_| SqliteQueueError::InvalidUuid(device_id.clone()))?;

    let kind = row.try_get::<String, _>("kind")?;
    let kind =
        CommandKind::parse(&kind).ok_or_else(|| SqliteQueueError::InvalidKind(kind.clone()))?;

    let executed_at = row
        .try_get::<Option<i64>, _>("executed_at_us")?
        .map(timestamp)
        .transpose()?;

    Ok(QueuedCommand {
        id: CommandId(command_id),
        device_id: DeviceId(device_id),
        kind,
        payload: row.try_get::<String, _>("payload")?.into(),
        scheduled_at: timestamp(row.try_get::<i64, _>("scheduled_at_us")?)?,
        created_at: timestamp(row.try_get::<i64, _>("created_at_us")?)?,
        executed_at,
        removed: row.try_get::<i64, _>("removed")? != 0,
    })
}

const COLUMNS: &str =
    "command_id, device_id, kind, payload, scheduled_at_us, created_at_us, executed_at_us, removed";

#[async_trait]
impl CommandQueue for SqliteCommandQueue {
    type Error = SqliteQueueError;

    async fn enqueue(
        &self,
        device_id: DeviceId,
        kind: CommandKind,
        payload: &str,
        scheduled_at: Option<jiff::Timestamp>,
        now: jiff::Timestamp,
    ) -> Result<QueuedCommand, Self::Error> {
        let command = QueuedCommand {
            id: CommandId(Ulid::new()),
            device_id,
            kind,
            payload: payload.into(),
            scheduled_at: scheduled_at.unwrap_or(now),
            created_at: now,
            executed_at: None,
            removed: false,
        };

        sqlx::query(
            "INSERT INTO commands \
             (command_id, device_id, kind, payload, scheduled_at_us, created_at_us) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(command.id.0.to_string())
        .bind(command.device_id.0.to_string())
        .bind(command.kind.as_str())
        .bind(command.payload.as_ref())
        .bind(command.scheduled_at.as_microsecond())
        .bind(command.created_at.as_microsecond())
        .execute(&self.pool)
        .await?;

        Ok(command)
    }

    async fn get(&self, id: CommandId) -> Result<Option<QueuedCommand>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM commands WHERE command_id = ?"
        ))
        .bind(id.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode_row(&r)).transpose()
    }

    async fn fetch_due(
        &self,
        now: jiff::Timestamp,
        limit: usize,
    ) -> Result<Vec<QueuedCommand>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM commands \
             WHERE removed = 0 AND executed_at_us IS NULL AND scheduled_at_us <= ? \
             ORDER BY scheduled_at_us ASC, created_at_us ASC LIMIT ?",
        ))
        .bind(now.as_microsecond())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut commands = Vec::with_capacity(rows.len());
        for row in rows {
            commands.push(decode_row(&row)?);
        }

        Ok(commands)
    }

    async fn mark_executed(
        &self,
        id: CommandId,
        now: jiff::Timestamp,
    ) -> Result<ExecutionOutcome, Self::Error> {
        // optimistic compare-and-set: only a still-pending row transitions
        let updated = sqlx::query(
            "UPDATE commands SET executed_at_us = ? \
             WHERE command_id = ? AND executed_at_us IS NULL AND removed = 0",
        )
        .bind(now.as_microsecond())
        .bind(id.0.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(ExecutionOutcome::Executed);
        }

        let row = sqlx::query("SELECT executed_at_us, removed FROM commands WHERE command_id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(ExecutionOutcome::NotFound),
            Some(row) => {
                if row.try_get::<Option<i64>, _>("executed_at_us")?.is_some() {
                    Ok(ExecutionOutcome::AlreadyExecuted)
                } else {
                    // removed: gone from the delivery channel
                    Ok(ExecutionOutcome::NotFound)
                }
            }
        }
    }

    async fn cancel(&self, id: CommandId) -> Result<CancelOutcome, Self::Error> {
        let updated = sqlx::query(
            "UPDATE commands SET removed = 1 \
             WHERE command_id = ? AND executed_at_us IS NULL",
        )
        .bind(id.0.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(CancelOutcome::Cancelled);
        }

        let row = sqlx::query("SELECT executed_at_us FROM commands WHERE command_id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(CancelOutcome::NotFound),
            Some(row) => {
                if row.try_get::<Option<i64>, _>("executed_at_us")?.is_some() {
                    Ok(CancelOutcome::AlreadyExecuted)
                } else {
                    Ok(CancelOutcome::Cancelled)
                }
            }
        }
    }

    async fn postpone(
        &self,
        id: CommandId,
        until: jiff::Timestamp,
    ) -> Result<bool, Self::Error> {
        let updated = sqlx::query(
            "UPDATE commands SET scheduled_at_us = ? \
             WHERE command_id = ? AND executed_at_us IS NULL AND removed = 0",
        )
        .bind(until.as_microsecond())
        .bind(id.0.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn last_executed(
        &self,
        device_id: DeviceId,
        kind: CommandKind,
    ) -> Result<Option<jiff::Timestamp>, Self::Error> {
        let max_us: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(executed_at_us) FROM commands \
             WHERE device_id = ? AND kind = ? AND executed_at_us IS NOT NULL",
        )
        .bind(device_id.0.to_string())
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        max_us.map(timestamp).transpose()
    }
}
