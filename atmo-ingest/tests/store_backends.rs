use atmo_core::{
    DeviceId, IngestSource, Measurement, MeasurementBatch, MeasurementId, MeasurementType,
    SensorId,
};
use atmo_ingest::store::{
    BatchOutcome, MeasurementStore, MemoryMeasurementStore, MemoryStoreError,
    SqliteMeasurementStore, SqliteStoreError,
};
use ordered_float::NotNan;
use tempfile::NamedTempFile;
use ulid::Ulid;
use uuid::Uuid;

fn dummy_measurement(
    device_id: DeviceId,
    sensor_id: SensorId,
    second: i64,
    value: f64,
) -> Measurement {
    Measurement {
        id: MeasurementId(Ulid::new()),
        sensor_id,
        device_id,
        kind: MeasurementType::Temperature,
        value: NotNan::new(value).unwrap(),
        timestamp: jiff::Timestamp::from_second(second).unwrap(),
    }
}

fn dummy_batch(device_id: DeviceId, sensor_id: SensorId, seconds: &[i64]) -> MeasurementBatch {
    MeasurementBatch {
        device_id,
        source: IngestSource::IotHub,
        measurements: seconds
            .iter()
            .map(|&s| dummy_measurement(device_id, sensor_id, s, 20.0))
            .collect(),
    }
}

async fn batch_lifecycle<S: MeasurementStore>(store: S) {
    let device_id = DeviceId(Uuid::new_v4());
    let sensor_id = SensorId(Uuid::new_v4());

    let batch = dummy_batch(device_id, sensor_id, &[100, 300, 200]);
    assert_eq!(
        store.add_batch(&batch).await.unwrap(),
        BatchOutcome::Applied
    );

    let last = store.last_message_time(device_id).await.unwrap().unwrap();
    assert_eq!(last.as_second(), 300);

    // unrelated device has no history
    let other = DeviceId(Uuid::new_v4());
    assert_eq!(store.last_message_time(other).await.unwrap(), None);
}

async fn retry_is_no_op<S: MeasurementStore>(store: S) {
    let device_id = DeviceId(Uuid::new_v4());
    let sensor_id = SensorId(Uuid::new_v4());

    let batch = dummy_batch(device_id, sensor_id, &[100, 200]);
    assert_eq!(
        store.add_batch(&batch).await.unwrap(),
        BatchOutcome::Applied
    );
    assert_eq!(
        store.add_batch(&batch).await.unwrap(),
        BatchOutcome::AlreadyApplied
    );

    let rows = store.list_for_device(device_id, 100).await.unwrap();
    assert_eq!(rows.len(), 2);
}

async fn newest_first_listing<S: MeasurementStore>(store: S) {
    let device_id = DeviceId(Uuid::new_v4());
    let sensor_id = SensorId(Uuid::new_v4());

    let batch = dummy_batch(device_id, sensor_id, &[100, 300, 200]);
    store.add_batch(&batch).await.unwrap();

    let rows = store.list_for_device(device_id, 2).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].timestamp.as_second(), 300);
    assert_eq!(rows[1].timestamp.as_second(), 200);
}

#[tokio::test]
async fn memory_batch_lifecycle() {
    batch_lifecycle(MemoryMeasurementStore::new()).await;
}

#[tokio::test]
async fn memory_retry_is_no_op() {
    retry_is_no_op(MemoryMeasurementStore::new()).await;
}

#[tokio::test]
async fn memory_newest_first_listing() {
    newest_first_listing(MemoryMeasurementStore::new()).await;
}

#[tokio::test]
async fn memory_partial_overlap_is_duplicate() {
    let store = MemoryMeasurementStore::new();
    let device_id = DeviceId(Uuid::new_v4());
    let sensor_id = SensorId(Uuid::new_v4());

    store
        .add_batch(&dummy_batch(device_id, sensor_id, &[100, 200]))
        .await
        .unwrap();

    let overlapping = dummy_batch(device_id, sensor_id, &[200, 300]);
    let err = store.add_batch(&overlapping).await.unwrap_err();
    assert!(matches!(err, MemoryStoreError::Duplicate { .. }));

    // the non-overlapping record must not have been committed
    let rows = store.list_for_device(device_id, 100).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn sqlite_batch_lifecycle() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteMeasurementStore::new(temp_file.path()).await?;
    batch_lifecycle(store).await;
    Ok(())
}

#[tokio::test]
async fn sqlite_retry_is_no_op() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteMeasurementStore::new(temp_file.path()).await?;
    retry_is_no_op(store).await;
    Ok(())
}

#[tokio::test]
async fn sqlite_newest_first_listing() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteMeasurementStore::new(temp_file.path()).await?;
    newest_first_listing(store).await;
    Ok(())
}

#[tokio::test]
async fn sqlite_partial_overlap_is_duplicate() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteMeasurementStore::new(temp_file.path()).await?;

    let device_id = DeviceId(Uuid::new_v4());
    let sensor_id = SensorId(Uuid::new_v4());

    store
        .add_batch(&dummy_batch(device_id, sensor_id, &[100, 200]))
        .await?;

    let overlapping = dummy_batch(device_id, sensor_id, &[200, 300]);
    let err = store.add_batch(&overlapping).await.unwrap_err();
    assert!(matches!(err, SqliteStoreError::Duplicate { .. }));

    let rows = store.list_for_device(device_id, 100).await?;
    assert_eq!(rows.len(), 2);
    Ok(())
}

#[tokio::test]
async fn sqlite_persistence_across_instances() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let device_id = DeviceId(Uuid::new_v4());
    let sensor_id = SensorId(Uuid::new_v4());

    {
        let store = SqliteMeasurementStore::new(temp_file.path()).await?;
        store
            .add_batch(&dummy_batch(device_id, sensor_id, &[100]))
            .await?;
    }

    {
        let store = SqliteMeasurementStore::new(temp_file.path()).await?;
        let rows = store.list_for_device(device_id, 10).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value.into_inner(), 20.0);
    }

    Ok(())
}

#[tokio::test]
async fn sqlite_round_trips_measurement_fields() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteMeasurementStore::new(temp_file.path()).await?;

    let device_id = DeviceId(Uuid::new_v4());
    let sensor_id = SensorId(Uuid::new_v4());
    let measurement = dummy_measurement(device_id, sensor_id, 1_700_000_000, 42.5);

    let batch = MeasurementBatch {
        device_id,
        source: IngestSource::Rest,
        measurements: vec![measurement.clone()],
    };
    store.add_batch(&batch).await?;

    let rows = store.list_for_device(device_id, 1).await?;
    assert_eq!(rows[0], measurement);
    Ok(())
}
