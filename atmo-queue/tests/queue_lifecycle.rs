use atmo_core::{CommandId, DeviceId};
use atmo_queue::{
    CancelOutcome, CommandKind, CommandQueue, ExecutionOutcome, MemoryCommandQueue,
    SqliteCommandQueue,
};
use tempfile::NamedTempFile;
use ulid::Ulid;
use uuid::Uuid;

fn ts(second: i64) -> jiff::Timestamp {
    jiff::Timestamp::from_second(second).unwrap()
}

async fn enqueue_defaults_scheduled_to_now<Q: CommandQueue>(queue: Q) {
    let device = DeviceId(Uuid::new_v4());
    let now = ts(1_000);

    let command = queue
        .enqueue(device, CommandKind::Reboot, "{}", None, now)
        .await
        .unwrap();

    assert_eq!(command.scheduled_at, now);
    assert_eq!(command.created_at, now);
    assert!(command.is_pending());

    let fetched = queue.get(command.id).await.unwrap().unwrap();
    assert_eq!(fetched, command);
}

async fn fetch_due_is_oldest_first_and_bounded<Q: CommandQueue>(queue: Q) {
    let device = DeviceId(Uuid::new_v4());

    let late = queue
        .enqueue(device, CommandKind::Reboot, "{}", Some(ts(300)), ts(0))
        .await
        .unwrap();
    let early = queue
        .enqueue(device, CommandKind::Reboot, "{}", Some(ts(100)), ts(0))
        .await
        .unwrap();
    let middle = queue
        .enqueue(device, CommandKind::Reboot, "{}", Some(ts(200)), ts(0))
        .await
        .unwrap();
    // not yet due
    queue
        .enqueue(device, CommandKind::Reboot, "{}", Some(ts(9_000)), ts(0))
        .await
        .unwrap();

    let due = queue.fetch_due(ts(500), 10).await.unwrap();
    let ids: Vec<CommandId> = due.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![early.id, middle.id, late.id]);

    let capped = queue.fetch_due(ts(500), 2).await.unwrap();
    assert_eq!(capped.len(), 2);
    assert_eq!(capped[0].id, early.id);
}

async fn mark_executed_is_idempotent<Q: CommandQueue>(queue: Q) {
    let device = DeviceId(Uuid::new_v4());
    let command = queue
        .enqueue(device, CommandKind::SetMotionControl, "{\"on\":true}", None, ts(0))
        .await
        .unwrap();

    assert_eq!(
        queue.mark_executed(command.id, ts(10)).await.unwrap(),
        ExecutionOutcome::Executed
    );
    assert_eq!(
        queue.mark_executed(command.id, ts(20)).await.unwrap(),
        ExecutionOutcome::AlreadyExecuted
    );

    // executed_at was set exactly once and the entry is immutable now
    let stored = queue.get(command.id).await.unwrap().unwrap();
    assert_eq!(stored.executed_at, Some(ts(10)));

    // executed commands are no longer due
    assert!(queue.fetch_due(ts(100), 10).await.unwrap().is_empty());
}

async fn cancel_refuses_after_execution<Q: CommandQueue>(queue: Q) {
    let device = DeviceId(Uuid::new_v4());
    let command = queue
        .enqueue(device, CommandKind::Reboot, "{}", None, ts(0))
        .await
        .unwrap();

    queue.mark_executed(command.id, ts(10)).await.unwrap();

    assert_eq!(
        queue.cancel(command.id).await.unwrap(),
        CancelOutcome::AlreadyExecuted
    );
}

async fn cancelled_commands_never_execute<Q: CommandQueue>(queue: Q) {
    let device = DeviceId(Uuid::new_v4());
    let command = queue
        .enqueue(device, CommandKind::Reboot, "{}", None, ts(0))
        .await
        .unwrap();

    assert_eq!(
        queue.cancel(command.id).await.unwrap(),
        CancelOutcome::Cancelled
    );
    // repeated cancellation stays benign
    assert_eq!(
        queue.cancel(command.id).await.unwrap(),
        CancelOutcome::Cancelled
    );

    assert!(queue.fetch_due(ts(100), 10).await.unwrap().is_empty());
    assert_eq!(
        queue.mark_executed(command.id, ts(10)).await.unwrap(),
        ExecutionOutcome::NotFound
    );

    let stored = queue.get(command.id).await.unwrap().unwrap();
    assert!(stored.removed);
    assert_eq!(stored.executed_at, None);
}

async fn unknown_command_is_not_found<Q: CommandQueue>(queue: Q) {
    let missing = CommandId(Ulid::new());

    assert_eq!(
        queue.mark_executed(missing, ts(0)).await.unwrap(),
        ExecutionOutcome::NotFound
    );
    assert_eq!(
        queue.cancel(missing).await.unwrap(),
        CancelOutcome::NotFound
    );
    assert!(!queue.postpone(missing, ts(100)).await.unwrap());
}

async fn postpone_moves_out_of_due_window<Q: CommandQueue>(queue: Q) {
    let device = DeviceId(Uuid::new_v4());
    let command = queue
        .enqueue(device, CommandKind::Reboot, "{}", None, ts(100))
        .await
        .unwrap();

    assert!(queue.postpone(command.id, ts(500)).await.unwrap());
    assert!(queue.fetch_due(ts(200), 10).await.unwrap().is_empty());

    let due = queue.fetch_due(ts(500), 10).await.unwrap();
    assert_eq!(due.len(), 1);

    // terminal commands cannot be postponed
    queue.mark_executed(command.id, ts(510)).await.unwrap();
    assert!(!queue.postpone(command.id, ts(900)).await.unwrap());
}

async fn last_executed_tracks_latest_completion<Q: CommandQueue>(queue: Q) {
    let device = DeviceId(Uuid::new_v4());

    assert_eq!(
        queue
            .last_executed(device, CommandKind::Reboot)
            .await
            .unwrap(),
        None
    );

    let first = queue
        .enqueue(device, CommandKind::Reboot, "{}", None, ts(0))
        .await
        .unwrap();
    let second = queue
        .enqueue(device, CommandKind::Reboot, "{}", None, ts(0))
        .await
        .unwrap();
    // a different kind must not count
    let attrs = queue
        .enqueue(device, CommandKind::SendAttributes, "{}", None, ts(0))
        .await
        .unwrap();

    queue.mark_executed(first.id, ts(100)).await.unwrap();
    queue.mark_executed(second.id, ts(200)).await.unwrap();
    queue.mark_executed(attrs.id, ts(900)).await.unwrap();

    assert_eq!(
        queue
            .last_executed(device, CommandKind::Reboot)
            .await
            .unwrap(),
        Some(ts(200))
    );
}

macro_rules! backend_tests {
    ($backend:ident, $make:expr) => {
        mod $backend {
            use super::*;

            #[tokio::test]
            async fn enqueue_defaults_scheduled_to_now() {
                super::enqueue_defaults_scheduled_to_now($make.await).await;
            }

            #[tokio::test]
            async fn fetch_due_is_oldest_first_and_bounded() {
                super::fetch_due_is_oldest_first_and_bounded($make.await).await;
            }

            #[tokio::test]
            async fn mark_executed_is_idempotent() {
                super::mark_executed_is_idempotent($make.await).await;
            }

            #[tokio::test]
            async fn cancel_refuses_after_execution() {
                super::cancel_refuses_after_execution($make.await).await;
            }

            #[tokio::test]
            async fn cancelled_commands_never_execute() {
                super::cancelled_commands_never_execute($make.await).await;
            }

            #[tokio::test]
            async fn unknown_command_is_not_found() {
                super::unknown_command_is_not_found($make.await).await;
            }

            #[tokio::test]
            async fn postpone_moves_out_of_due_window() {
                super::postpone_moves_out_of_due_window($make.await).await;
            }

            #[tokio::test]
            async fn last_executed_tracks_latest_completion() {
                super::last_executed_tracks_latest_completion($make.await).await;
            }
        }
    };
}

async fn memory_queue() -> MemoryCommandQueue {
    MemoryCommandQueue::new()
}

async fn sqlite_queue() -> SqliteCommandQueue {
    // the tempfile lives for the whole test: sqlite keeps the file open
    let temp_file = NamedTempFile::new().unwrap();
    let (_, path) = temp_file.keep().unwrap();
    SqliteCommandQueue::new(path).await.unwrap()
}

backend_tests!(memory, memory_queue());
backend_tests!(sqlite, sqlite_queue());
