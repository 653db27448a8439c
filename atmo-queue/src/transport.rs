use std::sync::Mutex;

use async_trait::async_trait;
use jiff::SignedDuration;
use thiserror::Error;

type BoxStr = Box<str>;

/// Queue/stream send failure. Propagated to the caller for its retry
/// policy; never swallowed here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("queue transport failure: {0}")]
pub struct TransportError(pub String);

/// Acknowledgement handle for a sent queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReceipt {
    pub message_id: BoxStr,
    pub pop_receipt: BoxStr,
    pub scheduled_at: jiff::Timestamp,
}

/// Capability interface over the delivery channel (an Azure-storage-queue
/// shaped API). Substituted with an in-memory fake in tests.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn send_message(
        &self,
        text: &str,
        delay: Option<SignedDuration>,
    ) -> Result<QueueReceipt, TransportError>;

    async fn delete_message(
        &self,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), TransportError>;

    async fn update_visibility(
        &self,
        message_id: &str,
        pop_receipt: &str,
        timeout: SignedDuration,
    ) -> Result<(), TransportError>;
}

/// A message held by the in-memory fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: BoxStr,
    pub text: BoxStr,
    pub scheduled_at: jiff::Timestamp,
    pub visible: bool,
}

/// In-memory queue transport fake. Records everything sent so tests can
/// assert on delivery; can be flipped into a failing mode to exercise
/// transport-error paths.
#[derive(Default)]
pub struct InMemoryQueueTransport {
    inner: Mutex<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
    messages: Vec<SentMessage>,
    next_id: u64,
    failing: bool,
}

impl InMemoryQueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().messages.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueueTransport {
    async fn send_message(
        &self,
        text: &str,
        delay: Option<SignedDuration>,
    ) -> Result<QueueReceipt, TransportError> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(TransportError("simulated send failure".into()));
        }

        let now = jiff::Timestamp::now();
        let scheduled_at = delay
            .and_then(|d| now.checked_add(d).ok())
            .unwrap_or(now);

        inner.next_id += 1;
        let message_id: BoxStr = format!("msg-{}", inner.next_id).into();
        let pop_receipt: BoxStr = format!("pop-{}", inner.next_id).into();

        inner.messages.push(SentMessage {
            message_id: message_id.clone(),
            text: text.into(),
            scheduled_at,
            visible: true,
        });

        Ok(QueueReceipt {
            message_id,
            pop_receipt,
            scheduled_at,
        })
    }

    async fn delete_message(
        &self,
        message_id: &str,
        _pop_receipt: &str,
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(TransportError("simulated delete failure".into()));
        }

        inner
            .messages
            .retain(|m| m.message_id.as_ref() != message_id);
        Ok(())
    }

    async fn update_visibility(
        &self,
        message_id: &str,
        _pop_receipt: &str,
        timeout: SignedDuration,
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(TransportError("simulated visibility failure".into()));
        }

        let now = jiff::Timestamp::now();
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.message_id.as_ref() == message_id)
        {
            message.visible = false;
            if let Ok(at) = now.checked_add(timeout) {
                message.scheduled_at = at;
            }
        }
        Ok(())
    }
}
