use std::sync::Mutex;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid mailbox address: {0}")]
    InvalidAddress(String),
    #[error("no recipients configured")]
    NoRecipients,
    /// Transient transport failure; the caller owns the retry policy.
    #[error("email transport failure: {0}")]
    Transport(String),
}

/// Capability interface over the outbound mail channel.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(
        &self,
        subject: &str,
        html: &str,
        plain_text: &str,
        recipients: &[String],
    ) -> Result<(), EmailError>;
}

#[async_trait]
impl<T> EmailTransport for std::sync::Arc<T>
where
    T: EmailTransport + ?Sized,
{
    async fn send(
        &self,
        subject: &str,
        html: &str,
        plain_text: &str,
        recipients: &[String],
    ) -> Result<(), EmailError> {
        (**self).send(subject, html, plain_text, recipients).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// SMTP transport backed by lettre.
pub struct SmtpEmailTransport {
    config: SmtpConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailTransport {
    pub fn new(config: SmtpConfig) -> Result<Self, EmailError> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| EmailError::Transport(e.to_string()))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .port(config.port)
            .build();

        Ok(Self { config, mailer })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address
        .parse()
        .map_err(|_| EmailError::InvalidAddress(address.to_string()))
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(
        &self,
        subject: &str,
        html: &str,
        plain_text: &str,
        recipients: &[String],
    ) -> Result<(), EmailError> {
        if recipients.is_empty() {
            return Err(EmailError::NoRecipients);
        }

        let mut builder = Message::builder()
            .from(mailbox(&self.config.from)?)
            .subject(subject);
        for recipient in recipients {
            builder = builder.to(mailbox(recipient)?);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(
                plain_text.to_string(),
                html.to_string(),
            ))
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        Ok(())
    }
}

/// A message captured by the in-memory transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEmail {
    pub subject: String,
    pub html: String,
    pub plain_text: String,
    pub recipients: Vec<String>,
}

/// In-memory email transport: records the outbox for tests.
#[derive(Default)]
pub struct MemoryEmailTransport {
    inner: Mutex<OutboxInner>,
}

#[derive(Default)]
struct OutboxInner {
    sent: Vec<OutboxEmail>,
    failing: bool,
}

impl MemoryEmailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn sent(&self) -> Vec<OutboxEmail> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutboxInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EmailTransport for MemoryEmailTransport {
    async fn send(
        &self,
        subject: &str,
        html: &str,
        plain_text: &str,
        recipients: &[String],
    ) -> Result<(), EmailError> {
        if recipients.is_empty() {
            return Err(EmailError::NoRecipients);
        }

        let mut inner = self.lock();
        if inner.failing {
            return Err(EmailError::Transport("simulated send failure".into()));
        }

        inner.sent.push(OutboxEmail {
            subject: subject.to_string(),
            html: html.to_string(),
            plain_text: plain_text.to_string(),
            recipients: recipients.to_vec(),
        });

        Ok(())
    }
}
