use std::collections::BTreeMap;

use atmo_core::{Device, DeviceId};
use tracing::info;

use crate::email::{EmailError, EmailTransport};
use crate::template::{
    TOKEN_DEVICE_LINK, TOKEN_DEVICE_NAME, TOKEN_PREV_TIMESTAMP, TOKEN_TIMESTAMP, TemplateKind,
    TemplateSet,
};
use crate::watch::ConnectionTransition;

/// A notification ready to be rendered and sent. Transient: produced from a
/// connection transition, consumed by the email transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    pub kind: TemplateKind,
    pub device_id: DeviceId,
    pub tokens: BTreeMap<String, String>,
}

/// Turns connection transitions into token-substituted emails.
pub struct Notifier<T> {
    templates: TemplateSet,
    transport: T,
    recipients: Vec<String>,
    device_link_base: String,
}

impl<T> Notifier<T>
where
    T: EmailTransport,
{
    pub fn new(
        templates: TemplateSet,
        transport: T,
        recipients: Vec<String>,
        device_link_base: impl Into<String>,
    ) -> Self {
        let device_link_base = device_link_base
            .into()
            .trim_end_matches('/')
            .to_string();
        Self {
            templates,
            transport,
            recipients,
            device_link_base,
        }
    }

    /// Build the token map for a transition against a known device.
    pub fn intent_for(&self, device: &Device, transition: &ConnectionTransition) -> NotificationIntent {
        let mut tokens = BTreeMap::new();
        tokens.insert(TOKEN_DEVICE_NAME.to_string(), device.name.to_string());
        tokens.insert(
            TOKEN_DEVICE_LINK.to_string(),
            format!("{}/devices/{}", self.device_link_base, device.id),
        );
        tokens.insert(TOKEN_TIMESTAMP.to_string(), transition.at.to_string());
        tokens.insert(
            TOKEN_PREV_TIMESTAMP.to_string(),
            transition
                .previous_last_message
                .map(|t| t.to_string())
                .unwrap_or_else(|| "never".to_string()),
        );

        NotificationIntent {
            kind: transition.kind,
            device_id: device.id,
            tokens,
        }
    }

    /// Render and send the email for one transition.
    pub async fn notify(
        &self,
        device: &Device,
        transition: &ConnectionTransition,
    ) -> Result<(), EmailError> {
        let intent = self.intent_for(device, transition);
        let rendered = self
            .templates
            .template_for(intent.kind)
            .render(&intent.tokens);

        self.transport
            .send(
                &rendered.subject,
                &rendered.html,
                &rendered.plain_text,
                &self.recipients,
            )
            .await?;

        info!(
            device_id = %device.id,
            kind = ?intent.kind,
            recipients = self.recipients.len(),
            "sent connection notification"
        );

        Ok(())
    }
}
