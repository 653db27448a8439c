use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Placeholder tokens understood by the default templates. Templates are
/// user-authored, so rendering tolerates any subset of these.
pub const TOKEN_DEVICE_NAME: &str = "{DEVICE_NAME}";
pub const TOKEN_DEVICE_LINK: &str = "{DEVICE_LINK}";
pub const TOKEN_TIMESTAMP: &str = "{TIMESTAMP}";
pub const TOKEN_PREV_TIMESTAMP: &str = "{PREV_TIMESTAMP}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    ConnectionLost,
    ConnectionOk,
}

/// An email template with token placeholders in all three parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub plain_text: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub plain_text: String,
    pub html: String,
}

impl EmailTemplate {
    /// Literal find-and-replace of placeholder tokens.
    ///
    /// Tokens missing from the map stay verbatim: user-authored templates
    /// may reference optional tokens, and a typo'd placeholder is easier to
    /// spot in the delivered mail than a hard error at send time.
    pub fn render(&self, tokens: &BTreeMap<String, String>) -> RenderedEmail {
        RenderedEmail {
            subject: substitute(&self.subject, tokens),
            plain_text: substitute(&self.plain_text, tokens),
            html: substitute(&self.html, tokens),
        }
    }
}

fn substitute(text: &str, tokens: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (token, value) in tokens {
        out = out.replace(token.as_str(), value);
    }
    out
}

/// The template pair the connection trigger sends from. Overridable in
/// configuration; defaults cover the standard tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSet {
    pub connection_lost: EmailTemplate,
    pub connection_ok: EmailTemplate,
}

impl TemplateSet {
    pub fn template_for(&self, kind: TemplateKind) -> &EmailTemplate {
        match kind {
            TemplateKind::ConnectionLost => &self.connection_lost,
            TemplateKind::ConnectionOk => &self.connection_ok,
        }
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            connection_lost: EmailTemplate {
                subject: "Connection lost: {DEVICE_NAME}".into(),
                plain_text: "Device {DEVICE_NAME} has stopped reporting.\n\
                             Last message: {PREV_TIMESTAMP}\n\
                             Detected: {TIMESTAMP}\n\
                             Details: {DEVICE_LINK}\n"
                    .into(),
                html: "<p>Device <a href=\"{DEVICE_LINK}\">{DEVICE_NAME}</a> has stopped \
                       reporting.</p><p>Last message: {PREV_TIMESTAMP}<br>Detected: \
                       {TIMESTAMP}</p>"
                    .into(),
            },
            connection_ok: EmailTemplate {
                subject: "Connection restored: {DEVICE_NAME}".into(),
                plain_text: "Device {DEVICE_NAME} is reporting again since {TIMESTAMP}.\n\
                             Details: {DEVICE_LINK}\n"
                    .into(),
                html: "<p>Device <a href=\"{DEVICE_LINK}\">{DEVICE_NAME}</a> is reporting \
                       again since {TIMESTAMP}.</p>"
                    .into(),
            },
        }
    }
}
