use std::collections::HashMap;

use atmo_core::{CallerIdentity, Role};
use axum::http::{HeaderMap, StatusCode};
use thiserror::Error;

use crate::config::ApiKeyConfig;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing API key")]
    MissingKey,
    #[error("unknown API key")]
    UnknownKey,
    #[error("caller lacks required role {0:?}")]
    Forbidden(Role),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingKey | AuthError::UnknownKey => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

/// Static API-key table resolving callers to explicit identities.
///
/// The resolved identity is passed into operations rather than looked up
/// ambiently, so everything below the HTTP layer stays independently
/// testable.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<String, CallerIdentity>,
}

impl ApiKeys {
    pub fn from_config(entries: &[ApiKeyConfig]) -> Self {
        let keys = entries
            .iter()
            .map(|entry| {
                (
                    entry.key.clone(),
                    CallerIdentity::new(entry.subject.as_str(), entry.roles.clone()),
                )
            })
            .collect();
        Self { keys }
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Result<CallerIdentity, AuthError> {
        let key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingKey)?;

        self.keys.get(key).cloned().ok_or(AuthError::UnknownKey)
    }
}

/// Resolve the caller and require a role. Admin implies every role.
pub fn authorize(
    keys: &ApiKeys,
    headers: &HeaderMap,
    role: Role,
) -> Result<CallerIdentity, AuthError> {
    let identity = keys.resolve(headers)?;
    if identity.has_role(role) || identity.has_role(Role::Admin) {
        Ok(identity)
    } else {
        Err(AuthError::Forbidden(role))
    }
}
