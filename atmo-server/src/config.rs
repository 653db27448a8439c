use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use atmo_core::{HealthPolicy, Role};
use atmo_notify::{SmtpConfig, TemplateSet};
use atmo_queue::PumpConfig;
use jiff::SignedDuration;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub health: HealthConfig,
    pub sweep: SweepConfig,
    pub delivery: DeliveryConfig,
    pub notifications: NotificationConfig,
    pub api_keys: Vec<ApiKeyConfig>,
    pub simulator: SimulatorConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".parse().unwrap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite {
        data_dir: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub physical_silence_secs: u64,
    pub virtual_silence_secs: u64,
    pub offline_confirmation_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let policy = HealthPolicy::default();
        Self {
            physical_silence_secs: policy.physical_silence.as_secs() as u64,
            virtual_silence_secs: policy.virtual_silence.as_secs() as u64,
            offline_confirmation_secs: policy.offline_confirmation.as_secs() as u64,
        }
    }
}

impl HealthConfig {
    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            physical_silence: SignedDuration::from_secs(self.physical_silence_secs as i64),
            virtual_silence: SignedDuration::from_secs(self.virtual_silence_secs as i64),
            offline_confirmation: SignedDuration::from_secs(
                self.offline_confirmation_secs as i64,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub poll_interval_secs: u64,
    pub batch_limit: usize,
    pub redelivery_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            batch_limit: 32,
            redelivery_secs: 120,
        }
    }
}

impl DeliveryConfig {
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            batch_limit: self.batch_limit,
            redelivery_after: SignedDuration::from_secs(self.redelivery_secs as i64),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// SMTP settings; notifications are rendered but dropped when absent.
    pub smtp: Option<SmtpConfig>,
    pub recipients: Vec<String>,
    /// Base URL the {DEVICE_LINK} token points into.
    pub dashboard_url: String,
    pub templates: Option<TemplateSet>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            smtp: None,
            recipients: Vec::new(),
            dashboard_url: "http://localhost:8080".to_string(),
            templates: None,
        }
    }
}

impl NotificationConfig {
    pub fn templates(&self) -> TemplateSet {
        self.templates.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub subject: String,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub enabled: bool,
    pub device_count: usize,
    pub interval_secs: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_count: 3,
            interval_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.health.policy(), HealthPolicy::default());
        assert!(!config.simulator.enabled);
    }

    #[test]
    fn parses_full_config() {
        let text = r#"
            [server]
            http_addr = "0.0.0.0:9090"

            [storage]
            backend = "sqlite"
            data_dir = "/var/lib/atmo"

            [health]
            physical_silence_secs = 300
            virtual_silence_secs = 7200
            offline_confirmation_secs = 600

            [sweep]
            interval_secs = 30

            [notifications]
            recipients = ["ops@example.com"]
            dashboard_url = "https://atmo.example.com"

            [notifications.smtp]
            host = "smtp.example.com"
            port = 587
            username = "atmo"
            password = "secret"
            from = "atmo <noreply@example.com>"

            [[api_keys]]
            key = "k1"
            subject = "hub"
            roles = ["device_writer"]

            [simulator]
            enabled = true
            device_count = 5
            interval_secs = 10
        "#;

        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.server.http_addr.port(), 9090);
        assert!(matches!(config.storage, StorageConfig::Sqlite { .. }));
        assert_eq!(
            config.health.policy().physical_silence,
            SignedDuration::from_secs(300)
        );
        assert_eq!(config.api_keys.len(), 1);
        assert_eq!(config.api_keys[0].roles, vec![Role::DeviceWriter]);
        assert!(config.notifications.smtp.is_some());
        assert!(config.simulator.enabled);
    }
}
