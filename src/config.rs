//! Hub configuration loaded from `hub.toml`
//!
//! Every section and field is optional; anything missing takes the value of
//! the reference deployment (public HiveMQ broker, Wokwi device id).

use anyhow::Context;
use serde::Deserialize;
use smartdesk_shared::limits;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SMARTDESK_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub mqtt: MqttConfig,
    pub device: DeviceConfig,
    pub store: StoreConfig,
    pub thresholds: ThresholdConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Generated from the process id when unset
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    /// Pause after a connection error before polling again
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".into(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            reconnect_delay_ms: 2000,
        }
    }
}

impl MqttConfig {
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("smartdesk-hub-{}", std::process::id()))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "ESP32-SDA-WOKWI".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Keep records in memory only; nothing survives a restart
    pub ephemeral: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            ephemeral: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThresholdConfig {
    pub stale_after_ms: u64,
    pub long_sit_minutes: u64,
    /// Period of the status log line
    pub status_interval_secs: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: limits::STALE_AFTER_MS,
            long_sit_minutes: limits::LONG_SIT_MINUTES,
            status_interval_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing directive; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Where the active configuration came from
///
/// Config is read before tracing is installed, so the outcome is kept and
/// logged afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Invalid { path: PathBuf, error: String },
    Defaults,
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("[CONFIG] Loaded from {}", path.display()),
            ConfigSource::Invalid { path, error } => {
                warn!("[CONFIG] Failed to load {}: {} - using defaults", path.display(), error)
            }
            ConfigSource::Defaults => warn!("[CONFIG] No config file found - using defaults"),
        }
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Load from `$SMARTDESK_CONFIG`, `config/hub.toml` or `../config/hub.toml`
    pub fn load_or_default() -> (Self, ConfigSource) {
        let candidates = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => vec![PathBuf::from(path)],
            None => vec![
                PathBuf::from("config").join("hub.toml"),
                PathBuf::from("..").join("config").join("hub.toml"),
            ],
        };
        Self::load_first(&candidates)
    }

    /// First existing candidate wins; a broken file does not fall through
    pub fn load_first(candidates: &[PathBuf]) -> (Self, ConfigSource) {
        let Some(path) = candidates.iter().find(|p| p.exists()) else {
            return (Self::default(), ConfigSource::Defaults);
        };

        match Self::load(path) {
            Ok(config) => (config, ConfigSource::File(path.clone())),
            Err(e) => (
                Self::default(),
                ConfigSource::Invalid {
                    path: path.clone(),
                    error: format!("{:#}", e),
                },
            ),
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!("[CONFIG] Broker: {}:{}", self.mqtt.host, self.mqtt.port);
        info!("[CONFIG] Device: {}", self.device.id);
        if self.store.ephemeral {
            info!("[CONFIG] Store: in memory");
        } else {
            info!("[CONFIG] Store: {}", self.store.data_dir.display());
        }
        info!(
            "[CONFIG] Stale after {}ms, long sit at {}min",
            self.thresholds.stale_after_ms, self.thresholds.long_sit_minutes
        );
    }
}
