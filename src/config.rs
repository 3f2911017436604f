use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use crate::error::RasidError;
use crate::types::{Editor, SyncConfig};

/// Minimum gap between two partner calls inside one sync pass.
pub const MIN_PACING_MS: u64 = 500;
/// Bounds for the global sync frequency, in seconds.
pub const MIN_FREQUENCY_SECS: u64 = 10;
pub const MAX_FREQUENCY_SECS: u64 = 300;
/// Bounds for a connection's own polling interval, in seconds.
pub const MIN_INTERVAL_SECS: u64 = 10;
pub const MAX_INTERVAL_SECS: u64 = 86_400;

pub static CONFIG: LazyLock<Config> =
    LazyLock::new(|| Config::load().expect("FATAL: failed to load rasid configuration"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    pub proxy: Option<Url>,
}

/// Tuning knobs for the partner client and the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub request_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub pacing_ms: u64,
    pub retry_max_times: usize,
    /// Used to seed `sync_settings` on an empty database.
    pub default_enabled: bool,
    pub default_frequency_secs: u64,
    pub discovery_per_minute: u32,
    pub system_email: String,
    pub system_name: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite:rasid.sqlite".to_string(),
            loglevel: "info".to_string(),
            proxy: None,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            discovery_timeout_secs: 10,
            pacing_ms: 1000,
            retry_max_times: 2,
            default_enabled: false,
            default_frequency_secs: 60,
            discovery_per_minute: 10,
            system_email: "auto-sync@system".to_string(),
            system_name: "Auto Sync".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then `config.toml`, then `RASID_*` environment variables
    /// (`RASID_SYNC__PACING_MS=750`).
    pub fn load() -> Result<Self, RasidError> {
        let cfg: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("RASID_").split("__"))
            .extract()
            .map_err(Box::new)?;
        Ok(cfg)
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Configured pacing, never below [`MIN_PACING_MS`].
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms.max(MIN_PACING_MS))
    }

    /// Seed for the persisted sync configuration on a fresh database.
    pub fn default_sync_config(&self) -> SyncConfig {
        SyncConfig {
            enabled: self.default_enabled,
            frequency: self
                .default_frequency_secs
                .clamp(MIN_FREQUENCY_SECS, MAX_FREQUENCY_SECS),
        }
    }

    pub fn system_editor(&self) -> Editor {
        Editor {
            email: self.system_email.clone(),
            name: self.system_name.clone(),
        }
    }
}
