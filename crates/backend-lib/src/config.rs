//! Configuration management.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "meetwatch.toml";
/// Prefix of environment overrides, e.g. `MEETWATCH_BIND_ADDR`
pub const ENV_PREFIX: &str = "MEETWATCH_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Path prefix of every route, shared with the peer
    pub base_url: String,
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Secret used to answer endpoint validation challenges
    pub webhook_secret: String,
    /// Origin of the peer instance, e.g. `https://peer.example.com`
    pub peer_address: Option<String>,
    pub peer_health_timeout_ms: u64,
    pub peer_forward_timeout_ms: u64,
    pub persistence: PersistenceSettings,
}

/// Watch persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub enabled: bool,
    /// Root of the flat-file store
    pub data_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 12345)),
            base_url: String::new(),
            log_level: "info".to_string(),
            log_json: false,
            webhook_secret: String::new(),
            peer_address: None,
            peer_health_timeout_ms: 100,
            peer_forward_timeout_ms: 2000,
            persistence: PersistenceSettings::default(),
        }
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from defaults, then `path` if it exists, then `MEETWATCH_*` variables.
    /// Nested keys use a double underscore: `MEETWATCH_PERSISTENCE__ENABLED`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!("unknown log level `{}`", self.log_level)));
        }

        if self.peer_health_timeout_ms == 0 || self.peer_health_timeout_ms >= 1000 {
            return Err(AppError::Config(
                "peer_health_timeout_ms must be between 1 and 999".to_string(),
            ));
        }

        if self.peer_forward_timeout_ms == 0 {
            return Err(AppError::Config("peer_forward_timeout_ms must be positive".to_string()));
        }

        if !self.base_url.is_empty() && !self.base_url.starts_with('/') {
            return Err(AppError::Config(format!("base_url `{}` must start with '/'", self.base_url)));
        }

        if let Some(address) = &self.peer_address {
            let url = reqwest::Url::parse(address)
                .map_err(|e| AppError::Config(format!("invalid peer_address `{address}`: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(AppError::Config(format!(
                    "peer_address `{address}` must be an absolute http(s) URL"
                )));
            }
        }

        if self.persistence.enabled && self.persistence.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("persistence.data_dir must not be empty".to_string()));
        }

        Ok(())
    }

    /// Settings suited to local development: verbose logs, no peer.
    #[must_use]
    pub fn dev(mut self) -> Self {
        self.log_level = "debug".to_string();
        self.peer_address = None;
        self
    }

    /// `path` prefixed with the configured base URL
    pub fn route(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    pub fn peer_health_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_health_timeout_ms)
    }

    pub fn peer_forward_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_forward_timeout_ms)
    }
}
