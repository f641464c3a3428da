//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/maildesk/settings.json` (or the
//! platform equivalent) and loaded at startup. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{HEARTBEAT_INTERVAL_SECS, ONLINE_WINDOW_SECS};
use crate::providers::api::DEFAULT_CSRF_HEADER;

/// Errors loading, saving or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not determine a configuration directory")]
    NoConfigDir,

    #[error("settings I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend connection.
    pub api: ApiSettings,
    /// Background refresh intervals.
    pub polling: PollingSettings,
    /// Bridge liveness thresholds.
    pub presence: PresenceSettings,
    /// Handoff preparation timing.
    pub compose: ComposeSettings,
    /// Basket cache sizing.
    pub cache: CacheSettings,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL of the REST API, e.g. `https://cases.example/api/`.
    pub base_url: String,
    /// Header carrying the CSRF token on mutating requests.
    pub csrf_header: String,
    /// CSRF token, when not obtained from the session.
    pub csrf_token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            csrf_token: None,
            timeout_seconds: 30,
        }
    }
}

/// Background polling intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Agent and account list refresh, in seconds.
    pub presence_interval_seconds: u64,
    /// Basket refresh, in seconds.
    pub basket_interval_seconds: u64,
    /// Message list refresh, in seconds.
    pub messages_interval_seconds: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            presence_interval_seconds: 30,
            basket_interval_seconds: 60,
            messages_interval_seconds: 30,
        }
    }
}

impl PollingSettings {
    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_seconds)
    }

    pub fn basket_interval(&self) -> Duration {
        Duration::from_secs(self.basket_interval_seconds)
    }

    pub fn messages_interval(&self) -> Duration {
        Duration::from_secs(self.messages_interval_seconds)
    }
}

/// Bridge liveness thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    /// An agent silent for this long is offline.
    pub online_window_seconds: i64,
    /// How often agents are expected to report.
    pub heartbeat_interval_seconds: i64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            online_window_seconds: ONLINE_WINDOW_SECS,
            heartbeat_interval_seconds: HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl PresenceSettings {
    pub fn online_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.online_window_seconds)
    }
}

/// Handoff preparation timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeSettings {
    /// How long the "handed off" confirmation stays before the dialog closes.
    pub confirmation_ms: u64,
    /// Quiet period before a free-text edit is saved.
    pub note_debounce_ms: u64,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            confirmation_ms: 2000,
            note_debounce_ms: 800,
        }
    }
}

impl ComposeSettings {
    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }

    pub fn note_debounce(&self) -> Duration {
        Duration::from_millis(self.note_debounce_ms)
    }
}

/// Basket cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cases whose baskets are kept in memory.
    pub max_cases: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_cases: 32 }
    }
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        directories::ProjectDirs::from("", "", "maildesk")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Loads settings from the default location.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Loads settings from a file, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let settings: Settings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes settings as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Rejects settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let url = url::Url::parse(&self.api.base_url).map_err(|e| SettingsError::Invalid {
            field: "api.base_url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SettingsError::Invalid {
                field: "api.base_url",
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let positive = [
            ("api.timeout_seconds", self.api.timeout_seconds),
            ("polling.presence_interval_seconds", self.polling.presence_interval_seconds),
            ("polling.basket_interval_seconds", self.polling.basket_interval_seconds),
            ("polling.messages_interval_seconds", self.polling.messages_interval_seconds),
            ("cache.max_cases", self.cache.max_cases as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SettingsError::Invalid {
                field,
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.presence.online_window_seconds <= 0 {
            return Err(SettingsError::Invalid {
                field: "presence.online_window_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
