use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::models::{Role, User};

const STATE_FILENAME: &str = "gigchat.toml";
const DEFAULT_CHAT_POLL_MS: u64 = 15_000;
const DEFAULT_MESSAGE_POLL_MS: u64 = 3_000;
const DEFAULT_RECONCILE_WINDOW_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_NOTIFICATION_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("no config directory available")]
    NoConfigDir,
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("state could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Settings remembered between runs. Credentials are never written here.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppState {
    pub base_url: String,
    #[serde(default)]
    pub last_email: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join(STATE_FILENAME))
    }

    /// Load the saved state, falling back to defaults when absent or unreadable.
    pub fn load() -> Self {
        match Self::toml_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|err| {
                log::debug!("using default app state: {err}");
                Self::new()
            }),
            None => Self::new(),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str::<AppState>(&text)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// The authenticated viewer, owned by the top-level application.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: User,
    pub token: String,
}

impl Session {
    pub fn new(user: User, token: impl Into<String>) -> Self {
        Self {
            user,
            token: token.into(),
        }
    }

    pub fn viewer_id(&self) -> u64 {
        self.user.id
    }

    pub fn is_client(&self) -> bool {
        self.user.role == Role::Client
    }
}

/// Timing knobs for the chat sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub chat_list_interval: Duration,
    pub message_interval: Duration,
    /// Max distance between an optimistic message and its server echo.
    pub reconcile_window: Duration,
    pub request_timeout: Duration,
    pub notification_duration: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chat_list_interval: Duration::from_millis(DEFAULT_CHAT_POLL_MS),
            message_interval: Duration::from_millis(DEFAULT_MESSAGE_POLL_MS),
            reconcile_window: Duration::from_millis(DEFAULT_RECONCILE_WINDOW_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            notification_duration: Duration::from_millis(DEFAULT_NOTIFICATION_MS),
        }
    }
}

impl SyncSettings {
    /// Defaults overridden by `GIGCHAT_*_MS` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        Ok(Self {
            chat_list_interval: millis_env("GIGCHAT_CHAT_POLL_MS", DEFAULT_CHAT_POLL_MS, &mut lookup)?,
            message_interval: millis_env(
                "GIGCHAT_MESSAGE_POLL_MS",
                DEFAULT_MESSAGE_POLL_MS,
                &mut lookup,
            )?,
            reconcile_window: millis_env(
                "GIGCHAT_RECONCILE_WINDOW_MS",
                DEFAULT_RECONCILE_WINDOW_MS,
                &mut lookup,
            )?,
            request_timeout: millis_env(
                "GIGCHAT_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
                &mut lookup,
            )?,
            notification_duration: millis_env(
                "GIGCHAT_NOTIFICATION_MS",
                DEFAULT_NOTIFICATION_MS,
                &mut lookup,
            )?,
        })
    }
}

fn millis_env<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<Duration, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(raw) = lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty()) else {
        return Ok(Duration::from_millis(default));
    };
    let millis = raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: raw,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(Duration::from_millis(millis))
}
