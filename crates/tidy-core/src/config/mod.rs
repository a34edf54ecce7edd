//! Engine configuration.
//!
//! `EngineConfig` is read from a JSON file by hosts (the CLI keeps it in the
//! platform config directory) and can be overridden from the environment.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_API_BASE_URL: &str = "TIDY_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "TIDY_API_TOKEN";
pub const ENV_USER_ID: &str = "TIDY_USER_ID";

/// Runtime settings shared by every engine component.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Backend REST base URL, e.g. `https://api.example.com/api`
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Bearer token sent with every backend request
    #[serde(default)]
    pub api_token: Option<String>,
    /// Owner of changes enqueued by this host
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fire_tolerance_secs")]
    pub fire_tolerance_secs: u64,
    #[serde(default = "default_sync_max_attempts")]
    pub sync_max_attempts: u32,
    #[serde(default = "default_sync_base_delay_ms")]
    pub sync_base_delay_ms: u64,
    #[serde(default = "default_sync_drain_interval_secs")]
    pub sync_drain_interval_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

const fn default_poll_interval_secs() -> u64 {
    15
}

const fn default_fire_tolerance_secs() -> u64 {
    60
}

const fn default_sync_max_attempts() -> u32 {
    3
}

const fn default_sync_base_delay_ms() -> u64 {
    2_000
}

const fn default_sync_drain_interval_secs() -> u64 {
    60
}

const fn default_http_timeout_secs() -> u64 {
    15
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            user_id: None,
            poll_interval_secs: default_poll_interval_secs(),
            fire_tolerance_secs: default_fire_tolerance_secs(),
            sync_max_attempts: default_sync_max_attempts(),
            sync_base_delay_ms: default_sync_base_delay_ms(),
            sync_drain_interval_secs: default_sync_drain_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("fire_tolerance_secs", &self.fire_tolerance_secs)
            .field("sync_max_attempts", &self.sync_max_attempts)
            .field("sync_base_delay_ms", &self.sync_base_delay_ms)
            .field("sync_drain_interval_secs", &self.sync_drain_interval_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl EngineConfig {
    /// Load the config file, or the defaults when it does not exist yet.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            Error::Config(format!("invalid config file {}: {error}", path.display()))
        })?;
        config.normalized()
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    /// Apply `TIDY_*` environment overrides on top of the file values.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any lookup, used directly by tests.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = normalize_text_option(lookup(ENV_API_BASE_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_API_TOKEN)) {
            self.api_token = Some(token);
        }
        if let Some(user_id) = normalize_text_option(lookup(ENV_USER_ID)) {
            self.user_id = Some(user_id);
        }
        self.normalized()
    }

    /// Trim optional text, validate the URL and reject zero intervals.
    pub fn normalized(mut self) -> Result<Self> {
        self.api_base_url = match normalize_text_option(self.api_base_url.take()) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
            None => None,
        };
        self.api_token = normalize_text_option(self.api_token.take());
        self.user_id = normalize_text_option(self.user_id.take());

        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".to_string()));
        }
        if self.fire_tolerance_secs == 0 {
            return Err(Error::Config("fire_tolerance_secs must be positive".to_string()));
        }
        if self.sync_max_attempts == 0 {
            return Err(Error::Config("sync_max_attempts must be positive".to_string()));
        }
        if self.sync_drain_interval_secs == 0 {
            return Err(Error::Config(
                "sync_drain_interval_secs must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fire_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.fire_tolerance_secs).unwrap_or(i64::MAX))
    }

    pub const fn sync_base_delay(&self) -> Duration {
        Duration::from_millis(self.sync_base_delay_ms)
    }

    pub const fn sync_drain_interval(&self) -> Duration {
        Duration::from_secs(self.sync_drain_interval_secs)
    }

    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Whether a backend is configured at all.
    pub const fn has_remote(&self) -> bool {
        self.api_base_url.is_some()
    }
}
