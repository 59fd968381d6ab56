//! Service configuration.
//!
//! Loaded once at startup from a TOML file and then shared read-only through
//! the application context. Required settings that are absent or empty abort
//! startup with [`AppError::Config`].

use crate::error::AppError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Route GitLab delivers webhook events to.
pub const WEBHOOK_ROUTE: &str = "/gitlab/webhook";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: String,

    /// Public base URL of this service, used as the webhook callback.
    pub public_url: String,

    /// SQLite database file.
    pub database_path: PathBuf,

    pub gitlab: GitLabConfig,

    pub notify: NotifyConfig,

    /// GitLab username -> chat handle.
    pub users: HashMap<String, String>,

    pub chat: ChatConfig,
}

/// Connection settings for the GitLab instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitLabConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Accept invalid TLS certificates. Registered webhooks mirror this by
    /// disabling SSL verification on GitLab's side.
    pub tls_insecure_skip_verify: bool,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
            tls_insecure_skip_verify: false,
        }
    }
}

/// Notification queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Default chat channel for notifications.
    pub channel: String,

    /// Minutes an unassigned item waits before a reminder.
    pub reminder_minutes: i64,

    /// Minutes between background sweeps.
    pub sweep_interval_minutes: u64,

    /// Repositories (`group/project`) that are never relayed nor hooked.
    #[serde(alias = "filtered_repos")]
    pub excluded_repos: Vec<String>,

    /// Re-attempt hook registration on projects that previously answered 403.
    pub retry_skipped_hooks: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            reminder_minutes: 30,
            sweep_interval_minutes: 10,
            excluded_repos: Vec::new(),
            retry_skipped_hooks: false,
        }
    }
}

impl NotifyConfig {
    /// Whether `path_with_namespace` is in the exclusion list.
    pub fn is_excluded(&self, path_with_namespace: &str) -> bool {
        self.excluded_repos.iter().any(|r| r == path_with_namespace)
    }

    /// Reminder threshold in seconds.
    pub fn reminder_threshold_secs(&self) -> i64 {
        self.reminder_minutes * 60
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1) * 60)
    }
}

/// Outbound chat delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Incoming-webhook URL of the chat system. Messages are only logged when unset.
    pub outgoing_webhook_url: Option<String>,

    /// Per-message delivery timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            outgoing_webhook_url: None,
            timeout_secs: 10,
        }
    }
}

impl ChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            public_url: String::new(),
            database_path: PathBuf::from("gitlab-relay.db"),
            gitlab: GitLabConfig::default(),
            notify: NotifyConfig::default(),
            users: HashMap::new(),
            chat: ChatConfig::default(),
        }
    }
}

impl Config {
    /// Read and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required setting is present.
    pub fn validate(&self) -> Result<(), AppError> {
        let required = [
            ("gitlab.token", &self.gitlab.token),
            ("gitlab.base_url", &self.gitlab.base_url),
            ("notify.channel", &self.notify.channel),
            ("public_url", &self.public_url),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::config_missing(field));
            }
        }
        if self.notify.reminder_minutes <= 0 {
            return Err(AppError::config("notify.reminder_minutes must be positive"));
        }
        Ok(())
    }

    /// Callback URL registered on every project hook.
    pub fn webhook_url(&self) -> String {
        format!("{}{}", self.public_url.trim_end_matches('/'), WEBHOOK_ROUTE)
    }
}
