//! Typed configuration from environment variables and optional TOML.
//!
//! Secrets and deployment coordinates come from the environment, loaded
//! once at startup with a fail-fast check for required vars. Tunables
//! (poll cadence, worker cap, retry and monitor knobs) have defaults and
//! can be overridden from a settings TOML file.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::queue::retry::RetryPolicy;
use crate::queue::{MonitorConfig, QueueConfig};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub scorer_url: String,
    pub scorer_api_key: SecretString,
    pub media_root: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            scorer_url: required_var("SCORER_URL")?,
            scorer_api_key: SecretString::from(required_var("SCORER_API_KEY")?),
            media_root: std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

// ---------------------------------------------------------------------------
// Settings (TOML overlay)
// ---------------------------------------------------------------------------

/// Operational tunables. Every field has a default, so an absent or
/// partial settings file is fine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub queue: QueueSettings,
    pub monitor: MonitorSettings,
    pub scorer: ScorerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub poll_interval_secs: u64,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry: RetrySettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_concurrent: 3,
            max_retries: 5,
            retry: RetrySettings::default(),
        }
    }
}

/// Per-call retry knobs for the scoring client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub check_interval_secs: u64,
    pub stale_after_secs: u64,
    pub warning_backlog: u64,
    pub critical_backlog: u64,
    pub max_error_rate: f64,
    pub alert_window_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            stale_after_secs: 600,
            warning_backlog: 50,
            critical_backlog: 200,
            max_error_rate: 0.2,
            alert_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScorerSettings {
    pub request_timeout_secs: u64,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad settings file {}: {e}", path.display())))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            poll_interval: Duration::from_secs(self.queue.poll_interval_secs),
            max_concurrent: self.queue.max_concurrent,
            max_retries: self.queue.max_retries,
            retry: RetryPolicy {
                max_retries: self.queue.retry.max_retries,
                base_delay: Duration::from_millis(self.queue.retry.base_delay_ms),
                multiplier: self.queue.retry.multiplier,
                max_delay: Duration::from_millis(self.queue.retry.max_delay_ms),
                jitter: self.queue.retry.jitter,
            },
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_secs(self.monitor.check_interval_secs),
            stale_after: Duration::from_secs(self.monitor.stale_after_secs),
            warning_backlog: self.monitor.warning_backlog,
            critical_backlog: self.monitor.critical_backlog,
            max_error_rate: self.monitor.max_error_rate,
            alert_window: Duration::from_secs(self.monitor.alert_window_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.scorer.request_timeout_secs)
    }
}
