//! Runtime configuration for scheduling and synchronization.
//!
//! # Responsibility
//! - Provide defaults for every tunable so an empty document is valid.
//! - Load JSON config files and apply the `HOMEFLOW_API_URL` override.
//!
//! # Invariants
//! - A config returned by [`CoreConfig::load`] or
//!   [`CoreConfig::from_json_str`] has passed [`CoreConfig::validate`].

use crate::logging::normalize_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides `api_base_url`.
pub const API_URL_ENV: &str = "HOMEFLOW_API_URL";

/// Days an applied `changeId` stays replay-protected.
pub const DEFAULT_CHANGE_LOG_RETENTION_DAYS: u32 = 30;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid { field: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid { field, message } => write!(f, "invalid config `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Base URL of the authoritative API, without trailing slash.
    pub api_base_url: String,
    /// Seconds between background connectivity probes.
    pub probe_interval_secs: u64,
    /// Upper bound for a single connectivity probe.
    pub probe_timeout_secs: u64,
    /// Upper bound for push/pull requests.
    pub request_timeout_secs: u64,
    /// Maximum queued changes sent in one batch push.
    pub push_batch_size: usize,
    /// Log level passed to the file logger.
    pub log_level: String,
    /// Days the authoritative store remembers applied `changeId`s.
    pub change_log_retention_days: u32,
    pub scheduler: SchedulerConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            probe_interval_secs: 10,
            probe_timeout_secs: 5,
            request_timeout_secs: 15,
            push_batch_size: 100,
            log_level: "info".to_string(),
            change_log_retention_days: DEFAULT_CHANGE_LOG_RETENTION_DAYS,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Assignment generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Lower bound of the adaptive horizon.
    pub min_horizon_days: u32,
    /// Largest horizon a caller may request.
    pub max_horizon_days: u32,
    /// Start delay of a brand-new chore whose interval is three days or less.
    pub first_occurrence_offset_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_horizon_days: 30,
            max_horizon_days: 730,
            first_occurrence_offset_days: 0,
        }
    }
}

impl CoreConfig {
    /// Parses a JSON document, applies the environment override and
    /// validates the result.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(text)?;
        config.apply_env_override(std::env::var(API_URL_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON file; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Self::from_json_str(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::from_json_str("{}"),
            Err(err) => Err(err.into()),
        }
    }

    fn apply_env_override(&mut self, api_url: Option<String>) {
        if let Some(url) = api_url.filter(|value| !value.trim().is_empty()) {
            self.api_base_url = url;
        }
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid {
                field: "api_base_url",
                message: format!("`{}` is not an http(s) url", self.api_base_url),
            });
        }
        if self.probe_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts",
                message: "timeouts must be at least one second".to_string(),
            });
        }
        if self.probe_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "probe_interval_secs",
                message: "must be at least one second".to_string(),
            });
        }
        if let Err(err) = normalize_level(&self.log_level) {
            return Err(ConfigError::Invalid {
                field: "log_level",
                message: err.to_string(),
            });
        }
        if self.push_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "push_batch_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.change_log_retention_days == 0 {
            return Err(ConfigError::Invalid {
                field: "change_log_retention_days",
                message: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.min_horizon_days == 0
            || self.scheduler.min_horizon_days > self.scheduler.max_horizon_days
        {
            return Err(ConfigError::Invalid {
                field: "scheduler.min_horizon_days",
                message: format!(
                    "must be within 1..={}",
                    self.scheduler.max_horizon_days
                ),
            });
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config: CoreConfig = serde_json::from_str("{}").expect("empty config parses");
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.scheduler.min_horizon_days, 30);
        assert_eq!(config.push_batch_size, 100);
        assert_eq!(config.change_log_retention_days, 30);
    }

    #[test]
    fn zero_retention_is_rejected() {
        let config = CoreConfig {
            change_log_retention_days: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "change_log_retention_days",
                ..
            })
        ));
    }

    #[test]
    fn env_override_wins_and_trailing_slash_is_trimmed() {
        let mut config = CoreConfig::default();
        config.apply_env_override(Some("https://chores.example/api/".to_string()));
        assert_eq!(config.api_base_url, "https://chores.example/api");

        config.apply_env_override(Some("   ".to_string()));
        assert_eq!(config.api_base_url, "https://chores.example/api");
    }

    #[test]
    fn rejects_inverted_horizon_bounds() {
        let mut config = CoreConfig::default();
        config.scheduler.min_horizon_days = 900;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "scheduler.min_horizon_days",
                ..
            })
        ));
    }

    #[test]
    fn load_reads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"push_batch_size": 25, "scheduler": {{"max_horizon_days": 365}}}}"#)
            .expect("write config");

        let config = CoreConfig::load(file.path()).expect("config loads");
        assert_eq!(config.push_batch_size, 25);
        assert_eq!(config.scheduler.max_horizon_days, 365);
        assert_eq!(config.scheduler.min_horizon_days, 30);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            CoreConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
