//! Orchestrator defaults: bindings applied to every templated call, plus the timeout and
//! poll interval used by waiting operations when the call site gives none.
//!
//! Defaults come from code, optionally overridden by a YAML file and then by environment
//! variables:
//!
//! ```yaml
//! timeout: 30s
//! interval: 500ms
//! bindings:
//!   namespace: staging
//! ```

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use settle_types::Bindings;
use settle_util::expand_tilde;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SETTLE_CONFIG_PATH";
pub const TIMEOUT_ENV: &str = "SETTLE_TIMEOUT";
pub const INTERVAL_ENV: &str = "SETTLE_INTERVAL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{variable} is not a valid duration: '{value}'")]
    InvalidDuration { variable: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Prepended to the call-site bindings of every templated call.
    pub bindings: Bindings,
    #[serde(with = "duration_literal")]
    pub timeout: Duration,
    #[serde(with = "duration_literal")]
    pub interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bindings: Bindings::new(),
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.bindings.insert(name, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Load from the default location (or `SETTLE_CONFIG_PATH`) and apply environment
    /// overrides. A missing file yields the built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(|path| expand_tilde(&path))
            .or_else(default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded orchestrator config");
        Ok(config)
    }

    /// Apply `SETTLE_TIMEOUT` / `SETTLE_INTERVAL` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(timeout) = duration_from_env(TIMEOUT_ENV)? {
            self.timeout = timeout;
        }
        if let Some(interval) = duration_from_env(INTERVAL_ENV)? {
            self.interval = interval;
        }
        Ok(())
    }
}

/// `<config dir>/settle/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|dir| dir.join("settle").join("config.yaml"))
}

fn duration_from_env(variable: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(variable) {
        Ok(value) if !value.trim().is_empty() => settle_util::parse_duration(&value)
            .map(Some)
            .ok_or(ConfigError::InvalidDuration { variable, value }),
        _ => Ok(None),
    }
}

/// Durations as literals (`10s`, `250ms`) or integer seconds.
mod duration_literal {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Literal {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Literal::deserialize(deserializer)? {
            Literal::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            Literal::Text(text) => settle_util::parse_duration(&text)
                .ok_or_else(|| de::Error::custom(format!("invalid duration '{text}'"))),
        }
    }
}
