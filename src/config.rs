/**
 * config.rs
 *
 * Runtime configuration
 *
 * Read from a TOML file; every field has a default so an empty or missing
 * file is valid. The file path comes from the caller or the
 * MESHCALL_CONFIG environment variable.
 *
 * ```toml
 * port = 10001
 *
 * [dial]
 * fan_out = 3
 * attempt_timeout_ms = 3000
 * overall_timeout_ms = 10000
 * ```
 */

use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::signalling::DialConfig;

/// Port both ends listen on unless a contact says otherwise
pub const DEFAULT_PORT: u16 = 10001;

pub const CONFIG_ENV: &str = "MESHCALL_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signalling listen port
    pub port: u16,
    pub dial: DialSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            dial: DialSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialSettings {
    pub fan_out: usize,
    pub attempt_timeout_ms: u64,
    pub overall_timeout_ms: u64,
}

impl Default for DialSettings {
    fn default() -> Self {
        Self {
            fan_out: 3,
            attempt_timeout_ms: 3000,
            overall_timeout_ms: 10_000,
        }
    }
}

impl From<&DialSettings> for DialConfig {
    fn from(settings: &DialSettings) -> Self {
        DialConfig {
            fan_out: settings.fan_out,
            attempt_timeout: Duration::from_millis(settings.attempt_timeout_ms),
            overall_timeout: Duration::from_millis(settings.overall_timeout_ms),
        }
    }
}

impl Config {
    /// Load from `path`, else from $MESHCALL_CONFIG, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match env::var_os(CONFIG_ENV) {
                Some(p) => PathBuf::from(p),
                None => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Config =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.dial.fan_out == 0 {
            return Err(ConfigError::Invalid("dial.fan_out must be at least 1".into()));
        }
        if self.dial.attempt_timeout_ms == 0 || self.dial.overall_timeout_ms == 0 {
            return Err(ConfigError::Invalid("dial timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn dial_config(&self) -> DialConfig {
        DialConfig::from(&self.dial)
    }
}
