//! Runtime configuration.
//!
//! Read from the environment (after `.env` is loaded by the binary).
//! Command-line flags take precedence over everything here.
//!
//! | Variable              | Default           |
//! |-----------------------|-------------------|
//! | `FIELDMAP_PORT`       | `3000`            |
//! | `FIELDMAP_RULES_DIR`  | `.fieldmap/rules` |
//! | `FIELDMAP_LOG_FORMAT` | `pretty`          |

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::logging::LogFormat;

pub const PORT_VAR: &str = "FIELDMAP_PORT";
pub const RULES_DIR_VAR: &str = "FIELDMAP_RULES_DIR";
pub const LOG_FORMAT_VAR: &str = "FIELDMAP_LOG_FORMAT";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Directory where stored rule sets live (relative to current dir).
pub const DEFAULT_RULES_DIR: &str = ".fieldmap/rules";

/// Maximum upload size accepted by the HTTP API (50 MB).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub rules_dir: PathBuf,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            rules_dir: PathBuf::from(DEFAULT_RULES_DIR),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unset or blank means default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(port) = get(PORT_VAR) {
            config.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                var: PORT_VAR,
                value: port.clone(),
                reason: "expected a port number".to_string(),
            })?;
        }

        if let Some(dir) = get(RULES_DIR_VAR) {
            config.rules_dir = PathBuf::from(dir);
        }

        if let Some(format) = get(LOG_FORMAT_VAR) {
            config.log_format = format.parse().map_err(|reason| ConfigError::Invalid {
                var: LOG_FORMAT_VAR,
                value: format.clone(),
                reason,
            })?;
        }

        Ok(config)
    }
}

/// Rules directory from the environment, falling back to the default.
pub fn rules_dir() -> PathBuf {
    std::env::var(RULES_DIR_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_DIR))
}
