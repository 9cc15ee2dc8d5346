//! taskpool configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high -> low):
//! 1. CLI arguments
//! 2. Environment variables (TASKPOOL_POOL_SIZE, TASKPOOL_MAX_SYNC_MS)
//! 3. Project-level (./taskpool.toml)
//! 4. User-level (~/.config/taskpool/config.toml)
//! 5. Default values
//! ```
//!
//! # Example file
//!
//! ```toml
//! [pool]
//! pool_size = 4
//! max_sync_ms = 30000
//!
//! [log]
//! level = "debug"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::runtime::scheduler::PoolConfig;
use crate::util::logger::LogLevel;

/// Project-level config file name.
pub const PROJECT_CONFIG_FILE: &str = "taskpool.toml";

/// Environment variable overriding `pool.pool_size`.
pub const ENV_POOL_SIZE: &str = "TASKPOOL_POOL_SIZE";

/// Environment variable overriding `pool.max_sync_ms`.
pub const ENV_MAX_SYNC_MS: &str = "TASKPOOL_MAX_SYNC_MS";

/// Everything that can be set from a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// Logging settings
    #[serde(default)]
    pub log: LogSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LogSettings {
    #[serde(default)]
    pub level: LogLevel,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config");
        Self::from_toml(&content)
    }

    /// Load the effective settings: the project file if present, otherwise
    /// the user file if present, otherwise defaults. Environment overrides
    /// are applied on top.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match find_config_file() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_POOL_SIZE) {
            self.pool.pool_size = parse_var(ENV_POOL_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_SYNC_MS) {
            self.pool.max_sync_ms = parse_var(ENV_MAX_SYNC_MS, &value)?;
        }
        Ok(())
    }

    /// Serialize as pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write settings to `path`, creating parent directories.
    pub fn save_to(
        &self,
        path: &Path,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }
        fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("taskpool"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("taskpool"));
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("taskpool"));
    }

    None
}

/// Get the user config file path (~/.config/taskpool/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// First existing config file, project-level before user-level.
pub fn find_config_file() -> Option<PathBuf> {
    let project = PathBuf::from(PROJECT_CONFIG_FILE);
    if project.is_file() {
        return Some(project);
    }
    get_config_path().filter(|path| path.is_file())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: &'static str, value: String },
}
