//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tracelens/config.toml`.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tracelens/` (~/.config/tracelens/)
//! - Cache:  `$XDG_CACHE_HOME/tracelens/` (~/.cache/tracelens/)
//! - State/Logs: `$XDG_STATE_HOME/tracelens/` (~/.local/state/tracelens/)
//!
//! The two roots the engine cares about can also be set via environment
//! variables, which take precedence over the config file:
//! `TRACELENS_SESSIONS_DIR` and `TRACELENS_CACHE_DIR`.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_CACHE_HOME or ~/.cache
fn xdg_cache_home() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".cache"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Root directory holding transcript files (default ~/.codex/sessions)
    pub sessions_dir: Option<PathBuf>,

    /// Directory for the index store and timeline cache documents
    pub cache_dir: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tracelens/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tracelens").join("config.toml")
    }

    /// Resolved source root. Precedence: `TRACELENS_SESSIONS_DIR` env var,
    /// config file, then `~/.codex/sessions`.
    pub fn sessions_dir(&self) -> PathBuf {
        if let Some(dir) = std::env::var_os("TRACELENS_SESSIONS_DIR") {
            return PathBuf::from(dir);
        }
        self.sessions_dir
            .clone()
            .unwrap_or_else(|| home_dir().join(".codex").join("sessions"))
    }

    /// Resolved cache directory. Precedence: `TRACELENS_CACHE_DIR` env var,
    /// config file, then `$XDG_CACHE_HOME/tracelens`.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = std::env::var_os("TRACELENS_CACHE_DIR") {
            return PathBuf::from(dir);
        }
        self.cache_dir
            .clone()
            .unwrap_or_else(|| xdg_cache_home().join("tracelens"))
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tracelens/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tracelens")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("tracelens.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.sessions_dir.is_none());
        assert!(config.cache_dir.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.max_files, 5);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
sessions_dir = "/data/transcripts"
cache_dir = "/var/cache/tracelens"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.sessions_dir.as_deref(),
            Some(std::path::Path::new("/data/transcripts"))
        );
        assert_eq!(
            config.cache_dir.as_deref(),
            Some(std::path::Path::new("/var/cache/tracelens"))
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_configured_dirs_win_over_defaults() {
        let config: Config = toml::from_str(r#"sessions_dir = "/data/t""#).unwrap();
        // No env override in this test process for the config-file case
        if std::env::var_os("TRACELENS_SESSIONS_DIR").is_none() {
            assert_eq!(config.sessions_dir(), PathBuf::from("/data/t"));
        }
    }
}
