use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::Config;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/boardmux/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("boardmux").join("config.toml")
    }

    /// Loads configuration from the default config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`.
    ///
    /// - If the file doesn't exist, returns `Config::default()`.
    /// - If the file exists, parses it as TOML and validates.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::ValidationError { message });

        if let Err(e) = self.router.socket_addr() {
            return invalid(format!(
                "Invalid bind address '{}': {}",
                self.router.bind_addr, e
            ));
        }

        let backends = &self.backends;
        if backends.port_range == 0 {
            return invalid("backends.port_range must be greater than zero".to_string());
        }
        if u32::from(backends.base_port) + u32::from(backends.port_range) > 65536 {
            return invalid(format!(
                "Port range {}+{} exceeds 65535",
                backends.base_port, backends.port_range
            ));
        }
        let timeouts = [
            ("router.request_timeout_seconds", self.router.request_timeout_seconds),
            ("backends.startup_timeout_seconds", backends.startup_timeout_seconds),
            ("backends.idle_timeout_seconds", backends.idle_timeout_seconds),
            ("notebook.startup_timeout_seconds", self.notebook.startup_timeout_seconds),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return invalid(format!("{} must be greater than zero", name));
        }
        if backends.sweep_interval_seconds == 0 {
            return invalid("backends.sweep_interval_seconds must be greater than zero".to_string());
        }
        if !backends.health_path.starts_with('/') {
            return invalid(format!(
                "backends.health_path '{}' must start with '/'",
                backends.health_path
            ));
        }
        if !backends.args.iter().any(|arg| arg.contains("{port}")) {
            return invalid("backends.args must reference {port}".to_string());
        }
        if self.container.max_concurrent_requests == 0 {
            return invalid("container.max_concurrent_requests must be greater than zero".to_string());
        }

        Ok(())
    }
}
