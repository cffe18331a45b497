//! Configuration management for the ttybridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/ttybridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("poll_interval_ms must be between 10 and 1000, got {0}")]
    InvalidPollInterval(u64),

    #[error("read_buffer_size must be between 256 and 1048576, got {0}")]
    InvalidReadBufferSize(usize),

    #[error("terminal size must be non-zero, got {rows}x{cols}")]
    InvalidWindowSize { rows: u16, cols: u16 },

    #[error("listen_addr is not a valid socket address: {0}")]
    InvalidListenAddr(String),

    #[error("shell not found: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ttybridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Event server configuration.
    pub server: ServerConfig,

    /// Terminal session configuration.
    pub terminal: TerminalConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Event server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP address the WebSocket listener binds to.
    pub listen_addr: String,
}

/// Terminal session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell to run for new sessions.
    pub shell: String,

    /// Value of the TERM variable in the shell's environment.
    pub term: String,

    /// Directory of an auxiliary CLI toolset, appended to the shell's PATH.
    pub extra_path: Option<PathBuf>,

    /// Initial terminal height in rows.
    pub rows: u16,

    /// Initial terminal width in columns.
    pub cols: u16,

    /// Output reader poll timeout in milliseconds. Bounds how long session
    /// shutdown can lag behind a close request.
    pub poll_interval_ms: u64,

    /// Chunk size for reads from the terminal, in bytes.
    pub read_buffer_size: usize,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// How often the registry sweeps out terminated sessions, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8022".to_string(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            term: "xterm-256color".to_string(),
            extra_path: None,
            rows: 24,
            cols: 80,
            poll_interval_ms: 50,
            read_buffer_size: 4096,
            max_sessions: 10,
            sweep_interval_secs: 5,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ttybridge")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TTYBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - TTYBRIDGE_SHELL: Override the session shell
    /// - TTYBRIDGE_LISTEN_ADDR: Override the listener bind address
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TTYBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(shell) = std::env::var("TTYBRIDGE_SHELL") {
            if !shell.is_empty() {
                tracing::info!("Overriding shell from environment: {}", shell);
                self.terminal.shell = shell;
            }
        }

        if let Ok(addr) = std::env::var("TTYBRIDGE_LISTEN_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding listen_addr from environment: {}", addr);
                self.server.listen_addr = addr;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate max_sessions: 1-1000
        if self.terminal.max_sessions < 1 || self.terminal.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.terminal.max_sessions));
        }

        // Validate poll_interval_ms: 10-1000
        if self.terminal.poll_interval_ms < 10 || self.terminal.poll_interval_ms > 1000 {
            return Err(ConfigError::InvalidPollInterval(
                self.terminal.poll_interval_ms,
            ));
        }

        // Validate read_buffer_size: 256 bytes to 1 MiB
        if self.terminal.read_buffer_size < 256 || self.terminal.read_buffer_size > 1024 * 1024 {
            return Err(ConfigError::InvalidReadBufferSize(
                self.terminal.read_buffer_size,
            ));
        }

        // Validate initial terminal size
        if self.terminal.rows == 0 || self.terminal.cols == 0 {
            return Err(ConfigError::InvalidWindowSize {
                rows: self.terminal.rows,
                cols: self.terminal.cols,
            });
        }

        // Validate listen_addr parses as a socket address
        if self
            .server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::InvalidListenAddr(
                self.server.listen_addr.clone(),
            ));
        }

        // Validate shell path exists
        let shell_path = Path::new(&self.terminal.shell);

        // Check if it's an absolute path that exists
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(self.terminal.shell.clone()));
            }
        } else {
            // For non-absolute paths, try to find in PATH
            if which::which(&self.terminal.shell).is_err() {
                return Err(ConfigError::InvalidShellPath(self.terminal.shell.clone()));
            }
        }

        // Validate log_level is a known value
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/ttybridge/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
