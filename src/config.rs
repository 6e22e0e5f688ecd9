//! # Time Server Configuration
//!
//! This module defines the configuration structs for the serial link and the serve loop.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [serial]
//! device = "/dev/ttyACM0"
//! baud = 9600
//! read_timeout_ms = 1000
//!
//! [server]
//! poll_interval_ms = 100
//! reconnect_delay_ms = 5000
//! on_decode_error = "exit"
//! log_unrecognized = false
//! ```
//!
//! - Every field has a default, so an empty file (or no file at all) is a valid configuration.
//! - `TIMEKEEPER_DEVICE`, `TIMEKEEPER_BAUD` and `TIMEKEEPER_READ_TIMEOUT_MS` override the file.
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use timekeeper_rs::config::Config;
//! let toml_str = r#"
//! [serial]
//! device = "COM4"
//! baud = 115200
//! "#;
//! let config: Config = toml::from_str(toml_str).unwrap();
//! assert_eq!(config.serial.device, "COM4");
//! assert_eq!(config.server.reconnect_delay_ms, 5000);
//! assert!(config.validate().is_ok());
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Config file looked up when no path is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "timekeeper.toml";

pub const ENV_DEVICE: &str = "TIMEKEEPER_DEVICE";
pub const ENV_BAUD: &str = "TIMEKEEPER_BAUD";
pub const ENV_READ_TIMEOUT_MS: &str = "TIMEKEEPER_READ_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the serial link and the serve loop.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Which serial endpoint to open and how long a single read may wait.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// What to do with a line that is not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Report the failure and stop the server.
    #[default]
    Exit,
    /// Log the failure and keep serving.
    Skip,
}

/// Pacing, backoff and diagnostics for the serve loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub on_decode_error: DecodePolicy,
    #[serde(default)]
    pub log_unrecognized: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            on_decode_error: DecodePolicy::default(),
            log_unrecognized: false,
        }
    }
}

impl Config {
    /// Checks the values that would make the serial port impossible to open.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.device.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.device must not be empty".to_string()));
        }
        if self.serial.baud == 0 {
            return Err(ConfigError::Invalid("serial.baud must be greater than zero".to_string()));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "serial.read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup; unset keys leave the value alone.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup(ENV_DEVICE) {
            tracing::debug!("{} overrides serial.device", ENV_DEVICE);
            self.serial.device = device;
        }
        if let Some(baud) = lookup(ENV_BAUD) {
            self.serial.baud = parse_override(ENV_BAUD, &baud)?;
        }
        if let Some(timeout) = lookup(ENV_READ_TIMEOUT_MS) {
            self.serial.read_timeout_ms = parse_override(ENV_READ_TIMEOUT_MS, &timeout)?;
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}={value:?} is not a valid number")))
}

fn default_device() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyACM0".to_string()
    }
}
fn default_baud() -> u32 { 9600 }
fn default_read_timeout_ms() -> u64 { 1000 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_reconnect_delay_ms() -> u64 { 5000 }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

/// Builds the effective configuration: file (if any), then environment, then validation.
///
/// An explicitly named file must exist. The default file is optional; without it the
/// built-in defaults are used.
pub fn resolve_config(explicit_path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match explicit_path {
        Some(path) => load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH)?,
        None => {
            tracing::debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
            Config::default()
        }
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}
