//! Configuration module for the Rover bridge
//!
//! Loads configuration from an optional TOML file:
//! - [default] - General settings (log_level)
//! - [rover] - Serial link and polling settings
//! - [mqtt] - MQTT broker settings (optional, without it the bus stays local)

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log level for the application
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing LevelFilter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
    #[serde(default)]
    pub rover: RoverConfig,
    pub mqtt: Option<MqttConfig>,
}

/// General application settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DefaultConfig {
    /// Log level: TRACE, DEBUG, INFO, WARN, ERROR
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Serial link and polling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RoverConfig {
    /// Modbus slave address of the controller
    #[serde(default = "default_address")]
    pub address: u8,

    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Per-transaction serial timeout (e.g., "1s", "500ms")
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Telemetry update interval (e.g., "3s")
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Where the device info record is persisted
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            baud_rate: default_baud_rate(),
            timeout: default_timeout(),
            interval: default_interval(),
            settings_path: default_settings_path(),
        }
    }
}

fn default_address() -> u8 {
    1
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_interval() -> Duration {
    Duration::from_millis(3000)
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("/data/renogy/rover.json")
}

/// MQTT broker configuration
#[derive(Deserialize, Clone)]
pub struct MqttConfig {
    /// MQTT root topic (e.g., "venus")
    #[serde(default = "default_mqtt_root")]
    pub root: String,

    /// MQTT broker hostname
    pub host: String,

    /// MQTT broker port (default 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT username, empty for anonymous access
    #[serde(default)]
    pub username: String,

    /// MQTT password
    #[serde(default)]
    pub password: String,
}

fn default_mqtt_root() -> String {
    "venus".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("root", &self.root)
            .finish()
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the config.toml file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration logic (semantic validation beyond type checks)
    fn validate(&self) -> Result<(), ConfigError> {
        if self.rover.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "rover.interval must be greater than zero".to_string(),
            ));
        }

        if !(1..=247).contains(&self.rover.address) {
            return Err(ConfigError::ValidationError(format!(
                "rover.address must be between 1 and 247, got {}",
                self.rover.address
            )));
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.is_empty() {
                return Err(ConfigError::ValidationError(
                    "mqtt.host must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
