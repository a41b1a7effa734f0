use serde::Deserialize;
use std::env;
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_BUFFER_DESIRED_LENGTH: i64 = 44100;
pub const DEFAULT_LATENCY_OFFSET: i64 = 0;
pub const DEFAULT_PORT: i64 = 6557;

pub const BUFFER_DESIRED_LENGTH_RANGE: RangeInclusive<i64> = 0..=132300;
pub const LATENCY_OFFSET_RANGE: RangeInclusive<i64> = -66150..=66150;
pub const PORT_RANGE: RangeInclusive<i64> = 1..=66150;

pub const ENV_BUFFER_DESIRED_LENGTH: &str = "RELAY_BUFFER_DESIRED_LENGTH";
pub const ENV_LATENCY_OFFSET: &str = "RELAY_LATENCY_OFFSET";
pub const ENV_PORT: &str = "RELAY_PORT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid audio backend buffer desired length \"{0}\". It should be between 0 and 132300, default is 44100")]
    BufferLengthOutOfRange(i64),

    #[error("Invalid audio backend latency offset \"{0}\". It should be between -66150 and +66150, default is 0")]
    LatencyOffsetOutOfRange(i64),

    #[error("Invalid port \"{0}\". It should be between 1 and 65535, default is 6557")]
    PortOutOfRange(i64),

    #[error("Invalid value for {key}: \"{value}\"")]
    InvalidValue { key: String, value: String },

    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings consumed by the relay, validated before anything is bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Desired backend buffer length in frames
    pub buffer_desired_length: i64,
    /// Latency offset in frames, may be negative
    pub latency_offset: i64,
    /// TCP port the publisher binds
    pub port: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_desired_length: DEFAULT_BUFFER_DESIRED_LENGTH,
            latency_offset: DEFAULT_LATENCY_OFFSET,
            port: DEFAULT_PORT,
        }
    }
}

/// On-disk layout, every key optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    relay_server: ServerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    audio_backend_buffer_desired_length: Option<i64>,
    audio_backend_latency_offset: Option<i64>,
    port: Option<i64>,
}

impl RelayConfig {
    /// Load defaults, then the optional JSON file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;

        log::info!(
            "⚙️  Relay config: port {}, buffer length {}, latency offset {}",
            config.port,
            config.buffer_desired_length,
            config.latency_offset
        );
        Ok(config)
    }

    /// Read a JSON config file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text)?;
        let section = file.relay_server;
        let defaults = Self::default();

        Ok(Self {
            buffer_desired_length: section
                .audio_backend_buffer_desired_length
                .unwrap_or(defaults.buffer_desired_length),
            latency_offset: section
                .audio_backend_latency_offset
                .unwrap_or(defaults.latency_offset),
            port: section.port.unwrap_or(defaults.port),
        })
    }

    /// Override values from `RELAY_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env(ENV_BUFFER_DESIRED_LENGTH)? {
            self.buffer_desired_length = value;
        }
        if let Some(value) = read_env(ENV_LATENCY_OFFSET)? {
            self.latency_offset = value;
        }
        if let Some(value) = read_env(ENV_PORT)? {
            self.port = value;
        }
        Ok(())
    }

    /// Check every value against its accepted range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !BUFFER_DESIRED_LENGTH_RANGE.contains(&self.buffer_desired_length) {
            return Err(ConfigError::BufferLengthOutOfRange(
                self.buffer_desired_length,
            ));
        }
        if !LATENCY_OFFSET_RANGE.contains(&self.latency_offset) {
            return Err(ConfigError::LatencyOffsetOutOfRange(self.latency_offset));
        }
        self.port_number()?;
        Ok(())
    }

    /// The port as a TCP port number.
    ///
    /// Values up to 66150 are accepted by the range check but anything past
    /// 65535 cannot be bound, so those are rejected here as well.
    pub fn port_number(&self) -> Result<u16, ConfigError> {
        if !PORT_RANGE.contains(&self.port) {
            return Err(ConfigError::PortOutOfRange(self.port));
        }
        u16::try_from(self.port).map_err(|_| ConfigError::PortOutOfRange(self.port))
    }
}

fn read_env(key: &str) -> Result<Option<i64>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(value)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string_lossy().into_owned(),
        }),
    }
}
