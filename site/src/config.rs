//! Push-to configuration
//!
//! Stored as a JSON file. Every section and every field is optional on disk;
//! whatever is missing takes its default.

use pushto_core::bus::DEFAULT_TOPIC_CAPACITY;
use pushto_core::{CoreError, EncoderConfig, LocationConfig, PointingModel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Sockets, devices and topic tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    /// Address the Stellarium bridge listens on
    pub host_ip: String,
    /// Serial device the encoder board is attached to
    pub serial_port: String,
    /// Port Stellarium's Telescope Control plugin connects to
    pub stc_port: u16,
    /// How long to wait for Stellarium to connect at startup
    pub handshake_timeout_secs: u64,
    /// Forward one equatorial update out of this many encoder samples
    pub publish_every: u32,
    /// Messages buffered per topic
    pub channel_capacity: usize,
    /// Stellarium Remote Control API
    pub rpc_url: String,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            host_ip: "127.0.0.1".to_string(),
            serial_port: "/dev/ttyACM0".to_string(),
            stc_port: 10001,
            handshake_timeout_secs: 600,
            publish_every: 10,
            channel_capacity: DEFAULT_TOPIC_CAPACITY,
            rpc_url: pushto_stellarium::DEFAULT_API_URL.to_string(),
        }
    }
}

impl CommunicationConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Stop accepting calibration stars after this many, unbounded if absent
    pub max_stars: Option<usize>,
}

/// Complete push-to configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushToConfig {
    pub communication: CommunicationConfig,
    pub location: LocationConfig,
    pub encoders: EncoderConfig,
    pub pointing: PointingModel,
    pub alignment: AlignmentConfig,
}

impl PushToConfig {
    /// Read and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        tracing::info!("Opened config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise the defaults.
    ///
    /// A missing file is not an error; a file that exists but cannot be
    /// parsed or validated is.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            None => {
                tracing::info!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encoders.validate()?;
        if self.communication.publish_every == 0 {
            return Err(ConfigError::Invalid("publish_every must be at least 1".to_string()));
        }
        if self.communication.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be at least 1".to_string()));
        }
        if self.alignment.max_stars == Some(0) {
            return Err(ConfigError::Invalid("max_stars must be at least 1 when set".to_string()));
        }
        Ok(())
    }
}
