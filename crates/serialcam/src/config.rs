//! Configuration management for serialcam.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::framing::{DEFAULT_END_MARKER, DEFAULT_START_MARKER};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "serialcam";

/// Default images directory name inside the data directory.
const IMAGES_DIR_NAME: &str = "images";

/// Default catalog database file name.
const CATALOG_FILE_NAME: &str = "catalog.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SERIALCAM_`, sections separated by `__`)
/// 2. TOML config file at `~/.config/serialcam/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port configuration.
    pub serial: SerialConfig,
    /// Frame reassembly configuration.
    pub framing: FramingConfig,
    /// Image storage configuration.
    pub storage: StorageConfig,
    /// HTTP server configuration.
    pub server: ServerConfig,
}

/// Serial-port configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port used when a connect request does not name one.
    pub port: String,
    /// Baud rate used when a connect request does not give one.
    pub baud_rate: u32,
    /// How long a single read waits for data before returning empty.
    pub read_timeout_ms: u64,
    /// Maximum bytes pulled from the port per read.
    pub chunk_size: usize,
    /// Connect to `port` when the server starts.
    pub auto_connect: bool,
}

/// Frame reassembly configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Text marking the beginning of an image.
    pub start_marker: String,
    /// Text marking the end of an image.
    pub end_marker: String,
    /// Detect markers split across two reads.
    pub span_chunks: bool,
    /// Abandon captures larger than this many bytes.
    pub max_image_bytes: usize,
    /// Abandon captures that stay open longer than this many seconds.
    /// Set to 0 to disable.
    pub capture_timeout_secs: u64,
}

/// Image storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory images are written to.
    /// Defaults to `~/.local/share/serialcam/images`
    pub images_dir: Option<PathBuf>,
    /// Path to the catalog database.
    /// Defaults to `~/.local/share/serialcam/catalog.db`
    pub catalog_path: Option<PathBuf>,
    /// Reject completed images that lack a JPEG start-of-image marker.
    pub validate_jpeg: bool,
    /// Skip images whose content was already stored.
    pub skip_duplicates: bool,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            chunk_size: 1024,
            auto_connect: false,
        }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            start_marker: DEFAULT_START_MARKER.to_string(),
            end_marker: DEFAULT_END_MARKER.to_string(),
            span_chunks: false,
            max_image_bytes: 4 * 1024 * 1024,
            capture_timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: None,
            catalog_path: None,
            validate_jpeg: true,
            skip_duplicates: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            cors_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

/// Platform default serial port name.
fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM3"
    } else {
        "/dev/ttyUSB0"
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (e.g. `SERIALCAM_SERIAL__BAUD_RATE`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("SERIALCAM_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.framing.start_marker.is_empty() || self.framing.end_marker.is_empty() {
            return Err(Error::ConfigValidation {
                message: "start_marker and end_marker must not be empty".to_string(),
            });
        }

        if self.framing.max_image_bytes == 0 {
            return Err(Error::ConfigValidation {
                message: "max_image_bytes must be greater than 0".to_string(),
            });
        }

        if self.serial.baud_rate == 0 {
            return Err(Error::ConfigValidation {
                message: "baud_rate must be greater than 0".to_string(),
            });
        }

        if self.serial.chunk_size == 0 {
            return Err(Error::ConfigValidation {
                message: "chunk_size must be greater than 0".to_string(),
            });
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "read_timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(Error::ConfigValidation {
                message: format!("invalid bind_addr: {}", self.server.bind_addr),
            });
        }

        Ok(())
    }

    /// Get the images directory, resolving defaults if not set.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.storage
            .images_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(IMAGES_DIR_NAME))
    }

    /// Get the catalog path, resolving defaults if not set.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.storage
            .catalog_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(CATALOG_FILE_NAME))
    }

    /// Get the bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .map_err(|_| Error::ConfigValidation {
                message: format!("invalid bind_addr: {}", self.server.bind_addr),
            })
    }

    /// Get the serial read timeout as a Duration.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    /// Get the capture timeout, if enabled.
    #[must_use]
    pub fn capture_timeout(&self) -> Option<Duration> {
        if self.framing.capture_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.framing.capture_timeout_secs))
        }
    }
}
