//! Configuration management for tdrm-client
//!
//! Configuration is stored in TOML format. CLI flags override file values.
//!
//! # Configuration File Locations
//!
//! - Unix: `~/.config/tdrm/client.toml`
//! - Windows: `%APPDATA%\tdrm\client.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tdrm_proto::BLOCK_SIZE;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Client configuration
///
/// # Example TOML
///
/// ```toml
/// [keystore]
/// dir = ""  # Empty = default data directory
///
/// [client]
/// manifest_path = ""  # Empty = built-in manifest
/// block_size = 256
/// use_stiplet = false
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub keystore: KeystoreConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Key store persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeystoreConfig {
    /// Directory holding one key store file per agent (empty = default location)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Decryption client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client manifest presented to the agent (empty = built-in manifest)
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,

    /// Bytes decrypted per call
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Talk to the stiplet agent instead of the primary one
    #[serde(default)]
    pub use_stiplet: bool,
}

fn default_block_size() -> usize {
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            manifest_path: None,
            block_size: default_block_size(),
            use_stiplet: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location, or defaults if there is none
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    /// Platform-specific configuration file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "tdrm", "tdrm")
            .map(|dirs| dirs.config_dir().join("client.toml"))
    }

    /// Platform-specific data directory, where key stores live by default
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "tdrm", "tdrm")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Key store directory after applying the default location
    pub fn keystore_dir(&self) -> Option<PathBuf> {
        self.keystore
            .dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .or_else(Self::data_dir)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write the default configuration to the default path if no file is
    /// there yet. Returns whether a file was created.
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::create_default_at(&path),
            None => Ok(false),
        }
    }

    pub fn create_default_at(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save(path)?;
        Ok(true)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let block_size = self.client.block_size;
        if block_size == 0 || block_size % BLOCK_SIZE != 0 {
            return Err(ConfigError::ValidationError(format!(
                "block_size must be a positive multiple of {BLOCK_SIZE}, got {block_size}"
            )));
        }

        Ok(())
    }
}

/// CLI configuration overrides
///
/// Command-line arguments take precedence over config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub debug: Option<bool>,
    pub use_stiplet: Option<bool>,
    pub block_size: Option<usize>,
    pub keystore_dir: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to configuration
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(true) = overrides.debug {
            self.logging.level = "debug".to_string();
        }
        if let Some(use_stiplet) = overrides.use_stiplet {
            self.client.use_stiplet = use_stiplet;
        }
        if let Some(block_size) = overrides.block_size {
            self.client.block_size = block_size;
        }
        if let Some(ref dir) = overrides.keystore_dir {
            self.keystore.dir = Some(dir.clone());
        }
        self
    }
}
