//! Configuration module for watchd
//!
//! Handles loading, parsing, and validation of configuration files.
//! Default configuration path: `~/.watchd/config.toml`

use crate::channel::{OverflowPolicy, DEFAULT_CHANNEL_CAPACITY};
use crate::correlation::DEFAULT_CORRELATION_CAPACITY;
use crate::error::{ConfigError, CoreError};
use crate::policy::DEFAULT_POLICY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Policy store sizing
    pub policy: PolicyConfig,
    /// Write correlation sizing
    pub correlation: CorrelationConfig,
    /// Event channel settings
    pub channel: ChannelConfig,
    /// Initial watch set
    pub provisioning: ProvisioningConfig,
}

impl Config {
    /// Load configuration from default path (~/.watchd/config.toml)
    pub fn load() -> Result<Self, CoreError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(content).map_err(ConfigError::ParseToml)?)
    }

    /// Get default configuration file path
    pub fn default_path() -> Result<PathBuf, CoreError> {
        dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)
            .map(|home| home.join(".watchd").join("config.toml"))
            .map_err(CoreError::Config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::SerializeToml)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Check values the core cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        let capacities = [
            ("policy.capacity", self.policy.capacity),
            ("correlation.capacity", self.correlation.capacity),
            ("channel.capacity", self.channel.capacity),
        ];
        for (field, capacity) in capacities {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "capacity must be greater than zero".to_string(),
                }
                .into());
            }
        }

        if !matches!(
            self.general.default_format.as_str(),
            "pretty" | "json" | "compact"
        ) {
            return Err(ConfigError::InvalidValue {
                field: "general.default_format",
                reason: format!("unknown format {:?}", self.general.default_format),
            }
            .into());
        }

        for pattern in &self.provisioning.exclude_patterns {
            glob::Pattern::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

/// General configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose output
    pub verbose: bool,
    /// Default output format (pretty, json, compact)
    pub default_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            default_format: "pretty".to_string(),
        }
    }
}

/// Policy store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum number of watched entities
    pub capacity: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POLICY_CAPACITY,
        }
    }
}

/// Write correlation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Maximum number of writes in flight before LRU eviction
    pub capacity: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CORRELATION_CAPACITY,
        }
    }
}

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffered records
    pub capacity: usize,
    /// What happens to a record when the buffer is full
    pub overflow: OverflowPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Initial watch set and exclusion rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Directories watched recursively
    pub directories: Vec<PathBuf>,
    /// Files watched individually
    pub files: Vec<PathBuf>,
    /// Subtrees skipped during the walk
    pub exclude_paths: Vec<PathBuf>,
    /// File extensions never watched (with the leading dot)
    pub exclude_extensions: Vec<String>,
    /// File name suffixes never watched
    pub exclude_suffixes: Vec<String>,
    /// Glob patterns matched against file names
    pub exclude_patterns: Vec<String>,
    /// Extend the watch set from CREATE and RENAME records
    pub follow_creates: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            files: Vec::new(),
            exclude_paths: Vec::new(),
            exclude_extensions: vec![".swp".to_string(), ".swx".to_string()],
            exclude_suffixes: vec!["~".to_string()],
            exclude_patterns: Vec::new(),
            follow_creates: true,
        }
    }
}
