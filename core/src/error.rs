//! Unified error types for watchd Core
//!
//! Hook handlers never fail; everything here belongs to the administrative
//! side (configuration, provisioning) or to consumers decoding records.

use std::path::PathBuf;
use thiserror::Error;

/// Core library error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration file errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Policy store errors
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Provisioning errors
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// Wire record decoding errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),

    /// Failed to write config file
    #[error("Failed to write config file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A setting holds a value the core cannot run with
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Exclusion glob does not compile
    #[error("Invalid exclude pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// Home directory not found
    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// Policy store errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// The watch set is full; surfaced to the provisioning side only
    #[error("Policy store is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },
}

/// Provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Failed to stat a watch path
    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Watch paths must be absolute
    #[error("Watch path must be absolute: {0}")]
    RelativePath(PathBuf),
}

/// Errors decoding a fixed-layout change record
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than one record
    #[error("Record too short: {len} bytes, expected {expected}")]
    ShortRecord { len: usize, expected: usize },

    /// Low bits of change_type hold no known kind
    #[error("Unknown change kind in change_type {0:#x}")]
    UnknownKind(u64),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, CoreError>;
