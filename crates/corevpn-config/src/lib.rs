//! CoreVPN Client Configuration
//!
//! Loads the settings a client needs to connect: a TOML `ClientConfig`
//! schema, and a minimal ingester for existing OpenVPN `.ovpn` files.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;

pub use client::{parse_ovpn_directives, ClientConfig, InlineBlocks, ParsedOvpn};

use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Validation error
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::SerializationError(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::SerializationError(err.to_string())
    }
}
