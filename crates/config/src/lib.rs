//! Configuration management for the assist pipeline
//!
//! Supports loading configuration from:
//! - `config/default` and `config/{env}` files (any format the `config` crate reads)
//! - Environment variables (`ASSIST__` prefix, `__` as the nesting separator)
//!
//! Loaded settings are validated before they are handed out.

pub mod constants;
pub mod pipeline;
pub mod settings;

pub use pipeline::PipelineConfig;
pub use settings::{load_settings, load_settings_from, ObservabilityConfig, Settings};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ConfigError::MissingField(key),
            config::ConfigError::Foreign(err) => ConfigError::Environment(err.to_string()),
            other => ConfigError::ParseError(other.to_string()),
        }
    }
}
