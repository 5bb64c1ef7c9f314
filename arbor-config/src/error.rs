// Error types for configuration management

use arbor_core::{Error, codes};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid setting `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvError(#[from] std::env::VarError),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        let error = Error::new(codes::INVALID_SETTING, err.to_string());
        let error = match &err {
            ConfigError::ValidationError { field, .. } => error.with_data("field", field.as_str()),
            _ => error,
        };
        error.with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
