// Error types for the configuration repository

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration key not found: {0}")]
    KeyNotFound(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration key [{key}] has the wrong type: {message}")]
    DeserializationError { key: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// Configuration failures surface from kernel bootstrap as internal errors
impl From<ConfigError> for trellis_core::Error {
    fn from(err: ConfigError) -> Self {
        trellis_core::Error::Internal(err.to_string())
    }
}
