//! Error types shared across tabload crates

use thiserror::Error;

/// Result type alias for tabload operations
pub type Result<T> = std::result::Result<T, TabloadError>;

/// Errors raised outside the load pipeline itself (environment, configuration)
#[derive(Error, Debug)]
pub enum TabloadError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },
}

impl TabloadError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an error for an environment variable that failed to parse
    pub fn invalid_env(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidEnv {
            var: var.into(),
            value: value.into(),
        }
    }
}
