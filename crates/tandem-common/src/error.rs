//! Error types shared by tandem services

/// Result type alias using TandemError
pub type Result<T> = std::result::Result<T, TandemError>;

/// Main error type for tandem services
#[derive(Debug, thiserror::Error)]
pub enum TandemError {
    /// Configuration rejected by validation (never applied)
    #[error("{0}")]
    InvalidConfig(String),

    /// Configuration could not be read or deserialized
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Failure building an engine client or the passthrough proxy
    #[error("Client construction failed: {0}")]
    ClientBuild(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TandemError {
    /// Get the error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            TandemError::InvalidConfig(_) => "INVALID_CONFIG",
            TandemError::ConfigError(_) => "CONFIG_ERROR",
            TandemError::ClientBuild(_) => "CLIENT_BUILD",
            TandemError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the error came from validating a candidate configuration
    pub fn is_validation(&self) -> bool {
        matches!(self, TandemError::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for TandemError {
    fn from(err: serde_json::Error) -> Self {
        TandemError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for TandemError {
    fn from(err: config::ConfigError) -> Self {
        TandemError::ConfigError(err.to_string())
    }
}
