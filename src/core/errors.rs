use crate::core::types::ConnectionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not authenticated (session is {state})")]
    NotAuthenticated { state: ConnectionState },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid secret key: {0}")]
    InvalidKey(String),

    #[error("Operation not allowed while session is {0}")]
    InvalidState(ConnectionState),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

impl StreamError {
    /// Whether a reconnect attempt can reasonably fix this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::TransportError(_) | Self::Timeout(_)
        )
    }
}
