//! Error types for the guider service client

/// Errors that can occur when interacting with the guider service
#[derive(Debug, thiserror::Error)]
pub enum GuiderError {
    #[error("Not connected to the guider service")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Could not resolve guider host: {0}")]
    HostResolution(String),

    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    #[error("Unexpected response shape: {0}")]
    InvalidResponse(String),

    #[error("Guider error: {code} - {message}")]
    Rpc { code: i32, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to send message: {0}")]
    SendError(String),

    #[error("Failed to start guider process: {0}")]
    ProcessStartFailed(String),

    #[error("Guider executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Process already running")]
    ProcessAlreadyRunning,
}

/// Result type alias for guider operations
pub type Result<T> = std::result::Result<T, GuiderError>;
