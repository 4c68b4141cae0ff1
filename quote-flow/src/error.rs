use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the quote conversation engine.
///
/// Invalid user input is not an error: the controller answers it with a
/// re-prompt. Everything here is either a caller mistake (unknown session,
/// input while busy) or a failure at an external boundary.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Input is disabled for session {0} while messages are pending")]
    InputDisabled(String),

    #[error("Backend call failed: {0}")]
    BackendFailed(String),

    #[error("Backend call timed out after {0:?}")]
    BackendTimeout(Duration),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Invalid configuration for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
