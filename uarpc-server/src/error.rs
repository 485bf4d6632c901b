//! Server error types.

use thiserror::Error;
use uarpc_trust::TrustError;
use uarpc_wire::{StatusCode, WireError};

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("trust error: {0}")]
    Trust(#[from] TrustError),

    #[error("a response was already sent for this request")]
    AlreadyResponded,

    #[error("inbound message of {size} bytes exceeds limit {max}")]
    RequestTooLarge { size: usize, max: usize },

    #[error("connection outbound queue is gone")]
    ConnectionGone,

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Maps this error to the status code reported to peers.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Io(_) | ServerError::ConnectionGone => {
                StatusCode::BAD_SECURE_CHANNEL_CLOSED
            }
            ServerError::Wire(e) => e.status_code(),
            ServerError::Trust(e) => e.status_code(),
            ServerError::AlreadyResponded => StatusCode::BAD_UNEXPECTED_ERROR,
            ServerError::RequestTooLarge { .. } => StatusCode::BAD_REQUEST_TOO_LARGE,
            ServerError::ShuttingDown => StatusCode::BAD_SHUTDOWN,
        }
    }
}
