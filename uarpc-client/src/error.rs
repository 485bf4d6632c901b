//! Client error types.

use crate::async_result::ServiceFault;
use thiserror::Error;
use uarpc_wire::{StatusCode, WireError};

/// Client errors.
///
/// Retryable conditions (timeouts, connectivity) are distinguishable from
/// permanent ones (decoding, certificates) so callers can branch without
/// string matching.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("not connected")]
    NotConnected,

    #[error("channel disposed")]
    Disposed,

    #[error("request timeout")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("channel open refused: {0}")]
    OpenRefused(StatusCode),

    #[error("service fault: {0}")]
    Fault(ServiceFault),
}

impl ClientError {
    /// Returns whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::NotConnected => true,
            ClientError::ConnectionClosed => true,
            ClientError::Fault(fault) => fault.status.is_retryable(),
            _ => false,
        }
    }

    /// The status code describing this error on the wire.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClientError::Io(_) | ClientError::ConnectionClosed => {
                StatusCode::BAD_SECURE_CHANNEL_CLOSED
            }
            ClientError::Wire(e) => e.status_code(),
            ClientError::NotConnected | ClientError::Disposed => StatusCode::BAD_NOT_CONNECTED,
            ClientError::Timeout => StatusCode::BAD_TIMEOUT,
            ClientError::OpenRefused(status) => *status,
            ClientError::Fault(fault) => fault.status,
        }
    }
}

impl From<ServiceFault> for ClientError {
    fn from(fault: ServiceFault) -> Self {
        match fault.status {
            StatusCode::BAD_TIMEOUT => ClientError::Timeout,
            StatusCode::BAD_NOT_CONNECTED => ClientError::NotConnected,
            StatusCode::BAD_SECURE_CHANNEL_CLOSED => ClientError::ConnectionClosed,
            _ => ClientError::Fault(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::NotConnected.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());

        let decoding = ClientError::Wire(WireError::InvalidUtf8);
        assert!(!decoding.is_retryable());
        assert!(!ClientError::Disposed.is_retryable());
    }

    #[test]
    fn test_fault_conversion_preserves_kind() {
        let fault = ServiceFault::new(StatusCode::BAD_TIMEOUT, "deadline passed");
        assert!(matches!(ClientError::from(fault), ClientError::Timeout));

        let fault = ServiceFault::new(StatusCode::BAD_DECODING_ERROR, "bad bytes");
        assert!(matches!(ClientError::from(fault), ClientError::Fault(_)));
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ClientError::Timeout.status_code(),
            StatusCode::BAD_TIMEOUT
        );
        assert_eq!(
            ClientError::NotConnected.status_code(),
            StatusCode::BAD_NOT_CONNECTED
        );
    }
}
