//! Wire error types.

use crate::status::StatusCode;
use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
///
/// Decoding errors are recovered at the request boundary: the server turns
/// them into a fault response, the client into a failed pending operation.
/// They never terminate the process.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unexpected end of stream: {needed} more bytes needed for {what}")]
    EndOfStream { what: &'static str, needed: usize },

    #[error("invalid magic bytes: expected 'UARP', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("unknown frame kind: {0:#x}")]
    UnknownFrameKind(u8),

    #[error("unknown security mode: {0:#x}")]
    UnknownSecurityMode(u8),

    #[error("unknown security policy: {0}")]
    UnknownSecurityPolicy(String),

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("{what} length {len} exceeds limit {max}")]
    LimitExceeded {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("negative {what} length: {len}")]
    NegativeLength { what: &'static str, len: i32 },

    #[error("invalid {what} encoding byte: {value:#x}")]
    InvalidEncodingByte { what: &'static str, value: u8 },

    #[error("array dimensions {dims:?} do not match element count {len}")]
    DimensionMismatch { dims: Vec<u32>, len: usize },

    #[error("array element tag {found} in array declared as tag {expected}")]
    MixedArray { expected: u8, found: u8 },

    #[error("decoding depth limit {max} exceeded")]
    DepthExceeded { max: u32 },

    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    #[error("decimal magnitude of {len} bytes exceeds 16")]
    DecimalOverflow { len: usize },
}

impl WireError {
    /// Maps this error to the protocol status code that describes it.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WireError::MessageTooLarge { .. } => StatusCode::BAD_REQUEST_TOO_LARGE,
            WireError::UnknownSecurityPolicy(_) | WireError::UnknownSecurityMode(_) => {
                StatusCode::BAD_SECURITY_POLICY_REJECTED
            }
            _ => StatusCode::BAD_DECODING_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let err = WireError::MessageTooLarge {
            size: 1024,
            max: 512,
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST_TOO_LARGE);

        let err = WireError::EndOfStream {
            what: "u32",
            needed: 4,
        };
        assert_eq!(err.status_code(), StatusCode::BAD_DECODING_ERROR);

        let err = WireError::UnknownSecurityPolicy("urn:x".into());
        assert_eq!(err.status_code(), StatusCode::BAD_SECURITY_POLICY_REJECTED);
    }

    #[test]
    fn test_display() {
        let err = WireError::DimensionMismatch {
            dims: vec![2, 3],
            len: 5,
        };
        assert!(err.to_string().contains("element count 5"));

        let err = WireError::LimitExceeded {
            what: "array",
            len: 100,
            max: 10,
        };
        assert!(err.to_string().contains("array"));
        assert!(err.to_string().contains("100"));
    }
}
