//! Protocol status codes.
//!
//! A [`StatusCode`] is the outcome vocabulary of the protocol. It travels
//! both as a transport-level error (in fault frames) and as an in-band
//! service result inside response messages. Codes are part of the wire
//! contract and must remain stable.

use std::fmt;

/// A 32-bit protocol status code. Bit 31 set means failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Operation completed successfully.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    /// A condition that should be impossible was observed.
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    /// Operation or wait exceeded its deadline.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x8002_0000);
    /// Operation attempted on a closed or disposed channel.
    pub const BAD_NOT_CONNECTED: StatusCode = StatusCode(0x8003_0000);
    /// Malformed or truncated bytes, or inconsistent array dimensions.
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8004_0000);
    /// A value could not be encoded within the configured limits.
    pub const BAD_ENCODING_ERROR: StatusCode = StatusCode(0x8005_0000);
    /// Declared or actual message size exceeds the configured maximum.
    pub const BAD_REQUEST_TOO_LARGE: StatusCode = StatusCode(0x8006_0000);
    /// The secure channel was closed while the operation was outstanding.
    pub const BAD_SECURE_CHANNEL_CLOSED: StatusCode = StatusCode(0x8007_0000);
    /// Peer certificate failed parsing or structural checks.
    pub const BAD_CERTIFICATE_INVALID: StatusCode = StatusCode(0x8008_0000);
    /// Peer certificate is outside its validity period.
    pub const BAD_CERTIFICATE_TIME_INVALID: StatusCode = StatusCode(0x8009_0000);
    /// Peer certificate was not accepted by the trust gate.
    pub const BAD_CERTIFICATE_UNTRUSTED: StatusCode = StatusCode(0x800A_0000);
    /// The requested security policy/mode combination was refused.
    pub const BAD_SECURITY_POLICY_REJECTED: StatusCode = StatusCode(0x800B_0000);
    /// No handler is registered for the requested service.
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800C_0000);
    /// The endpoint is shutting down.
    pub const BAD_SHUTDOWN: StatusCode = StatusCode(0x800D_0000);

    /// Returns whether this code signals success.
    pub fn is_good(&self) -> bool {
        self.0 & 0x8000_0000 == 0
    }

    /// Returns whether this code signals failure.
    pub fn is_bad(&self) -> bool {
        !self.is_good()
    }

    /// Returns whether the failed operation is worth retrying.
    ///
    /// Timeouts and connectivity failures are transient; decoding and
    /// certificate failures are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self,
            StatusCode::BAD_TIMEOUT
                | StatusCode::BAD_NOT_CONNECTED
                | StatusCode::BAD_SECURE_CHANNEL_CLOSED
                | StatusCode::BAD_SHUTDOWN
        )
    }

    /// Returns the symbolic name, or `None` for codes outside the known set.
    pub fn name(&self) -> Option<&'static str> {
        Some(match *self {
            StatusCode::GOOD => "Good",
            StatusCode::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_NOT_CONNECTED => "BadNotConnected",
            StatusCode::BAD_DECODING_ERROR => "BadDecodingError",
            StatusCode::BAD_ENCODING_ERROR => "BadEncodingError",
            StatusCode::BAD_REQUEST_TOO_LARGE => "BadRequestTooLarge",
            StatusCode::BAD_SECURE_CHANNEL_CLOSED => "BadSecureChannelClosed",
            StatusCode::BAD_CERTIFICATE_INVALID => "BadCertificateInvalid",
            StatusCode::BAD_CERTIFICATE_TIME_INVALID => "BadCertificateTimeInvalid",
            StatusCode::BAD_CERTIFICATE_UNTRUSTED => "BadCertificateUntrusted",
            StatusCode::BAD_SECURITY_POLICY_REJECTED => "BadSecurityPolicyRejected",
            StatusCode::BAD_SERVICE_UNSUPPORTED => "BadServiceUnsupported",
            StatusCode::BAD_SHUTDOWN => "BadShutdown",
            _ => return None,
        })
    }

    /// Returns whether every code in the slice is good.
    ///
    /// Write-style services report per-item statuses; this is the helper for
    /// callers that want the collapsed aggregate.
    pub fn all_good(codes: &[StatusCode]) -> bool {
        codes.iter().all(StatusCode::is_good)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        assert!(StatusCode::BAD_DECODING_ERROR.is_bad());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StatusCode::BAD_TIMEOUT.is_retryable());
        assert!(StatusCode::BAD_NOT_CONNECTED.is_retryable());
        assert!(StatusCode::BAD_SECURE_CHANNEL_CLOSED.is_retryable());

        assert!(!StatusCode::BAD_DECODING_ERROR.is_retryable());
        assert!(!StatusCode::BAD_CERTIFICATE_INVALID.is_retryable());
        assert!(!StatusCode::BAD_REQUEST_TOO_LARGE.is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::GOOD.to_string(), "Good");
        assert_eq!(StatusCode::BAD_TIMEOUT.to_string(), "BadTimeout");
        // Unknown codes fall back to hex
        assert_eq!(StatusCode(0x8123_0000).to_string(), "0x81230000");
    }

    #[test]
    fn test_all_good() {
        assert!(StatusCode::all_good(&[]));
        assert!(StatusCode::all_good(&[StatusCode::GOOD, StatusCode::GOOD]));
        assert!(!StatusCode::all_good(&[
            StatusCode::GOOD,
            StatusCode::BAD_TIMEOUT
        ]));
    }
}
