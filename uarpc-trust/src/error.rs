//! Trust error types.

use std::path::PathBuf;
use thiserror::Error;
use uarpc_wire::StatusCode;

/// Errors from certificate handling and trust persistence.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("certificate is not valid DER: {0}")]
    CertificateInvalid(String),

    #[error("certificate outside its validity period ({detail})")]
    CertificateTimeInvalid { detail: String },

    #[error("failed to access trust store at '{path}': {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt trust store metadata at '{path}': {detail}")]
    StoreCorrupt { path: PathBuf, detail: String },
}

impl TrustError {
    /// Maps this error to the protocol status code that describes it.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TrustError::CertificateInvalid(_) => StatusCode::BAD_CERTIFICATE_INVALID,
            TrustError::CertificateTimeInvalid { .. } => StatusCode::BAD_CERTIFICATE_TIME_INVALID,
            TrustError::StoreIo { .. } | TrustError::StoreCorrupt { .. } => {
                StatusCode::BAD_UNEXPECTED_ERROR
            }
        }
    }
}
