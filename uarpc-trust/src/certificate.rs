//! Certificate identity.

use crate::error::TrustError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A peer certificate: its DER encoding plus a precomputed thumbprint.
///
/// Equality and hashing are defined over the encoded bytes only. The
/// thumbprint (SHA-256 of the DER) is the fast trust-cache key; two
/// certificates with the same parsed content but different encodings are
/// different identities.
#[derive(Clone)]
pub struct Certificate {
    der: Bytes,
    thumbprint: String,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    application_uri: Option<String>,
}

impl Certificate {
    /// Wraps DER bytes, checking that the outer envelope is well-formed.
    pub fn from_der(der: impl Into<Bytes>) -> Result<Self, TrustError> {
        let der = der.into();
        check_der_envelope(&der)?;
        let thumbprint = hex::encode(Sha256::digest(&der));
        Ok(Self {
            der,
            thumbprint,
            not_before: None,
            not_after: None,
            application_uri: None,
        })
    }

    /// Attaches the validity window advertised for this certificate.
    pub fn with_validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self.not_after = Some(not_after);
        self
    }

    /// Attaches the application URI bound to this certificate.
    pub fn with_application_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_uri = Some(uri.into());
        self
    }

    /// The DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Hex SHA-256 thumbprint of the DER encoding.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn application_uri(&self) -> Option<&str> {
        self.application_uri.as_deref()
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }

    /// Checks the validity window against `now`.
    ///
    /// Certificates without a known window pass; the gate treats the window
    /// as one of the checks the caller may have already performed.
    pub fn check_validity_at(&self, now: DateTime<Utc>) -> Result<(), TrustError> {
        if let Some(not_before) = self.not_before {
            if now < not_before {
                return Err(TrustError::CertificateTimeInvalid {
                    detail: format!("not valid before {}", not_before),
                });
            }
        }
        if let Some(not_after) = self.not_after {
            if now > not_after {
                return Err(TrustError::CertificateTimeInvalid {
                    detail: format!("expired {}", not_after),
                });
            }
        }
        Ok(())
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("thumbprint", &self.thumbprint)
            .field("der_len", &self.der.len())
            .field("application_uri", &self.application_uri)
            .finish()
    }
}

/// Validates the outer DER envelope: a SEQUENCE tag whose encoded length
/// spans exactly the remaining bytes.
fn check_der_envelope(der: &[u8]) -> Result<(), TrustError> {
    if der.len() < 2 {
        return Err(TrustError::CertificateInvalid(
            "shorter than a DER header".to_string(),
        ));
    }
    if der[0] != 0x30 {
        return Err(TrustError::CertificateInvalid(format!(
            "expected SEQUENCE tag 0x30, got {:#04x}",
            der[0]
        )));
    }

    let (content_len, header_len) = match der[1] {
        len @ 0x00..=0x7F => (len as usize, 2),
        long @ 0x81..=0x84 => {
            let count = (long & 0x7F) as usize;
            if der.len() < 2 + count {
                return Err(TrustError::CertificateInvalid(
                    "truncated long-form length".to_string(),
                ));
            }
            let mut len = 0usize;
            for &b in &der[2..2 + count] {
                len = len << 8 | b as usize;
            }
            (len, 2 + count)
        }
        other => {
            return Err(TrustError::CertificateInvalid(format!(
                "unsupported length byte {:#04x}",
                other
            )))
        }
    };

    if header_len + content_len != der.len() {
        return Err(TrustError::CertificateInvalid(format!(
            "declared length {} does not span the {} available bytes",
            content_len,
            der.len() - header_len
        )));
    }
    Ok(())
}

/// Description of the peer application presenting a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationDescription {
    pub application_uri: Option<String>,
    pub product_uri: Option<String>,
    pub application_name: Option<String>,
}

impl ApplicationDescription {
    pub fn new(application_uri: impl Into<String>) -> Self {
        Self {
            application_uri: Some(application_uri.into()),
            ..Self::default()
        }
    }
}

/// Builds a minimal well-formed DER envelope around arbitrary content.
///
/// Test helper for exercising trust paths without a real PKI.
pub fn test_der(content: &[u8]) -> Vec<u8> {
    let mut der = Vec::with_capacity(content.len() + 4);
    der.push(0x30);
    if content.len() < 0x80 {
        der.push(content.len() as u8);
    } else {
        der.push(0x82);
        der.extend_from_slice(&(content.len() as u16).to_be_bytes());
    }
    der.extend_from_slice(content);
    der
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_thumbprint_is_over_encoded_bytes() {
        let a = Certificate::from_der(test_der(b"plant-a")).unwrap();
        let b = Certificate::from_der(test_der(b"plant-b")).unwrap();
        assert_ne!(a.thumbprint(), b.thumbprint());
        assert_eq!(a.thumbprint().len(), 64);

        // A single mutated byte is a different identity.
        let mut mutated = test_der(b"plant-a");
        let last = mutated.len() - 1;
        mutated[last] ^= 0x01;
        let c = Certificate::from_der(mutated).unwrap();
        assert_ne!(a, c);
        assert_ne!(a.thumbprint(), c.thumbprint());
    }

    #[test]
    fn test_equality_over_der_only() {
        let a = Certificate::from_der(test_der(b"same")).unwrap();
        let b = Certificate::from_der(test_der(b"same"))
            .unwrap()
            .with_application_uri("urn:other");
        // Metadata does not participate in identity.
        assert_eq!(a, b);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Certificate::from_der(&b""[..]).is_err());
        assert!(Certificate::from_der(&b"\x04\x02ab"[..]).is_err()); // wrong tag
        assert!(Certificate::from_der(&b"\x30\x05ab"[..]).is_err()); // bad length
        assert!(Certificate::from_der(&b"\x30\x82\x00"[..]).is_err()); // truncated
    }

    #[test]
    fn test_long_form_length() {
        let content = vec![0xA5u8; 300];
        let cert = Certificate::from_der(test_der(&content)).unwrap();
        assert_eq!(cert.der().len(), 304);
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let cert = Certificate::from_der(test_der(b"press"))
            .unwrap()
            .with_validity(now - Duration::days(1), now + Duration::days(30));
        assert!(cert.check_validity_at(now).is_ok());

        let expired = Certificate::from_der(test_der(b"press"))
            .unwrap()
            .with_validity(now - Duration::days(60), now - Duration::days(1));
        assert!(matches!(
            expired.check_validity_at(now),
            Err(TrustError::CertificateTimeInvalid { .. })
        ));

        let future = Certificate::from_der(test_der(b"press"))
            .unwrap()
            .with_validity(now + Duration::days(1), now + Duration::days(30));
        assert!(future.check_validity_at(now).is_err());
    }

    #[test]
    fn test_no_window_passes() {
        let cert = Certificate::from_der(test_der(b"anything")).unwrap();
        assert!(cert.check_validity_at(Utc::now()).is_ok());
    }
}
