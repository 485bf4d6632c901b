//! The trust gate consulted during channel establishment.
//!
//! Validation returns one of three decisions: accept for this session,
//! accept permanently (persisted so later sessions from the same
//! certificate skip the decision), or reject. Whether a secure channel may
//! proceed hangs on this outcome.

use crate::certificate::{ApplicationDescription, Certificate};
use crate::error::TrustError;
use crate::store::TrustStore;
use chrono::Utc;
use std::sync::Arc;

/// Outcome of validating a peer certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Accept for this session only.
    Accept,
    /// Accept and persist, so subsequent sessions skip the decision.
    AcceptPermanently,
    /// Reject the peer.
    Reject,
}

/// Checks the caller has already performed before consulting the gate.
///
/// Manual bitfield; the gate skips checks marked as passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationChecks(u32);

impl ValidationChecks {
    /// The validity window was already verified.
    pub const VALIDITY_PERIOD: u32 = 1 << 0;
    /// The signature chain was already verified.
    pub const SIGNATURE: u32 = 1 << 1;
    /// The application URI was already matched.
    pub const APPLICATION_URI: u32 = 1 << 2;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_validity_period(mut self) -> Self {
        self.0 |= Self::VALIDITY_PERIOD;
        self
    }

    pub fn with_signature(mut self) -> Self {
        self.0 |= Self::SIGNATURE;
        self
    }

    pub fn with_application_uri(mut self) -> Self {
        self.0 |= Self::APPLICATION_URI;
        self
    }

    pub fn has_validity_period(&self) -> bool {
        self.0 & Self::VALIDITY_PERIOD != 0
    }

    pub fn has_signature(&self) -> bool {
        self.0 & Self::SIGNATURE != 0
    }

    pub fn has_application_uri(&self) -> bool {
        self.0 & Self::APPLICATION_URI != 0
    }
}

/// Decision point for peer certificates during channel establishment.
pub trait TrustGate: Send + Sync {
    /// Validates a peer certificate.
    ///
    /// `checks_passed` names the checks the transport already performed so
    /// the gate does not repeat them. Structural or validity failures are
    /// errors; an intact but unknown certificate yields a decision.
    fn validate(
        &self,
        certificate: &Certificate,
        peer: &ApplicationDescription,
        checks_passed: ValidationChecks,
    ) -> Result<TrustDecision, TrustError>;
}

/// Callback deciding the fate of certificates not yet in the store.
pub type DecisionFn =
    dyn Fn(&Certificate, &ApplicationDescription) -> TrustDecision + Send + Sync;

/// Store-backed trust gate.
///
/// Already-persisted certificates are accepted without consulting the
/// decider; persisted rejections are final. Unknown certificates go to the
/// decider, and `AcceptPermanently` is written back to the store.
pub struct StoreTrustGate {
    store: Arc<dyn TrustStore>,
    decider: Box<DecisionFn>,
}

impl StoreTrustGate {
    /// Creates a gate that rejects unknown certificates.
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self {
            store,
            decider: Box::new(|_, _| TrustDecision::Reject),
        }
    }

    /// Replaces the decision callback for unknown certificates.
    pub fn with_decider(
        mut self,
        decider: impl Fn(&Certificate, &ApplicationDescription) -> TrustDecision
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.decider = Box::new(decider);
        self
    }
}

impl TrustGate for StoreTrustGate {
    fn validate(
        &self,
        certificate: &Certificate,
        peer: &ApplicationDescription,
        checks_passed: ValidationChecks,
    ) -> Result<TrustDecision, TrustError> {
        if !checks_passed.has_validity_period() {
            certificate.check_validity_at(Utc::now())?;
        }

        if !checks_passed.has_application_uri() {
            if let (Some(cert_uri), Some(peer_uri)) =
                (certificate.application_uri(), peer.application_uri.as_deref())
            {
                if cert_uri != peer_uri {
                    tracing::warn!(
                        thumbprint = certificate.thumbprint(),
                        cert_uri,
                        peer_uri,
                        "Application URI mismatch"
                    );
                    return Ok(TrustDecision::Reject);
                }
            }
        }

        if self.store.is_trusted(certificate.thumbprint())? {
            return Ok(TrustDecision::Accept);
        }
        if self.store.is_rejected(certificate.thumbprint())? {
            return Ok(TrustDecision::Reject);
        }

        let decision = (self.decider)(certificate, peer);
        if decision == TrustDecision::AcceptPermanently {
            self.store.persist_trusted(certificate)?;
        }
        Ok(decision)
    }
}

/// Gate that accepts every structurally valid certificate. Test use only.
#[derive(Debug, Default)]
pub struct AcceptAllGate;

impl AcceptAllGate {
    pub fn new() -> Self {
        Self
    }
}

impl TrustGate for AcceptAllGate {
    fn validate(
        &self,
        certificate: &Certificate,
        _peer: &ApplicationDescription,
        _checks_passed: ValidationChecks,
    ) -> Result<TrustDecision, TrustError> {
        tracing::warn!(
            thumbprint = certificate.thumbprint(),
            "Accepting certificate without validation"
        );
        Ok(TrustDecision::Accept)
    }
}
