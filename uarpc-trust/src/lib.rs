//! # uarpc-trust
//!
//! Certificate identity and trust decisions for uarpc channels.
//!
//! This crate provides:
//! - [`Certificate`]: DER bytes plus a SHA-256 thumbprint; identity is the
//!   encoded form, not the parsed structure
//! - [`TrustStore`] implementations that persist trust decisions
//!   (directory-backed for production, in-memory for tests)
//! - [`TrustGate`]: the accept/reject decision point consulted during
//!   channel establishment

pub mod certificate;
pub mod error;
pub mod gate;
pub mod store;

pub use certificate::{ApplicationDescription, Certificate};
pub use error::TrustError;
pub use gate::{AcceptAllGate, StoreTrustGate, TrustDecision, TrustGate, ValidationChecks};
pub use store::{DirectoryTrustStore, MemoryTrustStore, TrustStore};
