//! # uarpc-wire
//!
//! Wire layer for uarpc, a binary industrial-automation RPC protocol.
//!
//! This crate provides:
//! - Binary encoding/decoding of built-in values, identifiers, tagged
//!   unions (variants) and opaque extension payloads
//! - A length-only encoder pass that predicts exact encoded sizes
//! - Binary framing with correlation ids and CRC32C validation
//! - Request/response/fault message envelopes and handshake bodies
//! - Status codes and wire error types
//!
//! Encoders and decoders are stateless per call and parameterized by an
//! [`EncodingContext`] carrying size limits, the namespace table and the
//! type registry.

pub mod context;
pub mod error;
pub mod extension;
pub mod frame;
pub mod io;
pub mod message;
pub mod nodeid;
pub mod registry;
pub mod status;
pub mod types;
pub mod variant;

pub use context::{EncodingContext, EncodingLimits};
pub use error::WireError;
pub use extension::{Decimal, ExtensionBody, ExtensionObject};
pub use frame::{Frame, FrameHeader, FrameKind, FRAME_HEADER_SIZE, MAGIC};
pub use io::{Counter, Limited, Output, Reader, Writer};
pub use message::{
    FaultMessage, OpenRequest, OpenResponse, RequestMessage, ResponseMessage, SecurityHeader,
    SecurityMode, SecurityPolicy,
};
pub use nodeid::{ExpandedNodeId, Guid, Identifier, NodeId};
pub use registry::{DecodeFn, Encodable, TypeRegistry};
pub use status::StatusCode;
pub use types::{DataValue, DateTime, DiagnosticInfo, LocalizedText, QualifiedName};
pub use variant::{tag, Scalar, Variant, VariantArray};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default port for uarpc endpoints.
pub const DEFAULT_PORT: u16 = 4850;
