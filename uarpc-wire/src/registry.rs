//! Encodable structures and the type registry.
//!
//! Application-defined structures travel inside extension objects. A
//! structure implements [`Encodable`] — type id, body encoding, body size —
//! and the [`TypeRegistry`] maps the type id to a decode function so
//! inbound bodies can be resolved to concrete values. The table is built at
//! startup; there is no per-call reflection or lookup beyond a hash map hit.

use crate::context::EncodingContext;
use crate::error::WireError;
use crate::extension::Decimal;
use crate::io::{Counter, Output, Reader};
use crate::nodeid::NodeId;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Capability interface for a structure that can travel in an extension
/// object body.
pub trait Encodable: fmt::Debug + Send + Sync {
    /// The type identifier the body is tagged with on the wire.
    fn type_id(&self) -> NodeId;

    /// Encodes the body (without the type id or length prefix).
    fn encode_body(&self, ctx: &EncodingContext, out: &mut dyn Output) -> Result<(), WireError>;

    /// Exact byte length of the encoded body.
    fn body_size(&self, ctx: &EncodingContext) -> Result<usize, WireError> {
        Counter::measure(|c| self.encode_body(ctx, c))
    }

    fn as_any(&self) -> &dyn Any;

    fn clone_box(&self) -> Box<dyn Encodable>;

    /// Equality against another boxed structure; implementations downcast.
    fn eq_box(&self, other: &dyn Encodable) -> bool;
}

impl Clone for Box<dyn Encodable> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Decoder for one registered structure type.
///
/// The reader is scoped to the extension body; a decoder must consume it
/// fully for the decode to be accepted.
pub type DecodeFn = fn(&mut Reader<'_>, &EncodingContext) -> Result<Box<dyn Encodable>, WireError>;

/// Table from type identifier to structure decoder, resolved at startup.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    decoders: HashMap<NodeId, DecodeFn>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in structure types registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Decimal::TYPE_ID, Decimal::decode_body);
        registry
    }

    /// Registers a decoder, replacing any previous entry for the id.
    pub fn register(&mut self, type_id: NodeId, decode: DecodeFn) {
        self.decoders.insert(type_id, decode);
    }

    /// Looks up the decoder for a type id.
    pub fn lookup(&self, type_id: &NodeId) -> Option<DecodeFn> {
        self.decoders.get(type_id).copied()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
