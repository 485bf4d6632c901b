//! Encoding context and size limits.

use crate::registry::TypeRegistry;
use std::sync::Arc;

/// Size limits enforced while encoding and decoding.
///
/// Limits are checked before allocation: a decoder seeing a claimed length
/// beyond the limit (or beyond the bytes actually available) rejects the
/// stream without reserving memory for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingLimits {
    /// Maximum total message size in bytes.
    pub max_message_size: usize,
    /// Maximum number of elements in an encoded array.
    pub max_array_length: usize,
    /// Maximum encoded length of a string in bytes.
    pub max_string_length: usize,
    /// Maximum length of a byte string in bytes.
    pub max_byte_string_length: usize,
    /// Maximum nesting depth while decoding (variants inside variants,
    /// inner diagnostics and the like).
    pub max_decoding_depth: u32,
}

/// Default maximum message size (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum array length.
pub const DEFAULT_MAX_ARRAY_LENGTH: usize = 65_535;

/// Default maximum string length (1 MiB).
pub const DEFAULT_MAX_STRING_LENGTH: usize = 1024 * 1024;

/// Default maximum byte string length (1 MiB).
pub const DEFAULT_MAX_BYTE_STRING_LENGTH: usize = 1024 * 1024;

/// Default maximum decoding depth.
pub const DEFAULT_MAX_DECODING_DEPTH: u32 = 64;

impl Default for EncodingLimits {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            max_byte_string_length: DEFAULT_MAX_BYTE_STRING_LENGTH,
            max_decoding_depth: DEFAULT_MAX_DECODING_DEPTH,
        }
    }
}

impl EncodingLimits {
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_array_length(mut self, len: usize) -> Self {
        self.max_array_length = len;
        self
    }

    pub fn with_max_string_length(mut self, len: usize) -> Self {
        self.max_string_length = len;
        self
    }

    pub fn with_max_byte_string_length(mut self, len: usize) -> Self {
        self.max_byte_string_length = len;
        self
    }

    pub fn with_max_decoding_depth(mut self, depth: u32) -> Self {
        self.max_decoding_depth = depth;
        self
    }
}

/// Context threaded through every encode and decode call.
///
/// Carries the size limits, the namespace URI table and the type registry
/// used to resolve extension object bodies. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EncodingContext {
    /// Size limits.
    pub limits: EncodingLimits,
    /// Namespace URIs, indexed by namespace index.
    pub namespace_uris: Vec<String>,
    /// Registry resolving type identifiers to structure decoders.
    pub registry: Arc<TypeRegistry>,
}

impl Default for EncodingContext {
    fn default() -> Self {
        Self {
            limits: EncodingLimits::default(),
            namespace_uris: Vec::new(),
            registry: Arc::new(TypeRegistry::with_builtins()),
        }
    }
}

impl EncodingContext {
    /// Creates a context with the given limits and the built-in registry.
    pub fn new(limits: EncodingLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Replaces the type registry.
    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Appends a namespace URI and returns its index.
    ///
    /// Index 0 is the protocol namespace; application namespaces start at 1.
    pub fn push_namespace(&mut self, uri: impl Into<String>) -> u16 {
        self.namespace_uris.push(uri.into());
        self.namespace_uris.len() as u16
    }

    /// Resolves a namespace index to its URI, if registered.
    pub fn namespace_uri(&self, index: u16) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.namespace_uris
            .get(index as usize - 1)
            .map(String::as_str)
    }

    /// Resolves a namespace URI to its index, if registered.
    pub fn namespace_index(&self, uri: &str) -> Option<u16> {
        self.namespace_uris
            .iter()
            .position(|u| u == uri)
            .map(|p| p as u16 + 1)
    }
}
