//! Node identifiers.
//!
//! A [`NodeId`] is a namespace index plus an identifier body of one of four
//! kinds. The encoded form always picks the narrowest applicable numeric
//! layout: two-byte for values up to 255 in namespace 0, four-byte for
//! values up to 65535 with a namespace index up to 255, and the general
//! form otherwise. An [`ExpandedNodeId`] can carry the namespace by URI
//! instead of index, and optionally a server index.

use crate::context::EncodingContext;
use crate::error::WireError;
use crate::io::{write_opt_bytes, write_opt_string, Output, Reader};
use std::fmt;

/// Identifier format discriminators (low six bits of the first byte).
const FORM_TWO_BYTE: u8 = 0x00;
const FORM_FOUR_BYTE: u8 = 0x01;
const FORM_NUMERIC: u8 = 0x02;
const FORM_STRING: u8 = 0x03;
const FORM_GUID: u8 = 0x04;
const FORM_OPAQUE: u8 = 0x05;

/// Flag on the format byte: a namespace URI string follows the body.
const FLAG_NAMESPACE_URI: u8 = 0x80;
/// Flag on the format byte: a server index follows the body.
const FLAG_SERVER_INDEX: u8 = 0x40;

/// A 16-byte globally unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub(crate) fn encode(&self, out: &mut dyn Output) -> Result<(), WireError> {
        out.put_u32(self.data1)?;
        out.put_u16(self.data2)?;
        out.put_u16(self.data3)?;
        out.put_slice(&self.data4)
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let data1 = r.u32()?;
        let data2 = r.u16()?;
        let data3 = r.u16()?;
        let mut data4 = [0u8; 8];
        for b in data4.iter_mut() {
            *b = r.u8()?;
        }
        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

/// Identifier body of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Guid),
    Opaque(Vec<u8>),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(s) => write!(f, "s={}", s),
            Identifier::Guid(g) => write!(f, "g={}", g),
            Identifier::Opaque(b) => {
                write!(f, "b=")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Identifier for an addressable entity: namespace index plus body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    /// Creates a numeric node id.
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    /// Creates a GUID node id.
    pub fn guid(namespace: u16, value: Guid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(value),
        }
    }

    /// Creates an opaque (byte string) node id.
    pub fn opaque(namespace: u16, value: Vec<u8>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(value),
        }
    }

    /// The null node id: namespace 0, numeric 0.
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0 && matches!(self.identifier, Identifier::Numeric(0))
    }

    /// Picks the narrowest format for this identifier.
    fn form(&self) -> u8 {
        match &self.identifier {
            Identifier::Numeric(v) if *v <= 0xFF && self.namespace == 0 => FORM_TWO_BYTE,
            Identifier::Numeric(v) if *v <= 0xFFFF && self.namespace <= 0xFF => FORM_FOUR_BYTE,
            Identifier::Numeric(_) => FORM_NUMERIC,
            Identifier::String(_) => FORM_STRING,
            Identifier::Guid(_) => FORM_GUID,
            Identifier::Opaque(_) => FORM_OPAQUE,
        }
    }

    pub fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        self.encode_with_flags(0, ctx, out)
    }

    /// Encodes the format byte (OR-ed with `flags`) and the body.
    fn encode_with_flags(
        &self,
        flags: u8,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        let form = self.form();
        out.put_u8(form | flags)?;
        match (&self.identifier, form) {
            (Identifier::Numeric(v), FORM_TWO_BYTE) => out.put_u8(*v as u8),
            (Identifier::Numeric(v), FORM_FOUR_BYTE) => {
                out.put_u8(self.namespace as u8)?;
                out.put_u16(*v as u16)
            }
            (Identifier::Numeric(v), _) => {
                out.put_u16(self.namespace)?;
                out.put_u32(*v)
            }
            (Identifier::String(s), _) => {
                out.put_u16(self.namespace)?;
                write_opt_string(out, &ctx.limits, Some(s))
            }
            (Identifier::Guid(g), _) => {
                out.put_u16(self.namespace)?;
                g.encode(out)
            }
            (Identifier::Opaque(b), _) => {
                out.put_u16(self.namespace)?;
                write_opt_bytes(out, &ctx.limits, Some(b))
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let format = r.u8()?;
        if format & (FLAG_NAMESPACE_URI | FLAG_SERVER_INDEX) != 0 {
            return Err(WireError::InvalidEncodingByte {
                what: "node id",
                value: format,
            });
        }
        Self::decode_body(format, r)
    }

    fn decode_body(form: u8, r: &mut Reader<'_>) -> Result<Self, WireError> {
        match form {
            FORM_TWO_BYTE => Ok(NodeId::numeric(0, r.u8()? as u32)),
            FORM_FOUR_BYTE => {
                let namespace = r.u8()? as u16;
                let value = r.u16()? as u32;
                Ok(NodeId::numeric(namespace, value))
            }
            FORM_NUMERIC => {
                let namespace = r.u16()?;
                let value = r.u32()?;
                Ok(NodeId::numeric(namespace, value))
            }
            FORM_STRING => {
                let namespace = r.u16()?;
                let value = r.opt_string()?.unwrap_or_default();
                Ok(NodeId::string(namespace, value))
            }
            FORM_GUID => {
                let namespace = r.u16()?;
                Ok(NodeId::guid(namespace, Guid::decode(r)?))
            }
            FORM_OPAQUE => {
                let namespace = r.u16()?;
                let value = r.opt_byte_string()?.unwrap_or_default();
                Ok(NodeId::opaque(namespace, value))
            }
            other => Err(WireError::InvalidEncodingByte {
                what: "node id",
                value: other,
            }),
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        write!(f, "{}", self.identifier)
    }
}

/// Node identifier that can carry the namespace by URI and a server index.
///
/// When `namespace_uri` is present it replaces the local namespace index of
/// the inner node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    pub namespace_uri: Option<String>,
    pub server_index: Option<u32>,
}

impl ExpandedNodeId {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: None,
            server_index: None,
        }
    }

    pub fn with_namespace_uri(mut self, uri: impl Into<String>) -> Self {
        self.namespace_uri = Some(uri.into());
        self
    }

    pub fn with_server_index(mut self, index: u32) -> Self {
        self.server_index = Some(index);
        self
    }

    pub fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        let mut flags = 0u8;
        if self.namespace_uri.is_some() {
            flags |= FLAG_NAMESPACE_URI;
        }
        if self.server_index.is_some() {
            flags |= FLAG_SERVER_INDEX;
        }
        self.node_id.encode_with_flags(flags, ctx, out)?;
        if let Some(ref uri) = self.namespace_uri {
            write_opt_string(out, &ctx.limits, Some(uri))?;
        }
        if let Some(index) = self.server_index {
            out.put_u32(index)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let format = r.u8()?;
        let has_uri = format & FLAG_NAMESPACE_URI != 0;
        let has_server = format & FLAG_SERVER_INDEX != 0;
        let node_id = NodeId::decode_body(format & 0x3F, r)?;
        let namespace_uri = if has_uri { r.opt_string()? } else { None };
        let server_index = if has_server { Some(r.u32()?) } else { None };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self::new(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Writer;
    use bytes::BytesMut;

    fn encode(id: &NodeId) -> BytesMut {
        let ctx = EncodingContext::default();
        let mut buf = BytesMut::new();
        id.encode(&ctx, &mut Writer::new(&mut buf)).unwrap();
        buf
    }

    fn roundtrip(id: NodeId) {
        let buf = encode(&id);
        let mut r = Reader::new(&buf, EncodingContext::default().limits);
        let decoded = NodeId::decode(&mut r).unwrap();
        assert_eq!(decoded, id);
        assert!(r.is_empty());
    }

    #[test]
    fn test_two_byte_form() {
        // Namespace 0 with a value fitting one byte uses the two-byte form.
        let buf = encode(&NodeId::numeric(0, 128));
        assert_eq!(&buf[..], &[0x00, 0x80]);
    }

    #[test]
    fn test_four_byte_form() {
        // Value 33000 exceeds one byte, so the four-byte form is required.
        let buf = encode(&NodeId::numeric(0, 33000));
        assert_eq!(&buf[..], &[0x01, 0x00, 0xE8, 0x80]);

        let buf = encode(&NodeId::numeric(5, 255));
        assert_eq!(&buf[..], &[0x01, 0x05, 0xFF, 0x00]);
    }

    #[test]
    fn test_general_numeric_form() {
        // Namespace above 255 forces the general form even for small values.
        let buf = encode(&NodeId::numeric(300, 1));
        assert_eq!(buf.len(), 1 + 2 + 4);
        assert_eq!(buf[0], 0x02);

        // So does a value above 65535.
        let buf = encode(&NodeId::numeric(0, 70_000));
        assert_eq!(buf[0], 0x02);
    }

    #[test]
    fn test_roundtrip_all_forms() {
        roundtrip(NodeId::numeric(0, 0));
        roundtrip(NodeId::numeric(0, 255));
        roundtrip(NodeId::numeric(2, 324));
        roundtrip(NodeId::numeric(7, 100_000));
        roundtrip(NodeId::string(7, "x"));
        roundtrip(NodeId::string(0, ""));
        roundtrip(NodeId::guid(
            6,
            Guid::new(0xDEADBEEF, 0x1234, 0x5678, [1, 2, 3, 4, 5, 6, 7, 8]),
        ));
        roundtrip(NodeId::opaque(3, vec![0, 1, 43, 56, 7, 7, 4]));
    }

    #[test]
    fn test_expanded_roundtrip() {
        let ctx = EncodingContext::default();
        let cases = [
            ExpandedNodeId::new(NodeId::numeric(0, 128)),
            ExpandedNodeId::new(NodeId::numeric(2, 42)).with_namespace_uri("urn:plant:cell1"),
            ExpandedNodeId::new(NodeId::string(1, "motor")).with_server_index(3),
            ExpandedNodeId::new(NodeId::numeric(0, 9))
                .with_namespace_uri("urn:plant:cell2")
                .with_server_index(1),
        ];
        for id in cases {
            let mut buf = BytesMut::new();
            id.encode(&ctx, &mut Writer::new(&mut buf)).unwrap();
            let mut r = Reader::new(&buf, ctx.limits);
            assert_eq!(ExpandedNodeId::decode(&mut r).unwrap(), id);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn test_expanded_flags_on_wire() {
        let ctx = EncodingContext::default();
        let id = ExpandedNodeId::new(NodeId::numeric(0, 128)).with_namespace_uri("u");
        let mut buf = BytesMut::new();
        id.encode(&ctx, &mut Writer::new(&mut buf)).unwrap();
        assert_eq!(buf[0], 0x80); // two-byte form + URI flag
    }

    #[test]
    fn test_plain_decode_rejects_expanded_flags() {
        let mut r = Reader::new(&[0x80, 0x01], EncodingContext::default().limits);
        assert!(matches!(
            NodeId::decode(&mut r),
            Err(WireError::InvalidEncodingByte { .. })
        ));
    }

    #[test]
    fn test_unknown_form_rejected() {
        let mut r = Reader::new(&[0x06], EncodingContext::default().limits);
        assert!(matches!(
            NodeId::decode(&mut r),
            Err(WireError::InvalidEncodingByte { .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId::numeric(0, 42).to_string(), "i=42");
        assert_eq!(NodeId::string(2, "pump").to_string(), "ns=2;s=pump");
    }
}
