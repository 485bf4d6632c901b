//! Extension objects: opaque, type-tagged structure payloads.
//!
//! An extension object carries a type id plus either no body, an opaque
//! byte string, an XML fragment, or a decoded structure instance. Decoding
//! resolves known type ids through the type registry; unknown ids pass
//! through as opaque bytes so unrecognized payloads round-trip unchanged.

use crate::context::EncodingContext;
use crate::error::WireError;
use crate::io::{write_opt_bytes, write_opt_string, Output, Reader};
use crate::nodeid::NodeId;
use crate::registry::Encodable;
use std::any::Any;

const BODY_NONE: u8 = 0x00;
const BODY_BYTE_STRING: u8 = 0x01;
const BODY_XML: u8 = 0x02;

/// Body of an [`ExtensionObject`].
#[derive(Debug, Clone)]
pub enum ExtensionBody {
    /// No body.
    None,
    /// Opaque encoded bytes (unresolved or intentionally opaque).
    ByteString(Vec<u8>),
    /// XML fragment body.
    Xml(String),
    /// Resolved structure instance.
    Decoded(Box<dyn Encodable>),
}

impl PartialEq for ExtensionBody {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ExtensionBody::None, ExtensionBody::None) => true,
            (ExtensionBody::ByteString(a), ExtensionBody::ByteString(b)) => a == b,
            (ExtensionBody::Xml(a), ExtensionBody::Xml(b)) => a == b,
            (ExtensionBody::Decoded(a), ExtensionBody::Decoded(b)) => a.eq_box(b.as_ref()),
            _ => false,
        }
    }
}

/// An opaque structure identified by a type id plus its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionObject {
    pub type_id: NodeId,
    pub body: ExtensionBody,
}

impl ExtensionObject {
    /// An extension object with a null type id and no body.
    pub fn null() -> Self {
        Self {
            type_id: NodeId::null(),
            body: ExtensionBody::None,
        }
    }

    /// Wraps an already-encoded payload.
    pub fn byte_string(type_id: NodeId, bytes: Vec<u8>) -> Self {
        Self {
            type_id,
            body: ExtensionBody::ByteString(bytes),
        }
    }

    /// Wraps a structure instance; the type id is taken from the value.
    pub fn from_encodable(value: impl Encodable + 'static) -> Self {
        Self {
            type_id: value.type_id(),
            body: ExtensionBody::Decoded(Box::new(value)),
        }
    }

    /// Downcasts a decoded body to a concrete structure type.
    pub fn decoded<T: Encodable + 'static>(&self) -> Option<&T> {
        match &self.body {
            ExtensionBody::Decoded(value) => value.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.type_id.is_null() && matches!(self.body, ExtensionBody::None)
    }

    pub fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        self.type_id.encode(ctx, out)?;
        match &self.body {
            ExtensionBody::None => out.put_u8(BODY_NONE),
            ExtensionBody::ByteString(bytes) => {
                out.put_u8(BODY_BYTE_STRING)?;
                write_opt_bytes(out, &ctx.limits, Some(bytes))
            }
            ExtensionBody::Xml(xml) => {
                out.put_u8(BODY_XML)?;
                write_opt_string(out, &ctx.limits, Some(xml))
            }
            ExtensionBody::Decoded(value) => {
                out.put_u8(BODY_BYTE_STRING)?;
                let size = value.body_size(ctx)?;
                if size > ctx.limits.max_byte_string_length {
                    return Err(WireError::LimitExceeded {
                        what: "extension body",
                        len: size,
                        max: ctx.limits.max_byte_string_length,
                    });
                }
                out.put_i32(size as i32)?;
                value.encode_body(ctx, out)
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>, ctx: &EncodingContext) -> Result<Self, WireError> {
        let type_id = NodeId::decode(r)?;
        let body = match r.u8()? {
            BODY_NONE => ExtensionBody::None,
            BODY_BYTE_STRING => {
                let bytes = r.opt_byte_string()?.unwrap_or_default();
                // A registered decoder must consume the body exactly;
                // otherwise the payload stays opaque.
                let decoded = ctx.registry.lookup(&type_id).and_then(|decode| {
                    let mut body_reader = Reader::new(&bytes, ctx.limits);
                    match decode(&mut body_reader, ctx) {
                        Ok(value) if body_reader.is_empty() => Some(value),
                        _ => None,
                    }
                });
                match decoded {
                    Some(value) => ExtensionBody::Decoded(value),
                    None => ExtensionBody::ByteString(bytes),
                }
            }
            BODY_XML => ExtensionBody::Xml(r.opt_string()?.unwrap_or_default()),
            value => {
                return Err(WireError::InvalidEncodingByte {
                    what: "extension object",
                    value,
                })
            }
        };
        Ok(Self { type_id, body })
    }
}

/// An exact decimal number: `value` × 10^(−`scale`).
///
/// The body is a two-byte scale followed by the minimal-length
/// little-endian two's-complement magnitude. Arithmetic is integer-exact;
/// [`Decimal::to_f64`] is a lossy convenience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    pub scale: i16,
    pub value: i128,
}

impl Decimal {
    /// Type identifier under which decimals are registered.
    pub const TYPE_ID: NodeId = NodeId::numeric(0, 50);

    pub fn new(value: i128, scale: i16) -> Self {
        Self { scale, value }
    }

    /// Lossy floating-point view of the exact value.
    pub fn to_f64(&self) -> f64 {
        self.value as f64 / 10f64.powi(i32::from(self.scale))
    }

    /// Minimal-length little-endian two's-complement form of the value.
    fn magnitude_le(&self) -> Vec<u8> {
        let bytes = self.value.to_le_bytes();
        let mut len = bytes.len();
        if self.value >= 0 {
            while len > 1 && bytes[len - 1] == 0x00 && bytes[len - 2] & 0x80 == 0 {
                len -= 1;
            }
        } else {
            while len > 1 && bytes[len - 1] == 0xFF && bytes[len - 2] & 0x80 != 0 {
                len -= 1;
            }
        }
        bytes[..len].to_vec()
    }

    pub(crate) fn decode_body(
        r: &mut Reader<'_>,
        _ctx: &EncodingContext,
    ) -> Result<Box<dyn Encodable>, WireError> {
        let scale = r.i16()?;
        let magnitude = r.take_remaining();
        if magnitude.len() > 16 {
            return Err(WireError::DecimalOverflow {
                len: magnitude.len(),
            });
        }
        let mut bytes = if magnitude.last().is_some_and(|b| b & 0x80 != 0) {
            [0xFFu8; 16]
        } else {
            [0x00u8; 16]
        };
        bytes[..magnitude.len()].copy_from_slice(magnitude);
        let value = i128::from_le_bytes(bytes);
        Ok(Box::new(Decimal { scale, value }))
    }
}

impl Encodable for Decimal {
    fn type_id(&self) -> NodeId {
        Self::TYPE_ID
    }

    fn encode_body(&self, _ctx: &EncodingContext, out: &mut dyn Output) -> Result<(), WireError> {
        out.put_i16(self.scale)?;
        out.put_slice(&self.magnitude_le())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn Encodable> {
        Box::new(*self)
    }

    fn eq_box(&self, other: &dyn Encodable) -> bool {
        other
            .as_any()
            .downcast_ref::<Decimal>()
            .is_some_and(|o| self == o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Counter, Writer};
    use bytes::BytesMut;

    fn ctx() -> EncodingContext {
        EncodingContext::default()
    }

    fn encode(eo: &ExtensionObject) -> BytesMut {
        let mut buf = BytesMut::new();
        eo.encode(&ctx(), &mut Writer::new(&mut buf)).unwrap();
        buf
    }

    #[test]
    fn test_decimal_golden_bytes() {
        // 1518632738243 at scale 4, inside an extension object: two-byte
        // type id, byte-string body marker, length 8, scale, then the
        // six-byte magnitude.
        let eo = ExtensionObject::from_encodable(Decimal::new(1_518_632_738_243, 4));
        let buf = encode(&eo);
        let expected = [
            0x00, 0x32, // type id i=50
            0x01, // byte string body
            0x08, 0x00, 0x00, 0x00, // body length 8
            0x04, 0x00, // scale 4
            0xC3, 0x9D, 0x90, 0x95, 0x61, 0x01, // 1518632738243 LE
        ];
        assert_eq!(&buf[..], &expected);
    }

    #[test]
    fn test_decimal_golden_decode() {
        let eo = ExtensionObject::from_encodable(Decimal::new(1_518_632_738_243, 4));
        let buf = encode(&eo);
        let mut r = Reader::new(&buf, ctx().limits);
        let decoded = ExtensionObject::decode(&mut r, &ctx()).unwrap();
        let decimal = decoded.decoded::<Decimal>().unwrap();
        // Exact integer reconstruction, no floating point involved.
        assert_eq!(decimal.value, 1_518_632_738_243);
        assert_eq!(decimal.scale, 4);
        assert!((decimal.to_f64() - 151_863_273.8243).abs() < 1e-4);
    }

    #[test]
    fn test_decimal_magnitude_minimality() {
        // Sign-bit boundaries force an extra byte; redundant bytes are
        // trimmed.
        assert_eq!(Decimal::new(0, 0).magnitude_le(), vec![0x00]);
        assert_eq!(Decimal::new(127, 0).magnitude_le(), vec![0x7F]);
        assert_eq!(Decimal::new(128, 0).magnitude_le(), vec![0x80, 0x00]);
        assert_eq!(Decimal::new(-1, 0).magnitude_le(), vec![0xFF]);
        assert_eq!(Decimal::new(-128, 0).magnitude_le(), vec![0x80]);
        assert_eq!(Decimal::new(-129, 0).magnitude_le(), vec![0x7F, 0xFF]);
    }

    #[test]
    fn test_decimal_roundtrip_extremes() {
        for value in [0i128, 1, -1, i128::MAX, i128::MIN, 10i128.pow(30)] {
            for scale in [0i16, 4, -3, i16::MAX] {
                let eo = ExtensionObject::from_encodable(Decimal::new(value, scale));
                let buf = encode(&eo);
                let mut r = Reader::new(&buf, ctx().limits);
                let decoded = ExtensionObject::decode(&mut r, &ctx()).unwrap();
                assert_eq!(
                    decoded.decoded::<Decimal>(),
                    Some(&Decimal::new(value, scale))
                );
            }
        }
    }

    #[test]
    fn test_unknown_type_id_passes_through() {
        let eo = ExtensionObject::byte_string(NodeId::numeric(9, 4242), vec![1, 2, 3, 4]);
        let buf = encode(&eo);
        let mut r = Reader::new(&buf, ctx().limits);
        let decoded = ExtensionObject::decode(&mut r, &ctx()).unwrap();
        assert_eq!(decoded, eo);

        // And it re-encodes to the identical bytes.
        assert_eq!(encode(&decoded), buf);
    }

    #[test]
    fn test_known_id_with_garbage_body_stays_opaque() {
        // Claims to be a decimal but the body is 20 bytes of magnitude,
        // which the decoder rejects; the payload must survive opaque.
        let bytes = vec![0xAB; 22];
        let eo = ExtensionObject::byte_string(Decimal::TYPE_ID, bytes.clone());
        let buf = encode(&eo);
        let mut r = Reader::new(&buf, ctx().limits);
        let decoded = ExtensionObject::decode(&mut r, &ctx()).unwrap();
        assert_eq!(decoded.body, ExtensionBody::ByteString(bytes));
    }

    #[test]
    fn test_null_and_xml_bodies() {
        for eo in [
            ExtensionObject::null(),
            ExtensionObject {
                type_id: NodeId::numeric(2, 8),
                body: ExtensionBody::Xml("<alarm level=\"2\"/>".to_string()),
            },
        ] {
            let buf = encode(&eo);
            let mut r = Reader::new(&buf, ctx().limits);
            assert_eq!(ExtensionObject::decode(&mut r, &ctx()).unwrap(), eo);
        }
    }

    #[test]
    fn test_invalid_body_marker() {
        let mut buf = BytesMut::new();
        {
            let mut w = Writer::new(&mut buf);
            NodeId::null().encode(&ctx(), &mut w).unwrap();
            w.put_u8(7).unwrap();
        }
        let mut r = Reader::new(&buf, ctx().limits);
        assert!(matches!(
            ExtensionObject::decode(&mut r, &ctx()),
            Err(WireError::InvalidEncodingByte { .. })
        ));
    }

    #[test]
    fn test_counter_matches_encode() {
        let eo = ExtensionObject::from_encodable(Decimal::new(-99_000_000_007, 2));
        let buf = encode(&eo);
        let counted = Counter::measure(|c| eo.encode(&ctx(), c)).unwrap();
        assert_eq!(counted, buf.len());
    }
}
