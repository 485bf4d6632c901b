//! Variants: self-describing tagged union values.
//!
//! A variant carries either nothing, one scalar of a built-in kind, or a
//! homogeneous (optionally multi-dimensional) array of one kind. The
//! encoding mask byte is `(array bit 0x80) | (dimensions bit 0x40) |
//! (six-bit type tag)`; tag 0 is the null variant.
//!
//! Tags 26 through 63 are reserved. Values of a reserved kind still
//! round-trip: their payload is carried as a raw byte string, both in
//! scalar and in array position, so unrecognized kinds pass through
//! unchanged instead of failing.

use crate::context::EncodingContext;
use crate::error::WireError;
use crate::extension::ExtensionObject;
use crate::io::{write_opt_bytes, write_opt_string, Counter, Output, Reader};
use crate::nodeid::{ExpandedNodeId, Guid, NodeId};
use crate::status::StatusCode;
use crate::types::{DataValue, DateTime, DiagnosticInfo, LocalizedText, QualifiedName};

/// Built-in type tags (bits 0–5 of the variant mask).
pub mod tag {
    pub const NULL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const SBYTE: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const INT16: u8 = 4;
    pub const UINT16: u8 = 5;
    pub const INT32: u8 = 6;
    pub const UINT32: u8 = 7;
    pub const INT64: u8 = 8;
    pub const UINT64: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const DOUBLE: u8 = 11;
    pub const STRING: u8 = 12;
    pub const DATE_TIME: u8 = 13;
    pub const GUID: u8 = 14;
    pub const BYTE_STRING: u8 = 15;
    pub const XML_ELEMENT: u8 = 16;
    pub const NODE_ID: u8 = 17;
    pub const EXPANDED_NODE_ID: u8 = 18;
    pub const STATUS_CODE: u8 = 19;
    pub const QUALIFIED_NAME: u8 = 20;
    pub const LOCALIZED_TEXT: u8 = 21;
    pub const EXTENSION_OBJECT: u8 = 22;
    pub const DATA_VALUE: u8 = 23;
    pub const VARIANT: u8 = 24;
    pub const DIAGNOSTIC_INFO: u8 = 25;
    /// First tag of the reserved range (26..=63).
    pub const FIRST_RESERVED: u8 = 26;
    /// Highest tag representable in the six mask bits.
    pub const MAX: u8 = 63;
}

const MASK_ARRAY: u8 = 0x80;
const MASK_DIMENSIONS: u8 = 0x40;
const MASK_TAG: u8 = 0x3F;

/// One value of a built-in kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    DateTime(DateTime),
    Guid(Guid),
    ByteString(Option<Vec<u8>>),
    XmlElement(Option<String>),
    NodeId(NodeId),
    ExpandedNodeId(ExpandedNodeId),
    StatusCode(StatusCode),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    Extension(ExtensionObject),
    DataValue(Box<DataValue>),
    Variant(Box<Variant>),
    Diagnostic(Box<DiagnosticInfo>),
    /// A value of a reserved kind, carried as its raw payload bytes.
    Unknown { tag: u8, body: Vec<u8> },
}

impl Scalar {
    /// The six-bit type tag of this value.
    pub fn tag(&self) -> u8 {
        match self {
            Scalar::Boolean(_) => tag::BOOLEAN,
            Scalar::SByte(_) => tag::SBYTE,
            Scalar::Byte(_) => tag::BYTE,
            Scalar::Int16(_) => tag::INT16,
            Scalar::UInt16(_) => tag::UINT16,
            Scalar::Int32(_) => tag::INT32,
            Scalar::UInt32(_) => tag::UINT32,
            Scalar::Int64(_) => tag::INT64,
            Scalar::UInt64(_) => tag::UINT64,
            Scalar::Float(_) => tag::FLOAT,
            Scalar::Double(_) => tag::DOUBLE,
            Scalar::String(_) => tag::STRING,
            Scalar::DateTime(_) => tag::DATE_TIME,
            Scalar::Guid(_) => tag::GUID,
            Scalar::ByteString(_) => tag::BYTE_STRING,
            Scalar::XmlElement(_) => tag::XML_ELEMENT,
            Scalar::NodeId(_) => tag::NODE_ID,
            Scalar::ExpandedNodeId(_) => tag::EXPANDED_NODE_ID,
            Scalar::StatusCode(_) => tag::STATUS_CODE,
            Scalar::QualifiedName(_) => tag::QUALIFIED_NAME,
            Scalar::LocalizedText(_) => tag::LOCALIZED_TEXT,
            Scalar::Extension(_) => tag::EXTENSION_OBJECT,
            Scalar::DataValue(_) => tag::DATA_VALUE,
            Scalar::Variant(_) => tag::VARIANT,
            Scalar::Diagnostic(_) => tag::DIAGNOSTIC_INFO,
            Scalar::Unknown { tag, .. } => *tag,
        }
    }

    fn encode(&self, ctx: &EncodingContext, out: &mut dyn Output) -> Result<(), WireError> {
        match self {
            Scalar::Boolean(v) => out.put_u8(u8::from(*v)),
            Scalar::SByte(v) => out.put_i8(*v),
            Scalar::Byte(v) => out.put_u8(*v),
            Scalar::Int16(v) => out.put_i16(*v),
            Scalar::UInt16(v) => out.put_u16(*v),
            Scalar::Int32(v) => out.put_i32(*v),
            Scalar::UInt32(v) => out.put_u32(*v),
            Scalar::Int64(v) => out.put_i64(*v),
            Scalar::UInt64(v) => out.put_u64(*v),
            Scalar::Float(v) => out.put_f32(*v),
            Scalar::Double(v) => out.put_f64(*v),
            Scalar::String(v) => write_opt_string(out, &ctx.limits, v.as_deref()),
            Scalar::DateTime(v) => v.encode(out),
            Scalar::Guid(v) => v.encode(out),
            Scalar::ByteString(v) => write_opt_bytes(out, &ctx.limits, v.as_deref()),
            Scalar::XmlElement(v) => write_opt_string(out, &ctx.limits, v.as_deref()),
            Scalar::NodeId(v) => v.encode(ctx, out),
            Scalar::ExpandedNodeId(v) => v.encode(ctx, out),
            Scalar::StatusCode(v) => out.put_u32(v.0),
            Scalar::QualifiedName(v) => v.encode(ctx, out),
            Scalar::LocalizedText(v) => v.encode(ctx, out),
            Scalar::Extension(v) => v.encode(ctx, out),
            Scalar::DataValue(v) => v.encode(ctx, out),
            Scalar::Variant(v) => v.encode(ctx, out),
            Scalar::Diagnostic(v) => v.encode(ctx, out),
            Scalar::Unknown { body, .. } => write_opt_bytes(out, &ctx.limits, Some(body)),
        }
    }

    fn decode(tag_byte: u8, r: &mut Reader<'_>, ctx: &EncodingContext) -> Result<Self, WireError> {
        Ok(match tag_byte {
            tag::BOOLEAN => Scalar::Boolean(r.u8()? != 0),
            tag::SBYTE => Scalar::SByte(r.i8()?),
            tag::BYTE => Scalar::Byte(r.u8()?),
            tag::INT16 => Scalar::Int16(r.i16()?),
            tag::UINT16 => Scalar::UInt16(r.u16()?),
            tag::INT32 => Scalar::Int32(r.i32()?),
            tag::UINT32 => Scalar::UInt32(r.u32()?),
            tag::INT64 => Scalar::Int64(r.i64()?),
            tag::UINT64 => Scalar::UInt64(r.u64()?),
            tag::FLOAT => Scalar::Float(r.f32()?),
            tag::DOUBLE => Scalar::Double(r.f64()?),
            tag::STRING => Scalar::String(r.opt_string()?),
            tag::DATE_TIME => Scalar::DateTime(DateTime::decode(r)?),
            tag::GUID => Scalar::Guid(Guid::decode(r)?),
            tag::BYTE_STRING => Scalar::ByteString(r.opt_byte_string()?),
            tag::XML_ELEMENT => Scalar::XmlElement(r.opt_string()?),
            tag::NODE_ID => Scalar::NodeId(NodeId::decode(r)?),
            tag::EXPANDED_NODE_ID => Scalar::ExpandedNodeId(ExpandedNodeId::decode(r)?),
            tag::STATUS_CODE => Scalar::StatusCode(StatusCode(r.u32()?)),
            tag::QUALIFIED_NAME => Scalar::QualifiedName(QualifiedName::decode(r)?),
            tag::LOCALIZED_TEXT => Scalar::LocalizedText(LocalizedText::decode(r)?),
            tag::EXTENSION_OBJECT => Scalar::Extension(ExtensionObject::decode(r, ctx)?),
            tag::DATA_VALUE => Scalar::DataValue(Box::new(DataValue::decode(r, ctx)?)),
            tag::VARIANT => Scalar::Variant(Box::new(Variant::decode(r, ctx)?)),
            tag::DIAGNOSTIC_INFO => Scalar::Diagnostic(Box::new(DiagnosticInfo::decode(r)?)),
            reserved @ tag::FIRST_RESERVED..=tag::MAX => Scalar::Unknown {
                tag: reserved,
                body: r.opt_byte_string()?.unwrap_or_default(),
            },
            value => {
                return Err(WireError::InvalidEncodingByte {
                    what: "variant",
                    value,
                })
            }
        })
    }
}

/// A homogeneous, optionally multi-dimensional array of scalars.
///
/// Elements are stored flat in row-major order; `dimensions` records the
/// shape for arrays of rank two or higher.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantArray {
    element_tag: u8,
    elements: Vec<Scalar>,
    dimensions: Option<Vec<u32>>,
}

impl VariantArray {
    /// Builds a one-dimensional array, checking element homogeneity.
    pub fn new(element_tag: u8, elements: Vec<Scalar>) -> Result<Self, WireError> {
        if element_tag == tag::NULL || element_tag > tag::MAX {
            return Err(WireError::InvalidEncodingByte {
                what: "variant array tag",
                value: element_tag,
            });
        }
        for element in &elements {
            if element.tag() != element_tag {
                return Err(WireError::MixedArray {
                    expected: element_tag,
                    found: element.tag(),
                });
            }
        }
        Ok(Self {
            element_tag,
            elements,
            dimensions: None,
        })
    }

    /// Declares a multi-dimensional shape over the flat elements.
    ///
    /// Requires rank two or more and a dimension product equal to the
    /// element count; single-dimension arrays carry no explicit shape.
    pub fn with_dimensions(mut self, dimensions: Vec<u32>) -> Result<Self, WireError> {
        let product: usize = dimensions.iter().map(|d| *d as usize).product();
        if dimensions.len() < 2 || product != self.elements.len() {
            return Err(WireError::DimensionMismatch {
                dims: dimensions,
                len: self.elements.len(),
            });
        }
        self.dimensions = Some(dimensions);
        Ok(self)
    }

    pub fn element_tag(&self) -> u8 {
        self.element_tag
    }

    pub fn elements(&self) -> &[Scalar] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<Scalar> {
        self.elements
    }

    /// The explicit shape, if this array is multi-dimensional.
    pub fn dimensions(&self) -> Option<&[u32]> {
        self.dimensions.as_deref()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// A self-describing tagged union value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Null,
    Scalar(Scalar),
    Array(VariantArray),
}

impl Variant {
    /// Convenience constructor for a one-dimensional array.
    pub fn array(element_tag: u8, elements: Vec<Scalar>) -> Result<Self, WireError> {
        Ok(Variant::Array(VariantArray::new(element_tag, elements)?))
    }

    /// The six-bit type tag; 0 for the null variant.
    pub fn type_tag(&self) -> u8 {
        match self {
            Variant::Null => tag::NULL,
            Variant::Scalar(s) => s.tag(),
            Variant::Array(a) => a.element_tag,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    pub fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        match self {
            Variant::Null => out.put_u8(tag::NULL),
            Variant::Scalar(scalar) => {
                out.put_u8(scalar.tag())?;
                scalar.encode(ctx, out)
            }
            Variant::Array(array) => {
                let mut mask = array.element_tag | MASK_ARRAY;
                if array.dimensions.is_some() {
                    mask |= MASK_DIMENSIONS;
                }
                out.put_u8(mask)?;
                out.put_i32(array.elements.len() as i32)?;
                for element in &array.elements {
                    element.encode(ctx, out)?;
                }
                if let Some(ref dims) = array.dimensions {
                    out.put_i32(dims.len() as i32)?;
                    for dim in dims {
                        out.put_i32(*dim as i32)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Exact byte length the encode pass will produce.
    pub fn encoded_size(&self, ctx: &EncodingContext) -> Result<usize, WireError> {
        Counter::measure(|c| self.encode(ctx, c))
    }

    pub fn decode(r: &mut Reader<'_>, ctx: &EncodingContext) -> Result<Self, WireError> {
        let mask = r.u8()?;
        let tag_byte = mask & MASK_TAG;
        let is_array = mask & MASK_ARRAY != 0;
        let has_dimensions = mask & MASK_DIMENSIONS != 0;

        if tag_byte == tag::NULL {
            if is_array || has_dimensions {
                return Err(WireError::InvalidEncodingByte {
                    what: "variant",
                    value: mask,
                });
            }
            return Ok(Variant::Null);
        }
        if !is_array && has_dimensions {
            return Err(WireError::InvalidEncodingByte {
                what: "variant",
                value: mask,
            });
        }

        r.enter()?;
        let result = Self::decode_value(tag_byte, is_array, has_dimensions, r, ctx);
        r.exit();
        result
    }

    fn decode_value(
        tag_byte: u8,
        is_array: bool,
        has_dimensions: bool,
        r: &mut Reader<'_>,
        ctx: &EncodingContext,
    ) -> Result<Self, WireError> {
        if !is_array {
            return Ok(Variant::Scalar(Scalar::decode(tag_byte, r, ctx)?));
        }

        let len = match r.array_len("variant array")? {
            Some(len) => len,
            // A null array collapses to the null variant.
            None => return Ok(Variant::Null),
        };
        let mut elements = Vec::with_capacity(len);
        for _ in 0..len {
            elements.push(Scalar::decode(tag_byte, r, ctx)?);
        }

        let dimensions = if has_dimensions {
            let count = r.array_len("array dimensions")?.unwrap_or(0);
            let mut dims = Vec::with_capacity(count);
            for _ in 0..count {
                let dim = r.i32()?;
                if dim < 0 {
                    return Err(WireError::NegativeLength {
                        what: "array dimension",
                        len: dim,
                    });
                }
                dims.push(dim as u32);
            }
            let product: usize = dims.iter().map(|d| *d as usize).product();
            if product != elements.len() {
                return Err(WireError::DimensionMismatch {
                    dims,
                    len: elements.len(),
                });
            }
            // Rank-one shapes add nothing over the element count.
            if dims.len() > 1 {
                Some(dims)
            } else {
                None
            }
        } else {
            None
        };

        Ok(Variant::Array(VariantArray {
            element_tag: tag_byte,
            elements,
            dimensions,
        }))
    }
}

impl From<Scalar> for Variant {
    fn from(scalar: Scalar) -> Self {
        Variant::Scalar(scalar)
    }
}
