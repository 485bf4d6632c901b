//! Built-in structured value types.

use crate::context::EncodingContext;
use crate::error::WireError;
use crate::io::{write_opt_string, Output, Reader};
use crate::status::StatusCode;
use crate::variant::Variant;
use chrono::{TimeZone, Utc};

/// Seconds between 1601-01-01 and the Unix epoch.
const EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// A timestamp as 100-nanosecond ticks since 1601-01-01 UTC.
///
/// Kept as raw ticks on the wire so round-trips are exact; convert through
/// [`DateTime::to_chrono`] for calendar arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DateTime(pub i64);

impl DateTime {
    pub const MIN: DateTime = DateTime(0);

    /// The current time.
    pub fn now() -> Self {
        Self::from_chrono(&Utc::now())
    }

    pub fn from_chrono(dt: &chrono::DateTime<Utc>) -> Self {
        let ticks = (dt.timestamp() + EPOCH_OFFSET_SECS) * 10_000_000
            + i64::from(dt.timestamp_subsec_nanos() / 100);
        DateTime(ticks)
    }

    /// Converts to a calendar timestamp; `None` if out of chrono's range.
    pub fn to_chrono(self) -> Option<chrono::DateTime<Utc>> {
        let secs = self.0.div_euclid(10_000_000) - EPOCH_OFFSET_SECS;
        let nanos = (self.0.rem_euclid(10_000_000) * 100) as u32;
        Utc.timestamp_opt(secs, nanos).single()
    }

    pub(crate) fn encode(&self, out: &mut dyn Output) -> Result<(), WireError> {
        out.put_i64(self.0)
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(DateTime(r.i64()?))
    }
}

/// A name qualified by a namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedName {
    pub namespace_index: u16,
    pub name: Option<String>,
}

impl QualifiedName {
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: Some(name.into()),
        }
    }

    pub(crate) fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        out.put_u16(self.namespace_index)?;
        write_opt_string(out, &ctx.limits, self.name.as_deref())
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let namespace_index = r.u16()?;
        let name = r.opt_string()?;
        Ok(Self {
            namespace_index,
            name,
        })
    }
}

/// Human-readable text with an optional locale.
///
/// Encoded with a mask byte: bit 0 locale present, bit 1 text present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    pub locale: Option<String>,
    pub text: Option<String>,
}

const LOCALIZED_TEXT_LOCALE: u8 = 0x01;
const LOCALIZED_TEXT_TEXT: u8 = 0x02;

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: Some(text.into()),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub(crate) fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= LOCALIZED_TEXT_LOCALE;
        }
        if self.text.is_some() {
            mask |= LOCALIZED_TEXT_TEXT;
        }
        out.put_u8(mask)?;
        if let Some(ref locale) = self.locale {
            write_opt_string(out, &ctx.limits, Some(locale))?;
        }
        if let Some(ref text) = self.text {
            write_opt_string(out, &ctx.limits, Some(text))?;
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let mask = r.u8()?;
        if mask & !(LOCALIZED_TEXT_LOCALE | LOCALIZED_TEXT_TEXT) != 0 {
            return Err(WireError::InvalidEncodingByte {
                what: "localized text",
                value: mask,
            });
        }
        let locale = if mask & LOCALIZED_TEXT_LOCALE != 0 {
            r.opt_string()?
        } else {
            None
        };
        let text = if mask & LOCALIZED_TEXT_TEXT != 0 {
            r.opt_string()?
        } else {
            None
        };
        Ok(Self { locale, text })
    }
}

/// A value together with its quality and timestamps.
///
/// Every field is optional; a mask byte records which are present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub status: Option<StatusCode>,
    pub source_timestamp: Option<DateTime>,
    pub server_timestamp: Option<DateTime>,
    pub source_picoseconds: Option<u16>,
    pub server_picoseconds: Option<u16>,
}

const DATA_VALUE_VALUE: u8 = 0x01;
const DATA_VALUE_STATUS: u8 = 0x02;
const DATA_VALUE_SOURCE_TS: u8 = 0x04;
const DATA_VALUE_SERVER_TS: u8 = 0x08;
const DATA_VALUE_SOURCE_PICO: u8 = 0x10;
const DATA_VALUE_SERVER_PICO: u8 = 0x20;

impl DataValue {
    pub fn new(value: Variant) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source_timestamp(mut self, ts: DateTime) -> Self {
        self.source_timestamp = Some(ts);
        self
    }

    pub fn with_server_timestamp(mut self, ts: DateTime) -> Self {
        self.server_timestamp = Some(ts);
        self
    }

    pub(crate) fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= DATA_VALUE_VALUE;
        }
        if self.status.is_some() {
            mask |= DATA_VALUE_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= DATA_VALUE_SOURCE_TS;
        }
        if self.server_timestamp.is_some() {
            mask |= DATA_VALUE_SERVER_TS;
        }
        if self.source_picoseconds.is_some() {
            mask |= DATA_VALUE_SOURCE_PICO;
        }
        if self.server_picoseconds.is_some() {
            mask |= DATA_VALUE_SERVER_PICO;
        }
        out.put_u8(mask)?;
        if let Some(ref value) = self.value {
            value.encode(ctx, out)?;
        }
        if let Some(status) = self.status {
            out.put_u32(status.0)?;
        }
        if let Some(ts) = self.source_timestamp {
            ts.encode(out)?;
        }
        if let Some(pico) = self.source_picoseconds {
            out.put_u16(pico)?;
        }
        if let Some(ts) = self.server_timestamp {
            ts.encode(out)?;
        }
        if let Some(pico) = self.server_picoseconds {
            out.put_u16(pico)?;
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut Reader<'_>, ctx: &EncodingContext) -> Result<Self, WireError> {
        let mask = r.u8()?;
        if mask & 0xC0 != 0 {
            return Err(WireError::InvalidEncodingByte {
                what: "data value",
                value: mask,
            });
        }
        let value = if mask & DATA_VALUE_VALUE != 0 {
            Some(Variant::decode(r, ctx)?)
        } else {
            None
        };
        let status = if mask & DATA_VALUE_STATUS != 0 {
            Some(StatusCode(r.u32()?))
        } else {
            None
        };
        let source_timestamp = if mask & DATA_VALUE_SOURCE_TS != 0 {
            Some(DateTime::decode(r)?)
        } else {
            None
        };
        let source_picoseconds = if mask & DATA_VALUE_SOURCE_PICO != 0 {
            Some(r.u16()?)
        } else {
            None
        };
        let server_timestamp = if mask & DATA_VALUE_SERVER_TS != 0 {
            Some(DateTime::decode(r)?)
        } else {
            None
        };
        let server_picoseconds = if mask & DATA_VALUE_SERVER_PICO != 0 {
            Some(r.u16()?)
        } else {
            None
        };
        Ok(Self {
            value,
            status,
            source_timestamp,
            server_timestamp,
            source_picoseconds,
            server_picoseconds,
        })
    }
}

/// Diagnostic detail attached to a status code.
///
/// The string fields are indexes into a string table negotiated elsewhere.
/// Inner infos nest; decoding is depth-limited.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub locale: Option<i32>,
    pub localized_text: Option<i32>,
    pub additional_info: Option<String>,
    pub inner_status_code: Option<StatusCode>,
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

const DIAG_SYMBOLIC_ID: u8 = 0x01;
const DIAG_NAMESPACE_URI: u8 = 0x02;
const DIAG_LOCALE: u8 = 0x04;
const DIAG_LOCALIZED_TEXT: u8 = 0x08;
const DIAG_ADDITIONAL_INFO: u8 = 0x10;
const DIAG_INNER_STATUS: u8 = 0x20;
const DIAG_INNER_INFO: u8 = 0x40;

impl DiagnosticInfo {
    pub(crate) fn encode(
        &self,
        ctx: &EncodingContext,
        out: &mut dyn Output,
    ) -> Result<(), WireError> {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= DIAG_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= DIAG_NAMESPACE_URI;
        }
        if self.locale.is_some() {
            mask |= DIAG_LOCALE;
        }
        if self.localized_text.is_some() {
            mask |= DIAG_LOCALIZED_TEXT;
        }
        if self.additional_info.is_some() {
            mask |= DIAG_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            mask |= DIAG_INNER_STATUS;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= DIAG_INNER_INFO;
        }
        out.put_u8(mask)?;
        if let Some(v) = self.symbolic_id {
            out.put_i32(v)?;
        }
        if let Some(v) = self.namespace_uri {
            out.put_i32(v)?;
        }
        if let Some(v) = self.locale {
            out.put_i32(v)?;
        }
        if let Some(v) = self.localized_text {
            out.put_i32(v)?;
        }
        if let Some(ref v) = self.additional_info {
            write_opt_string(out, &ctx.limits, Some(v))?;
        }
        if let Some(v) = self.inner_status_code {
            out.put_u32(v.0)?;
        }
        if let Some(ref inner) = self.inner_diagnostic_info {
            inner.encode(ctx, out)?;
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let mask = r.u8()?;
        if mask & 0x80 != 0 {
            return Err(WireError::InvalidEncodingByte {
                what: "diagnostic info",
                value: mask,
            });
        }
        let symbolic_id = if mask & DIAG_SYMBOLIC_ID != 0 {
            Some(r.i32()?)
        } else {
            None
        };
        let namespace_uri = if mask & DIAG_NAMESPACE_URI != 0 {
            Some(r.i32()?)
        } else {
            None
        };
        let locale = if mask & DIAG_LOCALE != 0 {
            Some(r.i32()?)
        } else {
            None
        };
        let localized_text = if mask & DIAG_LOCALIZED_TEXT != 0 {
            Some(r.i32()?)
        } else {
            None
        };
        let additional_info = if mask & DIAG_ADDITIONAL_INFO != 0 {
            r.opt_string()?
        } else {
            None
        };
        let inner_status_code = if mask & DIAG_INNER_STATUS != 0 {
            Some(StatusCode(r.u32()?))
        } else {
            None
        };
        let inner_diagnostic_info = if mask & DIAG_INNER_INFO != 0 {
            r.enter()?;
            let inner = DiagnosticInfo::decode(r)?;
            r.exit();
            Some(Box::new(inner))
        } else {
            None
        };
        Ok(Self {
            symbolic_id,
            namespace_uri,
            locale,
            localized_text,
            additional_info,
            inner_status_code,
            inner_diagnostic_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Writer;
    use bytes::BytesMut;

    fn ctx() -> EncodingContext {
        EncodingContext::default()
    }

    #[test]
    fn test_datetime_chrono_roundtrip() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        let dt = DateTime::from_chrono(&now);
        assert_eq!(dt.to_chrono().unwrap(), now);
    }

    #[test]
    fn test_datetime_epoch() {
        // Unix epoch in 100ns ticks since 1601.
        let epoch = Utc.timestamp_opt(0, 0).single().unwrap();
        assert_eq!(DateTime::from_chrono(&epoch).0, 116_444_736_000_000_000);
    }

    #[test]
    fn test_qualified_name_roundtrip() {
        let qn = QualifiedName::new(3, "FlowSetpoint");
        let mut buf = BytesMut::new();
        qn.encode(&ctx(), &mut Writer::new(&mut buf)).unwrap();
        let mut r = Reader::new(&buf, ctx().limits);
        assert_eq!(QualifiedName::decode(&mut r).unwrap(), qn);
    }

    #[test]
    fn test_localized_text_mask() {
        let cases = [
            LocalizedText::default(),
            LocalizedText::new("running"),
            LocalizedText::new("käynnissä").with_locale("fi"),
        ];
        for lt in cases {
            let mut buf = BytesMut::new();
            lt.encode(&ctx(), &mut Writer::new(&mut buf)).unwrap();
            let mut r = Reader::new(&buf, ctx().limits);
            assert_eq!(LocalizedText::decode(&mut r).unwrap(), lt);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn test_data_value_roundtrip() {
        let dv = DataValue::new(Variant::Scalar(crate::variant::Scalar::Double(21.5)))
            .with_status(StatusCode::GOOD)
            .with_source_timestamp(DateTime(116_444_736_000_000_000));
        let mut buf = BytesMut::new();
        dv.encode(&ctx(), &mut Writer::new(&mut buf)).unwrap();
        let mut r = Reader::new(&buf, ctx().limits);
        assert_eq!(DataValue::decode(&mut r, &ctx()).unwrap(), dv);
    }

    #[test]
    fn test_empty_data_value_is_one_byte() {
        let mut buf = BytesMut::new();
        DataValue::default()
            .encode(&ctx(), &mut Writer::new(&mut buf))
            .unwrap();
        assert_eq!(&buf[..], &[0x00]);
    }

    #[test]
    fn test_diagnostic_info_nesting() {
        let di = DiagnosticInfo {
            symbolic_id: Some(4),
            additional_info: Some("valve stuck".to_string()),
            inner_status_code: Some(StatusCode::BAD_TIMEOUT),
            inner_diagnostic_info: Some(Box::new(DiagnosticInfo {
                symbolic_id: Some(9),
                ..DiagnosticInfo::default()
            })),
            ..DiagnosticInfo::default()
        };
        let mut buf = BytesMut::new();
        di.encode(&ctx(), &mut Writer::new(&mut buf)).unwrap();
        let mut r = Reader::new(&buf, ctx().limits);
        assert_eq!(DiagnosticInfo::decode(&mut r).unwrap(), di);
    }

    #[test]
    fn test_diagnostic_info_depth_bomb() {
        // A chain of inner infos deeper than the limit must fail cleanly.
        let mut buf = BytesMut::new();
        {
            let mut w = Writer::new(&mut buf);
            for _ in 0..100 {
                w.put_u8(DIAG_INNER_INFO).unwrap();
            }
            w.put_u8(0).unwrap();
        }
        let limits = crate::EncodingLimits::default().with_max_decoding_depth(16);
        let mut r = Reader::new(&buf, limits);
        assert!(matches!(
            DiagnosticInfo::decode(&mut r),
            Err(WireError::DepthExceeded { .. })
        ));
    }
}
