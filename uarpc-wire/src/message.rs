//! Message envelopes and security negotiation types.
//!
//! Messages are the payloads of frames: the open/close handshake bodies and
//! the generic request/response/fault envelopes that carry any service
//! call. Correlation ids live in the frame header, not here.

use crate::context::EncodingContext;
use crate::error::WireError;
use crate::extension::ExtensionObject;
use crate::io::{write_opt_bytes, write_opt_string, Limited, Output, Reader, Writer};
use crate::status::StatusCode;
use bytes::{Bytes, BytesMut};

/// How messages on a channel are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SecurityMode {
    /// No signing or encryption.
    #[default]
    None = 1,
    /// Messages are signed.
    Sign = 2,
    /// Messages are signed and encrypted.
    SignAndEncrypt = 3,
}

impl SecurityMode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        Ok(match value {
            1 => SecurityMode::None,
            2 => SecurityMode::Sign,
            3 => SecurityMode::SignAndEncrypt,
            other => return Err(WireError::UnknownSecurityMode(other)),
        })
    }
}

/// Named cryptographic policy suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SecurityPolicy {
    /// The universal no-security option.
    #[default]
    None = 0,
    Basic256Sha256 = 1,
    Aes128Sha256RsaOaep = 2,
    Aes256Sha256RsaPss = 3,
}

impl SecurityPolicy {
    /// The URI form used in text/HTTP-style request headers.
    pub fn uri(self) -> &'static str {
        match self {
            SecurityPolicy::None => "urn:uarpc:security:none",
            SecurityPolicy::Basic256Sha256 => "urn:uarpc:security:basic256sha256",
            SecurityPolicy::Aes128Sha256RsaOaep => "urn:uarpc:security:aes128-sha256-rsaoaep",
            SecurityPolicy::Aes256Sha256RsaPss => "urn:uarpc:security:aes256-sha256-rsapss",
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, WireError> {
        Ok(match uri {
            "urn:uarpc:security:none" => SecurityPolicy::None,
            "urn:uarpc:security:basic256sha256" => SecurityPolicy::Basic256Sha256,
            "urn:uarpc:security:aes128-sha256-rsaoaep" => SecurityPolicy::Aes128Sha256RsaOaep,
            "urn:uarpc:security:aes256-sha256-rsapss" => SecurityPolicy::Aes256Sha256RsaPss,
            other => return Err(WireError::UnknownSecurityPolicy(other.to_string())),
        })
    }

    /// Resolves the per-request policy header of connectionless bindings.
    ///
    /// An absent header means no security; an unrecognized value is an
    /// error, not a silent downgrade.
    pub fn from_header(header: Option<&str>) -> Result<Self, WireError> {
        match header {
            None => Ok(SecurityPolicy::None),
            Some(uri) => Self::from_uri(uri),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        Ok(match value {
            0 => SecurityPolicy::None,
            1 => SecurityPolicy::Basic256Sha256,
            2 => SecurityPolicy::Aes128Sha256RsaOaep,
            3 => SecurityPolicy::Aes256Sha256RsaPss,
            other => return Err(WireError::UnknownSecurityPolicy(format!("#{}", other))),
        })
    }
}

/// Security selection carried per message.
///
/// On multiplexed bindings the effective mode of a request comes from this
/// header, not from the connection it happened to arrive on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityHeader {
    pub mode: SecurityMode,
    pub policy: SecurityPolicy,
}

impl SecurityHeader {
    pub fn new(mode: SecurityMode, policy: SecurityPolicy) -> Self {
        Self { mode, policy }
    }

    fn encode(&self, out: &mut dyn Output) -> Result<(), WireError> {
        out.put_u8(self.mode.as_u8())?;
        out.put_u8(self.policy.as_u8())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let mode = SecurityMode::from_u8(r.u8()?)?;
        let policy = SecurityPolicy::from_u8(r.u8()?)?;
        Ok(Self { mode, policy })
    }
}

fn encode_payload<F>(ctx: &EncodingContext, f: F) -> Result<Bytes, WireError>
where
    F: FnOnce(&mut dyn Output) -> Result<(), WireError>,
{
    let mut buf = BytesMut::new();
    let mut writer = Writer::new(&mut buf);
    let mut limited = Limited::new(&mut writer, ctx.limits.max_message_size);
    f(&mut limited)?;
    Ok(buf.freeze())
}

/// Channel open handshake request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenRequest {
    pub security: SecurityHeader,
    /// DER-encoded client certificate; required unless mode is `None`.
    pub client_certificate: Option<Vec<u8>>,
    /// Application URI of the client, matched against its certificate.
    pub application_uri: Option<String>,
    /// Requested channel lifetime in milliseconds.
    pub requested_lifetime_ms: u32,
}

impl OpenRequest {
    pub fn encode(&self, ctx: &EncodingContext) -> Result<Bytes, WireError> {
        encode_payload(ctx, |out| {
            self.security.encode(out)?;
            write_opt_bytes(out, &ctx.limits, self.client_certificate.as_deref())?;
            write_opt_string(out, &ctx.limits, self.application_uri.as_deref())?;
            out.put_u32(self.requested_lifetime_ms)
        })
    }

    pub fn decode(payload: &[u8], ctx: &EncodingContext) -> Result<Self, WireError> {
        let mut r = Reader::new(payload, ctx.limits);
        let security = SecurityHeader::decode(&mut r)?;
        let client_certificate = r.opt_byte_string()?;
        let application_uri = r.opt_string()?;
        let requested_lifetime_ms = r.u32()?;
        Ok(Self {
            security,
            client_certificate,
            application_uri,
            requested_lifetime_ms,
        })
    }
}

/// Channel open handshake acknowledgement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenResponse {
    pub service_result: StatusCode,
    /// Channel id assigned by the server; 0 when the open was refused.
    pub channel_id: u32,
    pub revised_lifetime_ms: u32,
    pub server_certificate: Option<Vec<u8>>,
}

impl OpenResponse {
    pub fn encode(&self, ctx: &EncodingContext) -> Result<Bytes, WireError> {
        encode_payload(ctx, |out| {
            out.put_u32(self.service_result.0)?;
            out.put_u32(self.channel_id)?;
            out.put_u32(self.revised_lifetime_ms)?;
            write_opt_bytes(out, &ctx.limits, self.server_certificate.as_deref())
        })
    }

    pub fn decode(payload: &[u8], ctx: &EncodingContext) -> Result<Self, WireError> {
        let mut r = Reader::new(payload, ctx.limits);
        let service_result = StatusCode(r.u32()?);
        let channel_id = r.u32()?;
        let revised_lifetime_ms = r.u32()?;
        let server_certificate = r.opt_byte_string()?;
        Ok(Self {
            service_result,
            channel_id,
            revised_lifetime_ms,
            server_certificate,
        })
    }
}

/// Generic service request envelope.
///
/// The body is an extension object so any application-defined service call
/// travels through the same envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub security: SecurityHeader,
    /// Client-side deadline hint in milliseconds; 0 means none.
    pub timeout_hint_ms: u32,
    pub body: ExtensionObject,
}

impl RequestMessage {
    pub fn new(body: ExtensionObject) -> Self {
        Self {
            security: SecurityHeader::default(),
            timeout_hint_ms: 0,
            body,
        }
    }

    pub fn with_security(mut self, security: SecurityHeader) -> Self {
        self.security = security;
        self
    }

    pub fn with_timeout_hint_ms(mut self, ms: u32) -> Self {
        self.timeout_hint_ms = ms;
        self
    }

    pub fn encode(&self, ctx: &EncodingContext) -> Result<Bytes, WireError> {
        encode_payload(ctx, |out| {
            self.security.encode(out)?;
            out.put_u32(self.timeout_hint_ms)?;
            self.body.encode(ctx, out)
        })
    }

    pub fn decode(payload: &[u8], ctx: &EncodingContext) -> Result<Self, WireError> {
        let mut r = Reader::new(payload, ctx.limits);
        let security = SecurityHeader::decode(&mut r)?;
        let timeout_hint_ms = r.u32()?;
        let body = ExtensionObject::decode(&mut r, ctx)?;
        Ok(Self {
            security,
            timeout_hint_ms,
            body,
        })
    }
}

/// Generic service response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub service_result: StatusCode,
    pub body: ExtensionObject,
}

impl ResponseMessage {
    pub fn new(body: ExtensionObject) -> Self {
        Self {
            service_result: StatusCode::GOOD,
            body,
        }
    }

    pub fn encode(&self, ctx: &EncodingContext) -> Result<Bytes, WireError> {
        encode_payload(ctx, |out| {
            out.put_u32(self.service_result.0)?;
            self.body.encode(ctx, out)
        })
    }

    pub fn decode(payload: &[u8], ctx: &EncodingContext) -> Result<Self, WireError> {
        let mut r = Reader::new(payload, ctx.limits);
        let service_result = StatusCode(r.u32()?);
        let body = ExtensionObject::decode(&mut r, ctx)?;
        Ok(Self {
            service_result,
            body,
        })
    }
}

/// Fault envelope: the structured error carrying a status outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultMessage {
    pub status: StatusCode,
    pub reason: Option<String>,
}

impl FaultMessage {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn encode(&self, ctx: &EncodingContext) -> Result<Bytes, WireError> {
        encode_payload(ctx, |out| {
            out.put_u32(self.status.0)?;
            write_opt_string(out, &ctx.limits, self.reason.as_deref())
        })
    }

    pub fn decode(payload: &[u8], ctx: &EncodingContext) -> Result<Self, WireError> {
        let mut r = Reader::new(payload, ctx.limits);
        let status = StatusCode(r.u32()?);
        let reason = r.opt_string()?;
        Ok(Self { status, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Decimal;

    fn ctx() -> EncodingContext {
        EncodingContext::default()
    }

    #[test]
    fn test_security_mode_codes() {
        for mode in [
            SecurityMode::None,
            SecurityMode::Sign,
            SecurityMode::SignAndEncrypt,
        ] {
            assert_eq!(SecurityMode::from_u8(mode.as_u8()).unwrap(), mode);
        }
        assert!(matches!(
            SecurityMode::from_u8(0),
            Err(WireError::UnknownSecurityMode(0))
        ));
    }

    #[test]
    fn test_policy_header_resolution() {
        // Absent header defaults to no security.
        assert_eq!(
            SecurityPolicy::from_header(None).unwrap(),
            SecurityPolicy::None
        );
        assert_eq!(
            SecurityPolicy::from_header(Some("urn:uarpc:security:basic256sha256")).unwrap(),
            SecurityPolicy::Basic256Sha256
        );
        assert!(matches!(
            SecurityPolicy::from_header(Some("urn:evil:downgrade")),
            Err(WireError::UnknownSecurityPolicy(_))
        ));
    }

    #[test]
    fn test_policy_uri_roundtrip() {
        for policy in [
            SecurityPolicy::None,
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes128Sha256RsaOaep,
            SecurityPolicy::Aes256Sha256RsaPss,
        ] {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()).unwrap(), policy);
        }
    }

    #[test]
    fn test_open_request_roundtrip() {
        let open = OpenRequest {
            security: SecurityHeader::new(SecurityMode::Sign, SecurityPolicy::Basic256Sha256),
            client_certificate: Some(vec![0x30, 0x82, 0x01, 0x0A]),
            application_uri: Some("urn:plant:press7".to_string()),
            requested_lifetime_ms: 600_000,
        };
        let payload = open.encode(&ctx()).unwrap();
        assert_eq!(OpenRequest::decode(&payload, &ctx()).unwrap(), open);
    }

    #[test]
    fn test_open_response_roundtrip() {
        let ack = OpenResponse {
            service_result: StatusCode::GOOD,
            channel_id: 19,
            revised_lifetime_ms: 300_000,
            server_certificate: None,
        };
        let payload = ack.encode(&ctx()).unwrap();
        assert_eq!(OpenResponse::decode(&payload, &ctx()).unwrap(), ack);
    }

    #[test]
    fn test_request_roundtrip() {
        let request = RequestMessage::new(ExtensionObject::from_encodable(Decimal::new(815, 2)))
            .with_timeout_hint_ms(10_000);
        let payload = request.encode(&ctx()).unwrap();
        let decoded = RequestMessage::decode(&payload, &ctx()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.timeout_hint_ms, 10_000);
    }

    #[test]
    fn test_response_and_fault_roundtrip() {
        let response = ResponseMessage::new(ExtensionObject::null());
        let payload = response.encode(&ctx()).unwrap();
        assert_eq!(ResponseMessage::decode(&payload, &ctx()).unwrap(), response);

        let fault =
            FaultMessage::new(StatusCode::BAD_REQUEST_TOO_LARGE).with_reason("1 MiB > 512 KiB");
        let payload = fault.encode(&ctx()).unwrap();
        assert_eq!(FaultMessage::decode(&payload, &ctx()).unwrap(), fault);
    }

    #[test]
    fn test_encode_respects_message_size_limit() {
        let mut ctx = ctx();
        ctx.limits = ctx.limits.with_max_message_size(16);
        let request = RequestMessage::new(ExtensionObject::byte_string(
            crate::NodeId::numeric(1, 1),
            vec![0u8; 64],
        ));
        assert!(matches!(
            request.encode(&ctx),
            Err(WireError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_truncated_request_fails() {
        let request = RequestMessage::new(ExtensionObject::null());
        let payload = request.encode(&ctx()).unwrap();
        let result = RequestMessage::decode(&payload[..3], &ctx());
        assert!(matches!(result, Err(WireError::EndOfStream { .. })));
    }
}
