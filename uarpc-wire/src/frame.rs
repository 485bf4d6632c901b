//! Binary frame format.
//!
//! Frame layout (24-byte fixed header + payload):
//!
//! ```text
//! +--------+---------+------+------+------------+------------+-------------+--------+
//! | magic  | version | kind | mode | channel_id | request_id | payload_len | crc32c |
//! | 4 bytes| 2 bytes |1 byte|1 byte|  4 bytes   |  4 bytes   |   4 bytes   | 4 bytes|
//! +--------+---------+------+------+------------+------------+-------------+--------+
//! | payload (payload_len bytes)                                                     |
//! +---------------------------------------------------------------------------------+
//! ```
//!
//! The `(channel_id, request_id)` pair correlates requests with responses;
//! responses may complete out of order under pipelining, so correlation is
//! never by arrival order. The declared payload length is validated against
//! the configured maximum before the body is read, so an oversized message
//! is rejected without buffering it.

use crate::context::EncodingLimits;
use crate::error::WireError;
use crate::message::SecurityMode;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes identifying uarpc frames.
pub const MAGIC: [u8; 4] = *b"UARP";

/// Size of the fixed frame header in bytes (4+2+1+1+4+4+4+4 = 24).
pub const FRAME_HEADER_SIZE: usize = 24;

/// Kind of message a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Channel open handshake request.
    Open = 1,
    /// Channel open handshake acknowledgement.
    OpenAck = 2,
    /// Service request.
    Request = 3,
    /// Service response.
    Response = 4,
    /// Fault response.
    Fault = 5,
    /// Orderly channel close.
    Close = 6,
    /// Abnormal channel termination.
    Abort = 7,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        Ok(match value {
            1 => FrameKind::Open,
            2 => FrameKind::OpenAck,
            3 => FrameKind::Request,
            4 => FrameKind::Response,
            5 => FrameKind::Fault,
            6 => FrameKind::Close,
            7 => FrameKind::Abort,
            other => return Err(WireError::UnknownFrameKind(other)),
        })
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub security_mode: SecurityMode,
    pub channel_id: u32,
    pub request_id: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, channel_id: u32, request_id: u32) -> Self {
        Self {
            kind,
            security_mode: SecurityMode::None,
            channel_id,
            request_id,
        }
    }

    pub fn with_security_mode(mut self, mode: SecurityMode) -> Self {
        self.security_mode = mode;
        self
    }
}

/// A parsed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self, limits: &EncodingLimits) -> Result<BytesMut, WireError> {
        if self.payload.len() > limits.max_message_size {
            return Err(WireError::MessageTooLarge {
                size: self.payload.len(),
                max: limits.max_message_size,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_slice(&MAGIC);
        buf.put_u16_le(crate::PROTOCOL_VERSION);
        buf.put_u8(self.header.kind as u8);
        buf.put_u8(self.header.security_mode.as_u8());
        buf.put_u32_le(self.header.channel_id);
        buf.put_u32_le(self.header.request_id);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_u32_le(crc32c::crc32c(&self.payload));
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Parses the fixed header without consuming the buffer.
    ///
    /// Returns `Ok(None)` when fewer than [`FRAME_HEADER_SIZE`] bytes are
    /// buffered. The declared payload length is returned unvalidated so the
    /// caller can reject an oversized message before the body arrives.
    pub fn peek_header(buf: &[u8]) -> Result<Option<(FrameHeader, usize, u32)>, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let magic: [u8; 4] = buf[0..4].try_into().expect("slice length checked");
        if magic != MAGIC {
            return Err(WireError::InvalidMagic(magic));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != crate::PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }

        let kind = FrameKind::from_u8(buf[6])?;
        let security_mode = SecurityMode::from_u8(buf[7])?;
        let channel_id = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let request_id = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let payload_len = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]) as usize;
        let crc = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);

        Ok(Some((
            FrameHeader {
                kind,
                security_mode,
                channel_id,
                request_id,
            },
            payload_len,
            crc,
        )))
    }

    /// Decodes a frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// A declared payload length above `max_message_size` fails before the
    /// body is waited for.
    pub fn decode(
        buf: &mut BytesMut,
        limits: &EncodingLimits,
    ) -> Result<Option<Self>, WireError> {
        let (header, payload_len, crc_expected) = match Self::peek_header(buf)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        if payload_len > limits.max_message_size {
            return Err(WireError::MessageTooLarge {
                size: payload_len,
                max: limits.max_message_size,
            });
        }

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let crc_actual = crc32c::crc32c(&payload);
        if crc_actual != crc_expected {
            return Err(WireError::CrcMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self { header, payload }))
    }
}
