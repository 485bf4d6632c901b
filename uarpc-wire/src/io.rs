//! Binary input and output primitives.
//!
//! All multi-byte values are little-endian. Strings and byte strings are
//! `Int32` length-prefixed; length -1 encodes the null value.
//!
//! Encoding is written against the [`Output`] trait so the same code drives
//! three sinks: [`Writer`] produces real bytes, [`Counter`] runs the
//! length-only pass, and [`Limited`] enforces a hard byte ceiling. The
//! counter must report exactly the byte count the writer produces; a
//! divergence is a programming error, not a runtime condition.

use crate::context::EncodingLimits;
use crate::error::WireError;
use bytes::{BufMut, BytesMut};

/// Byte sink for the encoder.
pub trait Output {
    /// Appends raw bytes to the sink.
    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), WireError>;

    fn put_u8(&mut self, v: u8) -> Result<(), WireError> {
        self.put_slice(&[v])
    }

    fn put_i8(&mut self, v: i8) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_u16(&mut self, v: u16) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_i16(&mut self, v: i16) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_i32(&mut self, v: i32) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_u64(&mut self, v: u64) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_i64(&mut self, v: i64) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_f32(&mut self, v: f32) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_f64(&mut self, v: f64) -> Result<(), WireError> {
        self.put_slice(&v.to_le_bytes())
    }
}

/// Output writing into a `BytesMut`.
pub struct Writer<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }
}

impl Output for Writer<'_> {
    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.buf.put_slice(bytes);
        Ok(())
    }
}

/// Output that only counts bytes.
///
/// Running an encode against a `Counter` yields the exact size the same
/// encode produces against a [`Writer`].
#[derive(Debug, Default)]
pub struct Counter {
    count: usize,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes counted so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Runs `f` against a fresh counter and returns the byte count.
    pub fn measure<F>(f: F) -> Result<usize, WireError>
    where
        F: FnOnce(&mut Counter) -> Result<(), WireError>,
    {
        let mut counter = Counter::new();
        f(&mut counter)?;
        Ok(counter.count)
    }
}

impl Output for Counter {
    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.count += bytes.len();
        Ok(())
    }
}

/// Output wrapper enforcing a hard byte ceiling.
///
/// Fails with [`WireError::MessageTooLarge`] on the write that would exceed
/// the limit; the inner sink never receives bytes beyond it.
pub struct Limited<'a> {
    inner: &'a mut dyn Output,
    written: usize,
    max: usize,
}

impl<'a> Limited<'a> {
    pub fn new(inner: &'a mut dyn Output, max: usize) -> Self {
        Self {
            inner,
            written: 0,
            max,
        }
    }

    /// Returns the number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Output for Limited<'_> {
    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if self.written + bytes.len() > self.max {
            return Err(WireError::MessageTooLarge {
                size: self.written + bytes.len(),
                max: self.max,
            });
        }
        self.inner.put_slice(bytes)?;
        self.written += bytes.len();
        Ok(())
    }
}

/// Writes an optional string as an `Int32` length prefix plus UTF-8 bytes.
pub fn write_opt_string(
    out: &mut dyn Output,
    limits: &EncodingLimits,
    value: Option<&str>,
) -> Result<(), WireError> {
    match value {
        None => out.put_i32(-1),
        Some(s) => {
            if s.len() > limits.max_string_length {
                return Err(WireError::LimitExceeded {
                    what: "string",
                    len: s.len(),
                    max: limits.max_string_length,
                });
            }
            out.put_i32(s.len() as i32)?;
            out.put_slice(s.as_bytes())
        }
    }
}

/// Writes an optional byte string as an `Int32` length prefix plus bytes.
pub fn write_opt_bytes(
    out: &mut dyn Output,
    limits: &EncodingLimits,
    value: Option<&[u8]>,
) -> Result<(), WireError> {
    match value {
        None => out.put_i32(-1),
        Some(b) => {
            if b.len() > limits.max_byte_string_length {
                return Err(WireError::LimitExceeded {
                    what: "byte string",
                    len: b.len(),
                    max: limits.max_byte_string_length,
                });
            }
            out.put_i32(b.len() as i32)?;
            out.put_slice(b)
        }
    }
}

/// Binary reader over a byte slice.
///
/// Tracks position, enforces the configured limits before allocating, and
/// counts nesting depth so maliciously deep structures fail with a decoding
/// error instead of exhausting the stack.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    limits: EncodingLimits,
    depth: u32,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], limits: EncodingLimits) -> Self {
        Self {
            buf,
            pos: 0,
            limits,
            depth: 0,
        }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns whether the reader is exhausted.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the limits this reader enforces.
    pub fn limits(&self) -> &EncodingLimits {
        &self.limits
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::EndOfStream {
                what,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consumes and returns all unread bytes.
    pub fn take_remaining(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn i8(&mut self) -> Result<i8, WireError> {
        Ok(self.take(1, "i8")?[0] as i8)
    }

    pub fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16, WireError> {
        let b = self.take(2, "i16")?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4, "i32")?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8, "u64")?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn i64(&mut self) -> Result<i64, WireError> {
        let b = self.take(8, "i64")?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    pub fn f32(&mut self) -> Result<f32, WireError> {
        let b = self.take(4, "f32")?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f64(&mut self) -> Result<f64, WireError> {
        let b = self.take(8, "f64")?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }

    /// Reads an `Int32` element count for an array.
    ///
    /// Returns `None` for the null array (-1). The claimed count is checked
    /// against `max_array_length` and the bytes actually available before
    /// any allocation happens, so a transmission bomb is rejected up front.
    pub fn array_len(&mut self, what: &'static str) -> Result<Option<usize>, WireError> {
        let len = self.i32()?;
        if len < 0 {
            if len == -1 {
                return Ok(None);
            }
            return Err(WireError::NegativeLength { what, len });
        }
        let len = len as usize;
        if len > self.limits.max_array_length {
            return Err(WireError::LimitExceeded {
                what,
                len,
                max: self.limits.max_array_length,
            });
        }
        // Every element occupies at least one byte on the wire.
        if len > self.remaining() {
            return Err(WireError::EndOfStream {
                what,
                needed: len - self.remaining(),
            });
        }
        Ok(Some(len))
    }

    fn length_prefixed(
        &mut self,
        what: &'static str,
        max: usize,
    ) -> Result<Option<&'a [u8]>, WireError> {
        let len = self.i32()?;
        if len < 0 {
            if len == -1 {
                return Ok(None);
            }
            return Err(WireError::NegativeLength { what, len });
        }
        let len = len as usize;
        if len > max {
            return Err(WireError::LimitExceeded { what, len, max });
        }
        Ok(Some(self.take(len, what)?))
    }

    /// Reads an optional string (length -1 is null).
    pub fn opt_string(&mut self) -> Result<Option<String>, WireError> {
        match self.length_prefixed("string", self.limits.max_string_length)? {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(bytes)
                .map(|s| Some(s.to_string()))
                .map_err(|_| WireError::InvalidUtf8),
        }
    }

    /// Reads an optional byte string (length -1 is null).
    pub fn opt_byte_string(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        Ok(self
            .length_prefixed("byte string", self.limits.max_byte_string_length)?
            .map(<[u8]>::to_vec))
    }

    /// Enters a nested structure, failing when the depth limit is hit.
    pub fn enter(&mut self) -> Result<(), WireError> {
        if self.depth >= self.limits.max_decoding_depth {
            return Err(WireError::DepthExceeded {
                max: self.limits.max_decoding_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Leaves a nested structure.
    pub fn exit(&mut self) {
        debug_assert!(self.depth > 0);
        self.depth = self.depth.saturating_sub(1);
    }
}
