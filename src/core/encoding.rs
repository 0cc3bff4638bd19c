//! Versioned little-endian binary encoding
//!
//! Every persistent structure is written inside a versioned envelope:
//!
//! ```text
//! [struct_v: u8][compat_v: u8][body_len: u32 LE][body ...]
//! ```
//!
//! - `struct_v` is the version of the encoder that produced the body
//! - `compat_v` is the oldest decoder version able to read it
//!
//! A decoder accepts any body whose `compat_v` is not newer than its own
//! version. Fields appended by newer encoders are skipped using `body_len`.

use crate::error::{MetaError, Result};

/// Append-only byte sink for encoding.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Encoder {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append bytes verbatim, without a length prefix
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a `u32` length prefix followed by the bytes
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// Append a `u32` item count followed by each encoded item
    pub fn put_seq<T: Encode>(&mut self, items: &[T]) {
        self.put_u32(items.len() as u32);
        for item in items {
            item.encode(self);
        }
    }

    /// Write a versioned envelope around the fields emitted by `body`
    pub fn versioned<F>(&mut self, struct_v: u8, compat_v: u8, body: F)
    where
        F: FnOnce(&mut Encoder),
    {
        self.put_u8(struct_v);
        self.put_u8(compat_v);

        let len_pos = self.buf.len();
        self.put_u32(0);

        body(self);

        let body_len = (self.buf.len() - len_pos - 4) as u32;
        self.buf[len_pos..len_pos + 4].copy_from_slice(&body_len.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked cursor over an encoded buffer.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(MetaError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Advance past `n` bytes without interpreting them
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| MetaError::InvalidData(format!("string is not valid UTF-8: {}", e)))
    }

    /// Read a `u32` item count, rejecting counts that cannot fit in the rest
    /// of the buffer at `min_item_size` bytes per item.
    pub fn get_count(&mut self, min_item_size: usize) -> Result<usize> {
        let count = self.get_u32()? as usize;
        let needed = count.saturating_mul(min_item_size.max(1));
        if needed > self.remaining() {
            return Err(MetaError::UnexpectedEof {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }

    pub fn get_seq<T: Decode>(&mut self) -> Result<Vec<T>> {
        let count = self.get_count(1)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Read a versioned envelope and decode its body with `body`.
    ///
    /// `body` receives a decoder limited to the envelope and the encoder's
    /// `struct_v`. Trailing bytes it leaves unread are skipped.
    pub fn versioned<T, F>(&mut self, supported: u8, body: F) -> Result<T>
    where
        F: FnOnce(&mut Decoder<'a>, u8) -> Result<T>,
    {
        let struct_v = self.get_u8()?;
        let compat_v = self.get_u8()?;
        if compat_v > supported {
            return Err(MetaError::UnsupportedVersion {
                struct_v,
                compat_v,
                supported,
            });
        }

        let body_len = self.get_u32()? as usize;
        let mut inner = Decoder::new(self.take(body_len)?);
        body(&mut inner, struct_v)
    }
}

/// Types with a stable binary encoding.
pub trait Encode {
    fn encode(&self, enc: &mut Encoder);

    fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }
}

/// Types that can be rebuilt from their binary encoding.
pub trait Decode: Sized {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self>;

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::decode(&mut Decoder::new(bytes))
    }
}
