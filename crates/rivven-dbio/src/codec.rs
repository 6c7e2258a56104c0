//! Binary codecs for transported records
//!
//! A codec writes a value into a `BytesMut` and reads it back from `Bytes`.
//! Every call carries a [`Context`]:
//! - `Nested`: other data may follow, so the encoding must be self-delimiting
//! - `Outer`: the value runs to the end of the buffer and may skip its length
//!
//! Decoding consumes exactly the bytes the matching encode produced. Truncated
//! or malformed input is a [`Error::Decode`], never a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use crate::error::{Error, Result};

/// Encoding context of a value within its enclosing buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// More data may follow; the encoding must be self-delimiting
    Nested,
    /// The value extends to the end of the buffer
    Outer,
}

/// Encoder/decoder for values of type `T`
pub trait Codec<T>: Send + Sync {
    /// Append the encoding of `value` to `buf`
    fn encode(&self, value: &T, buf: &mut BytesMut, context: Context) -> Result<()>;

    /// Read one value from the front of `buf`, advancing past it
    fn decode(&self, buf: &mut Bytes, context: Context) -> Result<T>;

    /// Name used in display data
    fn name(&self) -> String {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("codec")
            .to_string()
    }
}

impl<T, C: Codec<T> + ?Sized> Codec<T> for std::sync::Arc<C> {
    fn encode(&self, value: &T, buf: &mut BytesMut, context: Context) -> Result<()> {
        (**self).encode(value, buf, context)
    }

    fn decode(&self, buf: &mut Bytes, context: Context) -> Result<T> {
        (**self).decode(buf, context)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Encode a standalone value (outer context)
pub fn encode_to_bytes<T, C: Codec<T> + ?Sized>(codec: &C, value: &T) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    codec.encode(value, &mut buf, Context::Outer)?;
    Ok(buf.freeze())
}

/// Decode a standalone value (outer context); trailing bytes are an error
pub fn decode_from_bytes<T, C: Codec<T> + ?Sized>(codec: &C, bytes: Bytes) -> Result<T> {
    let mut buf = bytes;
    let value = codec.decode(&mut buf, Context::Outer)?;
    if buf.has_remaining() {
        return Err(Error::decode(format!(
            "{} trailing bytes after value",
            buf.remaining()
        )));
    }
    Ok(value)
}

/// Write an unsigned LEB128 varint
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned LEB128 varint
pub fn get_varint(buf: &mut Bytes) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(Error::decode("truncated varint"));
        }
        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(Error::decode("varint overflows u64"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::decode("varint overflows u64"))
}

fn take(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    if buf.remaining() < len {
        return Err(Error::decode(format!(
            "need {} bytes, only {} remaining",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

fn put_framed(buf: &mut BytesMut, bytes: &[u8], context: Context) {
    if context == Context::Nested {
        put_varint(buf, bytes.len() as u64);
    }
    buf.put_slice(bytes);
}

fn get_framed(buf: &mut Bytes, context: Context) -> Result<Bytes> {
    match context {
        Context::Nested => {
            let len = get_varint(buf)?;
            let len = usize::try_from(len)
                .map_err(|_| Error::decode(format!("length {} does not fit in memory", len)))?;
            take(buf, len)
        }
        Context::Outer => Ok(buf.split_to(buf.len())),
    }
}

/// Fixed-width big-endian `i64`; self-delimiting in every context
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl Codec<i64> for I64Codec {
    fn encode(&self, value: &i64, buf: &mut BytesMut, _context: Context) -> Result<()> {
        buf.put_i64(*value);
        Ok(())
    }

    fn decode(&self, buf: &mut Bytes, _context: Context) -> Result<i64> {
        Ok(take(buf, 8)?.get_i64())
    }
}

/// Variable-length `u64` (LEB128); self-delimiting in every context
#[derive(Debug, Clone, Copy, Default)]
pub struct VarU64Codec;

impl Codec<u64> for VarU64Codec {
    fn encode(&self, value: &u64, buf: &mut BytesMut, _context: Context) -> Result<()> {
        put_varint(buf, *value);
        Ok(())
    }

    fn decode(&self, buf: &mut Bytes, _context: Context) -> Result<u64> {
        get_varint(buf)
    }
}

/// UTF-8 string, length-prefixed when nested
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, value: &String, buf: &mut BytesMut, context: Context) -> Result<()> {
        put_framed(buf, value.as_bytes(), context);
        Ok(())
    }

    fn decode(&self, buf: &mut Bytes, context: Context) -> Result<String> {
        let bytes = get_framed(buf, context)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::decode(format!("invalid UTF-8: {}", e)))
    }
}

/// Raw bytes, length-prefixed when nested
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Bytes> for BytesCodec {
    fn encode(&self, value: &Bytes, buf: &mut BytesMut, context: Context) -> Result<()> {
        put_framed(buf, value, context);
        Ok(())
    }

    fn decode(&self, buf: &mut Bytes, context: Context) -> Result<Bytes> {
        get_framed(buf, context)
    }
}

/// Any serde type as JSON, length-prefixed when nested
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a JSON codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn encode(&self, value: &T, buf: &mut BytesMut, context: Context) -> Result<()> {
        let json = serde_json::to_vec(value).map_err(|e| Error::encode(e.to_string()))?;
        put_framed(buf, &json, context);
        Ok(())
    }

    fn decode(&self, buf: &mut Bytes, context: Context) -> Result<T> {
        let bytes = get_framed(buf, context)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::decode(e.to_string()))
    }

    fn name(&self) -> String {
        "JsonCodec".to_string()
    }
}
