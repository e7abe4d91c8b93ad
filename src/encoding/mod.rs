//! Deterministic, dependency-free binary encoding for persisted metadata.
//!
//! The region header (and nothing else) travels through this module.
//! Owning the wire format means the on-media layout can never change
//! underneath us because of a serializer upgrade.
//!
//! # Wire format
//!
//! | Rust type  | Encoding                                     |
//! |------------|----------------------------------------------|
//! | `u8`       | 1 byte                                       |
//! | `u16`      | 2 bytes, little-endian                       |
//! | `u32`      | 4 bytes, little-endian                       |
//! | `u64`      | 8 bytes, little-endian                       |
//! | `[u8; N]`  | `N` raw bytes (fixed-size, no length prefix) |
//! | `String`   | `[u16 len][utf-8 bytes]`                     |
//!
//! All multi-byte integers are **little-endian**. String lengths are
//! `u16`: header strings are engine and comparator names, never bulk
//! data, and [`MAX_STRING_LEN`] keeps a corrupt header from turning
//! into an allocation bomb.
//!
//! No function in this module panics; all failures surface as
//! [`EncodingError`].

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Maximum byte length accepted for an encoded string (engine or
/// comparator name). Anything longer is rejected on both sides.
pub const MAX_STRING_LEN: usize = 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A byte sequence decoded as a string was not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length field exceeded its safety limit.
    #[error("length overflow: {0}")]
    LengthOverflow(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
///
/// Implementations must produce deterministic output: the same logical
/// value always yields the exact same byte sequence.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` so that callers can advance a
/// cursor through a buffer containing multiple encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Convenience functions
// ------------------------------------------------------------------------------------------------

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`. Returns `(value, bytes_consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes.
#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Primitive implementations
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

impl Encode for u16 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u16 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 2)?;
        Ok((u16::from_le_bytes([buf[0], buf[1]]), 2))
    }
}

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[..4]);
        Ok((u32::from_le_bytes(bytes), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..8]);
        Ok((u64::from_le_bytes(bytes), 8))
    }
}

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        Ok((bytes, N))
    }
}

impl Encode for String {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let bytes = self.as_bytes();
        if bytes.len() > MAX_STRING_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "string of {} bytes exceeds limit of {MAX_STRING_LEN}",
                bytes.len()
            )));
        }
        // `MAX_STRING_LEN` fits in u16, so the cast cannot truncate.
        (bytes.len() as u16).encode_to(buf)?;
        buf.extend_from_slice(bytes);
        Ok(())
    }
}

impl Decode for String {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, mut offset) = u16::decode_from(buf)?;
        let len = len as usize;
        if len > MAX_STRING_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "decoded string length {len} exceeds limit of {MAX_STRING_LEN}"
            )));
        }
        require(&buf[offset..], len)?;
        let s = String::from_utf8(buf[offset..offset + len].to_vec())?;
        offset += len;
        Ok((s, offset))
    }
}
