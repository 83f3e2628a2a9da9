use std::fmt::Debug;

use crate::types::{ArborError, Result};

const SIGN_BIT: u64 = 1 << 63;

/// Key types that can live in a page cell.
///
/// Every key of a type encodes to exactly [`KeyCodec::ENCODED_LEN`] bytes, which
/// keeps the cell shape fixed for the whole tree.
pub trait KeyCodec: Ord + Clone + Debug {
    /// Width of an encoded key.
    const ENCODED_LEN: usize;

    /// Append the order-preserving encoding of `key` to `out`.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Decode a key from exactly `ENCODED_LEN` bytes.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Value types stored in leaf cells.
pub trait ValCodec: Clone {
    /// Width of an encoded value.
    const ENCODED_LEN: usize;

    /// Append the encoding of `value` to `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decode a value from exactly `ENCODED_LEN` bytes.
    fn decode_val(src: &[u8]) -> Result<Self>;
}

fn fixed<const N: usize>(src: &[u8], what: &'static str) -> Result<[u8; N]> {
    src.try_into().map_err(|_| ArborError::Corruption(what))
}

impl KeyCodec for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(fixed(bytes, "u64 key length mismatch")?))
    }
}

impl ValCodec for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(fixed(src, "u64 value length mismatch")?))
    }
}

impl KeyCodec for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(u32::from_be_bytes(fixed(bytes, "u32 key length mismatch")?))
    }
}

impl ValCodec for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(u32::from_be_bytes(fixed(src, "u32 value length mismatch")?))
    }
}

// Signed keys flip the sign bit so big-endian bytes sort like the integers.
impl KeyCodec for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&((*key as u64) ^ SIGN_BIT).to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let raw = u64::from_be_bytes(fixed(bytes, "i64 key length mismatch")?);
        Ok((raw ^ SIGN_BIT) as i64)
    }
}

impl ValCodec for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(i64::from_be_bytes(fixed(src, "i64 value length mismatch")?))
    }
}

impl<const N: usize> KeyCodec for [u8; N] {
    const ENCODED_LEN: usize = N;

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        fixed(bytes, "byte-array key length mismatch")
    }
}

impl<const N: usize> ValCodec for [u8; N] {
    const ENCODED_LEN: usize = N;

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        fixed(src, "byte-array value length mismatch")
    }
}
