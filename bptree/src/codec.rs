//! Key and value codecs.
//!
//! A codec turns a typed item into bytes and back. The tree never looks at
//! typed keys or values directly; it only stores and compares encoded bytes.
//!
//! # Ordering
//!
//! Keys are ordered by the byte-lexicographic order of their encoding.
//! Codecs that implement `KeyCodec` promise that this order matches the
//! natural order of the decoded items:
//!
//! - unsigned integers: big-endian
//! - signed integers: big-endian with the sign bit flipped
//! - `f64`: IEEE 754 total order (sign bit flipped for positives, all bits
//!   flipped for negatives)
//! - strings and byte strings: the raw bytes
//!
//! # Framing
//!
//! Codec output is the bare payload. Containers (leaf entries, value-store
//! records) record the length of variable-size encodings themselves.

use std::marker::PhantomData;

/// Converts items to and from their byte representation.
pub trait Codec {
    /// The decoded item type.
    type Item;

    /// Append the encoding of `item` to `out`.
    fn encode(&self, item: &Self::Item, out: &mut Vec<u8>);

    /// Decode an item from exactly the bytes produced by `encode`.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Item, CodecError>;

    /// Constant encoded width, for fixed-size codecs.
    ///
    /// Every encoding produced by a fixed-size codec has exactly this length.
    fn fixed_size(&self) -> Option<usize> {
        None
    }

    /// Encode into a fresh buffer.
    fn encode_to_vec(&self, item: &Self::Item) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.fixed_size().unwrap_or(16));
        self.encode(item, &mut out);
        out
    }
}

/// Marker for codecs whose encoded byte order equals the item order.
///
/// Only these codecs may be used for tree keys.
pub trait KeyCodec: Codec {}

/// Error returned when bytes do not decode to a valid item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Encoded length does not match the codec's fixed width.
    WrongLength { expected: usize, actual: usize },
    /// Bytes are not valid UTF-8.
    InvalidUtf8(std::str::Utf8Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongLength { expected, actual } => {
                write!(f, "corrupt data: expected {expected} bytes, got {actual}")
            }
            Self::InvalidUtf8(e) => write!(f, "corrupt data: invalid UTF-8: {e}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidUtf8(e) => Some(e),
            Self::WrongLength { .. } => None,
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::WrongLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// `u32` keys or values, 4 bytes big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Codec;

impl Codec for U32Codec {
    type Item = u32;

    fn encode(&self, item: &u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&item.to_be_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(fixed(bytes)?))
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(4)
    }
}

impl KeyCodec for U32Codec {}

/// `u64` keys or values, 8 bytes big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Codec;

impl Codec for U64Codec {
    type Item = u64;

    fn encode(&self, item: &u64, out: &mut Vec<u8>) {
        out.extend_from_slice(&item.to_be_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(fixed(bytes)?))
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(8)
    }
}

impl KeyCodec for U64Codec {}

/// `i32` keys or values, 4 bytes big-endian with the sign bit flipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct I32Codec;

impl Codec for I32Codec {
    type Item = i32;

    fn encode(&self, item: &i32, out: &mut Vec<u8>) {
        #[allow(clippy::cast_sign_loss)]
        let biased = (*item as u32) ^ (1 << 31);
        out.extend_from_slice(&biased.to_be_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<i32, CodecError> {
        let biased = u32::from_be_bytes(fixed(bytes)?);
        #[allow(clippy::cast_possible_wrap)]
        Ok((biased ^ (1 << 31)) as i32)
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(4)
    }
}

impl KeyCodec for I32Codec {}

/// `i64` keys or values, 8 bytes big-endian with the sign bit flipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl Codec for I64Codec {
    type Item = i64;

    fn encode(&self, item: &i64, out: &mut Vec<u8>) {
        #[allow(clippy::cast_sign_loss)]
        let biased = (*item as u64) ^ (1 << 63);
        out.extend_from_slice(&biased.to_be_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<i64, CodecError> {
        let biased = u64::from_be_bytes(fixed(bytes)?);
        #[allow(clippy::cast_possible_wrap)]
        Ok((biased ^ (1 << 63)) as i64)
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(8)
    }
}

impl KeyCodec for I64Codec {}

/// `f64` keys or values (e.g. cached distances), 8 bytes in total order.
///
/// `-0.0` sorts before `0.0` and NaNs sort at the ends, following
/// `f64::total_cmp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct F64Codec;

impl Codec for F64Codec {
    type Item = f64;

    fn encode(&self, item: &f64, out: &mut Vec<u8>) {
        let bits = item.to_bits();
        let ordered = if bits >> 63 == 0 {
            bits ^ (1 << 63)
        } else {
            !bits
        };
        out.extend_from_slice(&ordered.to_be_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<f64, CodecError> {
        let ordered = u64::from_be_bytes(fixed(bytes)?);
        let bits = if ordered >> 63 == 1 {
            ordered ^ (1 << 63)
        } else {
            !ordered
        };
        Ok(f64::from_bits(bits))
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(8)
    }
}

impl KeyCodec for F64Codec {}

/// UTF-8 strings, variable size.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Item = String;

    fn encode(&self, item: &String, out: &mut Vec<u8>) {
        out.extend_from_slice(item.as_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(CodecError::InvalidUtf8)
    }
}

impl KeyCodec for StringCodec {}

/// Raw byte strings, variable size.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Vec<u8>;

    fn encode(&self, item: &Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(item);
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

impl KeyCodec for BytesCodec {}

/// Fixed-width byte arrays, e.g. hashes or packed identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayCodec<const N: usize>(PhantomData<[u8; N]>);

impl<const N: usize> ArrayCodec<N> {
    /// Create a codec for `[u8; N]` items.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<const N: usize> Codec for ArrayCodec<N> {
    type Item = [u8; N];

    fn encode(&self, item: &[u8; N], out: &mut Vec<u8>) {
        out.extend_from_slice(item);
    }

    fn decode(&self, bytes: &[u8]) -> Result<[u8; N], CodecError> {
        fixed(bytes)
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(N)
    }
}

impl<const N: usize> KeyCodec for ArrayCodec<N> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_order_preserved<C: KeyCodec>(codec: &C, sorted: &[C::Item])
    where
        C::Item: std::fmt::Debug + PartialEq,
    {
        let encoded: Vec<Vec<u8>> = sorted.iter().map(|i| codec.encode_to_vec(i)).collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1], "encoding must preserve order");
        }
        for (item, bytes) in sorted.iter().zip(&encoded) {
            if let Some(width) = codec.fixed_size() {
                assert_eq!(bytes.len(), width);
            }
            assert_eq!(&codec.decode(bytes).expect("decode"), item);
        }
    }

    #[test]
    fn test_unsigned_order() {
        assert_order_preserved(&U32Codec, &[0, 1, 255, 256, 70_000, u32::MAX]);
        assert_order_preserved(&U64Codec, &[0, 1, 1 << 40, u64::MAX]);
    }

    #[test]
    fn test_signed_order() {
        assert_order_preserved(&I32Codec, &[i32::MIN, -1000, -1, 0, 1, 999, i32::MAX]);
        assert_order_preserved(&I64Codec, &[i64::MIN, -5, 0, 5, i64::MAX]);
    }

    #[test]
    fn test_float_order() {
        assert_order_preserved(
            &F64Codec,
            &[f64::NEG_INFINITY, -1.5, -0.0, 0.0, 1e-300, 2.25, f64::INFINITY],
        );
    }

    #[test]
    fn test_string_order() {
        let items: Vec<String> = ["", "a", "ab", "b", "ba", "\u{e9}"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        assert_order_preserved(&StringCodec, &items);
        assert_eq!(StringCodec.fixed_size(), None);
    }

    #[test]
    fn test_array_codec() {
        let codec = ArrayCodec::<3>::new();
        assert_order_preserved(&codec, &[[0, 0, 1], [0, 1, 0], [9, 9, 9]]);
    }

    #[test]
    fn test_wrong_length_is_corrupt() {
        assert_eq!(
            U32Codec.decode(&[1, 2, 3]),
            Err(CodecError::WrongLength {
                expected: 4,
                actual: 3
            })
        );
        assert!(I64Codec.decode(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let result = StringCodec.decode(&[0xFF, 0xFE]);
        assert!(matches!(result, Err(CodecError::InvalidUtf8(_))));
        assert!(result
            .err()
            .is_some_and(|e| e.to_string().starts_with("corrupt data")));
    }

    #[test]
    fn test_bytes_codec_roundtrip() {
        let value = vec![0u8, 1, 2, 255];
        let encoded = BytesCodec.encode_to_vec(&value);
        assert_eq!(BytesCodec.decode(&encoded).expect("decode"), value);
    }
}
