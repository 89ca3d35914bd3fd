//! User-supplied key/value serializers: the "byte-array codec" collaborator
//! named as external to the core in §1. A [`Codec`] turns a typed value into
//! the bytes a [`crate::btree`] page stores and back; the engine never
//! inspects the encoding, only its length.

use crate::{Error, Result};

/// Encodes and decodes one typed value to and from its on-disk byte
/// representation. Implementations must round-trip exactly: `decode(&encode(&v))
/// == v` for every `v`, since a key's ordering is defined by `Self::Item: Ord`
/// on the *decoded* value, not on its bytes.
pub trait Codec: Send + Sync + 'static {
    type Item: Clone;

    /// A short, stable name persisted in a tree's `BTreeInfo` record so a
    /// reopened file can at least sanity-check that the caller is using the
    /// codec the tree was created with (§3 "key-serializer identifier").
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Self::Item) -> Vec<u8>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Item>;
}

/// Identity codec over raw byte blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Vec<u8>;

    fn name(&self) -> &'static str {
        "bytes"
    }

    fn encode(&self, value: &Vec<u8>) -> Vec<u8> {
        value.clone()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 string codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Item = String;

    fn name(&self) -> &'static str {
        "string"
    }

    fn encode(&self, value: &String) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Codec(e.to_string()))
    }
}

/// Big-endian `u64` codec, chosen (rather than native-endian) so keys sort
/// the same as their byte representation, matching how the page model
/// compares the raw key bytes it holds before a key holder ever decodes them.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Codec;

impl Codec for U64Codec {
    type Item = u64;

    fn name(&self) -> &'static str {
        "u64-be"
    }

    fn encode(&self, value: &u64) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<u64> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Codec(format!("expected 8 bytes for u64, got {}", bytes.len())))?;
        Ok(u64::from_be_bytes(arr))
    }
}

/// Zero-byte codec for `()`, used as the value codec of the nested
/// duplicate-values sub-tree (§3 "Duplicate handling": "whose values are
/// empty"). The sub-tree's keys are the duplicate values themselves,
/// encoded with the owning tree's value codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitCodec;

impl Codec for UnitCodec {
    type Item = ();

    fn name(&self) -> &'static str {
        "unit"
    }

    fn encode(&self, _value: &()) -> Vec<u8> {
        Vec::new()
    }

    fn decode(&self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Generic codec for any `serde`-compatible type, using `bincode`'s compact
/// binary wire format. This is the escape hatch for tree value types the
/// built-in codecs don't cover.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec<T>(std::marker::PhantomData<T>);

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl<T> Codec for BincodeCodec<T>
where
    T: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    type Item = T;

    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode(&self, value: &T) -> Vec<u8> {
        bincode::serialize(value).expect("bincode serialization is infallible for owned values")
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_codec_round_trips() {
        let c = BytesCodec;
        let v = vec![1u8, 2, 3];
        assert_eq!(c.decode(&c.encode(&v)).unwrap(), v);
    }

    #[test]
    fn string_codec_round_trips() {
        let c = StringCodec;
        let v = "hello world".to_string();
        assert_eq!(c.decode(&c.encode(&v)).unwrap(), v);
    }

    #[test]
    fn u64_codec_preserves_byte_order() {
        let c = U64Codec;
        let mut encoded: Vec<_> = [1u64, 2, 256, 65536].iter().map(|v| c.encode(v)).collect();
        let sorted = {
            let mut s = encoded.clone();
            s.sort();
            s
        };
        encoded.sort();
        assert_eq!(encoded, sorted);
        assert_eq!(c.decode(&c.encode(&65536)).unwrap(), 65536);
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn bincode_codec_round_trips_struct() {
        let c: BincodeCodec<Point> = BincodeCodec::new();
        let p = Point { x: 3, y: -4 };
        assert_eq!(c.decode(&c.encode(&p)).unwrap(), p);
    }
}
