//! Support for embedded
//! [CBOR Data Items](https://www.ietf.org/rfc/rfc8949.html#name-encoded-cbor-data-item),
//! also known as a tagged data item with tag number 24.
//!
//! Digests and signatures in ISO 18013-5 are computed over the exact bytes of these items, so a
//! [Tag24] keeps the encoded form next to the decoded value and never re-encodes the value.

use std::ops::Range;

use ciborium::Value;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::cbor::{self, CborError};

/// Tag number of an encoded CBOR data item.
pub const TAG_ENCODED_CBOR: u64 = 24;

/// A value encoded as `#6.24(bstr .cbor T)`.
///
/// Holds the tagged encoding and the range of the untagged payload within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag24<T> {
    inner: T,
    tagged: Vec<u8>,
    untagged: Range<usize>,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tagged bytes are empty")]
    EmptyTagged,
    #[error("untagged bytes are empty")]
    EmptyUntagged,
    #[error("expected a CBOR byte string tagged with 24, received: {0}")]
    WrongTag(&'static str),
    #[error("indefinite length byte strings cannot be embedded")]
    IndefiniteLength,
    #[error("unable to encode value as CBOR: {0}")]
    UnableToEncode(CborError),
    #[error("unable to decode bytes to inner type: {0}")]
    UnableToDecode(CborError),
}

impl<T> Tag24<T> {
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The full `#6.24(bstr)` encoding. This is what digests and signatures cover.
    pub fn tagged_bytes(&self) -> &[u8] {
        &self.tagged
    }

    /// The embedded CBOR item without the tag and byte string header.
    pub fn untagged_bytes(&self) -> &[u8] {
        &self.tagged[self.untagged.clone()]
    }
}

impl<T: Serialize> Tag24<T> {
    /// Encode `inner` and wrap it.
    pub fn new(inner: T) -> Result<Tag24<T>> {
        let untagged = cbor::to_vec(&inner).map_err(Error::UnableToEncode)?;
        let (tagged, range) = wrap(untagged)?;
        Ok(Self {
            inner,
            tagged,
            untagged: range,
        })
    }
}

impl<T: de::DeserializeOwned> Tag24<T> {
    /// Build from the bytes of an embedded item, prepending `0xd8 0x18` and a bstr header.
    pub fn from_untagged(untagged: Vec<u8>) -> Result<Tag24<T>> {
        if untagged.is_empty() {
            return Err(Error::EmptyUntagged);
        }
        let inner = cbor::from_slice(&untagged).map_err(Error::UnableToDecode)?;
        let (tagged, range) = wrap(untagged)?;
        Ok(Self {
            inner,
            tagged,
            untagged: range,
        })
    }

    /// Parse a complete `#6.24(bstr)` encoding, keeping the received bytes verbatim.
    pub fn from_tagged(tagged: Vec<u8>) -> Result<Tag24<T>> {
        if tagged.is_empty() {
            return Err(Error::EmptyTagged);
        }
        let untagged = match cbor::from_slice::<Value>(&tagged).map_err(Error::UnableToDecode)? {
            Value::Tag(TAG_ENCODED_CBOR, content) => match *content {
                Value::Bytes(bytes) => bytes,
                other => return Err(Error::WrongTag(cbor::type_name(&other))),
            },
            other => return Err(Error::WrongTag(cbor::type_name(&other))),
        };
        if untagged.is_empty() {
            return Err(Error::EmptyUntagged);
        }
        if !tagged.ends_with(&untagged) {
            return Err(Error::IndefiniteLength);
        }
        let inner = cbor::from_slice(&untagged).map_err(Error::UnableToDecode)?;
        let start = tagged.len() - untagged.len();
        let end = tagged.len();
        Ok(Self {
            inner,
            tagged,
            untagged: start..end,
        })
    }
}

fn wrap(untagged: Vec<u8>) -> Result<(Vec<u8>, Range<usize>)> {
    let len = untagged.len();
    let tagged = cbor::to_vec(&Value::Tag(
        TAG_ENCODED_CBOR,
        Box::new(Value::Bytes(untagged)),
    ))
    .map_err(Error::UnableToEncode)?;
    let start = tagged.len() - len;
    let end = tagged.len();
    Ok((tagged, start..end))
}

impl<T: de::DeserializeOwned> TryFrom<Value> for Tag24<T> {
    type Error = Error;

    fn try_from(v: Value) -> Result<Tag24<T>> {
        match v {
            Value::Tag(TAG_ENCODED_CBOR, inner_value) => match *inner_value {
                Value::Bytes(inner_bytes) => Tag24::from_untagged(inner_bytes),
                other => Err(Error::WrongTag(cbor::type_name(&other))),
            },
            other => Err(Error::WrongTag(cbor::type_name(&other))),
        }
    }
}

impl<T> From<Tag24<T>> for Value {
    fn from(tag: Tag24<T>) -> Value {
        Value::Tag(
            TAG_ENCODED_CBOR,
            Box::new(Value::Bytes(tag.untagged_bytes().to_vec())),
        )
    }
}

impl<T> AsRef<T> for Tag24<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T> Serialize for Tag24<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Value::Tag(
            TAG_ENCODED_CBOR,
            Box::new(Value::Bytes(self.untagged_bytes().to_vec())),
        )
        .serialize(serializer)
    }
}

impl<'de, T: de::DeserializeOwned> Deserialize<'de> for Tag24<T> {
    fn deserialize<D>(d: D) -> std::result::Result<Tag24<T>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(d)?
            .try_into()
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;
    use std::collections::BTreeMap;

    #[test]
    fn tagged_bytes_start_with_tag_header() {
        let tagged = Tag24::new("some data".to_string()).unwrap();
        assert_eq!(&tagged.tagged_bytes()[..2], &[0xd8, 0x18]);
        assert_eq!(
            tagged.untagged_bytes(),
            cbor::to_vec(&"some data".to_string()).unwrap()
        );
    }

    #[test]
    fn untagged_bytes_are_kept_verbatim() {
        // Map with keys in non-canonical order: re-encoding would reorder them.
        let untagged = hex!("a2 02 00 01 00").to_vec();
        let tagged = Tag24::<BTreeMap<u8, u8>>::from_untagged(untagged.clone()).unwrap();
        assert_eq!(tagged.untagged_bytes(), untagged.as_slice());
        assert_eq!(tagged.tagged_bytes(), hex!("d8 18 45 a2 02 00 01 00").as_slice());

        let embedded = cbor::to_vec(&vec![tagged]).unwrap();
        let decoded: Vec<Tag24<BTreeMap<u8, u8>>> = cbor::from_slice(&embedded).unwrap();
        assert_eq!(decoded[0].untagged_bytes(), untagged.as_slice());
    }

    #[test]
    fn from_tagged_round_trips() {
        let bytes = hex!("d8 18 44 63 66 6f 6f").to_vec();
        let tagged = Tag24::<String>::from_tagged(bytes.clone()).unwrap();
        assert_eq!(tagged.as_ref(), "foo");
        assert_eq!(tagged.tagged_bytes(), bytes.as_slice());
        assert_eq!(tagged.untagged_bytes(), hex!("63 66 6f 6f").as_slice());
    }

    #[test]
    fn malformed_tagged_input() {
        assert!(matches!(
            Tag24::<String>::from_tagged(vec![]),
            Err(Error::EmptyTagged)
        ));
        // Tag 1 instead of 24.
        assert!(matches!(
            Tag24::<String>::from_tagged(hex!("c1 43 63 66 6f").to_vec()),
            Err(Error::WrongTag(_))
        ));
        // Not a byte string inside the tag.
        assert!(matches!(
            Tag24::<String>::from_tagged(hex!("d8 18 63 66 6f 6f").to_vec()),
            Err(Error::WrongTag("tstr"))
        ));
        assert!(matches!(
            Tag24::<String>::from_tagged(hex!("d8 18 40").to_vec()),
            Err(Error::EmptyUntagged)
        ));
    }
}
