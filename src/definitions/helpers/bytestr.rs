use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::cbor;

/// A CBOR byte string (major type 2).
///
/// `Vec<u8>` serializes as an array of integers through serde, so byte strings in protocol
/// messages go through this wrapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "Value", into = "Value")]
pub struct ByteStr(Vec<u8>);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected to parse a CBOR byte string, received: {0}")]
    NotAByteString(&'static str),
}

impl ByteStr {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for ByteStr {
    fn from(bytes: Vec<u8>) -> ByteStr {
        ByteStr(bytes)
    }
}

impl From<&[u8]> for ByteStr {
    fn from(bytes: &[u8]) -> ByteStr {
        ByteStr(bytes.to_vec())
    }
}

impl From<ByteStr> for Vec<u8> {
    fn from(ByteStr(bytes): ByteStr) -> Vec<u8> {
        bytes
    }
}

impl AsRef<[u8]> for ByteStr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<ByteStr> for Value {
    fn from(ByteStr(bytes): ByteStr) -> Value {
        Value::Bytes(bytes)
    }
}

impl TryFrom<Value> for ByteStr {
    type Error = Error;

    fn try_from(v: Value) -> Result<ByteStr> {
        match v {
            Value::Bytes(bytes) => Ok(ByteStr(bytes)),
            other => Err(Error::NotAByteString(cbor::type_name(&other))),
        }
    }
}
