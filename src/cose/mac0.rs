use ciborium::Value;
use serde::{Deserialize, Serialize};

use super::{HeaderMap, ProtectedHeader};
use crate::cbor;

/// An untagged `COSE_Mac0`: `[protected, unprotected, payload, tag]`.
///
/// Only the shape is supported: MAC based device authentication is decoded but never produced
/// or verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct CoseMac0 {
    pub protected: ProtectedHeader,
    pub unprotected: HeaderMap,
    pub payload: Option<Vec<u8>>,
    pub tag: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid COSE_Mac0: {0}")]
pub struct Error(String);

impl From<CoseMac0> for Value {
    fn from(cose: CoseMac0) -> Value {
        Value::Array(vec![
            Value::Bytes(cose.protected.as_bytes().to_vec()),
            cose.unprotected.to_value(),
            cose.payload.map(Value::Bytes).unwrap_or(Value::Null),
            Value::Bytes(cose.tag),
        ])
    }
}

impl TryFrom<Value> for CoseMac0 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Error> {
        let [protected, unprotected, payload, tag]: [Value; 4] = match value {
            Value::Array(items) => items
                .try_into()
                .map_err(|_| Error("expected a 4 element array".into()))?,
            other => return Err(Error(format!("expected an array, found {}", cbor::type_name(&other)))),
        };
        let protected = match protected {
            Value::Bytes(bytes) => {
                ProtectedHeader::from_bytes(bytes).map_err(|e| Error(e.to_string()))?
            }
            _ => return Err(Error("protected header must be a bstr".into())),
        };
        let unprotected = HeaderMap::from_value(unprotected).map_err(|e| Error(e.to_string()))?;
        let payload = match payload {
            Value::Bytes(bytes) => Some(bytes),
            Value::Null => None,
            _ => return Err(Error("payload must be a bstr or nil".into())),
        };
        let tag = match tag {
            Value::Bytes(bytes) => bytes,
            _ => return Err(Error("tag must be a bstr".into())),
        };
        Ok(CoseMac0 {
            protected,
            unprotected,
            payload,
            tag,
        })
    }
}
