//! Untagged `COSE_Sign1` and `COSE_Mac0` as used by ISO 18013-5.
//!
//! The structures are modelled directly instead of through a COSE library so that the exact
//! protected header bytes and the `Sig_structure` are always under this crate's control.

pub mod mac0;
pub mod sign1;

use ciborium::Value;
use coset::iana::{self, EnumI64};

use crate::cbor::{self, CborError};

pub use mac0::CoseMac0;
pub use sign1::CoseSign1;

/// Header label of the signature algorithm.
pub const ALG_HEADER_LABEL: i64 = iana::HeaderParameter::Alg as i64;
/// Header label of the X.509 certificate chain.
pub const X5CHAIN_HEADER_LABEL: i64 = 33;

/// A COSE header map, keeping the order in which entries were received or inserted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap(Vec<(Value, Value)>);

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: i64) -> Option<&Value> {
        self.0
            .iter()
            .find(|(k, _)| k.as_integer().and_then(|i| i64::try_from(i).ok()) == Some(label))
            .map(|(_, v)| v)
    }

    /// Insert or replace the entry for `label`.
    pub fn insert(&mut self, label: i64, value: Value) {
        self.0.retain(|(k, _)| {
            k.as_integer().and_then(|i| i64::try_from(i).ok()) != Some(label)
        });
        self.0.push((Value::Integer(label.into()), value));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `alg` entry, if it is an integer.
    pub fn algorithm(&self) -> Option<i64> {
        self.get(ALG_HEADER_LABEL)
            .and_then(Value::as_integer)
            .and_then(|i| i64::try_from(i).ok())
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::Map(self.0.clone())
    }

    pub(crate) fn from_value(value: Value) -> Result<Self, CborError> {
        match value {
            Value::Map(entries) => Ok(Self(entries)),
            other => Err(CborError::UnexpectedItem(cbor::type_name(&other), "map")),
        }
    }
}

/// A protected header: the serialized bytes that are signed, and their decoded form.
///
/// An empty header is carried as a zero-length byte string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtectedHeader {
    bytes: Vec<u8>,
    header: HeaderMap,
}

impl ProtectedHeader {
    pub fn new(header: HeaderMap) -> Result<Self, CborError> {
        let bytes = if header.is_empty() {
            Vec::new()
        } else {
            cbor::to_vec(&header.to_value())?
        };
        Ok(Self { bytes, header })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CborError> {
        let header = if bytes.is_empty() {
            HeaderMap::new()
        } else {
            HeaderMap::from_value(cbor::from_slice(&bytes)?)?
        };
        Ok(Self { bytes, header })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header(&self) -> &HeaderMap {
        &self.header
    }
}

/// COSE algorithm identifier for a signature algorithm of this crate.
pub(crate) fn algorithm_value(alg: crate::crypto::SignatureAlgorithm) -> Value {
    Value::Integer(alg.cose_id().into())
}

/// Name of an IANA COSE algorithm, for diagnostics.
pub(crate) fn algorithm_name(id: i64) -> String {
    iana::Algorithm::from_i64(id)
        .map(|alg| format!("{alg:?}"))
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn protected_header_bytes_are_kept() {
        // {1: -7} encoded with a non-minimal integer for the label.
        let bytes = hex!("a1 18 01 26").to_vec();
        let protected = ProtectedHeader::from_bytes(bytes.clone()).unwrap();
        assert_eq!(protected.as_bytes(), bytes.as_slice());
        assert_eq!(protected.header().algorithm(), Some(-7));
    }

    #[test]
    fn empty_protected_header_is_empty_bstr() {
        let protected = ProtectedHeader::new(HeaderMap::new()).unwrap();
        assert!(protected.as_bytes().is_empty());
    }

    #[test]
    fn insert_replaces() {
        let mut header = HeaderMap::new();
        header.insert(ALG_HEADER_LABEL, Value::Integer((-7).into()));
        header.insert(ALG_HEADER_LABEL, Value::Integer((-35).into()));
        assert_eq!(header.algorithm(), Some(-35));
        assert_eq!(algorithm_name(-35), "ES384");
    }
}
