//! Deterministic CBOR encoding on top of [ciborium].
//!
//! Every structure that ends up on the wire, in a digest or in a signature goes through
//! [to_vec], which sorts map keys by the bytewise order of their encodings
//! ([RFC 8949 §4.2.1](https://www.rfc-editor.org/rfc/rfc8949#section-4.2.1)). Integers and
//! lengths are always written in their shortest form by ciborium itself.
//!
//! Byte strings are never looked into, so the contents of `#6.24(bstr)` items are carried
//! verbatim.

use std::io::Cursor;

use ciborium::Value;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
    /// CBOR input had extra data after the first item.
    #[error("extraneous data after CBOR item")]
    ExtraneousData,
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
}

/// Encode `value` as deterministic CBOR.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize + ?Sized,
{
    let value = into_value(value)?;
    write(&canonicalize(value)?)
}

/// Decode exactly one CBOR item from `slice`.
pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: DeserializeOwned,
{
    let mut cursor = Cursor::new(slice);
    let value = ciborium::from_reader(&mut cursor)
        .map_err(|e| CborError::DecodeFailed(e.to_string()))?;
    if cursor.position() as usize != slice.len() {
        return Err(CborError::ExtraneousData);
    }
    Ok(value)
}

/// Convert a serializable value into a [ciborium::Value].
pub fn into_value<S>(v: &S) -> Result<Value, CborError>
where
    S: Serialize + ?Sized,
{
    Value::serialized(v).map_err(|e| CborError::EncodeFailed(e.to_string()))
}

/// Convert a [ciborium::Value] into a type `T`.
pub fn from_value<T>(value: &Value) -> Result<T, CborError>
where
    T: DeserializeOwned,
{
    value
        .deserialized()
        .map_err(|e| CborError::DecodeFailed(e.to_string()))
}

/// Name of the major type of `value`, used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "int",
        Value::Bytes(_) => "bstr",
        Value::Float(_) => "float",
        Value::Text(_) => "tstr",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Tag(_, _) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unknown",
    }
}

fn write(value: &Value) -> Result<Vec<u8>, CborError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

fn canonicalize(value: Value) -> Result<Value, CborError> {
    Ok(match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(canonicalize)
                .collect::<Result<_, _>>()?,
        ),
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(canonicalize(*inner)?)),
        Value::Map(entries) => {
            let mut keyed = entries
                .into_iter()
                .map(|(k, v)| {
                    let k = canonicalize(k)?;
                    let encoded = write(&k)?;
                    Ok((encoded, k, canonicalize(v)?))
                })
                .collect::<Result<Vec<_>, CborError>>()?;
            keyed.sort_by(|(a, _, _), (b, _, _)| a.cmp(b));
            Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        other => other,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;
    use std::collections::BTreeMap;

    #[test]
    fn map_keys_are_sorted_by_encoding() {
        let map = Value::Map(vec![
            (Value::Text("version".into()), Value::Null),
            (Value::Integer((-1).into()), Value::Null),
            (Value::Integer(10.into()), Value::Null),
            (Value::Integer(1.into()), Value::Null),
        ]);
        let bytes = to_vec(&map).unwrap();
        assert_eq!(
            bytes,
            hex!("a4 01 f6 0a f6 20 f6 6776657273696f6e f6").to_vec()
        );
    }

    #[test]
    fn struct_fields_are_reordered() {
        #[derive(serde::Serialize)]
        struct Example {
            status: u8,
            a: u8,
        }
        let bytes = to_vec(&Example { status: 0, a: 1 }).unwrap();
        assert_eq!(bytes, hex!("a2 61 61 01 66 737461747573 00").to_vec());
    }

    #[test]
    fn nested_maps_are_sorted() {
        let mut inner = BTreeMap::new();
        inner.insert("bb".to_string(), 1u8);
        inner.insert("c".to_string(), 2u8);
        let bytes = to_vec(&vec![inner]).unwrap();
        // "c" (0x61 63) sorts before "bb" (0x62 62 62).
        assert_eq!(bytes, hex!("81 a2 61 63 02 62 6262 01").to_vec());
    }

    #[test]
    fn byte_strings_are_opaque() {
        let embedded = hex!("a2 02 00 01 00");
        let value = Value::Tag(24, Box::new(Value::Bytes(embedded.to_vec())));
        let bytes = to_vec(&value).unwrap();
        assert!(bytes.ends_with(&embedded));
    }

    #[test]
    fn trailing_data_is_rejected() {
        let result: Result<Value, _> = from_slice(&hex!("01 02"));
        assert!(matches!(result, Err(CborError::ExtraneousData)));
    }
}
