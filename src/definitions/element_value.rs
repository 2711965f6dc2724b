//! Declared CBOR types of issuer-signed element values.

use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use time::{format_description::well_known::Rfc3339, macros::format_description, Date};

use super::validity_info::{tdate, TAG_TDATE};
use crate::cbor;

/// Tag number of a `full-date` (RFC 8943).
pub const TAG_FULL_DATE: u64 = 1004;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum ElementType {
    #[strum(serialize = "tstr")]
    #[serde(rename = "tstr")]
    Tstr,
    #[strum(serialize = "bstr")]
    #[serde(rename = "bstr")]
    Bstr,
    #[strum(serialize = "tdate")]
    #[serde(rename = "tdate")]
    Tdate,
    #[strum(serialize = "full-date")]
    #[serde(rename = "full-date")]
    FullDate,
    #[strum(serialize = "uint")]
    #[serde(rename = "uint")]
    Uint,
    #[strum(serialize = "bool")]
    #[serde(rename = "bool")]
    Bool,
}

/// A data element value together with its declared type, as given to the issuer.
///
/// A JSON string is read as the textual form of the type (see [ElementType::encode]); any other
/// JSON value is converted as is and must already have the declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedElement {
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub value: serde_json::Value,
}

/// Typed data elements by namespace and element identifier.
pub type TypedNamespaces = BTreeMap<String, BTreeMap<String, TypedElement>>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("value is not a valid {expected}: {found}")]
    TypeMismatch {
        expected: ElementType,
        found: String,
    },
    #[error("unable to convert value: {0}")]
    Conversion(String),
}

impl TypedElement {
    pub fn to_value(&self) -> Result<Value, Error> {
        if let serde_json::Value::String(text) = &self.value {
            return self.element_type.encode(text);
        }
        let value =
            cbor::into_value(&self.value).map_err(|e| Error::Conversion(e.to_string()))?;
        self.element_type.check(&value)?;
        Ok(value)
    }
}

fn mismatch(expected: ElementType, found: impl Into<String>) -> Error {
    Error::TypeMismatch {
        expected,
        found: found.into(),
    }
}

impl ElementType {
    /// Encode the textual form of a value: base64url for `bstr`, RFC 3339 for `tdate`,
    /// `YYYY-MM-DD` for `full-date`, decimal for `uint`, `true`/`false` for `bool`.
    pub fn encode(self, text: &str) -> Result<Value, Error> {
        let value = match self {
            ElementType::Tstr => Value::Text(text.to_string()),
            ElementType::Bstr => {
                let bytes = base64::decode_config(text.trim_end_matches('='), base64::URL_SAFE_NO_PAD)
                    .map_err(|e| mismatch(self, e.to_string()))?;
                Value::Bytes(bytes)
            }
            ElementType::Tdate => {
                let datetime = time::OffsetDateTime::parse(text, &Rfc3339)
                    .map_err(|e| mismatch(self, e.to_string()))?;
                tdate(datetime)
            }
            ElementType::FullDate => {
                let date = parse_full_date(text).ok_or_else(|| mismatch(self, text))?;
                Value::Tag(TAG_FULL_DATE, Box::new(Value::Text(date.to_string())))
            }
            ElementType::Uint => {
                let n: u64 = text.parse().map_err(|_| mismatch(self, text))?;
                Value::Integer(n.into())
            }
            ElementType::Bool => match text {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => return Err(mismatch(self, other)),
            },
        };
        Ok(value)
    }

    /// Check that `value` has this type.
    pub fn check(self, value: &Value) -> Result<(), Error> {
        let ok = match (self, value) {
            (ElementType::Tstr, Value::Text(_)) => true,
            (ElementType::Bstr, Value::Bytes(_)) => true,
            (ElementType::Tdate, Value::Tag(TAG_TDATE, inner)) => inner
                .as_text()
                .is_some_and(|text| time::OffsetDateTime::parse(text, &Rfc3339).is_ok()),
            (ElementType::FullDate, Value::Tag(TAG_FULL_DATE, inner)) => inner
                .as_text()
                .and_then(parse_full_date)
                .is_some(),
            (ElementType::Uint, Value::Integer(i)) => u64::try_from(*i).is_ok(),
            (ElementType::Bool, Value::Bool(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(mismatch(self, describe(value)))
        }
    }
}

fn parse_full_date(text: &str) -> Option<Date> {
    Date::parse(text, format_description!("[year]-[month]-[day]")).ok()
}

fn describe(value: &Value) -> String {
    match value {
        Value::Integer(i) => i128::from(*i).to_string(),
        Value::Tag(tag, _) => format!("tag {tag}"),
        other => cbor::type_name(other).to_string(),
    }
}
