use ciborium::Value;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

use crate::cbor;

/// Tag number of a `tdate`: an RFC 3339 date-time text string.
pub const TAG_TDATE: u64 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ValidityInfo {
    pub signed: OffsetDateTime,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub expected_update: Option<OffsetDateTime>,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("when parsing a CBOR map, could not find required field: '{0}'")]
    MissingField(&'static str),
    #[error("expected to parse a CBOR map, received: {0}")]
    NotAMap(&'static str),
    #[error("expected a tdate (tag 0 text string), received: {0}")]
    NotATdate(&'static str),
    #[error("failed to parse date string as rfc3339 date: {0}")]
    UnableToParseDate(#[from] time::error::Parse),
}

impl ValidityInfo {
    /// Whether `now` lies in `[valid_from, valid_until]`.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    /// The validity as it reads once encoded: every date-time in UTC, whole seconds.
    pub fn into_whole_seconds(self) -> Self {
        Self {
            signed: whole_seconds_utc(self.signed),
            valid_from: whole_seconds_utc(self.valid_from),
            valid_until: whole_seconds_utc(self.valid_until),
            expected_update: self.expected_update.map(whole_seconds_utc),
        }
    }
}

/// `datetime` in UTC with the fraction of a second dropped.
pub fn whole_seconds_utc(datetime: OffsetDateTime) -> OffsetDateTime {
    let utc = datetime.to_offset(UtcOffset::UTC);
    utc.replace_nanosecond(0).unwrap_or(utc)
}

/// Encode as a tdate: UTC, whole seconds.
pub fn tdate(datetime: OffsetDateTime) -> Value {
    // Formatting a UTC date-time with a four digit year cannot fail.
    let text = whole_seconds_utc(datetime)
        .format(&Rfc3339)
        .unwrap_or_default();
    Value::Tag(TAG_TDATE, Box::new(Value::Text(text)))
}

pub fn from_tdate(value: &Value) -> Result<OffsetDateTime> {
    match value {
        Value::Tag(TAG_TDATE, inner) => match inner.as_ref() {
            Value::Text(text) => Ok(OffsetDateTime::parse(text, &Rfc3339)?),
            other => Err(Error::NotATdate(cbor::type_name(other))),
        },
        other => Err(Error::NotATdate(cbor::type_name(other))),
    }
}

impl From<ValidityInfo> for Value {
    fn from(v: ValidityInfo) -> Value {
        let mut map = vec![
            (Value::Text("signed".into()), tdate(v.signed)),
            (Value::Text("validFrom".into()), tdate(v.valid_from)),
            (Value::Text("validUntil".into()), tdate(v.valid_until)),
        ];
        if let Some(expected_update) = v.expected_update {
            map.push((
                Value::Text("expectedUpdate".into()),
                tdate(expected_update),
            ));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for ValidityInfo {
    type Error = Error;

    fn try_from(v: Value) -> Result<ValidityInfo> {
        let Value::Map(map) = v else {
            return Err(Error::NotAMap(cbor::type_name(&v)));
        };
        let field = |name: &'static str| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        };
        let required = |name: &'static str| {
            field(name)
                .ok_or(Error::MissingField(name))
                .and_then(from_tdate)
        };
        Ok(Self {
            signed: required("signed")?,
            valid_from: required("validFrom")?,
            valid_until: required("validUntil")?,
            expected_update: field("expectedUpdate").map(from_tdate).transpose()?,
        })
    }
}
