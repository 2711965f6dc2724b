use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::cbor;
use crate::crypto::{self, Curve, KeyType, PublicKey};

const KTY: i64 = 1;
const CRV: i64 = -1;
const X: i64 = -2;
const Y: i64 = -3;

/// An implementation of RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
/// restricted to the requirements of ISO/IEC 18013-5:2021.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub enum CoseKey {
    EC2 { crv: Curve, x: Vec<u8>, y: EC2Y },
    OKP { crv: Curve, x: Vec<u8> },
}

/// The sign bit or value of the y-coordinate for the EC point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Y {
    Value(Vec<u8>),
    SignBit(bool),
}

/// Errors that can occur when deserialising a COSE_Key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("COSE_Key of kty 'EC2' missing x coordinate")]
    EC2MissingX,
    #[error("COSE_Key of kty 'EC2' missing y coordinate")]
    EC2MissingY,
    #[error("COSE_Key of kty 'OKP' missing x coordinate")]
    OKPMissingX,
    #[error("expected to parse a CBOR bool or bstr for y-coordinate, received: {0}")]
    InvalidTypeY(&'static str),
    #[error("expected to parse a CBOR map, received: {0}")]
    NotAMap(&'static str),
    #[error("COSE_Key has no curve")]
    MissingCurve,
    #[error("COSE_Key kty {kty} does not match curve {crv}")]
    KeyTypeMismatch { kty: i64, crv: Curve },
    #[error("this implementation of COSE_Key only supports EC2 and OKP keys")]
    UnsupportedKeyType,
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
}

impl CoseKey {
    pub fn curve(&self) -> Curve {
        match self {
            CoseKey::EC2 { crv, .. } | CoseKey::OKP { crv, .. } => *crv,
        }
    }

    pub fn signature_algorithm(&self) -> Option<crypto::SignatureAlgorithm> {
        self.curve().signature_algorithm()
    }

    /// The public key this COSE_Key describes, checked to lie on its curve.
    pub fn to_public_key(&self) -> Result<PublicKey, Error> {
        let key = match self {
            CoseKey::EC2 {
                crv,
                x,
                y: EC2Y::Value(y),
            } => PublicKey::from_coordinates(*crv, x, Some(y))?,
            CoseKey::EC2 {
                crv,
                x,
                y: EC2Y::SignBit(sign),
            } => {
                let mut compressed = Vec::with_capacity(1 + x.len());
                compressed.push(if *sign { 0x03 } else { 0x02 });
                compressed.extend_from_slice(x);
                PublicKey::from_bytes(*crv, &compressed)?
            }
            CoseKey::OKP { crv, x } => PublicKey::from_bytes(*crv, x)?,
        };
        Ok(key)
    }
}

impl From<&PublicKey> for CoseKey {
    fn from(key: &PublicKey) -> CoseKey {
        let crv = key.curve();
        match key.y() {
            Some(y) => CoseKey::EC2 {
                crv,
                x: key.x().to_vec(),
                y: EC2Y::Value(y.to_vec()),
            },
            None => CoseKey::OKP {
                crv,
                x: key.x().to_vec(),
            },
        }
    }
}

impl From<PublicKey> for CoseKey {
    fn from(key: PublicKey) -> CoseKey {
        CoseKey::from(&key)
    }
}

impl TryFrom<&CoseKey> for PublicKey {
    type Error = Error;

    fn try_from(key: &CoseKey) -> Result<PublicKey, Error> {
        key.to_public_key()
    }
}

fn label(l: i64) -> Value {
    Value::Integer(l.into())
}

impl From<CoseKey> for Value {
    fn from(key: CoseKey) -> Value {
        match key {
            CoseKey::EC2 { crv, x, y } => Value::Map(vec![
                (label(KTY), label(KeyType::Ec2.cose_id())),
                (label(CRV), label(crv.cose_id())),
                (label(X), Value::Bytes(x)),
                (
                    label(Y),
                    match y {
                        EC2Y::Value(v) => Value::Bytes(v),
                        EC2Y::SignBit(b) => Value::Bool(b),
                    },
                ),
            ]),
            CoseKey::OKP { crv, x } => Value::Map(vec![
                (label(KTY), label(KeyType::Okp.cose_id())),
                (label(CRV), label(crv.cose_id())),
                (label(X), Value::Bytes(x)),
            ]),
        }
    }
}

impl TryFrom<Value> for CoseKey {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::NotAMap(cbor::type_name(&v)));
        };
        let find = |l: i64| {
            entries
                .iter()
                .find(|(k, _)| k.as_integer().and_then(|i| i64::try_from(i).ok()) == Some(l))
                .map(|(_, v)| v)
        };
        let integer = |v: &Value| v.as_integer().and_then(|i| i64::try_from(i).ok());

        let kty = find(KTY)
            .and_then(integer)
            .ok_or(Error::UnsupportedKeyType)?;
        let crv = find(CRV).and_then(integer).ok_or(Error::MissingCurve)?;
        let crv = Curve::from_cose_id(crv)?;
        let x = find(X).and_then(Value::as_bytes).cloned();

        match kty {
            2 if crv.key_type() == KeyType::Ec2 => {
                let x = x.ok_or(Error::EC2MissingX)?;
                let y = match find(Y).ok_or(Error::EC2MissingY)? {
                    Value::Bytes(v) => EC2Y::Value(v.clone()),
                    Value::Bool(b) => EC2Y::SignBit(*b),
                    other => return Err(Error::InvalidTypeY(cbor::type_name(other))),
                };
                Ok(CoseKey::EC2 { crv, x, y })
            }
            1 if crv.key_type() == KeyType::Okp => Ok(CoseKey::OKP {
                crv,
                x: x.ok_or(Error::OKPMissingX)?,
            }),
            1 | 2 => Err(Error::KeyTypeMismatch { kty, crv }),
            _ => Err(Error::UnsupportedKeyType),
        }
    }
}
