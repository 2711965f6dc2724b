use ciborium::Value;
use serde::{Deserialize, Serialize};

use super::{algorithm_name, algorithm_value, HeaderMap, ProtectedHeader, ALG_HEADER_LABEL};
use crate::cbor::{self, CborError};
use crate::crypto::{self, PublicKey, SignatureAlgorithm, Signer};

/// Context string of a `COSE_Sign1` signature structure.
const SIGNATURE1_CONTEXT: &str = "Signature1";

/// An untagged `COSE_Sign1`: `[protected, unprotected, payload, signature]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct CoseSign1 {
    pub protected: ProtectedHeader,
    pub unprotected: HeaderMap,
    /// `None` when the payload is detached.
    pub payload: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

/// A `COSE_Sign1` waiting for its signature, for signing with a remote key.
#[derive(Debug, Clone)]
pub struct PreparedCoseSign1 {
    cose_sign1: CoseSign1,
    signature_payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    unprotected: HeaderMap,
    payload: Option<Vec<u8>>,
    detached: bool,
    external_aad: Vec<u8>,
    algorithm: Option<SignatureAlgorithm>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid COSE_Sign1: {0}")]
    InvalidCose(String),
    #[error("COSE_Sign1 has no algorithm in its protected header")]
    MissingAlgorithmHeader,
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature algorithm {algorithm} cannot be used with a {curve} key")]
    AlgorithmMismatch {
        algorithm: SignatureAlgorithm,
        curve: crypto::Curve,
    },
    #[error("COSE_Sign1 payload is detached and none was supplied")]
    MissingPayload,
    #[error("COSE_Sign1 payload differs from the expected payload")]
    PayloadMismatch,
    #[error("signature algorithm must be set before preparing")]
    NoSignatureAlgorithm,
    #[error(transparent)]
    Cbor(#[from] CborError),
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl CoseSign1 {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The signature algorithm from the protected header.
    pub fn algorithm(&self) -> Result<SignatureAlgorithm> {
        let id = self
            .protected
            .header()
            .algorithm()
            .ok_or(Error::MissingAlgorithmHeader)?;
        SignatureAlgorithm::from_cose_id(id)
            .ok_or_else(|| Error::UnsupportedAlgorithm(algorithm_name(id)))
    }

    /// `Sig_structure1 = ["Signature1", protected, external_aad, payload]`.
    pub fn signature_payload(
        &self,
        detached_payload: Option<&[u8]>,
        external_aad: &[u8],
    ) -> Result<Vec<u8>> {
        let payload = match (&self.payload, detached_payload) {
            (Some(attached), Some(expected)) if attached.as_slice() != expected => {
                return Err(Error::PayloadMismatch)
            }
            (Some(attached), _) => attached.as_slice(),
            (None, Some(detached)) => detached,
            (None, None) => return Err(Error::MissingPayload),
        };
        sig_structure(self.protected.as_bytes(), external_aad, payload)
    }

    /// Verify the signature with `public_key`.
    ///
    /// `detached_payload` is required when the payload is detached; when both are present they
    /// must be equal.
    pub fn verify(
        &self,
        public_key: &PublicKey,
        detached_payload: Option<&[u8]>,
        external_aad: &[u8],
    ) -> Result<()> {
        let algorithm = self.algorithm()?;
        if public_key.curve().signature_algorithm() != Some(algorithm) {
            return Err(Error::AlgorithmMismatch {
                algorithm,
                curve: public_key.curve(),
            });
        }
        let to_be_signed = self.signature_payload(detached_payload, external_aad)?;
        public_key.verify(&to_be_signed, &self.signature)?;
        Ok(())
    }
}

fn sig_structure(protected: &[u8], external_aad: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let structure = Value::Array(vec![
        Value::Text(SIGNATURE1_CONTEXT.to_string()),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(external_aad.to_vec()),
        Value::Bytes(payload.to_vec()),
    ]);
    Ok(cbor::to_vec(&structure)?)
}

impl Builder {
    /// Attach a payload to the message.
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self.detached = false;
        self
    }

    /// Sign over `payload` without carrying it in the message.
    pub fn detached_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self.detached = true;
        self
    }

    pub fn external_aad(mut self, aad: Vec<u8>) -> Self {
        self.external_aad = aad;
        self
    }

    pub fn unprotected_header(mut self, label: i64, value: Value) -> Self {
        self.unprotected.insert(label, value);
        self
    }

    pub fn signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Compute the structure to be signed.
    pub fn prepare(self) -> Result<PreparedCoseSign1> {
        let algorithm = self.algorithm.ok_or(Error::NoSignatureAlgorithm)?;
        let mut protected = HeaderMap::new();
        protected.insert(ALG_HEADER_LABEL, algorithm_value(algorithm));
        let protected = ProtectedHeader::new(protected)?;

        let payload = self.payload.unwrap_or_default();
        let signature_payload = sig_structure(protected.as_bytes(), &self.external_aad, &payload)?;

        let cose_sign1 = CoseSign1 {
            protected,
            unprotected: self.unprotected,
            payload: (!self.detached).then_some(payload),
            signature: Vec::new(),
        };
        Ok(PreparedCoseSign1 {
            cose_sign1,
            signature_payload,
        })
    }

    /// Prepare and sign with `signer`, taking the algorithm from its curve.
    pub fn sign<S: Signer + ?Sized>(mut self, signer: &S) -> Result<CoseSign1> {
        let curve = signer.curve();
        let algorithm = curve
            .signature_algorithm()
            .ok_or(crypto::Error::UnsupportedCurve(curve))?;
        self.algorithm = Some(algorithm);
        let prepared = self.prepare()?;
        let signature = signer.sign(prepared.signature_payload())?;
        Ok(prepared.finalize(signature))
    }
}

impl PreparedCoseSign1 {
    /// The bytes a remote signer has to sign.
    pub fn signature_payload(&self) -> &[u8] {
        &self.signature_payload
    }

    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        self.cose_sign1.algorithm().ok()
    }

    pub fn finalize(self, signature: Vec<u8>) -> CoseSign1 {
        CoseSign1 {
            signature,
            ..self.cose_sign1
        }
    }
}

impl From<CoseSign1> for Value {
    fn from(cose: CoseSign1) -> Value {
        Value::Array(vec![
            Value::Bytes(cose.protected.as_bytes().to_vec()),
            cose.unprotected.to_value(),
            cose.payload.map(Value::Bytes).unwrap_or(Value::Null),
            Value::Bytes(cose.signature),
        ])
    }
}

impl TryFrom<Value> for CoseSign1 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let [protected, unprotected, payload, signature]: [Value; 4] = match value {
            Value::Array(items) => items
                .try_into()
                .map_err(|_| Error::InvalidCose("expected a 4 element array".into()))?,
            Value::Tag(18, _) => {
                return Err(Error::InvalidCose(
                    "tagged COSE_Sign1 where an untagged one is expected".into(),
                ))
            }
            other => {
                return Err(Error::InvalidCose(format!(
                    "expected an array, found {}",
                    cbor::type_name(&other)
                )))
            }
        };
        let protected = match protected {
            Value::Bytes(bytes) => ProtectedHeader::from_bytes(bytes)?,
            other => {
                return Err(Error::InvalidCose(format!(
                    "protected header must be a bstr, found {}",
                    cbor::type_name(&other)
                )))
            }
        };
        let unprotected = HeaderMap::from_value(unprotected)?;
        let payload = match payload {
            Value::Bytes(bytes) => Some(bytes),
            Value::Null => None,
            other => {
                return Err(Error::InvalidCose(format!(
                    "payload must be a bstr or nil, found {}",
                    cbor::type_name(&other)
                )))
            }
        };
        let signature = match signature {
            Value::Bytes(bytes) => bytes,
            other => {
                return Err(Error::InvalidCose(format!(
                    "signature must be a bstr, found {}",
                    cbor::type_name(&other)
                )))
            }
        };
        Ok(CoseSign1 {
            protected,
            unprotected,
            payload,
            signature,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::Curve;
    use hex_literal::hex;
    use rand::rngs::OsRng;

    #[test]
    fn signature_structure_layout() {
        let prepared = CoseSign1::builder()
            .payload(b"payload".to_vec())
            .signature_algorithm(SignatureAlgorithm::ES256)
            .prepare()
            .unwrap();
        // ["Signature1", h'a10126', h'', h'7061796c6f6164']
        assert_eq!(
            prepared.signature_payload(),
            hex!("84 6a 5369676e617475726531 43 a10126 40 47 7061796c6f6164").as_slice()
        );
    }

    #[test]
    fn sign_and_verify_attached() {
        let key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let cose = CoseSign1::builder()
            .payload(b"payload".to_vec())
            .sign(&key)
            .unwrap();
        let bytes = cbor::to_vec(&cose).unwrap();
        assert_eq!(bytes[0], 0x84, "untagged 4 element array");

        let decoded: CoseSign1 = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded.algorithm().unwrap(), SignatureAlgorithm::ES256);
        decoded.verify(&key.public_key(), None, &[]).unwrap();
        assert!(matches!(
            decoded.verify(&key.public_key(), Some(b"other"), &[]),
            Err(Error::PayloadMismatch)
        ));
    }

    #[test]
    fn sign_and_verify_detached() {
        let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let cose = CoseSign1::builder()
            .detached_payload(b"detached".to_vec())
            .sign(&key)
            .unwrap();
        assert!(cose.payload.is_none());
        assert!(matches!(
            cose.verify(&key.public_key(), None, &[]),
            Err(Error::MissingPayload)
        ));
        cose.verify(&key.public_key(), Some(b"detached"), &[]).unwrap();
        assert!(cose
            .verify(&key.public_key(), Some(b"tampered"), &[])
            .is_err());
    }

    #[test]
    fn wrong_key_type_is_rejected() {
        let signer = p384::ecdsa::SigningKey::random(&mut OsRng);
        let other = p256::ecdsa::SigningKey::random(&mut OsRng);
        let cose = CoseSign1::builder()
            .payload(vec![1])
            .sign(&signer)
            .unwrap();
        assert!(matches!(
            cose.verify(&other.public_key(), None, &[]),
            Err(Error::AlgorithmMismatch {
                curve: Curve::P256,
                ..
            })
        ));
    }

    #[test]
    fn missing_and_unknown_algorithms() {
        let mut cose = CoseSign1::builder()
            .payload(vec![1])
            .sign(&p256::ecdsa::SigningKey::random(&mut OsRng))
            .unwrap();
        cose.protected = ProtectedHeader::new(HeaderMap::new()).unwrap();
        assert!(matches!(cose.algorithm(), Err(Error::MissingAlgorithmHeader)));

        let mut header = HeaderMap::new();
        header.insert(ALG_HEADER_LABEL, Value::Integer((-257).into()));
        cose.protected = ProtectedHeader::new(header).unwrap();
        assert!(matches!(cose.algorithm(), Err(Error::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn tagged_input_is_rejected() {
        let bytes = hex!("d2 84 40 a0 f6 40");
        assert!(cbor::from_slice::<CoseSign1>(&bytes).is_err());
    }
}
