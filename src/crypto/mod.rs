//! Cipher suite registry and the primitives it selects: curves, signature and agreement keys,
//! digests.
//!
//! Session encryption (HKDF and AES-GCM) lives with the session messages in
//! [crate::definitions::session].

mod agreement;
mod curve;
mod digest;
mod signer;

use elliptic_curve::sec1::ToEncodedPoint;

pub use agreement::{Agreer, EphemeralKey};
pub use curve::{Curve, DeviceKeyMode, KeyType, SignatureAlgorithm};
pub use digest::DigestAlgorithm;
pub use signer::{SignatureEncoding, Signer};

/// Cipher suite identifier carried in `Security`. Only suite 1 is defined.
pub const CIPHER_SUITE_1: u64 = 1;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("curve {0} is not supported")]
    UnsupportedCurve(Curve),
    #[error("unknown COSE curve identifier {0}")]
    UnknownCurve(i64),
    #[error("unsupported cipher suite {0}")]
    UnsupportedCipherSuite(u64),
    #[error("unsupported public key algorithm {0}")]
    UnsupportedKeyAlgorithm(String),
    #[error("invalid public key for curve {0}")]
    InvalidPublicKey(Curve),
    #[error("invalid private key for curve {0}")]
    InvalidPrivateKey(Curve),
    #[error("expected a key on curve {expected}, found {actual}")]
    CurveMismatch { expected: Curve, actual: Curve },
    #[error("signature must be {expected} bytes, found {actual}")]
    InvalidSignatureLength { expected: usize, actual: usize },
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("key agreement failed")]
    AgreementFailed,
}

/// Check the cipher suite identifier of a device engagement.
pub fn check_cipher_suite(id: u64) -> Result<(), Error> {
    if id == CIPHER_SUITE_1 {
        Ok(())
    } else {
        Err(Error::UnsupportedCipherSuite(id))
    }
}

/// A public key on a curve this crate can use.
///
/// EC2 keys are held as an uncompressed SEC1 point (`0x04 || X || Y`), OKP keys as their single
/// coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    curve: Curve,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Parse a SEC1 point (compressed or uncompressed) or an OKP coordinate, checking that it
    /// lies on `curve`.
    pub fn from_bytes(curve: Curve, bytes: &[u8]) -> Result<Self, Error> {
        let invalid = |_| Error::InvalidPublicKey(curve);
        let bytes = match curve {
            Curve::P256 => p256::PublicKey::from_sec1_bytes(bytes)
                .map_err(invalid)?
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            Curve::P384 => p384::PublicKey::from_sec1_bytes(bytes)
                .map_err(invalid)?
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            Curve::P521 => p521::PublicKey::from_sec1_bytes(bytes)
                .map_err(invalid)?
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            Curve::Ed25519 => {
                let raw: &[u8; 32] = bytes.try_into().map_err(|_| Error::InvalidPublicKey(curve))?;
                ed25519_dalek::VerifyingKey::from_bytes(raw)
                    .map_err(|_| Error::InvalidPublicKey(curve))?;
                raw.to_vec()
            }
            Curve::X25519 if bytes.len() == 32 => bytes.to_vec(),
            Curve::X25519 => return Err(Error::InvalidPublicKey(curve)),
            curve => return Err(Error::UnsupportedCurve(curve)),
        };
        Ok(Self { curve, bytes })
    }

    /// Build from EC2 coordinates or an OKP `x`.
    pub fn from_coordinates(curve: Curve, x: &[u8], y: Option<&[u8]>) -> Result<Self, Error> {
        match (curve.key_type(), y) {
            (KeyType::Ec2, Some(y)) => {
                let mut point = Vec::with_capacity(1 + x.len() + y.len());
                point.push(0x04);
                point.extend_from_slice(x);
                point.extend_from_slice(y);
                Self::from_bytes(curve, &point)
            }
            (KeyType::Ec2, None) => Err(Error::InvalidPublicKey(curve)),
            (KeyType::Okp, _) => Self::from_bytes(curve, x),
        }
    }

    pub(crate) fn from_trusted_bytes(curve: Curve, bytes: &[u8]) -> Self {
        Self {
            curve,
            bytes: bytes.to_vec(),
        }
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The x-coordinate, or the whole key for OKP curves.
    pub fn x(&self) -> &[u8] {
        match self.curve.key_type() {
            KeyType::Ec2 => &self.bytes[1..1 + self.curve.coordinate_len()],
            KeyType::Okp => &self.bytes,
        }
    }

    /// The y-coordinate of an EC2 key.
    pub fn y(&self) -> Option<&[u8]> {
        match self.curve.key_type() {
            KeyType::Ec2 => Some(&self.bytes[1 + self.curve.coordinate_len()..]),
            KeyType::Okp => None,
        }
    }
}
