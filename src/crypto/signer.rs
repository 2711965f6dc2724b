use p256::NistP256;
use p384::NistP384;
use p521::NistP521;
use signature::{hazmat::PrehashVerifier, Verifier};

use super::{Curve, DigestAlgorithm, Error, KeyType, PublicKey, SignatureAlgorithm};

/// A private key able to produce raw mdoc signatures.
///
/// ECDSA signatures are returned as fixed-size `r || s` and hash the message with the curve's
/// hash. EdDSA signs the full message.
pub trait Signer {
    fn curve(&self) -> Curve;

    fn public_key(&self) -> PublicKey;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error>;

    fn algorithm(&self) -> SignatureAlgorithm {
        // Every implementation in this crate is on a signing curve.
        self.curve()
            .signature_algorithm()
            .unwrap_or(SignatureAlgorithm::ES256)
    }
}

impl Signer for p256::ecdsa::SigningKey {
    fn curve(&self) -> Curve {
        Curve::P256
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from_trusted_bytes(
            Curve::P256,
            self.verifying_key().to_encoded_point(false).as_bytes(),
        )
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let signature: p256::ecdsa::Signature = signature::Signer::try_sign(self, message)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl Signer for p384::ecdsa::SigningKey {
    fn curve(&self) -> Curve {
        Curve::P384
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from_trusted_bytes(
            Curve::P384,
            self.verifying_key().to_encoded_point(false).as_bytes(),
        )
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let signature: p384::ecdsa::Signature = signature::Signer::try_sign(self, message)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl Signer for p521::ecdsa::SigningKey {
    fn curve(&self) -> Curve {
        Curve::P521
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from_trusted_bytes(
            Curve::P521,
            p521::ecdsa::VerifyingKey::from(self)
                .to_encoded_point(false)
                .as_bytes(),
        )
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let signature: p521::ecdsa::Signature = signature::Signer::try_sign(self, message)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl Signer for ed25519_dalek::SigningKey {
    fn curve(&self) -> Curve {
        Curve::Ed25519
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from_trusted_bytes(Curve::Ed25519, self.verifying_key().as_bytes())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let signature: ed25519_dalek::Signature = signature::Signer::try_sign(self, message)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl<S: Signer + ?Sized> Signer for &S {
    fn curve(&self) -> Curve {
        (**self).curve()
    }

    fn public_key(&self) -> PublicKey {
        (**self).public_key()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        (**self).sign(message)
    }
}

/// Encoding of an ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Fixed-size `r || s`, as used by COSE.
    Raw,
    /// ASN.1 `ECDSA-Sig-Value`, as used by X.509.
    Der,
}

macro_rules! verify_prehash {
    ($curve:ty, $key:expr, $prehash:expr, $signature:expr, $encoding:expr, $name:expr) => {{
        let key = ecdsa::VerifyingKey::<$curve>::from_sec1_bytes($key)
            .map_err(|_| Error::InvalidPublicKey($name))?;
        let signature = match $encoding {
            SignatureEncoding::Raw => ecdsa::Signature::<$curve>::from_slice($signature),
            SignatureEncoding::Der => ecdsa::Signature::<$curve>::from_der($signature),
        }
        .map_err(|_| Error::InvalidSignature)?;
        key.verify_prehash($prehash, &signature)
            .map_err(|_| Error::InvalidSignature)
    }};
}

impl PublicKey {
    /// Verify a COSE signature: raw encoding, hash matched to the curve.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self.curve().key_type() {
            KeyType::Okp => self.verify_eddsa(message, signature),
            KeyType::Ec2 => {
                let digest = self
                    .curve()
                    .signature_algorithm()
                    .and_then(SignatureAlgorithm::digest_algorithm)
                    .ok_or(Error::UnsupportedCurve(self.curve()))?;
                self.verify_ecdsa(digest, message, signature, SignatureEncoding::Raw)
            }
        }
    }

    /// Verify an ECDSA signature computed over `digest(message)`.
    pub fn verify_ecdsa(
        &self,
        digest: DigestAlgorithm,
        message: &[u8],
        signature: &[u8],
        encoding: SignatureEncoding,
    ) -> Result<(), Error> {
        if encoding == SignatureEncoding::Raw {
            let expected = self
                .curve()
                .signature_len()
                .ok_or(Error::UnsupportedCurve(self.curve()))?;
            if signature.len() != expected {
                return Err(Error::InvalidSignatureLength {
                    expected,
                    actual: signature.len(),
                });
            }
        }
        let prehash = digest.digest(message);
        let key = self.as_bytes();
        match self.curve() {
            Curve::P256 => verify_prehash!(NistP256, key, &prehash, signature, encoding, Curve::P256),
            Curve::P384 => verify_prehash!(NistP384, key, &prehash, signature, encoding, Curve::P384),
            Curve::P521 => verify_prehash!(NistP521, key, &prehash, signature, encoding, Curve::P521),
            curve => Err(Error::UnsupportedCurve(curve)),
        }
    }

    /// Verify an EdDSA signature over the full message.
    pub fn verify_eddsa(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self.curve() {
            Curve::Ed25519 => {
                let bytes: &[u8; 32] = self
                    .as_bytes()
                    .try_into()
                    .map_err(|_| Error::InvalidPublicKey(self.curve()))?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(bytes)
                    .map_err(|_| Error::InvalidPublicKey(self.curve()))?;
                let signature = ed25519_dalek::Signature::from_slice(signature).map_err(|_| {
                    Error::InvalidSignatureLength {
                        expected: 64,
                        actual: signature.len(),
                    }
                })?;
                key.verify(message, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
            curve => Err(Error::UnsupportedCurve(curve)),
        }
    }
}
