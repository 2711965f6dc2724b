use elliptic_curve::sec1::ToEncodedPoint;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use super::{Curve, Error, PublicKey};

/// A private key able to run Diffie-Hellman with a peer's public key.
pub trait Agreer {
    fn curve(&self) -> Curve;

    fn public_key(&self) -> PublicKey;

    /// The shared secret `Z`: the x-coordinate for EC2 curves, the X25519 output otherwise.
    fn agree(&self, peer: &PublicKey) -> Result<Zeroizing<Vec<u8>>, Error>;
}

/// Ephemeral key of one side of a session (`EDeviceKey` or `EReaderKey`).
pub enum EphemeralKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
    X25519(x25519_dalek::StaticSecret),
}

impl EphemeralKey {
    pub fn generate<R: RngCore + CryptoRng>(curve: Curve, rng: &mut R) -> Result<Self, Error> {
        Ok(match curve {
            Curve::P256 => EphemeralKey::P256(p256::SecretKey::random(rng)),
            Curve::P384 => EphemeralKey::P384(p384::SecretKey::random(rng)),
            Curve::P521 => EphemeralKey::P521(p521::SecretKey::random(rng)),
            Curve::X25519 => {
                EphemeralKey::X25519(x25519_dalek::StaticSecret::random_from_rng(&mut *rng))
            }
            curve => return Err(Error::UnsupportedCurve(curve)),
        })
    }

    /// Restore a key from its private scalar.
    pub fn from_bytes(curve: Curve, d: &[u8]) -> Result<Self, Error> {
        let invalid = |_| Error::InvalidPrivateKey(curve);
        Ok(match curve {
            Curve::P256 => EphemeralKey::P256(p256::SecretKey::from_slice(d).map_err(invalid)?),
            Curve::P384 => EphemeralKey::P384(p384::SecretKey::from_slice(d).map_err(invalid)?),
            Curve::P521 => EphemeralKey::P521(p521::SecretKey::from_slice(d).map_err(invalid)?),
            Curve::X25519 => {
                let bytes: [u8; 32] = d
                    .try_into()
                    .map_err(|_| Error::InvalidPrivateKey(curve))?;
                EphemeralKey::X25519(x25519_dalek::StaticSecret::from(bytes))
            }
            curve => return Err(Error::UnsupportedCurve(curve)),
        })
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKey")
            .field("curve", &self.curve())
            .finish_non_exhaustive()
    }
}

impl Agreer for EphemeralKey {
    fn curve(&self) -> Curve {
        match self {
            EphemeralKey::P256(_) => Curve::P256,
            EphemeralKey::P384(_) => Curve::P384,
            EphemeralKey::P521(_) => Curve::P521,
            EphemeralKey::X25519(_) => Curve::X25519,
        }
    }

    fn public_key(&self) -> PublicKey {
        match self {
            EphemeralKey::P256(k) => PublicKey::from_trusted_bytes(
                Curve::P256,
                k.public_key().to_encoded_point(false).as_bytes(),
            ),
            EphemeralKey::P384(k) => PublicKey::from_trusted_bytes(
                Curve::P384,
                k.public_key().to_encoded_point(false).as_bytes(),
            ),
            EphemeralKey::P521(k) => PublicKey::from_trusted_bytes(
                Curve::P521,
                k.public_key().to_encoded_point(false).as_bytes(),
            ),
            EphemeralKey::X25519(k) => PublicKey::from_trusted_bytes(
                Curve::X25519,
                x25519_dalek::PublicKey::from(k).as_bytes(),
            ),
        }
    }

    fn agree(&self, peer: &PublicKey) -> Result<Zeroizing<Vec<u8>>, Error> {
        if peer.curve() != self.curve() {
            return Err(Error::CurveMismatch {
                expected: self.curve(),
                actual: peer.curve(),
            });
        }
        let invalid = |_| Error::InvalidPublicKey(peer.curve());
        let z = match self {
            EphemeralKey::P256(k) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer.as_bytes()).map_err(invalid)?;
                let shared = elliptic_curve::ecdh::diffie_hellman(
                    k.to_nonzero_scalar(),
                    peer.as_affine(),
                );
                shared.raw_secret_bytes().to_vec()
            }
            EphemeralKey::P384(k) => {
                let peer = p384::PublicKey::from_sec1_bytes(peer.as_bytes()).map_err(invalid)?;
                let shared = elliptic_curve::ecdh::diffie_hellman(
                    k.to_nonzero_scalar(),
                    peer.as_affine(),
                );
                shared.raw_secret_bytes().to_vec()
            }
            EphemeralKey::P521(k) => {
                let peer = p521::PublicKey::from_sec1_bytes(peer.as_bytes()).map_err(invalid)?;
                let shared = elliptic_curve::ecdh::diffie_hellman(
                    k.to_nonzero_scalar(),
                    peer.as_affine(),
                );
                shared.raw_secret_bytes().to_vec()
            }
            EphemeralKey::X25519(k) => {
                let bytes: [u8; 32] = peer
                    .as_bytes()
                    .try_into()
                    .map_err(|_| Error::InvalidPublicKey(Curve::X25519))?;
                let shared = k.diffie_hellman(&x25519_dalek::PublicKey::from(bytes));
                if !shared.was_contributory() {
                    return Err(Error::AgreementFailed);
                }
                shared.as_bytes().to_vec()
            }
        };
        Ok(Zeroizing::new(z))
    }
}
