use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use super::{DigestAlgorithm, Error};

/// COSE key type of a curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Octet key pair, `kty = 1`.
    Okp,
    /// Elliptic curve with x and y coordinates, `kty = 2`.
    Ec2,
}

impl KeyType {
    pub fn cose_id(self) -> i64 {
        match self {
            KeyType::Okp => 1,
            KeyType::Ec2 => 2,
        }
    }
}

/// COSE signature algorithms used by mdoc signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SignatureAlgorithm {
    ES256,
    ES384,
    ES512,
    EdDSA,
}

impl SignatureAlgorithm {
    pub fn cose_id(self) -> i64 {
        match self {
            SignatureAlgorithm::ES256 => -7,
            SignatureAlgorithm::ES384 => -35,
            SignatureAlgorithm::ES512 => -36,
            SignatureAlgorithm::EdDSA => -8,
        }
    }

    pub fn from_cose_id(id: i64) -> Option<Self> {
        match id {
            -7 => Some(SignatureAlgorithm::ES256),
            -35 => Some(SignatureAlgorithm::ES384),
            -36 => Some(SignatureAlgorithm::ES512),
            -8 => Some(SignatureAlgorithm::EdDSA),
            _ => None,
        }
    }

    /// Hash applied to the message before signing. EdDSA signs the full message.
    pub fn digest_algorithm(self) -> Option<DigestAlgorithm> {
        match self {
            SignatureAlgorithm::ES256 => Some(DigestAlgorithm::SHA256),
            SignatureAlgorithm::ES384 => Some(DigestAlgorithm::SHA384),
            SignatureAlgorithm::ES512 => Some(DigestAlgorithm::SHA512),
            SignatureAlgorithm::EdDSA => None,
        }
    }
}

/// How a device key may authenticate a device response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKeyMode {
    /// `deviceSignature`: the key signs `DeviceAuthentication`.
    Signature,
    /// `deviceMac`: the key agrees on an `EMacKey`.
    Mac,
}

/// Curves of the ISO 18013-5 cipher suite registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
pub enum Curve {
    #[strum(serialize = "P-256")]
    #[serde(rename = "P-256")]
    P256,
    #[strum(serialize = "P-384")]
    #[serde(rename = "P-384")]
    P384,
    #[strum(serialize = "P-521")]
    #[serde(rename = "P-521")]
    P521,
    X25519,
    X448,
    Ed25519,
    Ed448,
    #[strum(serialize = "brainpoolP256r1")]
    #[serde(rename = "brainpoolP256r1")]
    BrainpoolP256r1,
    #[strum(serialize = "brainpoolP320r1")]
    #[serde(rename = "brainpoolP320r1")]
    BrainpoolP320r1,
    #[strum(serialize = "brainpoolP384r1")]
    #[serde(rename = "brainpoolP384r1")]
    BrainpoolP384r1,
    #[strum(serialize = "brainpoolP512r1")]
    #[serde(rename = "brainpoolP512r1")]
    BrainpoolP512r1,
}

impl Curve {
    /// Identifier in the IANA COSE Elliptic Curves registry.
    pub fn cose_id(self) -> i64 {
        match self {
            Curve::P256 => 1,
            Curve::P384 => 2,
            Curve::P521 => 3,
            Curve::X25519 => 4,
            Curve::X448 => 5,
            Curve::Ed25519 => 6,
            Curve::Ed448 => 7,
            Curve::BrainpoolP256r1 => 256,
            Curve::BrainpoolP320r1 => 257,
            Curve::BrainpoolP384r1 => 258,
            Curve::BrainpoolP512r1 => 259,
        }
    }

    pub fn from_cose_id(id: i64) -> Result<Self, Error> {
        Ok(match id {
            1 => Curve::P256,
            2 => Curve::P384,
            3 => Curve::P521,
            4 => Curve::X25519,
            5 => Curve::X448,
            6 => Curve::Ed25519,
            7 => Curve::Ed448,
            256 => Curve::BrainpoolP256r1,
            257 => Curve::BrainpoolP320r1,
            258 => Curve::BrainpoolP384r1,
            259 => Curve::BrainpoolP512r1,
            _ => return Err(Error::UnknownCurve(id)),
        })
    }

    pub fn key_type(self) -> KeyType {
        match self {
            Curve::X25519 | Curve::X448 | Curve::Ed25519 | Curve::Ed448 => KeyType::Okp,
            _ => KeyType::Ec2,
        }
    }

    /// Length in bytes of a field element (one coordinate).
    pub fn coordinate_len(self) -> usize {
        match self {
            Curve::P256 | Curve::BrainpoolP256r1 | Curve::X25519 | Curve::Ed25519 => 32,
            Curve::BrainpoolP320r1 => 40,
            Curve::P384 | Curve::BrainpoolP384r1 => 48,
            Curve::X448 => 56,
            Curve::Ed448 => 57,
            Curve::BrainpoolP512r1 => 64,
            Curve::P521 => 66,
        }
    }

    /// COSE algorithm of signatures made with a key on this curve, if it can sign.
    pub fn signature_algorithm(self) -> Option<SignatureAlgorithm> {
        match self {
            Curve::P256 | Curve::BrainpoolP256r1 => Some(SignatureAlgorithm::ES256),
            Curve::P384 | Curve::BrainpoolP320r1 | Curve::BrainpoolP384r1 => {
                Some(SignatureAlgorithm::ES384)
            }
            Curve::P521 | Curve::BrainpoolP512r1 => Some(SignatureAlgorithm::ES512),
            Curve::Ed25519 | Curve::Ed448 => Some(SignatureAlgorithm::EdDSA),
            Curve::X25519 | Curve::X448 => None,
        }
    }

    /// Size of a raw signature: `r || s` for ECDSA, the fixed EdDSA encoding otherwise.
    pub fn signature_len(self) -> Option<usize> {
        match self {
            Curve::X25519 | Curve::X448 => None,
            Curve::Ed448 => Some(114),
            _ => Some(2 * self.coordinate_len()),
        }
    }

    /// Whether a reader authentication key may live on this curve.
    pub fn supports_reader_auth(self) -> bool {
        self.signature_algorithm().is_some()
    }

    /// Device authentication modes available to a device key on this curve.
    pub fn device_key_modes(self) -> &'static [DeviceKeyMode] {
        match self {
            Curve::Ed25519 | Curve::Ed448 => &[DeviceKeyMode::Signature],
            Curve::X25519 | Curve::X448 => &[DeviceKeyMode::Mac],
            _ => &[DeviceKeyMode::Signature, DeviceKeyMode::Mac],
        }
    }

    /// Whether this crate can sign and verify with keys on this curve.
    pub fn can_sign(self) -> bool {
        matches!(
            self,
            Curve::P256 | Curve::P384 | Curve::P521 | Curve::Ed25519
        )
    }

    /// Whether this crate can run key agreement with keys on this curve.
    pub fn can_agree(self) -> bool {
        matches!(
            self,
            Curve::P256 | Curve::P384 | Curve::P521 | Curve::X25519
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn cose_ids_round_trip() {
        for curve in Curve::iter() {
            assert_eq!(Curve::from_cose_id(curve.cose_id()).unwrap(), curve);
        }
        assert!(Curve::from_cose_id(42).is_err());
    }

    #[test]
    fn ecdsa_signature_sizes() {
        assert_eq!(Curve::P256.signature_len(), Some(64));
        assert_eq!(Curve::P384.signature_len(), Some(96));
        assert_eq!(Curve::P521.signature_len(), Some(132));
        assert_eq!(Curve::X25519.signature_len(), None);
    }

    #[test]
    fn capabilities() {
        assert!(Curve::BrainpoolP384r1.supports_reader_auth());
        assert!(!Curve::X448.supports_reader_auth());
        assert_eq!(Curve::X25519.device_key_modes(), &[DeviceKeyMode::Mac]);
        assert!(!Curve::Ed448.can_sign());
        assert!(Curve::X25519.can_agree());
    }

    #[test]
    fn parse_names() {
        assert_eq!(Curve::from_str("P-384").unwrap(), Curve::P384);
        assert_eq!(Curve::from_str("brainpoolP320r1").unwrap(), Curve::BrainpoolP320r1);
        assert_eq!(Curve::Ed25519.to_string(), "Ed25519");
    }
}
