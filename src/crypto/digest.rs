use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Digest algorithms allowed for the value digests of a mobile security object.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    SHA256,
    #[serde(rename = "SHA-384")]
    SHA384,
    #[serde(rename = "SHA-512")]
    SHA512,
}

impl DigestAlgorithm {
    pub fn digest(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::SHA256 => Sha256::digest(bytes).to_vec(),
            DigestAlgorithm::SHA384 => Sha384::digest(bytes).to_vec(),
            DigestAlgorithm::SHA512 => Sha512::digest(bytes).to_vec(),
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::SHA256 => 32,
            DigestAlgorithm::SHA384 => 48,
            DigestAlgorithm::SHA512 => 64,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use hex_literal::hex;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            DigestAlgorithm::SHA256.digest(b""),
            hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[test]
    fn serialized_names() {
        let bytes = cbor::to_vec(&DigestAlgorithm::SHA384).unwrap();
        assert_eq!(cbor::from_slice::<String>(&bytes).unwrap(), "SHA-384");
        for alg in [
            DigestAlgorithm::SHA256,
            DigestAlgorithm::SHA384,
            DigestAlgorithm::SHA512,
        ] {
            assert_eq!(alg.digest(b"mdoc").len(), alg.output_len());
        }
    }
}
