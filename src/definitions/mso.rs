use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::DigestAlgorithm;
use crate::definitions::{helpers::ByteStr, DeviceKeyInfo, ValidityInfo};

pub type DigestId = u64;
pub type DigestIds = BTreeMap<DigestId, ByteStr>;

pub const MSO_VERSION: &str = "1.0";

/// Mobile security object: the issuer-signed digests of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mso {
    pub version: String,
    pub digest_algorithm: DigestAlgorithm,
    pub value_digests: BTreeMap<String, DigestIds>,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: String,
    pub validity_info: ValidityInfo,
}

impl Mso {
    /// The digest recorded for `digest_id` in `namespace`.
    pub fn digest(&self, namespace: &str, digest_id: DigestId) -> Option<&[u8]> {
        self.value_digests
            .get(namespace)
            .and_then(|ids| ids.get(&digest_id))
            .map(AsRef::as_ref)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use crate::crypto::{Curve, EphemeralKey, Agreer};
    use crate::definitions::CoseKey;
    use rand::rngs::OsRng;
    use time::macros::datetime;

    #[test]
    fn wire_names() {
        let key = EphemeralKey::generate(Curve::P256, &mut OsRng).unwrap();
        let mut digests = DigestIds::new();
        digests.insert(7, ByteStr::from(vec![0xaa; 32]));
        let mso = Mso {
            version: MSO_VERSION.into(),
            digest_algorithm: DigestAlgorithm::SHA256,
            value_digests: [("org.iso.18013.5.1".to_string(), digests)].into(),
            device_key_info: CoseKey::from(key.public_key()).into(),
            doc_type: "org.iso.18013.5.1.mDL".into(),
            validity_info: ValidityInfo {
                signed: datetime!(2024-01-01 0:00 UTC),
                valid_from: datetime!(2024-01-01 0:00 UTC),
                valid_until: datetime!(2025-01-01 0:00 UTC),
                expected_update: None,
            },
        };
        let value = cbor::into_value(&mso).unwrap();
        let keys: Vec<_> = value
            .as_map()
            .unwrap()
            .iter()
            .filter_map(|(k, _)| k.as_text())
            .collect();
        assert_eq!(
            keys,
            [
                "version",
                "digestAlgorithm",
                "valueDigests",
                "deviceKeyInfo",
                "docType",
                "validityInfo"
            ]
        );
        let decoded: Mso = cbor::from_slice(&cbor::to_vec(&mso).unwrap()).unwrap();
        assert_eq!(decoded, mso);
        assert_eq!(decoded.digest("org.iso.18013.5.1", 7), Some(&[0xaa; 32][..]));
        assert_eq!(decoded.digest("org.iso.18013.5.1", 8), None);
    }
}
