//! [IssuerSigned]: the issuer-signed items of a document and the `issuerAuth` signature over
//! their digests.

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::cose::CoseSign1;
use crate::crypto::DigestAlgorithm;
use crate::definitions::{
    helpers::{ByteStr, NonEmptyMap, NonEmptyVec, Tag24},
    DigestId,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSigned {
    #[serde(skip_serializing_if = "Option::is_none", rename = "nameSpaces")]
    pub namespaces: Option<IssuerNamespaces>,
    pub issuer_auth: CoseSign1,
}

pub type IssuerNamespaces = NonEmptyMap<String, NonEmptyVec<IssuerSignedItemBytes>>;
pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub digest_id: DigestId,

    /// Salt of at least 16 bytes, so that equal values do not share a digest.
    pub random: ByteStr,

    pub element_identifier: String,

    pub element_value: Value,
}

impl IssuerSignedItemBytes {
    /// Digest of the tagged encoding, as recorded in the MSO.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(self.tagged_bytes())
    }
}

impl IssuerSigned {
    /// Iterate over `(namespace, item)` pairs.
    pub fn items(&self) -> impl Iterator<Item = (&str, &IssuerSignedItemBytes)> {
        self.namespaces.iter().flat_map(|namespaces| {
            namespaces.iter().flat_map(|(namespace, items)| {
                items.iter().map(move |item| (namespace.as_str(), item))
            })
        })
    }
}
