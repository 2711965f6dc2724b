//! Device-signed data of a document and the structure the device key signs over.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cose::{CoseMac0, CoseSign1};
use crate::definitions::{
    helpers::{NonEmptyMap, Tag24},
    session::SessionTranscript,
};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSigned {
    #[serde(rename = "nameSpaces")]
    pub namespaces: DeviceNamespacesBytes,
    pub device_auth: DeviceAuth,
}

pub type DeviceNamespacesBytes = Tag24<DeviceNamespaces>;
pub type DeviceNamespaces = BTreeMap<String, DeviceSignedItems>;
pub type DeviceSignedItems = NonEmptyMap<String, ciborium::Value>;

/// Exactly one of `deviceSignature` or `deviceMac`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAuth {
    DeviceSignature(CoseSign1),
    DeviceMac(CoseMac0),
}

pub type DeviceAuthenticationBytes = Tag24<DeviceAuthentication>;

/// `["DeviceAuthentication", SessionTranscript, DocType, DeviceNameSpacesBytes]`.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceAuthentication(
    &'static str,
    SessionTranscript,
    String,
    DeviceNamespacesBytes,
);

impl DeviceAuthentication {
    pub fn new(
        transcript: SessionTranscript,
        doc_type: String,
        namespaces_bytes: DeviceNamespacesBytes,
    ) -> Self {
        Self(
            "DeviceAuthentication",
            transcript,
            doc_type,
            namespaces_bytes,
        )
    }
}

impl DeviceSigned {
    /// The device-signed value of `element_identifier` in `namespace`.
    pub fn element(&self, namespace: &str, element_identifier: &str) -> Option<&ciborium::Value> {
        self.namespaces
            .as_ref()
            .get(namespace)
            .and_then(|items| items.get(element_identifier))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use crate::cose::{HeaderMap, ProtectedHeader};
    use ciborium::Value;

    fn mac0() -> CoseMac0 {
        CoseMac0 {
            protected: ProtectedHeader::new(HeaderMap::new()).unwrap(),
            unprotected: HeaderMap::new(),
            payload: None,
            tag: vec![0; 32],
        }
    }

    #[test]
    fn device_auth_is_a_single_entry_map() {
        let auth = DeviceAuth::DeviceMac(mac0());
        let value = cbor::into_value(&auth).unwrap();
        let entries = value.as_map().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, Value::Text("deviceMac".into()));
        let decoded: DeviceAuth = cbor::from_slice(&cbor::to_vec(&auth).unwrap()).unwrap();
        assert_eq!(decoded, auth);
    }

    #[test]
    fn both_authentications_are_rejected() {
        let mac = cbor::into_value(&mac0()).unwrap();
        let value = Value::Map(vec![
            (Value::Text("deviceMac".into()), mac.clone()),
            (Value::Text("deviceSignature".into()), mac),
        ]);
        assert!(cbor::from_value::<DeviceAuth>(&value).is_err());
    }

    #[test]
    fn empty_device_namespaces_are_allowed() {
        let namespaces = Tag24::new(DeviceNamespaces::new()).unwrap();
        assert_eq!(namespaces.untagged_bytes(), &[0xa0]);
        let signed = DeviceSigned {
            namespaces,
            device_auth: DeviceAuth::DeviceMac(mac0()),
        };
        assert!(signed.element("org.iso.18013.5.1", "family_name").is_none());
    }
}
