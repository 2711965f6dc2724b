use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::definitions::helpers::{NonEmptyMap, NonEmptyVec};

pub mod cose_key;
pub use cose_key::CoseKey;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyInfo {
    pub device_key: CoseKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_authorizations: Option<KeyAuthorizations>,
    /// Issuer-defined signals, carried through unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_info: Option<BTreeMap<i64, Value>>,
}

impl From<CoseKey> for DeviceKeyInfo {
    fn from(device_key: CoseKey) -> Self {
        Self {
            device_key,
            key_authorizations: None,
            key_info: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyAuthorizations {
    #[serde(skip_serializing_if = "Option::is_none", rename = "nameSpaces")]
    pub namespaces: Option<NonEmptyVec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_elements: Option<NonEmptyMap<String, NonEmptyVec<String>>>,
}

impl KeyAuthorizations {
    /// If a namespace is present in authorized namespaces then it cannot be present in
    /// authorized data elements.
    pub fn validate(&self) -> Result<(), Error> {
        let (Some(namespaces), Some(data_elements)) = (&self.namespaces, &self.data_elements)
        else {
            return Ok(());
        };
        namespaces.iter().try_for_each(|namespace| {
            data_elements
                .get(namespace)
                .map_or(Ok(()), |_| Err(Error::DoubleAuthorized(namespace.clone())))
        })
    }

    /// Whether the device key may sign over `element_identifier` in `namespace`: the whole
    /// namespace is authorized, or the element is listed for it.
    pub fn permitted(&self, namespace: &str, element_identifier: &str) -> bool {
        let namespace_authorized = self
            .namespaces
            .as_ref()
            .is_some_and(|namespaces| namespaces.iter().any(|ns| ns == namespace));
        let element_authorized = self
            .data_elements
            .as_ref()
            .and_then(|elements| elements.get(namespace))
            .is_some_and(|ids| ids.iter().any(|id| id == element_identifier));
        namespace_authorized || element_authorized
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("namespace '{0}' cannot be present in both authorized_namespaces and authorized_data_elements")]
    DoubleAuthorized(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use std::collections::BTreeMap;

    fn authorizations(namespaces: &[&str], elements: &[(&str, &[&str])]) -> KeyAuthorizations {
        KeyAuthorizations {
            namespaces: NonEmptyVec::maybe_new(namespaces.iter().map(|s| s.to_string()).collect()),
            data_elements: NonEmptyMap::maybe_new(
                elements
                    .iter()
                    .map(|(ns, ids)| {
                        (
                            ns.to_string(),
                            NonEmptyVec::maybe_new(ids.iter().map(|s| s.to_string()).collect())
                                .unwrap(),
                        )
                    })
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }

    #[test]
    fn namespace_or_element_is_enough() {
        let auth = authorizations(&["org.example.a"], &[("org.example.b", &["x"])]);
        assert!(auth.permitted("org.example.a", "anything"));
        assert!(auth.permitted("org.example.b", "x"));
        assert!(!auth.permitted("org.example.b", "y"));
        assert!(!auth.permitted("org.example.c", "x"));
        assert!(!KeyAuthorizations::default().permitted("org.example.a", "x"));
    }

    #[test]
    fn double_authorization_is_invalid() {
        let auth = authorizations(&["org.example.a"], &[("org.example.a", &["x"])]);
        assert!(matches!(auth.validate(), Err(Error::DoubleAuthorized(_))));
        assert!(authorizations(&["org.example.a"], &[]).validate().is_ok());
    }

    #[test]
    fn wire_names() {
        let auth = authorizations(&["org.example.a"], &[("org.example.b", &["x"])]);
        let value = cbor::into_value(&auth).unwrap();
        let keys: Vec<_> = value
            .as_map()
            .unwrap()
            .iter()
            .filter_map(|(k, _)| k.as_text().map(str::to_string))
            .collect();
        assert_eq!(keys, vec!["nameSpaces", "dataElements"]);
    }
}
