use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::cose::CoseSign1;
use crate::definitions::{
    helpers::{NonEmptyMap, NonEmptyVec, Tag24},
    session::SessionTranscript,
};

pub type ItemsRequestBytes = Tag24<ItemsRequest>;
pub type DocType = String;
pub type NameSpace = String;
pub type IntentToRetain = bool;
pub type DataElementIdentifier = String;
pub type DataElements = NonEmptyMap<DataElementIdentifier, IntentToRetain>;
pub type Namespaces = NonEmptyMap<NameSpace, DataElements>;
pub type ReaderAuth = CoseSign1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub version: String,
    pub doc_requests: NonEmptyVec<DocRequest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRequest {
    pub items_request: ItemsRequestBytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_auth: Option<ReaderAuth>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsRequest {
    pub doc_type: DocType,
    #[serde(rename = "nameSpaces")]
    pub namespaces: Namespaces,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_info: Option<BTreeMap<String, Value>>,
}

impl DeviceRequest {
    pub const VERSION: &'static str = "1.0";
}

pub type ReaderAuthenticationBytes = Tag24<ReaderAuthentication>;

/// `["ReaderAuthentication", SessionTranscript, ItemsRequestBytes]`.
#[derive(Clone, Debug, Serialize)]
pub struct ReaderAuthentication(&'static str, SessionTranscript, ItemsRequestBytes);

impl ReaderAuthentication {
    pub fn new(transcript: SessionTranscript, items_request: ItemsRequestBytes) -> Self {
        Self("ReaderAuthentication", transcript, items_request)
    }
}

impl ItemsRequest {
    /// Iterate over the requested `(namespace, element identifier)` pairs.
    pub fn requested(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces.iter().flat_map(|(namespace, elements)| {
            elements
                .keys()
                .map(move |element| (namespace.as_str(), element.as_str()))
        })
    }
}
