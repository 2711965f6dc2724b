use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

use crate::definitions::{
    helpers::{NonEmptyMap, NonEmptyVec},
    DeviceSigned, IssuerSigned,
};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Documents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_errors: Option<DocumentErrors>,
    pub status: Status,
}

pub type Documents = NonEmptyVec<Document>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub doc_type: String,
    pub issuer_signed: IssuerSigned,
    pub device_signed: DeviceSigned,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Errors>,
}

/// Errors mapped by namespace and element identifier.
pub type Errors = NonEmptyMap<String, NonEmptyMap<String, DocumentErrorCode>>;
/// A list of document errors.
pub type DocumentErrors = NonEmptyVec<DocumentError>;
/// A map of document type to the error for it.
pub type DocumentError = BTreeMap<String, DocumentErrorCode>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "i64", into = "i64")]
pub enum DocumentErrorCode {
    DataNotReturned,
    ApplicationSpecific(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, EnumString, AsRefStr)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    OK,
    GeneralError,
    CborDecodingError,
    CborValidationError,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("unrecognised device response status: {0}")]
    InvalidStatus(u64),
}

impl DeviceResponse {
    pub const VERSION: &'static str = "1.0";

    /// A response carrying only a status, for requests that could not be processed at all.
    pub fn with_status(status: Status) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            documents: None,
            document_errors: None,
            status,
        }
    }
}

impl From<i64> for DocumentErrorCode {
    fn from(value: i64) -> Self {
        match value {
            0 => DocumentErrorCode::DataNotReturned,
            _ => DocumentErrorCode::ApplicationSpecific(value),
        }
    }
}

impl From<DocumentErrorCode> for i64 {
    fn from(c: DocumentErrorCode) -> i64 {
        match c {
            DocumentErrorCode::DataNotReturned => 0,
            DocumentErrorCode::ApplicationSpecific(i) => i,
        }
    }
}

impl From<Status> for u64 {
    fn from(s: Status) -> u64 {
        match s {
            Status::OK => 0,
            Status::GeneralError => 10,
            Status::CborDecodingError => 11,
            Status::CborValidationError => 12,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(n: u64) -> Result<Status, Error> {
        match n {
            0 => Ok(Status::OK),
            10 => Ok(Status::GeneralError),
            11 => Ok(Status::CborDecodingError),
            12 => Ok(Status::CborValidationError),
            _ => Err(Error::InvalidStatus(n)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use crate::cose::CoseSign1;
    use crate::definitions::device_signed::{DeviceAuth, DeviceNamespaces, DeviceNamespacesBytes};
    use crate::definitions::helpers::{ByteStr, Tag24};
    use crate::definitions::issuer_signed::{IssuerNamespaces, IssuerSignedItem};
    use ciborium::Value;
    use hex_literal::hex;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn document() -> Document {
        let key = SigningKey::random(&mut OsRng);
        let cose_sign1 = CoseSign1::builder()
            .payload(b"payload".to_vec())
            .sign(&key)
            .unwrap();
        let item = Tag24::new(IssuerSignedItem {
            digest_id: 0,
            random: ByteStr::from(vec![0; 16]),
            element_identifier: "a".to_string(),
            element_value: Value::Text("b".to_string()),
        })
        .unwrap();
        let errors = Errors::new(
            "org.example".to_string(),
            NonEmptyMap::new("c".to_string(), DocumentErrorCode::DataNotReturned),
        );
        Document {
            doc_type: "org.example.doc".to_string(),
            issuer_signed: IssuerSigned {
                namespaces: Some(IssuerNamespaces::new(
                    "org.example".to_string(),
                    NonEmptyVec::new(item),
                )),
                issuer_auth: cose_sign1.clone(),
            },
            device_signed: DeviceSigned {
                namespaces: DeviceNamespacesBytes::new(DeviceNamespaces::new()).unwrap(),
                device_auth: DeviceAuth::DeviceSignature(cose_sign1),
            },
            errors: Some(errors),
        }
    }

    #[test]
    fn document_round_trip() {
        let response = DeviceResponse {
            documents: Some(NonEmptyVec::new(document())),
            ..DeviceResponse::with_status(Status::OK)
        };
        let bytes = cbor::to_vec(&response).unwrap();
        let decoded: DeviceResponse = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(cbor::to_vec(&decoded).unwrap(), bytes);
    }

    #[test]
    fn status_and_document_errors() {
        let mut document_error = DocumentError::new();
        document_error.insert("org.example.doc".to_string(), DocumentErrorCode::DataNotReturned);
        let response = DeviceResponse {
            document_errors: Some(NonEmptyVec::new(document_error)),
            ..DeviceResponse::with_status(Status::CborValidationError)
        };
        let bytes = cbor::to_vec(&response).unwrap();
        // {"status": 12, "version": "1.0", "documentErrors": [{"org.example.doc": 0}]}
        assert_eq!(&bytes[..9], &hex!("a3 66 737461747573 0c"));
        let decoded: DeviceResponse = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded.status, Status::CborValidationError);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(matches!(Status::try_from(3), Err(Error::InvalidStatus(3))));
        assert_eq!(
            DocumentErrorCode::from(-5),
            DocumentErrorCode::ApplicationSpecific(-5)
        );
    }
}
