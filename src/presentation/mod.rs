//! Presentation of mdocs: the holder ([device]) and reader ([reader]) sides of a session, and
//! [authentication] of what the holder presents.
pub mod authentication;
pub mod device;
pub mod reader;

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    cbor::{self, CborError},
    definitions::{DeviceResponse, IssuerSigned},
};

#[derive(Debug, thiserror::Error)]
pub enum StringifyError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Cbor(#[from] CborError),
}

/// Serialization of [CBOR](https://cbor.io) objects to and from base64url text.
pub trait Stringify: Serialize + DeserializeOwned {
    /// Serialize to the unpadded base64url encoding of the CBOR representation.
    fn stringify(&self) -> Result<String, StringifyError> {
        let data = cbor::to_vec(self)?;
        Ok(base64::encode_config(data, base64::URL_SAFE_NO_PAD))
    }

    /// Deserialize an object returned by [Stringify::stringify].
    fn parse(encoded: &str) -> Result<Self, StringifyError> {
        let data = base64::decode_config(encoded.trim(), base64::URL_SAFE_NO_PAD)?;
        Ok(cbor::from_slice(&data)?)
    }
}

impl Stringify for IssuerSigned {}
impl Stringify for DeviceResponse {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn device_response_survives_stringify() {
        let response = DeviceResponse::with_status(
            crate::definitions::device_response::Status::GeneralError,
        );
        let encoded = response.stringify().unwrap();
        assert!(!encoded.contains('='));
        assert_eq!(DeviceResponse::parse(&encoded).unwrap(), response);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            IssuerSigned::parse("not base64!"),
            Err(StringifyError::Base64(_))
        ));
    }
}
