use crate::cbor::CborError;
use crate::crypto;
use crate::definitions::helpers::tag24;

/// Errors that can occur when decoding a [DeviceEngagement](super::DeviceEngagement).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected device engagement version 1.0, received {0}")]
    UnsupportedVersion(String),
    #[error("malformed device engagement: {0}")]
    Malformed(&'static str),
    #[error("unrecognized device retrieval method type {0}")]
    UnrecognizedRetrievalMethod(i128),
    #[error("a BLE UUID must be 16 bytes")]
    InvalidUuid,
    #[error("invalid BLE options: {0}")]
    InvalidBleOptions(&'static str),
    #[error("invalid NFC options: {0}")]
    InvalidNfcOptions(&'static str),
    #[error("invalid Wi-Fi Aware options: {0}")]
    InvalidWifiOptions(&'static str),
    #[error("QR code must start with 'mdoc:'")]
    InvalidQrCodePrefix,
    #[error("QR code is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
    #[error(transparent)]
    Tag24(#[from] tag24::Error),
    #[error(transparent)]
    Cbor(#[from] CborError),
}
