//! CBOR data structures of ISO/IEC 18013-5.
pub mod device_engagement;
pub mod device_key;
pub mod device_request;
pub mod device_response;
pub mod device_signed;
pub mod element_value;
pub mod helpers;
pub mod issuer_signed;
pub mod mso;
pub mod session;
pub mod validity_info;
pub mod x509;

pub use device_engagement::{
    BleOptions, DeviceEngagement, DeviceRetrievalMethod, NfcOptions, RetrievalOptions, Security,
    WifiOptions,
};
pub use device_key::cose_key::EC2Y;
pub use device_key::{CoseKey, DeviceKeyInfo, KeyAuthorizations};
pub use device_request::{DeviceRequest, DocRequest, ItemsRequest};
pub use device_response::{DeviceResponse, Document};
pub use device_signed::{DeviceAuth, DeviceSigned};
pub use element_value::{ElementType, TypedElement, TypedNamespaces};
pub use issuer_signed::{IssuerSigned, IssuerSignedItem};
pub use mso::{DigestId, DigestIds, Mso};
pub use session::{
    Handover, SessionData, SessionEncryption, SessionEstablishment, SessionTranscript,
};
pub use validity_info::ValidityInfo;
