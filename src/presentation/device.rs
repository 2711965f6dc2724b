//! This module is responsible for the device's interaction with the reader.
//!
//! It handles this through the **state pattern**:
//!
//! ```text
//! SessionManagerInit --qr_engagement / nfc_engagement--> SessionManagerEngaged
//! SessionManagerEngaged --process_session_establishment--> SessionManager
//! SessionManager --handle_request--> (request pending) --respond--> SessionManager
//! ```
//!
//! The response itself is assembled by [create_device_response], which can also be used
//! without a session manager.
use std::collections::{BTreeMap, BTreeSet};

use ciborium::Value;
use rand::{CryptoRng, RngCore};
use time::OffsetDateTime;
use x509_cert::Certificate;

use super::authentication::{self, AuthenticationStatus};
use crate::{
    cbor::{self, CborError},
    cose::{sign1, CoseSign1},
    crypto::{self, Agreer, Curve, EphemeralKey, Signer},
    definitions::{
        device_engagement::{self, DeviceEngagementBytes, DeviceRetrievalMethods},
        device_key::cose_key,
        device_request::{DeviceRequest, DocRequest, ItemsRequest},
        device_response::{
            Document, DocumentError, DocumentErrorCode, DocumentErrors, Errors, Status,
        },
        device_signed::{
            DeviceAuth, DeviceAuthentication, DeviceNamespaces, DeviceSigned, DeviceSignedItems,
        },
        helpers::{tag24, ByteStr, NonEmptyMap, NonEmptyVec, Tag24},
        issuer_signed::{IssuerNamespaces, IssuerSignedItemBytes},
        session::{
            self, derive_session_keys, Device, NfcHandover, Status as SessionStatus,
        },
        DeviceEngagement, DeviceResponse, Handover, IssuerSigned, SessionData,
        SessionEncryption, SessionEstablishment, SessionTranscript,
    },
    issuance::Mdoc,
};

/// Various errors that can occur during the interaction with the reader.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported DeviceRequest version: {0}")]
    UnsupportedDeviceRequestVersion(String),
    #[error("holder owns no document of type '{0}'")]
    UnknownDocType(String),
    #[error("the device key does not match the device key of the '{0}' MSO")]
    DeviceKeyMismatch(String),
    #[error("device MAC authentication is not supported")]
    MACAuthNotSupported,
    #[error("age_over element identifier is malformed: {0}")]
    MalformedAgeOver(String),
    #[error("no request is awaiting a response")]
    NoPendingRequest,
    #[error("the reader terminated the session")]
    SessionTerminated,
    #[error("session data carried neither data nor status")]
    EmptySessionData,
    #[error("invalid reader key: {0}")]
    ReaderKey(cose_key::Error),
    #[error("invalid device key: {0}")]
    DeviceKey(cose_key::Error),
    #[error(transparent)]
    Authentication(#[from] authentication::Error),
    #[error(transparent)]
    DeviceEngagement(#[from] device_engagement::Error),
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error(transparent)]
    Cose(#[from] sign1::Error),
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
    #[error(transparent)]
    Tag24(#[from] tag24::Error),
    #[error(transparent)]
    Cbor(#[from] CborError),
}

type Result<T, E = Error> = std::result::Result<T, E>;

type DocType = String;
type Namespace = String;
type ElementIdentifier = String;

/// Issuer-signed documents of the holder, by document type.
pub type IssuerSigneds = BTreeMap<DocType, IssuerSigned>;
/// Device-signed elements of the holder, by document type.
pub type DeviceSigneds = BTreeMap<DocType, DeviceNamespaces>;
/// The items the holder consents to share, grouped by document type and namespace.
pub type PermittedItems = BTreeMap<DocType, BTreeMap<Namespace, Vec<ElementIdentifier>>>;

/// Build the response to `request` from the holder's documents.
///
/// Every requested document the holder cannot return is reported in `documentErrors`, and every
/// requested element that is not returned is reported in the `errors` of its document. The
/// response status is OK unless the request itself is unusable.
pub fn create_device_response<S: Signer + ?Sized>(
    request: &DeviceRequest,
    issuer_signeds: &IssuerSigneds,
    device_signeds: &DeviceSigneds,
    s_device_key: &S,
    session_transcript: &SessionTranscript,
) -> Result<DeviceResponse> {
    if request.version != DeviceRequest::VERSION {
        return Err(Error::UnsupportedDeviceRequestVersion(
            request.version.clone(),
        ));
    }

    let mut documents = Vec::new();
    let mut document_errors: Vec<DocumentError> = Vec::new();
    for DocRequest { items_request, .. } in request.doc_requests.iter() {
        let items_request = items_request.as_ref();
        let doc_type = &items_request.doc_type;
        let result = issuer_signeds
            .get(doc_type)
            .ok_or_else(|| Error::UnknownDocType(doc_type.clone()))
            .and_then(|issuer_signed| {
                create_document(
                    items_request,
                    issuer_signed,
                    device_signeds.get(doc_type),
                    s_device_key,
                    session_transcript,
                )
            });
        match result {
            Ok(document) => documents.push(document),
            Err(e) => {
                tracing::warn!("document '{doc_type}' not returned: {e}");
                document_errors.push(data_not_returned(doc_type));
            }
        }
    }

    Ok(DeviceResponse {
        version: DeviceResponse::VERSION.to_string(),
        documents: NonEmptyVec::maybe_new(documents),
        document_errors: DocumentErrors::maybe_new(document_errors),
        status: Status::OK,
    })
}

fn data_not_returned(doc_type: &str) -> DocumentError {
    [(doc_type.to_string(), DocumentErrorCode::DataNotReturned)].into()
}

fn create_document<S: Signer + ?Sized>(
    items_request: &ItemsRequest,
    issuer_signed: &IssuerSigned,
    device_namespaces: Option<&DeviceNamespaces>,
    s_device_key: &S,
    session_transcript: &SessionTranscript,
) -> Result<Document> {
    let doc_type = items_request.doc_type.clone();
    let mso = issuer_signed.mso()?.into_inner();
    let device_key = mso
        .device_key_info
        .device_key
        .to_public_key()
        .map_err(Error::DeviceKey)?;
    if !device_key.curve().can_sign() {
        return Err(Error::MACAuthNotSupported);
    }
    if device_key != s_device_key.public_key() {
        return Err(Error::DeviceKeyMismatch(doc_type));
    }

    let mut remaining: BTreeSet<(&str, &str)> = items_request.requested().collect();

    let mut issuer_namespaces: BTreeMap<Namespace, Vec<IssuerSignedItemBytes>> = BTreeMap::new();
    let mut covered = Vec::new();
    for &(namespace, element_identifier) in remaining.iter() {
        let Some(items) = issuer_signed
            .namespaces
            .as_ref()
            .and_then(|namespaces| namespaces.get(namespace))
        else {
            continue;
        };
        let item = match items
            .iter()
            .find(|item| item.as_ref().element_identifier == element_identifier)
        {
            Some(item) => Some(item.clone()),
            None if element_identifier.starts_with(AGE_OVER_PREFIX) => {
                match nearest_age_attestation(element_identifier, items) {
                    Ok(item) => item,
                    Err(e) => {
                        tracing::warn!(
                            "'{element_identifier}' in '{namespace}' not returned: {e}"
                        );
                        None
                    }
                }
            }
            None => None,
        };
        if let Some(item) = item {
            let returned = issuer_namespaces.entry(namespace.to_string()).or_default();
            if !returned.contains(&item) {
                returned.push(item);
            }
            covered.push((namespace, element_identifier));
        }
    }
    for key in covered.drain(..) {
        remaining.remove(&key);
    }

    let authorizations = mso.device_key_info.key_authorizations.unwrap_or_default();
    let mut device_signed_items: DeviceNamespaces = BTreeMap::new();
    if let Some(device_namespaces) = device_namespaces {
        for &(namespace, element_identifier) in remaining.iter() {
            if !authorizations.permitted(namespace, element_identifier) {
                continue;
            }
            let Some(value) = device_namespaces
                .get(namespace)
                .and_then(|items| items.get(element_identifier))
            else {
                continue;
            };
            insert_device_signed(
                &mut device_signed_items,
                namespace,
                element_identifier,
                value.clone(),
            );
            covered.push((namespace, element_identifier));
        }
    }
    for key in covered.drain(..) {
        remaining.remove(&key);
    }

    let mut errors: BTreeMap<Namespace, NonEmptyMap<ElementIdentifier, DocumentErrorCode>> =
        BTreeMap::new();
    for (namespace, element_identifier) in remaining {
        match errors.get_mut(namespace) {
            Some(namespace_errors) => {
                namespace_errors.insert(
                    element_identifier.to_string(),
                    DocumentErrorCode::DataNotReturned,
                );
            }
            None => {
                errors.insert(
                    namespace.to_string(),
                    NonEmptyMap::new(
                        element_identifier.to_string(),
                        DocumentErrorCode::DataNotReturned,
                    ),
                );
            }
        }
    }

    let device_namespaces_bytes = Tag24::new(device_signed_items)?;
    let device_authentication = Tag24::new(DeviceAuthentication::new(
        session_transcript.clone(),
        doc_type.clone(),
        device_namespaces_bytes.clone(),
    ))?;
    let device_signature = CoseSign1::builder()
        .detached_payload(device_authentication.tagged_bytes().to_vec())
        .sign(s_device_key)?;

    let issuer_namespaces: BTreeMap<Namespace, NonEmptyVec<IssuerSignedItemBytes>> =
        issuer_namespaces
            .into_iter()
            .filter_map(|(namespace, items)| {
                NonEmptyVec::maybe_new(items).map(|items| (namespace, items))
            })
            .collect();

    tracing::debug!(
        "prepared document '{doc_type}' with {} element error(s)",
        errors.values().map(|e| e.len()).sum::<usize>()
    );
    Ok(Document {
        doc_type,
        issuer_signed: IssuerSigned {
            namespaces: IssuerNamespaces::maybe_new(issuer_namespaces),
            issuer_auth: issuer_signed.issuer_auth.clone(),
        },
        device_signed: DeviceSigned {
            namespaces: device_namespaces_bytes,
            device_auth: DeviceAuth::DeviceSignature(device_signature),
        },
        errors: Errors::maybe_new(errors),
    })
}

fn insert_device_signed(
    namespaces: &mut DeviceNamespaces,
    namespace: &str,
    element_identifier: &str,
    value: Value,
) {
    match namespaces.get_mut(namespace) {
        Some(items) => {
            items.insert(element_identifier.to_string(), value);
        }
        None => {
            namespaces.insert(
                namespace.to_string(),
                DeviceSignedItems::new(element_identifier.to_string(), value),
            );
        }
    }
}

const AGE_OVER_PREFIX: &str = "age_over_";

/// The age of an `age_over_NN` element identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AgeOver(pub u8);

impl TryFrom<&str> for AgeOver {
    type Error = Error;

    fn try_from(element_identifier: &str) -> Result<Self, Self::Error> {
        element_identifier
            .strip_prefix(AGE_OVER_PREFIX)
            .filter(|age| age.len() == 2)
            .and_then(|age| age.parse().ok())
            .map(AgeOver)
            .ok_or_else(|| Error::MalformedAgeOver(element_identifier.to_string()))
    }
}

/// The age attestation to return for a requested `age_over_NN` that the holder does not have.
///
/// This is the nearest `true` attestation over the requested age, or failing that the nearest
/// `false` attestation under it.
pub fn nearest_age_attestation(
    element_identifier: &str,
    issuer_items: &[IssuerSignedItemBytes],
) -> Result<Option<IssuerSignedItemBytes>> {
    let requested = AgeOver::try_from(element_identifier)?;

    let attestations = issuer_items.iter().filter_map(|item| {
        let age = AgeOver::try_from(item.as_ref().element_identifier.as_str()).ok()?;
        match item.as_ref().element_value {
            Value::Bool(attested) => Some((age, attested, item)),
            _ => None,
        }
    });
    let (over, under): (Vec<_>, Vec<_>) = attestations.partition(|(_, attested, _)| *attested);

    let nearest = over
        .into_iter()
        .filter(|(age, _, _)| *age >= requested)
        .min_by_key(|(age, _, _)| *age)
        .or_else(|| {
            under
                .into_iter()
                .filter(|(age, _, _)| *age <= requested)
                .max_by_key(|(age, _, _)| *age)
        });
    Ok(nearest.map(|(_, _, item)| item.clone()))
}

/// The documents held by the device.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub issuer_signed: IssuerSigneds,
    pub device_signed: DeviceSigneds,
}

impl Credentials {
    pub fn with_mdoc(mut self, mdoc: Mdoc) -> Self {
        self.issuer_signed.insert(mdoc.doc_type.clone(), mdoc.into());
        self
    }

    pub fn with_device_signed(
        mut self,
        doc_type: impl Into<String>,
        namespaces: DeviceNamespaces,
    ) -> Self {
        self.device_signed.insert(doc_type.into(), namespaces);
        self
    }

    /// Only the items of `permitted`.
    ///
    /// `age_over_NN` items stay available in a namespace where any `age_over_NN` is permitted,
    /// so that the nearest attestation can be returned.
    pub fn restricted_to(&self, permitted: &PermittedItems) -> Self {
        fn allowed(
            permitted: &PermittedItems,
            doc_type: &str,
            namespace: &str,
            element_identifier: &str,
        ) -> bool {
            permitted
                .get(doc_type)
                .and_then(|namespaces| namespaces.get(namespace))
                .is_some_and(|ids| {
                    ids.iter().any(|id| id == element_identifier)
                        || (element_identifier.starts_with(AGE_OVER_PREFIX)
                            && ids.iter().any(|id| id.starts_with(AGE_OVER_PREFIX)))
                })
        }

        let issuer_signed = self
            .issuer_signed
            .iter()
            .filter(|(doc_type, _)| permitted.contains_key(*doc_type))
            .map(|(doc_type, issuer_signed)| {
                let namespaces = issuer_signed.namespaces.as_ref().and_then(|namespaces| {
                    let namespaces: BTreeMap<_, _> = namespaces
                        .iter()
                        .filter_map(|(namespace, items)| {
                            let items = items
                                .iter()
                                .filter(|item| {
                                    allowed(
                                        permitted,
                                        doc_type,
                                        namespace,
                                        &item.as_ref().element_identifier,
                                    )
                                })
                                .cloned()
                                .collect();
                            NonEmptyVec::maybe_new(items).map(|items| (namespace.clone(), items))
                        })
                        .collect();
                    IssuerNamespaces::maybe_new(namespaces)
                });
                let restricted = IssuerSigned {
                    namespaces,
                    issuer_auth: issuer_signed.issuer_auth.clone(),
                };
                (doc_type.clone(), restricted)
            })
            .collect();

        let device_signed = self
            .device_signed
            .iter()
            .map(|(doc_type, namespaces)| {
                let namespaces = namespaces
                    .iter()
                    .filter_map(|(namespace, items)| {
                        let items: BTreeMap<_, _> = items
                            .iter()
                            .filter(|(id, _)| allowed(permitted, doc_type, namespace, id))
                            .map(|(id, value)| (id.clone(), value.clone()))
                            .collect();
                        NonEmptyMap::maybe_new(items).map(|items| (namespace.clone(), items))
                    })
                    .collect();
                (doc_type.clone(), namespaces)
            })
            .collect();

        Self {
            issuer_signed,
            device_signed,
        }
    }
}

/// A document request received from the reader.
#[derive(Debug, Clone)]
pub struct RequestedDocument {
    pub items_request: ItemsRequest,
    /// Common name of the reader certificate, when reader authentication succeeded.
    pub reader_common_name: Option<String>,
    pub reader_authentication: AuthenticationStatus,
}

/// The requests of the reader, in order.
pub type RequestedItems = Vec<RequestedDocument>;

/// Initialisation state.
///
/// Holds the credentials, the ephemeral device key and the device engagement.
pub struct SessionManagerInit {
    credentials: Credentials,
    e_device_key: EphemeralKey,
    device_engagement: DeviceEngagementBytes,
    reader_roots: Vec<Certificate>,
}

/// Engaged state, after the engagement was handed over to the reader.
pub struct SessionManagerEngaged {
    credentials: Credentials,
    e_device_key: EphemeralKey,
    device_engagement: DeviceEngagementBytes,
    handover: Handover,
    reader_roots: Vec<Certificate>,
}

/// The state where handling requests from the reader and responding to them happens.
///
/// This can consist of several request-response cycles.
pub struct SessionManager {
    credentials: Credentials,
    session_transcript: SessionTranscript,
    encryption: SessionEncryption<Device>,
    reader_roots: Vec<Certificate>,
    state: State,
}

/// The internal state of the [SessionManager].
#[derive(Debug, Default)]
enum State {
    #[default]
    AwaitingRequest,
    /// A request that can be answered. Doc requests that failed reader authentication are kept
    /// apart to be reported as document errors.
    Requested {
        request: Option<DeviceRequest>,
        rejected: Vec<DocType>,
    },
    /// A request that can only be answered with a status.
    Unusable(Status),
}

impl SessionManagerInit {
    /// Generate the ephemeral device key on `curve` and the device engagement.
    pub fn initialise<R: RngCore + CryptoRng>(
        credentials: Credentials,
        curve: Curve,
        device_retrieval_methods: Option<DeviceRetrievalMethods>,
        rng: &mut R,
    ) -> Result<Self> {
        let e_device_key = EphemeralKey::generate(curve, rng)?;
        let device_engagement = Tag24::new(DeviceEngagement::new(
            &e_device_key.public_key(),
            device_retrieval_methods,
        )?)?;
        Ok(Self {
            credentials,
            e_device_key,
            device_engagement,
            reader_roots: Vec::new(),
        })
    }

    /// Trust anchors for reader authentication. Without any, reader authentication is not
    /// checked.
    pub fn with_reader_roots(mut self, reader_roots: Vec<Certificate>) -> Self {
        self.reader_roots = reader_roots;
        self
    }

    pub fn device_engagement(&self) -> &DeviceEngagementBytes {
        &self.device_engagement
    }

    pub fn ble_ident(&self) -> Result<[u8; 16]> {
        Ok(session::ble_ident(
            self.device_engagement.as_ref().e_device_key_bytes(),
        )?)
    }

    /// Begins the device engagement using a **QR code**, returning the `mdoc:` URI to display.
    pub fn qr_engagement(self) -> (SessionManagerEngaged, String) {
        let qr_code_uri = self.device_engagement.to_qr_code_uri();
        (self.engage(Handover::Qr), qr_code_uri)
    }

    /// Begins the device engagement over **NFC** with the negotiated handover messages.
    pub fn nfc_engagement(
        self,
        handover_select: Vec<u8>,
        handover_request: Option<Vec<u8>>,
    ) -> SessionManagerEngaged {
        self.engage(Handover::Nfc(NfcHandover {
            handover_select: ByteStr::from(handover_select),
            handover_request: handover_request.map(ByteStr::from),
        }))
    }

    fn engage(self, handover: Handover) -> SessionManagerEngaged {
        SessionManagerEngaged {
            credentials: self.credentials,
            e_device_key: self.e_device_key,
            device_engagement: self.device_engagement,
            handover,
            reader_roots: self.reader_roots,
        }
    }
}

impl SessionManagerEngaged {
    pub fn ble_ident(&self) -> Result<[u8; 16]> {
        Ok(session::ble_ident(
            self.device_engagement.as_ref().e_device_key_bytes(),
        )?)
    }

    /// Process the [SessionEstablishment] received from the reader.
    ///
    /// Derives the session keys and decrypts the first request, returning the requested items.
    pub fn process_session_establishment(
        self,
        session_establishment: &[u8],
        now: OffsetDateTime,
    ) -> Result<(SessionManager, RequestedItems)> {
        let session_establishment: SessionEstablishment = cbor::from_slice(session_establishment)?;
        let e_reader_key = session_establishment
            .e_reader_key
            .as_ref()
            .to_public_key()
            .map_err(Error::ReaderKey)?;

        let session_transcript = SessionTranscript::new(
            self.device_engagement,
            session_establishment.e_reader_key,
            self.handover,
        );
        let keys = derive_session_keys(
            &self.e_device_key,
            &e_reader_key,
            &session_transcript.to_bytes()?,
        )?;

        let mut session_manager = SessionManager {
            credentials: self.credentials,
            session_transcript,
            encryption: SessionEncryption::new(&keys),
            reader_roots: self.reader_roots,
            state: State::AwaitingRequest,
        };
        tracing::debug!("session established with the reader");
        let requested = session_manager.handle_data(session_establishment.data.as_ref(), now)?;
        Ok((session_manager, requested))
    }
}

impl SessionManager {
    pub fn session_transcript(&self) -> &SessionTranscript {
        &self.session_transcript
    }

    pub fn is_terminated(&self) -> bool {
        self.encryption.is_terminated()
    }

    /// Handle a request of the reader, encoded as [SessionData], at `now`.
    ///
    /// A request that does not decode still yields a response, with the matching status, once
    /// [SessionManager::respond] is called.
    pub fn handle_request(&mut self, request: &[u8], now: OffsetDateTime) -> Result<RequestedItems> {
        let session_data: SessionData = cbor::from_slice(request)?;
        match (session_data.data, session_data.status) {
            (_, Some(SessionStatus::SessionTermination)) => {
                tracing::debug!("reader terminated the session");
                self.encryption.terminate();
                Err(Error::SessionTerminated)
            }
            (Some(data), _) => self.handle_data(data.as_ref(), now),
            (None, _) => Err(Error::EmptySessionData),
        }
    }

    fn handle_data(&mut self, data: &[u8], now: OffsetDateTime) -> Result<RequestedItems> {
        let decrypted = self.encryption.decrypt(data)?;
        let request = match parse_request(&decrypted) {
            Ok(request) => request,
            Err(status) => {
                tracing::warn!(
                    "unusable device request, answering with status {}",
                    status.as_ref()
                );
                self.state = State::Unusable(status);
                return Ok(Vec::new());
            }
        };

        let mut requested = Vec::new();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for doc_request in request.doc_requests.into_inner() {
            let items_request = doc_request.items_request.as_ref().clone();
            if self.reader_roots.is_empty() {
                requested.push(RequestedDocument {
                    items_request,
                    reader_common_name: None,
                    reader_authentication: AuthenticationStatus::Unchecked,
                });
                accepted.push(doc_request);
                continue;
            }
            match doc_request.verify(&self.reader_roots, &self.session_transcript, now) {
                Ok(x5chain) => {
                    requested.push(RequestedDocument {
                        items_request,
                        reader_common_name: Some(x5chain.end_entity_common_name().to_string()),
                        reader_authentication: AuthenticationStatus::Valid,
                    });
                    accepted.push(doc_request);
                }
                Err(e) => {
                    tracing::warn!(
                        "reader authentication of the '{}' request failed: {e}",
                        items_request.doc_type
                    );
                    rejected.push(items_request.doc_type);
                }
            }
        }

        self.state = State::Requested {
            request: NonEmptyVec::maybe_new(accepted).map(|doc_requests| DeviceRequest {
                version: request.version,
                doc_requests,
            }),
            rejected,
        };
        Ok(requested)
    }

    /// Respond to the pending request with the `permitted` items, signing device authentication
    /// with `s_device_key`. Returns the encoded [SessionData].
    pub fn respond<S: Signer + ?Sized>(
        &mut self,
        permitted: &PermittedItems,
        s_device_key: &S,
    ) -> Result<Vec<u8>> {
        let response = match std::mem::take(&mut self.state) {
            State::AwaitingRequest => return Err(Error::NoPendingRequest),
            State::Unusable(status) => DeviceResponse::with_status(status),
            State::Requested { request, rejected } => {
                let credentials = self.credentials.restricted_to(permitted);
                let mut response = match request {
                    Some(request) => create_device_response(
                        &request,
                        &credentials.issuer_signed,
                        &credentials.device_signed,
                        s_device_key,
                        &self.session_transcript,
                    )?,
                    None => DeviceResponse::with_status(Status::OK),
                };
                if !rejected.is_empty() {
                    let mut errors = response
                        .document_errors
                        .take()
                        .map(NonEmptyVec::into_inner)
                        .unwrap_or_default();
                    errors.extend(rejected.iter().map(|doc_type| data_not_returned(doc_type)));
                    response.document_errors = DocumentErrors::maybe_new(errors);
                }
                response
            }
        };
        let response = cbor::to_vec(&response)?;
        Ok(cbor::to_vec(&SessionData::encrypted(
            self.encryption.encrypt(&response)?,
        ))?)
    }

    /// Report a session-level failure to the reader and end the session.
    pub fn session_error(&mut self, status: SessionStatus) -> Result<Vec<u8>> {
        self.encryption.terminate();
        Ok(cbor::to_vec(&SessionData::status(status))?)
    }

    /// End the session, returning the encoded termination message for the reader.
    pub fn terminate(&mut self) -> Result<Vec<u8>> {
        tracing::debug!("device terminated the session");
        self.session_error(SessionStatus::SessionTermination)
    }
}

/// Decode a [DeviceRequest], mapping failures to the response status to report.
fn parse_request(bytes: &[u8]) -> Result<DeviceRequest, Status> {
    let value: Value = cbor::from_slice(bytes).map_err(|_| Status::CborDecodingError)?;
    let request: DeviceRequest =
        cbor::from_value(&value).map_err(|_| Status::CborValidationError)?;
    if request.version != DeviceRequest::VERSION {
        return Err(Status::GeneralError);
    }
    Ok(request)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::DigestAlgorithm;
    use crate::definitions::{
        device_request::Namespaces,
        x509::{test::iaca_and_document_signer, X5Chain},
        CoseKey, KeyAuthorizations, ValidityInfo,
    };
    use crate::issuance::Namespaces as IssuerNamespacesInput;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use rstest::rstest;
    use serde_json::json;
    use time::Duration;

    const MDL: &str = "org.iso.18013.5.1.mDL";
    const NS: &str = "org.iso.18013.5.1";

    fn issue(device_key: &SigningKey, key_authorizations: Option<KeyAuthorizations>) -> Mdoc {
        issue_for(
            CoseKey::from(Signer::public_key(device_key)),
            key_authorizations,
        )
    }

    fn issue_for(device_key: CoseKey, key_authorizations: Option<KeyAuthorizations>) -> Mdoc {
        let certificates = iaca_and_document_signer();
        let now = OffsetDateTime::now_utc();
        let namespaces: IssuerNamespacesInput = [(
            NS.to_string(),
            [
                ("family_name".to_string(), Value::Text("Doe".into())),
                ("age_over_18".to_string(), Value::Bool(true)),
                ("age_over_21".to_string(), Value::Bool(true)),
                ("age_over_65".to_string(), Value::Bool(false)),
            ]
            .into(),
        )]
        .into();
        let mut device_key_info: crate::definitions::DeviceKeyInfo = device_key.into();
        device_key_info.key_authorizations = key_authorizations;
        Mdoc::builder()
            .doc_type(MDL)
            .namespaces(namespaces)
            .validity_info(ValidityInfo {
                signed: now,
                valid_from: now,
                valid_until: now + Duration::days(30),
                expected_update: None,
            })
            .digest_algorithm(DigestAlgorithm::SHA256)
            .device_key_info(device_key_info)
            .x5chain(
                X5Chain::builder()
                    .with_certificate(certificates.document_signer)
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .issue(&certificates.document_signer_key, &mut OsRng)
            .unwrap()
    }

    fn request(doc_type: &str, elements: &[&str]) -> DocRequest {
        let mut ids = elements.iter().map(|id| (id.to_string(), false));
        let (first, value) = ids.next().unwrap();
        let mut data_elements = NonEmptyMap::new(first, value);
        for (id, value) in ids {
            data_elements.insert(id, value);
        }
        DocRequest {
            items_request: Tag24::new(ItemsRequest {
                doc_type: doc_type.to_string(),
                namespaces: Namespaces::new(NS.to_string(), data_elements),
                request_info: None,
            })
            .unwrap(),
            reader_auth: None,
        }
    }

    fn device_request(doc_requests: Vec<DocRequest>) -> DeviceRequest {
        DeviceRequest {
            version: DeviceRequest::VERSION.to_string(),
            doc_requests: doc_requests.try_into().unwrap(),
        }
    }

    fn transcript() -> SessionTranscript {
        let device_key = EphemeralKey::generate(Curve::P256, &mut OsRng).unwrap();
        let reader_key = EphemeralKey::generate(Curve::P256, &mut OsRng).unwrap();
        SessionTranscript::new(
            Tag24::new(DeviceEngagement::new(&device_key.public_key(), None).unwrap()).unwrap(),
            Tag24::new(CoseKey::from(reader_key.public_key())).unwrap(),
            Handover::Qr,
        )
    }

    fn returned(document: &Document) -> Vec<String> {
        document
            .issuer_signed
            .items()
            .map(|(_, item)| item.as_ref().element_identifier.clone())
            .collect()
    }

    #[test_log::test]
    fn response_covers_issuer_and_device_signed_items() {
        let device_key = SigningKey::random(&mut OsRng);
        let authorizations = KeyAuthorizations {
            namespaces: None,
            data_elements: Some(NonEmptyMap::new(
                NS.to_string(),
                NonEmptyVec::new("nickname".to_string()),
            )),
        };
        let mdoc = issue(&device_key, Some(authorizations));
        let credentials = Credentials::default().with_mdoc(mdoc).with_device_signed(
            MDL,
            [(
                NS.to_string(),
                NonEmptyMap::new("nickname".to_string(), Value::Text("JD".into())),
            )]
            .into(),
        );
        let transcript = transcript();
        let request = device_request(vec![request(
            MDL,
            &["family_name", "nickname", "portrait"],
        )]);

        let response = create_device_response(
            &request,
            &credentials.issuer_signed,
            &credentials.device_signed,
            &device_key,
            &transcript,
        )
        .unwrap();
        assert_eq!(response.status, Status::OK);
        assert!(response.document_errors.is_none());

        let document = &response.documents.unwrap()[0];
        assert_eq!(returned(document), vec!["family_name".to_string()]);
        assert_eq!(
            document.device_signed.element(NS, "nickname"),
            Some(&Value::Text("JD".into()))
        );
        let errors = document.errors.as_ref().unwrap();
        assert_eq!(
            errors.get(NS).unwrap().get("portrait"),
            Some(&DocumentErrorCode::DataNotReturned)
        );
        document.verify_device_auth(&transcript).unwrap();
    }

    #[test]
    fn unauthorized_device_signed_items_are_not_returned() {
        let device_key = SigningKey::random(&mut OsRng);
        let mdoc = issue(&device_key, None);
        let credentials = Credentials::default().with_mdoc(mdoc).with_device_signed(
            MDL,
            [(
                NS.to_string(),
                NonEmptyMap::new("nickname".to_string(), Value::Text("JD".into())),
            )]
            .into(),
        );
        let request = device_request(vec![request(MDL, &["nickname"])]);
        let response = create_device_response(
            &request,
            &credentials.issuer_signed,
            &credentials.device_signed,
            &device_key,
            &transcript(),
        )
        .unwrap();
        let document = &response.documents.unwrap()[0];
        assert!(document.device_signed.namespaces.as_ref().is_empty());
        assert!(document.issuer_signed.namespaces.is_none());
        assert!(document.errors.as_ref().unwrap().get(NS).is_some());
    }

    #[test]
    fn unknown_doc_type_is_a_document_error() {
        let device_key = SigningKey::random(&mut OsRng);
        let credentials = Credentials::default().with_mdoc(issue(&device_key, None));
        let request = device_request(vec![
            request("org.example.unknown", &["a"]),
            request(MDL, &["family_name"]),
        ]);
        let response = create_device_response(
            &request,
            &credentials.issuer_signed,
            &credentials.device_signed,
            &device_key,
            &transcript(),
        )
        .unwrap();
        assert_eq!(response.status, Status::OK);
        assert_eq!(response.documents.unwrap().len(), 1);
        let document_errors = response.document_errors.unwrap();
        assert_eq!(
            document_errors[0].get("org.example.unknown"),
            Some(&DocumentErrorCode::DataNotReturned)
        );
    }

    #[test]
    fn wrong_device_key_is_a_document_error() {
        let device_key = SigningKey::random(&mut OsRng);
        let other_key = SigningKey::random(&mut OsRng);
        let credentials = Credentials::default().with_mdoc(issue(&device_key, None));
        let response = create_device_response(
            &device_request(vec![request(MDL, &["family_name"])]),
            &credentials.issuer_signed,
            &credentials.device_signed,
            &other_key,
            &transcript(),
        )
        .unwrap();
        assert!(response.documents.is_none());
        assert!(response.document_errors.is_some());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let device_key = SigningKey::random(&mut OsRng);
        let mut request = device_request(vec![request(MDL, &["family_name"])]);
        request.version = "2.0".to_string();
        assert!(matches!(
            create_device_response(
                &request,
                &BTreeMap::new(),
                &BTreeMap::new(),
                &device_key,
                &transcript(),
            ),
            Err(Error::UnsupportedDeviceRequestVersion(v)) if v == "2.0"
        ));
    }

    #[rstest]
    #[case::exact("age_over_21", Some("age_over_21"))]
    #[case::nearest_true_over("age_over_20", Some("age_over_21"))]
    #[case::nearest_false_under("age_over_70", Some("age_over_65"))]
    #[case::none_applies("age_over_30", None)]
    fn age_attestation_fallback(#[case] requested: &str, #[case] expected: Option<&str>) {
        let device_key = SigningKey::random(&mut OsRng);
        let mdoc = issue(&device_key, None);
        let items = mdoc.namespaces.get(NS).unwrap();
        let attestation = nearest_age_attestation(requested, items).unwrap();
        assert_eq!(
            attestation.map(|item| item.as_ref().element_identifier.clone()),
            expected.map(str::to_string)
        );
    }

    #[rstest]
    #[case("age_over_18", Some(18))]
    #[case("age_over_5", None)]
    #[case("age_over_xx", None)]
    #[case("family_name", None)]
    fn age_over_is_parsed(#[case] element_identifier: &str, #[case] age: Option<u8>) {
        assert_eq!(
            AgeOver::try_from(element_identifier).ok().map(|a| a.0),
            age
        );
    }

    #[test]
    fn missing_age_attestation_falls_back_in_response() {
        let device_key = SigningKey::random(&mut OsRng);
        let credentials = Credentials::default().with_mdoc(issue(&device_key, None));
        let response = create_device_response(
            &device_request(vec![request(MDL, &["age_over_20"])]),
            &credentials.issuer_signed,
            &credentials.device_signed,
            &device_key,
            &transcript(),
        )
        .unwrap();
        let document = &response.documents.unwrap()[0];
        assert_eq!(returned(document), vec!["age_over_21".to_string()]);
        assert!(document.errors.is_none());
    }

    #[test_log::test]
    fn malformed_age_over_request_is_reported_not_returned() {
        let device_key = SigningKey::random(&mut OsRng);
        let credentials = Credentials::default().with_mdoc(issue(&device_key, None));
        let response = create_device_response(
            &device_request(vec![request(MDL, &["age_over_5", "family_name"])]),
            &credentials.issuer_signed,
            &credentials.device_signed,
            &device_key,
            &transcript(),
        )
        .unwrap();
        let document = &response.documents.unwrap()[0];
        assert_eq!(returned(document), vec!["family_name".to_string()]);
        assert_eq!(
            document.errors.as_ref().unwrap().get(NS).unwrap().get("age_over_5"),
            Some(&DocumentErrorCode::DataNotReturned)
        );
    }

    #[test]
    fn agreement_only_device_key_is_mac_only() {
        let signing_key = SigningKey::random(&mut OsRng);
        let x25519 = EphemeralKey::generate(Curve::X25519, &mut OsRng).unwrap();
        let mdoc = issue_for(CoseKey::from(x25519.public_key()), None);
        let issuer_signed: IssuerSigned = mdoc.into();
        let items_request = request(MDL, &["family_name"]).items_request.into_inner();
        assert!(matches!(
            create_document(&items_request, &issuer_signed, None, &signing_key, &transcript()),
            Err(Error::MACAuthNotSupported)
        ));
    }

    #[test]
    fn credentials_are_restricted_to_permitted_items() {
        let device_key = SigningKey::random(&mut OsRng);
        let credentials = Credentials::default().with_mdoc(issue(&device_key, None));
        let permitted: PermittedItems = serde_json::from_value(json!({
            MDL: { NS: ["age_over_20"] },
            "org.example.other": { NS: ["family_name"] },
        }))
        .unwrap();
        let restricted = credentials.restricted_to(&permitted);
        let mut identifiers: Vec<_> = restricted.issuer_signed[MDL]
            .items()
            .map(|(_, item)| item.as_ref().element_identifier.clone())
            .collect();
        identifiers.sort();
        assert_eq!(
            identifiers,
            vec!["age_over_18", "age_over_21", "age_over_65"]
        );
        assert!(credentials
            .restricted_to(&PermittedItems::new())
            .issuer_signed
            .is_empty());
    }

    #[rstest]
    #[case::not_cbor(vec![0xff], Status::CborDecodingError)]
    #[case::not_a_request(cbor::to_vec(&json!({"version": "1.0"})).unwrap(), Status::CborValidationError)]
    fn unusable_requests_map_to_status(#[case] bytes: Vec<u8>, #[case] status: Status) {
        assert_eq!(parse_request(&bytes).unwrap_err(), status);
    }
}
