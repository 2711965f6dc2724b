//! This module is responsible for the reader's interaction with the device.
//!
//! The reader scans the device engagement, establishes the session with the first request, and
//! then validates every response: issuer authentication against the trusted IACA roots, device
//! authentication against the session transcript, and the element values returned.
use std::collections::BTreeMap;

use ciborium::Value;
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;
use x509_cert::Certificate;

use super::authentication::{self, AuthenticationStatus};
use crate::{
    cbor::{self, CborError},
    cose::{sign1, CoseSign1, X5CHAIN_HEADER_LABEL},
    crypto::{self, Agreer, EphemeralKey, Signer},
    definitions::{
        device_engagement::{self, DeviceEngagementBytes},
        device_key::cose_key,
        device_request::{ReaderAuthentication, ReaderAuthenticationBytes},
        device_response::{DocumentErrors, Errors, Status as ResponseStatus},
        helpers::{tag24, ByteStr, NonEmptyVec, Tag24},
        session::{self, derive_session_keys, Reader, Status as SessionStatus},
        x509::{validation, x5chain, CertificatePolicy, ValidationRuleset, X5Chain},
        CoseKey, DeviceRequest, DeviceResponse, DocRequest, Document, Handover, ItemsRequest,
        RetrievalOptions, SessionData, SessionEncryption, SessionEstablishment,
        SessionTranscript,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the qr code had the wrong prefix or the contained data could not be decoded: {0}")]
    InvalidQrCode(device_engagement::Error),
    #[error("doc request carries no readerAuth")]
    MissingReaderAuth,
    #[error("at least one items request is required")]
    EmptyRequest,
    #[error("device responded with session status {0:?}")]
    HolderError(SessionStatus),
    #[error("device did not transmit any data")]
    DeviceTransmissionError,
    #[error("the session is terminated")]
    SessionTerminated,
    #[error("invalid device key: {0}")]
    DeviceKey(#[from] cose_key::Error),
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error(transparent)]
    X5Chain(#[from] x5chain::Error),
    #[error(transparent)]
    Certificate(#[from] validation::Error),
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

/// A reader key and its certificate chain, used to sign requests.
pub struct ReaderAuthority {
    signer: Box<dyn Signer + Send + Sync>,
    x5chain: X5Chain,
}

impl ReaderAuthority {
    pub fn new(signer: impl Signer + Send + Sync + 'static, x5chain: X5Chain) -> Self {
        Self {
            signer: Box::new(signer),
            x5chain,
        }
    }

    pub fn x5chain(&self) -> &X5Chain {
        &self.x5chain
    }
}

impl std::fmt::Debug for ReaderAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderAuthority")
            .field("curve", &self.signer.curve())
            .field("x5chain", &self.x5chain.end_entity_common_name())
            .finish()
    }
}

/// Build a [DocRequest] whose `readerAuth` signs over `items_request` and the session
/// transcript.
pub fn new_authenticated_doc_request(
    items_request: ItemsRequest,
    session_transcript: &SessionTranscript,
    reader_authority: &ReaderAuthority,
) -> Result<DocRequest> {
    let items_request = Tag24::new(items_request)?;
    let reader_authentication: ReaderAuthenticationBytes = Tag24::new(ReaderAuthentication::new(
        session_transcript.clone(),
        items_request.clone(),
    ))?;
    let reader_auth = CoseSign1::builder()
        .detached_payload(reader_authentication.tagged_bytes().to_vec())
        .unprotected_header(X5CHAIN_HEADER_LABEL, reader_authority.x5chain.into_cbor())
        .sign(reader_authority.signer.as_ref())?;
    Ok(DocRequest {
        items_request,
        reader_auth: Some(reader_auth),
    })
}

impl DocRequest {
    /// Verify `readerAuth` against the reader `roots` at `now`, returning the reader's chain.
    pub fn verify(
        &self,
        roots: &[Certificate],
        session_transcript: &SessionTranscript,
        now: OffsetDateTime,
    ) -> Result<X5Chain> {
        let reader_auth = self.reader_auth.as_ref().ok_or(Error::MissingReaderAuth)?;
        reader_auth.algorithm()?;
        let x5chain = X5Chain::from_header(&reader_auth.unprotected)?;
        ValidationRuleset::MdlReader.validate(
            &x5chain,
            roots,
            now,
            &CertificatePolicy::default(),
        )?;
        let reader_authentication: ReaderAuthenticationBytes = Tag24::new(
            ReaderAuthentication::new(session_transcript.clone(), self.items_request.clone()),
        )?;
        reader_auth.verify(
            &x5chain.end_entity_public_key()?,
            Some(reader_authentication.tagged_bytes()),
            &[],
        )?;
        Ok(x5chain)
    }
}

/// Trust configuration of a reader.
#[derive(Debug, Default)]
pub struct ReaderConfig {
    /// IACA certificates trusted for issuer authentication.
    pub iaca_roots: Vec<Certificate>,
    /// Signs every doc request when present.
    pub reader_authority: Option<ReaderAuthority>,
    pub certificate_policy: CertificatePolicy,
}

/// A reader session with one device.
#[derive(Debug)]
pub struct SessionManager {
    session_transcript: SessionTranscript,
    encryption: SessionEncryption<Reader>,
    config: ReaderConfig,
}

/// A document of a response, after validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedDocument {
    /// Element values by namespace, from both the issuer-signed and device-signed items.
    pub elements: BTreeMap<String, BTreeMap<String, Value>>,
    pub issuer_authentication: AuthenticationStatus,
    pub device_authentication: AuthenticationStatus,
    /// Elements the device did not return.
    #[serde(skip)]
    pub element_errors: Option<Errors>,
    /// Why authentication failed, if it did.
    pub errors: Vec<String>,
}

/// A device response, after validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedResponse {
    pub status: ResponseStatus,
    pub documents: BTreeMap<String, ValidatedDocument>,
    #[serde(skip)]
    pub document_errors: Option<DocumentErrors>,
}

impl SessionManager {
    /// Establish a session from a device engagement received through a QR code.
    ///
    /// Returns the session, the encoded [SessionEstablishment] carrying the first request, and
    /// the BLE ident of the device.
    pub fn establish_session<R: RngCore + CryptoRng>(
        qr_code_uri: &str,
        requests: Vec<ItemsRequest>,
        config: ReaderConfig,
        rng: &mut R,
    ) -> Result<(Self, Vec<u8>, [u8; 16])> {
        let device_engagement =
            DeviceEngagementBytes::from_qr_code_uri(qr_code_uri).map_err(Error::InvalidQrCode)?;
        Self::establish_session_with_handover(
            device_engagement,
            Handover::Qr,
            requests,
            config,
            rng,
        )
    }

    /// Establish a session from a device engagement received through any handover.
    pub fn establish_session_with_handover<R: RngCore + CryptoRng>(
        device_engagement: DeviceEngagementBytes,
        handover: Handover,
        requests: Vec<ItemsRequest>,
        config: ReaderConfig,
        rng: &mut R,
    ) -> Result<(Self, Vec<u8>, [u8; 16])> {
        let e_device_key_bytes = device_engagement.as_ref().e_device_key_bytes().clone();
        let e_device_key = e_device_key_bytes.as_ref().to_public_key()?;
        let ble_ident = session::ble_ident(&e_device_key_bytes)?;

        let e_reader_key = EphemeralKey::generate(e_device_key.curve(), rng)?;
        let e_reader_key_bytes = Tag24::new(CoseKey::from(e_reader_key.public_key()))?;

        let session_transcript =
            SessionTranscript::new(device_engagement, e_reader_key_bytes.clone(), handover);
        let keys = derive_session_keys(
            &e_reader_key,
            &e_device_key,
            &session_transcript.to_bytes()?,
        )?;

        let mut session_manager = Self {
            session_transcript,
            encryption: SessionEncryption::new(&keys),
            config,
        };

        let request = session_manager.build_request(requests)?;
        let session_establishment = SessionEstablishment {
            e_reader_key: e_reader_key_bytes,
            data: ByteStr::from(request),
        };
        tracing::debug!("session established with the device");
        Ok((
            session_manager,
            cbor::to_vec(&session_establishment)?,
            ble_ident,
        ))
    }

    pub fn session_transcript(&self) -> &SessionTranscript {
        &self.session_transcript
    }

    /// The UUID the device advertised for BLE central client mode, if any.
    pub fn first_central_client_uuid(&self) -> Option<&Uuid> {
        self.session_transcript
            .0
            .as_ref()
            .device_retrieval_methods
            .iter()
            .flat_map(|methods| methods.iter())
            .find_map(|method| match &method.options {
                RetrievalOptions::Ble(options) if options.central_client_mode => {
                    options.central_client_uuid.as_ref()
                }
                _ => None,
            })
    }

    /// A further request within the established session, as encoded [SessionData].
    pub fn new_request(&mut self, requests: Vec<ItemsRequest>) -> Result<Vec<u8>> {
        let request = self.build_request(requests)?;
        Ok(cbor::to_vec(&SessionData::encrypted(request))?)
    }

    fn build_request(&mut self, requests: Vec<ItemsRequest>) -> Result<Vec<u8>> {
        let doc_requests = requests
            .into_iter()
            .map(|items_request| match &self.config.reader_authority {
                Some(authority) => new_authenticated_doc_request(
                    items_request,
                    &self.session_transcript,
                    authority,
                ),
                None => Ok(DocRequest {
                    items_request: Tag24::new(items_request)?,
                    reader_auth: None,
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        let device_request = DeviceRequest {
            version: DeviceRequest::VERSION.to_string(),
            doc_requests: NonEmptyVec::try_from(doc_requests).map_err(|_| Error::EmptyRequest)?,
        };
        let device_request_bytes = cbor::to_vec(&device_request)?;
        Ok(self.encryption.encrypt(&device_request_bytes)?)
    }

    /// End the session, returning the encoded termination message for the device.
    pub fn terminate(&mut self) -> Result<Vec<u8>> {
        self.encryption.terminate();
        tracing::debug!("reader terminated the session");
        Ok(cbor::to_vec(&SessionData::termination())?)
    }

    pub fn is_terminated(&self) -> bool {
        self.encryption.is_terminated()
    }

    /// Decrypt and validate a response of the device, encoded as [SessionData], at `now`.
    pub fn handle_response(
        &mut self,
        response: &[u8],
        now: OffsetDateTime,
    ) -> Result<ValidatedResponse> {
        let session_data: SessionData = cbor::from_slice(response)?;
        let terminated = session_data.is_termination();
        let result = match (session_data.data, session_data.status) {
            (Some(data), _) => {
                let decrypted = self.encryption.decrypt(data.as_ref())?;
                let device_response: DeviceResponse = cbor::from_slice(&decrypted)?;
                Ok(self.validate_response(device_response, now))
            }
            (None, Some(SessionStatus::SessionTermination)) => Err(Error::SessionTerminated),
            (None, Some(status)) => Err(Error::HolderError(status)),
            (None, None) => Err(Error::DeviceTransmissionError),
        };
        if terminated {
            tracing::debug!("device terminated the session");
            self.encryption.terminate();
        }
        result
    }

    fn validate_response(
        &self,
        response: DeviceResponse,
        now: OffsetDateTime,
    ) -> ValidatedResponse {
        if response.status != ResponseStatus::OK {
            tracing::warn!("device responded with status {}", response.status.as_ref());
        }
        let documents = response
            .documents
            .map(NonEmptyVec::into_inner)
            .unwrap_or_default()
            .into_iter()
            .map(|document| {
                (
                    document.doc_type.clone(),
                    self.validate_document(document, now),
                )
            })
            .collect();
        ValidatedResponse {
            status: response.status,
            documents,
            document_errors: response.document_errors,
        }
    }

    fn validate_document(&self, document: Document, now: OffsetDateTime) -> ValidatedDocument {
        let mut errors = Vec::new();

        let issuer_authentication = match document.issuer_signed.verify_with_policy(
            &self.config.iaca_roots,
            now,
            &self.config.certificate_policy,
        ) {
            Ok(_) => AuthenticationStatus::Valid,
            Err(e) => {
                tracing::warn!("issuer authentication of '{}' failed: {e}", document.doc_type);
                errors.push(format!("issuer authentication: {e}"));
                AuthenticationStatus::Invalid
            }
        };

        let device_authentication = match document.verify_device_auth(&self.session_transcript) {
            Ok(()) => AuthenticationStatus::Valid,
            Err(authentication::Error::MACAuthNotSupported) => {
                errors.push("device authentication: MAC is not supported".to_string());
                AuthenticationStatus::Unchecked
            }
            Err(e) => {
                tracing::warn!("device authentication of '{}' failed: {e}", document.doc_type);
                errors.push(format!("device authentication: {e}"));
                AuthenticationStatus::Invalid
            }
        };

        let mut elements: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for (namespace, item) in document.issuer_signed.items() {
            let item = item.as_ref();
            elements
                .entry(namespace.to_string())
                .or_default()
                .insert(item.element_identifier.clone(), item.element_value.clone());
        }
        for (namespace, items) in document.device_signed.namespaces.as_ref() {
            let entry = elements.entry(namespace.clone()).or_default();
            for (identifier, value) in items.iter() {
                entry.insert(identifier.clone(), value.clone());
            }
        }

        ValidatedDocument {
            elements,
            issuer_authentication,
            device_authentication,
            element_errors: document.errors,
            errors,
        }
    }
}
