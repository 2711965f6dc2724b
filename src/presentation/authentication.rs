//! Mdoc authentication on the reader side.
//!
//! 1. Issuer authentication: the `issuerAuth` of an [IssuerSigned] is signed by a document
//!    signer anchored on a trusted IACA, and the MSO it carries covers every returned item.
//!
//! 2. Device authentication: the `deviceAuth` of a [Document] was produced by the device key
//!    named in the MSO, over the session transcript of this session.
//!
//! 3. The device key is authorized by `keyAuthorizations` to sign over every element present in
//!    the device-signed namespaces.
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use x509_cert::Certificate;

use crate::{
    cbor::{self, CborError},
    cose::sign1,
    crypto,
    definitions::{
        device_key::cose_key,
        device_signed::{DeviceAuth, DeviceAuthentication},
        helpers::{tag24, Tag24},
        x509::{validation, x5chain, CertificatePolicy, ValidationRuleset, X5Chain},
        DigestId, Document, IssuerSigned, Mso, SessionTranscript,
    },
};

/// The outcome of an authenticity check.
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationStatus {
    #[default]
    Unchecked,
    Invalid,
    Valid,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("issuerAuth does not carry the MSO as its payload")]
    DetachedIssuerAuth,
    #[error("unable to decode the MSO: {0}")]
    MsoDecoding(CborError),
    #[error("document is not valid at {now}: valid from {valid_from} until {valid_until}")]
    NotValidAt {
        now: OffsetDateTime,
        valid_from: OffsetDateTime,
        valid_until: OffsetDateTime,
    },
    #[error("no digest {digest_id} in namespace '{namespace}' of the MSO")]
    MissingDigest {
        namespace: String,
        digest_id: DigestId,
    },
    #[error("digest of '{element_identifier}' in namespace '{namespace}' does not match the MSO")]
    DigestMismatch {
        namespace: String,
        element_identifier: String,
    },
    #[error("document type '{document}' does not match the MSO document type '{mso}'")]
    DocTypeMismatch { document: String, mso: String },
    #[error("device key is not authorized to sign '{element_identifier}' in namespace '{namespace}'")]
    UnauthorizedDeviceSignedElement {
        namespace: String,
        element_identifier: String,
    },
    #[error("device MAC authentication is not supported")]
    MACAuthNotSupported,
    #[error("invalid device key: {0}")]
    DeviceKey(#[from] cose_key::Error),
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
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl IssuerSigned {
    /// The MSO carried as the payload of `issuerAuth`, without any verification.
    pub fn mso(&self) -> Result<Tag24<Mso>> {
        let payload = self
            .issuer_auth
            .payload
            .as_ref()
            .ok_or(Error::DetachedIssuerAuth)?;
        cbor::from_slice(payload).map_err(Error::MsoDecoding)
    }

    /// Verify the issuer signature and the digests of all items against IACA `roots` at `now`,
    /// returning the MSO.
    pub fn verify(&self, roots: &[Certificate], now: OffsetDateTime) -> Result<Mso> {
        self.verify_with_policy(roots, now, &CertificatePolicy::default())
    }

    pub fn verify_with_policy(
        &self,
        roots: &[Certificate],
        now: OffsetDateTime,
        policy: &CertificatePolicy,
    ) -> Result<Mso> {
        let x5chain = X5Chain::from_header(&self.issuer_auth.unprotected)?;
        ValidationRuleset::Mdl.validate(&x5chain, roots, now, policy)?;
        self.issuer_auth
            .verify(&x5chain.end_entity_public_key()?, None, &[])?;

        let mso = self.mso()?.into_inner();
        if !mso.validity_info.is_valid_at(now) {
            return Err(Error::NotValidAt {
                now,
                valid_from: mso.validity_info.valid_from,
                valid_until: mso.validity_info.valid_until,
            });
        }

        for (namespace, item) in self.items() {
            let digest_id = item.as_ref().digest_id;
            let expected = mso
                .digest(namespace, digest_id)
                .ok_or_else(|| Error::MissingDigest {
                    namespace: namespace.to_string(),
                    digest_id,
                })?;
            if item.digest(mso.digest_algorithm) != expected {
                return Err(Error::DigestMismatch {
                    namespace: namespace.to_string(),
                    element_identifier: item.as_ref().element_identifier.clone(),
                });
            }
        }

        tracing::debug!(
            "issuer authentication of '{}' by '{}' succeeded",
            mso.doc_type,
            x5chain.end_entity_common_name()
        );
        Ok(mso)
    }
}

impl Document {
    /// Verify `deviceAuth` with the device key of the MSO, and that every device-signed element
    /// is authorized for that key.
    ///
    /// The MSO is taken from `issuerAuth` as is; verify it with [IssuerSigned::verify] first.
    pub fn verify_device_auth(&self, session_transcript: &SessionTranscript) -> Result<()> {
        let mso = self.issuer_signed.mso()?.into_inner();
        if mso.doc_type != self.doc_type {
            return Err(Error::DocTypeMismatch {
                document: self.doc_type.clone(),
                mso: mso.doc_type,
            });
        }

        let DeviceAuth::DeviceSignature(device_signature) = &self.device_signed.device_auth else {
            return Err(Error::MACAuthNotSupported);
        };

        let authorizations = mso.device_key_info.key_authorizations.unwrap_or_default();
        for (namespace, items) in self.device_signed.namespaces.as_ref() {
            if let Some(element_identifier) = items
                .keys()
                .find(|id| !authorizations.permitted(namespace, id))
            {
                return Err(Error::UnauthorizedDeviceSignedElement {
                    namespace: namespace.clone(),
                    element_identifier: element_identifier.clone(),
                });
            }
        }

        let device_authentication = Tag24::new(DeviceAuthentication::new(
            session_transcript.clone(),
            self.doc_type.clone(),
            self.device_signed.namespaces.clone(),
        ))?;
        let device_key = mso.device_key_info.device_key.to_public_key()?;
        device_signature.verify(
            &device_key,
            Some(device_authentication.tagged_bytes()),
            &[],
        )?;
        Ok(())
    }
}
