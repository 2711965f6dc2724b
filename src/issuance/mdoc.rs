use std::collections::{BTreeMap, BTreeSet};

use ciborium::Value;
use rand::{CryptoRng, Rng, RngCore};

use crate::{
    cbor::CborError,
    cose::{sign1, CoseSign1, X5CHAIN_HEADER_LABEL},
    crypto::{self, DigestAlgorithm, SignatureAlgorithm, Signer},
    definitions::{
        device_key, element_value,
        helpers::{ByteStr, NonEmptyMap, NonEmptyVec, Tag24},
        issuer_signed::{IssuerNamespaces, IssuerSignedItemBytes},
        mso::MSO_VERSION,
        x509::{x5chain, X5Chain},
        DeviceKeyInfo, DigestId, DigestIds, IssuerSigned, IssuerSignedItem, Mso, TypedNamespaces,
        ValidityInfo,
    },
};

/// Data elements to issue, by namespace and element identifier.
pub type Namespaces = BTreeMap<String, BTreeMap<String, Value>>;

/// Length of the salt of every issuer-signed item.
const RANDOM_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing parameter: '{0}'")]
    MissingParameter(&'static str),
    #[error("at least one namespace is required")]
    NoNamespaces,
    #[error("namespace '{0}' has no data elements")]
    EmptyNamespace(String),
    #[error("digest id {digest_id} is used twice in namespace '{namespace}'")]
    DuplicateDigestID {
        namespace: String,
        digest_id: DigestId,
    },
    #[error("data element '{identifier}' in namespace '{namespace}': {source}")]
    ElementType {
        namespace: String,
        identifier: String,
        source: element_value::Error,
    },
    #[error("signer key is not the key of the document signer certificate")]
    SignerMismatch,
    #[error("invalid key authorizations: {0}")]
    KeyAuthorizations(#[from] device_key::Error),
    #[error("unable to encode as tagged cbor: {0}")]
    Tag24(#[from] crate::definitions::helpers::tag24::Error),
    #[error("error preparing COSE_Sign1: {0}")]
    Cose(#[from] sign1::Error),
    #[error("invalid x5chain: {0}")]
    X5Chain(#[from] x5chain::Error),
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
    #[error(transparent)]
    Cbor(#[from] CborError),
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// A signed mdoc.
#[derive(Debug, Clone)]
pub struct Mdoc {
    pub doc_type: String,
    pub mso: Mso,
    pub namespaces: IssuerNamespaces,
    pub issuer_auth: CoseSign1,
}

/// An incomplete mdoc, requiring a remotely produced signature to be completed.
#[derive(Debug, Clone)]
pub struct PreparedMdoc {
    doc_type: String,
    mso: Mso,
    namespaces: IssuerNamespaces,
    prepared_sig: sign1::PreparedCoseSign1,
}

/// A data element waiting to be issued, with the digest id chosen by the caller, if any.
#[derive(Debug, Clone)]
struct Element {
    identifier: String,
    value: Value,
    digest_id: Option<DigestId>,
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    doc_type: Option<String>,
    elements: BTreeMap<String, Vec<Element>>,
    validity_info: Option<ValidityInfo>,
    digest_algorithm: Option<DigestAlgorithm>,
    device_key_info: Option<DeviceKeyInfo>,
    x5chain: Option<X5Chain>,
}

impl Mdoc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The issuer-signed part of the mdoc, as presented to a reader.
    pub fn issuer_signed(&self) -> IssuerSigned {
        IssuerSigned {
            namespaces: Some(self.namespaces.clone()),
            issuer_auth: self.issuer_auth.clone(),
        }
    }
}

impl From<Mdoc> for IssuerSigned {
    fn from(mdoc: Mdoc) -> Self {
        IssuerSigned {
            namespaces: Some(mdoc.namespaces),
            issuer_auth: mdoc.issuer_auth,
        }
    }
}

impl PreparedMdoc {
    /// Retrieve the payload for a remote signature.
    pub fn signature_payload(&self) -> &[u8] {
        self.prepared_sig.signature_payload()
    }

    /// The signature algorithm the remote signature must be produced with.
    pub fn signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        self.prepared_sig.algorithm()
    }

    /// Supply the remotely produced signature to complete the prepared mdoc.
    pub fn complete(self, signature: Vec<u8>) -> Mdoc {
        let PreparedMdoc {
            doc_type,
            mso,
            namespaces,
            prepared_sig,
        } = self;

        Mdoc {
            doc_type,
            mso,
            namespaces,
            issuer_auth: prepared_sig.finalize(signature),
        }
    }
}

impl Builder {
    /// Set the document type.
    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Add data elements, with digest ids chosen at random.
    pub fn namespaces(mut self, namespaces: Namespaces) -> Self {
        for (namespace, elements) in namespaces {
            let entry = self.elements.entry(namespace).or_default();
            entry.extend(elements.into_iter().map(|(identifier, value)| Element {
                identifier,
                value,
                digest_id: None,
            }));
        }
        self
    }

    /// Add data elements that carry their declared type, checking each value against it.
    pub fn typed_namespaces(self, namespaces: TypedNamespaces) -> Result<Self> {
        let mut checked = Namespaces::new();
        for (namespace, elements) in namespaces {
            let mut values = BTreeMap::new();
            for (identifier, element) in elements {
                let value = element.to_value().map_err(|source| Error::ElementType {
                    namespace: namespace.clone(),
                    identifier: identifier.clone(),
                    source,
                })?;
                values.insert(identifier, value);
            }
            checked.insert(namespace, values);
        }
        Ok(self.namespaces(checked))
    }

    /// Add a single data element with a caller-chosen digest id.
    pub fn element_with_digest_id(
        mut self,
        namespace: impl Into<String>,
        identifier: impl Into<String>,
        digest_id: DigestId,
        value: Value,
    ) -> Self {
        self.elements
            .entry(namespace.into())
            .or_default()
            .push(Element {
                identifier: identifier.into(),
                value,
                digest_id: Some(digest_id),
            });
        self
    }

    /// Set the validity information.
    pub fn validity_info(mut self, validity_info: ValidityInfo) -> Self {
        self.validity_info = Some(validity_info);
        self
    }

    /// Set the digest algorithm used for hashing the data elements.
    pub fn digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = Some(digest_algorithm);
        self
    }

    /// Set the information about the device key that this mdoc will be bound to.
    pub fn device_key_info(mut self, device_key_info: DeviceKeyInfo) -> Self {
        self.device_key_info = Some(device_key_info);
        self
    }

    /// Set the x5chain of the document signer.
    pub fn x5chain(mut self, x5chain: X5Chain) -> Self {
        self.x5chain = Some(x5chain);
        self
    }

    /// Prepare the mdoc for remote signing.
    ///
    /// The signature algorithm follows the curve of the document signer certificate.
    pub fn prepare<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<PreparedMdoc> {
        let doc_type = self.doc_type.ok_or(Error::MissingParameter("doc_type"))?;
        let validity_info = self
            .validity_info
            .ok_or(Error::MissingParameter("validity_info"))?
            .into_whole_seconds();
        let digest_algorithm = self
            .digest_algorithm
            .ok_or(Error::MissingParameter("digest_algorithm"))?;
        let device_key_info = self
            .device_key_info
            .ok_or(Error::MissingParameter("device_key_info"))?;
        let x5chain = self.x5chain.ok_or(Error::MissingParameter("x5chain"))?;

        if let Some(authorizations) = &device_key_info.key_authorizations {
            authorizations.validate()?;
        }

        let curve = x5chain.end_entity_public_key()?.curve();
        let signature_algorithm = curve
            .signature_algorithm()
            .ok_or(crypto::Error::UnsupportedCurve(curve))?;

        let namespaces = to_issuer_namespaces(self.elements, rng)?;
        let value_digests = namespaces
            .iter()
            .map(|(namespace, items)| {
                (
                    namespace.clone(),
                    digest_namespace(items, digest_algorithm, rng),
                )
            })
            .collect();

        let mso = Mso {
            version: MSO_VERSION.to_string(),
            digest_algorithm,
            value_digests,
            device_key_info,
            doc_type: doc_type.clone(),
            validity_info,
        };
        let mso_bytes = Tag24::new(mso.clone())?;

        let prepared_sig = CoseSign1::builder()
            .payload(mso_bytes.tagged_bytes().to_vec())
            .unprotected_header(X5CHAIN_HEADER_LABEL, x5chain.into_cbor())
            .signature_algorithm(signature_algorithm)
            .prepare()?;

        tracing::debug!(
            "prepared '{doc_type}' with {} namespaces for '{}'",
            namespaces.len(),
            x5chain.end_entity_common_name()
        );

        Ok(PreparedMdoc {
            doc_type,
            mso,
            namespaces,
            prepared_sig,
        })
    }

    /// Directly sign and issue an mdoc.
    ///
    /// `signer` must hold the key of the document signer certificate.
    pub fn issue<S, R>(self, signer: &S, rng: &mut R) -> Result<Mdoc>
    where
        S: Signer + ?Sized,
        R: RngCore + CryptoRng,
    {
        let expected = self
            .x5chain
            .as_ref()
            .ok_or(Error::MissingParameter("x5chain"))?
            .end_entity_public_key()?;
        if signer.curve() != expected.curve() {
            return Err(crypto::Error::CurveMismatch {
                expected: expected.curve(),
                actual: signer.curve(),
            }
            .into());
        }
        if signer.public_key() != expected {
            return Err(Error::SignerMismatch);
        }
        let prepared = self.prepare(rng)?;
        let signature = signer.sign(prepared.signature_payload())?;
        Ok(prepared.complete(signature))
    }
}

fn to_issuer_namespaces<R: RngCore + CryptoRng>(
    elements: BTreeMap<String, Vec<Element>>,
    rng: &mut R,
) -> Result<IssuerNamespaces> {
    let namespaces = elements
        .into_iter()
        .map(|(namespace, elements)| {
            let items = to_issuer_signed_items(&namespace, elements, rng)?
                .into_iter()
                .map(Tag24::new)
                .collect::<Result<Vec<_>, _>>()?;
            let items = NonEmptyVec::try_from(items)
                .map_err(|_| Error::EmptyNamespace(namespace.clone()))?;
            Ok((namespace, items))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;
    NonEmptyMap::maybe_new(namespaces).ok_or(Error::NoNamespaces)
}

fn to_issuer_signed_items<R: RngCore + CryptoRng>(
    namespace: &str,
    elements: Vec<Element>,
    rng: &mut R,
) -> Result<Vec<IssuerSignedItem>> {
    let mut used_ids = BTreeSet::new();
    for digest_id in elements.iter().filter_map(|element| element.digest_id) {
        if !used_ids.insert(digest_id) {
            return Err(Error::DuplicateDigestID {
                namespace: namespace.to_string(),
                digest_id,
            });
        }
    }

    Ok(elements
        .into_iter()
        .map(|element| {
            let digest_id = element
                .digest_id
                .unwrap_or_else(|| generate_digest_id(&mut used_ids, rng));
            IssuerSignedItem {
                digest_id,
                random: ByteStr::from(rng.gen::<[u8; RANDOM_LEN]>().to_vec()),
                element_identifier: element.identifier,
                element_value: element.value,
            }
        })
        .collect())
}

/// Digests of the items, plus 5 to 9 decoy digests so that the number of elements issued in a
/// namespace is not revealed.
fn digest_namespace<R: RngCore + CryptoRng>(
    items: &[IssuerSignedItemBytes],
    digest_algorithm: DigestAlgorithm,
    rng: &mut R,
) -> DigestIds {
    let mut used_ids: BTreeSet<DigestId> = items.iter().map(|item| item.as_ref().digest_id).collect();

    let mut digests: DigestIds = items
        .iter()
        .map(|item| {
            (
                item.as_ref().digest_id,
                ByteStr::from(item.digest(digest_algorithm)),
            )
        })
        .collect();

    for _ in 0..rng.gen_range(5..10) {
        let digest_id = generate_digest_id(&mut used_ids, rng);
        let mut decoy = [0u8; 512];
        rng.fill_bytes(&mut decoy);
        digests.insert(digest_id, ByteStr::from(digest_algorithm.digest(&decoy)));
    }

    digests
}

fn generate_digest_id<R: RngCore>(used_ids: &mut BTreeSet<DigestId>, rng: &mut R) -> DigestId {
    loop {
        let digest_id = DigestId::from(rng.gen::<u32>());
        if used_ids.insert(digest_id) {
            return digest_id;
        }
    }
}
