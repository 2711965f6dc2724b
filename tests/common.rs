use ciborium::Value;
use p256::ecdsa::{DerSignature, SigningKey};
use rand::rngs::OsRng;
use time::{Duration, OffsetDateTime};
use x509_cert::{spki::SubjectPublicKeyInfoOwned, Certificate};

use isomdoc::crypto::{DigestAlgorithm, Signer};
use isomdoc::definitions::device_request::{DataElements, Namespaces};
use isomdoc::definitions::x509::{CertificatePolicy, X5Chain};
use isomdoc::definitions::{CoseKey, ItemsRequest, ValidityInfo};
use isomdoc::issuance::certificates::{
    create_document_signer, create_iaca, create_reader, CertificateParams,
};
use isomdoc::issuance::{Mdoc, Namespaces as IssuerNamespaces};
use isomdoc::presentation::reader::ReaderAuthority;

#[allow(dead_code)]
pub const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
#[allow(dead_code)]
pub const NAMESPACE: &str = "org.iso.18013.5.1";

fn spki(key: &SigningKey) -> SubjectPublicKeyInfoOwned {
    SubjectPublicKeyInfoOwned::from_key(p256::PublicKey::from(key.verifying_key()))
        .expect("encodable public key")
}

fn params(common_name: &str, state: Option<&str>, days: i64) -> CertificateParams {
    let now = OffsetDateTime::now_utc();
    CertificateParams {
        serial: rand::random(),
        not_before: now - Duration::hours(1),
        not_after: now + Duration::days(days),
        common_name: common_name.into(),
        country: "US".into(),
        state: state.map(Into::into),
    }
}

/// An IACA and a document signer issued by it.
#[allow(dead_code)]
pub struct Issuer {
    pub iaca: Certificate,
    pub document_signer: Certificate,
    pub document_signer_key: SigningKey,
}

#[allow(dead_code)]
pub fn issuer() -> Issuer {
    let iaca_key = SigningKey::random(&mut OsRng);
    let iaca = create_iaca::<_, DerSignature>(
        &iaca_key,
        &params("Example IACA", Some("NY"), 365 * 5),
        &CertificatePolicy::default(),
    )
    .expect("IACA certificate");
    let document_signer_key = SigningKey::random(&mut OsRng);
    let document_signer = create_document_signer::<_, DerSignature>(
        &iaca_key,
        &iaca,
        spki(&document_signer_key),
        &params("Example Document Signer", Some("NY"), 365),
        &CertificatePolicy::default(),
    )
    .expect("document signer certificate");
    Issuer {
        iaca,
        document_signer,
        document_signer_key,
    }
}

/// A reader CA and a reader authority with a certificate issued by it.
#[allow(dead_code)]
pub fn reader_authority() -> (Certificate, ReaderAuthority) {
    let root_key = SigningKey::random(&mut OsRng);
    let root = create_iaca::<_, DerSignature>(
        &root_key,
        &params("Example Reader CA", None, 365),
        &CertificatePolicy::default(),
    )
    .expect("reader CA certificate");
    let reader_key = SigningKey::random(&mut OsRng);
    let reader = create_reader::<_, DerSignature>(
        &root_key,
        &root,
        spki(&reader_key),
        &params("Example Reader", None, 30),
    )
    .expect("reader certificate");
    let x5chain = X5Chain::builder()
        .with_certificate(reader)
        .and_then(|builder| builder.build())
        .expect("reader x5chain");
    (root, ReaderAuthority::new(reader_key, x5chain))
}

/// An mDL for `device_key` with a name and age attestations.
#[allow(dead_code)]
pub fn issue_mdl(issuer: &Issuer, device_key: &SigningKey) -> Mdoc {
    let now = OffsetDateTime::now_utc();
    let namespaces: IssuerNamespaces = [(
        NAMESPACE.to_string(),
        [
            ("family_name".to_string(), Value::Text("Doe".into())),
            ("given_name".to_string(), Value::Text("Jane".into())),
            ("age_over_18".to_string(), Value::Bool(true)),
            ("age_over_21".to_string(), Value::Bool(true)),
        ]
        .into(),
    )]
    .into();
    Mdoc::builder()
        .doc_type(DOC_TYPE)
        .namespaces(namespaces)
        .validity_info(ValidityInfo {
            signed: now,
            valid_from: now - Duration::minutes(5),
            valid_until: now + Duration::days(90),
            expected_update: None,
        })
        .digest_algorithm(DigestAlgorithm::SHA256)
        .device_key_info(CoseKey::from(Signer::public_key(device_key)).into())
        .x5chain(
            X5Chain::builder()
                .with_certificate(issuer.document_signer.clone())
                .and_then(|builder| builder.build())
                .expect("document signer x5chain"),
        )
        .issue(&issuer.document_signer_key, &mut OsRng)
        .expect("issued mDL")
}

/// A request for `elements` of the mDL namespace.
#[allow(dead_code)]
pub fn mdl_request(elements: &[&str]) -> ItemsRequest {
    let mut elements = elements.iter().map(|id| (id.to_string(), false));
    let (id, intent_to_retain) = elements.next().expect("at least one element");
    let mut data_elements = DataElements::new(id, intent_to_retain);
    for (id, intent_to_retain) in elements {
        data_elements.insert(id, intent_to_retain);
    }
    ItemsRequest {
        doc_type: DOC_TYPE.to_string(),
        namespaces: Namespaces::new(NAMESPACE.to_string(), data_elements),
        request_info: None,
    }
}
