use ciborium::Value;
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use rstest::rstest;
use time::{Duration, OffsetDateTime};

use isomdoc::crypto::{DigestAlgorithm, Signer};
use isomdoc::definitions::element_value;
use isomdoc::definitions::x509::X5Chain;
use isomdoc::definitions::{CoseKey, IssuerSigned, TypedNamespaces, ValidityInfo};
use isomdoc::issuance::{self, Mdoc};
use isomdoc::presentation::authentication::Error;
use isomdoc::presentation::Stringify;

mod common;

use common::{DOC_TYPE, NAMESPACE};

#[test_log::test]
fn issued_mdl_verifies_after_transport() {
    let issuer = common::issuer();
    let device_key = SigningKey::random(&mut OsRng);
    let mdoc = common::issue_mdl(&issuer, &device_key);

    let encoded = mdoc.issuer_signed().stringify().unwrap();
    let issuer_signed = IssuerSigned::parse(&encoded).unwrap();
    let mso = issuer_signed
        .verify(&[issuer.iaca], OffsetDateTime::now_utc())
        .unwrap();

    assert_eq!(mso.doc_type, DOC_TYPE);
    assert_eq!(mso.digest_algorithm, DigestAlgorithm::SHA256);
    let digests = &mso.value_digests[NAMESPACE];
    // Four elements plus at least five decoys.
    assert!(digests.len() >= 9);
    for (_, item) in issuer_signed.items() {
        assert!(item.as_ref().random.as_ref().len() >= 16);
    }
}

#[rstest]
#[case::before_valid_from(-Duration::days(1))]
#[case::after_valid_until(Duration::days(91))]
fn verification_is_bound_to_validity(#[case] offset: Duration) {
    let issuer = common::issuer();
    let device_key = SigningKey::random(&mut OsRng);
    let mdoc = common::issue_mdl(&issuer, &device_key);
    let result = mdoc
        .issuer_signed()
        .verify(&[issuer.iaca], OffsetDateTime::now_utc() + offset);
    assert!(matches!(
        result,
        Err(Error::NotValidAt { .. }) | Err(Error::Certificate(_))
    ));
}

#[test]
fn other_issuers_are_not_trusted() {
    let issuer = common::issuer();
    let other = common::issuer();
    let device_key = SigningKey::random(&mut OsRng);
    let mdoc = common::issue_mdl(&issuer, &device_key);
    assert!(matches!(
        mdoc.issuer_signed()
            .verify(&[other.iaca], OffsetDateTime::now_utc()),
        Err(Error::Certificate(_))
    ));
    assert!(matches!(
        mdoc.issuer_signed().verify(&[], OffsetDateTime::now_utc()),
        Err(Error::Certificate(_))
    ));
}

const TYPED_NAMESPACES: &str = r#"{
    "org.iso.18013.5.1": {
        "family_name": { "type": "tstr", "value": "Doe" },
        "birth_date": { "type": "full-date", "value": "1990-03-31" },
        "issue_date": { "type": "tdate", "value": "2024-01-01T00:00:00Z" },
        "age_over_21": { "type": "bool", "value": true },
        "height": { "type": "uint", "value": "175" }
    }
}"#;

fn typed_builder(issuer: &common::Issuer, device_key: &SigningKey) -> issuance::Builder {
    let now = OffsetDateTime::now_utc();
    Mdoc::builder()
        .doc_type(DOC_TYPE)
        .validity_info(ValidityInfo {
            signed: now,
            valid_from: now - Duration::minutes(5),
            valid_until: now + Duration::days(30),
            expected_update: None,
        })
        .digest_algorithm(DigestAlgorithm::SHA256)
        .device_key_info(CoseKey::from(Signer::public_key(device_key)).into())
        .x5chain(
            X5Chain::builder()
                .with_certificate(issuer.document_signer.clone())
                .and_then(|builder| builder.build())
                .unwrap(),
        )
}

#[test]
fn typed_elements_are_issued_with_their_declared_types() -> anyhow::Result<()> {
    let issuer = common::issuer();
    let device_key = SigningKey::random(&mut OsRng);
    let namespaces: TypedNamespaces = serde_json::from_str(TYPED_NAMESPACES)?;
    let mdoc = typed_builder(&issuer, &device_key)
        .typed_namespaces(namespaces)?
        .issue(&issuer.document_signer_key, &mut OsRng)?;

    let issuer_signed = IssuerSigned::parse(&mdoc.issuer_signed().stringify()?)?;
    issuer_signed.verify(&[issuer.iaca], OffsetDateTime::now_utc())?;
    let value = |id: &str| {
        issuer_signed
            .items()
            .find(|(_, item)| item.as_ref().element_identifier == id)
            .map(|(_, item)| item.as_ref().element_value.clone())
    };
    assert_eq!(
        value("birth_date"),
        Some(Value::Tag(1004, Box::new(Value::Text("1990-03-31".into()))))
    );
    assert_eq!(
        value("issue_date"),
        Some(Value::Tag(0, Box::new(Value::Text("2024-01-01T00:00:00Z".into()))))
    );
    assert_eq!(value("height"), Some(Value::Integer(175.into())));
    Ok(())
}

#[rstest]
#[case::negative_uint(r#"{"org.iso.18013.5.1": {"height": {"type": "uint", "value": -3}}}"#)]
#[case::number_as_text(r#"{"org.iso.18013.5.1": {"family_name": {"type": "tstr", "value": 7}}}"#)]
#[case::invalid_date(
    r#"{"org.iso.18013.5.1": {"birth_date": {"type": "full-date", "value": "1990-02-30"}}}"#
)]
fn mistyped_elements_are_not_issued(#[case] json: &str) -> anyhow::Result<()> {
    let issuer = common::issuer();
    let device_key = SigningKey::random(&mut OsRng);
    let namespaces: TypedNamespaces = serde_json::from_str(json)?;
    let result = typed_builder(&issuer, &device_key).typed_namespaces(namespaces);
    assert!(matches!(
        result,
        Err(issuance::Error::ElementType {
            source: element_value::Error::TypeMismatch { .. },
            ..
        })
    ));
    Ok(())
}
