//! Certificate chain verification and the ISO 18013-5 certificate profiles.

use std::fmt;

use time::OffsetDateTime;
use x509_cert::Certificate;

use super::{util::common_name_or_unknown, CertificatePolicy, X5Chain};
use signature::issuer_signed_subject;
use validity::{check_validity_period_at, is_within};

pub mod extensions;
pub mod profile;
pub(crate) mod signature;
mod validity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no trusted root certificates were supplied")]
    NoRootCertificates,
    #[error("certificate chain is empty")]
    EmptyChain,
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("IACA certificate validity exceeds the maximum age")]
    IACAValidityTooLong,
    #[error("document signer certificate validity exceeds the maximum age")]
    DocumentSignerValidityTooLong,
    #[error("document signer stateOrProvinceName must match the IACA")]
    DocumentSignerStateMustMatchIACA,
    #[error("document signer validity must be within the IACA validity")]
    DocumentSignerValidityMustBeWithinIACAValidity,
    #[error("IACA public key must be EC P-256, P-384 or P-521")]
    IACAUnsupportedPublicKeyType,
    #[error("document signer public key type is not allowed")]
    DocumentSignerUnsupportedPublicKeyType,
}

pub(crate) fn invalid(certificate: &Certificate, reason: impl fmt::Display) -> Error {
    Error::InvalidCertificate(format!(
        "'{}': {reason}",
        common_name_or_unknown(certificate)
    ))
}

type RootCheck<'a> = Box<dyn Fn(&Certificate) -> Result<(), Error> + 'a>;
type IssuedCheck<'a> = Box<dyn Fn(&Certificate, &Certificate) -> Result<(), Error> + 'a>;

/// Profile checks run by [verify_chain] once the chain itself is sound.
///
/// The intermediate and leaf checks receive the certificate and its issuer.
#[derive(Default)]
pub struct ChainPolicy<'a> {
    root: Option<RootCheck<'a>>,
    intermediate: Option<IssuedCheck<'a>>,
    leaf: Option<IssuedCheck<'a>>,
}

impl<'a> ChainPolicy<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, check: impl Fn(&Certificate) -> Result<(), Error> + 'a) -> Self {
        self.root = Some(Box::new(check));
        self
    }

    pub fn with_intermediate(
        mut self,
        check: impl Fn(&Certificate, &Certificate) -> Result<(), Error> + 'a,
    ) -> Self {
        self.intermediate = Some(Box::new(check));
        self
    }

    pub fn with_leaf(
        mut self,
        check: impl Fn(&Certificate, &Certificate) -> Result<(), Error> + 'a,
    ) -> Self {
        self.leaf = Some(Box::new(check));
        self
    }
}

/// Verify `chain` (ordered from the certificate nearest the root to the leaf) against `roots`.
///
/// The roots are trust anchors and are not expected in the chain. Returns the root the chain
/// is anchored on.
pub fn verify_chain<'r>(
    roots: &'r [Certificate],
    chain: &[Certificate],
    now: OffsetDateTime,
    policy: &ChainPolicy<'_>,
) -> Result<&'r Certificate, Error> {
    if roots.is_empty() {
        return Err(Error::NoRootCertificates);
    }
    let (first, _) = chain.split_first().ok_or(Error::EmptyChain)?;

    let root = roots
        .iter()
        .find(|root| issued_by(first, root).is_ok())
        .ok_or_else(|| invalid(first, "not issued by any trusted root certificate"))?;

    let mut issuer = root;
    for certificate in chain {
        issued_by(certificate, issuer)?;
        issuer = certificate;
    }

    if let Some(check) = &policy.root {
        check(root)?;
    }
    let mut issuer = root;
    for (position, certificate) in chain.iter().enumerate() {
        let check = if position + 1 == chain.len() {
            &policy.leaf
        } else {
            &policy.intermediate
        };
        if let Some(check) = check {
            check(certificate, issuer)?;
        }
        if !is_within(certificate, issuer) {
            return Err(invalid(
                certificate,
                format!(
                    "validity is not within that of '{}'",
                    common_name_or_unknown(issuer)
                ),
            ));
        }
        issuer = certificate;
    }

    check_validity_period_at(issuer, now)?;
    Ok(root)
}

/// `subject` names `issuer` and carries its signature.
///
/// Validity nesting is checked after the profile checks, which report it for document signers.
fn issued_by(subject: &Certificate, issuer: &Certificate) -> Result<(), Error> {
    if subject.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Err(invalid(
            subject,
            format!(
                "issuer does not match the subject of '{}'",
                common_name_or_unknown(issuer)
            ),
        ));
    }
    issuer_signed_subject(subject, issuer)
}

/// Ruleset for x5chain validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRuleset {
    /// An IACA root and a document signer leaf, as carried by `issuerAuth`.
    Mdl,
    /// An mdoc reader leaf, as carried by `readerAuth`.
    MdlReader,
}

impl ValidationRuleset {
    pub fn validate(
        self,
        x5chain: &X5Chain,
        roots: &[Certificate],
        now: OffsetDateTime,
        certificate_policy: &CertificatePolicy,
    ) -> Result<(), Error> {
        let mut chain = x5chain.leaf_last();
        // A chain may carry its own trust anchor.
        while chain.len() > 1 && roots.contains(&chain[0]) {
            chain.remove(0);
        }

        let policy = match self {
            ValidationRuleset::Mdl => ChainPolicy::new()
                .with_root(|iaca| profile::iaca(iaca, certificate_policy))
                .with_intermediate(|certificate, _| {
                    Err(invalid(
                        certificate,
                        "no certificate may sit between the IACA and the document signer",
                    ))
                })
                .with_leaf(|document_signer, iaca| {
                    profile::document_signer(document_signer, iaca, certificate_policy)
                }),
            ValidationRuleset::MdlReader => {
                ChainPolicy::new().with_leaf(|reader, _| profile::reader(reader))
            }
        };

        verify_chain(roots, &chain, now, &policy).map(|root| {
            tracing::debug!(
                "x5chain of '{}' anchored on '{}'",
                x5chain.end_entity_common_name(),
                common_name_or_unknown(root)
            );
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::x509::test::{
        iaca_and_document_signer, issue_document_signer, TestCertificates,
    };
    use crate::issuance::certificates::{create_iaca, CertificateParams};
    use p256::ecdsa::DerSignature;
    use time::Duration;

    #[test_log::test]
    fn valid_mdoc_issuer_certificate_chain_is_validated() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let x5chain = X5Chain::builder()
            .with_certificate(document_signer)
            .unwrap()
            .build()
            .unwrap();
        ValidationRuleset::Mdl
            .validate(
                &x5chain,
                &[iaca],
                OffsetDateTime::now_utc(),
                &CertificatePolicy::default(),
            )
            .unwrap();
    }

    #[test]
    fn chain_carrying_its_root_is_validated() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let x5chain = X5Chain::builder()
            .with_certificate(document_signer)
            .unwrap()
            .with_certificate(iaca.clone())
            .unwrap()
            .build()
            .unwrap();
        ValidationRuleset::Mdl
            .validate(
                &x5chain,
                &[iaca],
                OffsetDateTime::now_utc(),
                &CertificatePolicy::default(),
            )
            .unwrap();
    }

    #[test]
    fn reader_profile_requires_reader_usage() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let x5chain = X5Chain::builder()
            .with_certificate(document_signer)
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(
            ValidationRuleset::MdlReader.validate(
                &x5chain,
                &[iaca],
                OffsetDateTime::now_utc(),
                &CertificatePolicy::default(),
            ),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn missing_inputs() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            verify_chain(&[], &[document_signer], now, &ChainPolicy::new()),
            Err(Error::NoRootCertificates)
        );
        assert_eq!(
            verify_chain(&[iaca], &[], now, &ChainPolicy::new()).map(|_| ()),
            Err(Error::EmptyChain)
        );
    }

    #[test]
    fn three_certificate_chain() {
        let certificates = iaca_and_document_signer();
        let (intermediate, intermediate_key) = (
            certificates.document_signer.clone(),
            certificates.document_signer_key.clone(),
        );
        let (leaf, _) = issue_document_signer(&intermediate_key, &intermediate);
        let now = OffsetDateTime::now_utc();
        let roots = [certificates.iaca];

        verify_chain(
            &roots,
            &[intermediate, leaf.clone()],
            now,
            &ChainPolicy::new(),
        )
        .unwrap();

        // Without the middle certificate the leaf is not issued by the root.
        assert!(matches!(
            verify_chain(&roots, &[leaf], now, &ChainPolicy::new()),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let TestCertificates {
            iaca,
            mut document_signer,
            ..
        } = iaca_and_document_signer();
        let mut signature = document_signer.signature.raw_bytes().to_vec();
        let last = signature.len() - 2;
        signature[last] ^= 0x01;
        document_signer.signature = der::asn1::BitString::from_bytes(&signature).unwrap();
        assert!(matches!(
            verify_chain(
                &[iaca],
                &[document_signer],
                OffsetDateTime::now_utc(),
                &ChainPolicy::new()
            ),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn outside_validity_window() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let later = OffsetDateTime::now_utc() + Duration::days(3650);
        assert!(matches!(
            verify_chain(&[iaca], &[document_signer], later, &ChainPolicy::new()),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn document_signer_outliving_its_iaca_is_rejected() {
        let TestCertificates {
            iaca_key,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let now = OffsetDateTime::now_utc();
        // Same subject and key as the issuing IACA, expiring before the document signer.
        let short_lived_iaca = create_iaca::<_, DerSignature>(
            &iaca_key,
            &CertificateParams {
                serial: rand::random(),
                not_before: now - Duration::days(1),
                not_after: now + Duration::days(30),
                common_name: "Test IACA".into(),
                country: "US".into(),
                state: Some("NY".into()),
            },
            &CertificatePolicy::default(),
        )
        .unwrap();
        let x5chain = X5Chain::builder()
            .with_certificate(document_signer.clone())
            .unwrap()
            .build()
            .unwrap();
        let roots = [short_lived_iaca];

        assert_eq!(
            ValidationRuleset::Mdl.validate(&x5chain, &roots, now, &CertificatePolicy::default()),
            Err(Error::DocumentSignerValidityMustBeWithinIACAValidity)
        );
        assert!(matches!(
            verify_chain(&roots, &[document_signer], now, &ChainPolicy::new()),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn callback_errors_are_returned() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let policy = ChainPolicy::new().with_leaf(|_, _| Err(Error::DocumentSignerValidityTooLong));
        assert_eq!(
            verify_chain(
                &[iaca],
                &[document_signer],
                OffsetDateTime::now_utc(),
                &policy
            )
            .map(|_| ()),
            Err(Error::DocumentSignerValidityTooLong)
        );
    }
}
