//! Certificate profiles of ISO 18013-5 Annex B.

use time::OffsetDateTime;
use x509_cert::{ext::pkix::KeyUsages, Certificate};

use super::{
    extensions::{
        check_extended_key_usage, check_iaca_basic_constraints, check_key_usage,
        check_key_usage_includes, DOCUMENT_SIGNER_EXTENDED_KEY_USAGE,
        MDOC_READER_EXTENDED_KEY_USAGE,
    },
    invalid,
    signature::issuer_signed_subject,
    validity::is_within,
    Error,
};
use crate::crypto::Curve;
use crate::definitions::x509::{
    util::{common_name, country_name, key_curve, not_after, not_before, state_or_province_name},
    CertificatePolicy,
};

pub fn iaca_key_supported(curve: Option<Curve>) -> bool {
    matches!(curve, Some(Curve::P256 | Curve::P384 | Curve::P521))
}

pub fn document_signer_key_supported(curve: Option<Curve>) -> bool {
    matches!(
        curve,
        Some(Curve::P256 | Curve::P384 | Curve::P521 | Curve::Ed25519 | Curve::Ed448)
    )
}

pub fn check_iaca_validity(
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    policy: &CertificatePolicy,
) -> Result<(), Error> {
    if not_after - not_before > policy.iaca_max_validity() {
        return Err(Error::IACAValidityTooLong);
    }
    Ok(())
}

pub fn check_document_signer_validity(
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    policy: &CertificatePolicy,
) -> Result<(), Error> {
    if not_after - not_before > policy.document_signer_max_validity() {
        return Err(Error::DocumentSignerValidityTooLong);
    }
    Ok(())
}

pub fn check_state_matches(
    document_signer_state: Option<&str>,
    iaca_state: Option<&str>,
) -> Result<(), Error> {
    match (document_signer_state, iaca_state) {
        (Some(ds), Some(iaca)) if ds != iaca => Err(Error::DocumentSignerStateMustMatchIACA),
        _ => Ok(()),
    }
}

/// Self-signed root of an issuing authority.
pub fn iaca(certificate: &Certificate, policy: &CertificatePolicy) -> Result<(), Error> {
    tracing::debug!("validating IACA certificate");
    if certificate.tbs_certificate.issuer != certificate.tbs_certificate.subject {
        return Err(invalid(certificate, "IACA certificate is not self-issued"));
    }
    issuer_signed_subject(certificate, certificate)?;
    check_iaca_basic_constraints(certificate)?;
    check_key_usage(certificate, KeyUsages::KeyCertSign | KeyUsages::CRLSign)?;
    if common_name(certificate).is_none() {
        return Err(invalid(certificate, "subject has no commonName"));
    }
    if country_name(certificate).is_none() {
        return Err(invalid(certificate, "subject has no countryName"));
    }
    check_iaca_validity(not_before(certificate), not_after(certificate), policy)?;
    if !iaca_key_supported(key_curve(certificate)) {
        return Err(Error::IACAUnsupportedPublicKeyType);
    }
    Ok(())
}

/// Document signer issued by `iaca`.
pub fn document_signer(
    certificate: &Certificate,
    iaca: &Certificate,
    policy: &CertificatePolicy,
) -> Result<(), Error> {
    tracing::debug!("validating document signer certificate");
    check_key_usage(certificate, KeyUsages::DigitalSignature.into())?;
    check_extended_key_usage(certificate, DOCUMENT_SIGNER_EXTENDED_KEY_USAGE)?;
    if !is_within(certificate, iaca) {
        return Err(Error::DocumentSignerValidityMustBeWithinIACAValidity);
    }
    check_document_signer_validity(not_before(certificate), not_after(certificate), policy)?;
    if country_name(certificate) != country_name(iaca) {
        return Err(invalid(certificate, "countryName does not match the IACA"));
    }
    check_state_matches(
        state_or_province_name(certificate),
        state_or_province_name(iaca),
    )?;
    if !document_signer_key_supported(key_curve(certificate)) {
        return Err(Error::DocumentSignerUnsupportedPublicKeyType);
    }
    Ok(())
}

/// Leaf certificate of an mdoc reader.
pub fn reader(certificate: &Certificate) -> Result<(), Error> {
    tracing::debug!("validating mdoc reader certificate");
    check_key_usage_includes(certificate, KeyUsages::DigitalSignature)?;
    check_extended_key_usage(certificate, MDOC_READER_EXTENDED_KEY_USAGE)
}
