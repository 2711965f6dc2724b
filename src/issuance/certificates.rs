//! Creation of IACA and document signer certificates under the ISO 18013-5 Annex B profile.
//!
//! Both functions check the [CertificatePolicy] before anything is signed, so a certificate that
//! would fail validation is never produced.

use std::{str::FromStr, time::SystemTime};

use der::asn1::{GeneralizedTime, OctetString, UtcTime};
use sha1::{Digest, Sha1};
use signature::Keypair;
use time::OffsetDateTime;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    ext::pkix::{
        AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages,
        SubjectKeyIdentifier,
    },
    name::Name,
    serial_number::SerialNumber,
    spki::{
        DynSignatureAlgorithmIdentifier, EncodePublicKey, SignatureBitStringEncoding,
        SubjectPublicKeyInfoOwned,
    },
    time::{Time, Validity},
    Certificate,
};

use crate::definitions::x509::{
    util::{key_curve, state_or_province_name, to_offset_date_time},
    validation::{
        self,
        extensions::{DOCUMENT_SIGNER_EXTENDED_KEY_USAGE, MDOC_READER_EXTENDED_KEY_USAGE},
        profile::{
            check_document_signer_validity, check_iaca_validity, check_state_matches,
            document_signer_key_supported, iaca_key_supported,
        },
    },
    CertificatePolicy,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Policy(#[from] validation::Error),
    #[error("invalid certificate field: {0}")]
    Der(#[from] der::Error),
    #[error("unable to encode public key: {0}")]
    PublicKey(#[from] x509_cert::spki::Error),
    #[error("unable to build certificate: {0}")]
    Builder(#[from] x509_cert::builder::Error),
    #[error("reader certificate validity must lie within that of its issuer")]
    ReaderValidityOutsideIssuer,
}

/// Subject and validity of a certificate to create.
#[derive(Debug, Clone)]
pub struct CertificateParams {
    pub serial: u64,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub common_name: String,
    pub country: String,
    pub state: Option<String>,
}

impl CertificateParams {
    fn subject(&self) -> Result<Name, der::Error> {
        let mut name = format!(
            "CN={},C={}",
            escape(&self.common_name),
            escape(&self.country)
        );
        if let Some(state) = &self.state {
            name.push_str(&format!(",ST={}", escape(state)));
        }
        Name::from_str(&name)
    }

    fn validity(&self) -> Result<Validity, der::Error> {
        Ok(Validity {
            not_before: x509_time(self.not_before)?,
            not_after: x509_time(self.not_after)?,
        })
    }
}

/// Create a self-signed IACA certificate for `key`.
pub fn create_iaca<S, Sig>(
    key: &S,
    params: &CertificateParams,
    policy: &CertificatePolicy,
) -> Result<Certificate, Error>
where
    S: Keypair + DynSignatureAlgorithmIdentifier + signature::Signer<Sig>,
    S::VerifyingKey: EncodePublicKey,
    Sig: SignatureBitStringEncoding,
{
    let validity = params.validity()?;
    check_iaca_validity(
        to_offset_date_time(&validity.not_before),
        to_offset_date_time(&validity.not_after),
        policy,
    )?;

    let spki = SubjectPublicKeyInfoOwned::from_key(key.verifying_key())?;
    let mut builder = CertificateBuilder::new(
        Profile::Manual { issuer: None },
        SerialNumber::from(params.serial),
        validity,
        params.subject()?,
        spki.clone(),
        key,
    )?;
    builder.add_extension(&SubjectKeyIdentifier(key_identifier(&spki)?))?;
    builder.add_extension(&KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign))?;
    builder.add_extension(&BasicConstraints {
        ca: true,
        path_len_constraint: Some(0),
    })?;

    let certificate = builder.build::<Sig>()?;
    if !iaca_key_supported(key_curve(&certificate)) {
        return Err(validation::Error::IACAUnsupportedPublicKeyType.into());
    }
    tracing::debug!("created IACA certificate with serial {}", params.serial);
    Ok(certificate)
}

/// Create a document signer certificate for `document_signer_key`, signed by the IACA.
pub fn create_document_signer<S, Sig>(
    iaca_key: &S,
    iaca: &Certificate,
    document_signer_key: SubjectPublicKeyInfoOwned,
    params: &CertificateParams,
    policy: &CertificatePolicy,
) -> Result<Certificate, Error>
where
    S: Keypair + DynSignatureAlgorithmIdentifier + signature::Signer<Sig>,
    S::VerifyingKey: EncodePublicKey,
    Sig: SignatureBitStringEncoding,
{
    let validity = params.validity()?;
    let not_before = to_offset_date_time(&validity.not_before);
    let not_after = to_offset_date_time(&validity.not_after);
    let iaca_validity = &iaca.tbs_certificate.validity;
    if not_before < to_offset_date_time(&iaca_validity.not_before)
        || not_after > to_offset_date_time(&iaca_validity.not_after)
    {
        return Err(validation::Error::DocumentSignerValidityMustBeWithinIACAValidity.into());
    }
    check_document_signer_validity(not_before, not_after, policy)?;
    check_state_matches(params.state.as_deref(), state_or_province_name(iaca))?;

    let iaca_spki = SubjectPublicKeyInfoOwned::from_key(iaca_key.verifying_key())?;
    let mut builder = CertificateBuilder::new(
        Profile::Manual {
            issuer: Some(iaca.tbs_certificate.subject.clone()),
        },
        SerialNumber::from(params.serial),
        validity,
        params.subject()?,
        document_signer_key.clone(),
        iaca_key,
    )?;
    builder.add_extension(&SubjectKeyIdentifier(key_identifier(
        &document_signer_key,
    )?))?;
    builder.add_extension(&AuthorityKeyIdentifier {
        key_identifier: Some(key_identifier(&iaca_spki)?),
        ..Default::default()
    })?;
    builder.add_extension(&KeyUsage(KeyUsages::DigitalSignature.into()))?;
    builder.add_extension(&ExtendedKeyUsage(vec![DOCUMENT_SIGNER_EXTENDED_KEY_USAGE]))?;

    let certificate = builder.build::<Sig>()?;
    if !document_signer_key_supported(key_curve(&certificate)) {
        return Err(validation::Error::DocumentSignerUnsupportedPublicKeyType.into());
    }
    tracing::debug!(
        "created document signer certificate with serial {}",
        params.serial
    );
    Ok(certificate)
}

/// Create an mdoc reader authentication certificate for `reader_key`, signed by the reader CA
/// `issuer`.
pub fn create_reader<S, Sig>(
    issuer_key: &S,
    issuer: &Certificate,
    reader_key: SubjectPublicKeyInfoOwned,
    params: &CertificateParams,
) -> Result<Certificate, Error>
where
    S: Keypair + DynSignatureAlgorithmIdentifier + signature::Signer<Sig>,
    S::VerifyingKey: EncodePublicKey,
    Sig: SignatureBitStringEncoding,
{
    let validity = params.validity()?;
    let issuer_validity = &issuer.tbs_certificate.validity;
    if to_offset_date_time(&validity.not_before)
        < to_offset_date_time(&issuer_validity.not_before)
        || to_offset_date_time(&validity.not_after)
            > to_offset_date_time(&issuer_validity.not_after)
    {
        return Err(Error::ReaderValidityOutsideIssuer);
    }

    let issuer_spki = SubjectPublicKeyInfoOwned::from_key(issuer_key.verifying_key())?;
    let mut builder = CertificateBuilder::new(
        Profile::Manual {
            issuer: Some(issuer.tbs_certificate.subject.clone()),
        },
        SerialNumber::from(params.serial),
        validity,
        params.subject()?,
        reader_key.clone(),
        issuer_key,
    )?;
    builder.add_extension(&SubjectKeyIdentifier(key_identifier(&reader_key)?))?;
    builder.add_extension(&AuthorityKeyIdentifier {
        key_identifier: Some(key_identifier(&issuer_spki)?),
        ..Default::default()
    })?;
    builder.add_extension(&KeyUsage(KeyUsages::DigitalSignature.into()))?;
    builder.add_extension(&ExtendedKeyUsage(vec![MDOC_READER_EXTENDED_KEY_USAGE]))?;

    let certificate = builder.build::<Sig>()?;
    tracing::debug!("created reader certificate with serial {}", params.serial);
    Ok(certificate)
}

/// SHA-1 of the subject public key bit string (RFC 5280 §4.2.1.2, method 1).
fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Result<OctetString, der::Error> {
    OctetString::new(Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec())
}

/// UTCTime up to 2049, GeneralizedTime from 2050 (RFC 5280 §4.1.2.5).
fn x509_time(time: OffsetDateTime) -> Result<Time, der::Error> {
    let system_time = SystemTime::from(time);
    if time.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_system_time(system_time)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_system_time(
            system_time,
        )?))
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '+' | '=' | '\\' | '"' | '<' | '>' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::x509::{
        util::{common_name, country_name},
        validation::profile,
    };
    use p256::ecdsa::{DerSignature, SigningKey};
    use rand::rngs::OsRng;
    use time::{macros::datetime, Duration};

    fn params(not_before: OffsetDateTime, not_after: OffsetDateTime) -> CertificateParams {
        CertificateParams {
            serial: 1,
            not_before,
            not_after,
            common_name: "Example, IACA".into(),
            country: "US".into(),
            state: Some("NY".into()),
        }
    }

    #[test_log::test]
    fn iaca_is_valid_under_its_profile() {
        let key = SigningKey::random(&mut OsRng);
        let start = datetime!(2024-01-01 0:00 UTC);
        let iaca = create_iaca::<_, DerSignature>(
            &key,
            &params(start, start + Duration::days(365 * 5)),
            &CertificatePolicy::default(),
        )
        .unwrap();
        assert_eq!(common_name(&iaca), Some("Example, IACA"));
        assert_eq!(country_name(&iaca), Some("US"));
        profile::iaca(&iaca, &CertificatePolicy::default()).unwrap();
    }

    #[test]
    fn iaca_validity_is_limited() {
        let key = SigningKey::random(&mut OsRng);
        let start = datetime!(2024-01-01 0:00 UTC);
        let policy = CertificatePolicy {
            iaca_max_age_years: 1,
            ..Default::default()
        };
        let result = create_iaca::<_, DerSignature>(
            &key,
            &params(start, start + Duration::days(800)),
            &policy,
        );
        assert!(matches!(
            result,
            Err(Error::Policy(validation::Error::IACAValidityTooLong))
        ));
    }

    #[test]
    fn document_signer_constraints() {
        let iaca_key = SigningKey::random(&mut OsRng);
        let ds_key = SigningKey::random(&mut OsRng);
        let ds_spki =
            SubjectPublicKeyInfoOwned::from_key(p256::PublicKey::from(ds_key.verifying_key()))
                .unwrap();
        let start = datetime!(2024-01-01 0:00 UTC);
        let policy = CertificatePolicy::default();
        let iaca = create_iaca::<_, DerSignature>(
            &iaca_key,
            &params(start, start + Duration::days(365 * 5)),
            &policy,
        )
        .unwrap();

        let too_long = create_document_signer::<_, DerSignature>(
            &iaca_key,
            &iaca,
            ds_spki.clone(),
            &params(start, start + Duration::days(500)),
            &policy,
        );
        assert!(matches!(
            too_long,
            Err(Error::Policy(validation::Error::DocumentSignerValidityTooLong))
        ));

        let outside = create_document_signer::<_, DerSignature>(
            &iaca_key,
            &iaca,
            ds_spki.clone(),
            &params(start - Duration::days(1), start + Duration::days(100)),
            &policy,
        );
        assert!(matches!(
            outside,
            Err(Error::Policy(
                validation::Error::DocumentSignerValidityMustBeWithinIACAValidity
            ))
        ));

        let mut other_state = params(start, start + Duration::days(100));
        other_state.state = Some("CA".into());
        let state = create_document_signer::<_, DerSignature>(
            &iaca_key,
            &iaca,
            ds_spki.clone(),
            &other_state,
            &policy,
        );
        assert!(matches!(
            state,
            Err(Error::Policy(validation::Error::DocumentSignerStateMustMatchIACA))
        ));

        let ds = create_document_signer::<_, DerSignature>(
            &iaca_key,
            &iaca,
            ds_spki,
            &params(start, start + Duration::days(100)),
            &policy,
        )
        .unwrap();
        profile::document_signer(&ds, &iaca, &policy).unwrap();
    }

    #[test]
    fn reader_certificate_has_reader_usage() {
        let root_key = SigningKey::random(&mut OsRng);
        let reader_key = SigningKey::random(&mut OsRng);
        let reader_spki =
            SubjectPublicKeyInfoOwned::from_key(p256::PublicKey::from(reader_key.verifying_key()))
                .unwrap();
        let start = datetime!(2024-01-01 0:00 UTC);
        let root = create_iaca::<_, DerSignature>(
            &root_key,
            &params(start, start + Duration::days(365)),
            &CertificatePolicy::default(),
        )
        .unwrap();
        let reader = create_reader::<_, DerSignature>(
            &root_key,
            &root,
            reader_spki.clone(),
            &params(start, start + Duration::days(30)),
        )
        .unwrap();
        profile::reader(&reader).unwrap();
        assert!(profile::reader(&root).is_err());

        let outside = create_reader::<_, DerSignature>(
            &root_key,
            &root,
            reader_spki,
            &params(start, start + Duration::days(400)),
        );
        assert!(matches!(outside, Err(Error::ReaderValidityOutsideIssuer)));
    }
}
