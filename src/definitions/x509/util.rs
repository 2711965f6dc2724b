use const_oid::{
    db::{
        rfc2256::STATE_OR_PROVINCE_NAME,
        rfc4519::{COMMON_NAME, COUNTRY_NAME},
    },
    ObjectIdentifier,
};
use der::{
    asn1::{Ia5StringRef, PrintableStringRef, TeletexStringRef, Utf8StringRef},
    Tag, Tagged,
};
use time::OffsetDateTime;
use x509_cert::{attr::AttributeValue, spki::SubjectPublicKeyInfoOwned, time::Time, Certificate};

use crate::crypto::{self, Curve, PublicKey};

pub const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
pub const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
pub const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
pub const SECP521R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");
pub const ID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
pub const ID_ED448: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.113");

/// Curve of the subject public key, if it is one mdoc certificates may carry.
pub fn key_curve(certificate: &Certificate) -> Option<Curve> {
    spki_curve(&certificate.tbs_certificate.subject_public_key_info)
}

pub fn spki_curve(spki: &SubjectPublicKeyInfoOwned) -> Option<Curve> {
    let algorithm = &spki.algorithm;
    match algorithm.oid {
        ID_ED25519 => Some(Curve::Ed25519),
        ID_ED448 => Some(Curve::Ed448),
        ID_EC_PUBLIC_KEY => {
            let named_curve: ObjectIdentifier =
                algorithm.parameters.as_ref()?.decode_as().ok()?;
            match named_curve {
                SECP256R1 => Some(Curve::P256),
                SECP384R1 => Some(Curve::P384),
                SECP521R1 => Some(Curve::P521),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Get the public key from a certificate for verification.
pub fn public_key(certificate: &Certificate) -> Result<PublicKey, crypto::Error> {
    spki_public_key(&certificate.tbs_certificate.subject_public_key_info)
}

pub fn spki_public_key(spki: &SubjectPublicKeyInfoOwned) -> Result<PublicKey, crypto::Error> {
    let curve = spki_curve(spki)
        .ok_or_else(|| crypto::Error::UnsupportedKeyAlgorithm(spki.algorithm.oid.to_string()))?;
    PublicKey::from_bytes(curve, spki.subject_public_key.raw_bytes())
}

pub fn common_name(certificate: &Certificate) -> Option<&str> {
    subject_attributes(certificate, COMMON_NAME).next()
}

/// Get the first CommonName of the X.509 certificate, or return "Unknown".
pub fn common_name_or_unknown(certificate: &Certificate) -> &str {
    common_name(certificate).unwrap_or("Unknown")
}

pub fn country_name(certificate: &Certificate) -> Option<&str> {
    subject_attributes(certificate, COUNTRY_NAME).next()
}

pub fn state_or_province_name(certificate: &Certificate) -> Option<&str> {
    subject_attributes(certificate, STATE_OR_PROVINCE_NAME).next()
}

fn subject_attributes(
    certificate: &Certificate,
    oid: ObjectIdentifier,
) -> impl Iterator<Item = &str> {
    certificate
        .tbs_certificate
        .subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(move |attribute| attribute.oid == oid)
        .filter_map(|attribute| attribute_value_to_str(&attribute.value))
}

pub fn attribute_value_to_str(av: &AttributeValue) -> Option<&str> {
    match av.tag() {
        Tag::PrintableString => PrintableStringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::Utf8String => Utf8StringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::Ia5String => Ia5StringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::TeletexString => TeletexStringRef::try_from(av).ok().map(|s| s.as_str()),
        _ => None,
    }
}

pub fn to_offset_date_time(time: &Time) -> OffsetDateTime {
    OffsetDateTime::from(time.to_system_time())
}

pub fn not_before(certificate: &Certificate) -> OffsetDateTime {
    to_offset_date_time(&certificate.tbs_certificate.validity.not_before)
}

pub fn not_after(certificate: &Certificate) -> OffsetDateTime {
    to_offset_date_time(&certificate.tbs_certificate.validity.not_after)
}
