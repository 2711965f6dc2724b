//! Extension checks of ISO 18013-5 Annex B, tables B.2 (IACA) and B.4 (document signer), and of
//! the mdoc reader certificate profile.

use const_oid::{AssociatedOid, ObjectIdentifier};
use der::{flagset::FlagSet, Decode};
use x509_cert::{
    ext::pkix::{BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages},
    Certificate,
};

use super::{invalid, Error};

pub const DOCUMENT_SIGNER_EXTENDED_KEY_USAGE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.0.18013.5.1.2");
pub const MDOC_READER_EXTENDED_KEY_USAGE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.0.18013.5.1.6");

fn find<'a, E>(certificate: &'a Certificate) -> Result<Option<E>, Error>
where
    E: AssociatedOid + Decode<'a>,
{
    let Some(extension) = certificate
        .tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|ext| ext.extn_id == E::OID)
    else {
        return Ok(None);
    };
    if !extension.critical && E::OID != ExtendedKeyUsage::OID {
        tracing::warn!("expected extension {} to be critical", E::OID);
    }
    E::from_der(extension.extn_value.as_bytes())
        .map(Some)
        .map_err(|e| invalid(certificate, format!("failed to decode extension {}: {e}", E::OID)))
}

/// KeyUsage must carry exactly `expected`.
pub fn check_key_usage(
    certificate: &Certificate,
    expected: FlagSet<KeyUsages>,
) -> Result<(), Error> {
    match find::<KeyUsage>(certificate)? {
        Some(KeyUsage(usages)) if usages == expected => Ok(()),
        Some(KeyUsage(usages)) => Err(invalid(
            certificate,
            format!(
                "unexpected key usage: {:?}",
                usages.into_iter().collect::<Vec<KeyUsages>>()
            ),
        )),
        None => Err(invalid(certificate, "missing KeyUsage")),
    }
}

/// KeyUsage must include `usage`.
pub fn check_key_usage_includes(certificate: &Certificate, usage: KeyUsages) -> Result<(), Error> {
    match find::<KeyUsage>(certificate)? {
        Some(KeyUsage(usages)) if usages.contains(usage) => Ok(()),
        _ => Err(invalid(certificate, format!("key usage does not allow {usage:?}"))),
    }
}

/// BasicConstraints of an IACA: `CA:true, pathLen:0`.
pub fn check_iaca_basic_constraints(certificate: &Certificate) -> Result<(), Error> {
    match find::<BasicConstraints>(certificate)? {
        Some(BasicConstraints {
            ca: true,
            path_len_constraint: Some(0),
        }) => Ok(()),
        found => Err(invalid(
            certificate,
            format!("expected to be CA:true, path_len:0, but found: {found:?}"),
        )),
    }
}

pub fn check_extended_key_usage(
    certificate: &Certificate,
    expected: ObjectIdentifier,
) -> Result<(), Error> {
    match find::<ExtendedKeyUsage>(certificate)? {
        Some(ExtendedKeyUsage(oids)) if oids.contains(&expected) => Ok(()),
        found => Err(invalid(
            certificate,
            format!("expected extended key usage '{expected}', found {found:?}"),
        )),
    }
}
