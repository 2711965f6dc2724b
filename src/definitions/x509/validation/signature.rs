use const_oid::ObjectIdentifier;
use der::Encode;
use x509_cert::Certificate;

use super::{invalid, Error};
use crate::crypto::{Curve, DigestAlgorithm, SignatureEncoding};
use crate::definitions::x509::util::{public_key, ID_ED25519};

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const ECDSA_WITH_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");

/// Check that the issuer certificate signed the subject certificate.
pub fn issuer_signed_subject(subject: &Certificate, issuer: &Certificate) -> Result<(), Error> {
    let issuer_key = public_key(issuer)
        .map_err(|e| invalid(issuer, format!("unusable issuer public key: {e}")))?;
    let tbs = subject
        .tbs_certificate
        .to_der()
        .map_err(|e| invalid(subject, format!("unable to encode TBSCertificate: {e}")))?;
    let signature = subject.signature.raw_bytes();

    let outcome = match subject.signature_algorithm.oid {
        ECDSA_WITH_SHA256 => {
            issuer_key.verify_ecdsa(DigestAlgorithm::SHA256, &tbs, signature, SignatureEncoding::Der)
        }
        ECDSA_WITH_SHA384 => {
            issuer_key.verify_ecdsa(DigestAlgorithm::SHA384, &tbs, signature, SignatureEncoding::Der)
        }
        ECDSA_WITH_SHA512 => {
            issuer_key.verify_ecdsa(DigestAlgorithm::SHA512, &tbs, signature, SignatureEncoding::Der)
        }
        ID_ED25519 if issuer_key.curve() == Curve::Ed25519 => {
            issuer_key.verify_eddsa(&tbs, signature)
        }
        other => {
            return Err(invalid(
                subject,
                format!("unsupported signature algorithm {other}"),
            ))
        }
    };

    outcome.map_err(|e| {
        tracing::info!("subject certificate signature could not be validated: {e}");
        invalid(subject, format!("signature does not verify: {e}"))
    })
}

#[cfg(test)]
mod test {
    use super::issuer_signed_subject;
    use crate::definitions::x509::test::{iaca_and_document_signer, TestCertificates};

    #[test]
    fn correct_signature() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        issuer_signed_subject(&document_signer, &iaca).unwrap();
        issuer_signed_subject(&iaca, &iaca).unwrap();
    }

    #[test]
    fn incorrect_signature() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        assert!(issuer_signed_subject(&iaca, &document_signer).is_err());
    }
}
