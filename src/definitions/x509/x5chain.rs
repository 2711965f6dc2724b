use ciborium::Value;
use der::{Decode, DecodePem, Encode};
use x509_cert::certificate::Certificate;

use super::util::{common_name_or_unknown, public_key};
use crate::cbor;
use crate::cose::{HeaderMap, X5CHAIN_HEADER_LABEL};
use crate::crypto::{self, PublicKey};
use crate::definitions::helpers::NonEmptyVec;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("x5chain must be a bstr or an array of bstr, found {0}")]
    UnrecognizedHeaderType(&'static str),
    #[error("x5chain header is missing")]
    MissingHeader,
    #[error("x5chain contains no certificates")]
    EmptyChain,
    #[error("unable to parse certificate: {0}")]
    InvalidCertificate(#[from] der::Error),
}

/// X.509 certificate with the DER representation held in memory for ease of serialization.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertificateWithDer {
    pub inner: Certificate,
    der: Vec<u8>,
}

impl CertificateWithDer {
    pub fn from_pem(bytes: &[u8]) -> Result<Self, Error> {
        let inner = Certificate::from_pem(bytes)?;
        Self::from_cert(inner)
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self, Error> {
        let inner = Certificate::from_der(bytes)?;
        Ok(Self {
            inner,
            der: bytes.to_vec(),
        })
    }

    pub fn from_cert(certificate: Certificate) -> Result<Self, Error> {
        let der = certificate.to_der()?;
        Ok(Self {
            inner: certificate,
            der,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// The `x5chain` COSE header: the end-entity certificate first, each following certificate
/// certifying the one before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X5Chain(NonEmptyVec<CertificateWithDer>);

impl From<NonEmptyVec<CertificateWithDer>> for X5Chain {
    fn from(v: NonEmptyVec<CertificateWithDer>) -> Self {
        Self(v)
    }
}

impl X5Chain {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// A single certificate is written as a bstr, a longer chain as an array of bstr.
    pub fn into_cbor(&self) -> Value {
        match self.0.as_ref() {
            [cert] => Value::Bytes(cert.der.clone()),
            certs => Value::Array(
                certs
                    .iter()
                    .map(|cert| Value::Bytes(cert.der.clone()))
                    .collect(),
            ),
        }
    }

    pub fn from_cbor(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(bytes) => Self::builder().with_der_certificate(bytes)?.build(),
            Value::Array(certs) => certs
                .iter()
                .try_fold(Self::builder(), |builder, cert| match cert {
                    Value::Bytes(bytes) => builder.with_der_certificate(bytes),
                    other => Err(Error::UnrecognizedHeaderType(cbor::type_name(other))),
                })?
                .build(),
            other => Err(Error::UnrecognizedHeaderType(cbor::type_name(other))),
        }
    }

    /// Read the chain from the x5chain entry of a COSE header.
    pub fn from_header(header: &HeaderMap) -> Result<Self, Error> {
        let value = header
            .get(X5CHAIN_HEADER_LABEL)
            .ok_or(Error::MissingHeader)?;
        Self::from_cbor(value)
    }

    /// Retrieve the end-entity certificate.
    pub fn end_entity_certificate(&self) -> &Certificate {
        &self.0[0].inner
    }

    /// Retrieve the public key of the end-entity certificate.
    pub fn end_entity_public_key(&self) -> Result<PublicKey, crypto::Error> {
        public_key(self.end_entity_certificate())
    }

    pub fn end_entity_common_name(&self) -> &str {
        common_name_or_unknown(self.end_entity_certificate())
    }

    /// The certificates ordered from the one closest to the root down to the end entity.
    pub fn leaf_last(&self) -> Vec<Certificate> {
        self.0.iter().rev().map(|cert| cert.inner.clone()).collect()
    }

    /// Iterate over the certificates in the chain.
    pub fn iter(&self) -> impl Iterator<Item = &CertificateWithDer> {
        self.0.iter()
    }
}

#[derive(Default, Debug, Clone)]
pub struct Builder {
    certs: Vec<CertificateWithDer>,
}

impl Builder {
    pub fn with_certificate(mut self, cert: Certificate) -> Result<Builder, Error> {
        self.certs.push(CertificateWithDer::from_cert(cert)?);
        Ok(self)
    }

    pub fn with_pem_certificate(mut self, data: &[u8]) -> Result<Builder, Error> {
        self.certs.push(CertificateWithDer::from_pem(data)?);
        Ok(self)
    }

    pub fn with_der_certificate(mut self, data: &[u8]) -> Result<Builder, Error> {
        self.certs.push(CertificateWithDer::from_der(data)?);
        Ok(self)
    }

    pub fn build(self) -> Result<X5Chain, Error> {
        Ok(X5Chain(
            self.certs.try_into().map_err(|_| Error::EmptyChain)?,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::x509::test::{iaca_and_document_signer, TestCertificates};

    #[test]
    fn single_certificate_is_a_bstr() {
        let TestCertificates { document_signer, .. } = iaca_and_document_signer();
        let x5chain = X5Chain::builder()
            .with_certificate(document_signer.clone())
            .unwrap()
            .build()
            .unwrap();
        let value = x5chain.into_cbor();
        assert!(matches!(value, Value::Bytes(_)));
        let parsed = X5Chain::from_cbor(&value).unwrap();
        assert_eq!(parsed.end_entity_certificate(), &document_signer);
    }

    #[test]
    fn chain_is_an_array_with_leaf_first() {
        let TestCertificates {
            iaca,
            document_signer,
            ..
        } = iaca_and_document_signer();
        let x5chain = X5Chain::builder()
            .with_certificate(document_signer.clone())
            .unwrap()
            .with_certificate(iaca.clone())
            .unwrap()
            .build()
            .unwrap();
        let value = x5chain.into_cbor();
        let parsed = X5Chain::from_cbor(&value).unwrap();
        assert_eq!(parsed.end_entity_certificate(), &document_signer);
        assert_eq!(parsed.leaf_last(), vec![iaca, document_signer]);
    }

    #[test]
    fn other_header_types_are_rejected() {
        assert!(matches!(
            X5Chain::from_cbor(&Value::Text("cert".into())),
            Err(Error::UnrecognizedHeaderType("tstr"))
        ));
        assert!(matches!(
            X5Chain::from_cbor(&Value::Array(vec![Value::Integer(1.into())])),
            Err(Error::UnrecognizedHeaderType("int"))
        ));
        assert!(matches!(
            X5Chain::from_cbor(&Value::Array(vec![])),
            Err(Error::EmptyChain)
        ));
    }
}
