use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{bail, Context, Error};
use clap::Parser;
use der::{DecodePem, EncodePem};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing_subscriber::EnvFilter;
use x509_cert::{spki::SubjectPublicKeyInfoOwned, Certificate};

use isomdoc::{
    cbor,
    crypto::DigestAlgorithm,
    definitions::{
        x509::{util, CertificatePolicy, X5Chain},
        CoseKey, IssuerSigned, TypedNamespaces, ValidityInfo,
    },
    issuance::{
        certificates::{create_document_signer, create_iaca, CertificateParams},
        Mdoc,
    },
    presentation::Stringify,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with the certificate validity limits to enforce.
    #[arg(long, global = true)]
    policy: Option<PathBuf>,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// IACA root certificates.
    Iaca {
        #[command(subcommand)]
        action: IacaAction,
    },
    /// Document signer certificates.
    DocumentSigner {
        #[command(subcommand)]
        action: DocumentSignerAction,
    },
    /// Device keys.
    DeviceKey {
        #[command(subcommand)]
        action: DeviceKeyAction,
    },
    /// Issuer-signed mdocs.
    IssuerSigned {
        #[command(subcommand)]
        action: IssuerSignedAction,
    },
}

#[derive(Debug, clap::Args)]
struct Subject {
    /// Decimal serial number.
    #[arg(long)]
    serial: u64,
    #[arg(long)]
    common_name: String,
    /// ISO 3166-1 alpha-2 country code.
    #[arg(long)]
    country: String,
    #[arg(long)]
    state: Option<String>,
    /// RFC 3339, defaults to now.
    #[arg(long)]
    not_before: Option<String>,
    /// RFC 3339.
    #[arg(long)]
    not_after: String,
}

#[derive(Debug, clap::Subcommand)]
enum IacaAction {
    /// Create a self-signed IACA certificate.
    Create {
        /// PKCS#8 PEM private key of the IACA.
        #[arg(long)]
        key: PathBuf,
        #[command(flatten)]
        subject: Subject,
        /// Where to write the PEM certificate.
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, clap::Subcommand)]
enum DocumentSignerAction {
    /// Create a document signer certificate signed by an IACA.
    Create {
        /// PEM certificate of the IACA.
        #[arg(long)]
        iaca: PathBuf,
        /// PKCS#8 PEM private key of the IACA.
        #[arg(long)]
        iaca_key: PathBuf,
        /// PEM public key of the document signer.
        #[arg(long)]
        public_key: PathBuf,
        #[command(flatten)]
        subject: Subject,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, clap::Subcommand)]
enum DeviceKeyAction {
    /// Generate a P-256 key pair.
    Create {
        /// Where to write the PKCS#8 PEM private key.
        #[arg(long)]
        private: PathBuf,
        /// Where to write the PEM public key.
        #[arg(long)]
        public: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Digest {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, clap::Subcommand)]
enum IssuerSignedAction {
    /// Issue an mdoc, printing its issuer-signed part as base64url CBOR.
    Create {
        #[arg(long)]
        doc_type: String,
        /// JSON object of namespaces to element identifiers to typed values, such as
        /// `{"org.iso.18013.5.1": {"birth_date": {"type": "full-date", "value": "1990-03-31"}}}`.
        #[arg(long)]
        namespaces: PathBuf,
        /// PEM public key of the device.
        #[arg(long)]
        device_key: PathBuf,
        /// PEM certificate of the document signer.
        #[arg(long)]
        document_signer: PathBuf,
        /// PKCS#8 PEM private key of the document signer.
        #[arg(long)]
        document_signer_key: PathBuf,
        /// RFC 3339, defaults to now.
        #[arg(long)]
        valid_from: Option<String>,
        /// RFC 3339.
        #[arg(long)]
        valid_until: String,
        #[arg(long, value_enum, default_value = "sha256")]
        digest: Digest,
        /// Write to this file instead of standard output.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify an issuer-signed mdoc, printing its elements as JSON.
    Verify {
        /// File with the base64url CBOR issuer-signed mdoc.
        issuer_signed: PathBuf,
        /// PEM certificates of the trusted IACAs.
        #[arg(long, required = true)]
        iaca: Vec<PathBuf>,
        /// RFC 3339, defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
}

/// A P-256 or P-384 issuer key.
enum IssuerKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl IssuerKey {
    fn read(path: &PathBuf) -> Result<Self, Error> {
        let pem = read_to_string(path)?;
        if let Ok(key) = p256::SecretKey::from_pkcs8_pem(&pem) {
            return Ok(IssuerKey::P256((&key).into()));
        }
        let key = p384::SecretKey::from_pkcs8_pem(&pem)
            .with_context(|| format!("{} is not a P-256 or P-384 PKCS#8 key", path.display()))?;
        Ok(IssuerKey::P384((&key).into()))
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let policy = match &args.policy {
        Some(path) => CertificatePolicy::from_json(&read_to_string(path)?)
            .context("invalid certificate policy")?,
        None => CertificatePolicy::default(),
    };

    match args.action {
        Action::Iaca {
            action: IacaAction::Create { key, subject, out },
        } => create_iaca_certificate(&key, subject, &out, &policy),
        Action::DocumentSigner {
            action:
                DocumentSignerAction::Create {
                    iaca,
                    iaca_key,
                    public_key,
                    subject,
                    out,
                },
        } => create_document_signer_certificate(&iaca, &iaca_key, &public_key, subject, &out, &policy),
        Action::DeviceKey {
            action: DeviceKeyAction::Create { private, public },
        } => create_device_key(&private, &public),
        Action::IssuerSigned {
            action:
                IssuerSignedAction::Create {
                    doc_type,
                    namespaces,
                    device_key,
                    document_signer,
                    document_signer_key,
                    valid_from,
                    valid_until,
                    digest,
                    out,
                },
        } => {
            let issuer_signed = issue(
                doc_type,
                &namespaces,
                &device_key,
                &document_signer,
                &document_signer_key,
                valid_from.as_deref(),
                &valid_until,
                digest,
            )?;
            let encoded = issuer_signed.stringify()?;
            match out {
                Some(out) => write(&out, encoded.as_bytes()),
                None => {
                    println!("{encoded}");
                    Ok(())
                }
            }
        }
        Action::IssuerSigned {
            action: IssuerSignedAction::Verify {
                issuer_signed,
                iaca,
                at,
            },
        } => verify(&issuer_signed, &iaca, at.as_deref(), &policy),
    }
}

fn read_to_string(path: &PathBuf) -> Result<String, Error> {
    fs::read_to_string(path).with_context(|| format!("unable to read {}", path.display()))
}

fn write(path: &PathBuf, contents: &[u8]) -> Result<(), Error> {
    fs::write(path, contents).with_context(|| format!("unable to write {}", path.display()))
}

fn parse_time(time: Option<&str>) -> Result<OffsetDateTime, Error> {
    match time {
        Some(time) => OffsetDateTime::parse(time, &Rfc3339)
            .with_context(|| format!("'{time}' is not an RFC 3339 date-time")),
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn read_certificate(path: &PathBuf) -> Result<Certificate, Error> {
    Certificate::from_pem(read_to_string(path)?)
        .with_context(|| format!("{} is not a PEM certificate", path.display()))
}

fn certificate_params(subject: Subject) -> Result<CertificateParams, Error> {
    Ok(CertificateParams {
        serial: subject.serial,
        not_before: parse_time(subject.not_before.as_deref())?,
        not_after: parse_time(Some(&subject.not_after))?,
        common_name: subject.common_name,
        country: subject.country,
        state: subject.state,
    })
}

fn write_certificate(path: &PathBuf, certificate: &Certificate) -> Result<(), Error> {
    write(path, certificate.to_pem(LineEnding::LF)?.as_bytes())
}

fn create_iaca_certificate(
    key: &PathBuf,
    subject: Subject,
    out: &PathBuf,
    policy: &CertificatePolicy,
) -> Result<(), Error> {
    let params = certificate_params(subject)?;
    let certificate = match IssuerKey::read(key)? {
        IssuerKey::P256(key) => create_iaca::<_, p256::ecdsa::DerSignature>(&key, &params, policy)?,
        IssuerKey::P384(key) => create_iaca::<_, p384::ecdsa::DerSignature>(&key, &params, policy)?,
    };
    write_certificate(out, &certificate)
}

fn create_document_signer_certificate(
    iaca: &PathBuf,
    iaca_key: &PathBuf,
    public_key: &PathBuf,
    subject: Subject,
    out: &PathBuf,
    policy: &CertificatePolicy,
) -> Result<(), Error> {
    let iaca = read_certificate(iaca)?;
    let spki = SubjectPublicKeyInfoOwned::from_pem(read_to_string(public_key)?)
        .with_context(|| format!("{} is not a PEM public key", public_key.display()))?;
    let params = certificate_params(subject)?;
    let certificate = match IssuerKey::read(iaca_key)? {
        IssuerKey::P256(key) => create_document_signer::<_, p256::ecdsa::DerSignature>(
            &key, &iaca, spki, &params, policy,
        )?,
        IssuerKey::P384(key) => create_document_signer::<_, p384::ecdsa::DerSignature>(
            &key, &iaca, spki, &params, policy,
        )?,
    };
    write_certificate(out, &certificate)
}

fn create_device_key(private: &PathBuf, public: &PathBuf) -> Result<(), Error> {
    let key = p256::SecretKey::random(&mut OsRng);
    write(private, key.to_pkcs8_pem(LineEnding::LF)?.as_bytes())?;
    write(
        public,
        key.public_key().to_public_key_pem(LineEnding::LF)?.as_bytes(),
    )
}

#[allow(clippy::too_many_arguments)]
fn issue(
    doc_type: String,
    namespaces: &PathBuf,
    device_key: &PathBuf,
    document_signer: &PathBuf,
    document_signer_key: &PathBuf,
    valid_from: Option<&str>,
    valid_until: &str,
    digest: Digest,
) -> Result<IssuerSigned, Error> {
    let namespaces: TypedNamespaces =
        serde_json::from_str(&read_to_string(namespaces)?).context("invalid namespaces")?;

    let device_spki = SubjectPublicKeyInfoOwned::from_pem(read_to_string(device_key)?)
        .with_context(|| format!("{} is not a PEM public key", device_key.display()))?;
    let device_key = util::spki_public_key(&device_spki)?;

    let x5chain = X5Chain::builder()
        .with_certificate(read_certificate(document_signer)?)?
        .build()?;
    let now = OffsetDateTime::now_utc();
    let validity_info = ValidityInfo {
        signed: now,
        valid_from: parse_time(valid_from)?,
        valid_until: parse_time(Some(valid_until))?,
        expected_update: None,
    };
    if validity_info.valid_until <= validity_info.valid_from {
        bail!("valid-until must be after valid-from");
    }

    let builder = Mdoc::builder()
        .doc_type(doc_type)
        .typed_namespaces(namespaces)?
        .validity_info(validity_info)
        .digest_algorithm(match digest {
            Digest::Sha256 => DigestAlgorithm::SHA256,
            Digest::Sha384 => DigestAlgorithm::SHA384,
            Digest::Sha512 => DigestAlgorithm::SHA512,
        })
        .device_key_info(CoseKey::from(device_key).into())
        .x5chain(x5chain);
    let mdoc = match IssuerKey::read(document_signer_key)? {
        IssuerKey::P256(key) => builder.issue(&key, &mut OsRng)?,
        IssuerKey::P384(key) => builder.issue(&key, &mut OsRng)?,
    };
    Ok(mdoc.into())
}

fn verify(
    issuer_signed: &PathBuf,
    iaca: &[PathBuf],
    at: Option<&str>,
    policy: &CertificatePolicy,
) -> Result<(), Error> {
    let issuer_signed = IssuerSigned::parse(&read_to_string(issuer_signed)?)
        .context("could not parse issuer-signed mdoc")?;
    let roots = iaca
        .iter()
        .map(read_certificate)
        .collect::<Result<Vec<_>, _>>()?;
    let mso = issuer_signed.verify_with_policy(&roots, parse_time(at)?, policy)?;

    let mut elements: BTreeMap<&str, BTreeMap<&str, serde_json::Value>> = BTreeMap::new();
    for (namespace, item) in issuer_signed.items() {
        let item = item.as_ref();
        let value: serde_json::Value = cbor::from_value(&item.element_value)
            .unwrap_or_else(|_| serde_json::Value::String(format!("{:?}", item.element_value)));
        elements
            .entry(namespace)
            .or_default()
            .insert(&item.element_identifier, value);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "docType": mso.doc_type,
            "validUntil": mso.validity_info.valid_until.format(&Rfc3339)?,
            "elements": elements,
        }))?
    );
    Ok(())
}
