//! Session establishment messages, the session transcript, and session encryption.
//!
//! Both parties derive `SKReader` and `SKDevice` from their ephemeral keys and the session
//! transcript, then exchange AES-256-GCM encrypted [SessionData] messages. Each direction has
//! its own key and its own message counter; a counter is never reused.
use std::marker::PhantomData;

use aes_gcm::{aead::Aead, Aes256Gcm, Key, KeyInit, Nonce};
use ciborium::Value;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cbor::{self, CborError};
use crate::crypto::{self, Agreer, PublicKey};
use crate::definitions::{
    device_engagement::{DeviceEngagementBytes, EDeviceKeyBytes, EReaderKeyBytes},
    helpers::{tag24, ByteStr, Tag24},
};

pub type SessionTranscriptBytes = Tag24<SessionTranscript>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEstablishment {
    pub e_reader_key: EReaderKeyBytes,
    pub data: ByteStr,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ByteStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    SessionEncryptionError,
    CborDecodingError,
    SessionTermination,
}

/// `[DeviceEngagementBytes, EReaderKeyBytes, Handover]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionTranscript(
    pub DeviceEngagementBytes,
    pub EReaderKeyBytes,
    pub Handover,
);

/// `null` for QR engagement, `[HandoverSelect, HandoverRequest / null]` for NFC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Handover {
    Qr,
    Nfc(NfcHandover),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcHandover {
    pub handover_select: ByteStr,
    pub handover_request: Option<ByteStr>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unrecognized handover: {0}")]
    UnrecognizedHandover(&'static str),
    #[error("unrecognized session status: {0}")]
    UnrecognizedStatus(u64),
    #[error("key agreement failed: {0}")]
    Agreement(#[from] crypto::Error),
    #[error("unable to derive session key: {0}")]
    KeyDerivation(String),
    #[error("message counter exhausted, the session is terminated")]
    CounterExhausted,
    #[error("the session is terminated")]
    SessionTerminated,
    #[error("unable to encrypt session data")]
    EncryptionFailed,
    #[error("unable to decrypt session data")]
    DecryptionFailed,
    #[error(transparent)]
    Cbor(#[from] CborError),
    #[error(transparent)]
    Tag24(#[from] tag24::Error),
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl SessionTranscript {
    pub fn new(
        device_engagement: DeviceEngagementBytes,
        e_reader_key: EReaderKeyBytes,
        handover: Handover,
    ) -> Self {
        Self(device_engagement, e_reader_key, handover)
    }

    /// `#6.24(bstr .cbor SessionTranscript)`.
    pub fn to_bytes(&self) -> Result<SessionTranscriptBytes> {
        Ok(Tag24::new(self.clone())?)
    }
}

impl SessionData {
    pub fn encrypted(data: Vec<u8>) -> Self {
        Self {
            data: Some(data.into()),
            status: None,
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            data: None,
            status: Some(status),
        }
    }

    pub fn termination() -> Self {
        Self::status(Status::SessionTermination)
    }

    pub fn is_termination(&self) -> bool {
        self.status == Some(Status::SessionTermination)
    }
}

impl From<Status> for u64 {
    fn from(status: Status) -> u64 {
        match status {
            Status::SessionEncryptionError => 10,
            Status::CborDecodingError => 11,
            Status::SessionTermination => 20,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(n: u64) -> Result<Status> {
        match n {
            10 => Ok(Status::SessionEncryptionError),
            11 => Ok(Status::CborDecodingError),
            20 => Ok(Status::SessionTermination),
            _ => Err(Error::UnrecognizedStatus(n)),
        }
    }
}

impl From<Handover> for Value {
    fn from(handover: Handover) -> Value {
        match handover {
            Handover::Qr => Value::Null,
            Handover::Nfc(NfcHandover {
                handover_select,
                handover_request,
            }) => Value::Array(vec![
                handover_select.into(),
                handover_request.map(Value::from).unwrap_or(Value::Null),
            ]),
        }
    }
}

impl TryFrom<Value> for Handover {
    type Error = Error;

    fn try_from(value: Value) -> Result<Handover> {
        match value {
            Value::Null => Ok(Handover::Qr),
            Value::Array(items) => {
                let [select, request]: [Value; 2] = items
                    .try_into()
                    .map_err(|_| Error::UnrecognizedHandover("expected a 2 element array"))?;
                let handover_select = ByteStr::try_from(select)
                    .map_err(|_| Error::UnrecognizedHandover("handover select must be a bstr"))?;
                let handover_request = match request {
                    Value::Null => None,
                    request => Some(ByteStr::try_from(request).map_err(|_| {
                        Error::UnrecognizedHandover("handover request must be a bstr or null")
                    })?),
                };
                Ok(Handover::Nfc(NfcHandover {
                    handover_select,
                    handover_request,
                }))
            }
            other => Err(Error::UnrecognizedHandover(cbor::type_name(&other))),
        }
    }
}

pub type SessionKey = Zeroizing<[u8; 32]>;

/// `SKReader` and `SKDevice`.
pub struct SessionKeys {
    pub sk_reader: SessionKey,
    pub sk_device: SessionKey,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Derive both session keys from the local ephemeral key, the peer's ephemeral public key and
/// the session transcript.
///
/// The HKDF salt is the SHA-256 digest of the tagged `SessionTranscriptBytes`.
pub fn derive_session_keys<A: Agreer + ?Sized>(
    agreer: &A,
    peer: &PublicKey,
    session_transcript: &SessionTranscriptBytes,
) -> Result<SessionKeys> {
    let z = agreer.agree(peer)?;
    let salt = Sha256::digest(session_transcript.tagged_bytes());
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), &z);
    let expand = |info: &[u8]| -> Result<SessionKey> {
        let mut okm = Zeroizing::new([0u8; 32]);
        hkdf.expand(info, okm.as_mut_slice())
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(okm)
    };
    Ok(SessionKeys {
        sk_reader: expand(b"SKReader")?,
        sk_device: expand(b"SKDevice")?,
    })
}

/// The BLE Ident characteristic value: `HKDF(EDeviceKeyBytes, "BLEIdent")`.
pub fn ble_ident(e_device_key: &EDeviceKeyBytes) -> Result<[u8; 16]> {
    let mut ident = [0u8; 16];
    Hkdf::<Sha256>::new(None, e_device_key.tagged_bytes())
        .expand(b"BLEIdent", &mut ident)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(ident)
}

mod sealed {
    pub trait Sealed {}
}

/// The side of a session. Fixes which key and identifier encrypt and which decrypt.
pub trait Role: sealed::Sealed {
    const OWN_IDENTIFIER: [u8; 8];
    const PEER_IDENTIFIER: [u8; 8];

    fn own_key(keys: &SessionKeys) -> &SessionKey;
    fn peer_key(keys: &SessionKeys) -> &SessionKey;
}

#[derive(Debug)]
pub enum Reader {}
#[derive(Debug)]
pub enum Device {}

const READER_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0];
const DEVICE_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

impl sealed::Sealed for Reader {}
impl Role for Reader {
    const OWN_IDENTIFIER: [u8; 8] = READER_IDENTIFIER;
    const PEER_IDENTIFIER: [u8; 8] = DEVICE_IDENTIFIER;

    fn own_key(keys: &SessionKeys) -> &SessionKey {
        &keys.sk_reader
    }

    fn peer_key(keys: &SessionKeys) -> &SessionKey {
        &keys.sk_device
    }
}

impl sealed::Sealed for Device {}
impl Role for Device {
    const OWN_IDENTIFIER: [u8; 8] = DEVICE_IDENTIFIER;
    const PEER_IDENTIFIER: [u8; 8] = READER_IDENTIFIER;

    fn own_key(keys: &SessionKeys) -> &SessionKey {
        &keys.sk_device
    }

    fn peer_key(keys: &SessionKeys) -> &SessionKey {
        &keys.sk_reader
    }
}

/// One direction of a session: a key, a party identifier and a message counter.
struct Direction {
    cipher: Aes256Gcm,
    identifier: [u8; 8],
    counter: u32,
}

impl Direction {
    fn new(key: &SessionKey, identifier: [u8; 8]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice())),
            identifier,
            counter: 0,
        }
    }

    /// `identifier || counter`, for the next message.
    fn next_nonce(&self) -> Option<[u8; 12]> {
        let counter = self.counter.checked_add(1)?;
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.identifier);
        nonce[8..].copy_from_slice(&counter.to_be_bytes());
        Some(nonce)
    }
}

/// Session encryption for one party. Owns both counters; there is one per session.
pub struct SessionEncryption<R: Role> {
    outgoing: Direction,
    incoming: Direction,
    terminated: bool,
    role: PhantomData<R>,
}

impl<R: Role> std::fmt::Debug for SessionEncryption<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEncryption")
            .field("outgoing_counter", &self.outgoing.counter)
            .field("incoming_counter", &self.incoming.counter)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl<R: Role> SessionEncryption<R> {
    pub fn new(keys: &SessionKeys) -> Self {
        Self {
            outgoing: Direction::new(R::own_key(keys), R::OWN_IDENTIFIER),
            incoming: Direction::new(R::peer_key(keys), R::PEER_IDENTIFIER),
            terminated: false,
            role: PhantomData,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Mark the session as ended. Every later call fails.
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    /// Encrypt a message for the peer: `ciphertext || tag`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.terminated {
            return Err(Error::SessionTerminated);
        }
        let Some(nonce) = self.outgoing.next_nonce() else {
            tracing::warn!("outgoing message counter exhausted, terminating session");
            self.terminated = true;
            return Err(Error::CounterExhausted);
        };
        let ciphertext = self
            .outgoing
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::EncryptionFailed)?;
        self.outgoing.counter += 1;
        Ok(ciphertext)
    }

    /// Decrypt the next message from the peer. Messages must arrive in order.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if self.terminated {
            return Err(Error::SessionTerminated);
        }
        let Some(nonce) = self.incoming.next_nonce() else {
            tracing::warn!("incoming message counter exhausted, terminating session");
            self.terminated = true;
            return Err(Error::CounterExhausted);
        };
        let plaintext = self
            .incoming
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| Error::DecryptionFailed)?;
        self.incoming.counter += 1;
        Ok(plaintext)
    }
}
