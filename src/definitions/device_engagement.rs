//! [DeviceEngagement]: the first message of a presentation, shown by the holder as a QR code or
//! handed over through NFC.
//!
//! It carries the ephemeral device key (`EDeviceKey`) and the retrieval methods the holder is
//! listening on. The descriptors are modelled here; the radios are not.
use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::Error;

use crate::cbor;
use crate::crypto;
use crate::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};
use crate::definitions::CoseKey;

pub mod error;

pub type EDeviceKeyBytes = Tag24<CoseKey>;
pub type EReaderKeyBytes = Tag24<CoseKey>;
pub type DeviceEngagementBytes = Tag24<DeviceEngagement>;
pub type DeviceRetrievalMethods = NonEmptyVec<DeviceRetrievalMethod>;

type Result<T, E = Error> = std::result::Result<T, E>;

pub const DEVICE_ENGAGEMENT_VERSION: &str = "1.0";
const QR_CODE_URI_SCHEME: &str = "mdoc:";

/// `{0: version, 1: Security, ? 2: [+ DeviceRetrievalMethod], ? 3: ServerRetrievalMethods,
/// ? 4: ProtocolInfo}`.
///
/// Server retrieval and protocol info are carried opaquely so that a decoded engagement
/// re-encodes to the same bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct DeviceEngagement {
    pub version: String,
    pub security: Security,
    pub device_retrieval_methods: Option<DeviceRetrievalMethods>,
    pub server_retrieval_methods: Option<Value>,
    pub protocol_info: Option<Value>,
}

/// `[cipher suite identifier, EDeviceKeyBytes]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Security(pub u64, pub EDeviceKeyBytes);

/// `[type, version, options]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct DeviceRetrievalMethod {
    pub version: u64,
    pub options: RetrievalOptions,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrievalOptions {
    Nfc(NfcOptions),
    Ble(BleOptions),
    WifiAware(WifiOptions),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BleOptions {
    pub peripheral_server_mode: bool,
    pub central_client_mode: bool,
    pub peripheral_server_uuid: Option<Uuid>,
    pub central_client_uuid: Option<Uuid>,
    pub device_address: Option<ByteStr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcOptions {
    pub max_command_data_length: u64,
    pub max_response_data_length: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WifiOptions {
    pub pass_phrase: Option<String>,
    pub channel_info_operating_class: Option<u64>,
    pub channel_info_channel_number: Option<u64>,
    pub band_info: Option<ByteStr>,
}

impl DeviceEngagement {
    /// A QR engagement for `e_device_key` with the given retrieval methods.
    pub fn new(
        e_device_key: &crypto::PublicKey,
        device_retrieval_methods: Option<DeviceRetrievalMethods>,
    ) -> Result<Self> {
        Ok(Self {
            version: DEVICE_ENGAGEMENT_VERSION.to_string(),
            security: Security(crypto::CIPHER_SUITE_1, Tag24::new(CoseKey::from(e_device_key))?),
            device_retrieval_methods,
            server_retrieval_methods: None,
            protocol_info: None,
        })
    }

    pub fn e_device_key_bytes(&self) -> &EDeviceKeyBytes {
        &self.security.1
    }

    pub fn e_device_key(&self) -> &CoseKey {
        self.security.1.as_ref()
    }
}

impl Tag24<DeviceEngagement> {
    /// `mdoc:` followed by the unpadded base64url encoding of the engagement.
    pub fn to_qr_code_uri(&self) -> String {
        let mut uri = String::from(QR_CODE_URI_SCHEME);
        base64::encode_config_buf(self.untagged_bytes(), base64::URL_SAFE_NO_PAD, &mut uri);
        uri
    }

    pub fn from_qr_code_uri(uri: &str) -> Result<Self> {
        let encoded = uri
            .strip_prefix(QR_CODE_URI_SCHEME)
            .ok_or(Error::InvalidQrCodePrefix)?;
        let decoded = base64::decode_config(encoded, base64::URL_SAFE_NO_PAD)?;
        Ok(Tag24::from_untagged(decoded)?)
    }
}

impl RetrievalOptions {
    pub fn transport_type(&self) -> u64 {
        match self {
            RetrievalOptions::Nfc(_) => 1,
            RetrievalOptions::Ble(_) => 2,
            RetrievalOptions::WifiAware(_) => 3,
        }
    }
}

impl From<RetrievalOptions> for DeviceRetrievalMethod {
    fn from(options: RetrievalOptions) -> Self {
        Self {
            version: 1,
            options,
        }
    }
}

fn int_keyed(value: Value, malformed: Error) -> Result<BTreeMap<i128, Value>> {
    let Value::Map(entries) = value else {
        return Err(malformed);
    };
    let mut map = BTreeMap::new();
    for (k, v) in entries {
        let Value::Integer(k) = k else {
            return Err(malformed);
        };
        map.insert(i128::from(k), v);
    }
    Ok(map)
}

fn uint(value: Value) -> Option<u64> {
    match value {
        Value::Integer(i) => u64::try_from(i).ok(),
        _ => None,
    }
}

fn int_entry(key: i128, value: Value) -> (Value, Value) {
    // Map keys of this module are all small non-negative integers.
    (Value::Integer((key as i64).into()), value)
}

impl From<DeviceEngagement> for Value {
    fn from(engagement: DeviceEngagement) -> Value {
        let Security(cipher_suite, e_device_key) = engagement.security;
        let mut map = vec![
            int_entry(0, Value::Text(engagement.version)),
            int_entry(
                1,
                Value::Array(vec![Value::Integer(cipher_suite.into()), e_device_key.into()]),
            ),
        ];
        if let Some(methods) = engagement.device_retrieval_methods {
            let methods = Vec::from(methods).into_iter().map(Value::from).collect();
            map.push(int_entry(2, Value::Array(methods)));
        }
        if let Some(server) = engagement.server_retrieval_methods {
            map.push(int_entry(3, server));
        }
        if let Some(info) = engagement.protocol_info {
            map.push(int_entry(4, info));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for DeviceEngagement {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut map = int_keyed(value, Error::Malformed("expected a map with integer keys"))?;
        let version = match map.remove(&0) {
            Some(Value::Text(version)) => version,
            _ => return Err(Error::Malformed("missing version")),
        };
        if version != DEVICE_ENGAGEMENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let security: Security = cbor::from_value(
            &map.remove(&1)
                .ok_or(Error::Malformed("missing security"))?,
        )?;
        crypto::check_cipher_suite(security.0)?;
        let device_retrieval_methods = map
            .remove(&2)
            .map(|methods| match methods {
                Value::Array(methods) => methods
                    .into_iter()
                    .map(DeviceRetrievalMethod::try_from)
                    .collect::<Result<Vec<_>>>()
                    .and_then(|methods| {
                        NonEmptyVec::maybe_new(methods)
                            .ok_or(Error::Malformed("empty device retrieval methods"))
                    }),
                _ => Err(Error::Malformed("device retrieval methods must be an array")),
            })
            .transpose()?;
        if map.contains_key(&3) {
            tracing::debug!("server retrieval methods are carried but not interpreted");
        }
        Ok(Self {
            version,
            security,
            device_retrieval_methods,
            server_retrieval_methods: map.remove(&3),
            protocol_info: map.remove(&4),
        })
    }
}

impl From<DeviceRetrievalMethod> for Value {
    fn from(method: DeviceRetrievalMethod) -> Value {
        let transport_type = method.options.transport_type();
        let options = match method.options {
            RetrievalOptions::Nfc(options) => options.into(),
            RetrievalOptions::Ble(options) => options.into(),
            RetrievalOptions::WifiAware(options) => options.into(),
        };
        Value::Array(vec![
            Value::Integer(transport_type.into()),
            Value::Integer(method.version.into()),
            options,
        ])
    }
}

impl TryFrom<Value> for DeviceRetrievalMethod {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(Error::Malformed("retrieval method must be an array"));
        };
        let [transport_type, version, options]: [Value; 3] = items
            .try_into()
            .map_err(|_| Error::Malformed("retrieval method must have 3 elements"))?;
        let transport_type = match transport_type {
            Value::Integer(i) => i128::from(i),
            _ => return Err(Error::Malformed("retrieval method type must be an integer")),
        };
        let version =
            uint(version).ok_or(Error::Malformed("retrieval method version must be a uint"))?;
        let options = match transport_type {
            1 => RetrievalOptions::Nfc(options.try_into()?),
            2 => RetrievalOptions::Ble(options.try_into()?),
            3 => RetrievalOptions::WifiAware(options.try_into()?),
            other => return Err(Error::UnrecognizedRetrievalMethod(other)),
        };
        Ok(Self { version, options })
    }
}

fn uuid(value: Value) -> Result<Uuid> {
    match value {
        Value::Bytes(bytes) => Uuid::from_slice(&bytes).map_err(|_| Error::InvalidUuid),
        _ => Err(Error::InvalidUuid),
    }
}

impl From<BleOptions> for Value {
    fn from(options: BleOptions) -> Value {
        let mut map = vec![
            int_entry(0, Value::Bool(options.peripheral_server_mode)),
            int_entry(1, Value::Bool(options.central_client_mode)),
        ];
        if let Some(uuid) = options.peripheral_server_uuid {
            map.push(int_entry(10, Value::Bytes(uuid.as_bytes().to_vec())));
        }
        if let Some(uuid) = options.central_client_uuid {
            map.push(int_entry(11, Value::Bytes(uuid.as_bytes().to_vec())));
        }
        if let Some(address) = options.device_address {
            map.push(int_entry(20, address.into()));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for BleOptions {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut map = int_keyed(value, Error::InvalidBleOptions("expected a map"))?;
        let mut flag = |key, name| match map.remove(&key) {
            Some(Value::Bool(b)) => Ok(b),
            _ => Err(Error::InvalidBleOptions(name)),
        };
        let peripheral_server_mode = flag(0, "peripheral server mode must be a bool")?;
        let central_client_mode = flag(1, "central client mode must be a bool")?;
        let device_address = map
            .remove(&20)
            .map(|address| {
                ByteStr::try_from(address)
                    .map_err(|_| Error::InvalidBleOptions("device address must be a bstr"))
            })
            .transpose()?;
        Ok(Self {
            peripheral_server_mode,
            central_client_mode,
            peripheral_server_uuid: map.remove(&10).map(uuid).transpose()?,
            central_client_uuid: map.remove(&11).map(uuid).transpose()?,
            device_address,
        })
    }
}

impl NfcOptions {
    const COMMAND_DATA_LENGTH: std::ops::RangeInclusive<u64> = 255..=65535;
    const RESPONSE_DATA_LENGTH: std::ops::RangeInclusive<u64> = 256..=65536;
}

impl From<NfcOptions> for Value {
    fn from(options: NfcOptions) -> Value {
        Value::Map(vec![
            int_entry(0, Value::Integer(options.max_command_data_length.into())),
            int_entry(1, Value::Integer(options.max_response_data_length.into())),
        ])
    }
}

impl TryFrom<Value> for NfcOptions {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut map = int_keyed(value, Error::InvalidNfcOptions("expected a map"))?;
        let max_command_data_length = map
            .remove(&0)
            .and_then(uint)
            .filter(|len| Self::COMMAND_DATA_LENGTH.contains(len))
            .ok_or(Error::InvalidNfcOptions(
                "max command data length must be between 255 and 65535",
            ))?;
        let max_response_data_length = map
            .remove(&1)
            .and_then(uint)
            .filter(|len| Self::RESPONSE_DATA_LENGTH.contains(len))
            .ok_or(Error::InvalidNfcOptions(
                "max response data length must be between 256 and 65536",
            ))?;
        Ok(Self {
            max_command_data_length,
            max_response_data_length,
        })
    }
}

impl From<WifiOptions> for Value {
    fn from(options: WifiOptions) -> Value {
        let mut map = vec![];
        if let Some(pass_phrase) = options.pass_phrase {
            map.push(int_entry(0, Value::Text(pass_phrase)));
        }
        if let Some(class) = options.channel_info_operating_class {
            map.push(int_entry(1, Value::Integer(class.into())));
        }
        if let Some(channel) = options.channel_info_channel_number {
            map.push(int_entry(2, Value::Integer(channel.into())));
        }
        if let Some(band_info) = options.band_info {
            map.push(int_entry(3, band_info.into()));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for WifiOptions {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut map = int_keyed(value, Error::InvalidWifiOptions("expected a map"))?;
        let pass_phrase = match map.remove(&0) {
            None => None,
            Some(Value::Text(text)) => Some(text),
            Some(_) => return Err(Error::InvalidWifiOptions("pass phrase must be a tstr")),
        };
        let mut optional_uint = |key, name| {
            map.remove(&key)
                .map(|v| uint(v).ok_or(Error::InvalidWifiOptions(name)))
                .transpose()
        };
        let channel_info_operating_class =
            optional_uint(1, "operating class must be a uint")?;
        let channel_info_channel_number = optional_uint(2, "channel number must be a uint")?;
        let band_info = map
            .remove(&3)
            .map(|v| {
                ByteStr::try_from(v).map_err(|_| Error::InvalidWifiOptions("band info must be a bstr"))
            })
            .transpose()?;
        Ok(Self {
            pass_phrase,
            channel_info_operating_class,
            channel_info_channel_number,
            band_info,
        })
    }
}
