//! Persisted device state and its passphrase-encrypted wrapping.
//!
//! The on-disk form is a single JSON document: a random data key encrypts the
//! JSON-serialised [`DeviceConfig`] under AES-256-GCM, and the data key is
//! itself wrapped with a scrypt-derived key-encryption key. All byte fields
//! are base64 strings in the JSON layer.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::crypto;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingPartyEntity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntity {
    #[serde(with = "b64")]
    pub id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// One (relying party, user) pair. Created by MAKE_CREDENTIAL, mutated only
/// by incrementing `signature_counter`, destroyed by a factory reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSource {
    #[serde(rename = "type")]
    pub type_: String,
    /// 16 random bytes, doubles as the credential id on the wire.
    #[serde(with = "b64")]
    pub id: Vec<u8>,
    /// P-256 private scalar, 32 bytes big-endian.
    #[serde(with = "b64")]
    pub private_key: Vec<u8>,
    pub relying_party: RelyingPartyEntity,
    pub user: UserEntity,
    pub signature_counter: u32,
}

/// Root of the persisted state, stored only in sealed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(with = "b64")]
    pub encryption_key: Vec<u8>,
    #[serde(with = "b64")]
    pub attestation_certificate: Vec<u8>,
    #[serde(with = "b64")]
    pub attestation_private_key: Vec<u8>,
    pub authentication_counter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub pin_hash: Option<Vec<u8>>,
    pub sources: Vec<CredentialSource>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PassphraseBlob {
    #[serde(with = "b64")]
    salt: Vec<u8>,
    #[serde(with = "b64")]
    encryption_key: Vec<u8>,
    #[serde(with = "b64")]
    key_nonce: Vec<u8>,
    #[serde(with = "b64")]
    encrypted_data: Vec<u8>,
    #[serde(with = "b64")]
    data_nonce: Vec<u8>,
}

/// Serialise and double-wrap the config: scrypt(passphrase, salt) wraps a
/// fresh random data key, the data key wraps the config JSON.
pub fn seal_config(config: &DeviceConfig, passphrase: &str) -> Result<Vec<u8>, StoreError> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let kek = crypto::derive_key(passphrase, &salt)?;

    let mut data_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut data_key);
    let (encrypted_key, key_nonce) = crypto::encrypt(&kek, &data_key)?;

    let plaintext =
        serde_json::to_vec(config).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let (encrypted_data, data_nonce) = crypto::encrypt(&data_key, &plaintext)?;

    let blob = PassphraseBlob {
        salt: salt.to_vec(),
        encryption_key: encrypted_key,
        key_nonce: key_nonce.to_vec(),
        encrypted_data,
        data_nonce: data_nonce.to_vec(),
    };
    serde_json::to_vec(&blob).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Unwrap a sealed blob. Any GCM failure (wrong passphrase, flipped bit)
/// yields [`StoreError::Sealed`]; there is no fallback path.
pub fn open_config(data: &[u8], passphrase: &str) -> Result<DeviceConfig, StoreError> {
    let blob: PassphraseBlob =
        serde_json::from_slice(data).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let kek = crypto::derive_key(passphrase, &blob.salt)?;
    let data_key = crypto::decrypt(&kek, &blob.encryption_key, &blob.key_nonce)
        .map_err(|_| StoreError::Sealed)?;
    let data_key: [u8; 32] = data_key
        .as_slice()
        .try_into()
        .map_err(|_| StoreError::Corrupt("wrapped data key is not 32 bytes".into()))?;

    let plaintext = crypto::decrypt(&data_key, &blob.encrypted_data, &blob.data_nonce)
        .map_err(|_| StoreError::Sealed)?;
    serde_json::from_slice(&plaintext).map_err(|e| StoreError::Serialization(e.to_string()))
}

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => ser.serialize_some(&STANDARD.encode(b)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(de)? {
            Some(s) => STANDARD.decode(s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
