use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::state::{CredentialSource, DeviceConfig, RelyingPartyEntity, UserEntity};
use super::StoreError;
use crate::crypto::{self, GCM_NONCE_SIZE};

/// Cleartext form of a U2F key handle. On the wire it travels AES-GCM-sealed
/// under the device encryption key, so the device holds no per-credential
/// state for U2F.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHandle {
    pub private_key: Vec<u8>,
    pub application: Vec<u8>,
}

/// Live view of the device state. Pure data operations; persistence of the
/// sealed blob is the caller's concern.
pub struct DeviceStore {
    config: DeviceConfig,
}

impl DeviceStore {
    /// Fresh device: random encryption key, zeroed counters, no credentials.
    pub fn new(attestation_certificate: Vec<u8>, attestation_private_key: Vec<u8>) -> Self {
        let mut encryption_key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut encryption_key);
        Self {
            config: DeviceConfig {
                encryption_key,
                attestation_certificate,
                attestation_private_key,
                authentication_counter: 0,
                pin_hash: None,
                sources: Vec::new(),
            },
        }
    }

    pub fn from_config(config: DeviceConfig) -> Result<Self, StoreError> {
        if config.encryption_key.len() != 32 {
            return Err(StoreError::Corrupt("encryption key is not 32 bytes".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn credential_count(&self) -> usize {
        self.config.sources.len()
    }

    /// Create a credential source: fresh P-256 key pair, random 16-byte id,
    /// zero signature counter.
    pub fn new_credential_source(
        &mut self,
        relying_party: RelyingPartyEntity,
        user: UserEntity,
    ) -> &CredentialSource {
        let mut id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);
        let (private_key, _public) = crypto::generate_keypair();
        self.config.sources.push(CredentialSource {
            type_: "public-key".into(),
            id,
            private_key: private_key.to_vec(),
            relying_party,
            user,
            signature_counter: 0,
        });
        self.config.sources.last().expect("just pushed")
    }

    /// Credentials for `rp_id`, newest first, optionally filtered by an
    /// allow-list of credential ids.
    pub fn lookup(&self, rp_id: &str, allow_list: Option<&[Vec<u8>]>) -> Vec<&CredentialSource> {
        self.config
            .sources
            .iter()
            .rev()
            .filter(|s| s.relying_party.id == rp_id)
            .filter(|s| match allow_list {
                Some(ids) => ids.iter().any(|id| id == &s.id),
                None => true,
            })
            .collect()
    }

    pub fn get_by_id(&self, id: &[u8]) -> Option<&CredentialSource> {
        self.config.sources.iter().find(|s| s.id == id)
    }

    /// Bump a credential's signature counter and return the new value.
    /// Saturates at `u32::MAX` rather than wrapping.
    pub fn increment_signature_counter(&mut self, id: &[u8]) -> Result<u32, StoreError> {
        let source = self
            .config
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::Corrupt("credential vanished".into()))?;
        source.signature_counter = match source.signature_counter.checked_add(1) {
            Some(n) => n,
            None => {
                tracing::error!("signature counter saturated");
                u32::MAX
            }
        };
        Ok(source.signature_counter)
    }

    /// Bump the device-global authentication counter (U2F assertions) and
    /// return the new value.
    pub fn next_authentication_counter(&mut self) -> u32 {
        self.config.authentication_counter =
            match self.config.authentication_counter.checked_add(1) {
                Some(n) => n,
                None => {
                    tracing::error!("authentication counter saturated");
                    u32::MAX
                }
            };
        self.config.authentication_counter
    }

    /// AES-GCM-seal a key handle under the device encryption key.
    /// Wire layout: nonce(12) || ciphertext.
    pub fn seal_key_handle(&self, handle: &KeyHandle) -> Result<Vec<u8>, StoreError> {
        let mut plaintext = Vec::new();
        ciborium::into_writer(handle, &mut plaintext)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let (ciphertext, nonce) = crypto::encrypt(&self.encryption_key(), &plaintext)?;

        let mut sealed = Vec::with_capacity(GCM_NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Unseal a key handle. `None` means the blob failed authentication —
    /// tampered, truncated, or produced by another device. Errors after a
    /// valid GCM tag are ours and surface.
    pub fn open_key_handle(&self, sealed: &[u8]) -> Result<Option<KeyHandle>, StoreError> {
        if sealed.len() <= GCM_NONCE_SIZE {
            return Ok(None);
        }
        let (nonce, ciphertext) = sealed.split_at(GCM_NONCE_SIZE);
        let plaintext = match crypto::decrypt(&self.encryption_key(), ciphertext, nonce) {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };
        let handle: KeyHandle = ciborium::from_reader(plaintext.as_slice())
            .map_err(|e| StoreError::Corrupt(format!("sealed key handle payload: {e}")))?;
        Ok(Some(handle))
    }

    pub fn attestation_credentials(&self) -> (&[u8], &[u8]) {
        (
            &self.config.attestation_certificate,
            &self.config.attestation_private_key,
        )
    }

    fn encryption_key(&self) -> [u8; 32] {
        self.config
            .encryption_key
            .as_slice()
            .try_into()
            .expect("validated at construction")
    }
}
