//! Orchestration core shared by the U2F and CTAP2 engines: credential
//! creation, assertion signing, key-handle issuance and validation. The
//! engines own the wire formats; this layer owns the store, the approval
//! callbacks and persistence.

use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};

use crate::crypto;
use crate::ctap2::authenticator_data::{build_assertion_auth_data, build_make_credential_auth_data};
use crate::host::HostCallbacks;
use crate::store::{self, DeviceStore, KeyHandle, RelyingPartyEntity, UserEntity};
use crate::u2f::U2fControl;

/// Attestation material, provided by the host application when a fresh
/// device state is created. Afterwards it lives in the sealed state blob.
pub struct AttestationSource {
    pub certificate_der: Vec<u8>,
    /// P-256 private scalar, 32 bytes.
    pub private_key: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("operation denied by user")]
    Denied,
    #[error("no matching credentials")]
    NoCredentials,
    #[error("unknown or tampered key handle")]
    BadKeyHandle,
    #[error("credential already registered for this relying party")]
    CredentialExcluded,
    #[error("no stored state and no attestation material configured")]
    MissingAttestation,
    #[error("host callback: {0}")]
    Callback(std::io::Error),
    #[error("crypto: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("store: {0}")]
    Store(#[from] crate::store::StoreError),
}

pub struct MakeCredentialOutput {
    pub credential_id: Vec<u8>,
    pub auth_data: Vec<u8>,
}

pub struct AssertionOutput {
    pub credential_id: Vec<u8>,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user: UserEntity,
}

pub struct U2fRegistration {
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub attestation_certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

pub enum U2fAuthOutcome {
    /// Check-only request against a handle we issued for this application.
    HandleValid,
    Assertion {
        user_presence: u8,
        counter: u32,
        signature: Vec<u8>,
    },
}

pub struct Authenticator {
    store: RwLock<DeviceStore>,
    callbacks: Arc<dyn HostCallbacks>,
    passphrase: String,
}

impl Authenticator {
    /// Load the sealed state through the host callbacks, or create and
    /// persist a fresh one from the configured attestation material.
    pub fn load(
        callbacks: Arc<dyn HostCallbacks>,
        attestation: Option<AttestationSource>,
    ) -> Result<Self, AuthError> {
        let passphrase = callbacks.passphrase().map_err(AuthError::Callback)?;
        let store = match callbacks.load_state().map_err(AuthError::Callback)? {
            Some(blob) => {
                let config = store::state::open_config(&blob, &passphrase)?;
                let store = DeviceStore::from_config(config)?;
                tracing::info!(credentials = store.credential_count(), "device state loaded");
                store
            }
            None => {
                let att = attestation.ok_or(AuthError::MissingAttestation)?;
                let store = DeviceStore::new(att.certificate_der, att.private_key);
                let sealed = store::state::seal_config(store.config(), &passphrase)?;
                callbacks.save_state(&sealed).map_err(AuthError::Callback)?;
                tracing::info!("fresh device state created");
                store
            }
        };
        Ok(Self {
            store: RwLock::new(store),
            callbacks,
            passphrase,
        })
    }

    /// CTAP2 MakeCredential: approval, fresh credential source, attested
    /// authenticator data. `client_data_hash` is unused because attestation
    /// is always the "none" format, so nothing is signed here.
    pub fn make_credential(
        &self,
        rp: RelyingPartyEntity,
        user: UserEntity,
        _client_data_hash: &[u8],
        exclude_list: &[Vec<u8>],
    ) -> Result<MakeCredentialOutput, AuthError> {
        {
            let store = self.store.read().unwrap();
            for id in exclude_list {
                if let Some(source) = store.get_by_id(id) {
                    if source.relying_party.id == rp.id {
                        return Err(AuthError::CredentialExcluded);
                    }
                }
            }
        }

        if !self.callbacks.approve_account_creation(&rp.id) {
            return Err(AuthError::Denied);
        }

        let rp_id_hash: [u8; 32] = Sha256::digest(rp.id.as_bytes()).into();
        let mut store = self.store.write().unwrap();
        let (credential_id, private_key) = {
            let source = store.new_credential_source(rp, user);
            (source.id.clone(), source.private_key.clone())
        };

        let public_key = crypto::public_key_for(&private_key)?;
        let (x, y) = crypto::point_coords(&public_key).expect("SEC1 uncompressed point");
        let cose_key = crypto::encode_cose_p256(&x, &y);
        let auth_data = build_make_credential_auth_data(&rp_id_hash, 0, &credential_id, &cose_key);

        self.persist(&store)?;
        tracing::info!(credentials = store.credential_count(), "credential stored");
        Ok(MakeCredentialOutput { credential_id, auth_data })
    }

    /// CTAP2 GetAssertion: pick a credential for the RP (newest first,
    /// optionally filtered by the allow-list), approval, bump its counter
    /// under the writer lock, sign `authenticatorData || clientDataHash`.
    pub fn get_assertion(
        &self,
        rp_id: &str,
        client_data_hash: &[u8],
        allow_list: &[Vec<u8>],
    ) -> Result<AssertionOutput, AuthError> {
        let credential_id = {
            let store = self.store.read().unwrap();
            let allow = if allow_list.is_empty() { None } else { Some(allow_list) };
            match store.lookup(rp_id, allow).first() {
                Some(source) => source.id.clone(),
                None => return Err(AuthError::NoCredentials),
            }
        };

        if !self.callbacks.approve_account_login(rp_id) {
            return Err(AuthError::Denied);
        }

        let mut store = self.store.write().unwrap();
        // The credential may have been wiped while the prompt was open.
        let counter = store
            .increment_signature_counter(&credential_id)
            .map_err(|_| AuthError::NoCredentials)?;
        let (private_key, user) = {
            let source = store.get_by_id(&credential_id).ok_or(AuthError::NoCredentials)?;
            (source.private_key.clone(), source.user.clone())
        };

        let rp_id_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
        let auth_data = build_assertion_auth_data(&rp_id_hash, counter);
        let mut signed = auth_data.clone();
        signed.extend_from_slice(client_data_hash);
        let signature = crypto::sign_es256(&private_key, &signed)?;

        self.persist(&store)?;
        Ok(AssertionOutput { credential_id, auth_data, signature, user })
    }

    /// U2F REGISTER: fresh ephemeral key pair sealed into the key handle,
    /// response signed with the attestation key. Stateless; nothing persists.
    pub fn register_u2f(
        &self,
        challenge: &[u8; 32],
        application: &[u8; 32],
    ) -> Result<U2fRegistration, AuthError> {
        if !self.callbacks.approve_account_creation(&hex(application)) {
            return Err(AuthError::Denied);
        }

        let (private_key, public_key) = crypto::generate_keypair();
        let store = self.store.read().unwrap();
        let key_handle = store.seal_key_handle(&KeyHandle {
            private_key: private_key.to_vec(),
            application: application.to_vec(),
        })?;

        let (certificate, attestation_key) = store.attestation_credentials();
        let mut signed = Vec::with_capacity(1 + 32 + 32 + key_handle.len() + 65);
        signed.push(0x00);
        signed.extend_from_slice(application);
        signed.extend_from_slice(challenge);
        signed.extend_from_slice(&key_handle);
        signed.extend_from_slice(&public_key);
        let signature = crypto::sign_es256(attestation_key, &signed)?;

        Ok(U2fRegistration {
            public_key,
            key_handle,
            attestation_certificate: certificate.to_vec(),
            signature,
        })
    }

    /// U2F AUTHENTICATE over a sealed key handle.
    pub fn authenticate_u2f(
        &self,
        control: U2fControl,
        challenge: &[u8; 32],
        application: &[u8; 32],
        key_handle: &[u8],
    ) -> Result<U2fAuthOutcome, AuthError> {
        let handle = self.store.read().unwrap().open_key_handle(key_handle)?;
        let handle = match handle {
            Some(h) if h.application == application => h,
            _ => return Err(AuthError::BadKeyHandle),
        };

        if control == U2fControl::CheckOnly {
            return Ok(U2fAuthOutcome::HandleValid);
        }
        if control == U2fControl::EnforceUserPresenceAndSign
            && !self.callbacks.approve_account_login(&hex(application))
        {
            return Err(AuthError::Denied);
        }

        let counter = {
            let mut store = self.store.write().unwrap();
            let counter = store.next_authentication_counter();
            self.persist(&store)?;
            counter
        };

        let user_presence = 1u8;
        let mut signed = Vec::with_capacity(32 + 1 + 4 + 32);
        signed.extend_from_slice(application);
        signed.push(user_presence);
        signed.extend_from_slice(&counter.to_be_bytes());
        signed.extend_from_slice(challenge);
        let signature = crypto::sign_es256(&handle.private_key, &signed)?;

        Ok(U2fAuthOutcome::Assertion { user_presence, counter, signature })
    }

    fn persist(&self, store: &DeviceStore) -> Result<(), AuthError> {
        let sealed = store::state::seal_config(store.config(), &self.passphrase)?;
        self.callbacks.save_state(&sealed).map_err(AuthError::Callback)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
