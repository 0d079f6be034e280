pub mod device;
pub mod state;

pub use device::{DeviceStore, KeyHandle};
pub use state::{CredentialSource, DeviceConfig, RelyingPartyEntity, UserEntity};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize: {0}")]
    Serialization(String),
    #[error("Crypto: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("Wrong passphrase or corrupted state blob")]
    Sealed,
    #[error("Corrupt: {0}")]
    Corrupt(String),
}
