#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("USB/IP: {0}")]
    UsbIp(#[from] crate::usbip::UsbIpError),
    #[error("CTAPHID: {0}")]
    CtapHid(#[from] crate::ctaphid::CtapHidError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Crypto: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("Store: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
