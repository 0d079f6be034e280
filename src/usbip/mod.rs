pub mod proto;
pub mod server;

pub use server::UsbIpServer;

#[derive(Debug, thiserror::Error)]
pub enum UsbIpError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol: {0}")]
    Protocol(String),
}
