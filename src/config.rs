/// Authenticator model identifier, reported in GET_INFO and embedded in
/// attested credential data.
pub const AAGUID: [u8; 16] = [
    0x75, 0x6c, 0x5a, 0xf5, 0xec, 0xa6, 0x01, 0xa3, 0x2f, 0xc6, 0xd3, 0x0c, 0xe2, 0xf2, 0x01, 0xc5,
];

pub const MAX_CHANNELS: usize = 8;
pub const CHANNEL_IDLE_TIMEOUT_SECS: u64 = 30;
/// A message whose continuation packets stop arriving is dropped after this long.
pub const TRANSACTION_TIMEOUT_MS: u64 = 500;

pub const USB_VENDOR_ID: u16 = 0x1209;
pub const USB_PRODUCT_ID: u16 = 0xF1D0;
pub const USB_BUS_ID: &str = "1-1";

pub const DEFAULT_USBIP_PORT: u16 = 3240;

#[derive(clap::Parser, Debug, Clone)]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// TCP port for the USB/IP listener (loopback only).
    #[arg(long, default_value_t = DEFAULT_USBIP_PORT)]
    pub port: u16,
    /// Path of the encrypted device state file. Defaults to the XDG data dir.
    #[arg(long)]
    pub state: Option<std::path::PathBuf>,
    /// Attestation certificate (DER), read once when a fresh state is created.
    #[arg(long)]
    pub attestation_cert: Option<std::path::PathBuf>,
    /// Attestation private key (PKCS#8 PEM), read once when a fresh state is created.
    #[arg(long)]
    pub attestation_key: Option<std::path::PathBuf>,
    #[arg(long, default_value = "pinentry")]
    pub pinentry: String,
    /// Delete the encrypted device state (all credentials and counters), then exit.
    #[arg(long)]
    pub wipe: bool,
}
