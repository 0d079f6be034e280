pub mod apdu;
pub mod server;

pub use server::handle_message;

pub const INS_REGISTER: u8 = 0x01;
pub const INS_AUTHENTICATE: u8 = 0x02;
pub const INS_VERSION: u8 = 0x03;

pub const SW_NO_ERROR: u16 = 0x9000;
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
pub const SW_WRONG_DATA: u16 = 0x6A80;
pub const SW_WRONG_LENGTH: u16 = 0x6700;
pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;

pub const VERSION_STRING: &[u8] = b"U2F_V2";

/// AUTHENTICATE control byte (P1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum U2fControl {
    /// 0x07: report whether the key handle is ours without signing.
    CheckOnly,
    /// 0x03: require user presence, then sign.
    EnforceUserPresenceAndSign,
    /// 0x08: sign without a presence check.
    Sign,
}

impl U2fControl {
    /// Anything that is not check-only or enforce-and-sign signs without a
    /// presence check.
    pub fn from_p1(p1: u8) -> Self {
        match p1 {
            0x07 => Self::CheckOnly,
            0x03 => Self::EnforceUserPresenceAndSign,
            _ => Self::Sign,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum U2fError {
    #[error("Malformed APDU framing")]
    WrongLength,
}
