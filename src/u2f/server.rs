use super::apdu::{self, Apdu};
use super::*;
use crate::authenticator::{AuthError, Authenticator, U2fAuthOutcome};

/// Handle one U2F APDU and produce the full response including the trailing
/// status word. Every outcome is a wire status; nothing here resets the
/// transport.
pub fn handle_message(authenticator: &Authenticator, message: &[u8]) -> Vec<u8> {
    let apdu = match apdu::parse(message) {
        Ok(apdu) => apdu,
        Err(_) => {
            tracing::warn!(len = message.len(), "malformed APDU");
            return status_only(SW_WRONG_LENGTH);
        }
    };
    if apdu.cla != 0 {
        return status_only(SW_CLA_NOT_SUPPORTED);
    }

    match apdu.ins {
        INS_VERSION => {
            let mut response = VERSION_STRING.to_vec();
            response.extend_from_slice(&SW_NO_ERROR.to_be_bytes());
            response
        }
        INS_REGISTER => handle_register(authenticator, &apdu),
        INS_AUTHENTICATE => handle_authenticate(authenticator, &apdu),
        ins => {
            tracing::warn!(ins = format!("{ins:#04x}"), "unsupported U2F instruction");
            status_only(SW_INS_NOT_SUPPORTED)
        }
    }
}

/// Request: challenge(32) | application(32).
/// Response: 0x05 | pubkey(65) | L | key_handle[L] | cert | signature | 9000.
fn handle_register(authenticator: &Authenticator, apdu: &Apdu) -> Vec<u8> {
    if apdu.data.len() != 64 {
        return status_only(SW_WRONG_LENGTH);
    }
    let challenge: [u8; 32] = apdu.data[..32].try_into().expect("length checked");
    let application: [u8; 32] = apdu.data[32..].try_into().expect("length checked");

    match authenticator.register_u2f(&challenge, &application) {
        Ok(reg) => {
            let mut response = Vec::with_capacity(
                1 + reg.public_key.len()
                    + 1
                    + reg.key_handle.len()
                    + reg.attestation_certificate.len()
                    + reg.signature.len()
                    + 2,
            );
            response.push(0x05);
            response.extend_from_slice(&reg.public_key);
            response.push(reg.key_handle.len() as u8);
            response.extend_from_slice(&reg.key_handle);
            response.extend_from_slice(&reg.attestation_certificate);
            response.extend_from_slice(&reg.signature);
            response.extend_from_slice(&SW_NO_ERROR.to_be_bytes());
            response
        }
        Err(AuthError::Denied) => status_only(SW_CONDITIONS_NOT_SATISFIED),
        Err(e) => {
            tracing::error!("U2F register failed: {e}");
            status_only(SW_WRONG_DATA)
        }
    }
}

/// Request: challenge(32) | application(32) | L | key_handle[L].
fn handle_authenticate(authenticator: &Authenticator, apdu: &Apdu) -> Vec<u8> {
    if apdu.data.len() < 65 {
        return status_only(SW_WRONG_LENGTH);
    }
    let challenge: [u8; 32] = apdu.data[..32].try_into().expect("length checked");
    let application: [u8; 32] = apdu.data[32..64].try_into().expect("length checked");
    let handle_len = apdu.data[64] as usize;
    if apdu.data.len() != 65 + handle_len {
        return status_only(SW_WRONG_LENGTH);
    }
    let key_handle = &apdu.data[65..];
    let control = U2fControl::from_p1(apdu.p1);

    match authenticator.authenticate_u2f(control, &challenge, &application, key_handle) {
        // Success signal for an existence check.
        Ok(U2fAuthOutcome::HandleValid) => status_only(SW_CONDITIONS_NOT_SATISFIED),
        Ok(U2fAuthOutcome::Assertion { user_presence, counter, signature }) => {
            let mut response = Vec::with_capacity(1 + 4 + signature.len() + 2);
            response.push(user_presence);
            response.extend_from_slice(&counter.to_be_bytes());
            response.extend_from_slice(&signature);
            response.extend_from_slice(&SW_NO_ERROR.to_be_bytes());
            response
        }
        Err(AuthError::BadKeyHandle) => status_only(SW_WRONG_DATA),
        Err(AuthError::Denied) => status_only(SW_CONDITIONS_NOT_SATISFIED),
        Err(e) => {
            tracing::error!("U2F authenticate failed: {e}");
            status_only(SW_WRONG_DATA)
        }
    }
}

fn status_only(status: u16) -> Vec<u8> {
    status.to_be_bytes().to_vec()
}
