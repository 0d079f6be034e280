pub(crate) mod authenticator_data;
pub(crate) mod get_assertion;
pub(crate) mod get_info;
pub(crate) mod make_credential;
pub(crate) mod types;

use crate::authenticator::Authenticator;
use types::{CMD_GET_ASSERTION, CMD_GET_INFO, CMD_MAKE_CREDENTIAL, STATUS_INVALID_COMMAND};

/// Handle one CTAP2 message: command byte, then CBOR. The reply is a status
/// byte followed by the CBOR response body on success.
pub(crate) fn handle_message(authenticator: &Authenticator, data: &[u8]) -> Vec<u8> {
    let Some((&command, body)) = data.split_first() else {
        return vec![STATUS_INVALID_COMMAND];
    };
    match command {
        CMD_MAKE_CREDENTIAL => make_credential::handle(authenticator, body),
        CMD_GET_ASSERTION => get_assertion::handle(authenticator, body),
        CMD_GET_INFO => get_info::handle(),
        // clientPin, reset, getNextAssertion: deliberately unimplemented.
        command => {
            tracing::debug!(command = format!("{command:#04x}"), "unimplemented CTAP2 command");
            vec![STATUS_INVALID_COMMAND]
        }
    }
}
