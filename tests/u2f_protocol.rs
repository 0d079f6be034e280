use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use std::sync::{Arc, Mutex};
use vfido::authenticator::{AttestationSource, Authenticator};
use vfido::host::HostCallbacks;
use vfido::u2f;

const DUMMY_CERT: &[u8] = &[0x30, 0x0B, 0x02, 0x01, 0x01, 0x30, 0x06, 0x02, 0x01, 0x02, 0x02, 0x01, 0x03];

struct TestHost {
    state: Mutex<Option<Vec<u8>>>,
    approve: bool,
}

impl TestHost {
    fn new(approve: bool) -> Self {
        Self { state: Mutex::new(None), approve }
    }
}

impl HostCallbacks for TestHost {
    fn approve_account_creation(&self, _rp_id: &str) -> bool {
        self.approve
    }
    fn approve_account_login(&self, _rp_id: &str) -> bool {
        self.approve
    }
    fn load_state(&self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.state.lock().unwrap().clone())
    }
    fn save_state(&self, data: &[u8]) -> std::io::Result<()> {
        *self.state.lock().unwrap() = Some(data.to_vec());
        Ok(())
    }
    fn passphrase(&self) -> std::io::Result<String> {
        Ok("test passphrase".into())
    }
}

/// Returns the authenticator plus the attestation public key (SEC1).
fn test_authenticator(approve: bool) -> (Authenticator, Vec<u8>) {
    let (attestation_key, attestation_public) = vfido::crypto::generate_keypair();
    let authenticator = Authenticator::load(
        Arc::new(TestHost::new(approve)),
        Some(AttestationSource {
            certificate_der: DUMMY_CERT.to_vec(),
            private_key: attestation_key.to_vec(),
        }),
    )
    .unwrap();
    (authenticator, attestation_public)
}

fn register_apdu(challenge: &[u8; 32], application: &[u8; 32]) -> Vec<u8> {
    let mut apdu = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 64];
    apdu.extend_from_slice(challenge);
    apdu.extend_from_slice(application);
    apdu
}

fn authenticate_apdu(
    control: u8,
    challenge: &[u8; 32],
    application: &[u8; 32],
    key_handle: &[u8],
) -> Vec<u8> {
    let data_len = (64 + 1 + key_handle.len()) as u16;
    let mut apdu = vec![0x00, 0x02, control, 0x00, 0x00];
    apdu.extend_from_slice(&data_len.to_be_bytes());
    apdu.extend_from_slice(challenge);
    apdu.extend_from_slice(application);
    apdu.push(key_handle.len() as u8);
    apdu.extend_from_slice(key_handle);
    apdu
}

fn status_word(response: &[u8]) -> u16 {
    u16::from_be_bytes([response[response.len() - 2], response[response.len() - 1]])
}

struct Registration {
    public_key: Vec<u8>,
    key_handle: Vec<u8>,
    signature: Vec<u8>,
}

fn parse_register_response(response: &[u8]) -> Registration {
    assert_eq!(response[0], 0x05, "reserved byte");
    let public_key = response[1..66].to_vec();
    assert_eq!(public_key[0], 0x04, "uncompressed P-256 point");
    let handle_len = response[66] as usize;
    let key_handle = response[67..67 + handle_len].to_vec();
    let cert_start = 67 + handle_len;
    assert_eq!(
        &response[cert_start..cert_start + DUMMY_CERT.len()],
        DUMMY_CERT,
        "configured attestation cert"
    );
    let signature = response[cert_start + DUMMY_CERT.len()..response.len() - 2].to_vec();
    Registration { public_key, key_handle, signature }
}

#[test]
fn test_version() {
    let (authenticator, _) = test_authenticator(true);
    let response = u2f::handle_message(
        &authenticator,
        &[0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    );
    assert_eq!(&response[..6], b"U2F_V2");
    assert_eq!(status_word(&response), u2f::SW_NO_ERROR);
    assert_eq!(response.len(), 8);
}

#[test]
fn test_register_response_layout_and_signature() {
    let (authenticator, attestation_public) = test_authenticator(true);
    let challenge = [0x00u8; 32];
    let application = [0x11u8; 32];

    let response = u2f::handle_message(&authenticator, &register_apdu(&challenge, &application));
    assert_eq!(status_word(&response), u2f::SW_NO_ERROR);
    let reg = parse_register_response(&response);

    // signature covers 0x00 | application | challenge | key_handle | public_key
    let mut signed = vec![0x00];
    signed.extend_from_slice(&application);
    signed.extend_from_slice(&challenge);
    signed.extend_from_slice(&reg.key_handle);
    signed.extend_from_slice(&reg.public_key);

    let verifying = VerifyingKey::from_sec1_bytes(&attestation_public).unwrap();
    let signature = Signature::from_der(&reg.signature).unwrap();
    verifying.verify(&signed, &signature).unwrap();
}

#[test]
fn test_register_then_authenticate_roundtrip() {
    let (authenticator, _) = test_authenticator(true);
    let challenge = [0xC4u8; 32];
    let application = [0x11u8; 32];

    let response = u2f::handle_message(&authenticator, &register_apdu(&challenge, &application));
    let reg = parse_register_response(&response);

    // Sign with a fresh challenge using the issued key handle.
    let login_challenge = [0x7Eu8; 32];
    let response = u2f::handle_message(
        &authenticator,
        &authenticate_apdu(0x03, &login_challenge, &application, &reg.key_handle),
    );
    assert_eq!(status_word(&response), u2f::SW_NO_ERROR);
    assert_eq!(response[0], 1, "user presence byte");
    let counter = u32::from_be_bytes(response[1..5].try_into().unwrap());
    assert_eq!(counter, 1, "first assertion on a fresh device");

    // signature covers application | presence | counter | challenge, with the
    // credential key sealed inside the handle.
    let mut signed = Vec::new();
    signed.extend_from_slice(&application);
    signed.push(1);
    signed.extend_from_slice(&counter.to_be_bytes());
    signed.extend_from_slice(&login_challenge);

    let verifying = VerifyingKey::from_sec1_bytes(&reg.public_key).unwrap();
    let signature = Signature::from_der(&response[5..response.len() - 2]).unwrap();
    verifying.verify(&signed, &signature).unwrap();

    // Counter is monotonic across assertions.
    let response = u2f::handle_message(
        &authenticator,
        &authenticate_apdu(0x03, &login_challenge, &application, &reg.key_handle),
    );
    let counter2 = u32::from_be_bytes(response[1..5].try_into().unwrap());
    assert!(counter2 > counter);
}

#[test]
fn test_authenticate_check_only() {
    let (authenticator, _) = test_authenticator(true);
    let challenge = [0x01u8; 32];
    let application = [0x22u8; 32];

    let response = u2f::handle_message(&authenticator, &register_apdu(&challenge, &application));
    let reg = parse_register_response(&response);

    // Valid handle: "conditions not satisfied" is the success signal.
    let response = u2f::handle_message(
        &authenticator,
        &authenticate_apdu(0x07, &challenge, &application, &reg.key_handle),
    );
    assert_eq!(status_word(&response), u2f::SW_CONDITIONS_NOT_SATISFIED);

    // Tampered handle.
    let mut tampered = reg.key_handle.clone();
    tampered[4] ^= 0xFF;
    let response = u2f::handle_message(
        &authenticator,
        &authenticate_apdu(0x07, &challenge, &application, &tampered),
    );
    assert_eq!(status_word(&response), u2f::SW_WRONG_DATA);

    // Right handle, wrong application.
    let other_application = [0x33u8; 32];
    let response = u2f::handle_message(
        &authenticator,
        &authenticate_apdu(0x07, &challenge, &other_application, &reg.key_handle),
    );
    assert_eq!(status_word(&response), u2f::SW_WRONG_DATA);
}

#[test]
fn test_denied_user_presence() {
    let (authenticator, _) = test_authenticator(false);
    let challenge = [0x00u8; 32];
    let application = [0x11u8; 32];

    let response = u2f::handle_message(&authenticator, &register_apdu(&challenge, &application));
    assert_eq!(status_word(&response), u2f::SW_CONDITIONS_NOT_SATISFIED);
}

#[test]
fn test_framing_and_instruction_errors() {
    let (authenticator, _) = test_authenticator(true);

    // Truncated header.
    let response = u2f::handle_message(&authenticator, &[0x00, 0x01]);
    assert_eq!(status_word(&response), u2f::SW_WRONG_LENGTH);

    // REGISTER with the wrong payload size.
    let response = u2f::handle_message(
        &authenticator,
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB],
    );
    assert_eq!(status_word(&response), u2f::SW_WRONG_LENGTH);

    // Unknown instruction.
    let response = u2f::handle_message(&authenticator, &[0x00, 0x42, 0x00, 0x00]);
    assert_eq!(status_word(&response), u2f::SW_INS_NOT_SUPPORTED);

    // Unsupported class.
    let response = u2f::handle_message(&authenticator, &[0x80, 0x03, 0x00, 0x00]);
    assert_eq!(status_word(&response), u2f::SW_CLA_NOT_SUPPORTED);
}
