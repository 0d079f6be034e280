use ciborium::value::Value;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use vfido::authenticator::{AttestationSource, Authenticator};
use vfido::config::AAGUID;
use vfido::ctaphid::{run_ctaphid_loop, types::*};
use vfido::host::HostCallbacks;

struct TestHost {
    state: Mutex<Option<Vec<u8>>>,
}

impl HostCallbacks for TestHost {
    fn approve_account_creation(&self, _rp_id: &str) -> bool {
        true
    }
    fn approve_account_login(&self, _rp_id: &str) -> bool {
        true
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

struct Client {
    incoming_tx: mpsc::Sender<[u8; 64]>,
    outgoing_rx: mpsc::Receiver<[u8; 64]>,
    cid: u32,
}

async fn connect() -> Client {
    let (attestation_key, _) = vfido::crypto::generate_keypair();
    let authenticator = Arc::new(
        Authenticator::load(
            Arc::new(TestHost { state: Mutex::new(None) }),
            Some(AttestationSource {
                certificate_der: vec![0x30, 0x03, 0x02, 0x01, 0x01],
                private_key: attestation_key.to_vec(),
            }),
        )
        .unwrap(),
    );

    let (incoming_tx, incoming_rx) = mpsc::channel::<[u8; 64]>(16);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<[u8; 64]>(16);
    tokio::spawn(run_ctaphid_loop(incoming_rx, outgoing_tx, authenticator));

    let mut pkt = [0u8; 64];
    pkt[0..4].copy_from_slice(&BROADCAST_CID.to_be_bytes());
    pkt[4] = CMD_INIT | 0x80;
    pkt[6] = 8;
    pkt[7..15].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    incoming_tx.send(pkt).await.unwrap();

    let resp = timeout(Duration::from_secs(30), outgoing_rx.recv())
        .await
        .expect("INIT timeout")
        .unwrap();
    let cid = u32::from_be_bytes([resp[15], resp[16], resp[17], resp[18]]);
    Client { incoming_tx, outgoing_rx, cid }
}

impl Client {
    /// Send one CBOR command and reassemble the full reply, skipping any
    /// keepalives emitted while the operation runs.
    async fn cbor(&mut self, payload: &[u8]) -> Vec<u8> {
        // Request framing
        let mut pkt = [0u8; 64];
        pkt[0..4].copy_from_slice(&self.cid.to_be_bytes());
        pkt[4] = CMD_CBOR | 0x80;
        pkt[5..7].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        let first = payload.len().min(57);
        pkt[7..7 + first].copy_from_slice(&payload[..first]);
        self.incoming_tx.send(pkt).await.unwrap();

        let mut offset = first;
        let mut seq = 0u8;
        while offset < payload.len() {
            let mut cont = [0u8; 64];
            cont[0..4].copy_from_slice(&self.cid.to_be_bytes());
            cont[4] = seq;
            let chunk = (payload.len() - offset).min(59);
            cont[5..5 + chunk].copy_from_slice(&payload[offset..offset + chunk]);
            self.incoming_tx.send(cont).await.unwrap();
            offset += chunk;
            seq += 1;
        }

        // Response framing
        let first = loop {
            let pkt = self.recv().await;
            if pkt[4] == CMD_KEEPALIVE | 0x80 {
                continue;
            }
            assert_eq!(pkt[4], CMD_CBOR | 0x80, "expected CBOR response");
            break pkt;
        };
        let bcnt = u16::from_be_bytes([first[5], first[6]]) as usize;
        let mut body = first[7..64].to_vec();
        let mut seq = 0u8;
        while body.len() < bcnt {
            let cont = self.recv().await;
            if cont[4] == CMD_KEEPALIVE | 0x80 {
                continue;
            }
            assert_eq!(cont[4], seq, "response continuation sequence");
            body.extend_from_slice(&cont[5..64]);
            seq += 1;
        }
        body.truncate(bcnt);
        body
    }

    async fn recv(&mut self) -> [u8; 64] {
        timeout(Duration::from_secs(30), self.outgoing_rx.recv())
            .await
            .expect("response timeout")
            .expect("channel closed")
    }
}

fn cbor_map_get<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    let target = Value::Integer(key.into());
    map.iter().find(|(k, _)| k == &target).map(|(_, v)| v)
}

fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).unwrap();
    buf
}

fn make_credential_request(rp_id: &str, alg: i64) -> Vec<u8> {
    let map = Value::Map(vec![
        (
            Value::Integer(1i64.into()),
            Value::Bytes(Sha256::digest(b"client data").to_vec()),
        ),
        (
            Value::Integer(2i64.into()),
            Value::Map(vec![
                (Value::Text("id".into()), Value::Text(rp_id.into())),
                (Value::Text("name".into()), Value::Text("Example".into())),
            ]),
        ),
        (
            Value::Integer(3i64.into()),
            Value::Map(vec![
                (Value::Text("id".into()), Value::Bytes(b"user-1".to_vec())),
                (Value::Text("name".into()), Value::Text("alice".into())),
                (Value::Text("displayName".into()), Value::Text("Alice".into())),
            ]),
        ),
        (
            Value::Integer(4i64.into()),
            Value::Array(vec![Value::Map(vec![
                (Value::Text("type".into()), Value::Text("public-key".into())),
                (Value::Text("alg".into()), Value::Integer(alg.into())),
            ])]),
        ),
    ]);
    let mut payload = vec![0x01u8];
    payload.extend_from_slice(&encode(&map));
    payload
}

fn get_assertion_request(rp_id: &str, client_data_hash: &[u8]) -> Vec<u8> {
    let map = Value::Map(vec![
        (Value::Integer(1i64.into()), Value::Text(rp_id.into())),
        (Value::Integer(2i64.into()), Value::Bytes(client_data_hash.to_vec())),
    ]);
    let mut payload = vec![0x02u8];
    payload.extend_from_slice(&encode(&map));
    payload
}

/// Pull the COSE public key out of MakeCredential authenticatorData.
fn credential_public_key(auth_data: &[u8]) -> VerifyingKey {
    let cred_id_len = u16::from_be_bytes([auth_data[53], auth_data[54]]) as usize;
    let cose_bytes = &auth_data[55 + cred_id_len..];
    let value: Value = ciborium::from_reader(cose_bytes).unwrap();
    let Value::Map(map) = value else { panic!("COSE key is not a map") };
    let x = cbor_map_get(&map, -2).and_then(|v| v.as_bytes()).unwrap();
    let y = cbor_map_get(&map, -3).and_then(|v| v.as_bytes()).unwrap();
    let mut sec1 = vec![0x04];
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);
    VerifyingKey::from_sec1_bytes(&sec1).unwrap()
}

#[tokio::test]
async fn test_get_info() {
    let mut client = connect().await;
    let body = client.cbor(&[0x04]).await;
    assert_eq!(body[0], 0x00, "GetInfo must return CTAP2_OK");

    let value: Value = ciborium::from_reader(&body[1..]).unwrap();
    let Value::Map(map) = value else { panic!("GetInfo response is not a CBOR map") };

    let versions = cbor_map_get(&map, 1).expect("versions missing");
    let Value::Array(versions) = versions else { panic!("versions is not an array") };
    for expected in ["FIDO_2_0", "U2F_V2"] {
        assert!(
            versions.iter().any(|v| matches!(v, Value::Text(s) if s == expected)),
            "versions must contain {expected}"
        );
    }

    let aaguid = cbor_map_get(&map, 3).and_then(|v| v.as_bytes()).expect("aaguid missing");
    assert_eq!(aaguid.as_slice(), &AAGUID);

    let options = cbor_map_get(&map, 4).expect("options missing");
    let Value::Map(options) = options else { panic!("options is not a map") };
    let get_bool = |key: &str| {
        options.iter().find_map(|(k, v)| match (k, v) {
            (Value::Text(s), Value::Bool(b)) if s == key => Some(*b),
            _ => None,
        })
    };
    assert_eq!(get_bool("rk"), Some(true));
    assert_eq!(get_bool("up"), Some(true));
    assert_eq!(get_bool("plat"), Some(false));
}

#[tokio::test]
async fn test_make_credential_success() {
    let mut client = connect().await;
    let body = client.cbor(&make_credential_request("example.com", -7)).await;
    assert_eq!(body[0], 0x00, "MakeCredential must succeed");

    let value: Value = ciborium::from_reader(&body[1..]).unwrap();
    let Value::Map(map) = value else { panic!("response is not a map") };

    let fmt = cbor_map_get(&map, 1).and_then(|v| v.as_text()).expect("fmt missing");
    assert_eq!(fmt, "none");

    let auth_data = cbor_map_get(&map, 2).and_then(|v| v.as_bytes()).expect("authData missing");
    let rp_id_hash: [u8; 32] = Sha256::digest(b"example.com").into();
    assert_eq!(&auth_data[..32], &rp_id_hash);
    assert_eq!(auth_data[32], 0x45, "flags UP | UV | AT");
    assert_eq!(&auth_data[33..37], &[0, 0, 0, 0], "fresh credential counter");
    assert_eq!(&auth_data[37..53], &AAGUID, "AAGUID in attested data");
    let cred_id_len = u16::from_be_bytes([auth_data[53], auth_data[54]]);
    assert_eq!(cred_id_len, 16, "credential id is 16 random bytes");

    let statement = cbor_map_get(&map, 3).expect("attStmt missing");
    let Value::Map(statement) = statement else { panic!("attStmt is not a map") };
    assert!(statement.is_empty(), "\"none\" format carries an empty statement");
}

#[tokio::test]
async fn test_make_credential_unsupported_algorithm() {
    let mut client = connect().await;
    let body = client.cbor(&make_credential_request("example.com", -8)).await;
    assert_eq!(body, vec![0x26], "EdDSA-only params must fail");
}

#[tokio::test]
async fn test_get_assertion_roundtrip() {
    let mut client = connect().await;

    let body = client.cbor(&make_credential_request("example.com", -7)).await;
    assert_eq!(body[0], 0x00);
    let value: Value = ciborium::from_reader(&body[1..]).unwrap();
    let Value::Map(map) = value else { panic!() };
    let make_auth_data =
        cbor_map_get(&map, 2).and_then(|v| v.as_bytes()).expect("authData").clone();
    let public_key = credential_public_key(&make_auth_data);
    let credential_id = make_auth_data[55..71].to_vec();

    let client_data_hash: Vec<u8> = Sha256::digest(b"assertion client data").to_vec();
    let body = client.cbor(&get_assertion_request("example.com", &client_data_hash)).await;
    assert_eq!(body[0], 0x00, "GetAssertion must succeed");

    let value: Value = ciborium::from_reader(&body[1..]).unwrap();
    let Value::Map(map) = value else { panic!() };

    // 1: credential descriptor
    let descriptor = cbor_map_get(&map, 1).expect("descriptor missing");
    let Value::Map(descriptor) = descriptor else { panic!("descriptor is not a map") };
    let id = descriptor
        .iter()
        .find_map(|(k, v)| matches!(k, Value::Text(s) if s == "id").then_some(v))
        .and_then(|v| v.as_bytes())
        .expect("descriptor id");
    assert_eq!(id.as_slice(), credential_id.as_slice());

    // 2: authenticator data: UP|UV, counter bumped to 1, no attested block
    let auth_data = cbor_map_get(&map, 2).and_then(|v| v.as_bytes()).expect("authData");
    assert_eq!(auth_data.len(), 37);
    let rp_id_hash: [u8; 32] = Sha256::digest(b"example.com").into();
    assert_eq!(&auth_data[..32], &rp_id_hash);
    assert_eq!(auth_data[32], 0x05);
    assert_eq!(&auth_data[33..37], &1u32.to_be_bytes());

    // 3: signature over authData || clientDataHash with the credential key
    let signature_der =
        cbor_map_get(&map, 3).and_then(|v| v.as_bytes()).expect("signature missing");
    let mut signed = auth_data.clone();
    signed.extend_from_slice(&client_data_hash);
    let signature = Signature::from_der(signature_der).unwrap();
    public_key.verify(&signed, &signature).unwrap();

    // 4: user entity
    let user = cbor_map_get(&map, 4).expect("user missing");
    let Value::Map(user) = user else { panic!("user is not a map") };
    let user_id = user
        .iter()
        .find_map(|(k, v)| matches!(k, Value::Text(s) if s == "id").then_some(v))
        .and_then(|v| v.as_bytes())
        .expect("user id");
    assert_eq!(user_id.as_slice(), b"user-1");

    // A second assertion observes a larger counter.
    let body = client.cbor(&get_assertion_request("example.com", &client_data_hash)).await;
    assert_eq!(body[0], 0x00);
    let value: Value = ciborium::from_reader(&body[1..]).unwrap();
    let Value::Map(map) = value else { panic!() };
    let auth_data = cbor_map_get(&map, 2).and_then(|v| v.as_bytes()).unwrap();
    assert_eq!(&auth_data[33..37], &2u32.to_be_bytes());
}

#[tokio::test]
async fn test_get_assertion_no_credentials() {
    let mut client = connect().await;
    let client_data_hash: Vec<u8> = Sha256::digest(b"x").to_vec();
    let body = client.cbor(&get_assertion_request("nowhere.example", &client_data_hash)).await;
    assert_eq!(body, vec![0x2E]);
}

#[tokio::test]
async fn test_unimplemented_commands_are_invalid() {
    let mut client = connect().await;
    for cmd in [0x06u8, 0x07, 0x08, 0x7F] {
        let body = client.cbor(&[cmd]).await;
        assert_eq!(body, vec![0x01], "command {cmd:#04x} must report INVALID_COMMAND");
    }
}
