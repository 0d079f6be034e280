use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use ciborium::value::Value;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use rand::rngs::OsRng;

pub const GCM_NONCE_SIZE: usize = 12;

/// scrypt cost parameters for the passphrase KEK: N=32768, r=8, p=1.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encrypt: {0}")]
    Encryption(String),
    /// GCM tag mismatch or malformed ciphertext. Wrong key, wrong nonce and
    /// tampered data are indistinguishable here.
    #[error("Decrypt failed (wrong key or tampered data)")]
    Decryption,
    #[error("KDF: {0}")]
    Kdf(String),
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Sign: {0}")]
    Signature(String),
}

/// AES-256-GCM with a fresh random 12-byte nonce per call.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; GCM_NONCE_SIZE]), CryptoError> {
    let mut nonce_bytes = [0u8; GCM_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok((ciphertext, nonce_bytes))
}

pub fn decrypt(key: &[u8; 32], ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != GCM_NONCE_SIZE {
        return Err(CryptoError::Decryption);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Derive a 32-byte key-encryption key from a passphrase.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    let mut key = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut key)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(key)
}

/// Generate a P-256 key pair. Returns the 32-byte private scalar and the
/// 65-byte uncompressed SEC1 public point (0x04 || x || y).
pub fn generate_keypair() -> ([u8; 32], Vec<u8>) {
    let signing_key = SigningKey::random(&mut OsRng);
    let public = signing_key.verifying_key().to_encoded_point(false).as_bytes().to_vec();
    (signing_key.to_bytes().into(), public)
}

/// ES256: SHA-256 the message, ECDSA-sign with P-256, DER-encode.
pub fn sign_es256(private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key: [u8; 32] = private_key.try_into().map_err(|_| CryptoError::InvalidPrivateKey)?;
    let signing_key =
        SigningKey::from_bytes(&key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let signature: Signature = signing_key.sign(message);
    Ok(signature.to_der().to_bytes().to_vec())
}

/// Uncompressed SEC1 public point for a 32-byte private scalar.
pub fn public_key_for(private_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key: [u8; 32] = private_key.try_into().map_err(|_| CryptoError::InvalidPrivateKey)?;
    let signing_key =
        SigningKey::from_bytes(&key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    Ok(signing_key.verifying_key().to_encoded_point(false).as_bytes().to_vec())
}

/// Split an uncompressed SEC1 point into its x/y coordinates.
pub fn point_coords(public_key: &[u8]) -> Option<([u8; 32], [u8; 32])> {
    if public_key.len() != 65 || public_key[0] != 0x04 {
        return None;
    }
    let x: [u8; 32] = public_key[1..33].try_into().ok()?;
    let y: [u8; 32] = public_key[33..65].try_into().ok()?;
    Some((x, y))
}

/// Encode a P-256 public key as a COSE_Key map:
/// {1: 2 (EC2), 3: -7 (ES256), -1: 1 (P-256), -2: x, -3: y}.
pub fn encode_cose_p256(x: &[u8; 32], y: &[u8; 32]) -> Vec<u8> {
    let map = Value::Map(vec![
        (Value::Integer(1i64.into()), Value::Integer(2i64.into())),
        (Value::Integer(3i64.into()), Value::Integer((-7i64).into())),
        (Value::Integer((-1i64).into()), Value::Integer(1i64.into())),
        (Value::Integer((-2i64).into()), Value::Bytes(x.to_vec())),
        (Value::Integer((-3i64).into()), Value::Bytes(y.to_vec())),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).expect("COSE key encoding is infallible");
    buf
}
