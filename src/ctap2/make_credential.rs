use ciborium::value::Value;

use super::types::{Ctap2Error, MakeCredentialRequest};
use crate::authenticator::Authenticator;

pub(crate) fn handle(authenticator: &Authenticator, data: &[u8]) -> Vec<u8> {
    match execute(authenticator, data) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("MAKE_CREDENTIAL failed: {e}");
            vec![e.status_byte()]
        }
    }
}

fn execute(authenticator: &Authenticator, data: &[u8]) -> Result<Vec<u8>, Ctap2Error> {
    let req = MakeCredentialRequest::try_from(data)?;
    if !req.alg_ok {
        return Err(Ctap2Error::UnsupportedAlgorithm);
    }
    tracing::debug!(rp = %req.rp.id, rk = req.resident_key, "MAKE_CREDENTIAL");

    let output = authenticator.make_credential(
        req.rp,
        req.user,
        &req.client_data_hash,
        &req.exclude_list,
    )?;

    // Attestation format "none": the statement is the canonical empty map.
    let map = Value::Map(vec![
        (Value::Integer(1i64.into()), Value::Text("none".to_string())),
        (Value::Integer(2i64.into()), Value::Bytes(output.auth_data)),
        (Value::Integer(3i64.into()), Value::Map(vec![])),
    ]);
    let mut buf = vec![0x00u8];
    ciborium::into_writer(&map, &mut buf).map_err(|e| Ctap2Error::Other(e.to_string()))?;
    Ok(buf)
}
