use ciborium::value::Value;

use super::types::{Ctap2Error, GetAssertionRequest};
use crate::authenticator::Authenticator;

pub(crate) fn handle(authenticator: &Authenticator, data: &[u8]) -> Vec<u8> {
    match execute(authenticator, data) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("GET_ASSERTION failed: {e}");
            vec![e.status_byte()]
        }
    }
}

fn execute(authenticator: &Authenticator, data: &[u8]) -> Result<Vec<u8>, Ctap2Error> {
    let req = GetAssertionRequest::try_from(data)?;
    tracing::debug!(rp = %req.rp_id, allow_list = req.allow_list.len(), "GET_ASSERTION");

    let output =
        authenticator.get_assertion(&req.rp_id, &req.client_data_hash, &req.allow_list)?;

    let mut user_map = vec![(
        Value::Text("id".to_string()),
        Value::Bytes(output.user.id.clone()),
    )];
    if let Some(name) = &output.user.name {
        user_map.push((Value::Text("name".to_string()), Value::Text(name.clone())));
    }
    if let Some(display) = &output.user.display_name {
        user_map.push((
            Value::Text("displayName".to_string()),
            Value::Text(display.clone()),
        ));
    }

    let map = Value::Map(vec![
        (
            Value::Integer(1i64.into()),
            Value::Map(vec![
                (
                    Value::Text("type".to_string()),
                    Value::Text("public-key".to_string()),
                ),
                (Value::Text("id".to_string()), Value::Bytes(output.credential_id)),
            ]),
        ),
        (Value::Integer(2i64.into()), Value::Bytes(output.auth_data)),
        (Value::Integer(3i64.into()), Value::Bytes(output.signature)),
        (Value::Integer(4i64.into()), Value::Map(user_map)),
    ]);
    let mut buf = vec![0x00u8];
    ciborium::into_writer(&map, &mut buf).map_err(|e| Ctap2Error::Other(e.to_string()))?;
    Ok(buf)
}
