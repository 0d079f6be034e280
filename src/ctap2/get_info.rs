use ciborium::value::Value;

/// Complete GET_INFO reply: [0x00] ++ CBOR map
/// {1: versions, 3: AAGUID, 4: options}.
pub(crate) fn handle() -> Vec<u8> {
    let map = Value::Map(vec![
        (
            Value::Integer(1i64.into()),
            Value::Array(vec![
                Value::Text("FIDO_2_0".to_string()),
                Value::Text("U2F_V2".to_string()),
            ]),
        ),
        (
            Value::Integer(3i64.into()),
            Value::Bytes(crate::config::AAGUID.to_vec()),
        ),
        (
            Value::Integer(4i64.into()),
            Value::Map(vec![
                (Value::Text("rk".to_string()), Value::Bool(true)),
                (Value::Text("up".to_string()), Value::Bool(true)),
                (Value::Text("plat".to_string()), Value::Bool(false)),
            ]),
        ),
    ]);
    let mut buf = vec![0x00u8];
    ciborium::into_writer(&map, &mut buf).expect("GetInfo encoding is infallible");
    buf
}
