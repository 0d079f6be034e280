use ciborium::value::Value;

use crate::authenticator::AuthError;
use crate::store::{RelyingPartyEntity, UserEntity};

pub(crate) const CMD_MAKE_CREDENTIAL: u8 = 0x01;
pub(crate) const CMD_GET_ASSERTION: u8 = 0x02;
pub(crate) const CMD_GET_INFO: u8 = 0x04;

pub(crate) const STATUS_INVALID_COMMAND: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Ctap2Error {
    #[error("invalid parameter")]     InvalidParameter,
    #[error("missing parameter")]     MissingParameter,
    #[error("unsupported algorithm")] UnsupportedAlgorithm,
    #[error("credential excluded")]   CredentialExcluded,
    #[error("operation denied")]      OperationDenied,
    #[error("no credentials")]        NoCredentials,
    #[error("{0}")]                   Other(String),
}

impl Ctap2Error {
    pub fn status_byte(&self) -> u8 {
        match self {
            Self::InvalidParameter     => 0x02,
            Self::MissingParameter     => 0x14,
            Self::UnsupportedAlgorithm => 0x26,
            Self::CredentialExcluded   => 0x19,
            Self::OperationDenied      => 0x27,
            Self::NoCredentials        => 0x2E,
            Self::Other(_)             => 0x7F,
        }
    }
}

impl From<AuthError> for Ctap2Error {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Denied => Self::OperationDenied,
            AuthError::NoCredentials => Self::NoCredentials,
            AuthError::CredentialExcluded => Self::CredentialExcluded,
            other => Self::Other(other.to_string()),
        }
    }
}

pub(crate) struct MakeCredentialRequest {
    pub client_data_hash: Vec<u8>,
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    pub resident_key: bool,
    pub exclude_list: Vec<Vec<u8>>,
    /// true if some pubKeyCredParams entry is {type: "public-key", alg: -7}.
    pub alg_ok: bool,
}

pub(crate) struct GetAssertionRequest {
    pub rp_id: String,
    pub client_data_hash: Vec<u8>,
    pub allow_list: Vec<Vec<u8>>,
}

// CBOR parsing helpers

pub(crate) fn parse_cbor(data: &[u8]) -> Result<Vec<(Value, Value)>, Ctap2Error> {
    let value: Value =
        ciborium::from_reader(data).map_err(|_| Ctap2Error::InvalidParameter)?;
    match value {
        Value::Map(map) => Ok(map),
        _ => Err(Ctap2Error::InvalidParameter),
    }
}

pub(crate) fn cbor_get<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    let target = Value::Integer(key.into());
    map.iter().find(|(k, _)| k == &target).map(|(_, v)| v)
}

pub(crate) fn cbor_get_str<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

pub(crate) fn cbor_bytes(v: &Value) -> Option<&[u8]> {
    match v { Value::Bytes(b) => Some(b), _ => None }
}

pub(crate) fn cbor_text(v: &Value) -> Option<&str> {
    match v { Value::Text(s) => Some(s), _ => None }
}

pub(crate) fn cbor_bool(v: &Value) -> Option<bool> {
    match v { Value::Bool(b) => Some(*b), _ => None }
}

pub(crate) fn cbor_map(v: &Value) -> Option<&[(Value, Value)]> {
    match v { Value::Map(m) => Some(m), _ => None }
}

pub(crate) fn cbor_array(v: &Value) -> Option<&[Value]> {
    match v { Value::Array(a) => Some(a), _ => None }
}

/// Collect the credential ids out of a PublicKeyCredentialDescriptor array.
fn descriptor_ids(v: &Value) -> Vec<Vec<u8>> {
    cbor_array(v).map_or_else(Vec::new, |arr| {
        arr.iter()
            .filter_map(|item| {
                let m = cbor_map(item)?;
                let id = cbor_get_str(m, "id").and_then(cbor_bytes)?;
                Some(id.to_vec())
            })
            .collect()
    })
}

impl TryFrom<&[u8]> for MakeCredentialRequest {
    type Error = Ctap2Error;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let map = parse_cbor(data)?;

        // 1: clientDataHash
        let client_data_hash =
            cbor_bytes(cbor_get(&map, 1).ok_or(Ctap2Error::MissingParameter)?)
                .ok_or(Ctap2Error::MissingParameter)?
                .to_vec();

        // 2: rp
        let rp_map = cbor_map(cbor_get(&map, 2).ok_or(Ctap2Error::MissingParameter)?)
            .ok_or(Ctap2Error::MissingParameter)?;
        let rp = RelyingPartyEntity {
            id: cbor_text(cbor_get_str(rp_map, "id").ok_or(Ctap2Error::MissingParameter)?)
                .ok_or(Ctap2Error::MissingParameter)?
                .to_string(),
            name: cbor_get_str(rp_map, "name").and_then(cbor_text).map(str::to_string),
        };

        // 3: user
        let user_map = cbor_map(cbor_get(&map, 3).ok_or(Ctap2Error::MissingParameter)?)
            .ok_or(Ctap2Error::MissingParameter)?;
        let user = UserEntity {
            id: cbor_bytes(cbor_get_str(user_map, "id").ok_or(Ctap2Error::MissingParameter)?)
                .ok_or(Ctap2Error::MissingParameter)?
                .to_vec(),
            name: cbor_get_str(user_map, "name").and_then(cbor_text).map(str::to_string),
            display_name: cbor_get_str(user_map, "displayName")
                .and_then(cbor_text)
                .map(str::to_string),
        };

        // 4: pubKeyCredParams — need {type: "public-key", alg: -7}
        let alg_ok = cbor_get(&map, 4).and_then(cbor_array).is_some_and(|arr| {
            arr.iter().any(|item| {
                cbor_map(item).is_some_and(|m| {
                    let alg_es256 = cbor_get_str(m, "alg")
                        .is_some_and(|v| v == &Value::Integer((-7i64).into()));
                    let type_ok = cbor_get_str(m, "type")
                        .and_then(cbor_text)
                        .is_some_and(|t| t == "public-key");
                    alg_es256 && type_ok
                })
            })
        });

        // 5: excludeList
        let exclude_list = cbor_get(&map, 5).map_or_else(Vec::new, descriptor_ids);

        // 7: options
        let resident_key = cbor_get(&map, 7)
            .and_then(cbor_map)
            .and_then(|m| cbor_get_str(m, "rk"))
            .and_then(cbor_bool)
            .unwrap_or(false);

        Ok(MakeCredentialRequest {
            client_data_hash,
            rp,
            user,
            resident_key,
            exclude_list,
            alg_ok,
        })
    }
}

impl TryFrom<&[u8]> for GetAssertionRequest {
    type Error = Ctap2Error;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let map = parse_cbor(data)?;

        // 1: rpId
        let rp_id = cbor_text(cbor_get(&map, 1).ok_or(Ctap2Error::MissingParameter)?)
            .ok_or(Ctap2Error::MissingParameter)?
            .to_string();

        // 2: clientDataHash
        let client_data_hash =
            cbor_bytes(cbor_get(&map, 2).ok_or(Ctap2Error::MissingParameter)?)
                .ok_or(Ctap2Error::MissingParameter)?
                .to_vec();

        // 3: allowList (optional)
        let allow_list = cbor_get(&map, 3).map_or_else(Vec::new, descriptor_ids);

        Ok(GetAssertionRequest { rp_id, client_data_hash, allow_list })
    }
}
