pub(crate) const FLAG_USER_PRESENT: u8 = 0x01;
pub(crate) const FLAG_USER_VERIFIED: u8 = 0x04;
pub(crate) const FLAG_ATTESTED_DATA: u8 = 0x40;

/// authenticatorData for MakeCredential:
/// rpIdHash(32) | flags(UP|UV|AT) | counter(BE u32) | AAGUID(16) |
/// credIdLen(BE u16) | credId | COSE public key.
pub(crate) fn build_make_credential_auth_data(
    rp_id_hash: &[u8; 32],
    counter: u32,
    credential_id: &[u8],
    cose_key: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(37 + 16 + 2 + credential_id.len() + cose_key.len());
    data.extend_from_slice(rp_id_hash);
    data.push(FLAG_USER_PRESENT | FLAG_USER_VERIFIED | FLAG_ATTESTED_DATA);
    data.extend_from_slice(&counter.to_be_bytes());
    data.extend_from_slice(&crate::config::AAGUID);
    data.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
    data.extend_from_slice(credential_id);
    data.extend_from_slice(cose_key);
    data
}

/// authenticatorData for GetAssertion: no attested-credential block.
pub(crate) fn build_assertion_auth_data(rp_id_hash: &[u8; 32], counter: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(37);
    data.extend_from_slice(rp_id_hash);
    data.push(FLAG_USER_PRESENT | FLAG_USER_VERIFIED);
    data.extend_from_slice(&counter.to_be_bytes());
    data
}
