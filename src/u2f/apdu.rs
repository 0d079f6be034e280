use super::U2fError;

/// One parsed ISO 7816-4 command APDU, extended-length encoding as U2F
/// clients emit it.
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length (Le); 0 when absent.
    pub response_len: u16,
}

/// Accepted layouts after the 4-byte header:
///   (empty)
///   00 Le_hi Le_lo
///   00 Lc_hi Lc_lo data[Lc]
///   00 Lc_hi Lc_lo data[Lc] Le_hi Le_lo
/// Anything else is a framing error.
pub fn parse(message: &[u8]) -> Result<Apdu, U2fError> {
    if message.len() < 4 {
        return Err(U2fError::WrongLength);
    }
    let (cla, ins, p1, p2) = (message[0], message[1], message[2], message[3]);
    let rest = &message[4..];

    if rest.is_empty() {
        return Ok(Apdu { cla, ins, p1, p2, data: Vec::new(), response_len: 0 });
    }
    if rest[0] != 0 || rest.len() < 3 {
        return Err(U2fError::WrongLength);
    }
    let length = u16::from_be_bytes([rest[1], rest[2]]);
    let body = &rest[3..];

    if body.is_empty() {
        // No payload: the length field is Le.
        return Ok(Apdu { cla, ins, p1, p2, data: Vec::new(), response_len: length });
    }
    if body.len() == length as usize {
        return Ok(Apdu { cla, ins, p1, p2, data: body.to_vec(), response_len: 0 });
    }
    if body.len() == length as usize + 2 {
        let response_len = u16::from_be_bytes([body[length as usize], body[length as usize + 1]]);
        return Ok(Apdu {
            cla,
            ins,
            p1,
            p2,
            data: body[..length as usize].to_vec(),
            response_len,
        });
    }
    Err(U2fError::WrongLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_only() {
        let apdu = parse(&[0x00, 0x03, 0x00, 0x00]).unwrap();
        assert_eq!(apdu.ins, 0x03);
        assert!(apdu.data.is_empty());
        assert_eq!(apdu.response_len, 0);
    }

    #[test]
    fn test_parse_le_only() {
        let apdu = parse(&[0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00]).unwrap();
        assert!(apdu.data.is_empty());
        assert_eq!(apdu.response_len, 256);
    }

    #[test]
    fn test_parse_lc_data() {
        let apdu = parse(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x03, 0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(apdu.data, [0xAA, 0xBB, 0xCC]);
        assert_eq!(apdu.response_len, 0);
    }

    #[test]
    fn test_parse_lc_data_le() {
        let apdu =
            parse(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0x01, 0x00]).unwrap();
        assert_eq!(apdu.data, [0xAA, 0xBB]);
        assert_eq!(apdu.response_len, 256);
    }

    #[test]
    fn test_parse_malformed() {
        // Too short for a header.
        assert!(parse(&[0x00, 0x01]).is_err());
        // Non-zero marker byte where extended length expects 0x00.
        assert!(parse(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0xAA]).is_err());
        // Lc claims more data than present.
        assert!(parse(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x05, 0xAA]).is_err());
        // One stray trailing byte (neither Lc match nor Lc+2).
        assert!(parse(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0xAA, 0x01]).is_err());
    }
}
