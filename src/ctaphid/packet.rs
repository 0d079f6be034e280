use super::types::*;

pub enum Packet {
    Init(InitPacket),
    Cont(ContPacket),
}

pub struct InitPacket {
    pub cid: u32,
    pub cmd: u8,
    pub bcnt: u16,
    pub data: Vec<u8>,
}

pub struct ContPacket {
    pub cid: u32,
    pub seq: u8,
    pub data: Vec<u8>,
}

/// Distinguish init vs cont by bit 7 of byte 4.
pub fn parse_packet(report: &[u8; PACKET_SIZE]) -> Packet {
    let cid = u32::from_be_bytes([report[0], report[1], report[2], report[3]]);
    let byte4 = report[4];

    if byte4 & 0x80 != 0 {
        let cmd = byte4 & 0x7F;
        let bcnt = u16::from_be_bytes([report[5], report[6]]);
        let take = (bcnt as usize).min(INIT_DATA_SIZE);
        let data = report[7..7 + take].to_vec();
        Packet::Init(InitPacket { cid, cmd, bcnt, data })
    } else {
        let seq = byte4;
        let data = report[5..5 + CONT_DATA_SIZE].to_vec();
        Packet::Cont(ContPacket { cid, seq, data })
    }
}

/// Encode a response message into one init packet plus continuations.
pub fn encode_response(cid: u32, cmd: u8, payload: &[u8]) -> Vec<[u8; PACKET_SIZE]> {
    let mut packets = Vec::new();
    let bcnt = payload.len() as u16;
    let cid_bytes = cid.to_be_bytes();

    let mut pkt = [0u8; PACKET_SIZE];
    pkt[0..4].copy_from_slice(&cid_bytes);
    pkt[4] = cmd | 0x80;
    pkt[5..7].copy_from_slice(&bcnt.to_be_bytes());
    let first_chunk = payload.len().min(INIT_DATA_SIZE);
    pkt[7..7 + first_chunk].copy_from_slice(&payload[..first_chunk]);
    packets.push(pkt);

    let mut offset = first_chunk;
    let mut seq: u8 = 0;
    while offset < payload.len() {
        let mut cpkt = [0u8; PACKET_SIZE];
        cpkt[0..4].copy_from_slice(&cid_bytes);
        cpkt[4] = seq;
        let chunk = (payload.len() - offset).min(CONT_DATA_SIZE);
        cpkt[5..5 + chunk].copy_from_slice(&payload[offset..offset + chunk]);
        packets.push(cpkt);
        offset += chunk;
        seq = seq.wrapping_add(1);
    }

    packets
}

/// Single-packet ERROR response.
pub fn encode_error(cid: u32, error_code: u8) -> [u8; PACKET_SIZE] {
    let packets = encode_response(cid, CMD_ERROR, &[error_code]);
    packets[0]
}
