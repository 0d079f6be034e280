//! USB/IP 1.1.0 wire format. Every multi-byte field is big-endian.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{USB_BUS_ID, USB_PRODUCT_ID, USB_VENDOR_ID};

pub const USBIP_VERSION: u16 = 0x0111;

pub const OP_REQ_DEVLIST: u16 = 0x8005;
pub const OP_REP_DEVLIST: u16 = 0x0005;
pub const OP_REQ_IMPORT: u16 = 0x8003;
pub const OP_REP_IMPORT: u16 = 0x0003;

pub const CMD_SUBMIT: u32 = 0x0000_0001;
pub const CMD_UNLINK: u32 = 0x0000_0002;
pub const RET_SUBMIT: u32 = 0x0000_0003;
pub const RET_UNLINK: u32 = 0x0000_0004;

pub const DIR_OUT: u32 = 0;
pub const DIR_IN: u32 = 1;

pub const ECONNRESET: i32 = 104;
pub const ENOENT: i32 = 2;

const DEVICE_PATH: &str = "/sys/devices/pci0000:00/0000:00:01.1/usb1/1-1";
const BUS_NUM: u32 = 1;
const DEV_NUM: u32 = 1;
/// Full speed; interrupt endpoints carry 64-byte reports.
const DEVICE_SPEED: u32 = 2;

/// Shared header of CMD_SUBMIT/CMD_UNLINK/RET_SUBMIT/RET_UNLINK.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub command: u32,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub endpoint: u32,
}

impl MessageHeader {
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            command: r.read_u32().await?,
            seqnum: r.read_u32().await?,
            devid: r.read_u32().await?,
            direction: r.read_u32().await?,
            endpoint: r.read_u32().await?,
        })
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.command.to_be_bytes());
        buf.extend_from_slice(&self.seqnum.to_be_bytes());
        buf.extend_from_slice(&self.devid.to_be_bytes());
        buf.extend_from_slice(&self.direction.to_be_bytes());
        buf.extend_from_slice(&self.endpoint.to_be_bytes());
    }
}

#[derive(Debug)]
pub struct SubmitBody {
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: i32,
    pub number_of_packets: i32,
    pub interval: i32,
    pub setup: [u8; 8],
}

impl SubmitBody {
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Self> {
        let transfer_flags = r.read_u32().await?;
        let transfer_buffer_length = r.read_u32().await?;
        let start_frame = r.read_i32().await?;
        let number_of_packets = r.read_i32().await?;
        let interval = r.read_i32().await?;
        let mut setup = [0u8; 8];
        r.read_exact(&mut setup).await?;
        Ok(Self {
            transfer_flags,
            transfer_buffer_length,
            start_frame,
            number_of_packets,
            interval,
            setup,
        })
    }
}

#[derive(Debug)]
pub struct UnlinkBody {
    pub victim_seqnum: u32,
}

impl UnlinkBody {
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Self> {
        let victim_seqnum = r.read_u32().await?;
        let mut padding = [0u8; 24];
        r.read_exact(&mut padding).await?;
        Ok(Self { victim_seqnum })
    }
}

/// OP_REP_DEVLIST describing the single emulated device.
pub fn encode_op_rep_devlist() -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 4 + 312 + 4);
    buf.extend_from_slice(&USBIP_VERSION.to_be_bytes());
    buf.extend_from_slice(&OP_REP_DEVLIST.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // status
    buf.extend_from_slice(&1u32.to_be_bytes()); // device count
    write_device_block(&mut buf);
    // One interface: HID, no subclass, no protocol, padding.
    buf.extend_from_slice(&[0x03, 0x00, 0x00, 0x00]);
    buf
}

/// OP_REP_IMPORT. A non-zero status carries no device block.
pub fn encode_op_rep_import(status: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 312);
    buf.extend_from_slice(&USBIP_VERSION.to_be_bytes());
    buf.extend_from_slice(&OP_REP_IMPORT.to_be_bytes());
    buf.extend_from_slice(&status.to_be_bytes());
    if status == 0 {
        write_device_block(&mut buf);
    }
    buf
}

fn write_device_block(buf: &mut Vec<u8>) {
    write_padded(buf, DEVICE_PATH.as_bytes(), 256);
    write_padded(buf, USB_BUS_ID.as_bytes(), 32);
    buf.extend_from_slice(&BUS_NUM.to_be_bytes());
    buf.extend_from_slice(&DEV_NUM.to_be_bytes());
    buf.extend_from_slice(&DEVICE_SPEED.to_be_bytes());
    buf.extend_from_slice(&USB_VENDOR_ID.to_be_bytes());
    buf.extend_from_slice(&USB_PRODUCT_ID.to_be_bytes());
    buf.extend_from_slice(&0x0100u16.to_be_bytes()); // bcdDevice
    buf.push(0x00); // bDeviceClass: per interface
    buf.push(0x00); // bDeviceSubClass
    buf.push(0x00); // bDeviceProtocol
    buf.push(0x01); // bConfigurationValue
    buf.push(0x01); // bNumConfigurations
    buf.push(0x01); // bNumInterfaces
}

fn write_padded(buf: &mut Vec<u8>, data: &[u8], width: usize) {
    let take = data.len().min(width);
    buf.extend_from_slice(&data[..take]);
    buf.resize(buf.len() + width - take, 0);
}

/// Zero-terminated fixed-width bus id as sent in OP_REQ_IMPORT.
pub fn parse_bus_id(raw: &[u8; 32]) -> &str {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).unwrap_or("")
}

/// One complete RET_SUBMIT: header, body, and the transfer data for
/// successful IN transfers.
pub fn encode_ret_submit(
    request: &MessageHeader,
    status: i32,
    actual_length: u32,
    data: Option<&[u8]>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(48 + data.map_or(0, <[u8]>::len));
    MessageHeader {
        command: RET_SUBMIT,
        seqnum: request.seqnum,
        devid: request.devid,
        direction: DIR_OUT,
        endpoint: request.endpoint,
    }
    .encode_into(&mut buf);
    buf.extend_from_slice(&status.to_be_bytes());
    buf.extend_from_slice(&actual_length.to_be_bytes());
    buf.extend_from_slice(&0i32.to_be_bytes()); // start_frame
    buf.extend_from_slice(&0i32.to_be_bytes()); // number_of_packets
    buf.extend_from_slice(&0i32.to_be_bytes()); // error_count
    buf.extend_from_slice(&[0u8; 8]); // setup padding
    if let Some(data) = data {
        buf.extend_from_slice(data);
    }
    buf
}

pub fn encode_ret_unlink(request: &MessageHeader, status: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(48);
    MessageHeader {
        command: RET_UNLINK,
        seqnum: request.seqnum,
        devid: request.devid,
        direction: DIR_OUT,
        endpoint: request.endpoint,
    }
    .encode_into(&mut buf);
    buf.extend_from_slice(&status.to_be_bytes());
    buf.extend_from_slice(&[0u8; 24]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devlist_reply_layout() {
        let buf = encode_op_rep_devlist();
        assert_eq!(&buf[0..2], &USBIP_VERSION.to_be_bytes());
        assert_eq!(&buf[2..4], &OP_REP_DEVLIST.to_be_bytes());
        assert_eq!(u32::from_be_bytes(buf[8..12].try_into().unwrap()), 1);
        // 8 op header + 4 count + 256 path + 32 busid + 12 + 6 + 6 + 4 iface
        assert_eq!(buf.len(), 8 + 4 + 256 + 32 + 12 + 6 + 6 + 4);
        let vendor = u16::from_be_bytes(buf[312..314].try_into().unwrap());
        assert_eq!(vendor, USB_VENDOR_ID);
    }

    #[test]
    fn test_import_error_reply_has_no_device() {
        assert_eq!(encode_op_rep_import(1).len(), 8);
        assert_eq!(encode_op_rep_import(0).len(), 8 + 256 + 32 + 12 + 6 + 6);
    }

    #[test]
    fn test_ret_submit_layout() {
        let request = MessageHeader {
            command: CMD_SUBMIT,
            seqnum: 9,
            devid: 0x0001_0001,
            direction: DIR_IN,
            endpoint: 1,
        };
        let buf = encode_ret_submit(&request, 0, 3, Some(&[0xAA, 0xBB, 0xCC]));
        assert_eq!(buf.len(), 48 + 3);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), RET_SUBMIT);
        assert_eq!(u32::from_be_bytes(buf[4..8].try_into().unwrap()), 9);
        assert_eq!(i32::from_be_bytes(buf[20..24].try_into().unwrap()), 0);
        assert_eq!(u32::from_be_bytes(buf[24..28].try_into().unwrap()), 3);
        assert_eq!(&buf[48..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_parse_bus_id() {
        let mut raw = [0u8; 32];
        raw[..3].copy_from_slice(b"1-1");
        assert_eq!(parse_bus_id(&raw), "1-1");
    }
}
