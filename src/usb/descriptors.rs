//! USB descriptors for the emulated full-speed HID authenticator.
//! Multi-byte descriptor fields are little-endian, unlike the USB/IP
//! envelope around them.

use crate::config::{USB_PRODUCT_ID, USB_VENDOR_ID};

pub const FIDO_REPORT_DESCRIPTOR: &[u8] = &[
    0x06, 0xD0, 0xF1, // Usage Page (FIDO Alliance, 0xF1D0)
    0x09, 0x01,       // Usage (CTAP HID)
    0xA1, 0x01,       // Collection (Application)
    0x09, 0x20,       //   Usage (Data In)
    0x15, 0x00,       //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08,       //   Report Size (8 bits)
    0x95, 0x40,       //   Report Count (64)
    0x81, 0x02,       //   Input (Data, Variable, Absolute)
    0x09, 0x21,       //   Usage (Data Out)
    0x15, 0x00,       //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08,       //   Report Size (8 bits)
    0x95, 0x40,       //   Report Count (64)
    0x91, 0x02,       //   Output (Data, Variable, Absolute)
    0xC0,             // End Collection
];

pub const ENDPOINT_IN_ADDR: u8 = 0x81;
pub const ENDPOINT_OUT_ADDR: u8 = 0x02;
const REPORT_SIZE: u16 = 64;
const INTERRUPT_INTERVAL_MS: u8 = 5;

const STRING_MANUFACTURER: &str = "vfido";
const STRING_PRODUCT: &str = "vfido virtual FIDO2 key";
const STRING_SERIAL: &str = "0";

pub fn device_descriptor() -> Vec<u8> {
    let mut d = Vec::with_capacity(18);
    d.push(18); // bLength
    d.push(0x01); // bDescriptorType: DEVICE
    d.extend_from_slice(&0x0200u16.to_le_bytes()); // bcdUSB 2.0
    d.push(0x00); // bDeviceClass: per interface
    d.push(0x00); // bDeviceSubClass
    d.push(0x00); // bDeviceProtocol
    d.push(64); // bMaxPacketSize0
    d.extend_from_slice(&USB_VENDOR_ID.to_le_bytes());
    d.extend_from_slice(&USB_PRODUCT_ID.to_le_bytes());
    d.extend_from_slice(&0x0100u16.to_le_bytes()); // bcdDevice
    d.push(1); // iManufacturer
    d.push(2); // iProduct
    d.push(3); // iSerialNumber
    d.push(1); // bNumConfigurations
    d
}

/// Full configuration tree: configuration, interface, HID descriptor, and
/// the two interrupt endpoints.
pub fn configuration_descriptor() -> Vec<u8> {
    let hid = hid_descriptor();
    let total_length = (9 + 9 + hid.len() + 7 + 7) as u16;

    let mut d = Vec::with_capacity(total_length as usize);
    // Configuration
    d.push(9);
    d.push(0x02); // CONFIGURATION
    d.extend_from_slice(&total_length.to_le_bytes());
    d.push(1); // bNumInterfaces
    d.push(1); // bConfigurationValue
    d.push(0); // iConfiguration
    d.push(0x80); // bmAttributes: bus powered
    d.push(50); // bMaxPower: 100 mA
    // Interface
    d.push(9);
    d.push(0x04); // INTERFACE
    d.push(0); // bInterfaceNumber
    d.push(0); // bAlternateSetting
    d.push(2); // bNumEndpoints
    d.push(0x03); // bInterfaceClass: HID
    d.push(0x00); // bInterfaceSubClass
    d.push(0x00); // bInterfaceProtocol
    d.push(0); // iInterface
    d.extend_from_slice(&hid);
    // Interrupt IN
    d.push(7);
    d.push(0x05); // ENDPOINT
    d.push(ENDPOINT_IN_ADDR);
    d.push(0x03); // interrupt
    d.extend_from_slice(&REPORT_SIZE.to_le_bytes());
    d.push(INTERRUPT_INTERVAL_MS);
    // Interrupt OUT
    d.push(7);
    d.push(0x05);
    d.push(ENDPOINT_OUT_ADDR);
    d.push(0x03);
    d.extend_from_slice(&REPORT_SIZE.to_le_bytes());
    d.push(INTERRUPT_INTERVAL_MS);

    d
}

pub fn hid_descriptor() -> Vec<u8> {
    let mut d = Vec::with_capacity(9);
    d.push(9);
    d.push(0x21); // HID
    d.extend_from_slice(&0x0111u16.to_le_bytes()); // bcdHID 1.11
    d.push(0); // bCountryCode
    d.push(1); // bNumDescriptors
    d.push(0x22); // REPORT
    d.extend_from_slice(&(FIDO_REPORT_DESCRIPTOR.len() as u16).to_le_bytes());
    d
}

pub fn string_descriptor(index: u8) -> Option<Vec<u8>> {
    let payload: Vec<u8> = match index {
        // Supported language IDs: en-US.
        0 => 0x0409u16.to_le_bytes().to_vec(),
        1 => utf16le(STRING_MANUFACTURER),
        2 => utf16le(STRING_PRODUCT),
        3 => utf16le(STRING_SERIAL),
        _ => return None,
    };
    let mut d = Vec::with_capacity(2 + payload.len());
    d.push((2 + payload.len()) as u8);
    d.push(0x03); // STRING
    d.extend_from_slice(&payload);
    Some(d)
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}
