//! Endpoint model for the emulated device. URBs either complete immediately
//! (control, interrupt-OUT) or park in a waiting-request table until the
//! authenticator produces a report (interrupt-IN) or an UNLINK cancels them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use super::descriptors;
use crate::ctaphid::types::PACKET_SIZE;

/// USB/IP transfer direction for a URB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

pub const ENDPOINT_CONTROL: u32 = 0;
pub const ENDPOINT_INTERRUPT_IN: u32 = 1;
pub const ENDPOINT_INTERRUPT_OUT: u32 = 2;

const EPIPE: i32 = 32;

/// Outcome of one URB: a USB/IP status (0 or a negative errno) and, for IN
/// transfers, the data to hand back.
#[derive(Debug)]
pub struct UrbResult {
    pub status: i32,
    pub data: Vec<u8>,
}

impl UrbResult {
    fn ok(data: Vec<u8>) -> Self {
        Self { status: 0, data }
    }

    fn stall() -> Self {
        Self { status: -EPIPE, data: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy)]
struct SetupPacket {
    bm_request_type: u8,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    w_length: u16,
}

impl SetupPacket {
    /// Setup fields are little-endian, per USB.
    fn parse(bytes: &[u8; 8]) -> Self {
        Self {
            bm_request_type: bytes[0],
            b_request: bytes[1],
            w_value: u16::from_le_bytes([bytes[2], bytes[3]]),
            w_index: u16::from_le_bytes([bytes[4], bytes[5]]),
            w_length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
}

struct Queues {
    /// Parked interrupt-IN URBs, keyed by USB/IP sequence number. BTreeMap so
    /// completion follows submission order (seqnums are monotonic).
    parked: BTreeMap<u32, oneshot::Sender<UrbResult>>,
    /// Reports produced by CTAPHID with no URB waiting for them yet.
    pending_reports: VecDeque<[u8; PACKET_SIZE]>,
}

pub struct UsbDevice {
    queues: Mutex<Queues>,
    report_tx: mpsc::Sender<[u8; PACKET_SIZE]>,
}

/// Wire the device to the CTAPHID loop: returns the device plus the report
/// channels CTAPHID consumes and produces.
pub fn start_usb_device() -> (
    Arc<UsbDevice>,
    mpsc::Receiver<[u8; PACKET_SIZE]>,
    mpsc::Sender<[u8; PACKET_SIZE]>,
) {
    let (report_tx, from_host_rx) = mpsc::channel::<[u8; PACKET_SIZE]>(64);
    let (to_host_tx, mut to_host_rx) = mpsc::channel::<[u8; PACKET_SIZE]>(64);

    let device = Arc::new(UsbDevice {
        queues: Mutex::new(Queues {
            parked: BTreeMap::new(),
            pending_reports: VecDeque::new(),
        }),
        report_tx,
    });

    let pump_device = device.clone();
    tokio::spawn(async move {
        while let Some(report) = to_host_rx.recv().await {
            pump_device.push_report(report);
        }
        tracing::debug!("device report pump exiting");
    });

    (device, from_host_rx, to_host_tx)
}

impl UsbDevice {
    /// Handle one submitted URB. The returned receiver resolves when the
    /// transfer completes; dropping its sender via [`UsbDevice::cancel`]
    /// guarantees no completion is ever delivered.
    pub async fn submit(
        &self,
        seq: u32,
        endpoint: u32,
        direction: Direction,
        setup: [u8; 8],
        transfer: Vec<u8>,
        requested_len: u32,
    ) -> oneshot::Receiver<UrbResult> {
        let (tx, rx) = oneshot::channel();
        match (endpoint, direction) {
            (ENDPOINT_CONTROL, _) => {
                let result = self.handle_control(&SetupPacket::parse(&setup));
                let _ = tx.send(result);
            }
            (ENDPOINT_INTERRUPT_OUT, Direction::Out) => {
                let mut report = [0u8; PACKET_SIZE];
                let len = transfer.len().min(PACKET_SIZE);
                report[..len].copy_from_slice(&transfer[..len]);
                if self.report_tx.send(report).await.is_err() {
                    tracing::error!("CTAPHID inbound channel closed");
                    let _ = tx.send(UrbResult::stall());
                } else {
                    let _ = tx.send(UrbResult::ok(Vec::new()));
                }
            }
            (ENDPOINT_INTERRUPT_IN, Direction::In) => {
                let mut queues = self.queues.lock().unwrap();
                match queues.pending_reports.pop_front() {
                    Some(report) => {
                        let mut data = report.to_vec();
                        data.truncate(requested_len as usize);
                        let _ = tx.send(UrbResult::ok(data));
                    }
                    None => {
                        queues.parked.insert(seq, tx);
                    }
                }
            }
            (endpoint, direction) => {
                tracing::warn!(endpoint, ?direction, "URB for unknown endpoint");
                let _ = tx.send(UrbResult::stall());
            }
        }
        rx
    }

    /// Remove a parked URB. `true` means it was still waiting (UNLINK wins),
    /// `false` that it already completed or never parked.
    pub fn cancel(&self, seq: u32) -> bool {
        self.queues.lock().unwrap().parked.remove(&seq).is_some()
    }

    /// A report from CTAPHID: complete the oldest parked IN request, or queue
    /// the report until one arrives.
    fn push_report(&self, report: [u8; PACKET_SIZE]) {
        let mut queues = self.queues.lock().unwrap();
        match queues.parked.pop_first() {
            Some((seq, tx)) => {
                tracing::trace!(seq, "completing parked IN request");
                if tx.send(UrbResult::ok(report.to_vec())).is_err() {
                    // Connection died while the URB was parked.
                    tracing::debug!(seq, "parked request receiver gone, dropping report");
                }
            }
            None => queues.pending_reports.push_back(report),
        }
    }

    fn handle_control(&self, setup: &SetupPacket) -> UrbResult {
        const GET_DESCRIPTOR: u8 = 0x06;
        const SET_CONFIGURATION: u8 = 0x09;
        const SET_INTERFACE: u8 = 0x0B;
        const GET_STATUS: u8 = 0x00;
        const HID_GET_REPORT: u8 = 0x01;
        const HID_SET_REPORT: u8 = 0x09;
        const HID_SET_IDLE: u8 = 0x0A;

        let mut result = match (setup.bm_request_type, setup.b_request) {
            (0x80, GET_DESCRIPTOR) => self.get_descriptor(setup.w_value),
            (0x81, GET_DESCRIPTOR) => match (setup.w_value >> 8) as u8 {
                0x22 => UrbResult::ok(descriptors::FIDO_REPORT_DESCRIPTOR.to_vec()),
                0x21 => UrbResult::ok(descriptors::hid_descriptor()),
                other => {
                    tracing::warn!(descriptor = other, "unknown interface descriptor");
                    UrbResult::stall()
                }
            },
            (0x80, GET_STATUS) => UrbResult::ok(vec![0, 0]),
            (0x00, SET_CONFIGURATION) | (0x01, SET_INTERFACE) => UrbResult::ok(Vec::new()),
            (0x21, HID_SET_IDLE) | (0x21, HID_SET_REPORT) => UrbResult::ok(Vec::new()),
            (0xA1, HID_GET_REPORT) => UrbResult::ok(Vec::new()),
            (bm_request_type, b_request) => {
                tracing::warn!(
                    bm_request_type = format!("{bm_request_type:#04x}"),
                    b_request = format!("{b_request:#04x}"),
                    "unsupported control request"
                );
                UrbResult::stall()
            }
        };
        result.data.truncate(setup.w_length as usize);
        result
    }

    fn get_descriptor(&self, w_value: u16) -> UrbResult {
        let descriptor_type = (w_value >> 8) as u8;
        let index = (w_value & 0xFF) as u8;
        match descriptor_type {
            0x01 => UrbResult::ok(descriptors::device_descriptor()),
            0x02 => UrbResult::ok(descriptors::configuration_descriptor()),
            0x03 => match descriptors::string_descriptor(index) {
                Some(d) => UrbResult::ok(d),
                None => UrbResult::stall(),
            },
            other => {
                tracing::debug!(descriptor = other, index, "unsupported descriptor request");
                UrbResult::stall()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_bytes(bm: u8, req: u8, w_value: u16, w_length: u16) -> [u8; 8] {
        let mut s = [0u8; 8];
        s[0] = bm;
        s[1] = req;
        s[2..4].copy_from_slice(&w_value.to_le_bytes());
        s[6..8].copy_from_slice(&w_length.to_le_bytes());
        s
    }

    #[tokio::test]
    async fn test_get_device_descriptor() {
        let (device, _rx, _tx) = start_usb_device();
        let result = device
            .submit(1, ENDPOINT_CONTROL, Direction::In, setup_bytes(0x80, 0x06, 0x0100, 64), Vec::new(), 64)
            .await
            .await
            .unwrap();
        assert_eq!(result.status, 0);
        assert_eq!(result.data.len(), 18);
    }

    #[tokio::test]
    async fn test_descriptor_truncated_to_w_length() {
        let (device, _rx, _tx) = start_usb_device();
        // Hosts first ask for just the configuration header.
        let result = device
            .submit(1, ENDPOINT_CONTROL, Direction::In, setup_bytes(0x80, 0x06, 0x0200, 9), Vec::new(), 9)
            .await
            .await
            .unwrap();
        assert_eq!(result.status, 0);
        assert_eq!(result.data.len(), 9);
    }

    #[tokio::test]
    async fn test_interrupt_out_feeds_ctaphid() {
        let (device, mut from_host_rx, _tx) = start_usb_device();
        let mut report = vec![0u8; PACKET_SIZE];
        report[0] = 0xAB;
        let result = device
            .submit(2, ENDPOINT_INTERRUPT_OUT, Direction::Out, [0u8; 8], report, 64)
            .await
            .await
            .unwrap();
        assert_eq!(result.status, 0);
        let received = from_host_rx.recv().await.unwrap();
        assert_eq!(received[0], 0xAB);
    }

    #[tokio::test]
    async fn test_in_request_parks_until_report_ready() {
        let (device, _from_host_rx, to_host_tx) = start_usb_device();
        let rx = device
            .submit(3, ENDPOINT_INTERRUPT_IN, Direction::In, [0u8; 8], Vec::new(), 64)
            .await;

        let mut report = [0u8; PACKET_SIZE];
        report[0] = 0x5A;
        to_host_tx.send(report).await.unwrap();

        let result = rx.await.unwrap();
        assert_eq!(result.status, 0);
        assert_eq!(result.data[0], 0x5A);
    }

    #[tokio::test]
    async fn test_cancel_parked_request() {
        let (device, _from_host_rx, to_host_tx) = start_usb_device();
        let rx = device
            .submit(4, ENDPOINT_INTERRUPT_IN, Direction::In, [0u8; 8], Vec::new(), 64)
            .await;

        assert!(device.cancel(4), "parked request must be cancellable");
        assert!(!device.cancel(4), "second cancel must report not-found");
        // The completion handle resolves to an error, never a RET_SUBMIT.
        assert!(rx.await.is_err());

        // A report arriving later queues instead of completing the dead URB.
        to_host_tx.send([0u8; PACKET_SIZE]).await.unwrap();
    }
}
