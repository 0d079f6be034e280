//! TCP front of the virtual device. One reader task per connection decodes
//! USB/IP messages and hands URBs to the device; completions are written
//! from their own tasks under a response mutex, so a parked IN transfer
//! never blocks the reader.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

use super::UsbIpError;
use super::proto::{self, MessageHeader, SubmitBody, UnlinkBody};
use crate::config::USB_BUS_ID;
use crate::usb::{Direction, UsbDevice};

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

pub struct UsbIpServer {
    listener: TcpListener,
    device: Arc<UsbDevice>,
}

impl UsbIpServer {
    pub async fn bind(addr: impl ToSocketAddrs, device: Arc<UsbDevice>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, device })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if !peer.ip().is_loopback() {
                tracing::warn!(%peer, "rejecting non-loopback connection");
                continue;
            }
            tracing::info!(%peer, "connection accepted");
            let device = self.device.clone();
            tokio::spawn(async move {
                match handle_connection(stream, device).await {
                    Ok(()) => tracing::info!(%peer, "connection closed"),
                    Err(e) => tracing::warn!(%peer, "connection error: {e}"),
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, device: Arc<UsbDevice>) -> Result<(), UsbIpError> {
    stream.set_nodelay(true).ok();
    let (mut rd, wr) = stream.into_split();
    let wr: SharedWriter = Arc::new(Mutex::new(wr));

    if !control_phase(&mut rd, &wr).await? {
        return Ok(());
    }
    command_phase(&mut rd, &wr, &device).await
}

/// DEVLIST/IMPORT handshake. Returns true once the device has been imported
/// and the socket moves to the command phase.
async fn control_phase(rd: &mut OwnedReadHalf, wr: &SharedWriter) -> Result<bool, UsbIpError> {
    use tokio::io::AsyncReadExt;

    loop {
        let mut header = [0u8; 8];
        match rd.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        let version = u16::from_be_bytes([header[0], header[1]]);
        let code = u16::from_be_bytes([header[2], header[3]]);
        if version != proto::USBIP_VERSION {
            return Err(UsbIpError::Protocol(format!(
                "unsupported USB/IP version {version:#06x}"
            )));
        }

        match code {
            proto::OP_REQ_DEVLIST => {
                tracing::debug!("OP_REQ_DEVLIST");
                wr.lock().await.write_all(&proto::encode_op_rep_devlist()).await?;
            }
            proto::OP_REQ_IMPORT => {
                let mut bus_id = [0u8; 32];
                rd.read_exact(&mut bus_id).await?;
                let requested = proto::parse_bus_id(&bus_id);
                tracing::debug!(bus_id = requested, "OP_REQ_IMPORT");
                if requested == USB_BUS_ID {
                    wr.lock().await.write_all(&proto::encode_op_rep_import(0)).await?;
                    tracing::info!("device imported");
                    return Ok(true);
                }
                tracing::warn!(bus_id = requested, "import for unknown bus id");
                wr.lock().await.write_all(&proto::encode_op_rep_import(1)).await?;
            }
            code => {
                return Err(UsbIpError::Protocol(format!(
                    "unknown control code {code:#06x}"
                )));
            }
        }
    }
}

/// SUBMIT/UNLINK loop. The reader registers a completion per SUBMIT and
/// moves straight to the next message.
async fn command_phase(
    rd: &mut OwnedReadHalf,
    wr: &SharedWriter,
    device: &Arc<UsbDevice>,
) -> Result<(), UsbIpError> {
    loop {
        let header = match MessageHeader::read(rd).await {
            Ok(h) => h,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match header.command {
            proto::CMD_SUBMIT => handle_submit(rd, wr, device, header).await?,
            proto::CMD_UNLINK => handle_unlink(rd, wr, device, header).await?,
            command => {
                return Err(UsbIpError::Protocol(format!(
                    "unsupported command {command:#010x}"
                )));
            }
        }
    }
}

async fn handle_submit(
    rd: &mut OwnedReadHalf,
    wr: &SharedWriter,
    device: &Arc<UsbDevice>,
    header: MessageHeader,
) -> Result<(), UsbIpError> {
    use tokio::io::AsyncReadExt;

    let body = SubmitBody::read(rd).await?;
    let direction = if header.direction == proto::DIR_IN {
        Direction::In
    } else {
        Direction::Out
    };
    let mut transfer = Vec::new();
    if direction == Direction::Out && body.transfer_buffer_length > 0 {
        transfer = vec![0u8; body.transfer_buffer_length as usize];
        rd.read_exact(&mut transfer).await?;
    }
    tracing::trace!(
        seq = header.seqnum,
        endpoint = header.endpoint,
        ?direction,
        len = body.transfer_buffer_length,
        "CMD_SUBMIT"
    );

    let out_length = transfer.len() as u32;
    let completion = device
        .submit(
            header.seqnum,
            header.endpoint,
            direction,
            body.setup,
            transfer,
            body.transfer_buffer_length,
        )
        .await;

    let wr = wr.clone();
    tokio::spawn(async move {
        // An unlinked URB drops its sender; no RET_SUBMIT may follow.
        let Ok(result) = completion.await else {
            tracing::debug!(seq = header.seqnum, "URB unlinked before completion");
            return;
        };
        let actual_length = match direction {
            Direction::In => result.data.len() as u32,
            Direction::Out => out_length,
        };
        let data = (direction == Direction::In && result.status == 0).then_some(result.data);
        let reply = proto::encode_ret_submit(&header, result.status, actual_length, data.as_deref());
        let mut w = wr.lock().await;
        if let Err(e) = w.write_all(&reply).await {
            tracing::debug!(seq = header.seqnum, "RET_SUBMIT write failed: {e}");
        }
    });
    Ok(())
}

async fn handle_unlink(
    rd: &mut OwnedReadHalf,
    wr: &SharedWriter,
    device: &Arc<UsbDevice>,
    header: MessageHeader,
) -> Result<(), UsbIpError> {
    let body = UnlinkBody::read(rd).await?;
    let status = if device.cancel(body.victim_seqnum) {
        -proto::ECONNRESET
    } else {
        -proto::ENOENT
    };
    tracing::debug!(seq = header.seqnum, victim = body.victim_seqnum, status, "CMD_UNLINK");
    let reply = proto::encode_ret_unlink(&header, status);
    wr.lock().await.write_all(&reply).await?;
    Ok(())
}
