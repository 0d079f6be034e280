use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use super::{
    CtapHidError,
    channel::{ChannelManager, Message},
    packet::{Packet, encode_error, encode_response, parse_packet},
    types::*,
};
use crate::authenticator::Authenticator;
use crate::config::MAX_CHANNELS;
use crate::{ctap2, u2f};

/// Sequentially assemble reports into messages and dispatch them to the U2F
/// and CTAP2 engines. Within a channel, messages complete in submission
/// order; the transaction deadline fires even when no packets arrive.
pub async fn run_ctaphid_loop(
    mut incoming_rx: mpsc::Receiver<[u8; PACKET_SIZE]>,
    outgoing_tx: mpsc::Sender<[u8; PACKET_SIZE]>,
    authenticator: Arc<Authenticator>,
) {
    let mut manager = ChannelManager::new(MAX_CHANNELS);
    tracing::info!("CTAPHID loop running");

    loop {
        let report = tokio::select! {
            report = incoming_rx.recv() => match report {
                Some(report) => Some(report),
                None => break,
            },
            _ = wait_until(manager.next_receiving_deadline()) => None,
        };

        let packets = match report {
            Some(report) => {
                process_report(&mut manager, &report, &authenticator, &outgoing_tx).await
            }
            None => manager
                .expire_receiving()
                .into_iter()
                .map(|cid| {
                    tracing::warn!(cid = format!("{cid:#010x}"), "transaction timeout");
                    encode_error(cid, ERR_MSG_TIMEOUT)
                })
                .collect(),
        };

        for pkt in packets {
            if outgoing_tx.send(pkt).await.is_err() {
                tracing::error!("Outgoing channel closed");
                return;
            }
        }
    }
    tracing::info!("CTAPHID loop exiting (incoming channel closed)");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

async fn process_report(
    manager: &mut ChannelManager,
    report: &[u8; PACKET_SIZE],
    authenticator: &Arc<Authenticator>,
    outgoing_tx: &mpsc::Sender<[u8; PACKET_SIZE]>,
) -> Vec<[u8; PACKET_SIZE]> {
    match parse_packet(report) {
        Packet::Init(init) => {
            tracing::debug!(
                cid = format!("{:#010x}", init.cid),
                cmd = format!("{:#04x}", init.cmd),
                bcnt = init.bcnt,
                "INIT packet"
            );

            if init.cid == RESERVED_CID {
                tracing::warn!("Rejected reserved CID");
                return vec![encode_error(BROADCAST_CID, ERR_INVALID_CHANNEL)];
            }
            if init.cid != BROADCAST_CID && !manager.contains(init.cid) {
                tracing::warn!(cid = format!("{:#010x}", init.cid), "Unknown CID");
                return vec![encode_error(init.cid, ERR_INVALID_CHANNEL)];
            }

            match manager.feed_init(init.cid, init.cmd, init.bcnt, init.data) {
                Ok(Some(msg)) => dispatch_message(manager, msg, authenticator, outgoing_tx).await,
                Ok(None) => vec![],
                Err(e) => {
                    tracing::warn!(cid = format!("{:#010x}", init.cid), "feed_init error: {e}");
                    vec![encode_error(init.cid, ctaphid_error_code(&e))]
                }
            }
        }
        Packet::Cont(cont) => {
            tracing::debug!(
                cid = format!("{:#010x}", cont.cid),
                seq = cont.seq,
                "CONT packet"
            );

            if cont.cid == BROADCAST_CID || cont.cid == RESERVED_CID {
                tracing::warn!(cid = format!("{:#010x}", cont.cid), "CONT on invalid CID");
                return vec![encode_error(cont.cid, ERR_INVALID_CHANNEL)];
            }
            match manager.feed_cont(cont.cid, cont.seq, cont.data) {
                Ok(Some(msg)) => dispatch_message(manager, msg, authenticator, outgoing_tx).await,
                Ok(None) => vec![],
                // A stray continuation with no assembly in progress is noise.
                Err(CtapHidError::UnexpectedCont) => {
                    tracing::debug!(cid = format!("{:#010x}", cont.cid), "spurious CONT ignored");
                    vec![]
                }
                Err(e) => {
                    // A sequence error aborts the transaction.
                    if matches!(e, CtapHidError::InvalidSeq(_)) {
                        manager.set_idle(cont.cid);
                    }
                    tracing::warn!(cid = format!("{:#010x}", cont.cid), "feed_cont error: {e}");
                    vec![encode_error(cont.cid, ctaphid_error_code(&e))]
                }
            }
        }
    }
}

async fn dispatch_message(
    manager: &mut ChannelManager,
    msg: Message,
    authenticator: &Arc<Authenticator>,
    outgoing_tx: &mpsc::Sender<[u8; PACKET_SIZE]>,
) -> Vec<[u8; PACKET_SIZE]> {
    if msg.cid == BROADCAST_CID && msg.cmd != CMD_INIT {
        tracing::warn!(cmd = format!("{:#04x}", msg.cmd), "non-INIT command on broadcast CID");
        return vec![encode_error(msg.cid, ERR_INVALID_CHANNEL)];
    }
    match msg.cmd {
        CMD_INIT => handle_init(manager, msg),
        CMD_PING => {
            tracing::debug!(cid = format!("{:#010x}", msg.cid), len = msg.payload.len(), "PING");
            encode_response(msg.cid, CMD_PING, &msg.payload)
        }
        CMD_WINK => {
            tracing::info!(cid = format!("{:#010x}", msg.cid), "WINK");
            encode_response(msg.cid, CMD_WINK, &[])
        }
        CMD_CANCEL => {
            manager.set_idle(msg.cid);
            vec![]
        }
        CMD_MSG => {
            manager.set_processing(msg.cid);
            let auth = authenticator.clone();
            let payload = msg.payload;
            let result =
                tokio::task::spawn_blocking(move || u2f::handle_message(&auth, &payload)).await;
            manager.set_idle(msg.cid);
            match result {
                Ok(response) => encode_response(msg.cid, CMD_MSG, &response),
                Err(e) => {
                    tracing::error!("U2F handler panicked: {e}");
                    vec![encode_error(msg.cid, ERR_OTHER)]
                }
            }
        }
        CMD_CBOR => {
            manager.set_processing(msg.cid);
            let keepalive = spawn_keepalive(msg.cid, outgoing_tx.clone());
            let auth = authenticator.clone();
            let payload = msg.payload;
            let result =
                tokio::task::spawn_blocking(move || ctap2::handle_message(&auth, &payload)).await;
            let _ = keepalive.send(());
            manager.set_idle(msg.cid);
            match result {
                Ok(response) => encode_response(msg.cid, CMD_CBOR, &response),
                Err(e) => {
                    tracing::error!("CTAP2 handler panicked: {e}");
                    vec![encode_error(msg.cid, ERR_OTHER)]
                }
            }
        }
        cmd => {
            tracing::warn!(
                cid = format!("{:#010x}", msg.cid),
                cmd = format!("{:#04x}", cmd),
                "Unknown command"
            );
            vec![encode_error(msg.cid, ERR_INVALID_CMD)]
        }
    }
}

/// Emit KEEPALIVE (UP_NEEDED) every 100 ms while a CBOR operation is in
/// flight, so the host keeps the transaction open across approval prompts.
/// The first tick is swallowed; fast operations produce no keepalives.
fn spawn_keepalive(cid: u32, outgoing_tx: mpsc::Sender<[u8; PACKET_SIZE]>) -> oneshot::Sender<()> {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(100));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pkt = encode_response(cid, CMD_KEEPALIVE, &[KEEPALIVE_STATUS_UP_NEEDED])[0];
                    if outgoing_tx.send(pkt).await.is_err() {
                        break;
                    }
                }
                _ = &mut stop_rx => break,
            }
        }
    });
    stop_tx
}

fn handle_init(manager: &mut ChannelManager, msg: Message) -> Vec<[u8; PACKET_SIZE]> {
    if msg.payload.len() < INIT_NONCE_SIZE {
        tracing::warn!("INIT payload too short: {} bytes", msg.payload.len());
        return vec![encode_error(msg.cid, ERR_INVALID_LEN)];
    }

    // Broadcast allocates a fresh channel; INIT on an existing channel is a
    // resync and keeps its cid.
    let response_cid = if msg.cid == BROADCAST_CID {
        match manager.allocate_cid() {
            Ok(cid) => {
                tracing::info!(cid = format!("{cid:#010x}"), "Allocated new channel");
                cid
            }
            Err(_) => {
                tracing::warn!("All channels busy, rejecting INIT");
                return vec![encode_error(msg.cid, ERR_CHANNEL_BUSY)];
            }
        }
    } else {
        manager.set_idle(msg.cid);
        msg.cid
    };

    let mut response = [0u8; INIT_RESPONSE_SIZE];
    response[0..8].copy_from_slice(&msg.payload[0..8]);
    response[8..12].copy_from_slice(&response_cid.to_be_bytes());
    response[12] = CTAPHID_PROTOCOL_VERSION;
    response[13] = DEVICE_VERSION_MAJOR;
    response[14] = DEVICE_VERSION_MINOR;
    response[15] = DEVICE_VERSION_BUILD;
    response[16] = DEVICE_CAPABILITIES;

    encode_response(msg.cid, CMD_INIT, &response)
}

fn ctaphid_error_code(e: &CtapHidError) -> u8 {
    match e {
        CtapHidError::ChannelBusy => ERR_CHANNEL_BUSY,
        CtapHidError::InvalidChannel(_) => ERR_INVALID_CHANNEL,
        CtapHidError::UnexpectedCont => ERR_INVALID_CMD,
        CtapHidError::InvalidSeq(_) => ERR_INVALID_SEQ,
        CtapHidError::InvalidLen(_) => ERR_INVALID_LEN,
        CtapHidError::Timeout => ERR_MSG_TIMEOUT,
    }
}
