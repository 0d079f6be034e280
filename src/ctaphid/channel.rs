use super::{CtapHidError, types::*};
use crate::config::{CHANNEL_IDLE_TIMEOUT_SECS, TRANSACTION_TIMEOUT_MS};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub enum ChannelState {
    Idle {
        last_activity: Instant,
    },
    Receiving {
        cmd: u8,
        bcnt: u16,
        data: Vec<u8>,
        next_seq: u8,
        deadline: Instant,
    },
    Processing {
        last_activity: Instant,
    },
}

pub struct Message {
    pub cid: u32,
    pub cmd: u8,
    pub payload: Vec<u8>,
}

pub struct ChannelManager {
    channels: HashMap<u32, ChannelState>,
    max_channels: usize,
    rng: StdRng,
}

impl ChannelManager {
    pub fn new(max_channels: usize) -> Self {
        Self {
            channels: HashMap::new(),
            max_channels,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn allocate_cid(&mut self) -> Result<u32, CtapHidError> {
        self.reap_idle();
        if self.channels.len() >= self.max_channels {
            return Err(CtapHidError::ChannelBusy);
        }
        loop {
            let cid: u32 = self.rng.r#gen();
            if cid != RESERVED_CID && cid != BROADCAST_CID && !self.channels.contains_key(&cid) {
                self.channels.insert(
                    cid,
                    ChannelState::Idle { last_activity: Instant::now() },
                );
                return Ok(cid);
            }
        }
    }

    pub fn contains(&self, cid: u32) -> bool {
        self.channels.contains_key(&cid)
    }

    pub fn set_idle(&mut self, cid: u32) {
        if let Some(state) = self.channels.get_mut(&cid) {
            *state = ChannelState::Idle { last_activity: Instant::now() };
        }
    }

    pub fn set_processing(&mut self, cid: u32) {
        if let Some(state) = self.channels.get_mut(&cid) {
            *state = ChannelState::Processing { last_activity: Instant::now() };
        }
    }

    pub fn remove(&mut self, cid: u32) {
        self.channels.remove(&cid);
    }

    /// Drop channels idle for longer than the idle timeout. Channels mid-
    /// assembly are governed by the transaction deadline instead.
    pub fn reap_idle(&mut self) {
        let timeout = Duration::from_secs(CHANNEL_IDLE_TIMEOUT_SECS);
        self.channels.retain(|_, state| {
            let last = match state {
                ChannelState::Idle { last_activity } => *last_activity,
                ChannelState::Receiving { .. } => return true,
                ChannelState::Processing { last_activity } => *last_activity,
            };
            last.elapsed() < timeout
        });
    }

    /// Earliest transaction deadline among channels mid-assembly, if any.
    pub fn next_receiving_deadline(&self) -> Option<Instant> {
        self.channels
            .values()
            .filter_map(|state| match state {
                ChannelState::Receiving { deadline, .. } => Some(*deadline),
                _ => None,
            })
            .min()
    }

    /// Reset every channel whose transaction deadline has passed and return
    /// their cids so the caller can emit TIMEOUT errors.
    pub fn expire_receiving(&mut self) -> Vec<u32> {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .channels
            .iter()
            .filter_map(|(cid, state)| match state {
                ChannelState::Receiving { deadline, .. } if now >= *deadline => Some(*cid),
                _ => None,
            })
            .collect();
        for cid in &expired {
            self.set_idle(*cid);
        }
        expired
    }

    pub fn feed_init(
        &mut self,
        cid: u32,
        cmd: u8,
        bcnt: u16,
        data: Vec<u8>,
    ) -> Result<Option<Message>, CtapHidError> {
        if (bcnt as usize) > MAX_MESSAGE_SIZE {
            return Err(CtapHidError::InvalidLen(bcnt));
        }

        // Broadcast CID is stateless
        if cid == BROADCAST_CID {
            let payload = if bcnt as usize <= data.len() {
                data[..bcnt as usize].to_vec()
            } else {
                data
            };
            return Ok(Some(Message { cid, cmd, payload }));
        }

        if !self.channels.contains_key(&cid) {
            return Err(CtapHidError::InvalidChannel(cid));
        }

        if bcnt as usize <= INIT_DATA_SIZE {
            // Fits in a single packet. Also covers an init packet arriving
            // while this channel is mid-assembly: the partial message is
            // discarded.
            let payload = data[..bcnt as usize].to_vec();
            self.set_idle(cid);
            return Ok(Some(Message { cid, cmd, payload }));
        }

        let deadline = Instant::now() + Duration::from_millis(TRANSACTION_TIMEOUT_MS);
        self.channels.insert(
            cid,
            ChannelState::Receiving { cmd, bcnt, data, next_seq: 0, deadline },
        );
        Ok(None)
    }

    pub fn feed_cont(
        &mut self,
        cid: u32,
        seq: u8,
        new_data: Vec<u8>,
    ) -> Result<Option<Message>, CtapHidError> {
        // Check the deadline before borrowing mutably
        let timed_out = match self.channels.get(&cid) {
            None => return Err(CtapHidError::InvalidChannel(cid)),
            Some(ChannelState::Receiving { deadline, .. }) => Instant::now() > *deadline,
            Some(_) => return Err(CtapHidError::UnexpectedCont),
        };

        if timed_out {
            self.set_idle(cid);
            return Err(CtapHidError::Timeout);
        }

        let (cmd, bcnt, is_complete) = match self.channels.get_mut(&cid) {
            Some(ChannelState::Receiving { cmd, bcnt, data, next_seq, .. }) => {
                if seq != *next_seq {
                    return Err(CtapHidError::InvalidSeq(seq));
                }
                *next_seq += 1;
                data.extend_from_slice(&new_data);
                let complete = data.len() >= *bcnt as usize;
                (*cmd, *bcnt, complete)
            }
            _ => unreachable!(),
        };

        if is_complete {
            let payload = match self.channels.get(&cid) {
                Some(ChannelState::Receiving { data, .. }) => data[..bcnt as usize].to_vec(),
                _ => unreachable!(),
            };
            self.set_idle(cid);
            Ok(Some(Message { cid, cmd, payload }))
        } else {
            Ok(None)
        }
    }
}
