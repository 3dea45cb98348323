// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Distributed state coordination: propose, majority ACK, commit
//!
//! Peers agree on a small replicated value over the broker. A proposer
//! publishes the new state on the propose topic, peers apply a guard and
//! acknowledge on the ACK topic, and once a majority (including the
//! proposer) accepted, the proposer commits and broadcasts the result on
//! the commit topic.
//!
//! Coordination payloads travel in small messages; the state must fit the
//! payload alongside its framing.

use heapless::FnvIndexMap;

use crate::config;
use crate::message::broker::MessageBroker;
use crate::message::types::SmallMessage;
use crate::platform::Platform;
use crate::types::{TaskId, BROADCAST_RECEIVER};

/// Wire representation of a replicated state value
pub trait WireState: Copy {
    /// Encoded size in bytes
    const WIRE_SIZE: usize;

    /// Encode into `buf` (caller guarantees `buf.len() >= WIRE_SIZE`)
    fn encode(&self, buf: &mut [u8]);

    /// Decode from `buf`
    fn decode(buf: &[u8]) -> Option<Self>;
}

impl WireState for u32 {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        Some(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }
}

#[derive(Clone, Copy)]
struct PendingProposal<S> {
    state: S,
    acks: u16,
}

/// Topics used for coordination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTopics {
    /// Proposals
    pub propose: u16,
    /// Acceptance acknowledgments
    pub ack: u16,
    /// Committed values
    pub commit: u16,
}

/// Replicated state machine over a small-message broker
pub struct DistributedState<S: WireState> {
    self_task: TaskId,
    topics: StateTopics,
    max_peers: usize,
    state: S,
    pending: FnvIndexMap<u16, PendingProposal<S>, { config::DS_MAX_OUTSTANDING }>,
    local_seq: u32,
}

impl<S: WireState> DistributedState<S> {
    /// Create with an initial value; `max_peers` sizes the majority quorum
    pub fn new(self_task: TaskId, topics: StateTopics, max_peers: usize, initial: S) -> Self {
        Self {
            self_task,
            topics,
            max_peers,
            state: initial,
            pending: FnvIndexMap::new(),
            local_seq: 1,
        }
    }

    /// Currently committed value
    pub fn current(&self) -> S {
        self.state
    }

    /// Outstanding proposal count
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Start a proposal; returns its sequence (> 0) or 0 when the
    /// outstanding table is full or the state cannot fit a small payload
    pub fn propose<P: Platform, const MT: usize>(
        &mut self,
        broker: &mut MessageBroker<SmallMessage, MT>,
        platform: &P,
        new_state: S,
    ) -> u16 {
        if self.pending.len() >= self.pending.capacity() {
            return 0;
        }
        // Proposal framing: seq + sender + encoded state
        if 4 + S::WIRE_SIZE > config::SMALL_PAYLOAD {
            return 0;
        }
        let seq = self.local_seq as u16;
        self.local_seq = self.local_seq.wrapping_add(1);

        // The proposer counts as its own first acceptance
        let _ = self.pending.insert(
            seq,
            PendingProposal {
                state: new_state,
                acks: 1,
            },
        );

        let mut msg = SmallMessage::new();
        msg.header.receiver = BROADCAST_RECEIVER;
        msg.header.sequence = seq;
        msg.header.timestamp = platform.now_us();
        let mut payload = [0u8; config::SMALL_PAYLOAD];
        let len = encode_proposal(&mut payload, seq, self.self_task.value(), &new_state);
        let _ = msg.set_payload(&payload[..len]);
        let _ = broker.publish(platform, self.topics.propose, &mut msg, self.self_task);
        seq
    }

    /// Route one coordination message; `guard` decides proposal acceptance
    pub fn process_message<P: Platform, const MT: usize>(
        &mut self,
        broker: &mut MessageBroker<SmallMessage, MT>,
        platform: &P,
        msg: &SmallMessage,
        guard: impl Fn(&S, &S) -> bool,
    ) {
        let topic = msg.header.topic;
        if topic == self.topics.propose {
            self.on_propose(broker, platform, msg, guard);
        } else if topic == self.topics.ack {
            self.on_ack(broker, platform, msg);
        } else if topic == self.topics.commit {
            self.on_commit(msg);
        }
    }

    fn on_propose<P: Platform, const MT: usize>(
        &mut self,
        broker: &mut MessageBroker<SmallMessage, MT>,
        platform: &P,
        msg: &SmallMessage,
        guard: impl Fn(&S, &S) -> bool,
    ) {
        let Some((seq, from, proposed)) = decode_proposal::<S>(msg) else {
            return;
        };
        if from == self.self_task.value() {
            return;
        }
        if !guard(&self.state, &proposed) {
            return;
        }
        let mut ack = SmallMessage::new();
        ack.header.receiver = from;
        ack.header.sequence = seq;
        ack.header.timestamp = platform.now_us();
        let mut payload = [0u8; config::SMALL_PAYLOAD];
        let len = encode_ack(&mut payload, seq, self.self_task.value(), true);
        let _ = ack.set_payload(&payload[..len]);
        let _ = broker.publish(platform, self.topics.ack, &mut ack, self.self_task);
    }

    fn on_ack<P: Platform, const MT: usize>(
        &mut self,
        broker: &mut MessageBroker<SmallMessage, MT>,
        platform: &P,
        msg: &SmallMessage,
    ) {
        let Some((seq, _from, accept)) = decode_ack(msg) else {
            return;
        };
        if !accept {
            return;
        }
        let majority = (self.max_peers / 2 + 1) as u16;
        let committed = match self.pending.get_mut(&seq) {
            Some(pending) => {
                pending.acks += 1;
                (pending.acks >= majority).then_some(pending.state)
            }
            None => None,
        };
        if let Some(state) = committed {
            self.state = state;
            self.pending.remove(&seq);

            let mut commit = SmallMessage::new();
            commit.header.receiver = BROADCAST_RECEIVER;
            commit.header.sequence = seq;
            commit.header.timestamp = platform.now_us();
            let mut payload = [0u8; config::SMALL_PAYLOAD];
            let len = encode_commit(&mut payload, seq, &state);
            let _ = commit.set_payload(&payload[..len]);
            let _ = broker.publish(platform, self.topics.commit, &mut commit, self.self_task);
        }
    }

    fn on_commit(&mut self, msg: &SmallMessage) {
        if let Some((_seq, committed)) = decode_commit::<S>(msg) {
            self.state = committed;
        }
    }
}

fn encode_proposal<S: WireState>(buf: &mut [u8], seq: u16, from: u16, state: &S) -> usize {
    buf[0..2].copy_from_slice(&seq.to_le_bytes());
    buf[2..4].copy_from_slice(&from.to_le_bytes());
    state.encode(&mut buf[4..]);
    4 + S::WIRE_SIZE
}

fn decode_proposal<S: WireState>(msg: &SmallMessage) -> Option<(u16, u16, S)> {
    let payload = msg.payload_bytes();
    if payload.len() < 4 + S::WIRE_SIZE {
        return None;
    }
    let seq = u16::from_le_bytes([payload[0], payload[1]]);
    let from = u16::from_le_bytes([payload[2], payload[3]]);
    let state = S::decode(&payload[4..])?;
    Some((seq, from, state))
}

fn encode_ack(buf: &mut [u8], seq: u16, from: u16, accept: bool) -> usize {
    buf[0..2].copy_from_slice(&seq.to_le_bytes());
    buf[2..4].copy_from_slice(&from.to_le_bytes());
    buf[4] = u8::from(accept);
    5
}

fn decode_ack(msg: &SmallMessage) -> Option<(u16, u16, bool)> {
    let payload = msg.payload_bytes();
    if payload.len() < 5 {
        return None;
    }
    let seq = u16::from_le_bytes([payload[0], payload[1]]);
    let from = u16::from_le_bytes([payload[2], payload[3]]);
    Some((seq, from, payload[4] != 0))
}

fn encode_commit<S: WireState>(buf: &mut [u8], seq: u16, state: &S) -> usize {
    buf[0..2].copy_from_slice(&seq.to_le_bytes());
    state.encode(&mut buf[2..]);
    2 + S::WIRE_SIZE
}

fn decode_commit<S: WireState>(msg: &SmallMessage) -> Option<(u16, S)> {
    let payload = msg.payload_bytes();
    if payload.len() < 2 + S::WIRE_SIZE {
        return None;
    }
    let seq = u16::from_le_bytes([payload[0], payload[1]]);
    let state = S::decode(&payload[2..])?;
    Some((seq, state))
}
