// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS publisher/subscriber: ACK-based delivery with retransmission and
//! per-(sender, topic) monotonic ordering
//!
//! The publisher keeps a bounded pending map of unacknowledged messages and
//! republishes entries whose ACK timeout elapsed. The subscriber tracks the
//! last accepted sequence per `(sender << 16) | topic` key, acknowledges
//! deliveries, and suppresses duplicates - giving at-least-once transport
//! with exactly-once semantics at the receiver.
//!
//! Both sides borrow the broker per call, the way a writer borrows its
//! transport; they own only their QoS bookkeeping.

use heapless::FnvIndexMap;

use crate::config;
use crate::error::{Error, Result};
use crate::message::broker::MessageBroker;
use crate::message::types::{Envelope, MessageAck, MessageFlags};
use crate::platform::Platform;
use crate::types::{TaskId, TimeoutMs, Timestamp};

/// Pending-map entry: the message plus retransmit bookkeeping
#[derive(Clone)]
struct PendingEntry<M> {
    msg: M,
    last_send: Timestamp,
    attempts: u16,
}

/// Publisher side: assigns sequences, tracks ACKs, retransmits
pub struct QosPublisher<M: Envelope> {
    from_task: TaskId,
    ack_topic: u16,
    pending: FnvIndexMap<u16, PendingEntry<M>, { config::QOS_PENDING_LIMIT }>,
    local_seq: u32,
}

impl<M: Envelope> QosPublisher<M> {
    /// Create a publisher sending from `from_task`, listening for ACKs on
    /// `ack_topic`
    pub fn new(from_task: TaskId, ack_topic: u16) -> Self {
        Self {
            from_task,
            ack_topic,
            pending: FnvIndexMap::new(),
            local_seq: 1,
        }
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.local_seq as u16;
        self.local_seq = self.local_seq.wrapping_add(1);
        seq
    }

    /// Publish with acknowledgment tracking
    ///
    /// Fails with `OutOfMemory` when the pending map is full, without
    /// enqueuing - the caller must back off.
    pub fn publish<P: Platform, const MT: usize>(
        &mut self,
        broker: &mut MessageBroker<M, MT>,
        platform: &P,
        topic_id: u16,
        msg: &mut M,
    ) -> Result<()> {
        let header = msg.header_mut();
        header.flags = header.flags.with(MessageFlags::REQUIRES_ACK);
        if header.timestamp == 0 {
            header.timestamp = platform.now_us();
        }
        if header.sequence == 0 {
            header.sequence = self.next_seq();
        }
        header.topic = topic_id;

        if self.pending.len() >= self.pending.capacity() {
            return Err(Error::OutOfMemory);
        }
        let entry = PendingEntry {
            msg: msg.clone(),
            last_send: msg.header().timestamp,
            attempts: 1,
        };
        if self.pending.insert(msg.header().sequence, entry).is_err() {
            return Err(Error::OutOfMemory);
        }

        broker.publish(platform, topic_id, msg, self.from_task)
    }

    /// Republish every pending entry whose ACK timeout elapsed
    ///
    /// Call periodically (e.g. from the owning task's loop).
    pub fn pump_retransmit<P: Platform, const MT: usize>(
        &mut self,
        broker: &mut MessageBroker<M, MT>,
        platform: &P,
    ) {
        let now = platform.now_us();
        for (_, entry) in self.pending.iter_mut() {
            if now.saturating_sub(entry.last_send) >= config::ACK_TIMEOUT_US {
                entry.last_send = now;
                entry.attempts += 1;
                let topic = entry.msg.header().topic;
                let _ = broker.publish(platform, topic, &mut entry.msg, self.from_task);
            }
        }
    }

    /// Clear the pending entry acknowledged by `ack`
    pub fn on_ack(&mut self, ack: &MessageAck) {
        self.pending.remove(&ack.sequence);
    }

    /// Unacknowledged message count
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Retransmit attempts recorded for a pending sequence
    pub fn attempts(&self, sequence: u16) -> Option<u16> {
        self.pending.get(&sequence).map(|e| e.attempts)
    }
}

/// Subscriber side: dedup, ordering, ACK emission
pub struct QosSubscriber<M: Envelope> {
    self_task: TaskId,
    ack_topic: u16,
    last_seq: FnvIndexMap<u32, u16, { config::QOS_TRACK_LIMIT }>,
    _marker: core::marker::PhantomData<M>,
}

impl<M: Envelope + AckPayload> QosSubscriber<M> {
    /// Create a subscriber receiving as `self_task`, acknowledging on
    /// `ack_topic`
    pub fn new(self_task: TaskId, ack_topic: u16) -> Self {
        Self {
            self_task,
            ack_topic,
            last_seq: FnvIndexMap::new(),
            _marker: core::marker::PhantomData,
        }
    }

    /// Receive with duplicate suppression and monotonic ordering
    ///
    /// A replayed or out-of-order message is acknowledged (when requested)
    /// and reported as `NotFound` so the caller never observes it.
    pub fn receive<P: Platform, const MT: usize>(
        &mut self,
        broker: &mut MessageBroker<M, MT>,
        platform: &P,
        timeout: TimeoutMs,
    ) -> Result<M> {
        let msg = broker.receive(platform, self.self_task, timeout)?;

        let key = (u32::from(msg.header().sender) << 16) | u32::from(msg.header().topic);
        let seq = msg.header().sequence;
        let requires_ack = msg.header().flags.contains(MessageFlags::REQUIRES_ACK);

        if let Some(last) = self.last_seq.get_mut(&key) {
            // Signed 16-bit difference handles wrap-around
            if seq.wrapping_sub(*last) as i16 <= 0 {
                if requires_ack {
                    self.send_ack(broker, platform, seq, msg.header().sender, true);
                }
                return Err(Error::NotFound);
            }
            *last = seq;
        } else if self.last_seq.len() < self.last_seq.capacity() {
            let _ = self.last_seq.insert(key, seq);
        }

        if requires_ack {
            self.send_ack(broker, platform, seq, msg.header().sender, true);
        }
        Ok(msg)
    }

    fn send_ack<P: Platform, const MT: usize>(
        &self,
        broker: &mut MessageBroker<M, MT>,
        platform: &P,
        sequence: u16,
        to_sender: u16,
        success: bool,
    ) {
        let ack = MessageAck {
            sequence,
            sender: to_sender,
            success,
            error_code: 0,
        };
        if let Some(mut ack_msg) = M::with_ack(&ack) {
            let header = ack_msg.header_mut();
            header.topic = self.ack_topic;
            header.sender = self.self_task.value();
            header.receiver = to_sender;
            header.timestamp = platform.now_us();
            let _ = broker.publish(platform, self.ack_topic, &mut ack_msg, self.self_task);
        }
    }
}

/// Envelope support for carrying an ACK record in the payload
pub trait AckPayload: Sized {
    /// Build an envelope whose payload is the encoded ACK
    fn with_ack(ack: &MessageAck) -> Option<Self>;

    /// Decode an ACK from the payload
    fn ack_from_payload(&self) -> Option<MessageAck>;
}

impl<const N: usize> AckPayload for crate::message::types::MessageEnvelope<N> {
    fn with_ack(ack: &MessageAck) -> Option<Self> {
        let mut msg = Self::new();
        let mut buf = [0u8; MessageAck::WIRE_SIZE];
        ack.encode(&mut buf).ok()?;
        msg.set_payload(&buf).ok()?;
        Some(msg)
    }

    fn ack_from_payload(&self) -> Option<MessageAck> {
        MessageAck::decode(self.payload_bytes()).ok()
    }
}

impl<M: Envelope + AckPayload> QosPublisher<M> {
    /// Recognize an ACK delivered as a message on the ACK topic and clear
    /// its pending entry
    ///
    /// Returns true when the message was consumed as an ACK.
    pub fn try_handle_ack_message(&mut self, msg: &M) -> bool {
        if msg.header().topic != self.ack_topic {
            return false;
        }
        if msg.header().payload_size as usize != MessageAck::WIRE_SIZE {
            return false;
        }
        match msg.ack_from_payload() {
            Some(ack) => {
                self.on_ack(&ack);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::MediumMessage;
    use crate::platform::{NativeTaskParams, SemaphoreHandle, TaskHandle};
    use crate::types::TopicId;
    use core::cell::Cell;

    const MT: usize = config::MAX_TASKS;
    type Broker = MessageBroker<MediumMessage, MT>;

    /// Platform with a manually advanced clock
    #[derive(Default)]
    struct ClockPlatform {
        now_us: Cell<u64>,
    }

    impl ClockPlatform {
        fn advance_us(&self, us: u64) {
            self.now_us.set(self.now_us.get() + us);
        }
    }

    impl Platform for ClockPlatform {
        fn now_us(&self) -> u64 {
            self.now_us.get()
        }
        fn delay_ms(&self, ms: u32) {
            self.advance_us(u64::from(ms) * 1000);
        }
        fn delay_us(&self, us: u32) {
            self.advance_us(u64::from(us));
        }
        fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
            f()
        }
        fn notify_task(&self, _handle: TaskHandle, _bits: u32) -> bool {
            true
        }
        fn wait_notification(&self, _timeout_ms: u32) -> Option<u32> {
            None
        }
        fn clear_notification(&self) {}
        fn create_binary_semaphore(&self) -> Option<SemaphoreHandle> {
            None
        }
        fn delete_semaphore(&self, _handle: SemaphoreHandle) {}
        fn semaphore_give(&self, _handle: SemaphoreHandle) -> bool {
            false
        }
        fn semaphore_take(&self, _handle: SemaphoreHandle, _timeout_us: u32) -> bool {
            false
        }
        fn create_native_task(&self, _params: &NativeTaskParams) -> Option<TaskHandle> {
            None
        }
        fn suspend_native_task(&self, _handle: TaskHandle) -> bool {
            false
        }
        fn resume_native_task(&self, _handle: TaskHandle) -> bool {
            false
        }
        fn delete_native_task(&self, _handle: TaskHandle) -> bool {
            false
        }
        fn current_task(&self) -> Option<TaskHandle> {
            None
        }
        fn task_yield(&self) {}
        fn system_reset(&self) {}
    }

    fn setup(platform: &ClockPlatform) -> Broker {
        platform.advance_us(1); // keep timestamps non-zero
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        broker.register_task(TaskId::new(5), None).unwrap();
        broker.subscribe(TopicId::new(9), TaskId::new(1)).unwrap();
        broker
            .subscribe(TopicId::new(config::ACK_TOPIC_ID), TaskId::new(5))
            .unwrap();
        broker
    }

    fn payload_msg(tag: u8) -> MediumMessage {
        let mut m = MediumMessage::new();
        m.set_payload(&[tag]).unwrap();
        m
    }

    #[test]
    fn test_publish_tracks_pending_until_ack() {
        let platform = ClockPlatform::default();
        let mut broker = setup(&platform);
        let mut publisher: QosPublisher<MediumMessage> =
            QosPublisher::new(TaskId::new(5), config::ACK_TOPIC_ID);

        let mut m = payload_msg(b'q');
        publisher.publish(&mut broker, &platform, 9, &mut m).unwrap();
        assert_eq!(publisher.pending_count(), 1);
        assert!(m.header.flags.contains(MessageFlags::REQUIRES_ACK));

        let ack = MessageAck {
            sequence: m.header.sequence,
            sender: 5,
            success: true,
            error_code: 0,
        };
        publisher.on_ack(&ack);
        assert_eq!(publisher.pending_count(), 0);
    }

    #[test]
    fn test_pending_map_bounded() {
        let platform = ClockPlatform::default();
        let mut broker = setup(&platform);
        let mut publisher: QosPublisher<MediumMessage> =
            QosPublisher::new(TaskId::new(5), config::ACK_TOPIC_ID);

        for i in 0..config::QOS_PENDING_LIMIT {
            let mut m = payload_msg(b'0' + i as u8);
            publisher.publish(&mut broker, &platform, 9, &mut m).unwrap();
        }
        let mut overflow = payload_msg(b'z');
        assert_eq!(
            publisher.publish(&mut broker, &platform, 9, &mut overflow),
            Err(Error::OutOfMemory)
        );
        assert_eq!(publisher.pending_count(), config::QOS_PENDING_LIMIT);
    }

    #[test]
    fn test_retransmit_after_timeout() {
        let platform = ClockPlatform::default();
        let mut broker = setup(&platform);
        let mut publisher: QosPublisher<MediumMessage> =
            QosPublisher::new(TaskId::new(5), config::ACK_TOPIC_ID);

        let mut m = payload_msg(b'r');
        publisher.publish(&mut broker, &platform, 9, &mut m).unwrap();
        let seq = m.header.sequence;
        assert_eq!(publisher.attempts(seq), Some(1));

        // Before the timeout nothing is resent
        publisher.pump_retransmit(&mut broker, &platform);
        assert_eq!(publisher.attempts(seq), Some(1));

        platform.advance_us(config::ACK_TIMEOUT_US);
        publisher.pump_retransmit(&mut broker, &platform);
        assert_eq!(publisher.attempts(seq), Some(2));

        // ACK clears the entry; further pumps are no-ops
        publisher.on_ack(&MessageAck {
            sequence: seq,
            sender: 5,
            success: true,
            error_code: 0,
        });
        platform.advance_us(config::ACK_TIMEOUT_US);
        publisher.pump_retransmit(&mut broker, &platform);
        assert_eq!(publisher.pending_count(), 0);
    }

    #[test]
    fn test_subscriber_dedup_and_ack() {
        let platform = ClockPlatform::default();
        let mut broker = setup(&platform);
        let mut subscriber: QosSubscriber<MediumMessage> =
            QosSubscriber::new(TaskId::new(1), config::ACK_TOPIC_ID);

        // Deliver (sender=5, topic=9, seq=42) twice
        for _ in 0..2 {
            let mut m = payload_msg(b'd');
            m.header.sequence = 42;
            m.header.flags = MessageFlags::REQUIRES_ACK;
            broker.publish(&platform, 9, &mut m, TaskId::new(5)).unwrap();
        }

        let first = subscriber
            .receive(&mut broker, &platform, TimeoutMs::new(0))
            .unwrap();
        assert_eq!(first.header.sequence, 42);

        // Second receipt is suppressed
        assert_eq!(
            subscriber.receive(&mut broker, &platform, TimeoutMs::new(0)),
            Err(Error::NotFound)
        );

        // Both receipts produced an ACK on the ACK topic
        let mut publisher: QosPublisher<MediumMessage> =
            QosPublisher::new(TaskId::new(5), config::ACK_TOPIC_ID);
        let mut acks = 0;
        while let Ok(ack_msg) = broker.try_receive(&platform, TaskId::new(5)) {
            assert!(publisher.try_handle_ack_message(&ack_msg));
            acks += 1;
        }
        assert_eq!(acks, 2);
    }

    #[test]
    fn test_subscriber_rejects_stale_sequence() {
        let platform = ClockPlatform::default();
        let mut broker = setup(&platform);
        let mut subscriber: QosSubscriber<MediumMessage> =
            QosSubscriber::new(TaskId::new(1), config::ACK_TOPIC_ID);

        let mut newer = payload_msg(b'n');
        newer.header.sequence = 10;
        broker.publish(&platform, 9, &mut newer, TaskId::new(5)).unwrap();
        let mut stale = payload_msg(b's');
        stale.header.sequence = 9;
        broker.publish(&platform, 9, &mut stale, TaskId::new(5)).unwrap();

        assert!(subscriber
            .receive(&mut broker, &platform, TimeoutMs::new(0))
            .is_ok());
        assert_eq!(
            subscriber.receive(&mut broker, &platform, TimeoutMs::new(0)),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_sequence_wraparound_accepted() {
        let platform = ClockPlatform::default();
        let mut broker = setup(&platform);
        let mut subscriber: QosSubscriber<MediumMessage> =
            QosSubscriber::new(TaskId::new(1), config::ACK_TOPIC_ID);

        let mut near_wrap = payload_msg(b'w');
        near_wrap.header.sequence = 0xFFFE;
        broker
            .publish(&platform, 9, &mut near_wrap, TaskId::new(5))
            .unwrap();
        assert!(subscriber
            .receive(&mut broker, &platform, TimeoutMs::new(0))
            .is_ok());

        // 0xFFFE -> 3 is "newer" under signed 16-bit difference
        let mut wrapped = payload_msg(b'x');
        wrapped.header.sequence = 3;
        broker
            .publish(&platform, 9, &mut wrapped, TaskId::new(5))
            .unwrap();
        assert!(subscriber
            .receive(&mut broker, &platform, TimeoutMs::new(0))
            .is_ok());
    }

    #[test]
    fn test_distinct_streams_tracked_independently() {
        let platform = ClockPlatform::default();
        let mut broker = setup(&platform);
        broker.subscribe(TopicId::new(4), TaskId::new(1)).unwrap();
        let mut subscriber: QosSubscriber<MediumMessage> =
            QosSubscriber::new(TaskId::new(1), config::ACK_TOPIC_ID);

        // Same sequence number on two different topics from one sender
        let mut a = payload_msg(b'a');
        a.header.sequence = 7;
        broker.publish(&platform, 9, &mut a, TaskId::new(5)).unwrap();
        let mut b = payload_msg(b'b');
        b.header.sequence = 7;
        broker.publish(&platform, 4, &mut b, TaskId::new(5)).unwrap();

        assert!(subscriber
            .receive(&mut broker, &platform, TimeoutMs::new(0))
            .is_ok());
        assert!(subscriber
            .receive(&mut broker, &platform, TimeoutMs::new(0))
            .is_ok());
    }
}
