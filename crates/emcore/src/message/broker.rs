// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish/subscribe message broker
//!
//! Holds the mailbox table (indexed directly by task id) and a topic
//! registry kept sorted by topic id so subscription lookup is a binary
//! search. Publishing stamps the header (sender, timestamp, sequence,
//! topic) and fans the message out to every subscriber mailbox.

use heapless::Vec;

use crate::config;
use crate::error::{Error, Result};
use crate::message::mailbox::{Mailbox, MailboxStats};
use crate::message::types::Envelope;
use crate::platform::{Platform, TaskHandle, NOTIFY_MESSAGE_BIT};
use crate::types::{TaskId, TimeoutMs, TopicId};

/// Sorted registry entry: one topic and its subscribers
struct TopicSubscription {
    topic_id: u16,
    capacity_limit: u16,
    subscribers: Vec<TaskId, { config::SUBS_PER_TOPIC }>,
}

impl TopicSubscription {
    fn new(topic_id: u16) -> Self {
        Self {
            topic_id,
            capacity_limit: config::SUBS_PER_TOPIC as u16,
            subscribers: Vec::new(),
        }
    }
}

/// Message broker with per-task mailboxes and per-topic sub-queues
///
/// Generic over the envelope type; instantiate once per message size
/// (small/medium/large/zero-copy) instead of dispatching dynamically.
pub struct MessageBroker<M: Envelope, const MAX_TASKS: usize> {
    mailboxes: Vec<Mailbox<M>, MAX_TASKS>,
    topics: Vec<TopicSubscription, { config::MAX_TOPICS }>,
    sent_count: u32,
    received_count: u32,
    dropped_count: u32,
    sequence: u16,
    notify_on_empty_only: bool,
}

impl<M: Envelope, const MAX_TASKS: usize> Default for MessageBroker<M, MAX_TASKS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Envelope, const MAX_TASKS: usize> MessageBroker<M, MAX_TASKS> {
    /// Create an empty broker
    pub fn new() -> Self {
        Self {
            mailboxes: Vec::new(),
            topics: Vec::new(),
            sent_count: 0,
            received_count: 0,
            dropped_count: 0,
            sequence: 0,
            notify_on_empty_only: true,
        }
    }

    /// O(1) mailbox lookup: direct index plus owner equality check
    fn mailbox_index(&self, task_id: TaskId) -> Option<usize> {
        let idx = task_id.index();
        if idx >= self.mailboxes.len() {
            return None;
        }
        (self.mailboxes[idx].owner() == task_id).then_some(idx)
    }

    /// O(log T) topic lookup on the sorted registry
    fn topic_index(&self, topic_id: u16) -> Option<usize> {
        self.topics
            .binary_search_by_key(&topic_id, |t| t.topic_id)
            .ok()
    }

    /// Find or create a topic entry, preserving sort order
    fn topic_index_or_create(&mut self, topic_id: u16) -> Result<usize> {
        match self.topics.binary_search_by_key(&topic_id, |t| t.topic_id) {
            Ok(idx) => Ok(idx),
            Err(pos) => {
                self.topics
                    .push(TopicSubscription::new(topic_id))
                    .map_err(|_| Error::OutOfMemory)?;
                // Rotate the new entry from the tail into its sorted slot
                self.topics[pos..].rotate_right(1);
                Ok(pos)
            }
        }
    }

    fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            // Sequence 0 means "assign one"; skip it on wrap
            self.sequence = 1;
        }
        self.sequence
    }

    /// Register a task's mailbox at `mailbox[task_id]`
    ///
    /// Grows the table up to the task index; re-registering updates the
    /// notification handle only.
    pub fn register_task(&mut self, task_id: TaskId, handle: Option<TaskHandle>) -> Result<()> {
        let idx = task_id.index();
        if idx >= MAX_TASKS {
            return Err(Error::OutOfMemory);
        }
        while self.mailboxes.len() <= idx {
            let mut mailbox = Mailbox::new();
            mailbox.set_notify_on_empty_only(self.notify_on_empty_only);
            self.mailboxes.push(mailbox).map_err(|_| Error::OutOfMemory)?;
        }
        if self.mailboxes[idx].owner() == task_id {
            self.mailboxes[idx].set_handle(handle);
            return Ok(());
        }
        self.mailboxes[idx].set_owner(task_id);
        self.mailboxes[idx].set_handle(handle);
        Ok(())
    }

    /// Release a mailbox slot back to its invalid sentinel
    pub fn unregister_task(&mut self, task_id: TaskId) -> Result<()> {
        let idx = self.mailbox_index(task_id).ok_or(Error::NotFound)?;
        self.mailboxes[idx].set_owner(TaskId::INVALID);
        self.mailboxes[idx].set_handle(None);
        Ok(())
    }

    /// Subscribe a task to a topic (idempotent)
    pub fn subscribe(&mut self, topic_id: TopicId, subscriber: TaskId) -> Result<()> {
        let idx = self.topic_index_or_create(topic_id.value())?;
        let topic = &mut self.topics[idx];
        if topic.subscribers.iter().any(|s| *s == subscriber) {
            return Ok(());
        }
        if topic.subscribers.len() >= topic.capacity_limit as usize {
            return Err(Error::OutOfMemory);
        }
        topic
            .subscribers
            .push(subscriber)
            .map_err(|_| Error::OutOfMemory)
    }

    /// Publish a message to every subscriber of `topic_id`
    ///
    /// Stamps sender, timestamp (when zero), sequence (when zero), and the
    /// topic into the header. Succeeds when at least one subscriber
    /// accepted; returns `NotFound` when the topic has no subscribers.
    pub fn publish<P: Platform>(
        &mut self,
        platform: &P,
        topic_id: u16,
        msg: &mut M,
        from: TaskId,
    ) -> Result<()> {
        msg.header_mut().sender = from.value();
        if msg.header().timestamp == 0 {
            msg.header_mut().timestamp = platform.now_us();
        }
        if msg.header().sequence == 0 {
            msg.header_mut().sequence = self.next_sequence();
        }
        msg.header_mut().topic = topic_id;

        let topic_idx = match self.topic_index(topic_id) {
            Some(idx) if !self.topics[idx].subscribers.is_empty() => idx,
            _ => return Err(Error::NotFound),
        };

        let mut subscribers = [TaskId::INVALID; { config::SUBS_PER_TOPIC }];
        let count = self.topics[topic_idx].subscribers.len();
        subscribers[..count].copy_from_slice(&self.topics[topic_idx].subscribers);

        let mut sent_any = false;
        for subscriber in subscribers.iter().take(count) {
            if let Some(mb) = self.mailbox_index(*subscriber) {
                match self.mailboxes[mb].send(platform, msg) {
                    Ok(()) => {
                        self.sent_count += 1;
                        sent_any = true;
                    }
                    Err(_) => self.dropped_count += 1,
                }
            }
        }

        if sent_any {
            Ok(())
        } else {
            Err(Error::OutOfMemory)
        }
    }

    /// Receive one message, blocking up to `timeout`
    ///
    /// Tries once, waits for the mailbox notification bit, then retries
    /// once. Returns `Timeout` on expiry, `NotFound` for an unknown task.
    pub fn receive<P: Platform>(
        &mut self,
        platform: &P,
        task_id: TaskId,
        timeout: TimeoutMs,
    ) -> Result<M> {
        let idx = self.mailbox_index(task_id).ok_or(Error::NotFound)?;

        if let Ok(msg) = self.mailboxes[idx].receive(platform) {
            self.received_count += 1;
            return Ok(msg);
        }

        if let Some(bits) = platform.wait_notification(timeout.value()) {
            if bits & NOTIFY_MESSAGE_BIT != 0 {
                if let Ok(msg) = self.mailboxes[idx].receive(platform) {
                    self.received_count += 1;
                    return Ok(msg);
                }
            }
        }
        Err(Error::Timeout)
    }

    /// Receive one message without blocking (`NotFound` when empty)
    pub fn try_receive<P: Platform>(&mut self, platform: &P, task_id: TaskId) -> Result<M> {
        let idx = self.mailbox_index(task_id).ok_or(Error::NotFound)?;
        let msg = self.mailboxes[idx].receive(platform)?;
        self.received_count += 1;
        Ok(msg)
    }

    /// Send to every registered mailbox, independent of subscriptions
    pub fn broadcast<P: Platform>(&mut self, platform: &P, msg: &M) -> Result<()> {
        let mut sent_any = false;
        for idx in 0..self.mailboxes.len() {
            if !self.mailboxes[idx].owner().is_valid() {
                continue;
            }
            match self.mailboxes[idx].send(platform, msg) {
                Ok(()) => {
                    self.sent_count += 1;
                    sent_any = true;
                }
                Err(_) => self.dropped_count += 1,
            }
        }
        if sent_any {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Clamp and set a mailbox's soft depth limit
    pub fn set_mailbox_depth(&mut self, task_id: TaskId, depth: usize) -> Result<()> {
        let idx = self.mailbox_index(task_id).ok_or(Error::NotFound)?;
        let clamped = depth.min(config::QUEUE_CAPACITY);
        self.mailboxes[idx].set_depth_limit(clamped as u16);
        Ok(())
    }

    /// Set a mailbox's overflow policy (true = drop oldest, false = reject new)
    pub fn set_overflow_policy(&mut self, task_id: TaskId, drop_oldest: bool) -> Result<()> {
        let idx = self.mailbox_index(task_id).ok_or(Error::NotFound)?;
        self.mailboxes[idx].set_drop_oldest(drop_oldest);
        Ok(())
    }

    /// Apply the notify-on-empty-only policy to all registered mailboxes
    pub fn set_notify_on_empty_only(&mut self, enabled: bool) {
        self.notify_on_empty_only = enabled;
        for mailbox in self.mailboxes.iter_mut() {
            if mailbox.owner().is_valid() {
                mailbox.set_notify_on_empty_only(enabled);
            }
        }
    }

    /// Set a topic's subscriber capacity, creating the topic lazily;
    /// clamped to `SUBS_PER_TOPIC`
    pub fn set_topic_capacity(&mut self, topic_id: TopicId, max_subs: usize) -> Result<()> {
        let idx = self.topic_index_or_create(topic_id.value())?;
        let clamped = max_subs.min(config::SUBS_PER_TOPIC);
        self.topics[idx].capacity_limit = clamped as u16;
        Ok(())
    }

    /// Per-mailbox diagnostics
    pub fn mailbox_stats(&self, task_id: TaskId) -> Result<MailboxStats> {
        let idx = self.mailbox_index(task_id).ok_or(Error::NotFound)?;
        Ok(self.mailboxes[idx].stats())
    }

    /// Messages accepted by subscriber mailboxes
    pub fn total_sent(&self) -> u32 {
        self.sent_count
    }

    /// Messages handed to receivers
    pub fn total_received(&self) -> u32 {
        self.received_count
    }

    /// Messages refused or dropped at enqueue
    pub fn total_dropped(&self) -> u32 {
        self.dropped_count
    }

    /// Registered mailbox slots (including released ones)
    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.len()
    }

    #[cfg(test)]
    pub(crate) fn topics_sorted(&self) -> bool {
        self.topics.windows(2).all(|w| w[0].topic_id < w[1].topic_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::{MediumMessage, MessageFlags};
    use crate::platform::{NullPlatform, SemaphoreHandle, NativeTaskParams};
    use core::cell::RefCell;

    const MAX_TASKS: usize = config::MAX_TASKS;
    type Broker = MessageBroker<MediumMessage, MAX_TASKS>;

    /// Records notifications instead of delivering them
    #[derive(Default)]
    struct RecordingPlatform {
        notifications: RefCell<heapless::Vec<(TaskHandle, u32), 16>>,
    }

    impl Platform for RecordingPlatform {
        fn now_us(&self) -> u64 {
            1_000
        }
        fn delay_ms(&self, _ms: u32) {}
        fn delay_us(&self, _us: u32) {}
        fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
            f()
        }
        fn notify_task(&self, handle: TaskHandle, bits: u32) -> bool {
            let _ = self.notifications.borrow_mut().push((handle, bits));
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

    fn msg(tag: u8) -> MediumMessage {
        let mut m = MediumMessage::new();
        m.set_payload(&[tag]).unwrap();
        m
    }

    #[test]
    fn test_register_then_find() {
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(3), None).unwrap();
        assert_eq!(broker.mailbox_count(), 4);
        // Slots 0..3 exist but are unowned
        assert!(broker.mailbox_stats(TaskId::new(0)).is_err());
        assert!(broker.mailbox_stats(TaskId::new(3)).is_ok());
    }

    #[test]
    fn test_register_beyond_capacity() {
        let mut broker = Broker::new();
        assert_eq!(
            broker.register_task(TaskId::new(MAX_TASKS as u16), None),
            Err(Error::OutOfMemory)
        );
    }

    #[test]
    fn test_publish_no_subscribers_not_found() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(0), None).unwrap();
        let mut m = msg(b'x');
        assert_eq!(
            broker.publish(&platform, 7, &mut m, TaskId::new(0)),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_publish_receive_roundtrip() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(0), None).unwrap();
        broker.register_task(TaskId::new(1), None).unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();

        let mut m = msg(b'x');
        broker.publish(&platform, 7, &mut m, TaskId::new(0)).unwrap();
        assert_eq!(m.header.sender, 0);
        assert_eq!(m.header.topic, 7);
        assert_ne!(m.header.sequence, 0);

        let got = broker.try_receive(&platform, TaskId::new(1)).unwrap();
        assert_eq!(got.payload_bytes(), b"x");
        assert_eq!(got.header.sequence, m.header.sequence);
    }

    #[test]
    fn test_sequence_assignment_monotonic() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();

        let mut last = 0u16;
        for _ in 0..3 {
            let mut m = msg(b'x');
            broker.publish(&platform, 7, &mut m, TaskId::new(0)).unwrap();
            assert!(m.header.sequence > last);
            last = m.header.sequence;
            let _ = broker.try_receive(&platform, TaskId::new(1)).unwrap();
        }
    }

    #[test]
    fn test_fan_out_to_multiple_subscribers() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        for id in 1..=3u16 {
            broker.register_task(TaskId::new(id), None).unwrap();
            broker.subscribe(TopicId::new(7), TaskId::new(id)).unwrap();
        }

        let mut m = msg(b'f');
        broker.publish(&platform, 7, &mut m, TaskId::new(0)).unwrap();

        for id in 1..=3u16 {
            let got = broker.try_receive(&platform, TaskId::new(id)).unwrap();
            assert_eq!(got.payload_bytes(), b"f");
        }
        assert_eq!(broker.total_sent(), 3);
    }

    #[test]
    fn test_subscribe_idempotent() {
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();

        let platform = NullPlatform::new();
        let mut m = msg(b'x');
        broker.publish(&platform, 7, &mut m, TaskId::new(0)).unwrap();
        let _ = broker.try_receive(&platform, TaskId::new(1)).unwrap();
        // A second delivery would exist if the subscription duplicated
        assert_eq!(
            broker.try_receive(&platform, TaskId::new(1)),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_topic_registry_stays_sorted() {
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        for topic in [9u16, 3, 7, 1, 5] {
            broker
                .subscribe(TopicId::new(topic), TaskId::new(1))
                .unwrap();
        }
        assert!(broker.topics_sorted());
        broker.set_topic_capacity(TopicId::new(4), 2).unwrap();
        assert!(broker.topics_sorted());
    }

    #[test]
    fn test_topic_capacity_clamped() {
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        broker.register_task(TaskId::new(2), None).unwrap();
        broker.set_topic_capacity(TopicId::new(7), 1).unwrap();

        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();
        assert_eq!(
            broker.subscribe(TopicId::new(7), TaskId::new(2)),
            Err(Error::OutOfMemory)
        );
    }

    #[test]
    fn test_broadcast_ignores_subscriptions() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(0), None).unwrap();
        broker.register_task(TaskId::new(1), None).unwrap();

        let m = msg(b'b');
        broker.broadcast(&platform, &m).unwrap();
        assert!(broker.try_receive(&platform, TaskId::new(0)).is_ok());
        assert!(broker.try_receive(&platform, TaskId::new(1)).is_ok());
    }

    #[test]
    fn test_blocking_receive_times_out() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        assert_eq!(
            broker.receive(&platform, TaskId::new(1), TimeoutMs::new(5)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn test_notify_on_empty_only() {
        let platform = RecordingPlatform::default();
        let mut broker = Broker::new();
        broker
            .register_task(TaskId::new(1), Some(TaskHandle(11)))
            .unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();

        let mut a = msg(b'a');
        let mut b = msg(b'b');
        broker.publish(&platform, 7, &mut a, TaskId::new(0)).unwrap();
        broker.publish(&platform, 7, &mut b, TaskId::new(0)).unwrap();

        // Only the empty->non-empty transition notified
        let notifications = platform.notifications.borrow();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0], (TaskHandle(11), NOTIFY_MESSAGE_BIT));
    }

    #[test]
    fn test_notify_always_when_policy_disabled() {
        let platform = RecordingPlatform::default();
        let mut broker = Broker::new();
        broker
            .register_task(TaskId::new(1), Some(TaskHandle(11)))
            .unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();
        broker.set_notify_on_empty_only(false);

        let mut a = msg(b'a');
        let mut b = msg(b'b');
        broker.publish(&platform, 7, &mut a, TaskId::new(0)).unwrap();
        broker.publish(&platform, 7, &mut b, TaskId::new(0)).unwrap();
        assert_eq!(platform.notifications.borrow().len(), 2);
    }

    #[test]
    fn test_unregister_releases_slot() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();
        broker.unregister_task(TaskId::new(1)).unwrap();

        let mut m = msg(b'x');
        // Topic still has the subscriber entry, but its mailbox is gone
        assert_eq!(
            broker.publish(&platform, 7, &mut m, TaskId::new(0)),
            Err(Error::OutOfMemory)
        );
        assert_eq!(
            broker.try_receive(&platform, TaskId::new(1)),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_publisher_set_flags_survive_delivery() {
        let platform = NullPlatform::new();
        let mut broker = Broker::new();
        broker.register_task(TaskId::new(1), None).unwrap();
        broker.subscribe(TopicId::new(7), TaskId::new(1)).unwrap();

        let mut m = msg(b'x');
        m.header.flags = MessageFlags::REQUIRES_ACK;
        broker.publish(&platform, 7, &mut m, TaskId::new(0)).unwrap();
        let got = broker.try_receive(&platform, TaskId::new(1)).unwrap();
        assert!(got.header.flags.contains(MessageFlags::REQUIRES_ACK));
    }
}
