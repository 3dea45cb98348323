// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-task mailbox with per-topic priority sub-queues
//!
//! A mailbox is owned by exactly one task. It holds up to
//! `QUEUES_PER_MAILBOX` per-topic queue slots, each split into a
//! high-priority and a normal-priority circular buffer. Receivers drain all
//! high entries (across topics, in slot registration order) before any
//! normal entry.

use heapless::{Deque, Vec};

use crate::config;
use crate::error::{Error, Result};
use crate::message::types::{Envelope, MessageFlags};
use crate::platform::{Platform, TaskHandle, NOTIFY_MESSAGE_BIT};
use crate::types::TaskId;

/// One per-topic queue slot: a high and a normal circular buffer
struct TopicQueues<M> {
    topic: u16,
    high: Deque<M, { config::MAILBOX_HIGH_CAPACITY }>,
    normal: Deque<M, { config::MAILBOX_NORMAL_CAPACITY }>,
}

impl<M> TopicQueues<M> {
    fn new(topic: u16) -> Self {
        Self {
            topic,
            high: Deque::new(),
            normal: Deque::new(),
        }
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    /// Messages dropped by the drop-oldest overflow policy
    pub dropped_overflow: u32,
    /// Messages handed to the owning task
    pub received_count: u32,
    /// Messages currently queued
    pub queued: usize,
    /// Soft depth limit
    pub depth_limit: u16,
}

/// Per-task receiver structure
pub struct Mailbox<M: Envelope> {
    owner: TaskId,
    notify_handle: Option<TaskHandle>,
    depth_limit: u16,
    dropped_overflow: u32,
    received_count: u32,
    overflow_drop_oldest: bool,
    notify_on_empty_only: bool,
    topic_queues: Vec<TopicQueues<M>, { config::QUEUES_PER_MAILBOX }>,
}

impl<M: Envelope> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Envelope> Mailbox<M> {
    /// Create an unowned mailbox
    pub fn new() -> Self {
        Self {
            owner: TaskId::INVALID,
            notify_handle: None,
            depth_limit: config::QUEUE_CAPACITY as u16,
            dropped_overflow: 0,
            received_count: 0,
            overflow_drop_oldest: true,
            notify_on_empty_only: true,
            topic_queues: Vec::new(),
        }
    }

    /// Owning task (invalid sentinel when the slot is free)
    pub fn owner(&self) -> TaskId {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: TaskId) {
        self.owner = owner;
    }

    pub(crate) fn set_handle(&mut self, handle: Option<TaskHandle>) {
        self.notify_handle = handle;
    }

    pub(crate) fn set_depth_limit(&mut self, depth: u16) {
        self.depth_limit = depth;
    }

    pub(crate) fn set_drop_oldest(&mut self, drop_oldest: bool) {
        self.overflow_drop_oldest = drop_oldest;
    }

    pub(crate) fn set_notify_on_empty_only(&mut self, enabled: bool) {
        self.notify_on_empty_only = enabled;
    }

    /// Total queued messages across all sub-queues
    pub fn total_size(&self) -> usize {
        self.topic_queues
            .iter()
            .map(|q| q.high.len() + q.normal.len())
            .sum()
    }

    /// True when no sub-queue holds a message
    pub fn is_empty(&self) -> bool {
        self.topic_queues
            .iter()
            .all(|q| q.high.is_empty() && q.normal.is_empty())
    }

    /// Diagnostics snapshot
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            dropped_overflow: self.dropped_overflow,
            received_count: self.received_count,
            queued: self.total_size(),
            depth_limit: self.depth_limit,
        }
    }

    fn slot_index(&self, topic: u16) -> Option<usize> {
        self.topic_queues.iter().position(|q| q.topic == topic)
    }

    fn slot_index_or_create(&mut self, topic: u16) -> Option<usize> {
        if let Some(idx) = self.slot_index(topic) {
            return Some(idx);
        }
        if self.topic_queues.is_full() {
            return None;
        }
        let _ = self.topic_queues.push(TopicQueues::new(topic));
        Some(self.topic_queues.len() - 1)
    }

    /// Drop one queued message to make room, preferring normal entries
    /// across topics, then high entries across topics
    fn drop_one_any(&mut self) -> bool {
        for q in self.topic_queues.iter_mut() {
            if q.normal.pop_front().is_some() {
                return true;
            }
        }
        for q in self.topic_queues.iter_mut() {
            if q.high.pop_front().is_some() {
                return true;
            }
        }
        false
    }

    /// Enqueue a message with per-topic priority routing
    ///
    /// Runs inside the mailbox critical section; the owner notification is
    /// signalled after leaving it. When the target sub-queue is full or the
    /// depth limit is reached, one message is dropped (normal preferred)
    /// *before* the push is attempted - even if the push would have fit in
    /// the other sub-queue of the same topic.
    pub fn send<P: Platform>(&mut self, platform: &P, msg: &M) -> Result<()> {
        let urgent = msg.is_urgent();
        let persistent = msg.header().flags.contains(MessageFlags::PERSISTENT);
        let topic = msg.header().topic;

        let (should_notify, handle) = platform.critical_section(|| {
            let was_empty = self.is_empty();
            let depth_reached = self.total_size() >= self.depth_limit as usize;

            let slot = match self.slot_index_or_create(topic) {
                Some(slot) => slot,
                None => return Err(Error::OutOfMemory),
            };

            let target_full = if urgent {
                self.topic_queues[slot].high.is_full()
            } else {
                self.topic_queues[slot].normal.is_full()
            };

            if target_full || depth_reached {
                if !persistent && self.overflow_drop_oldest && self.drop_one_any() {
                    self.dropped_overflow += 1;
                } else {
                    return Err(Error::OutOfMemory);
                }
            }

            let queues = &mut self.topic_queues[slot];
            let stored = if urgent {
                queues
                    .high
                    .push_back(msg.clone())
                    .or_else(|m| queues.normal.push_back(m))
                    .is_ok()
            } else {
                queues
                    .normal
                    .push_back(msg.clone())
                    .or_else(|m| queues.high.push_back(m))
                    .is_ok()
            };
            if !stored {
                return Err(Error::OutOfMemory);
            }

            let should_notify = if self.notify_on_empty_only {
                was_empty
            } else {
                true
            };
            Ok((should_notify, self.notify_handle))
        })?;

        if should_notify {
            if let Some(handle) = handle {
                platform.notify_task(handle, NOTIFY_MESSAGE_BIT);
            }
        }
        Ok(())
    }

    /// Dequeue one message: high entries first across topics, then normal
    ///
    /// Clears the owner's notification when the mailbox drains to empty.
    pub fn receive<P: Platform>(&mut self, platform: &P) -> Result<M> {
        let outcome = platform.critical_section(|| {
            let mut taken: Option<M> = None;
            for q in self.topic_queues.iter_mut() {
                if let Some(msg) = q.high.pop_front() {
                    taken = Some(msg);
                    break;
                }
            }
            if taken.is_none() {
                for q in self.topic_queues.iter_mut() {
                    if let Some(msg) = q.normal.pop_front() {
                        taken = Some(msg);
                        break;
                    }
                }
            }
            taken.map(|msg| {
                self.received_count += 1;
                let now_empty = self.is_empty();
                (msg, now_empty)
            })
        });

        match outcome {
            Some((msg, now_empty)) => {
                if now_empty {
                    platform.clear_notification();
                }
                Ok(msg)
            }
            None => Err(Error::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::{MediumMessage, MessagePriority};
    use crate::platform::NullPlatform;

    fn tagged(topic: u16, tag: u8) -> MediumMessage {
        let mut msg = MediumMessage::new();
        msg.header.topic = topic;
        msg.set_payload(&[tag]).unwrap();
        msg
    }

    fn urgent(topic: u16, tag: u8) -> MediumMessage {
        let mut msg = tagged(topic, tag);
        msg.header.flags = MessageFlags::URGENT;
        msg
    }

    #[test]
    fn test_empty_receive_not_found() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();
        assert_eq!(mailbox.receive(&platform), Err(Error::NotFound));
    }

    #[test]
    fn test_fifo_within_topic() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();

        mailbox.send(&platform, &tagged(7, b'a')).unwrap();
        mailbox.send(&platform, &tagged(7, b'b')).unwrap();

        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"a");
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"b");
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_urgent_overtakes_queued_normals() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();

        mailbox.send(&platform, &tagged(7, b'a')).unwrap();
        mailbox.send(&platform, &tagged(7, b'b')).unwrap();
        mailbox.send(&platform, &urgent(7, b'U')).unwrap();

        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"U");
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"a");
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"b");
    }

    #[test]
    fn test_high_priority_routes_like_urgent() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();

        mailbox.send(&platform, &tagged(7, b'n')).unwrap();
        let mut high = tagged(7, b'H');
        high.header.priority = MessagePriority::High as u8;
        mailbox.send(&platform, &high).unwrap();

        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"H");
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"n");
    }

    #[test]
    fn test_drop_oldest_prefers_normal() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();

        // Fill the normal sub-queue (capacity 3 with default caps)
        for tag in [b'a', b'b', b'c'] {
            mailbox.send(&platform, &tagged(9, tag)).unwrap();
        }
        // Overflow drops "a" before pushing "d"
        mailbox.send(&platform, &tagged(9, b'd')).unwrap();

        assert_eq!(mailbox.stats().dropped_overflow, 1);
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"b");
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"c");
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"d");
    }

    #[test]
    fn test_reject_new_policy() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();
        mailbox.set_drop_oldest(false);

        for tag in [b'a', b'b', b'c'] {
            mailbox.send(&platform, &tagged(9, tag)).unwrap();
        }
        assert_eq!(
            mailbox.send(&platform, &tagged(9, b'd')),
            Err(Error::OutOfMemory)
        );
        assert_eq!(mailbox.stats().dropped_overflow, 0);
        assert_eq!(mailbox.total_size(), 3);
    }

    #[test]
    fn test_persistent_never_dropped_for() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();

        for tag in [b'a', b'b', b'c'] {
            mailbox.send(&platform, &tagged(9, tag)).unwrap();
        }
        // A persistent message refuses to evict queued work
        let mut persistent = tagged(9, b'p');
        persistent.header.flags = MessageFlags::PERSISTENT;
        assert_eq!(
            mailbox.send(&platform, &persistent),
            Err(Error::OutOfMemory)
        );
        assert_eq!(mailbox.stats().dropped_overflow, 0);
    }

    #[test]
    fn test_depth_limit_clamps_total() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();
        mailbox.set_depth_limit(2);

        mailbox.send(&platform, &tagged(9, b'a')).unwrap();
        mailbox.send(&platform, &tagged(9, b'b')).unwrap();
        // Depth reached: drop-oldest makes room for "c"
        mailbox.send(&platform, &tagged(9, b'c')).unwrap();

        assert_eq!(mailbox.stats().dropped_overflow, 1);
        assert_eq!(mailbox.total_size(), 2);
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"b");
        assert_eq!(mailbox.receive(&platform).unwrap().payload_bytes(), b"c");
    }

    #[test]
    fn test_slot_table_exhaustion() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();

        // Default caps give three per-topic slots; a fourth topic cannot
        // be placed
        for topic in 1..=config::QUEUES_PER_MAILBOX as u16 {
            mailbox.send(&platform, &tagged(topic, b'a')).unwrap();
        }
        assert_eq!(
            mailbox.send(&platform, &tagged(0x7F, b'b')),
            Err(Error::OutOfMemory)
        );
    }

    #[test]
    fn test_total_size_matches_sum() {
        let platform = NullPlatform::new();
        let mut mailbox: Mailbox<MediumMessage> = Mailbox::new();

        mailbox.send(&platform, &tagged(5, b'a')).unwrap();
        mailbox.send(&platform, &urgent(5, b'U')).unwrap();
        assert_eq!(mailbox.total_size(), 2);
        let _ = mailbox.receive(&platform).unwrap();
        assert_eq!(mailbox.total_size(), 1);
    }
}
