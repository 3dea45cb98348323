// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messaging: envelopes, per-task mailboxes, pub/sub broker, QoS delivery

pub mod broker;
pub mod distributed;
pub mod mailbox;
pub mod qos;
pub mod types;

#[cfg(feature = "event-log")]
pub mod event_log;

#[cfg(feature = "zero-copy")]
pub mod zero_copy;

pub use broker::MessageBroker;
pub use types::{
    Envelope, LargeMessage, MediumMessage, MessageAck, MessageFlags, MessageHeader,
    MessagePriority, SmallMessage,
};
