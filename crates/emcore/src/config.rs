// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compile-time configuration
//!
//! Every capacity the runtime depends on is a `const` here, with defaults
//! sized for a small MCU. The `const` assertions at the bottom reject
//! configurations whose interrelations cannot work; `memory::budget` rejects
//! configurations that exceed the RAM budget. Integrators fork this module
//! (or generate it) to retarget the runtime.

// ---- Task system ----

/// Maximum number of tasks (cooperative and native combined)
pub const MAX_TASKS: usize = 8;

/// Default watchdog timeout per task, milliseconds
pub const WATCHDOG_DEFAULT_TIMEOUT_MS: u32 = 5_000;

/// System-level watchdog timeout, milliseconds
pub const SYSTEM_WATCHDOG_TIMEOUT_MS: u32 = 10_000;

// ---- Event bus ----

/// Maximum queued events
pub const MAX_EVENTS: usize = 16;

/// Maximum registered event handlers
pub const MAX_EVENT_HANDLERS: usize = 16;

/// Event queue depth (bounded by the events budget region)
pub const EVENT_QUEUE_SIZE: usize = MAX_EVENTS;

// ---- Messaging ----

/// Total queue capacity per mailbox, across its per-topic sub-queues
pub const QUEUE_CAPACITY: usize = 12;

/// Broker topic registry upper bound
pub const MAX_TOPICS: usize = 6;

/// Maximum subscribers per topic
pub const SUBS_PER_TOPIC: usize = 3;

/// Per-topic queue slots per mailbox
pub const QUEUES_PER_MAILBOX: usize = 3;

/// High-priority reservation ratio, numerator
pub const HIGH_RATIO_NUM: usize = 1;

/// High-priority reservation ratio, denominator
pub const HIGH_RATIO_DEN: usize = 4;

/// Small message payload bytes (inline)
pub const SMALL_PAYLOAD: usize = 16;

/// Medium message payload bytes (most common size)
pub const MEDIUM_PAYLOAD: usize = 64;

/// Large message payload bytes
pub const LARGE_PAYLOAD: usize = 256;

// Per-topic sub-queue capacities derived from the caps above. Each sub-queue
// keeps at least one slot so a topic can always hold one urgent and one
// normal message.
const PER_TOPIC_RAW: usize = QUEUE_CAPACITY / QUEUES_PER_MAILBOX;
const MIN_PER_TOPIC_TOTAL: usize = 2;

/// Total capacity of one per-topic queue slot (high + normal)
pub const PER_TOPIC_TOTAL: usize = if PER_TOPIC_RAW >= MIN_PER_TOPIC_TOTAL {
    PER_TOPIC_RAW
} else {
    MIN_PER_TOPIC_TOTAL
};

const CALC_HIGH: usize = (PER_TOPIC_TOTAL * HIGH_RATIO_NUM) / HIGH_RATIO_DEN;

/// High-priority sub-queue capacity per topic slot
pub const MAILBOX_HIGH_CAPACITY: usize = if CALC_HIGH >= 1 { CALC_HIGH } else { 1 };

const CALC_NORMAL: usize = if PER_TOPIC_TOTAL > MAILBOX_HIGH_CAPACITY {
    PER_TOPIC_TOTAL - MAILBOX_HIGH_CAPACITY
} else {
    0
};

/// Normal-priority sub-queue capacity per topic slot
pub const MAILBOX_NORMAL_CAPACITY: usize = if CALC_NORMAL >= 1 { CALC_NORMAL } else { 1 };

// ---- QoS ----

/// Default ACK topic id
pub const ACK_TOPIC_ID: u16 = 0xFF00;

/// Retransmit timeout, microseconds
pub const ACK_TIMEOUT_US: u64 = 500_000;

/// Publisher pending-map capacity (power of two)
pub const QOS_PENDING_LIMIT: usize = 4;

/// Subscriber (sender, topic) tracking capacity (power of two)
pub const QOS_TRACK_LIMIT: usize = 32;

/// Distributed-state outstanding proposal capacity (power of two)
pub const DS_MAX_OUTSTANDING: usize = 4;

// ---- Zero-copy pool ----

/// Zero-copy block payload bytes
pub const ZC_BLOCK_SIZE: usize = 16;

/// Zero-copy block count
pub const ZC_BLOCK_COUNT: usize = 4;

// ---- Event logs ----

/// Medium-message log capacity
pub const EVENT_LOG_MEDIUM_CAP: usize = 4;

/// Small-message log capacity
pub const EVENT_LOG_SMALL_CAP: usize = 4;

// ---- Packet protocol ----

/// Maximum packet payload bytes
pub const PACKET_MAX_PAYLOAD: usize = 64;

/// Sync pattern length
pub const SYNC_LEN: usize = 2;

/// Sync pattern emitted/expected at each frame start
pub const SYNC_PATTERN: [u8; SYNC_LEN] = [0x55, 0xAA];

/// Two-byte big-endian length field when true, one byte otherwise
pub const LENGTH_16BIT: bool = true;

/// Command dispatcher table capacity
pub const MAX_HANDLERS: usize = 16;

/// Inbound byte ring capacity
pub const RING_SIZE: usize = 512;

/// Opcode space for field-codec layout tables (max opcode + 1)
pub const OPCODE_SPACE: usize = 8;

/// Maximum fields per opcode layout
pub const MAX_FIELDS: usize = 16;

// ---- Memory budget ----

/// Total bytes available to emCore
pub const BUDGET_BYTES: usize = 24 * 1024;

/// Bytes reserved for non-emCore RAM (framework/RTOS/stacks)
pub const NON_EMCORE_HEADROOM_BYTES: usize = 0;

/// Constant overhead reserved for broker tables
pub const MSG_OVERHEAD_BYTES: usize = 2048;

/// Approximate bytes per task control block
pub const TASK_PER_TCB_BYTES: usize = 256;

/// Fixed bytes for scheduler bookkeeping
pub const TASK_FIXED_OVERHEAD_BYTES: usize = 512;

/// Per-task per-queue mailbox reference bytes
pub const TASK_MAILBOX_REF_BYTES: usize = 8;

/// Explicit tasks region size; 0 selects the computed minimum
pub const TASK_MEM_BYTES: usize = 0;

/// Explicit OS region size
pub const OS_MEM_BYTES: usize = 0;

/// Explicit protocol region size; 0 selects the computed minimum
pub const PROTOCOL_MEM_BYTES: usize = 0;

/// Explicit diagnostics region size
pub const DIAGNOSTICS_MEM_BYTES: usize = 0;

// ---- Region enables ----

/// Account for the messaging region
pub const ENABLE_MESSAGING: bool = true;

/// Account for the events region
pub const ENABLE_EVENTS: bool = true;

/// Account for the tasks region
pub const ENABLE_TASKS_REGION: bool = true;

/// Account for the OS region (tiered pools)
pub const ENABLE_OS_REGION: bool = false;

/// Account for the protocol region
pub const ENABLE_PROTOCOL: bool = true;

/// Account for the diagnostics region
pub const ENABLE_DIAGNOSTICS: bool = false;

/// Account for the pools region
pub const ENABLE_POOLS_REGION: bool = false;

// ---- Block pools ----

/// Small pool block bytes
pub const SMALL_BLOCK_SIZE: usize = 32;

/// Medium pool block bytes
pub const MEDIUM_BLOCK_SIZE: usize = 128;

/// Large pool block bytes
pub const LARGE_BLOCK_SIZE: usize = 512;

/// Small pool block count
pub const SMALL_POOL_COUNT: usize = 16;

/// Medium pool block count
pub const MEDIUM_POOL_COUNT: usize = 8;

/// Large pool block count
pub const LARGE_POOL_COUNT: usize = 4;

// ---- Compile-time sanity checks ----

const _: () = assert!(MAX_TASKS >= 1, "MAX_TASKS must be >= 1");
const _: () = assert!(MAX_EVENTS >= 1, "MAX_EVENTS must be >= 1");
const _: () = assert!(QUEUE_CAPACITY >= 1, "QUEUE_CAPACITY must be >= 1");
const _: () = assert!(MAX_TOPICS >= 1, "MAX_TOPICS must be >= 1");
const _: () = assert!(SUBS_PER_TOPIC >= 1, "SUBS_PER_TOPIC must be >= 1");
const _: () = assert!(
    SUBS_PER_TOPIC <= MAX_TASKS,
    "SUBS_PER_TOPIC must be <= MAX_TASKS"
);
const _: () = assert!(QUEUES_PER_MAILBOX >= 1, "QUEUES_PER_MAILBOX must be >= 1");
const _: () = assert!(
    QUEUES_PER_MAILBOX <= QUEUE_CAPACITY,
    "QUEUES_PER_MAILBOX must not exceed QUEUE_CAPACITY"
);
const _: () = assert!(HIGH_RATIO_DEN != 0, "HIGH_RATIO_DEN must not be 0");
const _: () = assert!(
    HIGH_RATIO_NUM <= HIGH_RATIO_DEN,
    "HIGH_RATIO_NUM must be <= HIGH_RATIO_DEN"
);
const _: () = assert!(
    QOS_PENDING_LIMIT.is_power_of_two(),
    "QOS_PENDING_LIMIT must be a power of two (index-map requirement)"
);
const _: () = assert!(
    QOS_TRACK_LIMIT.is_power_of_two(),
    "QOS_TRACK_LIMIT must be a power of two (index-map requirement)"
);
const _: () = assert!(
    DS_MAX_OUTSTANDING.is_power_of_two(),
    "DS_MAX_OUTSTANDING must be a power of two (index-map requirement)"
);
const _: () = assert!(SYNC_LEN >= 1, "SYNC_LEN must be >= 1");
const _: () = assert!(MAX_HANDLERS >= 1, "MAX_HANDLERS must be >= 1");
const _: () = assert!(PACKET_MAX_PAYLOAD >= 1, "PACKET_MAX_PAYLOAD must be >= 1");
const _: () = assert!(
    RING_SIZE >= PACKET_MAX_PAYLOAD,
    "RING_SIZE must be >= PACKET_MAX_PAYLOAD"
);
const _: () = assert!(
    !LENGTH_16BIT || PACKET_MAX_PAYLOAD <= u16::MAX as usize,
    "PACKET_MAX_PAYLOAD must fit the length field"
);
const _: () = assert!(
    LENGTH_16BIT || PACKET_MAX_PAYLOAD <= u8::MAX as usize,
    "PACKET_MAX_PAYLOAD must fit a one-byte length field"
);
const _: () = assert!(OPCODE_SPACE >= 1, "OPCODE_SPACE must be >= 1");
const _: () = assert!(
    SMALL_PAYLOAD >= 8,
    "SMALL_PAYLOAD must hold at least an ACK record"
);
const _: () = assert!(
    ZC_BLOCK_COUNT < 0xFFFF,
    "ZC_BLOCK_COUNT must leave the 0xFFFF sentinel free"
);
