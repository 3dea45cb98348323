// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compile-time memory budget
//!
//! Computes a conservative upper bound on each subsystem's RAM footprint
//! from the configured caps and rejects the build when the sum exceeds the
//! declared budget minus the reserved headroom. The bounds intentionally
//! over-approximate container bookkeeping so layout drift in dependencies
//! cannot invalidate them.

use core::mem::size_of;

use crate::config;
use crate::event::types::Event;
use crate::message::types::MediumMessage;

// Per-entry bookkeeping allowances on top of raw element storage
const TOPIC_SLOT_OVERHEAD: usize = 32;
const EVENT_HANDLER_BYTES: usize = 32;
const EVENT_FIXED_OVERHEAD: usize = 256;
const POOL_BLOCK_OVERHEAD: usize = 8;
const POOL_FIXED_OVERHEAD: usize = 64;
const PROTO_STAGING_PACKETS: usize = 4;
const PROTO_HANDLER_BYTES: usize = 64;
const PROTO_FIXED_OVERHEAD: usize = 1024;

/// Messaging region: every mailbox bounded by its total queue capacity
/// times the message size, plus slot bookkeeping and global broker tables
pub const MESSAGING_UPPER: usize = if config::ENABLE_MESSAGING {
    config::MAX_TASKS
        * (config::QUEUE_CAPACITY * size_of::<MediumMessage>()
            + config::QUEUES_PER_MAILBOX * TOPIC_SLOT_OVERHEAD)
        + config::MSG_OVERHEAD_BYTES
} else {
    0
};

/// Events region: queue storage plus handler table
pub const EVENTS_UPPER: usize = if config::ENABLE_EVENTS {
    config::EVENT_QUEUE_SIZE * size_of::<Event>()
        + config::MAX_EVENT_HANDLERS * EVENT_HANDLER_BYTES
        + EVENT_FIXED_OVERHEAD
} else {
    0
};

/// Computed minimum for the tasks region
pub const TASKS_MIN: usize = config::TASK_FIXED_OVERHEAD_BYTES
    + config::MAX_TASKS
        * (config::TASK_PER_TCB_BYTES
            + config::QUEUES_PER_MAILBOX * config::TASK_MAILBOX_REF_BYTES);

const TASKS_EFFECTIVE: usize = if config::TASK_MEM_BYTES > 0 {
    config::TASK_MEM_BYTES
} else {
    TASKS_MIN
};

const _: () = assert!(
    !config::ENABLE_TASKS_REGION || TASKS_EFFECTIVE >= TASKS_MIN,
    "TASK_MEM_BYTES is below the computed minimum for the current caps; \
     raise TASK_MEM_BYTES, lower MAX_TASKS, or adjust TASK_PER_TCB_BYTES"
);

/// Tasks region size
pub const TASKS_UPPER: usize = if config::ENABLE_TASKS_REGION {
    TASKS_EFFECTIVE
} else {
    0
};

/// OS region size (tiered pools when enabled)
pub const OS_UPPER: usize = if config::ENABLE_OS_REGION {
    config::OS_MEM_BYTES
} else {
    0
};

/// Computed minimum for the protocol region
pub const PROTOCOL_MIN: usize = config::RING_SIZE
    + config::PACKET_MAX_PAYLOAD * PROTO_STAGING_PACKETS
    + config::MAX_HANDLERS * PROTO_HANDLER_BYTES
    + PROTO_FIXED_OVERHEAD;

const PROTOCOL_EFFECTIVE: usize = if config::PROTOCOL_MEM_BYTES > 0 {
    config::PROTOCOL_MEM_BYTES
} else {
    PROTOCOL_MIN
};

const _: () = assert!(
    !config::ENABLE_PROTOCOL || PROTOCOL_EFFECTIVE >= PROTOCOL_MIN,
    "PROTOCOL_MEM_BYTES is below the computed minimum; raise it or lower \
     RING_SIZE / PACKET_MAX_PAYLOAD / MAX_HANDLERS"
);

/// Protocol region size
pub const PROTOCOL_UPPER: usize = if config::ENABLE_PROTOCOL {
    PROTOCOL_EFFECTIVE
} else {
    0
};

/// Diagnostics region size
pub const DIAGNOSTICS_UPPER: usize = if config::ENABLE_DIAGNOSTICS {
    config::DIAGNOSTICS_MEM_BYTES
} else {
    0
};

/// Pools region: block storage plus free-list bookkeeping
pub const POOLS_UPPER: usize = if config::ENABLE_POOLS_REGION {
    config::SMALL_BLOCK_SIZE * config::SMALL_POOL_COUNT
        + config::MEDIUM_BLOCK_SIZE * config::MEDIUM_POOL_COUNT
        + config::LARGE_BLOCK_SIZE * config::LARGE_POOL_COUNT
        + (config::SMALL_POOL_COUNT + config::MEDIUM_POOL_COUNT + config::LARGE_POOL_COUNT)
            * POOL_BLOCK_OVERHEAD
        + POOL_FIXED_OVERHEAD
} else {
    0
};

/// Sum of all subsystem upper bounds
pub const TOTAL_REQUIRED_UPPER: usize = MESSAGING_UPPER
    + EVENTS_UPPER
    + TASKS_UPPER
    + OS_UPPER
    + PROTOCOL_UPPER
    + DIAGNOSTICS_UPPER
    + POOLS_UPPER;

/// Budget actually available to emCore
pub const EFFECTIVE_BUDGET: usize =
    if config::BUDGET_BYTES > config::NON_EMCORE_HEADROOM_BYTES {
        config::BUDGET_BYTES - config::NON_EMCORE_HEADROOM_BYTES
    } else {
        0
    };

const _: () = assert!(
    TOTAL_REQUIRED_UPPER <= EFFECTIVE_BUDGET,
    "emCore configuration exceeds the effective compile-time budget \
     (BUDGET_BYTES - NON_EMCORE_HEADROOM_BYTES): lower MAX_TASKS, \
     QUEUE_CAPACITY, MAX_EVENTS or the protocol sizes, or raise the budget"
);

/// Per-region byte requirements for logging and test assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetReport {
    /// Messaging region bytes
    pub messaging_bytes: usize,
    /// Events region bytes
    pub events_bytes: usize,
    /// Tasks region bytes
    pub tasks_bytes: usize,
    /// OS region bytes
    pub os_bytes: usize,
    /// Protocol region bytes
    pub protocol_bytes: usize,
    /// Diagnostics region bytes
    pub diagnostics_bytes: usize,
    /// Pools region bytes
    pub pools_bytes: usize,
    /// Total upper bound
    pub total_upper: usize,
}

/// Snapshot of the computed budget
pub const fn report() -> BudgetReport {
    BudgetReport {
        messaging_bytes: MESSAGING_UPPER,
        events_bytes: EVENTS_UPPER,
        tasks_bytes: TASKS_UPPER,
        os_bytes: OS_UPPER,
        protocol_bytes: PROTOCOL_UPPER,
        diagnostics_bytes: DIAGNOSTICS_UPPER,
        pools_bytes: POOLS_UPPER,
        total_upper: TOTAL_REQUIRED_UPPER,
    }
}
