// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # emCore - Embedded Runtime for Microcontrollers
//!
//! An MCU-agnostic runtime for resource-constrained embedded systems. All
//! state lives in fixed-capacity structures sized at compile time against a
//! declared RAM budget; steady-state paths never allocate.
//!
//! ## Design Constraints
//!
//! - **No heap allocations** on hot paths (const generics for fixed buffers)
//! - **No floating point** on hot paths
//! - **Compile-time RAM budget** - the build fails when the configured caps
//!   exceed the declared budget
//! - **`no_std` compatible**
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------+
//! |  Application (tasks, command handlers)         |
//! +------------------------------------------------+
//!      v               ^                 ^
//! +-----------+  +-------------+  +--------------+
//! | Scheduler |  |  Broker /   |  |  Event Bus   |
//! | Watchdog  |  |  QoS        |  |              |
//! +-----------+  +-------------+  +--------------+
//!      v               ^
//! +------------------------------------------------+
//! |  Packet Pipeline (ring -> parser -> dispatch)  |
//! +------------------------------------------------+
//!      v               ^
//! +------------------------------------------------+
//! |  Platform (time, delay, notify, native tasks)  |
//! +------------------------------------------------+
//! ```
//!
//! ## Feature Flags
//!
//! - `std` -- host-side platform implementation (for host testing)
//! - `small-broker` -- second broker instance for small messages
//! - `zero-copy` -- reference-counted block pool and envelope
//! - `event-log` -- append-only replayable message logs

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Compile-time configuration knobs and their sanity checks
pub mod config;

/// Error type shared by all fallible operations
pub mod error;

/// Critical-error reporting with context and retry policy
pub mod report;

/// Core identifier and priority types
pub mod types;

/// Platform abstraction (time, delay, notification, native tasks)
pub mod platform;

/// Compile-time memory budget, region layout, block pools
pub mod memory;

/// Message envelopes, broker, mailboxes, QoS delivery
pub mod message;

/// Packet protocol: byte ring, framing, dispatch, field codec
pub mod protocol;

/// Universal event bus (category/code events, wildcard handlers)
pub mod event;

/// Cooperative scheduler, native-task trampoline, watchdog
pub mod task;

/// Aggregated runtime singletons placed against the memory layout
pub mod runtime;

// Re-exports for convenience
pub use crate::error::{Error, Result};
pub use crate::message::broker::MessageBroker;
pub use crate::message::types::{LargeMessage, MediumMessage, SmallMessage};
pub use crate::platform::Platform;
pub use crate::runtime::Runtime;
pub use crate::task::scheduler::Scheduler;
pub use crate::types::{Priority, TaskId, TopicId};

/// Version of emCore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
