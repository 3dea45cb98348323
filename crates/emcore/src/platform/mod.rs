// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Platform abstraction
//!
//! The runtime consumes its target through this one narrow trait: monotonic
//! time, delays, a critical section, task notification, binary semaphores,
//! and native task management. Everything else in the crate is portable.
//!
//! ## Design Principles
//!
//! - **Narrow surface** - a port implements one trait, nothing else
//! - **No heap allocations** - handles are plain integer tokens
//! - **Blocking primitives** - `delay`, `wait_notification` and
//!   `semaphore_take` are the only suspension points
//! - **Error handling** - fallible calls report failure, never panic

use crate::types::{Duration, Timestamp};

#[cfg(feature = "std")]
pub mod host;

/// Notification bit used by the message broker (the only bit the core sets)
pub const NOTIFY_MESSAGE_BIT: u32 = 0x01;

/// Opaque handle to a platform-level (native) task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u32);

/// Opaque handle to a platform-level binary semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub u32);

/// Entry point for a native task (receives the opaque user token)
pub type NativeEntry = fn(usize);

/// Parameters for native task creation
#[derive(Debug, Clone, Copy)]
pub struct NativeTaskParams {
    /// Thread entry point
    pub entry: NativeEntry,
    /// Opaque token forwarded to the entry point
    pub arg: usize,
    /// Task name (for platform-side diagnostics)
    pub name: &'static str,
    /// Stack size in bytes
    pub stack_bytes: u32,
    /// Platform-native priority value
    pub priority: u32,
    /// Create in the suspended state
    pub start_suspended: bool,
    /// Pin the task to a specific core (multi-core MCUs)
    pub pin_to_core: bool,
    /// Core to pin to when `pin_to_core` is set
    pub core_id: i32,
}

/// Platform trait supplying the primitives the runtime consumes
///
/// Implementors must guarantee monotonic, wrap-free time for the mission
/// duration and at-least semantics for delays. The core uses only
/// [`NOTIFY_MESSAGE_BIT`] of the notification word, and only non-nested
/// critical sections.
pub trait Platform {
    /// Monotonic time in microseconds
    fn now_us(&self) -> Timestamp;

    /// Monotonic time in milliseconds
    fn now_ms(&self) -> Timestamp {
        self.now_us() / 1000
    }

    /// Block for at least `ms` milliseconds
    fn delay_ms(&self, ms: Duration);

    /// Block for at least `us` microseconds
    fn delay_us(&self, us: u32);

    /// Run `f` inside a critical section
    ///
    /// Single-core ports typically mask interrupts; host ports take a lock.
    fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R;

    /// Set notification bits on a task; returns false if the handle is dead
    fn notify_task(&self, handle: TaskHandle, bits: u32) -> bool;

    /// Wait up to `timeout_ms` for this task's notification bits
    ///
    /// Returns the bits (cleared on read) or `None` on expiry.
    fn wait_notification(&self, timeout_ms: u32) -> Option<u32>;

    /// Clear this task's pending notification bits
    fn clear_notification(&self);

    /// Create a binary semaphore
    fn create_binary_semaphore(&self) -> Option<SemaphoreHandle>;

    /// Delete a semaphore
    fn delete_semaphore(&self, handle: SemaphoreHandle);

    /// Give a binary semaphore; returns false if already given
    fn semaphore_give(&self, handle: SemaphoreHandle) -> bool;

    /// Take a binary semaphore, waiting up to `timeout_us`
    fn semaphore_take(&self, handle: SemaphoreHandle, timeout_us: u32) -> bool;

    /// Spawn a native task; `None` when the platform cannot
    fn create_native_task(&self, params: &NativeTaskParams) -> Option<TaskHandle>;

    /// Suspend a native task by handle
    fn suspend_native_task(&self, handle: TaskHandle) -> bool;

    /// Resume a native task by handle
    fn resume_native_task(&self, handle: TaskHandle) -> bool;

    /// Delete a native task by handle
    fn delete_native_task(&self, handle: TaskHandle) -> bool;

    /// Handle of the calling task, if it is platform-managed
    fn current_task(&self) -> Option<TaskHandle>;

    /// Cooperative yield to the platform scheduler
    fn task_yield(&self);

    /// Remaining stack headroom of the calling task, bytes (0 if unknown)
    fn stack_high_water_mark(&self) -> usize {
        0
    }

    /// Reset the whole system (used by the watchdog `SystemReset` action)
    ///
    /// On real hardware this does not return; ports that cannot reset may
    /// make it a no-op and rely on an external supervisor.
    fn system_reset(&self);
}

/// Null platform (for testing)
///
/// Time stands still, delays return immediately, notifications are dropped,
/// and native task creation always fails.
#[derive(Debug, Default)]
pub struct NullPlatform;

impl NullPlatform {
    /// Create a new null platform
    pub const fn new() -> Self {
        Self
    }
}

impl Platform for NullPlatform {
    fn now_us(&self) -> Timestamp {
        0
    }

    fn delay_ms(&self, _ms: Duration) {}

    fn delay_us(&self, _us: u32) {}

    fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }

    fn notify_task(&self, _handle: TaskHandle, _bits: u32) -> bool {
        false
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_platform() {
        let platform = NullPlatform::new();

        assert_eq!(platform.now_us(), 0);
        assert_eq!(platform.now_ms(), 0);
        assert!(!platform.notify_task(TaskHandle(1), NOTIFY_MESSAGE_BIT));
        assert_eq!(platform.wait_notification(10), None);
        assert!(platform.create_binary_semaphore().is_none());

        let ran = platform.critical_section(|| 42);
        assert_eq!(ran, 42);
    }
}
