// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deterministic platform for end-to-end tests: a manually advanced clock
//! and recorded notifications, so nothing sleeps and nothing races.

use core::cell::{Cell, RefCell};

use emcore::platform::{NativeTaskParams, Platform, SemaphoreHandle, TaskHandle};

#[derive(Default)]
pub struct FakePlatform {
    now_us: Cell<u64>,
    pub notifications: RefCell<Vec<(TaskHandle, u32)>>,
    pub clears: Cell<u32>,
}

impl FakePlatform {
    pub fn new() -> Self {
        let platform = Self::default();
        // Keep broker-stamped timestamps non-zero
        platform.now_us.set(1);
        platform
    }

    pub fn advance_us(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}

impl Platform for FakePlatform {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }

    fn delay_ms(&self, ms: u32) {
        self.advance_ms(u64::from(ms));
    }

    fn delay_us(&self, us: u32) {
        self.advance_us(u64::from(us));
    }

    fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }

    fn notify_task(&self, handle: TaskHandle, bits: u32) -> bool {
        self.notifications.borrow_mut().push((handle, bits));
        true
    }

    fn wait_notification(&self, timeout_ms: u32) -> Option<u32> {
        // Nothing arrives while the test holds the only thread
        self.advance_ms(u64::from(timeout_ms));
        None
    }

    fn clear_notification(&self) {
        self.clears.set(self.clears.get() + 1);
    }

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
