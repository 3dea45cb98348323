// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host platform implementation (requires `std` feature)
//!
//! Maps the platform trait onto std threads and clocks so the runtime can be
//! exercised on a development machine. Native tasks become OS threads;
//! notifications are a per-thread bit word guarded by a mutex/condvar pair.
//! Thread suspension is not supported by std, so `suspend_native_task` and
//! `resume_native_task` report failure.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use super::{NativeTaskParams, Platform, SemaphoreHandle, TaskHandle};
use crate::types::{Duration, Timestamp};

struct HostTask {
    thread: Option<thread::Thread>,
    bits: u32,
    alive: bool,
}

struct HostState {
    tasks: Vec<HostTask>,
    semaphores: Vec<Option<bool>>,
}

struct Inner {
    state: Mutex<HostState>,
    cond: Condvar,
    section: Mutex<()>,
}

/// Platform backed by std threads and the process monotonic clock
pub struct HostPlatform {
    start: Instant,
    inner: Arc<Inner>,
}

impl HostPlatform {
    /// Create a new host platform
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            inner: Arc::new(Inner {
                state: Mutex::new(HostState {
                    tasks: Vec::new(),
                    semaphores: Vec::new(),
                }),
                cond: Condvar::new(),
                section: Mutex::new(()),
            }),
        }
    }

    /// Slot index of the calling thread, registering it on first use
    fn current_slot(&self) -> usize {
        let current = thread::current();
        let mut state = self.inner.state.lock().unwrap();
        for (i, task) in state.tasks.iter().enumerate() {
            if let Some(t) = &task.thread {
                if t.id() == current.id() {
                    return i;
                }
            }
        }
        state.tasks.push(HostTask {
            thread: Some(current),
            bits: 0,
            alive: true,
        });
        state.tasks.len() - 1
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn now_us(&self) -> Timestamp {
        self.start.elapsed().as_micros() as Timestamp
    }

    fn delay_ms(&self, ms: Duration) {
        thread::sleep(StdDuration::from_millis(u64::from(ms)));
    }

    fn delay_us(&self, us: u32) {
        thread::sleep(StdDuration::from_micros(u64::from(us)));
    }

    fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.section.lock().unwrap();
        f()
    }

    fn notify_task(&self, handle: TaskHandle, bits: u32) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        let idx = handle.0 as usize;
        match state.tasks.get_mut(idx) {
            Some(task) if task.alive => {
                task.bits |= bits;
                self.inner.cond.notify_all();
                true
            }
            _ => false,
        }
    }

    fn wait_notification(&self, timeout_ms: u32) -> Option<u32> {
        let slot = self.current_slot();
        let deadline = Instant::now() + StdDuration::from_millis(u64::from(timeout_ms));
        let mut state = self.inner.state.lock().unwrap();
        loop {
            let bits = state.tasks[slot].bits;
            if bits != 0 {
                state.tasks[slot].bits = 0;
                return Some(bits);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, timed_out) = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
            if timed_out.timed_out() && state.tasks[slot].bits == 0 {
                return None;
            }
        }
    }

    fn clear_notification(&self) {
        let slot = self.current_slot();
        let mut state = self.inner.state.lock().unwrap();
        state.tasks[slot].bits = 0;
    }

    fn create_binary_semaphore(&self) -> Option<SemaphoreHandle> {
        let mut state = self.inner.state.lock().unwrap();
        state.semaphores.push(Some(false));
        Some(SemaphoreHandle((state.semaphores.len() - 1) as u32))
    }

    fn delete_semaphore(&self, handle: SemaphoreHandle) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(slot) = state.semaphores.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    fn semaphore_give(&self, handle: SemaphoreHandle) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        match state.semaphores.get_mut(handle.0 as usize) {
            Some(Some(available)) => {
                if *available {
                    false
                } else {
                    *available = true;
                    self.inner.cond.notify_all();
                    true
                }
            }
            _ => false,
        }
    }

    fn semaphore_take(&self, handle: SemaphoreHandle, timeout_us: u32) -> bool {
        let idx = handle.0 as usize;
        let deadline = Instant::now() + StdDuration::from_micros(u64::from(timeout_us));
        let mut state = self.inner.state.lock().unwrap();
        loop {
            match state.semaphores.get_mut(idx) {
                Some(Some(available)) => {
                    if *available {
                        *available = false;
                        return true;
                    }
                }
                _ => return false,
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
        }
    }

    fn create_native_task(&self, params: &NativeTaskParams) -> Option<TaskHandle> {
        let slot = {
            let mut state = self.inner.state.lock().unwrap();
            state.tasks.push(HostTask {
                thread: None,
                bits: 0,
                alive: true,
            });
            state.tasks.len() - 1
        };

        let inner = Arc::clone(&self.inner);
        let entry = params.entry;
        let arg = params.arg;
        let builder = thread::Builder::new()
            .name(params.name.to_string())
            .stack_size(params.stack_bytes.max(16 * 1024) as usize);
        let spawned = builder.spawn(move || {
            {
                let mut state = inner.state.lock().unwrap();
                state.tasks[slot].thread = Some(thread::current());
            }
            entry(arg);
            let mut state = inner.state.lock().unwrap();
            state.tasks[slot].alive = false;
        });

        match spawned {
            Ok(_handle) => Some(TaskHandle(slot as u32)),
            Err(_) => {
                let mut state = self.inner.state.lock().unwrap();
                state.tasks[slot].alive = false;
                None
            }
        }
    }

    fn suspend_native_task(&self, _handle: TaskHandle) -> bool {
        // std threads cannot be suspended externally
        false
    }

    fn resume_native_task(&self, _handle: TaskHandle) -> bool {
        false
    }

    fn delete_native_task(&self, handle: TaskHandle) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        match state.tasks.get_mut(handle.0 as usize) {
            Some(task) => {
                task.alive = false;
                true
            }
            None => false,
        }
    }

    fn current_task(&self) -> Option<TaskHandle> {
        let current = thread::current();
        let state = self.inner.state.lock().unwrap();
        for (i, task) in state.tasks.iter().enumerate() {
            if let Some(t) = &task.thread {
                if t.id() == current.id() {
                    return Some(TaskHandle(i as u32));
                }
            }
        }
        None
    }

    fn task_yield(&self) {
        thread::yield_now();
    }

    fn system_reset(&self) {
        log::error!("system reset requested on host platform");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NOTIFY_MESSAGE_BIT;

    #[test]
    fn test_host_clock_monotonic() {
        let platform = HostPlatform::new();
        let a = platform.now_us();
        platform.delay_us(500);
        let b = platform.now_us();
        assert!(b >= a + 500);
    }

    #[test]
    fn test_host_notification_roundtrip() {
        let platform = HostPlatform::new();
        // Register the current thread, then self-notify
        platform.clear_notification();
        let me = platform.current_task().unwrap();
        assert!(platform.notify_task(me, NOTIFY_MESSAGE_BIT));
        assert_eq!(platform.wait_notification(100), Some(NOTIFY_MESSAGE_BIT));
        // Bits were consumed
        assert_eq!(platform.wait_notification(10), None);
    }

    #[test]
    fn test_host_semaphore() {
        let platform = HostPlatform::new();
        let sem = platform.create_binary_semaphore().unwrap();
        assert!(!platform.semaphore_take(sem, 1000));
        assert!(platform.semaphore_give(sem));
        assert!(!platform.semaphore_give(sem));
        assert!(platform.semaphore_take(sem, 1000));
        platform.delete_semaphore(sem);
        assert!(!platform.semaphore_give(sem));
    }

    #[test]
    fn test_host_native_task_runs() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static RAN: AtomicUsize = AtomicUsize::new(0);

        fn entry(arg: usize) {
            RAN.store(arg, Ordering::SeqCst);
        }

        let platform = HostPlatform::new();
        let params = NativeTaskParams {
            entry,
            arg: 7,
            name: "worker",
            stack_bytes: 32 * 1024,
            priority: 1,
            start_suspended: false,
            pin_to_core: false,
            core_id: -1,
        };
        let handle = platform.create_native_task(&params).unwrap();
        // Spin until the thread body has run
        let deadline = Instant::now() + StdDuration::from_secs(2);
        while RAN.load(Ordering::SeqCst) != 7 {
            assert!(Instant::now() < deadline, "native task did not run");
            thread::yield_now();
        }
        platform.delete_native_task(handle);
    }
}
