// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-task execution monitoring for native tasks
//!
//! Tracks execution timing, stack headroom, CPU affinity requests, and the
//! yield strategy the trampoline applies between iterations.

use heapless::Vec;

use crate::config;
use crate::platform::Platform;
use crate::types::{TaskId, Timestamp};

/// Yield strategies applied by the trampoline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldStrategy {
    /// Never yield (real-time critical)
    Never,
    /// Yield every `yield_interval` iterations
    Periodic,
    /// Yield whenever no work is pending
    OnIdle,
    /// Yield when an execution consumed over half its allowance
    Adaptive,
}

/// Execution context tracked per native task
#[derive(Debug, Clone, Copy)]
pub struct ExecContext {
    /// Configured stack size, bytes
    pub stack_size_bytes: usize,
    /// Estimated bytes in use
    pub stack_used_bytes: usize,
    /// Peak estimated usage
    pub stack_high_water_mark: usize,
    /// Requested core (multi-core MCUs)
    pub cpu_core_id: u8,
    /// Whether the task asked to be pinned
    pub pin_to_core: bool,
    /// Yield behavior between iterations
    pub yield_strategy: YieldStrategy,
    /// Iterations between yields for `Periodic`
    pub yield_interval: u32,
    /// Execution allowance, microseconds
    pub max_execution_us: u32,
    /// Hard deadline, microseconds; 0 = none
    pub deadline_us: u32,
    /// Marked real-time by `set_realtime_constraints`
    pub is_realtime: bool,
    /// Completed iterations
    pub execution_count: u32,
    /// Accumulated execution time, microseconds
    pub total_execution_us: u64,
    /// Start of the in-flight execution (0 = none)
    pub last_execution_start: Timestamp,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            stack_size_bytes: 0,
            stack_used_bytes: 0,
            stack_high_water_mark: 0,
            cpu_core_id: 0,
            pin_to_core: false,
            yield_strategy: YieldStrategy::Adaptive,
            yield_interval: 100,
            max_execution_us: 10_000,
            deadline_us: 0,
            is_realtime: false,
            execution_count: 0,
            total_execution_us: 0,
            last_execution_start: 0,
        }
    }
}

/// Execution monitor over all registered native tasks
pub struct ExecMonitor {
    task_ids: Vec<TaskId, { config::MAX_TASKS }>,
    contexts: Vec<ExecContext, { config::MAX_TASKS }>,
}

impl Default for ExecMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecMonitor {
    /// Create an empty monitor
    pub const fn new() -> Self {
        Self {
            task_ids: Vec::new(),
            contexts: Vec::new(),
        }
    }

    fn find(&self, task_id: TaskId) -> Option<usize> {
        self.task_ids.iter().position(|id| *id == task_id)
    }

    /// Register a task; false when full or already registered
    pub fn register_task(&mut self, task_id: TaskId, context: ExecContext) -> bool {
        if self.task_ids.is_full() || self.find(task_id).is_some() {
            return false;
        }
        let _ = self.task_ids.push(task_id);
        let _ = self.contexts.push(context);
        true
    }

    /// Record a CPU affinity request (applied by platform glue at spawn)
    pub fn set_cpu_affinity(&mut self, task_id: TaskId, core_id: u8, pin: bool) {
        if let Some(idx) = self.find(task_id) {
            self.contexts[idx].cpu_core_id = core_id;
            self.contexts[idx].pin_to_core = pin;
        }
    }

    /// Mark a task real-time: execution allowance, optional deadline, and
    /// no yielding
    pub fn set_realtime_constraints(
        &mut self,
        task_id: TaskId,
        max_execution_us: u32,
        deadline_us: u32,
    ) {
        if let Some(idx) = self.find(task_id) {
            let ctx = &mut self.contexts[idx];
            ctx.max_execution_us = max_execution_us;
            ctx.deadline_us = deadline_us;
            ctx.is_realtime = true;
            ctx.yield_strategy = YieldStrategy::Never;
        }
    }

    /// Begin timing one execution
    pub fn start_execution_timing<P: Platform>(&mut self, platform: &P, task_id: TaskId) {
        if let Some(idx) = self.find(task_id) {
            self.contexts[idx].last_execution_start = platform.now_us();
        }
    }

    /// Finish timing one execution, recording totals and deadline misses
    pub fn end_execution_timing<P: Platform>(&mut self, platform: &P, task_id: TaskId) {
        let Some(idx) = self.find(task_id) else {
            return;
        };
        let ctx = &mut self.contexts[idx];
        if ctx.last_execution_start == 0 {
            return;
        }
        let execution_us = platform.now_us().saturating_sub(ctx.last_execution_start);
        ctx.total_execution_us += execution_us;

        if ctx.deadline_us > 0 && execution_us > u64::from(ctx.deadline_us) {
            log::warn!(
                "deadline miss: task {:?} took {} us (limit {} us)",
                task_id,
                execution_us,
                ctx.deadline_us
            );
        }
    }

    /// Apply the task's yield strategy; call once per iteration
    pub fn adaptive_yield<P: Platform>(&mut self, platform: &P, task_id: TaskId) {
        let Some(idx) = self.find(task_id) else {
            return;
        };
        let ctx = &mut self.contexts[idx];
        ctx.execution_count += 1;

        let should_yield = match ctx.yield_strategy {
            YieldStrategy::Never => return,
            YieldStrategy::Periodic => ctx.execution_count % ctx.yield_interval == 0,
            YieldStrategy::OnIdle => true,
            YieldStrategy::Adaptive => {
                if ctx.last_execution_start == 0 {
                    false
                } else {
                    let elapsed = platform.now_us().saturating_sub(ctx.last_execution_start);
                    elapsed > u64::from(ctx.max_execution_us / 2)
                }
            }
        };
        if should_yield {
            platform.task_yield();
        }
    }

    /// Sample the platform stack high-water mark for the calling task
    pub fn update_stack_usage<P: Platform>(&mut self, platform: &P, task_id: TaskId) {
        let Some(idx) = self.find(task_id) else {
            return;
        };
        let ctx = &mut self.contexts[idx];
        let free_bytes = platform.stack_high_water_mark();
        if free_bytes == 0 || ctx.stack_size_bytes == 0 {
            return;
        }
        ctx.stack_used_bytes = ctx.stack_size_bytes.saturating_sub(free_bytes);
        ctx.stack_high_water_mark = ctx.stack_high_water_mark.max(ctx.stack_used_bytes);

        if ctx.stack_used_bytes > ctx.stack_size_bytes * 80 / 100 {
            log::warn!(
                "stack warning: task {:?} using {}/{} bytes",
                task_id,
                ctx.stack_used_bytes,
                ctx.stack_size_bytes
            );
        }
    }

    /// Execution context for a task
    pub fn context(&self, task_id: TaskId) -> Option<&ExecContext> {
        self.find(task_id).map(|idx| &self.contexts[idx])
    }

    /// Log a per-task execution summary
    pub fn log_report(&self) {
        log::info!("scheduler report: {} tasks", self.task_ids.len());
        for (id, ctx) in self.task_ids.iter().zip(self.contexts.iter()) {
            let avg_us = if ctx.execution_count > 0 {
                ctx.total_execution_us / u64::from(ctx.execution_count)
            } else {
                0
            };
            log::info!(
                "task {:?}: {} executions, avg {} us",
                id,
                ctx.execution_count,
                avg_us
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{NativeTaskParams, SemaphoreHandle, TaskHandle};
    use core::cell::Cell;

    #[derive(Default)]
    struct TimedPlatform {
        now_us: Cell<u64>,
        yields: Cell<u32>,
        stack_free: Cell<usize>,
    }

    impl Platform for TimedPlatform {
        fn now_us(&self) -> u64 {
            self.now_us.get()
        }
        fn delay_ms(&self, ms: u32) {
            self.now_us.set(self.now_us.get() + u64::from(ms) * 1000);
        }
        fn delay_us(&self, us: u32) {
            self.now_us.set(self.now_us.get() + u64::from(us));
        }
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
        fn task_yield(&self) {
            self.yields.set(self.yields.get() + 1);
        }
        fn stack_high_water_mark(&self) -> usize {
            self.stack_free.get()
        }
        fn system_reset(&self) {}
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut monitor = ExecMonitor::new();
        assert!(monitor.register_task(TaskId::new(1), ExecContext::default()));
        assert!(!monitor.register_task(TaskId::new(1), ExecContext::default()));
    }

    #[test]
    fn test_execution_timing_accumulates() {
        let platform = TimedPlatform::default();
        let mut monitor = ExecMonitor::new();
        monitor.register_task(TaskId::new(1), ExecContext::default());

        monitor.start_execution_timing(&platform, TaskId::new(1));
        platform.delay_us(250);
        monitor.end_execution_timing(&platform, TaskId::new(1));

        let ctx = monitor.context(TaskId::new(1)).unwrap();
        assert_eq!(ctx.total_execution_us, 250);
    }

    #[test]
    fn test_adaptive_yield_on_long_execution() {
        let platform = TimedPlatform::default();
        let mut monitor = ExecMonitor::new();
        let ctx = ExecContext {
            max_execution_us: 1_000,
            ..ExecContext::default()
        };
        monitor.register_task(TaskId::new(1), ctx);

        // Short execution: no yield
        monitor.start_execution_timing(&platform, TaskId::new(1));
        platform.delay_us(100);
        monitor.adaptive_yield(&platform, TaskId::new(1));
        assert_eq!(platform.yields.get(), 0);

        // Execution past half the allowance: yields
        monitor.start_execution_timing(&platform, TaskId::new(1));
        platform.delay_us(600);
        monitor.adaptive_yield(&platform, TaskId::new(1));
        assert_eq!(platform.yields.get(), 1);
    }

    #[test]
    fn test_realtime_never_yields() {
        let platform = TimedPlatform::default();
        let mut monitor = ExecMonitor::new();
        monitor.register_task(TaskId::new(1), ExecContext::default());
        monitor.set_realtime_constraints(TaskId::new(1), 500, 1_000);

        monitor.start_execution_timing(&platform, TaskId::new(1));
        platform.delay_us(10_000);
        monitor.adaptive_yield(&platform, TaskId::new(1));
        assert_eq!(platform.yields.get(), 0);

        let ctx = monitor.context(TaskId::new(1)).unwrap();
        assert!(ctx.is_realtime);
        assert_eq!(ctx.yield_strategy, YieldStrategy::Never);
    }

    #[test]
    fn test_periodic_yield_interval() {
        let platform = TimedPlatform::default();
        let mut monitor = ExecMonitor::new();
        let ctx = ExecContext {
            yield_strategy: YieldStrategy::Periodic,
            yield_interval: 3,
            ..ExecContext::default()
        };
        monitor.register_task(TaskId::new(1), ctx);

        for _ in 0..6 {
            monitor.adaptive_yield(&platform, TaskId::new(1));
        }
        assert_eq!(platform.yields.get(), 2);
    }

    #[test]
    fn test_stack_tracking() {
        let platform = TimedPlatform::default();
        platform.stack_free.set(1024);
        let mut monitor = ExecMonitor::new();
        let ctx = ExecContext {
            stack_size_bytes: 4096,
            ..ExecContext::default()
        };
        monitor.register_task(TaskId::new(1), ctx);

        monitor.update_stack_usage(&platform, TaskId::new(1));
        let ctx = monitor.context(TaskId::new(1)).unwrap();
        assert_eq!(ctx.stack_used_bytes, 3072);
        assert_eq!(ctx.stack_high_water_mark, 3072);

        // Usage shrinks but the high-water mark sticks
        platform.stack_free.set(2048);
        monitor.update_stack_usage(&platform, TaskId::new(1));
        let ctx = monitor.context(TaskId::new(1)).unwrap();
        assert_eq!(ctx.stack_used_bytes, 2048);
        assert_eq!(ctx.stack_high_water_mark, 3072);
    }

    #[test]
    fn test_affinity_recorded() {
        let mut monitor = ExecMonitor::new();
        monitor.register_task(TaskId::new(2), ExecContext::default());
        monitor.set_cpu_affinity(TaskId::new(2), 1, true);
        let ctx = monitor.context(TaskId::new(2)).unwrap();
        assert_eq!(ctx.cpu_core_id, 1);
        assert!(ctx.pin_to_core);
    }
}
