// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative priority scheduler and native-task trampoline
//!
//! Tasks are either *cooperative* (driven by [`Scheduler::run`], one task
//! per call, highest ready priority first) or *native* (platform threads
//! created through the platform interface, instrumented by the trampoline
//! entry points here). Task ids index the control-block table directly.
//!
//! Ties among equal-priority ready tasks resolve to the first match in
//! scan order; fairness between them is not guaranteed.

use heapless::Vec;

use crate::config;
use crate::error::{Error, Result};
use crate::platform::{NativeTaskParams, Platform, TaskHandle};
use crate::task::monitor::ExecMonitor;
use crate::task::watchdog::TaskWatchdog;
use crate::types::{Priority, TaskId, Timestamp};

/// Task entry point; receives the opaque user token from its config
pub type TaskFn = fn(usize);

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created but not yet schedulable
    Idle,
    /// Eligible to run
    Ready,
    /// Currently executing
    Running,
    /// Explicitly paused; re-enters Ready via resume
    Suspended,
    /// One-shot task finished
    Completed,
}

/// Static task description
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Task name (diagnostics and by-name lookup)
    pub name: &'static str,
    /// Entry point
    pub function: TaskFn,
    /// Opaque token forwarded to the entry point
    pub arg: usize,
    /// Scheduling priority
    pub priority: Priority,
    /// Period in milliseconds; 0 = one-shot
    pub period_ms: u32,
    /// Soft execution deadline in milliseconds; 0 = none
    pub deadline_ms: u32,
    /// Stack size for native tasks, bytes
    pub stack_bytes: u32,
    /// Create as a platform thread instead of a cooperative task
    pub native: bool,
    /// Platform-native priority for native tasks
    pub native_priority: u32,
    /// Core to pin a native task to; -1 = unpinned
    pub core_id: i32,
    /// Skipped by `create_all_tasks` when false
    pub enabled: bool,
}

impl TaskConfig {
    /// Describe a cooperative task with defaults
    pub const fn new(name: &'static str, function: TaskFn) -> Self {
        Self {
            name,
            function,
            arg: 0,
            priority: Priority::Normal,
            period_ms: 0,
            deadline_ms: 0,
            stack_bytes: 4096,
            native: false,
            native_priority: 1,
            core_id: -1,
            enabled: true,
        }
    }
}

/// Accumulated per-task execution statistics (microseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatistics {
    /// Shortest observed execution
    pub min_execution_us: u32,
    /// Longest observed execution
    pub max_execution_us: u32,
    /// Mean execution over all runs
    pub avg_execution_us: u32,
    /// Sum of all executions
    pub total_execution_us: u32,
    /// Executions that exceeded the deadline
    pub missed_deadlines: u32,
}

impl Default for TaskStatistics {
    fn default() -> Self {
        Self {
            min_execution_us: u32::MAX,
            max_execution_us: 0,
            avg_execution_us: 0,
            total_execution_us: 0,
            missed_deadlines: 0,
        }
    }
}

/// Control block for one task
#[derive(Debug, Clone, Copy)]
pub struct TaskControlBlock {
    /// Task id (invalid sentinel after deletion)
    pub id: TaskId,
    /// Name from the config
    pub name: &'static str,
    function: TaskFn,
    arg: usize,
    /// Scheduling priority
    pub priority: Priority,
    /// Lifecycle state
    pub state: TaskState,
    /// Creation time, milliseconds
    pub created_ms: Timestamp,
    /// Last time the task started running, milliseconds
    pub last_run_ms: Timestamp,
    /// Next due time for periodic tasks, milliseconds
    pub next_run_ms: Timestamp,
    /// Period; 0 = one-shot
    pub period_ms: u32,
    /// Soft deadline; 0 = none
    pub deadline_ms: u32,
    /// Duration of the most recent execution, microseconds
    pub execution_us: u32,
    /// Completed executions
    pub run_count: u32,
    /// Accumulated statistics
    pub stats: TaskStatistics,
    /// Platform handle for native tasks
    pub native_handle: Option<TaskHandle>,
    /// Stack size for native tasks
    pub stack_bytes: u32,
    /// Created as a platform thread
    pub is_native: bool,
}

/// Cooperative priority scheduler hosting native tasks
pub struct Scheduler {
    tasks: Vec<TaskControlBlock, { config::MAX_TASKS }>,
    next_task_id: u16,
    initialized: bool,
    tasks_ready: bool,
    start_time_ms: Timestamp,
    context_switches: u32,
    total_idle_ms: Timestamp,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create an uninitialized scheduler
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_task_id: 0,
            initialized: false,
            tasks_ready: false,
            start_time_ms: 0,
            context_switches: 0,
            total_idle_ms: 0,
        }
    }

    /// Prepare for task creation; fails with `AlreadyExists` on re-init
    pub fn initialize<P: Platform>(&mut self, platform: &P) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyExists);
        }
        self.tasks.clear();
        self.next_task_id = 0;
        self.start_time_ms = platform.now_ms();
        self.context_switches = 0;
        self.total_idle_ms = 0;
        self.initialized = true;
        Ok(())
    }

    /// True after [`Scheduler::initialize`]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn find_task(&self, task_id: TaskId) -> Option<usize> {
        let idx = task_id.index();
        if idx >= self.tasks.len() {
            return None;
        }
        (self.tasks[idx].id == task_id).then_some(idx)
    }

    fn push_tcb<P: Platform>(
        &mut self,
        platform: &P,
        cfg: &TaskConfig,
        is_native: bool,
    ) -> Result<TaskId> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if self.tasks.is_full() {
            return Err(Error::OutOfMemory);
        }
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        let now_ms = platform.now_ms();
        let tcb = TaskControlBlock {
            id,
            name: cfg.name,
            function: cfg.function,
            arg: cfg.arg,
            priority: cfg.priority,
            state: TaskState::Ready,
            created_ms: now_ms,
            last_run_ms: 0,
            next_run_ms: now_ms,
            period_ms: cfg.period_ms,
            deadline_ms: cfg.deadline_ms,
            execution_us: 0,
            run_count: 0,
            stats: TaskStatistics::default(),
            native_handle: None,
            stack_bytes: cfg.stack_bytes,
            is_native,
        };
        let _ = self.tasks.push(tcb);
        Ok(id)
    }

    /// Create a cooperative task
    pub fn create_task<P: Platform>(&mut self, platform: &P, cfg: &TaskConfig) -> Result<TaskId> {
        self.push_tcb(platform, cfg, false)
    }

    /// Create a native task: registers a control block and spawns a
    /// platform thread running `cfg.function(cfg.arg)`
    ///
    /// Glue that wants full trampoline instrumentation runs
    /// [`Scheduler::native_task_main`] from the spawned context instead of
    /// calling the user function directly.
    pub fn create_native_task<P: Platform>(
        &mut self,
        platform: &P,
        cfg: &TaskConfig,
    ) -> Result<TaskId> {
        let id = self.push_tcb(platform, cfg, true)?;
        let params = NativeTaskParams {
            entry: cfg.function,
            arg: cfg.arg,
            name: cfg.name,
            stack_bytes: cfg.stack_bytes,
            priority: cfg.native_priority,
            start_suspended: false,
            pin_to_core: cfg.core_id >= 0,
            core_id: cfg.core_id,
        };
        match platform.create_native_task(&params) {
            Some(handle) => {
                let idx = id.index();
                self.tasks[idx].native_handle = Some(handle);
                Ok(id)
            }
            None => {
                let _ = self.tasks.pop();
                self.next_task_id -= 1;
                Err(Error::InvalidParameter)
            }
        }
    }

    /// Create every enabled task from a config table
    pub fn create_all_tasks<P: Platform>(
        &mut self,
        platform: &P,
        configs: &[TaskConfig],
    ) -> Result<()> {
        for cfg in configs.iter().filter(|c| c.enabled) {
            if cfg.native {
                self.create_native_task(platform, cfg)?;
            } else {
                self.create_task(platform, cfg)?;
            }
        }
        Ok(())
    }

    /// Move a suspended task back to ready
    pub fn start_task(&mut self, task_id: TaskId) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        if self.tasks[idx].state == TaskState::Suspended {
            self.tasks[idx].state = TaskState::Ready;
            return Ok(());
        }
        Err(Error::InvalidParameter)
    }

    /// Suspend a task (any state)
    pub fn suspend_task<P: Platform>(&mut self, platform: &P, task_id: TaskId) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        self.tasks[idx].state = TaskState::Suspended;
        if let Some(handle) = self.tasks[idx].native_handle {
            platform.suspend_native_task(handle);
        }
        Ok(())
    }

    /// Resume a suspended task
    pub fn resume_task<P: Platform>(&mut self, platform: &P, task_id: TaskId) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        if let Some(handle) = self.tasks[idx].native_handle {
            platform.resume_native_task(handle);
        }
        self.start_task(task_id)
    }

    /// Delete a task, releasing its slot to the invalid sentinel
    pub fn delete_task<P: Platform>(&mut self, platform: &P, task_id: TaskId) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        if let Some(handle) = self.tasks[idx].native_handle {
            platform.delete_native_task(handle);
        }
        self.tasks[idx].id = TaskId::INVALID;
        self.tasks[idx].state = TaskState::Idle;
        self.tasks[idx].native_handle = None;
        Ok(())
    }

    /// One cooperative scheduling step
    ///
    /// Selects the highest-priority ready task whose period is due and
    /// executes it to completion, updating statistics. Yields for 1 ms
    /// when nothing is runnable.
    pub fn run<P: Platform>(&mut self, platform: &P) {
        if !self.initialized {
            return;
        }
        let now_ms = platform.now_ms();

        let mut selected: Option<usize> = None;
        let mut highest = Priority::Idle;
        for (idx, task) in self.tasks.iter().enumerate() {
            if task.state != TaskState::Ready || task.is_native {
                continue;
            }
            if task.period_ms > 0 && now_ms < task.next_run_ms {
                continue;
            }
            if task.priority > highest {
                highest = task.priority;
                selected = Some(idx);
            }
        }

        let Some(idx) = selected else {
            platform.delay_ms(1);
            self.total_idle_ms += 1;
            return;
        };

        let function = self.tasks[idx].function;
        let arg = self.tasks[idx].arg;
        self.tasks[idx].state = TaskState::Running;
        self.tasks[idx].last_run_ms = now_ms;

        let start_us = platform.now_us();
        function(arg);
        let end_us = platform.now_us();
        let execution_us = end_us.saturating_sub(start_us) as u32;

        let task = &mut self.tasks[idx];
        task.execution_us = execution_us;
        task.run_count += 1;
        self.context_switches += 1;

        task.stats.min_execution_us = task.stats.min_execution_us.min(execution_us);
        task.stats.max_execution_us = task.stats.max_execution_us.max(execution_us);
        task.stats.total_execution_us = task.stats.total_execution_us.saturating_add(execution_us);
        task.stats.avg_execution_us = task.stats.total_execution_us / task.run_count;

        if task.deadline_ms > 0 && execution_us > task.deadline_ms.saturating_mul(1000) {
            task.stats.missed_deadlines += 1;
        }

        if task.period_ms > 0 {
            task.next_run_ms = now_ms + Timestamp::from(task.period_ms);
            task.state = TaskState::Ready;
        } else {
            task.state = TaskState::Completed;
        }
    }

    /// Release native trampolines to start running user code
    pub fn start_all_tasks(&mut self) {
        self.tasks_ready = true;
    }

    /// Block until [`Scheduler::start_all_tasks`] was called
    pub fn wait_until_ready<P: Platform>(&self, platform: &P) {
        while !self.tasks_ready {
            platform.delay_ms(10);
        }
    }

    /// One instrumented trampoline iteration: timing, user function,
    /// watchdog feed, stack sample, adaptive yield
    pub fn native_task_step<P: Platform>(
        &mut self,
        platform: &P,
        monitor: &mut ExecMonitor,
        watchdog: &mut TaskWatchdog,
        task_id: TaskId,
    ) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        let function = self.tasks[idx].function;
        let arg = self.tasks[idx].arg;

        monitor.start_execution_timing(platform, task_id);
        function(arg);
        monitor.end_execution_timing(platform, task_id);
        watchdog.feed(platform, task_id);
        monitor.update_stack_usage(platform, task_id);
        monitor.adaptive_yield(platform, task_id);

        self.tasks[idx].run_count += 1;
        Ok(())
    }

    /// Native trampoline body: waits for the start gate, then drives the
    /// user function periodically with full instrumentation
    ///
    /// Periodic tasks never return from this. Non-periodic tasks run the
    /// user function once, feed the watchdog once, and return. Platform
    /// glue calls this from the spawned thread with exclusive access to
    /// the scheduler, monitor, and watchdog.
    pub fn native_task_main<P: Platform>(
        &mut self,
        platform: &P,
        monitor: &mut ExecMonitor,
        watchdog: &mut TaskWatchdog,
        task_id: TaskId,
    ) -> Result<()> {
        self.wait_until_ready(platform);
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        let period_ms = self.tasks[idx].period_ms;

        if period_ms > 0 {
            loop {
                self.native_task_step(platform, monitor, watchdog, task_id)?;
                platform.delay_ms(period_ms);
            }
        } else {
            let function = self.tasks[idx].function;
            let arg = self.tasks[idx].arg;
            monitor.start_execution_timing(platform, task_id);
            function(arg);
            monitor.end_execution_timing(platform, task_id);
            // One-time feed so a slow starter is not flagged immediately
            watchdog.feed(platform, task_id);
            self.tasks[idx].state = TaskState::Completed;
            Ok(())
        }
    }

    /// Control block for a task
    pub fn task(&self, task_id: TaskId) -> Result<&TaskControlBlock> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        Ok(&self.tasks[idx])
    }

    /// Registered task count (including deleted slots)
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Task id of the calling native context, when platform-managed
    pub fn current_task_id<P: Platform>(&self, platform: &P) -> TaskId {
        let Some(current) = platform.current_task() else {
            return TaskId::INVALID;
        };
        for task in self.tasks.iter() {
            if task.native_handle == Some(current) {
                return task.id;
            }
        }
        TaskId::INVALID
    }

    /// Change a task's scheduling priority
    pub fn set_task_priority(&mut self, task_id: TaskId, priority: Priority) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        self.tasks[idx].priority = priority;
        Ok(())
    }

    /// Read a task's scheduling priority
    pub fn task_priority(&self, task_id: TaskId) -> Result<Priority> {
        self.task(task_id).map(|t| t.priority)
    }

    /// Change a task's period
    pub fn set_task_period(&mut self, task_id: TaskId, period_ms: u32) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        self.tasks[idx].period_ms = period_ms;
        Ok(())
    }

    /// Change a task's soft deadline
    pub fn set_task_deadline(&mut self, task_id: TaskId, deadline_ms: u32) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        self.tasks[idx].deadline_ms = deadline_ms;
        Ok(())
    }

    /// Look a task up by name
    pub fn task_by_name(&self, name: &str) -> Result<TaskId> {
        self.tasks
            .iter()
            .find(|t| t.id.is_valid() && t.name == name)
            .map(|t| t.id)
            .ok_or(Error::NotFound)
    }

    /// Zero a task's statistics and run count
    pub fn reset_task_statistics(&mut self, task_id: TaskId) -> Result<()> {
        let idx = self.find_task(task_id).ok_or(Error::NotFound)?;
        self.tasks[idx].stats = TaskStatistics::default();
        self.tasks[idx].run_count = 0;
        Ok(())
    }

    /// Cooperative executions performed so far
    pub fn total_context_switches(&self) -> u32 {
        self.context_switches
    }

    /// Milliseconds since initialization
    pub fn uptime_ms<P: Platform>(&self, platform: &P) -> Timestamp {
        platform.now_ms().saturating_sub(self.start_time_ms)
    }

    /// Milliseconds spent idle in [`Scheduler::run`]
    pub fn total_idle_ms(&self) -> Timestamp {
        self.total_idle_ms
    }

    /// Integer CPU utilization percentage (0-100)
    pub fn cpu_utilization<P: Platform>(&self, platform: &P) -> u8 {
        let uptime = self.uptime_ms(platform);
        if uptime == 0 {
            return 0;
        }
        let busy = uptime.saturating_sub(self.total_idle_ms);
        ((busy * 100) / uptime) as u8
    }
}
