// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task watchdog
//!
//! Every registered task records a feed timestamp; `check_all` (called
//! periodically from a dedicated task) compares elapsed time against each
//! timeout and triggers the configured action. Native trampolines feed
//! automatically after every user invocation.

use heapless::Vec;

use crate::config;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::report::{ErrorContext, ErrorEvent, ErrorReporter, ErrorSeverity};
use crate::types::{TaskId, Timestamp};

/// Recovery action on timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Count only
    None,
    /// Emit a warning log
    LogWarning,
    /// Invoke the registered recovery callback
    ResetTask,
    /// Reset the whole system through the platform
    SystemReset,
}

/// Recovery callback type
pub type RecoveryFn = fn(TaskId);

struct WatchdogEntry {
    task_id: TaskId,
    last_feed_us: Timestamp,
    timeout_ms: u32,
    action: WatchdogAction,
    recovery: Option<RecoveryFn>,
    timeout_count: u32,
    enabled: bool,
}

/// Watchdog monitoring every registered task
pub struct TaskWatchdog {
    entries: Vec<WatchdogEntry, { config::MAX_TASKS }>,
    system_enabled: bool,
    system_timeout_ms: u32,
    last_system_feed_us: Timestamp,
}

impl Default for TaskWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskWatchdog {
    /// Create a watchdog with no entries
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            system_enabled: false,
            system_timeout_ms: config::SYSTEM_WATCHDOG_TIMEOUT_MS,
            last_system_feed_us: 0,
        }
    }

    fn find_entry(&mut self, task_id: TaskId) -> Option<&mut WatchdogEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.task_id == task_id && e.enabled)
    }

    /// Register a task with its timeout and action
    pub fn register_task<P: Platform>(
        &mut self,
        platform: &P,
        task_id: TaskId,
        timeout_ms: u32,
        action: WatchdogAction,
    ) -> Result<()> {
        if self.entries.is_full() {
            return Err(Error::OutOfMemory);
        }
        let _ = self.entries.push(WatchdogEntry {
            task_id,
            last_feed_us: platform.now_us(),
            timeout_ms,
            action,
            recovery: None,
            timeout_count: 0,
            enabled: true,
        });
        Ok(())
    }

    /// Record that a task is alive
    pub fn feed<P: Platform>(&mut self, platform: &P, task_id: TaskId) {
        let now = platform.now_us();
        if let Some(entry) = self.find_entry(task_id) {
            entry.last_feed_us = now;
        }
    }

    /// Change a task's timeout
    pub fn set_timeout(&mut self, task_id: TaskId, timeout_ms: u32) -> Result<()> {
        match self.find_entry(task_id) {
            Some(entry) => {
                entry.timeout_ms = timeout_ms;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Change a task's timeout action
    pub fn set_action(&mut self, task_id: TaskId, action: WatchdogAction) -> Result<()> {
        match self.find_entry(task_id) {
            Some(entry) => {
                entry.action = action;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Install the recovery callback used by [`WatchdogAction::ResetTask`]
    pub fn register_recovery_action(
        &mut self,
        task_id: TaskId,
        callback: RecoveryFn,
    ) -> Result<()> {
        match self.find_entry(task_id) {
            Some(entry) => {
                entry.recovery = Some(callback);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// True when the task fed within its timeout window
    pub fn is_alive<P: Platform>(&self, platform: &P, task_id: TaskId) -> bool {
        for entry in self.entries.iter() {
            if entry.task_id == task_id && entry.enabled {
                let elapsed_us = platform.now_us().saturating_sub(entry.last_feed_us);
                return (elapsed_us / 1000) < u64::from(entry.timeout_ms);
            }
        }
        false
    }

    /// Enable or disable monitoring for a task; enabling restarts the
    /// feed window
    pub fn enable_task<P: Platform>(&mut self, platform: &P, task_id: TaskId, enable: bool) {
        let now = platform.now_us();
        for entry in self.entries.iter_mut() {
            if entry.task_id == task_id {
                entry.enabled = enable;
                if enable {
                    entry.last_feed_us = now;
                }
            }
        }
    }

    fn trigger_timeout<P: Platform>(
        platform: &P,
        reporter: &mut ErrorReporter,
        entry: &mut WatchdogEntry,
    ) {
        entry.timeout_count += 1;

        let mut ctx = ErrorContext::new(
            ErrorEvent::WatchdogTimeout,
            ErrorSeverity::Critical,
            entry.task_id,
        );
        ctx.timestamp = platform.now_us();
        ctx.data[0] = entry.timeout_count;
        ctx.data[1] = entry.timeout_ms;
        reporter.report(&ctx);

        match entry.action {
            WatchdogAction::None => {}
            WatchdogAction::LogWarning => {
                log::warn!(
                    "watchdog: task {:?} timeout ({} occurrences)",
                    entry.task_id,
                    entry.timeout_count
                );
            }
            WatchdogAction::ResetTask => {
                log::warn!("watchdog: resetting task {:?}", entry.task_id);
                if let Some(recovery) = entry.recovery {
                    recovery(entry.task_id);
                }
            }
            WatchdogAction::SystemReset => {
                log::error!("watchdog: system reset triggered");
                // Let the log drain before pulling the plug
                platform.delay_ms(100);
                platform.system_reset();
            }
        }
    }

    /// Check every entry and trigger timeouts; call periodically from a
    /// dedicated task
    pub fn check_all<P: Platform>(&mut self, platform: &P, reporter: &mut ErrorReporter) {
        let now = platform.now_us();

        for entry in self.entries.iter_mut() {
            if !entry.enabled {
                continue;
            }
            let elapsed_ms = now.saturating_sub(entry.last_feed_us) / 1000;
            if elapsed_ms >= u64::from(entry.timeout_ms) {
                Self::trigger_timeout(platform, reporter, entry);
                // Restart the window after triggering
                entry.last_feed_us = now;
            }
        }

        if self.system_enabled {
            let elapsed_ms = now.saturating_sub(self.last_system_feed_us) / 1000;
            if elapsed_ms >= u64::from(self.system_timeout_ms) {
                log::error!("system watchdog timeout");
                platform.delay_ms(100);
                platform.system_reset();
                self.last_system_feed_us = now;
            }
        }
    }

    /// Arm the system-level watchdog
    pub fn enable_system_watchdog<P: Platform>(&mut self, platform: &P, timeout_ms: u32) {
        self.system_enabled = true;
        self.system_timeout_ms = timeout_ms;
        self.last_system_feed_us = platform.now_us();
        log::info!("system watchdog enabled: {} ms timeout", timeout_ms);
    }

    /// Feed the system-level watchdog
    pub fn feed_system<P: Platform>(&mut self, platform: &P) {
        self.last_system_feed_us = platform.now_us();
    }

    /// Timeouts recorded for a task
    pub fn timeout_count(&self, task_id: TaskId) -> u32 {
        self.entries
            .iter()
            .find(|e| e.task_id == task_id && e.enabled)
            .map_or(0, |e| e.timeout_count)
    }

    /// Zero all timeout counters
    pub fn reset_statistics(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.timeout_count = 0;
        }
    }
}
