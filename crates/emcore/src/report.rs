// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Critical-error reporting
//!
//! Subsystems hand an [`ErrorContext`] to the reporter, which counts it,
//! keeps the last occurrence for post-mortem reads, and forwards it to an
//! optional application callback. A [`RetryPolicy`] with integer
//! exponential backoff is carried here for recovery flows.

use crate::error::Error;
use crate::types::{TaskId, Timestamp};

/// Error event types for callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEvent {
    /// A message was dropped
    MessageDropped,
    /// A queue overflowed
    QueueOverflow,
    /// A task exceeded its deadline
    TaskDeadlineMiss,
    /// A task faulted
    TaskFault,
    /// A task timed out
    TaskTimeout,
    /// A task's stack is close to exhaustion
    TaskStackOverflow,
    /// A fixed-capacity table is exhausted
    MemoryExhaustion,
    /// An invalid state transition was requested
    InvalidState,
    /// The watchdog expired for a task
    WatchdogTimeout,
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, no action needed
    Info,
    /// May need attention
    Warning,
    /// Requires handling
    Error,
    /// System may be unstable
    Critical,
    /// System must restart
    Fatal,
}

/// Context delivered with every report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorContext {
    /// What happened
    pub event: ErrorEvent,
    /// How bad it is
    pub severity: ErrorSeverity,
    /// Associated error code, if any
    pub code: Option<Error>,
    /// Task involved (invalid sentinel when system-wide)
    pub task_id: TaskId,
    /// When it happened, microseconds
    pub timestamp: Timestamp,
    /// Event-specific data
    pub data: [u32; 4],
}

impl ErrorContext {
    /// Build a context; timestamp and data are filled by the caller
    pub fn new(event: ErrorEvent, severity: ErrorSeverity, task_id: TaskId) -> Self {
        Self {
            event,
            severity,
            code: None,
            task_id,
            timestamp: 0,
            data: [0; 4],
        }
    }
}

/// Error handler callback type
pub type ErrorHandlerFn = fn(&ErrorContext);

/// Retry policy with integer exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_retries: u8,
    /// Delay before the first retry, milliseconds
    pub initial_delay_ms: u32,
    /// Backoff ceiling, milliseconds
    pub max_delay_ms: u32,
    /// Multiply the delay per attempt when set
    pub exponential_backoff: bool,
    /// Integer backoff factor applied per attempt
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            exponential_backoff: true,
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay for retry attempt `attempt` (0-based); 0 when out of retries
    pub fn delay_for(&self, attempt: u8) -> u32 {
        if attempt >= self.max_retries {
            return 0;
        }
        if !self.exponential_backoff {
            return self.initial_delay_ms;
        }
        let mut delay = self.initial_delay_ms;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.backoff_factor);
            if delay >= self.max_delay_ms {
                return self.max_delay_ms;
            }
        }
        delay.min(self.max_delay_ms)
    }
}

/// Collector for critical errors
#[derive(Default)]
pub struct ErrorReporter {
    callback: Option<ErrorHandlerFn>,
    retry_policy: RetryPolicy,
    error_count: u32,
    last_error: Option<ErrorContext>,
}

impl ErrorReporter {
    /// Create a reporter with no callback
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or clear) the application callback
    pub fn set_callback(&mut self, callback: Option<ErrorHandlerFn>) {
        self.callback = callback;
    }

    /// Replace the retry policy
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry_policy = policy;
    }

    /// Current retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Record an error and forward it to the callback
    pub fn report(&mut self, ctx: &ErrorContext) {
        self.error_count += 1;
        self.last_error = Some(*ctx);

        if let Some(callback) = self.callback {
            callback(ctx);
        }

        if ctx.severity >= ErrorSeverity::Critical {
            log::error!(
                "critical error: event={:?} task={:?} code={:?}",
                ctx.event,
                ctx.task_id,
                ctx.code
            );
        }
    }

    /// Total errors recorded
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Most recent error, if any
    pub fn last_error(&self) -> Option<&ErrorContext> {
        self.last_error.as_ref()
    }

    /// Clear counters (the last error snapshot is kept)
    pub fn reset(&mut self) {
        self.error_count = 0;
    }
}
