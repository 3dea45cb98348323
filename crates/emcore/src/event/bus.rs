// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event bus with bounded queue and wildcard handler matching
//!
//! Handlers are plain function pointers registered against an id pattern;
//! `Category::Any` or code `0xFFFF` subscribe to a whole family. Posted
//! events sit in a bounded queue until `process` drains them. The bus
//! assumes one mutator at a time (wrap it in the platform mutex when
//! shared across native tasks).

use heapless::{Deque, Vec};

use crate::config;
use crate::error::{Error, Result};
use crate::event::types::{Category, Event, EventFlags, EventId, Severity};

/// Handler signature
pub type EventHandler = fn(&Event);

struct HandlerRegistration {
    id: EventId,
    handler: EventHandler,
    active: bool,
}

/// Universal event bus
pub struct EventBus {
    handlers: Vec<HandlerRegistration, { config::MAX_EVENT_HANDLERS }>,
    queue: Deque<Event, { config::EVENT_QUEUE_SIZE }>,
    initialized: bool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus (call [`EventBus::initialize`] before use)
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
            queue: Deque::new(),
            initialized: false,
        }
    }

    /// Mark the bus ready
    pub fn initialize(&mut self) {
        self.initialized = true;
    }

    /// Register a handler for an id pattern
    pub fn register_handler(&mut self, id: EventId, handler: EventHandler) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if self.handlers.is_full() {
            return Err(Error::OutOfMemory);
        }
        let _ = self.handlers.push(HandlerRegistration {
            id,
            handler,
            active: true,
        });
        Ok(())
    }

    /// Deactivate the first live handler registered for exactly `id`
    pub fn unregister_handler(&mut self, id: EventId) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        for reg in self.handlers.iter_mut() {
            if reg.active && reg.id.category == id.category && reg.id.code == id.code {
                reg.active = false;
                return Ok(());
            }
        }
        Err(Error::NotFound)
    }

    /// Queue an event for later processing
    pub fn post(&mut self, event: Event) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if self.queue.is_full() {
            return Err(Error::OutOfMemory);
        }
        let _ = self.queue.push_back(event);
        Ok(())
    }

    /// Convenience: build and queue an event with no payload
    pub fn post_simple(
        &mut self,
        category: Category,
        code: u16,
        severity: Severity,
        flags: EventFlags,
    ) -> Result<()> {
        self.post(Event::new(category, code, severity, flags))
    }

    /// Drain up to `max_events` queued events through their handlers
    pub fn process(&mut self, max_events: usize) -> usize {
        if !self.initialized {
            return 0;
        }
        let mut count = 0;
        while count < max_events {
            let Some(event) = self.queue.pop_front() else {
                break;
            };
            self.dispatch(&event);
            count += 1;
        }
        count
    }

    /// Deliver an event to every matching live handler immediately
    pub fn dispatch(&self, event: &Event) {
        for reg in self.handlers.iter() {
            if reg.active && reg.id.matches(&event.id) {
                (reg.handler)(event);
            }
        }
    }

    /// Queued event count
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Live handler count
    pub fn active_handlers(&self) -> usize {
        self.handlers.iter().filter(|r| r.active).count()
    }
}
