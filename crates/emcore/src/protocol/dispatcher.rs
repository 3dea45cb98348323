// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command dispatcher: fixed-capacity opcode -> handler table
//!
//! Linear scan (small tables expected), replace-on-register semantics,
//! swap-compact deregistration, optional unknown-opcode fallback. No locks;
//! suitable for ISR or task context.

use heapless::Vec;

use crate::protocol::parser::Packet;

/// Handler signature for validated packets
pub type CommandHandler<const MAX_PAYLOAD: usize> = fn(&Packet<MAX_PAYLOAD>);

/// Outcome of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterResult {
    /// A new table entry was created
    OkNew,
    /// An existing entry for the opcode was replaced
    OkReplaced,
    /// The table is full
    Full,
}

struct Entry<const MAX_PAYLOAD: usize> {
    opcode: u8,
    handler: CommandHandler<MAX_PAYLOAD>,
}

/// Fixed-capacity opcode dispatcher
pub struct CommandDispatcher<const MAX_HANDLERS: usize, const MAX_PAYLOAD: usize> {
    table: Vec<Entry<MAX_PAYLOAD>, MAX_HANDLERS>,
    unknown: Option<CommandHandler<MAX_PAYLOAD>>,
}

impl<const MAX_HANDLERS: usize, const MAX_PAYLOAD: usize> Default
    for CommandDispatcher<MAX_HANDLERS, MAX_PAYLOAD>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX_HANDLERS: usize, const MAX_PAYLOAD: usize>
    CommandDispatcher<MAX_HANDLERS, MAX_PAYLOAD>
{
    /// Create an empty dispatcher
    pub const fn new() -> Self {
        Self {
            table: Vec::new(),
            unknown: None,
        }
    }

    /// Table capacity
    pub const fn capacity() -> usize {
        MAX_HANDLERS
    }

    /// Registered handler count
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no handler is registered
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Register (or replace) a handler; detailed result
    pub fn try_register_handler(
        &mut self,
        opcode: u8,
        handler: CommandHandler<MAX_PAYLOAD>,
    ) -> RegisterResult {
        for entry in self.table.iter_mut() {
            if entry.opcode == opcode {
                entry.handler = handler;
                return RegisterResult::OkReplaced;
            }
        }
        match self.table.push(Entry { opcode, handler }) {
            Ok(()) => RegisterResult::OkNew,
            Err(_) => RegisterResult::Full,
        }
    }

    /// Register (or replace) a handler; false only when the table is full
    pub fn register_handler(&mut self, opcode: u8, handler: CommandHandler<MAX_PAYLOAD>) -> bool {
        self.try_register_handler(opcode, handler) != RegisterResult::Full
    }

    /// Remove the handler for an opcode; compacts by swapping in the last
    /// live entry
    pub fn deregister_handler(&mut self, opcode: u8) -> bool {
        match self.table.iter().position(|e| e.opcode == opcode) {
            Some(idx) => {
                self.table.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// True when a handler exists for `opcode`
    pub fn has_handler(&self, opcode: u8) -> bool {
        self.table.iter().any(|e| e.opcode == opcode)
    }

    /// Handler registered for `opcode`, if any
    pub fn handler_for(&self, opcode: u8) -> Option<CommandHandler<MAX_PAYLOAD>> {
        self.table
            .iter()
            .find(|e| e.opcode == opcode)
            .map(|e| e.handler)
    }

    /// Set the fallback invoked when no opcode matches
    pub fn set_unknown_handler(&mut self, handler: CommandHandler<MAX_PAYLOAD>) {
        self.unknown = Some(handler);
    }

    /// Remove all handlers and the fallback
    pub fn clear(&mut self) {
        self.table.clear();
        self.unknown = None;
    }

    /// Dispatch a packet to its handler, or the fallback on a miss
    pub fn dispatch(&self, pkt: &Packet<MAX_PAYLOAD>) {
        for entry in self.table.iter() {
            if entry.opcode == pkt.opcode {
                (entry.handler)(pkt);
                return;
            }
        }
        if let Some(unknown) = self.unknown {
            unknown(pkt);
        }
    }
}
