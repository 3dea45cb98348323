// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Zero-copy messaging: refcounted fixed-block pool and envelope
//!
//! Payloads live in pool blocks instead of inline envelope bytes; an
//! envelope carries a reference-counted handle. Cloning a handle bumps the
//! block's refcount, dropping it releases, and the last release returns the
//! block to the free list. Handles borrow the pool, so they cannot outlive
//! it.
//!
//! The pool assumes single-context access or external serialization (the
//! intended zero-copy path is SPSC); counters use `Cell`, payloads
//! `RefCell`.

use core::cell::{Cell, RefCell};

use crate::message::types::{Envelope, MessageHeader};

const NO_BLOCK: u16 = 0xFFFF;

struct Block<const BS: usize> {
    payload: RefCell<[u8; BS]>,
    size: Cell<u16>,
    refs: Cell<u16>,
    next: Cell<u16>,
    in_use: Cell<bool>,
}

impl<const BS: usize> Block<BS> {
    fn new(next: u16) -> Self {
        Self {
            payload: RefCell::new([0u8; BS]),
            size: Cell::new(0),
            refs: Cell::new(0),
            next: Cell::new(next),
            in_use: Cell::new(false),
        }
    }
}

/// Fixed-block pool with reference-counted handles
pub struct ZeroCopyPool<const BS: usize, const BC: usize> {
    blocks: [Block<BS>; BC],
    free_head: Cell<u16>,
}

impl<const BS: usize, const BC: usize> Default for ZeroCopyPool<BS, BC> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BS: usize, const BC: usize> ZeroCopyPool<BS, BC> {
    /// Create a pool with every block on the free list
    pub fn new() -> Self {
        let blocks = core::array::from_fn(|i| {
            let next = if i + 1 == BC { NO_BLOCK } else { (i + 1) as u16 };
            Block::new(next)
        });
        Self {
            blocks,
            free_head: Cell::new(0),
        }
    }

    /// Allocate a block for `size` payload bytes
    ///
    /// Returns `None` when `size` exceeds the block size or the pool is
    /// exhausted.
    pub fn allocate(&self, size: u16) -> Option<ZcHandle<'_, BS, BC>> {
        if size as usize > BS {
            return None;
        }
        let idx = self.free_head.get();
        if idx == NO_BLOCK {
            return None;
        }
        let block = &self.blocks[idx as usize];
        self.free_head.set(block.next.get());
        block.size.set(size);
        block.refs.set(1);
        block.in_use.set(true);
        block.next.set(NO_BLOCK);
        Some(ZcHandle {
            pool: self,
            index: idx,
            size,
        })
    }

    fn add_ref(&self, index: u16) {
        let block = &self.blocks[index as usize];
        if block.in_use.get() && block.refs.get() != u16::MAX {
            block.refs.set(block.refs.get() + 1);
        }
    }

    fn release(&self, index: u16) {
        let block = &self.blocks[index as usize];
        if !block.in_use.get() || block.refs.get() == 0 {
            return;
        }
        let refs = block.refs.get() - 1;
        block.refs.set(refs);
        if refs == 0 {
            block.in_use.set(false);
            block.next.set(self.free_head.get());
            self.free_head.set(index);
        }
    }

    /// Total blocks in the pool
    pub const fn capacity(&self) -> usize {
        BC
    }

    /// Blocks currently allocated
    pub fn in_use(&self) -> usize {
        self.blocks.iter().filter(|b| b.in_use.get()).count()
    }
}

/// Reference-counted handle to one pool block
pub struct ZcHandle<'p, const BS: usize, const BC: usize> {
    pool: &'p ZeroCopyPool<BS, BC>,
    index: u16,
    size: u16,
}

impl<const BS: usize, const BC: usize> ZcHandle<'_, BS, BC> {
    /// Valid payload bytes
    pub fn size(&self) -> u16 {
        self.size
    }

    /// Read the payload through `f`
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let payload = self.pool.blocks[self.index as usize].payload.borrow();
        f(&payload[..self.size as usize])
    }

    /// Mutate the payload through `f`
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut payload = self.pool.blocks[self.index as usize].payload.borrow_mut();
        f(&mut payload[..self.size as usize])
    }

    /// Current reference count of the block
    pub fn ref_count(&self) -> u16 {
        self.pool.blocks[self.index as usize].refs.get()
    }
}

impl<const BS: usize, const BC: usize> Clone for ZcHandle<'_, BS, BC> {
    fn clone(&self) -> Self {
        self.pool.add_ref(self.index);
        Self {
            pool: self.pool,
            index: self.index,
            size: self.size,
        }
    }
}

impl<const BS: usize, const BC: usize> Drop for ZcHandle<'_, BS, BC> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// Message envelope whose payload is a pool block handle
#[derive(Clone)]
pub struct ZcMessage<'p, const BS: usize, const BC: usize> {
    /// Fixed header
    pub header: MessageHeader,
    /// Block handle; `None` for an empty message
    pub handle: Option<ZcHandle<'p, BS, BC>>,
}

impl<'p, const BS: usize, const BC: usize> ZcMessage<'p, BS, BC> {
    /// Create an empty zero-copy message
    pub fn new() -> Self {
        Self {
            header: MessageHeader::default(),
            handle: None,
        }
    }

    /// Create a message backed by a freshly allocated block holding `data`
    pub fn with_payload(pool: &'p ZeroCopyPool<BS, BC>, data: &[u8]) -> Option<Self> {
        let handle = pool.allocate(data.len() as u16)?;
        handle.with_data_mut(|buf| buf.copy_from_slice(data));
        let mut header = MessageHeader::default();
        header.payload_size = data.len() as u16;
        Some(Self {
            header,
            handle: Some(handle),
        })
    }

    /// Payload size in bytes (0 without a block)
    pub fn payload_size(&self) -> u16 {
        self.handle.as_ref().map_or(0, ZcHandle::size)
    }
}

impl<const BS: usize, const BC: usize> Default for ZcMessage<'_, BS, BC> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BS: usize, const BC: usize> Envelope for ZcMessage<'_, BS, BC> {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}
