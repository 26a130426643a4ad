//! Price Level - FIFO queue of orders resting at one exact price.
//!
//! A doubly-linked list threaded through pool handles. Arrival order
//! is the intra-price tie-break: the head is always the oldest order
//! and matches first. Every operation is O(1) and allocation-free.

use crate::command::Qty;
use crate::pool::{Handle, OrderPool, NULL_HANDLE};

/// Orders queued at a single price, oldest at the head.
#[derive(Clone, Copy, Debug)]
pub struct PriceLevel {
    /// Oldest order - first to match.
    pub head: Handle,
    /// Newest order - last to match.
    pub tail: Handle,
    /// Sum of remaining quantities across the level.
    pub total_qty: u64,
    /// Number of orders at this level.
    pub count: u32,
}

impl PriceLevel {
    #[inline]
    pub const fn new() -> Self {
        Self {
            head: NULL_HANDLE,
            tail: NULL_HANDLE,
            total_qty: 0,
            count: 0,
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append an order at the tail (newest position).
    #[inline]
    pub fn push_back(&mut self, pool: &mut OrderPool, handle: Handle) {
        let qty = pool.get(handle).qty;

        if self.tail == NULL_HANDLE {
            debug_assert!(self.head == NULL_HANDLE);
            self.head = handle;
            self.tail = handle;
            let node = pool.get_mut(handle);
            node.prev = NULL_HANDLE;
            node.next = NULL_HANDLE;
        } else {
            pool.get_mut(self.tail).next = handle;
            let node = pool.get_mut(handle);
            node.prev = self.tail;
            node.next = NULL_HANDLE;
            self.tail = handle;
        }

        self.count += 1;
        self.total_qty += qty as u64;
    }

    /// Detach and return the head order. The slot is not released;
    /// that stays with the caller.
    #[inline]
    pub fn pop_front(&mut self, pool: &mut OrderPool) -> Option<Handle> {
        if self.head == NULL_HANDLE {
            return None;
        }

        let handle = self.head;
        let (next, qty) = {
            let node = pool.get(handle);
            (node.next, node.qty)
        };

        if next == NULL_HANDLE {
            self.head = NULL_HANDLE;
            self.tail = NULL_HANDLE;
        } else {
            self.head = next;
            pool.get_mut(next).prev = NULL_HANDLE;
        }

        self.count -= 1;
        self.total_qty -= qty as u64;

        let node = pool.get_mut(handle);
        node.prev = NULL_HANDLE;
        node.next = NULL_HANDLE;

        Some(handle)
    }

    /// Unlink an order from anywhere in the queue, given its own
    /// handle - no search. Returns true when the level is now empty.
    /// The slot is not released; that stays with the caller.
    #[inline]
    pub fn remove(&mut self, pool: &mut OrderPool, handle: Handle) -> bool {
        let (prev, next, qty) = {
            let node = pool.get(handle);
            (node.prev, node.next, node.qty)
        };

        match (prev, next) {
            (NULL_HANDLE, NULL_HANDLE) => {
                debug_assert!(self.head == handle && self.tail == handle);
                self.head = NULL_HANDLE;
                self.tail = NULL_HANDLE;
            }
            (NULL_HANDLE, n) => {
                debug_assert!(self.head == handle);
                self.head = n;
                pool.get_mut(n).prev = NULL_HANDLE;
            }
            (p, NULL_HANDLE) => {
                debug_assert!(self.tail == handle);
                self.tail = p;
                pool.get_mut(p).next = NULL_HANDLE;
            }
            (p, n) => {
                pool.get_mut(p).next = n;
                pool.get_mut(n).prev = p;
            }
        }

        self.count -= 1;
        self.total_qty -= qty as u64;

        let node = pool.get_mut(handle);
        node.prev = NULL_HANDLE;
        node.next = NULL_HANDLE;

        self.count == 0
    }

    /// Oldest order without detaching it.
    #[inline]
    pub const fn peek_head(&self) -> Handle {
        self.head
    }

    /// Keep the cached total in step after a partial fill mutated an
    /// order's qty in place.
    #[inline]
    pub fn subtract_qty(&mut self, qty: Qty) {
        debug_assert!(self.total_qty >= qty as u64);
        self.total_qty -= qty as u64;
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}
