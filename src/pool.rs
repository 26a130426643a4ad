//! Order Pool - preallocated, fixed-capacity store of order records.
//!
//! All order storage is carved out at construction; the matching hot
//! path never touches the heap. A free list threaded through the
//! `next` handle of unused slots gives O(1) acquire and release.

use std::fmt;

use crate::command::{OrderId, Price, Qty, Side};
use crate::error::VenueError;

/// Sentinel for "no slot" - the handle-world equivalent of a null
/// pointer, without the dangling-pointer failure class.
pub const NULL_HANDLE: u32 = u32::MAX;

/// Stable index of a slot in the pool. Links between orders are stored
/// as handles rather than pointers; 32 bits halves the link metadata
/// and keeps a node inside one cache line.
pub type Handle = u32;

/// One resting order. Exactly 64 bytes, one cache line.
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct OrderNode {
    /// Resting limit price in ticks.
    pub price: Price,
    /// Book-assigned order id.
    pub order_id: OrderId,
    /// Remaining unfilled quantity. Decreases monotonically to 0.
    pub qty: Qty,
    /// Next order at the same price level (FIFO toward the tail).
    pub next: Handle,
    /// Previous order at the same price level. Enables O(1) cancel.
    pub prev: Handle,
    pub side: Side,
    _pad: [u8; 31],
}

const _: () = assert!(std::mem::size_of::<OrderNode>() == 64);
const _: () = assert!(std::mem::align_of::<OrderNode>() == 64);

impl OrderNode {
    #[inline]
    const fn vacant() -> Self {
        Self {
            price: 0,
            order_id: 0,
            qty: 0,
            next: NULL_HANDLE,
            prev: NULL_HANDLE,
            side: Side::Buy,
            _pad: [0u8; 31],
        }
    }

    /// Clear a slot before it goes back on the free list.
    #[inline]
    fn reset(&mut self) {
        self.price = 0;
        self.order_id = 0;
        self.qty = 0;
        self.next = NULL_HANDLE;
        self.prev = NULL_HANDLE;
    }
}

impl fmt::Debug for OrderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderNode")
            .field("order_id", &self.order_id)
            .field("side", &self.side)
            .field("price", &self.price)
            .field("qty", &self.qty)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Fixed-capacity slab of [`OrderNode`]s with O(1) acquire/release.
///
/// Exhaustion is a hard error surfaced to the caller; the pool never
/// grows. Releasing a handle twice, or touching a handle after
/// release, is a caller bug (debug assertions catch the obvious
/// cases).
pub struct OrderPool {
    slots: Vec<OrderNode>,
    free_head: Handle,
    live: u32,
    capacity: u32,
}

impl OrderPool {
    /// Build a pool holding at most `capacity` orders.
    ///
    /// # Panics
    /// If `capacity >= u32::MAX` (the sentinel value is reserved).
    pub fn new(capacity: u32) -> Self {
        assert!(capacity < NULL_HANDLE, "capacity must leave room for NULL_HANDLE");

        let mut slots = vec![OrderNode::vacant(); capacity as usize];
        for i in 0..capacity.saturating_sub(1) {
            slots[i as usize].next = i + 1;
        }
        if capacity > 0 {
            slots[(capacity - 1) as usize].next = NULL_HANDLE;
        }

        Self {
            slots,
            free_head: if capacity > 0 { 0 } else { NULL_HANDLE },
            live: 0,
            capacity,
        }
    }

    /// Take a zeroed slot off the free list.
    #[inline]
    pub fn acquire(&mut self) -> Result<Handle, VenueError> {
        if self.free_head == NULL_HANDLE {
            return Err(VenueError::PoolExhausted);
        }

        let handle = self.free_head;
        self.free_head = self.slots[handle as usize].next;
        self.live += 1;

        self.slots[handle as usize].next = NULL_HANDLE;
        self.slots[handle as usize].prev = NULL_HANDLE;
        Ok(handle)
    }

    /// Return a slot to the free list. The handle must not be used
    /// again until re-acquired.
    #[inline]
    pub fn release(&mut self, handle: Handle) {
        debug_assert!(handle < self.capacity, "handle out of bounds");
        debug_assert!(self.live > 0, "release with no live orders");

        self.slots[handle as usize].reset();
        self.slots[handle as usize].next = self.free_head;
        self.free_head = handle;
        self.live -= 1;
    }

    #[inline]
    pub fn get(&self, handle: Handle) -> &OrderNode {
        debug_assert!(handle < self.capacity, "handle out of bounds");
        &self.slots[handle as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> &mut OrderNode {
        debug_assert!(handle < self.capacity, "handle out of bounds");
        &mut self.slots[handle as usize]
    }

    /// Number of currently live orders.
    #[inline]
    pub fn live(&self) -> u32 {
        self.live
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head == NULL_HANDLE
    }

    /// Pre-fault every page backing the slab so the hot path never
    /// takes a page fault.
    pub fn warm_up(&mut self) {
        for slot in &mut self.slots {
            unsafe {
                std::ptr::write_volatile(&mut slot._pad[0], 0);
            }
        }
    }
}

impl fmt::Debug for OrderPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderPool")
            .field("capacity", &self.capacity)
            .field("live", &self.live)
            .field("free_head", &self.free_head)
            .finish()
    }
}
