//! Lock-Free Queue - bounded MPMC ring buffer.
//!
//! The inter-thread transport between I/O producers and a matching
//! thread (inbound) and between a matching thread and the dispatcher
//! (outbound). Bounded, never blocks, never allocates after
//! construction: a full ring rejects the push and hands the item back,
//! which is the backpressure contract used everywhere in this crate.
//!
//! Each cell carries a sequence counter (Vyukov's bounded-queue
//! scheme). A producer only claims a slot with a successful CAS on the
//! tail, so a push that observes a full ring leaves the ring intact.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free queue. Capacity is rounded up to a power of two.
pub struct LockFreeQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Values cross threads through the ring; the ring itself holds no
// references into any thread.
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    /// Build a queue holding at least `capacity` items (rounded up to
    /// the next power of two, minimum 2).
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two().max(2);
        let buffer = (0..cap)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            mask: cap - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Usable capacity (power of two).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Enqueue. Returns the item back when the ring is full - the
    /// caller decides whether to retry or drop. Never blocks.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - pos as isize;

            if dif == 0 {
                // Slot is free at this position; try to claim it.
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // Consumer has not freed this slot yet: ring is full.
                return Err(value);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue. `None` when empty. Never blocks.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - pos.wrapping_add(1) as isize;

            if dif == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(pos.wrapping_add(self.buffer.len()), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        // Drain whatever is still in flight so the values drop.
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_in_order() {
        let q = LockFreeQueue::with_capacity(8);
        for i in 0..5 {
            assert!(q.push(i).is_ok());
        }
        for i in 0..5 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn pop_from_empty_is_none() {
        let q: LockFreeQueue<u32> = LockFreeQueue::with_capacity(4);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn full_push_fails_without_corruption() {
        let q = LockFreeQueue::with_capacity(4);
        assert_eq!(q.capacity(), 4);
        for i in 0..4 {
            assert!(q.push(i).is_ok());
        }
        // Rejected push hands the item back.
        assert_eq!(q.push(100), Err(100));
        // The original items come out intact and in order.
        for i in 0..4 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn wraps_around_and_reuses_slots() {
        let q = LockFreeQueue::with_capacity(4);
        for i in 0..3 {
            q.push(i).unwrap();
        }
        q.pop();
        q.pop();
        assert!(q.push(100).is_ok());
        assert!(q.push(200).is_ok());

        let mut out = Vec::new();
        while let Some(v) = q.pop() {
            out.push(v);
        }
        assert_eq!(out, vec![2, 100, 200]);
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let q: LockFreeQueue<u8> = LockFreeQueue::with_capacity(5);
        assert_eq!(q.capacity(), 8);
        let q: LockFreeQueue<u8> = LockFreeQueue::with_capacity(0);
        assert_eq!(q.capacity(), 2);
    }

    #[test]
    fn many_producers_one_consumer() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 10_000;

        let q = Arc::new(LockFreeQueue::with_capacity(1 << 16));
        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = p * PER_PRODUCER + i;
                    // Spin on backpressure; the consumer drains below.
                    loop {
                        match q.push(item) {
                            Ok(()) => break,
                            Err(back) => {
                                item = back;
                                thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut seen = vec![0u64; (PRODUCERS * PER_PRODUCER) as usize];
                let mut count = 0;
                let mut last_per_producer = vec![None::<u64>; PRODUCERS as usize];
                while count < PRODUCERS * PER_PRODUCER {
                    if let Some(v) = q.pop() {
                        seen[v as usize] += 1;
                        // FIFO per producer.
                        let p = (v / PER_PRODUCER) as usize;
                        let i = v % PER_PRODUCER;
                        if let Some(prev) = last_per_producer[p] {
                            assert!(i > prev, "producer {p} reordered: {i} after {prev}");
                        }
                        last_per_producer[p] = Some(i);
                        count += 1;
                    } else {
                        thread::yield_now();
                    }
                }
                seen
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        let seen = consumer.join().unwrap();
        assert!(seen.iter().all(|&c| c == 1), "every item exactly once");
    }
}
