//! Bounded single-producer single-consumer queue connecting the
//! dispatcher to each worker.
//!
//! Lock-free ring buffer with monotonic head/tail counters and a
//! power-of-two capacity mask. The producer additionally maintains depth
//! telemetry (peak depth, total pushed) that feeds the per-worker
//! statistics snapshot.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Pads a value to a cache line to keep the producer and consumer
/// counters off each other's lines.
#[repr(C, align(64))]
struct CachePadded<T>(T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Bounded SPSC queue.
///
/// Exactly one thread may push and exactly one thread may pop. Both ends
/// take `&self`; the split is enforced by how the dispatcher hands the
/// queue out, not by the type system.
pub struct SpscQueue<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Consumer position. Only the consumer writes it.
    head: CachePadded<AtomicUsize>,
    /// Producer position. Only the producer writes it.
    tail: CachePadded<AtomicUsize>,
    /// Peak depth observed by the producer.
    max_depth: AtomicUsize,
    /// Total messages pushed.
    total_pushed: AtomicU64,
}

// SAFETY: the protocol is the usual SPSC ring: the producer only writes
// slots in `head..tail`'s complement and publishes them with a Release
// store of `tail`; the consumer acquires `tail` before reading a slot and
// publishes consumption with a Release store of `head`. Each slot is
// therefore accessed by at most one thread at a time.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Creates a queue holding at least `capacity` messages (rounded up
    /// to a power of two).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        let capacity = capacity.next_power_of_two();
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            mask: capacity - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
            max_depth: AtomicUsize::new(0),
            total_pushed: AtomicU64::new(0),
        }
    }

    /// Pushes a message. Returns it back if the queue is full.
    ///
    /// Producer side only.
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` when the queue is at capacity.
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail - head == self.capacity() {
            return Err(value);
        }
        // SAFETY: `tail - head < capacity`, so this slot is not visible
        // to the consumer; only the producer thread writes it.
        unsafe {
            (*self.buffer[tail & self.mask].get()).write(value);
        }
        self.tail.store(tail + 1, Ordering::Release);
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        let depth = tail + 1 - head;
        if depth > self.max_depth.load(Ordering::Relaxed) {
            self.max_depth.store(depth, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Pops the next message, if any.
    ///
    /// Consumer side only.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: `head < tail` under the Acquire load above, so the
        // producer has fully written this slot, and the consumer has not
        // yet consumed it.
        let value = unsafe { (*self.buffer[head & self.mask].get()).assume_init_read() };
        self.head.store(head + 1, Ordering::Release);
        Some(value)
    }

    /// Current queue depth. Approximate when read off-thread.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head)
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Peak depth observed since creation.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::Relaxed)
    }

    /// Total messages pushed since creation.
    #[must_use]
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed.load(Ordering::Relaxed)
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for SpscQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("max_depth", &self.max_depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::sync::Arc;

    #[test]
    fn push_pop_preserves_order() {
        let q = SpscQueue::new(8);
        for i in 0..5 {
            q.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn rejects_push_when_full() {
        let q = SpscQueue::new(4);
        for i in 0..4 {
            q.push(i).unwrap();
        }
        assert_eq!(q.push(99), Err(99));
        assert_eq!(q.pop(), Some(0));
        q.push(99).unwrap();
    }

    #[test]
    fn wraps_around() {
        let q = SpscQueue::new(4);
        for round in 0..10 {
            for i in 0..3 {
                q.push(round * 10 + i).unwrap();
            }
            for i in 0..3 {
                assert_eq!(q.pop(), Some(round * 10 + i));
            }
        }
    }

    #[test]
    fn rounds_capacity_to_power_of_two() {
        let q = SpscQueue::<u8>::new(5);
        assert_eq!(q.capacity(), 8);
    }

    #[test]
    fn tracks_depth_telemetry() {
        let q = SpscQueue::new(8);
        for i in 0..6 {
            q.push(i).unwrap();
        }
        while q.pop().is_some() {}
        assert_eq!(q.max_depth(), 6);
        assert_eq!(q.total_pushed(), 6);
    }

    #[test]
    fn concurrent_producer_consumer() {
        let q = Arc::new(SpscQueue::new(64));
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for i in 0..10_000u64 {
                    loop {
                        if q.push(i).is_ok() {
                            break;
                        }
                        std::thread::yield_now();
                    }
                }
            })
        };
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                let mut expected = 0u64;
                while expected < 10_000 {
                    if let Some(v) = q.pop() {
                        assert_eq!(v, expected);
                        expected += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn drop_releases_undelivered_messages() {
        static DROPS: Counter = Counter::new(0);
        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }
        {
            let q = SpscQueue::new(8);
            for _ in 0..5 {
                assert!(q.push(Tracked).is_ok());
            }
            drop(q.pop());
        }
        assert_eq!(DROPS.load(Ordering::Relaxed), 5);
    }
}
