//! The redo item pool: a bounded arena of recyclable items with a
//! lock-free cross-thread free stack.
//!
//! Slots are allocated once at startup and addressed by index, so handles
//! stay valid while items circulate through worker queues. Acquisition is
//! dispatcher-only and tries, in order: the dispatcher-local free list, a
//! bulk takeover of the cross-thread free stack, then a fresh slot below
//! the high-water mark. When all three fail the pool is exhausted and the
//! dispatcher must wait for workers to release items; the pool is the
//! flow-control valve that bounds read-ahead.
//!
//! Reclamation is a per-item consumer countdown: `publish` arms the count
//! to the number of queues the handle enters, and the last `release`
//! pushes the index back onto the free stack.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::item::{ItemHandle, RedoItem};

const NIL: u32 = u32::MAX;

struct Slot {
    item: UnsafeCell<RedoItem>,
    /// Consumers still holding the item. Zero means dispatcher-owned.
    pending: AtomicU32,
    /// Next index in the free stack.
    next_free: AtomicU32,
}

impl Slot {
    fn new() -> Self {
        Self {
            item: UnsafeCell::new(RedoItem::empty()),
            pending: AtomicU32::new(0),
            next_free: AtomicU32::new(NIL),
        }
    }
}

/// The arena and free stack shared with worker threads.
pub(crate) struct PoolShared {
    slots: Box<[Slot]>,
    free_head: AtomicU32,
}

// SAFETY: slot items are written only by the dispatcher thread while the
// slot is unpublished (pending == 0 and in no queue); workers read them
// only after receiving the handle through an SPSC queue, whose
// release/acquire pair orders the writes before the reads. `pending` and
// `next_free` are atomics.
unsafe impl Send for PoolShared {}
unsafe impl Sync for PoolShared {}

impl PoolShared {
    /// Read access to a published item.
    ///
    /// The caller must hold a handle received through a queue and must
    /// drop the reference before calling [`release`](Self::release).
    #[inline]
    pub(crate) fn item(&self, handle: ItemHandle) -> &RedoItem {
        // SAFETY: per the struct invariant, published items are not
        // mutated until every consumer has released them.
        unsafe { &*self.slots[handle.index()].item.get() }
    }

    /// Drops one consumer's claim on the item. The last consumer returns
    /// the slot to the free stack.
    pub(crate) fn release(&self, handle: ItemHandle) {
        let slot = &self.slots[handle.index()];
        if slot.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.push_free(handle.0);
        }
    }

    fn push_free(&self, index: u32) {
        let slot = &self.slots[index as usize];
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            slot.next_free.store(head, Ordering::Relaxed);
            match self.free_head.compare_exchange_weak(
                head,
                index,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Detaches the whole free stack, returning its head index.
    fn take_all(&self) -> u32 {
        self.free_head.swap(NIL, Ordering::AcqRel)
    }

    fn next_of(&self, index: u32) -> u32 {
        self.slots[index as usize].next_free.load(Ordering::Relaxed)
    }
}

/// Dispatcher-side pool handle. Owns allocation; workers only release.
pub struct RedoItemPool {
    shared: Arc<PoolShared>,
    local_free: Vec<u32>,
    /// Slots handed out at least once. Fresh allocation stops at
    /// `capacity`.
    next_fresh: u32,
    capacity: u32,
}

impl RedoItemPool {
    pub(crate) fn new(capacity: u32) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shared: Arc::new(PoolShared {
                slots,
                free_head: AtomicU32::new(NIL),
            }),
            local_free: Vec::new(),
            next_fresh: 0,
            capacity,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    /// Non-blocking acquire: local free list, then bulk takeover of the
    /// shared free stack, then a fresh slot. `None` means exhausted.
    pub(crate) fn try_acquire(&mut self) -> Option<ItemHandle> {
        if let Some(index) = self.local_free.pop() {
            return Some(ItemHandle(index));
        }
        self.reclaim();
        if let Some(index) = self.local_free.pop() {
            return Some(ItemHandle(index));
        }
        if self.next_fresh < self.capacity {
            let index = self.next_fresh;
            self.next_fresh += 1;
            return Some(ItemHandle(index));
        }
        None
    }

    /// Moves everything on the shared free stack to the local free list.
    pub(crate) fn reclaim(&mut self) {
        let mut index = self.shared.take_all();
        while index != NIL {
            let next = self.shared.next_of(index);
            self.local_free.push(index);
            index = next;
        }
    }

    /// Mutable access to an unpublished item the dispatcher owns.
    #[inline]
    pub(crate) fn item_mut(&mut self, handle: ItemHandle) -> &mut RedoItem {
        // SAFETY: `&mut self` pins the only thread that allocates, and
        // the handle came from `try_acquire` without an intervening
        // `publish`, so no worker can observe this slot.
        unsafe { &mut *self.shared.slots[handle.index()].item.get() }
    }

    /// Publishes an item to `consumers` queues. Must be called before the
    /// handle enters any queue; after it, the dispatcher must not touch
    /// the item again.
    pub(crate) fn publish(&self, handle: ItemHandle, consumers: u32) {
        debug_assert!(consumers > 0);
        self.shared.slots[handle.index()]
            .pending
            .store(consumers, Ordering::Release);
    }

    /// Pool capacity in items.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slots handed out at least once.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.next_fresh
    }

    pub(crate) fn local_free_len(&self) -> u32 {
        self.local_free.len() as u32
    }
}

impl std::fmt::Debug for RedoItemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedoItemPool")
            .field("capacity", &self.capacity)
            .field("allocated", &self.next_fresh)
            .field("local_free", &self.local_free.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use crate::record::DecodedRecord;
    use crate::item::Designation;

    #[test]
    fn acquire_is_bounded_by_capacity() {
        let mut pool = RedoItemPool::new(4);
        let mut held = Vec::new();
        for _ in 0..4 {
            let h = pool.try_acquire().unwrap();
            pool.publish(h, 1);
            held.push(h);
        }
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.allocated(), 4);
        // Releasing one makes acquisition possible again.
        pool.shared().release(held[0]);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn last_consumer_frees_shared_items() {
        let mut pool = RedoItemPool::new(2);
        let h = pool.try_acquire().unwrap();
        pool.publish(h, 3);
        let shared = Arc::clone(pool.shared());
        shared.release(h);
        shared.release(h);
        pool.reclaim();
        assert_eq!(pool.local_free_len(), 0);
        shared.release(h);
        pool.reclaim();
        assert_eq!(pool.local_free_len(), 1);
    }

    #[test]
    fn recycled_items_keep_their_buffers_usable() {
        let mut pool = RedoItemPool::new(1);
        let h = pool.try_acquire().unwrap();
        let rec = DecodedRecord {
            main_data: b"first",
            ..DecodedRecord::new(3, 0x00, 0x10, 0x20)
        };
        pool.item_mut(h).assign_record(&rec, Designation::TxnWorker, 1);
        pool.publish(h, 1);
        pool.shared().release(h);

        let h2 = pool.try_acquire().unwrap();
        assert_eq!(h2, h);
        let rec2 = DecodedRecord::new(0, 0x20, 0x20, 0x30);
        pool.item_mut(h2).assign_marker(&rec2, Designation::PageWorker(0));
        pool.publish(h2, 1);
        assert_eq!(pool.shared().item(h2).kind, ItemKind::LsnMarker);
        assert_eq!(pool.shared().item(h2).end_lsn, 0x30);
    }

    #[test]
    fn releases_from_other_threads_are_reclaimed() {
        let mut pool = RedoItemPool::new(64);
        let mut handles = Vec::new();
        for _ in 0..64 {
            let h = pool.try_acquire().unwrap();
            pool.publish(h, 1);
            handles.push(h);
        }
        assert!(pool.try_acquire().is_none());

        let shared = Arc::clone(pool.shared());
        let releaser = std::thread::spawn(move || {
            for h in handles {
                shared.release(h);
            }
        });
        releaser.join().unwrap();

        let mut reacquired = 0;
        while pool.try_acquire().is_some() {
            reacquired += 1;
        }
        assert_eq!(reacquired, 64);
    }
}
