//! The transaction worker: applies transaction-scoped records in WAL
//! order, driven from the dispatcher thread.
//!
//! Records without page affinity (commit-log, multixact, relation-map,
//! commits themselves, ...) funnel through a single ordered queue so
//! transaction state never replays out of order. Items staged during
//! dispatch are promoted to the apply queue at drain points; applying a
//! `share_with_txn` item additionally waits until every page worker has
//! replayed through it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::control::{BackoffWait, CancelToken};
use crate::item::{ItemHandle, ItemKind, RedoItem};
use crate::pool::PoolShared;
use crate::record::Lsn;
use crate::worker::PageWorkerHandle;
use crate::DispatchError;

/// Hook applying transaction-scoped records. Implemented by the
/// embedding recovery system.
pub trait TxnRedo: Send {
    /// Applies one record. Items flagged `immediate_checkpoint` should
    /// trigger a checkpoint once applied.
    fn apply(&mut self, item: &RedoItem);
}

/// Transaction-worker progress, published for page workers that must
/// block on transaction state (`blocked_by_txn` items).
#[derive(Debug)]
pub(crate) struct TxnProgress {
    lsn: AtomicU64,
}

impl TxnProgress {
    pub(crate) fn new() -> Self {
        Self {
            lsn: AtomicU64::new(0),
        }
    }

    /// Last end LSN the transaction worker has processed through,
    /// markers included.
    #[inline]
    pub(crate) fn position(&self) -> Lsn {
        self.lsn.load(Ordering::Acquire)
    }

    fn advance(&self, lsn: Lsn) {
        self.lsn.store(lsn, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn test_advance(&self, lsn: Lsn) {
        self.advance(lsn);
    }
}

pub(crate) struct TxnWorker {
    pending: VecDeque<ItemHandle>,
    apply_queue: VecDeque<ItemHandle>,
    progress: Arc<TxnProgress>,
    pool: Arc<PoolShared>,
    redo: Box<dyn TxnRedo>,
    applied_records: u64,
}

impl TxnWorker {
    pub(crate) fn new(pool: Arc<PoolShared>, redo: Box<dyn TxnRedo>) -> Self {
        Self {
            pending: VecDeque::new(),
            apply_queue: VecDeque::new(),
            progress: Arc::new(TxnProgress::new()),
            pool,
            redo,
            applied_records: 0,
        }
    }

    pub(crate) fn progress(&self) -> Arc<TxnProgress> {
        Arc::clone(&self.progress)
    }

    /// Stages an item during dispatch. The handle counts against the
    /// item's consumer countdown like any queue.
    pub(crate) fn stage(&mut self, handle: ItemHandle) {
        self.pending.push_back(handle);
    }

    /// Moves staged items to the apply queue. Called at drain points so
    /// the apply order matches dispatch order.
    pub(crate) fn promote_pending(&mut self) {
        self.apply_queue.append(&mut self.pending);
    }

    /// Applies queued items in order.
    ///
    /// A `share_with_txn` item is applied only once every page worker
    /// has replayed through it; with `full_sync` false the scan stops at
    /// the first such item that is not yet ready, with `full_sync` true
    /// it blocks until ready and drains the whole queue.
    pub(crate) fn apply_ready(
        &mut self,
        full_sync: bool,
        workers: &[PageWorkerHandle],
        cancel: &CancelToken,
        warn_every: u64,
    ) -> Result<(), DispatchError> {
        while let Some(&handle) = self.apply_queue.front() {
            let end_lsn = {
                let item = self.pool.item(handle);
                if item.share_with_txn && !pages_replayed_through(workers, item.end_lsn) {
                    if !full_sync {
                        break;
                    }
                    let mut wait = BackoffWait::new(warn_every);
                    loop {
                        if cancel.is_cancelled() {
                            return Err(DispatchError::Cancelled);
                        }
                        if pages_replayed_through(workers, item.end_lsn) {
                            break;
                        }
                        if wait.pause() {
                            tracing::warn!(
                                end_lsn = item.end_lsn,
                                waits = wait.iterations(),
                                "transaction worker waiting for page workers to reach shared record"
                            );
                        }
                    }
                }
                item.end_lsn
            };
            let _ = self.apply_queue.pop_front();
            {
                let item = self.pool.item(handle);
                if item.kind == ItemKind::Record {
                    self.redo.apply(item);
                    self.applied_records += 1;
                }
            }
            self.progress.advance(end_lsn);
            self.pool.release(handle);
        }
        Ok(())
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.apply_queue.is_empty()
    }

    pub(crate) fn queued(&self) -> usize {
        self.pending.len() + self.apply_queue.len()
    }

    pub(crate) fn applied_records(&self) -> u64 {
        self.applied_records
    }

    pub(crate) fn position(&self) -> Lsn {
        self.progress.position()
    }
}

impl std::fmt::Debug for TxnWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnWorker")
            .field("pending", &self.pending.len())
            .field("apply_queue", &self.apply_queue.len())
            .field("applied_records", &self.applied_records)
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

fn pages_replayed_through(workers: &[PageWorkerHandle], lsn: Lsn) -> bool {
    workers.iter().all(|w| w.replayed_lsn() >= lsn)
}
