//! Page-replay workers: one thread per worker, fed through an SPSC
//! queue, applying page-scoped records via the embedder's [`PageRedo`]
//! hook.
//!
//! Each worker observes a strictly increasing, gap-free LSN sequence:
//! real items for the pages it owns, LSN markers for everything else it
//! must account for. The handle exposes the worker's replay positions and
//! queue telemetry to the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::control::{BackoffWait, CancelToken};
use crate::item::{ItemHandle, ItemKind, RedoItem};
use crate::pool::PoolShared;
use crate::record::Lsn;
use crate::spsc::SpscQueue;
use crate::txn::TxnProgress;
use crate::DispatchError;

/// Hook applying page-scoped records. Implemented by the embedding
/// recovery system; one instance per worker, living on that worker's
/// thread.
pub trait PageRedo: Send {
    /// Called on the worker thread before the worker reports ready.
    fn on_start(&mut self) {}

    /// Applies one record.
    fn apply(&mut self, item: &RedoItem);

    /// Called when the end-of-recovery mark arrives.
    fn on_end_mark(&mut self) {}
}

/// Creates the per-worker [`PageRedo`] instances at spawn time.
pub trait PageRedoFactory {
    /// Builds the redo hook for `worker_id`.
    fn create(&self, worker_id: u32) -> Box<dyn PageRedo>;
}

impl<F> PageRedoFactory for F
where
    F: Fn(u32) -> Box<dyn PageRedo>,
{
    fn create(&self, worker_id: u32) -> Box<dyn PageRedo> {
        self(worker_id)
    }
}

/// Page-worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Not yet ready, or already exited.
    Invalid = 0,
    /// Thread running and accepting work.
    Ready = 1,
}

/// Message on a page-worker queue.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PageMessage {
    /// A pool item: record copy or LSN marker.
    Item(ItemHandle),
    /// End-of-recovery mark; the worker acknowledges and exits.
    EndMark,
}

struct WorkerShared {
    inbox: SpscQueue<PageMessage>,
    state: AtomicU8,
    shutdown: AtomicBool,
    reached_end: AtomicBool,
    /// True while an item is being applied; idle means empty inbox and
    /// not busy.
    busy: AtomicBool,
    read_lsn: AtomicU64,
    replayed_lsn: AtomicU64,
    records_applied: AtomicU64,
}

/// Dispatcher-side handle to one page worker.
pub struct PageWorkerHandle {
    id: u32,
    original_id: u32,
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl PageWorkerHandle {
    pub(crate) fn spawn(
        original_id: u32,
        queue_capacity: usize,
        pool: Arc<PoolShared>,
        txn_progress: Arc<TxnProgress>,
        cancel: CancelToken,
        warn_every: u64,
        redo: Box<dyn PageRedo>,
    ) -> Result<Self, DispatchError> {
        let shared = Arc::new(WorkerShared {
            inbox: SpscQueue::new(queue_capacity),
            state: AtomicU8::new(WorkerState::Invalid as u8),
            shutdown: AtomicBool::new(false),
            reached_end: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            read_lsn: AtomicU64::new(0),
            replayed_lsn: AtomicU64::new(0),
            records_applied: AtomicU64::new(0),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(format!("redo-page-{original_id}"))
            .spawn(move || {
                worker_main(&thread_shared, &pool, &txn_progress, &cancel, warn_every, redo);
            })
            .map_err(|e| DispatchError::SpawnFailed {
                worker_id: original_id,
                message: e.to_string(),
            })?;
        Ok(Self {
            id: original_id,
            original_id,
            shared,
            thread: Some(thread),
        })
    }

    /// Current worker id (may differ from the spawn id after degraded
    /// rearrangement).
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Id the worker was spawned with.
    #[must_use]
    pub fn original_id(&self) -> u32 {
        self.original_id
    }

    pub(crate) fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        if self.shared.state.load(Ordering::Acquire) == WorkerState::Ready as u8 {
            WorkerState::Ready
        } else {
            WorkerState::Invalid
        }
    }

    /// Attempts to enqueue a message; hands it back when the queue is
    /// full.
    pub(crate) fn enqueue(&self, message: PageMessage) -> Result<(), PageMessage> {
        self.shared.inbox.push(message)
    }

    pub(crate) fn signal_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }

    pub(crate) fn reached_end_mark(&self) -> bool {
        self.shared.reached_end.load(Ordering::Acquire)
    }

    /// Whether the worker has nothing queued and nothing in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.inbox.is_empty() && !self.shared.busy.load(Ordering::Acquire)
    }

    /// Read LSN of the last observed item.
    #[must_use]
    pub fn read_lsn(&self) -> Lsn {
        self.shared.read_lsn.load(Ordering::Acquire)
    }

    /// End LSN the worker has replayed through, markers included.
    #[must_use]
    pub fn replayed_lsn(&self) -> Lsn {
        self.shared.replayed_lsn.load(Ordering::Acquire)
    }

    /// Records actually applied (markers excluded).
    #[must_use]
    pub fn records_applied(&self) -> u64 {
        self.shared.records_applied.load(Ordering::Relaxed)
    }

    /// Current queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.inbox.len()
    }

    /// Peak queue depth observed.
    #[must_use]
    pub fn queue_max_depth(&self) -> usize {
        self.shared.inbox.max_depth()
    }

    /// Total messages ever queued to this worker.
    #[must_use]
    pub fn queue_total(&self) -> u64 {
        self.shared.inbox.total_pushed()
    }

    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PageWorkerHandle {
    fn drop(&mut self) {
        self.signal_shutdown();
        self.join();
    }
}

impl std::fmt::Debug for PageWorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWorkerHandle")
            .field("id", &self.id)
            .field("original_id", &self.original_id)
            .field("state", &self.state())
            .field("queue_depth", &self.queue_depth())
            .field("replayed_lsn", &self.replayed_lsn())
            .finish_non_exhaustive()
    }
}

fn worker_main(
    shared: &WorkerShared,
    pool: &PoolShared,
    txn_progress: &TxnProgress,
    cancel: &CancelToken,
    warn_every: u64,
    mut redo: Box<dyn PageRedo>,
) {
    redo.on_start();
    shared.state.store(WorkerState::Ready as u8, Ordering::Release);
    tracing::debug!("page worker ready");

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        // Raised before the pop attempt: an item is in flight from the
        // moment it leaves the queue, and idleness checks must not see a
        // window where it is in neither the queue nor the busy flag.
        shared.busy.store(true, Ordering::Release);
        match shared.inbox.pop() {
            Some(PageMessage::Item(handle)) => {
                apply_item(shared, pool, txn_progress, cancel, warn_every, redo.as_mut(), handle);
            }
            Some(PageMessage::EndMark) => {
                redo.on_end_mark();
                shared.reached_end.store(true, Ordering::Release);
                tracing::debug!(
                    records = shared.records_applied.load(Ordering::Relaxed),
                    replayed_lsn = shared.replayed_lsn.load(Ordering::Relaxed),
                    "page worker reached end mark"
                );
                break;
            }
            None => {
                shared.busy.store(false, Ordering::Release);
                std::thread::yield_now();
            }
        }
    }
    shared.busy.store(false, Ordering::Release);

    // Hand queued items back to the pool so shutdown reclaims them.
    while let Some(message) = shared.inbox.pop() {
        if let PageMessage::Item(handle) = message {
            pool.release(handle);
        }
    }
    shared.state.store(WorkerState::Invalid as u8, Ordering::Release);
}

fn apply_item(
    shared: &WorkerShared,
    pool: &PoolShared,
    txn_progress: &TxnProgress,
    cancel: &CancelToken,
    warn_every: u64,
    redo: &mut dyn PageRedo,
    handle: ItemHandle,
) {
    let item = pool.item(handle);
    let mut aborted = false;
    if item.kind == ItemKind::Record {
        if item.blocked_by_txn {
            let mut wait = BackoffWait::new(warn_every);
            while txn_progress.position() < item.end_lsn {
                if cancel.is_cancelled() || shared.shutdown.load(Ordering::Acquire) {
                    aborted = true;
                    break;
                }
                if wait.pause() {
                    tracing::warn!(
                        end_lsn = item.end_lsn,
                        txn_position = txn_progress.position(),
                        waits = wait.iterations(),
                        "page worker waiting for transaction progress"
                    );
                }
            }
        }
        if !aborted {
            redo.apply(item);
            shared.records_applied.fetch_add(1, Ordering::Relaxed);
        }
    }
    shared.read_lsn.store(item.read_lsn, Ordering::Release);
    shared.replayed_lsn.store(item.end_lsn, Ordering::Release);
    pool.release(handle);
}
