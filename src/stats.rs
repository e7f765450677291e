//! Telemetry snapshots for the dispatcher, its workers, and the pool.

use crate::control::RecoveryState;
use crate::record::Lsn;
use crate::worker::WorkerState;

/// Snapshot of one page worker.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    /// Current worker id.
    pub id: u32,
    /// Id the worker was spawned with.
    pub original_id: u32,
    /// Lifecycle state.
    pub state: WorkerState,
    /// Current queue depth.
    pub queue_depth: usize,
    /// Peak queue depth observed.
    pub queue_max_depth: usize,
    /// Total messages ever queued.
    pub queue_total: u64,
    /// Records applied (markers excluded).
    pub records_applied: u64,
    /// Read LSN of the last observed item.
    pub read_lsn: Lsn,
    /// End LSN replayed through.
    pub replayed_lsn: Lsn,
}

/// Snapshot of the item pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Pool capacity in items.
    pub capacity: u32,
    /// Slots handed out at least once.
    pub allocated: u32,
    /// Items sitting on the dispatcher-local free list.
    pub local_free: u32,
}

/// Snapshot of the whole dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    /// Recovery pass state.
    pub state: RecoveryState,
    /// Exit code recorded at the end of recovery.
    pub exit_code: i32,
    /// Records dispatched so far.
    pub records_dispatched: u64,
    /// Records staged but not yet flushed to worker queues.
    pub pending_records: u32,
    /// Per-worker snapshots, ready workers first.
    pub workers: Vec<WorkerStats>,
    /// Records the transaction worker has applied.
    pub txn_applied: u64,
    /// Items queued on the transaction worker.
    pub txn_queued: usize,
    /// Transaction worker position.
    pub txn_position: Lsn,
    /// Pool snapshot.
    pub pool: PoolStats,
    /// Cumulative nanoseconds spent classifying and staging records.
    pub dispatch_ns: u64,
    /// Cumulative nanoseconds spent in transaction apply.
    pub txn_ns: u64,
    /// Cumulative nanoseconds spent draining pending buffers.
    pub drain_ns: u64,
}
