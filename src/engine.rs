//! The dispatcher: classifies each decoded record and fans it out across
//! the page workers and the transaction worker.
//!
//! Fan-out uses six patterns (broadcast, targeted-by-block,
//! targeted-single, transaction-routed, synchronized-with-transaction,
//! targeted-blocked-by-transaction), chosen per resource manager by the
//! routing table plus record-level predicates. Items are staged into
//! per-worker pending buffers and flushed to the SPSC queues when the
//! pending threshold is reached, or immediately when a record forces a
//! full sync.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::config::DispatchConfig;
use crate::control::{BackoffWait, CancelToken, RecoveryState};
use crate::item::{Designation, ItemHandle};
use crate::lifecycle::WorkerSet;
use crate::pool::RedoItemPool;
use crate::record::{opcodes, DecodedRecord, Lsn, ResourceManager};
use crate::routing::{DispatchStrategy, RoutingTable};
use crate::selector::{block_worker, relation_worker, ChosenWorkers, ANY_WORKER};
use crate::stats::{DispatcherStats, PoolStats, WorkerStats};
use crate::txn::{TxnRedo, TxnWorker};
use crate::worker::{PageMessage, PageRedoFactory};
use crate::DispatchError;

/// What the transaction worker receives alongside a broadcast.
#[derive(Debug, Clone, Copy)]
enum TxnTail {
    /// The broadcast item itself.
    SharedItem,
    /// An LSN marker, optionally flagged immediate-checkpoint.
    Marker {
        immediate_checkpoint: bool,
    },
    /// Nothing; the record is invisible to transaction state.
    None,
}

/// With zero live workers startup fails, so the sentinel can only mean
/// "no preference": pin it to worker 0.
const fn fallback_any(worker_id: u32) -> u32 {
    if worker_id == ANY_WORKER {
        0
    } else {
        worker_id
    }
}

/// The parallel-replay dispatcher. One instance per recovery pass,
/// driven from a single thread.
pub struct Dispatcher {
    config: DispatchConfig,
    routing: RoutingTable,
    pool: RedoItemPool,
    workers: WorkerSet,
    txn: TxnWorker,
    chosen: ChosenWorkers,
    /// Per-ready-worker staging buffers, flushed at drain points.
    pending: Vec<VecDeque<PageMessage>>,
    pending_count: u32,
    last_end_lsn: Lsn,
    /// Set by the embedder once the first recovery snapshot exists;
    /// until then, snapshot-changing records force full syncs on hot
    /// standby.
    standby_snapshot_ready: bool,
    state: RecoveryState,
    exit_code: i32,
    cancel: CancelToken,
    records_dispatched: u64,
    dispatch_ns: u64,
    txn_ns: u64,
    drain_ns: u64,
    stopped: bool,
}

impl Dispatcher {
    /// Spawns the workers and waits for readiness.
    ///
    /// Requests `config.page_workers` workers; if only some become ready
    /// within the timeout the dispatcher starts degraded with the ready
    /// subset renumbered to ids `0..ready_count`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`],
    /// [`DispatchError::RoutingTableCorrupt`],
    /// [`DispatchError::SpawnFailed`], or
    /// [`DispatchError::NoReadyWorkers`].
    pub fn start<F: PageRedoFactory>(
        config: DispatchConfig,
        page_factory: &F,
        txn_redo: Box<dyn TxnRedo>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let routing = RoutingTable::new();
        routing.verify()?;
        tracing::info!(
            workers = config.page_workers,
            queue_capacity = config.queue_capacity,
            pool_capacity = config.pool_capacity(),
            hot_standby = config.hot_standby,
            "starting parallel redo dispatch"
        );
        let pool = RedoItemPool::new(config.pool_capacity());
        let txn = TxnWorker::new(Arc::clone(pool.shared()), txn_redo);
        let cancel = CancelToken::new();
        let txn_progress = txn.progress();
        tracing::debug!(state = ?RecoveryState::StartingBegin, "spawning page workers");
        let mut workers =
            WorkerSet::spawn(&config, pool.shared(), &txn_progress, &cancel, page_factory)?;
        tracing::debug!(state = ?RecoveryState::StartingEnd, "waiting for worker readiness");
        let ready = match workers.wait_ready(&config) {
            Ok(ready) => ready,
            Err(err) => {
                let _ = workers.stop(&config);
                return Err(err);
            }
        };
        Ok(Self {
            config,
            routing,
            pool,
            workers,
            txn,
            chosen: ChosenWorkers::new(),
            pending: (0..ready).map(|_| VecDeque::new()).collect(),
            pending_count: 0,
            last_end_lsn: 0,
            standby_snapshot_ready: false,
            state: RecoveryState::InProgress,
            exit_code: 0,
            cancel,
            records_dispatched: 0,
            dispatch_ns: 0,
            txn_ns: 0,
            drain_ns: 0,
            stopped: false,
        })
    }

    /// Number of live page workers records are partitioned over.
    #[must_use]
    pub fn worker_count(&self) -> u32 {
        self.workers.ready_count()
    }

    /// Current recovery state.
    #[must_use]
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Exit code recorded by [`finish`](Self::finish).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Cancellation token for this pass.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Tells the dispatcher the first recovery snapshot is ready, ending
    /// the forced full syncs on snapshot-changing records.
    pub fn set_standby_snapshot_ready(&mut self, ready: bool) {
        self.standby_snapshot_ready = ready;
    }

    /// Dispatches one decoded record.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MalformedRecord`] after conservatively
    /// broadcasting the record; the caller must abort the recovery pass.
    /// Returns [`DispatchError::Cancelled`] when the pass is cancelled
    /// while the dispatcher is blocked on queue or pool capacity.
    pub fn dispatch(&mut self, rec: &DecodedRecord<'_>) -> Result<(), DispatchError> {
        let started = Instant::now();
        self.last_end_lsn = rec.end_lsn;
        self.records_dispatched += 1;
        let result = match self.routing.classify(rec.rmid, rec.info) {
            Ok(strategy) => {
                let full_sync = self.dispatch_by_strategy(strategy, rec)?;
                if full_sync {
                    self.process_pending(true)?;
                } else {
                    self.pending_count += 1;
                    if self.pending_count >= self.config.pending_max {
                        self.process_pending(false)?;
                    }
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    rmid = rec.rmid,
                    info = rec.info,
                    end_lsn = rec.end_lsn,
                    "malformed record, broadcasting conservatively before aborting"
                );
                self.dispatch_broadcast(rec, TxnTail::SharedItem, false)?;
                self.process_pending(true)?;
                self.dump();
                Err(err)
            }
        };
        self.dispatch_ns += started.elapsed().as_nanos() as u64;
        result
    }

    fn dispatch_by_strategy(
        &mut self,
        strategy: DispatchStrategy,
        rec: &DecodedRecord<'_>,
    ) -> Result<bool, DispatchError> {
        match strategy {
            DispatchStrategy::Control => self.dispatch_control(rec),
            DispatchStrategy::Transaction => self.dispatch_transaction(rec),
            DispatchStrategy::Storage => self.dispatch_storage(rec),
            DispatchStrategy::Database => self.dispatch_database(rec),
            DispatchStrategy::Tablespace => self.dispatch_tablespace(rec),
            DispatchStrategy::Standby => self.dispatch_standby(rec),
            DispatchStrategy::HeapPage => self.dispatch_pages(rec),
            DispatchStrategy::HeapMaintenance => self.dispatch_heap_maintenance(rec),
            DispatchStrategy::Btree => self.dispatch_btree(rec),
            DispatchStrategy::GinIndex => {
                let op = rec.info & opcodes::STANDARD_OPMASK;
                let vacuum = matches!(
                    op,
                    opcodes::GIN_VACUUM_PAGE
                        | opcodes::GIN_DELETE_PAGE
                        | opcodes::GIN_VACUUM_DATA_LEAF
                );
                self.dispatch_index(rec, vacuum)
            }
            DispatchStrategy::GistIndex => {
                let vacuum = rec.info & opcodes::STANDARD_OPMASK == opcodes::GIST_PAGE_UPDATE;
                self.dispatch_index(rec, vacuum)
            }
            DispatchStrategy::SpgistIndex => {
                let op = rec.info & opcodes::STANDARD_OPMASK;
                if op == opcodes::SPGIST_VACUUM_REDIRECT && self.config.hot_standby {
                    // Redirect vacuum carries a removal horizon the
                    // transaction side must observe, not just wait behind.
                    self.dispatch_index_sync(rec)
                } else {
                    let vacuum =
                        matches!(op, opcodes::SPGIST_VACUUM_LEAF | opcodes::SPGIST_VACUUM_ROOT);
                    self.dispatch_index(rec, vacuum)
                }
            }
            DispatchStrategy::RelationPage => self.dispatch_relation_page(rec),
            DispatchStrategy::TxnRouted { full_sync } => {
                self.dispatch_txn_routed(rec, false)?;
                Ok(full_sync)
            }
        }
    }

    fn dispatch_control(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        let op = rec.info & opcodes::STANDARD_OPMASK;
        match op {
            opcodes::XLOG_CHECKPOINT_SHUTDOWN | opcodes::XLOG_CHECKPOINT_ONLINE => {
                self.dispatch_broadcast(rec, TxnTail::SharedItem, false)?;
                // A shutdown checkpoint changes standby state until the
                // first snapshot exists.
                Ok(op == opcodes::XLOG_CHECKPOINT_SHUTDOWN
                    && self.config.hot_standby
                    && !self.standby_snapshot_ready)
            }
            opcodes::XLOG_FPI | opcodes::XLOG_FPI_FOR_HINT => self.dispatch_pages(rec),
            _ => {
                self.dispatch_txn_routed(rec, false)?;
                Ok(false)
            }
        }
    }

    fn dispatch_transaction(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        if rec.dropped_rels.is_empty() {
            self.dispatch_txn_routed(rec, false)?;
            return Ok(false);
        }
        // The commit/abort unlinks relation files: the owning workers
        // must replay through it before the transaction side does. In
        // relation-level mode ownership is not tracked per block, so
        // every worker is chosen.
        let count = self.worker_count();
        self.chosen.reset(count);
        if self.config.page_level_routing {
            for rel in rec.dropped_rels {
                self.chosen.add(fallback_any(relation_worker(rel, count)))?;
            }
        } else {
            self.choose_all(count)?;
        }
        self.dispatch_sync_txn(rec)?;
        Ok(false)
    }

    fn choose_all(&mut self, count: u32) -> Result<(), DispatchError> {
        for worker in 0..count {
            self.chosen.add(worker)?;
        }
        Ok(())
    }

    fn dispatch_storage(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        let Some(rel) = rec.target_rel.or_else(|| rec.blocks.first().map(|b| b.tag.rel)) else {
            self.dispatch_txn_routed(rec, false)?;
            return Ok(false);
        };
        let count = self.worker_count();
        self.chosen.reset(count);
        if rec.info & opcodes::STANDARD_OPMASK == opcodes::SMGR_CREATE {
            self.chosen.add(fallback_any(relation_worker(&rel, count)))?;
            self.dispatch_chosen(rec)?;
        } else {
            // Truncate discards blocks past the cutoff; transaction state
            // must not advance past it before the pages are gone. In
            // relation-level mode every worker is chosen.
            if self.config.page_level_routing {
                self.chosen.add(fallback_any(relation_worker(&rel, count)))?;
            } else {
                self.choose_all(count)?;
            }
            self.dispatch_sync_txn(rec)?;
        }
        Ok(false)
    }

    fn dispatch_database(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        if rec.info & opcodes::STANDARD_OPMASK == opcodes::DBASE_DROP {
            self.dispatch_broadcast(rec, TxnTail::SharedItem, true)?;
            Ok(true)
        } else {
            self.dispatch_broadcast(
                rec,
                TxnTail::Marker {
                    immediate_checkpoint: true,
                },
                false,
            )?;
            Ok(false)
        }
    }

    fn dispatch_tablespace(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        if rec.info & opcodes::STANDARD_OPMASK == opcodes::TBLSPC_DROP {
            self.dispatch_txn_routed(rec, true)?;
            Ok(true)
        } else {
            // Every worker must see the new tablespace directory before
            // touching relations inside it.
            self.dispatch_broadcast(
                rec,
                TxnTail::Marker {
                    immediate_checkpoint: true,
                },
                false,
            )?;
            Ok(false)
        }
    }

    fn dispatch_standby(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        let full_sync = rec.info & opcodes::STANDARD_OPMASK == opcodes::STANDBY_RUNNING_XACTS
            && self.config.hot_standby
            && !self.standby_snapshot_ready;
        self.dispatch_txn_routed(rec, false)?;
        Ok(full_sync)
    }

    fn dispatch_heap_maintenance(
        &mut self,
        rec: &DecodedRecord<'_>,
    ) -> Result<bool, DispatchError> {
        match rec.info & opcodes::HEAP_OPMASK {
            opcodes::HEAP2_CLEANUP_INFO => {
                self.dispatch_txn_routed(rec, false)?;
                Ok(false)
            }
            opcodes::HEAP2_BCM => self.dispatch_relation_page(rec),
            _ => self.dispatch_pages(rec),
        }
    }

    fn dispatch_btree(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        if rec.info & opcodes::STANDARD_OPMASK == opcodes::BTREE_REUSE_PAGE {
            self.dispatch_txn_routed(rec, false)?;
            Ok(false)
        } else {
            self.dispatch_pages(rec)
        }
    }

    /// Index records route to one worker per whole index; vacuum-class
    /// operations on hot standby additionally block on transaction
    /// progress, because the standby snapshot machinery is what stands in
    /// for multi-version visibility.
    fn dispatch_index(
        &mut self,
        rec: &DecodedRecord<'_>,
        vacuum: bool,
    ) -> Result<bool, DispatchError> {
        if !(vacuum && self.config.hot_standby) {
            return self.dispatch_relation_page(rec);
        }
        let Some(rel) = rec.target_rel.or_else(|| rec.blocks.first().map(|b| b.tag.rel)) else {
            self.dispatch_txn_routed(rec, false)?;
            return Ok(false);
        };
        let count = self.worker_count();
        self.chosen.reset(count);
        self.chosen.add(fallback_any(relation_worker(&rel, count)))?;
        self.dispatch_blocked(rec)?;
        Ok(false)
    }

    /// Index records whose conflict horizon the transaction worker has to
    /// replay itself, not merely wait behind: the owning worker and the
    /// transaction worker share the item.
    fn dispatch_index_sync(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        let Some(rel) = rec.target_rel.or_else(|| rec.blocks.first().map(|b| b.tag.rel)) else {
            self.dispatch_txn_routed(rec, false)?;
            return Ok(false);
        };
        let count = self.worker_count();
        self.chosen.reset(count);
        self.chosen.add(fallback_any(relation_worker(&rel, count)))?;
        self.dispatch_sync_txn(rec)?;
        Ok(false)
    }

    /// Targeted-by-block: chosen workers get the item, untouched workers
    /// skip the record entirely. Blockless records broadcast.
    fn dispatch_pages(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        if rec.blocks.is_empty() {
            self.dispatch_broadcast(rec, TxnTail::None, false)?;
            return Ok(false);
        }
        let count = self.worker_count();
        self.chosen.reset(count);
        for block in rec.blocks {
            let id = if self.config.page_level_routing {
                block_worker(&block.tag, count)
            } else {
                relation_worker(&block.tag.rel, count)
            };
            self.chosen.add(fallback_any(id))?;
        }
        self.dispatch_chosen(rec)?;
        Ok(false)
    }

    /// Targeted-single by relation key.
    fn dispatch_relation_page(&mut self, rec: &DecodedRecord<'_>) -> Result<bool, DispatchError> {
        let Some(rel) = rec.target_rel.or_else(|| rec.blocks.first().map(|b| b.tag.rel)) else {
            self.dispatch_broadcast(rec, TxnTail::None, false)?;
            return Ok(false);
        };
        let count = self.worker_count();
        self.chosen.reset(count);
        self.chosen.add(fallback_any(relation_worker(&rel, count)))?;
        self.dispatch_chosen(rec)?;
        Ok(false)
    }

    // Fan-out primitives.

    fn stage_to_worker(&mut self, worker: u32, handle: ItemHandle) {
        self.pending[worker as usize].push_back(PageMessage::Item(handle));
    }

    fn marker_to_worker(
        &mut self,
        worker: u32,
        rec: &DecodedRecord<'_>,
    ) -> Result<(), DispatchError> {
        let handle = self.acquire_item()?;
        self.pool
            .item_mut(handle)
            .assign_marker(rec, Designation::PageWorker(worker));
        self.pool.publish(handle, 1);
        self.stage_to_worker(worker, handle);
        Ok(())
    }

    fn marker_to_txn(
        &mut self,
        rec: &DecodedRecord<'_>,
        immediate_checkpoint: bool,
    ) -> Result<(), DispatchError> {
        let handle = self.acquire_item()?;
        {
            let item = self.pool.item_mut(handle);
            item.assign_marker(rec, Designation::TxnWorker);
            item.immediate_checkpoint = immediate_checkpoint;
        }
        self.pool.publish(handle, 1);
        self.txn.stage(handle);
        Ok(())
    }

    /// Broadcast-no-page: one shared item to every page worker, with the
    /// transaction tail the caller picked.
    fn dispatch_broadcast(
        &mut self,
        rec: &DecodedRecord<'_>,
        tail: TxnTail,
        immediate_checkpoint: bool,
    ) -> Result<(), DispatchError> {
        let count = self.worker_count();
        let consumers = count + u32::from(matches!(tail, TxnTail::SharedItem));
        let handle = self.acquire_item()?;
        {
            let item = self.pool.item_mut(handle);
            item.assign_record(rec, Designation::AllWorkers, consumers);
            item.immediate_checkpoint = immediate_checkpoint;
        }
        self.pool.publish(handle, consumers);
        for worker in 0..count {
            self.stage_to_worker(worker, handle);
        }
        match tail {
            TxnTail::SharedItem => self.txn.stage(handle),
            TxnTail::Marker {
                immediate_checkpoint,
            } => self.marker_to_txn(rec, immediate_checkpoint)?,
            TxnTail::None => {}
        }
        Ok(())
    }

    /// Transaction-routed: LSN marker to every page worker, the real item
    /// to the transaction worker.
    fn dispatch_txn_routed(
        &mut self,
        rec: &DecodedRecord<'_>,
        immediate_checkpoint: bool,
    ) -> Result<(), DispatchError> {
        for worker in 0..self.worker_count() {
            self.marker_to_worker(worker, rec)?;
        }
        let handle = self.acquire_item()?;
        {
            let item = self.pool.item_mut(handle);
            item.assign_record(rec, Designation::TxnWorker, 1);
            item.immediate_checkpoint = immediate_checkpoint;
        }
        self.pool.publish(handle, 1);
        self.txn.stage(handle);
        Ok(())
    }

    /// Targeted: the real item to every chosen worker, nothing to anyone
    /// else. `chosen` must already be populated.
    fn dispatch_chosen(&mut self, rec: &DecodedRecord<'_>) -> Result<(), DispatchError> {
        let count = self.worker_count();
        let consumers = self.chosen.distinct();
        debug_assert!(consumers > 0);
        let handle = self.acquire_item()?;
        self.pool
            .item_mut(handle)
            .assign_record(rec, Designation::AnyWorker, consumers);
        self.pool.publish(handle, consumers);
        for worker in 0..count {
            if self.chosen.is_chosen(worker) {
                self.stage_to_worker(worker, handle);
            }
        }
        Ok(())
    }

    /// Synchronized-with-transaction: chosen workers and the transaction
    /// worker share the item; the transaction side applies last.
    fn dispatch_sync_txn(&mut self, rec: &DecodedRecord<'_>) -> Result<(), DispatchError> {
        let count = self.worker_count();
        let distinct = self.chosen.distinct();
        if distinct != 1 && rec.rmid != ResourceManager::Transaction.id() {
            tracing::warn!(
                rmid = rec.rmid,
                chosen = distinct,
                end_lsn = rec.end_lsn,
                "synchronized dispatch expected exactly one chosen worker"
            );
        }
        let consumers = distinct + 1;
        let handle = self.acquire_item()?;
        {
            let item = self.pool.item_mut(handle);
            item.assign_record(rec, Designation::TxnWorker, consumers);
            item.share_with_txn = true;
        }
        self.pool.publish(handle, consumers);
        for worker in 0..count {
            if self.chosen.is_chosen(worker) {
                self.stage_to_worker(worker, handle);
            } else {
                self.marker_to_worker(worker, rec)?;
            }
        }
        self.txn.stage(handle);
        Ok(())
    }

    /// Targeted-blocked-by-transaction: the chosen worker holds the item
    /// until the transaction worker reaches it; everyone else gets
    /// markers.
    fn dispatch_blocked(&mut self, rec: &DecodedRecord<'_>) -> Result<(), DispatchError> {
        let count = self.worker_count();
        let distinct = self.chosen.distinct();
        if distinct != 1 {
            tracing::warn!(
                rmid = rec.rmid,
                chosen = distinct,
                end_lsn = rec.end_lsn,
                "blocked dispatch expected exactly one chosen worker"
            );
        }
        let consumers = distinct;
        debug_assert!(consumers > 0);
        let handle = self.acquire_item()?;
        {
            let item = self.pool.item_mut(handle);
            item.assign_record(rec, Designation::AnyWorker, consumers);
            item.blocked_by_txn = true;
        }
        self.pool.publish(handle, consumers);
        for worker in 0..count {
            if self.chosen.is_chosen(worker) {
                self.stage_to_worker(worker, handle);
            } else {
                self.marker_to_worker(worker, rec)?;
            }
        }
        self.marker_to_txn(rec, false)
    }

    /// Opportunistically moves staged messages into the worker queues
    /// without blocking. Items sitting in the pending buffers are
    /// invisible to workers and cannot be released, so every wait on the
    /// pool must flush them first.
    fn flush_staged(&mut self) {
        let count = self.workers.ready_count() as usize;
        for worker in 0..count {
            loop {
                let Some(&message) = self.pending[worker].front() else {
                    break;
                };
                if self.workers.ready()[worker].enqueue(message).is_err() {
                    break;
                }
                self.pending[worker].pop_front();
            }
        }
    }

    /// Acquires a pool item, flushing staged items and servicing the
    /// transaction worker while the pool is exhausted.
    fn acquire_item(&mut self) -> Result<ItemHandle, DispatchError> {
        if let Some(handle) = self.pool.try_acquire() {
            return Ok(handle);
        }
        let mut wait = BackoffWait::new(self.config.stall_warn_every);
        loop {
            if self.cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            self.flush_staged();
            service_txn(
                &mut self.txn,
                &self.workers,
                &self.cancel,
                self.config.stall_warn_every,
                &mut self.txn_ns,
            )?;
            if let Some(handle) = self.pool.try_acquire() {
                return Ok(handle);
            }
            if wait.pause() {
                tracing::warn!(
                    capacity = self.pool.capacity(),
                    waits = wait.iterations(),
                    "redo item pool exhausted, waiting for workers to release items"
                );
            }
        }
    }

    /// Flushes the pending buffers into the worker queues and drives the
    /// transaction worker; with `full_sync`, additionally drains the
    /// transaction queue completely and blocks until every page worker is
    /// idle.
    fn process_pending(&mut self, full_sync: bool) -> Result<(), DispatchError> {
        let started = Instant::now();
        let count = self.workers.ready_count() as usize;
        let mut wait = BackoffWait::new(self.config.stall_warn_every);
        for worker in 0..count {
            while let Some(message) = self.pending[worker].pop_front() {
                let mut message = message;
                loop {
                    match self.workers.ready()[worker].enqueue(message) {
                        Ok(()) => break,
                        Err(back) => {
                            message = back;
                            if self.cancel.is_cancelled() {
                                self.pending[worker].push_front(message);
                                return Err(DispatchError::Cancelled);
                            }
                            service_txn(
                                &mut self.txn,
                                &self.workers,
                                &self.cancel,
                                self.config.stall_warn_every,
                                &mut self.txn_ns,
                            )?;
                            if wait.pause() {
                                tracing::warn!(
                                    worker,
                                    waits = wait.iterations(),
                                    "page worker queue full, backing off"
                                );
                            }
                        }
                    }
                }
            }
        }

        self.txn.promote_pending();
        let txn_started = Instant::now();
        self.txn.apply_ready(
            full_sync,
            self.workers.ready(),
            &self.cancel,
            self.config.stall_warn_every,
        )?;
        self.txn_ns += txn_started.elapsed().as_nanos() as u64;

        if full_sync {
            let mut wait = BackoffWait::new(self.config.stall_warn_every);
            loop {
                if self.cancel.is_cancelled() {
                    return Err(DispatchError::Cancelled);
                }
                if self.workers.ready().iter().all(crate::worker::PageWorkerHandle::is_idle) {
                    break;
                }
                if wait.pause() {
                    tracing::warn!(
                        target_lsn = self.last_end_lsn,
                        waits = wait.iterations(),
                        "waiting for page workers to drain for full sync"
                    );
                }
            }
        }
        self.pending_count = 0;
        self.drain_ns += started.elapsed().as_nanos() as u64;
        Ok(())
    }

    /// Minimum replay position over busy workers: the safe bound for
    /// restart points. `None` when every worker is idle.
    #[must_use]
    pub fn replay_position(&self) -> Option<(Lsn, Lsn)> {
        let mut position: Option<(Lsn, Lsn)> = None;
        for worker in self.workers.ready().iter().filter(|w| !w.is_idle()) {
            let (read, end) = (worker.read_lsn(), worker.replayed_lsn());
            position = Some(match position {
                None => (read, end),
                Some((min_read, min_end)) => (min_read.min(read), min_end.min(end)),
            });
        }
        position
    }

    /// Drains everything and sends the end-of-recovery mark to every
    /// worker, waiting for acknowledgement.
    ///
    /// Idempotent: a second call after `Done` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Cancelled`] when cancelled mid-drain.
    pub fn finish(&mut self, exit_code: i32) -> Result<(), DispatchError> {
        if self.state == RecoveryState::Done {
            return Ok(());
        }
        self.exit_code = exit_code;
        self.process_pending(true)?;
        let count = self.workers.ready_count() as usize;
        for worker in 0..count {
            let mut wait = BackoffWait::new(self.config.stall_warn_every);
            loop {
                match self.workers.ready()[worker].enqueue(PageMessage::EndMark) {
                    Ok(()) => break,
                    Err(_) => {
                        if self.cancel.is_cancelled() {
                            return Err(DispatchError::Cancelled);
                        }
                        service_txn(
                            &mut self.txn,
                            &self.workers,
                            &self.cancel,
                            self.config.stall_warn_every,
                            &mut self.txn_ns,
                        )?;
                        if wait.pause() {
                            tracing::warn!(worker, "retrying end-of-recovery mark");
                        }
                    }
                }
            }
        }
        for worker in 0..count {
            let mut wait = BackoffWait::new(self.config.stall_warn_every);
            while !self.workers.ready()[worker].reached_end_mark() {
                if self.cancel.is_cancelled() {
                    return Err(DispatchError::Cancelled);
                }
                if wait.pause() {
                    tracing::warn!(worker, "waiting for end mark acknowledgement");
                }
            }
        }
        self.state = RecoveryState::Done;
        tracing::info!(
            exit_code,
            records = self.records_dispatched,
            dispatch_ms = self.dispatch_ns / 1_000_000,
            txn_ms = self.txn_ns / 1_000_000,
            drain_ms = self.drain_ns / 1_000_000,
            "parallel redo dispatch finished"
        );
        Ok(())
    }

    /// Terminates the workers, waits for them to exit, and reclaims the
    /// pool. Safe to call more than once; later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShutdownTimeout`] (after dumping state)
    /// when workers outlive the configured bound.
    pub fn shutdown(&mut self) -> Result<(), DispatchError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let result = self.workers.stop(&self.config);
        if result.is_err() {
            self.dump();
        }
        self.pool.reclaim();
        result
    }

    /// Telemetry snapshot.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            state: self.state,
            exit_code: self.exit_code,
            records_dispatched: self.records_dispatched,
            pending_records: self.pending_count,
            workers: self
                .workers
                .all()
                .iter()
                .map(|w| WorkerStats {
                    id: w.id(),
                    original_id: w.original_id(),
                    state: w.state(),
                    queue_depth: w.queue_depth(),
                    queue_max_depth: w.queue_max_depth(),
                    queue_total: w.queue_total(),
                    records_applied: w.records_applied(),
                    read_lsn: w.read_lsn(),
                    replayed_lsn: w.replayed_lsn(),
                })
                .collect(),
            txn_applied: self.txn.applied_records(),
            txn_queued: self.txn.queued(),
            txn_position: self.txn.position(),
            pool: PoolStats {
                capacity: self.pool.capacity(),
                allocated: self.pool.allocated(),
                local_free: self.pool.local_free_len(),
            },
            dispatch_ns: self.dispatch_ns,
            txn_ns: self.txn_ns,
            drain_ns: self.drain_ns,
        }
    }

    /// Logs the full dispatcher state at error level. Called before
    /// fatal returns so the post-mortem has everything.
    fn dump(&self) {
        tracing::error!(
            state = ?self.state,
            pending = self.pending_count,
            records = self.records_dispatched,
            last_end_lsn = self.last_end_lsn,
            pool_allocated = self.pool.allocated(),
            pool_capacity = self.pool.capacity(),
            "dispatcher state dump"
        );
        for worker in self.workers.all() {
            tracing::error!(
                id = worker.id(),
                original_id = worker.original_id(),
                state = ?worker.state(),
                queue_depth = worker.queue_depth(),
                queue_max_depth = worker.queue_max_depth(),
                records = worker.records_applied(),
                replayed_lsn = worker.replayed_lsn(),
                "page worker state"
            );
        }
        tracing::error!(
            queued = self.txn.queued(),
            applied = self.txn.applied_records(),
            position = self.txn.position(),
            "transaction worker state"
        );
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("workers", &self.workers.ready_count())
            .field("records_dispatched", &self.records_dispatched)
            .field("pending", &self.pending_count)
            .finish_non_exhaustive()
    }
}

fn service_txn(
    txn: &mut TxnWorker,
    workers: &WorkerSet,
    cancel: &CancelToken,
    warn_every: u64,
    txn_ns: &mut u64,
) -> Result<(), DispatchError> {
    let started = Instant::now();
    txn.promote_pending();
    txn.apply_ready(false, workers.ready(), cancel, warn_every)?;
    *txn_ns += started.elapsed().as_nanos() as u64;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::RedoItem;
    use crate::record::{BlockRef, ForkKind, PageTag, RelFileLocator};
    use crate::worker::PageRedo;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    type PageLog = Arc<Mutex<Vec<(u32, Lsn, Instant)>>>;
    type TxnLog = Arc<Mutex<Vec<(Lsn, Instant)>>>;

    struct RecordingPage {
        id: u32,
        log: PageLog,
    }

    impl PageRedo for RecordingPage {
        fn apply(&mut self, item: &RedoItem) {
            self.log
                .lock()
                .unwrap()
                .push((self.id, item.end_lsn, Instant::now()));
        }
    }

    struct RecordingTxn {
        log: TxnLog,
    }

    impl TxnRedo for RecordingTxn {
        fn apply(&mut self, item: &RedoItem) {
            self.log
                .lock()
                .unwrap()
                .push((item.end_lsn, Instant::now()));
        }
    }

    fn test_config(workers: usize, pending_max: u32, hot_standby: bool) -> DispatchConfig {
        DispatchConfig::builder()
            .page_workers(workers)
            .queue_capacity(32)
            .fanout_ratio(2)
            .pending_max(pending_max)
            .hot_standby(hot_standby)
            .ready_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn start(
        config: DispatchConfig,
    ) -> (Dispatcher, PageLog, TxnLog) {
        let page_log: PageLog = Arc::new(Mutex::new(Vec::new()));
        let txn_log: TxnLog = Arc::new(Mutex::new(Vec::new()));
        let factory = {
            let log = Arc::clone(&page_log);
            move |id: u32| -> Box<dyn PageRedo> {
                Box::new(RecordingPage {
                    id,
                    log: Arc::clone(&log),
                })
            }
        };
        let dispatcher = Dispatcher::start(
            config,
            &factory,
            Box::new(RecordingTxn {
                log: Arc::clone(&txn_log),
            }),
        )
        .unwrap();
        (dispatcher, page_log, txn_log)
    }

    fn tag(rel: u32, block: u32) -> PageTag {
        PageTag {
            rel: RelFileLocator {
                spc: 1663,
                db: 16384,
                rel,
            },
            fork: ForkKind::Main,
            block,
        }
    }

    fn heap_insert<'a>(lsn: Lsn, blocks: &'a [BlockRef<'a>]) -> DecodedRecord<'a> {
        DecodedRecord {
            blocks,
            ..DecodedRecord::new(
                ResourceManager::Heap.id(),
                opcodes::HEAP_INSERT,
                lsn,
                lsn + 0x40,
            )
        }
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::yield_now();
        }
        false
    }

    #[test]
    fn pending_records_batch_until_threshold() {
        let (mut dispatcher, _pages, _txn) = start(test_config(2, 8, false));
        let blocks = [BlockRef {
            tag: tag(5000, 1),
            data: &[],
        }];
        dispatcher.dispatch(&heap_insert(0x100, &blocks)).unwrap();
        let stats = dispatcher.stats();
        assert_eq!(stats.pending_records, 1);
        assert!(stats.workers.iter().all(|w| w.queue_total == 0));

        for i in 1..8u64 {
            dispatcher
                .dispatch(&heap_insert(0x100 + i * 0x40, &blocks))
                .unwrap();
        }
        let stats = dispatcher.stats();
        assert_eq!(stats.pending_records, 0);
        assert!(stats.workers.iter().any(|w| w.queue_total > 0));
        dispatcher.finish(0).unwrap();
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn full_sync_record_drains_everything() {
        let (mut dispatcher, _pages, _txn) = start(test_config(3, 4, false));
        let blocks = [BlockRef {
            tag: tag(6000, 9),
            data: b"page image",
        }];
        dispatcher.dispatch(&heap_insert(0x100, &blocks)).unwrap();
        dispatcher.dispatch(&heap_insert(0x140, &blocks)).unwrap();

        let drop_rec = DecodedRecord::new(
            ResourceManager::Tablespace.id(),
            opcodes::TBLSPC_DROP,
            0x180,
            0x1C0,
        );
        dispatcher.dispatch(&drop_rec).unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.pending_records, 0);
        for worker in stats.workers.iter().take(3) {
            assert_eq!(worker.queue_depth, 0);
            assert_eq!(worker.replayed_lsn, 0x1C0, "worker {} lagging", worker.id);
        }
        assert_eq!(stats.txn_position, 0x1C0);
        assert_eq!(dispatcher.replay_position(), None);
        dispatcher.finish(0).unwrap();
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn lsn_coverage_reaches_every_worker_at_finish() {
        let (mut dispatcher, pages, _txn) = start(test_config(3, 1, false));
        let blocks = [BlockRef {
            tag: tag(7000, 3),
            data: &[],
        }];
        // Transaction-routed, targeted, then broadcast.
        let clog = DecodedRecord::new(
            ResourceManager::Clog.id(),
            opcodes::CLOG_ZERO_PAGE,
            0x100,
            0x140,
        );
        dispatcher.dispatch(&clog).unwrap();
        dispatcher.dispatch(&heap_insert(0x140, &blocks)).unwrap();
        let checkpoint = DecodedRecord::new(
            ResourceManager::Xlog.id(),
            opcodes::XLOG_CHECKPOINT_ONLINE,
            0x180,
            0x1C0,
        );
        dispatcher.dispatch(&checkpoint).unwrap();
        dispatcher.finish(0).unwrap();

        let stats = dispatcher.stats();
        for worker in stats.workers.iter() {
            assert_eq!(worker.replayed_lsn, 0x1C0, "worker {} has a gap", worker.id);
        }
        assert_eq!(stats.txn_position, 0x1C0);
        assert_eq!(stats.records_dispatched, 3);
        assert_eq!(stats.exit_code, 0);
        assert_eq!(dispatcher.state(), RecoveryState::Done);

        // Per-worker applied LSNs must be strictly increasing.
        let log = pages.lock().unwrap();
        for id in 0..3 {
            let applied: Vec<Lsn> = log
                .iter()
                .filter(|(w, _, _)| *w == id)
                .map(|(_, lsn, _)| *lsn)
                .collect();
            assert!(applied.windows(2).all(|w| w[0] < w[1]));
        }
        drop(log);
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn synchronized_record_applies_pages_before_txn() {
        let (mut dispatcher, pages, txn) = start(test_config(2, 1, false));
        let rels = [RelFileLocator {
            spc: 1663,
            db: 16384,
            rel: 8000,
        }];
        let commit = DecodedRecord {
            dropped_rels: &rels,
            main_data: b"commit with file drops",
            ..DecodedRecord::new(
                ResourceManager::Transaction.id(),
                opcodes::XACT_COMMIT,
                0x200,
                0x240,
            )
        };
        dispatcher.dispatch(&commit).unwrap();
        dispatcher.finish(0).unwrap();

        let page_applied = pages
            .lock()
            .unwrap()
            .iter()
            .find(|(_, lsn, _)| *lsn == 0x240)
            .map(|&(_, _, at)| at)
            .expect("chosen page worker applied the commit");
        let txn_applied = txn
            .lock()
            .unwrap()
            .iter()
            .find(|(lsn, _)| *lsn == 0x240)
            .map(|&(_, at)| at)
            .expect("transaction worker applied the commit");
        assert!(page_applied <= txn_applied);
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn blocked_index_vacuum_waits_for_txn_marker() {
        let (mut dispatcher, pages, _txn) = start(test_config(2, 1, true));
        let blocks = [BlockRef {
            tag: tag(9000, 12),
            data: &[],
        }];
        let vacuum = DecodedRecord {
            blocks: &blocks,
            ..DecodedRecord::new(
                ResourceManager::Gin.id(),
                opcodes::GIN_VACUUM_PAGE,
                0x300,
                0x340,
            )
        };
        dispatcher.dispatch(&vacuum).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            pages
                .lock()
                .unwrap()
                .iter()
                .any(|(_, lsn, _)| *lsn == 0x340)
        }));
        assert!(dispatcher.stats().txn_position >= 0x340);
        dispatcher.finish(0).unwrap();
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn malformed_record_is_broadcast_then_fatal() {
        let (mut dispatcher, pages, txn) = start(test_config(3, 4, false));
        let bogus = DecodedRecord::new(99, 0x00, 0x400, 0x440);
        let err = dispatcher.dispatch(&bogus);
        assert!(matches!(
            err,
            Err(DispatchError::MalformedRecord { rmid: 99, info: 0x00 })
        ));
        // Conservative containment: every worker and the transaction
        // worker saw the record before the error surfaced.
        let log = pages.lock().unwrap();
        for id in 0..3 {
            assert!(log.iter().any(|(w, lsn, _)| *w == id && *lsn == 0x440));
        }
        drop(log);
        assert!(txn.lock().unwrap().iter().any(|(lsn, _)| *lsn == 0x440));
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn invalid_opcode_is_malformed() {
        let (mut dispatcher, _pages, _txn) = start(test_config(2, 1, false));
        let bad = DecodedRecord::new(
            ResourceManager::Storage.id(),
            opcodes::SMGR_TRUNCATE + 0x10,
            0x500,
            0x540,
        );
        assert!(matches!(
            dispatcher.dispatch(&bad),
            Err(DispatchError::MalformedRecord { .. })
        ));
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn degraded_start_runs_with_ready_subset() {
        struct SlowStart;
        impl PageRedo for SlowStart {
            fn on_start(&mut self) {
                std::thread::sleep(Duration::from_millis(600));
            }
            fn apply(&mut self, _item: &RedoItem) {}
        }
        let page_log: PageLog = Arc::new(Mutex::new(Vec::new()));
        let factory = {
            let log = Arc::clone(&page_log);
            move |id: u32| -> Box<dyn PageRedo> {
                if id >= 2 {
                    Box::new(SlowStart)
                } else {
                    Box::new(RecordingPage {
                        id,
                        log: Arc::clone(&log),
                    })
                }
            }
        };
        let config = DispatchConfig::builder()
            .page_workers(4)
            .queue_capacity(32)
            .fanout_ratio(2)
            .pending_max(1)
            .ready_timeout(Duration::from_millis(200))
            .ready_poll_interval(Duration::from_millis(2))
            .build()
            .unwrap();
        let mut dispatcher = Dispatcher::start(
            config,
            &factory,
            Box::new(RecordingTxn {
                log: Arc::new(Mutex::new(Vec::new())),
            }),
        )
        .unwrap();
        assert_eq!(dispatcher.worker_count(), 2);

        let blocks = [BlockRef {
            tag: tag(4000, 7),
            data: &[],
        }];
        dispatcher.dispatch(&heap_insert(0x100, &blocks)).unwrap();
        dispatcher.finish(0).unwrap();
        assert!(page_log.lock().unwrap().iter().any(|(_, lsn, _)| *lsn == 0x140));
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (mut dispatcher, _pages, _txn) = start(test_config(2, 1, false));
        dispatcher.finish(7).unwrap();
        assert_eq!(dispatcher.exit_code(), 7);
        dispatcher.shutdown().unwrap();
        dispatcher.shutdown().unwrap();
        // finish after Done is also a no-op.
        dispatcher.finish(0).unwrap();
        assert_eq!(dispatcher.exit_code(), 7);
    }

    #[test]
    fn routing_is_deterministic_across_dispatchers() {
        let blocks = [BlockRef {
            tag: tag(12345, 42),
            data: &[],
        }];
        let mut totals = Vec::new();
        for _ in 0..2 {
            let (mut dispatcher, _pages, _txn) = start(test_config(4, 1, false));
            dispatcher.dispatch(&heap_insert(0x100, &blocks)).unwrap();
            dispatcher.finish(0).unwrap();
            let stats = dispatcher.stats();
            let chosen: Vec<u32> = stats
                .workers
                .iter()
                .filter(|w| w.records_applied > 0)
                .map(|w| w.id)
                .collect();
            assert_eq!(chosen.len(), 1);
            totals.push(chosen[0]);
            dispatcher.shutdown().unwrap();
        }
        assert_eq!(totals[0], totals[1]);
    }

    #[test]
    fn database_drop_flags_immediate_checkpoint() {
        struct FlagCheck {
            saw_checkpoint_flag: Arc<Mutex<bool>>,
        }
        impl TxnRedo for FlagCheck {
            fn apply(&mut self, item: &RedoItem) {
                if item.immediate_checkpoint {
                    *self.saw_checkpoint_flag.lock().unwrap() = true;
                }
            }
        }
        let saw = Arc::new(Mutex::new(false));
        let page_log: PageLog = Arc::new(Mutex::new(Vec::new()));
        let factory = {
            let log = Arc::clone(&page_log);
            move |id: u32| -> Box<dyn PageRedo> {
                Box::new(RecordingPage {
                    id,
                    log: Arc::clone(&log),
                })
            }
        };
        let mut dispatcher = Dispatcher::start(
            test_config(2, 1, false),
            &factory,
            Box::new(FlagCheck {
                saw_checkpoint_flag: Arc::clone(&saw),
            }),
        )
        .unwrap();
        let drop_db = DecodedRecord::new(
            ResourceManager::Database.id(),
            opcodes::DBASE_DROP,
            0x600,
            0x640,
        );
        dispatcher.dispatch(&drop_db).unwrap();
        assert!(*saw.lock().unwrap());
        // Full sync: both workers applied the broadcast copy too.
        assert!(page_log.lock().unwrap().len() >= 2);
        dispatcher.finish(0).unwrap();
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn exhausted_pool_flushes_staged_items() {
        // One worker, tiny queue, one-to-one fanout: pool capacity is
        // (1 + 1) * 2 * 1 = 4, while the pending threshold of 8 would
        // keep every staged item invisible to the worker. The dispatcher
        // must deliver staged items while it waits for the pool.
        let config = DispatchConfig::builder()
            .page_workers(1)
            .queue_capacity(2)
            .fanout_ratio(1)
            .pending_max(8)
            .ready_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let (mut dispatcher, _pages, _txn) = start(config);
        for i in 0..6u64 {
            dispatcher.dispatch(&heap_insert(0x100 + i * 0x40, &[])).unwrap();
        }
        dispatcher.finish(0).unwrap();
        let stats = dispatcher.stats();
        assert_eq!(stats.records_dispatched, 6);
        assert_eq!(stats.workers[0].replayed_lsn, 0x100 + 6 * 0x40);
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn tablespace_create_reaches_every_page_worker() {
        let (mut dispatcher, pages, _txn) = start(test_config(2, 1, false));
        let create = DecodedRecord::new(
            ResourceManager::Tablespace.id(),
            opcodes::TBLSPC_CREATE,
            0x100,
            0x140,
        );
        dispatcher.dispatch(&create).unwrap();
        dispatcher.finish(0).unwrap();
        let log = pages.lock().unwrap();
        for id in 0..2 {
            assert!(
                log.iter().any(|(w, lsn, _)| *w == id && *lsn == 0x140),
                "worker {id} missed the tablespace create"
            );
        }
        drop(log);
        assert_eq!(dispatcher.stats().txn_position, 0x140);
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn spgist_redirect_vacuum_is_applied_by_txn_worker() {
        let (mut dispatcher, pages, txn) = start(test_config(2, 1, true));
        let blocks = [BlockRef {
            tag: tag(9500, 4),
            data: &[],
        }];
        let redirect = DecodedRecord {
            blocks: &blocks,
            ..DecodedRecord::new(
                ResourceManager::Spgist.id(),
                opcodes::SPGIST_VACUUM_REDIRECT,
                0x300,
                0x340,
            )
        };
        dispatcher.dispatch(&redirect).unwrap();
        dispatcher.finish(0).unwrap();

        // The transaction worker replays the record itself, after the
        // owning page worker has.
        let page_applied = pages
            .lock()
            .unwrap()
            .iter()
            .find(|(_, lsn, _)| *lsn == 0x340)
            .map(|&(_, _, at)| at)
            .expect("owning page worker applied the redirect vacuum");
        let txn_applied = txn
            .lock()
            .unwrap()
            .iter()
            .find(|(lsn, _)| *lsn == 0x340)
            .map(|&(_, at)| at)
            .expect("transaction worker applied the redirect vacuum");
        assert!(page_applied <= txn_applied);
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn relation_mode_commit_with_drops_reaches_every_worker() {
        let config = DispatchConfig::builder()
            .page_workers(3)
            .queue_capacity(32)
            .fanout_ratio(2)
            .pending_max(1)
            .page_level_routing(false)
            .ready_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let (mut dispatcher, pages, txn) = start(config);
        let rels = [RelFileLocator {
            spc: 1663,
            db: 16384,
            rel: 8100,
        }];
        let commit = DecodedRecord {
            dropped_rels: &rels,
            ..DecodedRecord::new(
                ResourceManager::Transaction.id(),
                opcodes::XACT_COMMIT,
                0x200,
                0x240,
            )
        };
        dispatcher.dispatch(&commit).unwrap();
        dispatcher.finish(0).unwrap();
        let log = pages.lock().unwrap();
        for id in 0..3 {
            assert!(
                log.iter().any(|(w, lsn, _)| *w == id && *lsn == 0x240),
                "worker {id} missed the commit with drops"
            );
        }
        drop(log);
        assert!(txn.lock().unwrap().iter().any(|(lsn, _)| *lsn == 0x240));
        dispatcher.shutdown().unwrap();
    }
}
