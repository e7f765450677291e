//! Worker lifecycle: spawning, the readiness barrier with degraded-mode
//! rearrangement, and supervised shutdown.

use std::sync::Arc;
use std::time::Instant;

use crate::config::DispatchConfig;
use crate::control::{BackoffWait, CancelToken};
use crate::pool::PoolShared;
use crate::txn::TxnProgress;
use crate::worker::{PageRedoFactory, PageWorkerHandle, WorkerState};
use crate::DispatchError;

/// The set of spawned page workers. Ready workers are compacted to the
/// front and hold ids `0..ready_count`; late or failed workers stay in
/// the set for shutdown bookkeeping but never receive work.
#[derive(Debug)]
pub(crate) struct WorkerSet {
    workers: Vec<PageWorkerHandle>,
    ready_count: u32,
}

impl WorkerSet {
    pub(crate) fn spawn<F: PageRedoFactory>(
        config: &DispatchConfig,
        pool: &Arc<PoolShared>,
        txn_progress: &Arc<TxnProgress>,
        cancel: &CancelToken,
        factory: &F,
    ) -> Result<Self, DispatchError> {
        let mut workers = Vec::with_capacity(config.page_workers);
        for id in 0..config.page_workers as u32 {
            let redo = factory.create(id);
            workers.push(PageWorkerHandle::spawn(
                id,
                config.queue_capacity,
                Arc::clone(pool),
                Arc::clone(txn_progress),
                cancel.clone(),
                config.stall_warn_every,
                redo,
            )?);
        }
        Ok(Self {
            workers,
            ready_count: 0,
        })
    }

    /// Blocks until every worker is ready or the timeout elapses, then
    /// compacts ready workers to ids `0..ready_count`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoReadyWorkers`] when nothing became
    /// ready in time.
    pub(crate) fn wait_ready(&mut self, config: &DispatchConfig) -> Result<u32, DispatchError> {
        let deadline = Instant::now() + config.ready_timeout;
        loop {
            let ready = self
                .workers
                .iter()
                .filter(|w| w.state() == WorkerState::Ready)
                .count();
            if ready == self.workers.len() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(config.ready_poll_interval);
        }
        self.rearrange();
        if self.ready_count == 0 {
            tracing::error!(
                requested = self.workers.len(),
                timeout_ms = config.ready_timeout.as_millis() as u64,
                "no page worker became ready"
            );
            return Err(DispatchError::NoReadyWorkers {
                timeout_ms: config.ready_timeout.as_millis() as u64,
            });
        }
        if (self.ready_count as usize) < self.workers.len() {
            tracing::warn!(
                requested = self.workers.len(),
                ready = self.ready_count,
                "starting parallel redo in degraded mode"
            );
        }
        Ok(self.ready_count)
    }

    fn rearrange(&mut self) {
        // Snapshot each worker's state once so a worker turning ready
        // mid-rearrangement cannot split the partition.
        let mut ready = Vec::with_capacity(self.workers.len());
        let mut rest = Vec::new();
        for worker in self.workers.drain(..) {
            if worker.state() == WorkerState::Ready {
                ready.push(worker);
            } else {
                rest.push(worker);
            }
        }
        for (id, worker) in ready.iter_mut().enumerate() {
            worker.set_id(id as u32);
        }
        self.ready_count = ready.len() as u32;
        ready.extend(rest);
        self.workers = ready;
    }

    /// The ready workers, ids `0..ready_count`.
    pub(crate) fn ready(&self) -> &[PageWorkerHandle] {
        &self.workers[..self.ready_count as usize]
    }

    /// Every spawned worker, ready or not.
    pub(crate) fn all(&self) -> &[PageWorkerHandle] {
        &self.workers
    }

    pub(crate) fn ready_count(&self) -> u32 {
        self.ready_count
    }

    /// Signals termination to every worker, waits for all of them to
    /// leave `Ready`, then joins the threads.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShutdownTimeout`] when workers are still
    /// live past the configured bound; threads are left unjoined in that
    /// case.
    pub(crate) fn stop(&mut self, config: &DispatchConfig) -> Result<(), DispatchError> {
        for worker in &self.workers {
            worker.signal_shutdown();
        }
        let deadline = Instant::now() + config.shutdown_timeout;
        let mut wait = BackoffWait::new(config.stall_warn_every);
        while self
            .workers
            .iter()
            .any(|w| w.state() == WorkerState::Ready)
        {
            if Instant::now() >= deadline {
                return Err(DispatchError::ShutdownTimeout {
                    timeout_ms: config.shutdown_timeout.as_millis() as u64,
                });
            }
            if wait.pause() {
                let live = self
                    .workers
                    .iter()
                    .filter(|w| w.state() == WorkerState::Ready)
                    .count();
                tracing::warn!(live, "waiting for page workers to exit");
            }
        }
        for worker in &mut self.workers {
            worker.join();
        }
        tracing::info!(workers = self.workers.len(), "page workers stopped");
        Ok(())
    }
}
