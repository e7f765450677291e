//! Parallel WAL-replay dispatch engine.
//!
//! A single dispatcher thread reads decoded WAL records and fans them out
//! across a set of page-replay workers plus one transaction worker, while
//! preserving the ordering guarantees serial replay would give:
//!
//! ```text
//!                    ┌─────────────────────────┐
//!   decoded records  │        Dispatcher        │
//!  ─────────────────▶│  routing ▸ selection ▸   │
//!                    │  fan-out ▸ batching      │
//!                    └───┬───────┬───────┬──────┘
//!                        │ SPSC  │ SPSC  │
//!                   ┌────▼──┐ ┌──▼────┐  │ staged
//!                   │ page  │ │ page  │  │ items
//!                   │worker0│ │worker1│  ▼
//!                   └───────┘ └───────┘ transaction worker
//!                                       (driven from the
//!                                        dispatcher thread)
//! ```
//!
//! Records that touch pages go to the workers owning those pages; records
//! with no page affinity route through the transaction worker; LSN markers
//! fill the gaps so every worker observes a gap-free, strictly increasing
//! LSN sequence. A bounded item pool recycles record copies and doubles as
//! the flow-control valve against unbounded read-ahead.
//!
//! # Components
//!
//! - [`engine::Dispatcher`] - record classification and fan-out
//! - [`routing::RoutingTable`] - per-resource-manager dispatch strategies
//! - [`selector`] - stable hash partitioning of page keys onto workers
//! - [`pool::RedoItemPool`] - bounded, recyclable item allocator
//! - [`worker`] - page-worker threads and the [`worker::PageRedo`] hook
//! - [`txn`] - the transaction worker and its [`txn::TxnRedo`] hook
//! - [`lifecycle`] - startup barrier, degraded mode, shutdown
//!
//! # Example
//!
//! ```no_run
//! use parallel_redo::{DispatchConfig, Dispatcher};
//! use parallel_redo::record::DecodedRecord;
//! use parallel_redo::worker::PageRedo;
//! use parallel_redo::txn::TxnRedo;
//! use parallel_redo::item::RedoItem;
//!
//! struct PageApply;
//! impl PageRedo for PageApply {
//!     fn apply(&mut self, _item: &RedoItem) { /* replay the page change */ }
//! }
//! struct TxnApply;
//! impl TxnRedo for TxnApply {
//!     fn apply(&mut self, _item: &RedoItem) { /* replay the txn change */ }
//! }
//!
//! let config = DispatchConfig::builder().page_workers(4).build()?;
//! let factory = |_id: u32| -> Box<dyn PageRedo> { Box::new(PageApply) };
//! let mut dispatcher = Dispatcher::start(config, &factory, Box::new(TxnApply))?;
//! // for each decoded record: dispatcher.dispatch(&record)?;
//! dispatcher.finish(0)?;
//! dispatcher.shutdown()?;
//! # Ok::<(), parallel_redo::DispatchError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod control;
pub mod engine;
pub mod item;
pub mod lifecycle;
pub mod pool;
pub mod record;
pub mod routing;
pub mod selector;
pub mod spsc;
pub mod stats;
pub mod txn;
pub mod worker;

pub use config::DispatchConfig;
pub use control::{CancelToken, RecoveryState};
pub use engine::Dispatcher;
pub use item::RedoItem;
pub use record::{DecodedRecord, Lsn};
pub use stats::DispatcherStats;
pub use txn::TxnRedo;
pub use worker::{PageRedo, PageRedoFactory};

/// Errors surfaced by the dispatch engine.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A record failed the routing-table integrity checks: unknown
    /// resource manager, claim/index mismatch, or invalid opcode.
    /// The record has already been conservatively broadcast to every
    /// worker before this error is returned; the caller must abort the
    /// recovery pass.
    #[error("malformed record: resource manager {rmid}, info {info:#04x}")]
    MalformedRecord {
        /// Resource manager id carried by the record.
        rmid: u8,
        /// Raw info byte of the record.
        info: u8,
    },

    /// The routing table disagrees with the resource-manager catalog.
    #[error("routing table entry {index} claims resource manager id {claimed}")]
    RoutingTableCorrupt {
        /// Index of the corrupt row.
        index: usize,
        /// Resource manager id the row claims.
        claimed: u8,
    },

    /// The selector produced a worker id outside the live worker range.
    #[error("worker id {worker_id} out of range (worker count {worker_count})")]
    WorkerIdOutOfRange {
        /// Offending worker id.
        worker_id: u32,
        /// Number of live page workers.
        worker_count: u32,
    },

    /// A page-worker thread could not be spawned.
    #[error("failed to spawn page worker {worker_id}: {message}")]
    SpawnFailed {
        /// Id of the worker that failed to spawn.
        worker_id: u32,
        /// Underlying OS error.
        message: String,
    },

    /// No page worker reported ready within the startup timeout.
    #[error("no page worker became ready within {timeout_ms} ms")]
    NoReadyWorkers {
        /// Configured readiness timeout, in milliseconds.
        timeout_ms: u64,
    },

    /// Page workers failed to exit within the shutdown timeout.
    #[error("page workers failed to stop within {timeout_ms} ms")]
    ShutdownTimeout {
        /// Configured shutdown timeout, in milliseconds.
        timeout_ms: u64,
    },

    /// The recovery pass was cancelled while the dispatcher was blocked.
    #[error("recovery cancelled")]
    Cancelled,

    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
