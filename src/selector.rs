//! Worker selection: stable hash partitioning of page and relation keys
//! onto page-worker ids, and the per-record chosen-worker set.
//!
//! Selection is pure: the same key with the same worker count always maps
//! to the same worker, across calls and across processes. All records for
//! one page therefore land on one worker, which is what lets workers
//! replay without page-level locking.

use std::hash::{Hash, Hasher};

use fxhash::FxHasher;
use smallvec::SmallVec;

use crate::record::{PageTag, RelFileLocator};
use crate::DispatchError;

/// Sentinel returned when no workers are live.
pub const ANY_WORKER: u32 = u32::MAX;

fn partition<K: Hash>(key: &K, worker_count: u32) -> u32 {
    if worker_count == 0 {
        return ANY_WORKER;
    }
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() % u64::from(worker_count)) as u32
}

/// Maps a block to its owning worker by hashing the full page tag.
#[must_use]
#[inline]
pub fn block_worker(tag: &PageTag, worker_count: u32) -> u32 {
    partition(tag, worker_count)
}

/// Maps a relation to its owning worker by hashing the relation key.
///
/// Used for relation-granularity routing and for records that carry a
/// relation but no block reference.
#[must_use]
#[inline]
pub fn relation_worker(rel: &RelFileLocator, worker_count: u32) -> u32 {
    partition(rel, worker_count)
}

/// The set of workers chosen for one record, with per-worker hit counts.
///
/// Reset once per record; `add` is fed every selected worker id and the
/// fan-out patterns consult `is_chosen` / `distinct` afterwards.
#[derive(Debug)]
pub struct ChosenWorkers {
    hits: SmallVec<[u32; 8]>,
    distinct: u32,
}

impl ChosenWorkers {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hits: SmallVec::new(),
            distinct: 0,
        }
    }

    /// Clears the set and resizes it for `worker_count` workers.
    pub fn reset(&mut self, worker_count: u32) {
        self.hits.clear();
        self.hits.resize(worker_count as usize, 0);
        self.distinct = 0;
    }

    /// Records a hit for `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerIdOutOfRange`] when the id does not
    /// name a live worker.
    pub fn add(&mut self, worker_id: u32) -> Result<(), DispatchError> {
        let Some(slot) = self.hits.get_mut(worker_id as usize) else {
            return Err(DispatchError::WorkerIdOutOfRange {
                worker_id,
                worker_count: self.hits.len() as u32,
            });
        };
        if *slot == 0 {
            self.distinct += 1;
        }
        *slot += 1;
        Ok(())
    }

    /// Whether `worker_id` was chosen at least once.
    #[must_use]
    #[inline]
    pub fn is_chosen(&self, worker_id: u32) -> bool {
        self.hits.get(worker_id as usize).is_some_and(|&h| h > 0)
    }

    /// Number of distinct chosen workers.
    #[must_use]
    #[inline]
    pub fn distinct(&self) -> u32 {
        self.distinct
    }
}

impl Default for ChosenWorkers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ForkKind;

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

    #[test]
    fn block_selection_is_deterministic() {
        let t = tag(20001, 77);
        let first = block_worker(&t, 4);
        for _ in 0..100 {
            assert_eq!(block_worker(&t, 4), first);
        }
        assert!(first < 4);
    }

    #[test]
    fn relation_selection_is_deterministic() {
        let rel = RelFileLocator {
            spc: 1663,
            db: 16384,
            rel: 20001,
        };
        let first = relation_worker(&rel, 8);
        assert_eq!(relation_worker(&rel, 8), first);
        assert!(first < 8);
    }

    #[test]
    fn zero_workers_yields_sentinel() {
        assert_eq!(block_worker(&tag(1, 1), 0), ANY_WORKER);
    }

    #[test]
    fn blocks_spread_across_workers() {
        // Not a strict uniformity claim, just that the hash does not
        // collapse a spread of blocks onto one worker.
        let mut seen = [false; 4];
        for block in 0..256 {
            seen[block_worker(&tag(20001, block), 4) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn chosen_workers_tracks_distinct_hits() {
        let mut chosen = ChosenWorkers::new();
        chosen.reset(4);
        chosen.add(1).unwrap();
        chosen.add(1).unwrap();
        chosen.add(3).unwrap();
        assert_eq!(chosen.distinct(), 2);
        assert!(chosen.is_chosen(1));
        assert!(!chosen.is_chosen(0));
        assert!(chosen.is_chosen(3));
    }

    #[test]
    fn chosen_workers_rejects_out_of_range() {
        let mut chosen = ChosenWorkers::new();
        chosen.reset(2);
        assert!(matches!(
            chosen.add(2),
            Err(DispatchError::WorkerIdOutOfRange { worker_id: 2, worker_count: 2 })
        ));
    }

    #[test]
    fn reset_clears_previous_record() {
        let mut chosen = ChosenWorkers::new();
        chosen.reset(4);
        chosen.add(0).unwrap();
        chosen.reset(4);
        assert_eq!(chosen.distinct(), 0);
        assert!(!chosen.is_chosen(0));
    }
}
