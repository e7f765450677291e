//! Recyclable redo items: the owned record copies (and degenerate LSN
//! markers) that travel from the dispatcher to the workers through the
//! pool.

use crate::record::{DecodedRecord, Lsn, PageTag};

/// Which worker(s) an item was produced for. Informational for redo
/// hooks; the queues an item actually enters are what bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Designation {
    /// No specific affinity.
    AnyWorker,
    /// Broadcast to every page worker.
    AllWorkers,
    /// One specific page worker.
    PageWorker(u32),
    /// The transaction worker.
    TxnWorker,
}

/// Item payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A full record copy to be applied.
    Record,
    /// An LSN marker: advances the observer's position, applies nothing.
    LsnMarker,
}

/// Handle to a pool slot. Cheap to copy; the same handle may sit in
/// several worker queues when an item is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHandle(pub(crate) u32);

impl ItemHandle {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One block payload owned by a redo item.
#[derive(Debug, Clone)]
pub struct OwnedBlock {
    /// Page the block refers to.
    pub tag: PageTag,
    /// Backup block data, possibly empty.
    pub data: Vec<u8>,
}

/// An owned, recyclable copy of one record (or an LSN marker).
///
/// Buffers are retained across recycling, so steady-state dispatch does
/// not allocate.
#[derive(Debug)]
pub struct RedoItem {
    /// Record copy or LSN marker.
    pub kind: ItemKind,
    /// Resource manager id.
    pub rmid: u8,
    /// Raw info byte.
    pub info: u8,
    /// LSN the record starts at.
    pub read_lsn: Lsn,
    /// First LSN past the record.
    pub end_lsn: Lsn,
    /// Intended receiver(s).
    pub designation: Designation,
    /// Number of queues this item was produced for. Informational; the
    /// pool tracks its own consumer countdown for reclamation.
    pub expected_consumers: u32,
    /// The transaction worker holds this item until every page worker
    /// has replayed through it.
    pub share_with_txn: bool,
    /// The receiving page worker must wait for transaction-worker
    /// progress through this LSN before applying.
    pub blocked_by_txn: bool,
    /// The transaction side should force an immediate checkpoint after
    /// applying (database/tablespace drops).
    pub immediate_checkpoint: bool,
    /// Blocks the record touches, with payloads.
    pub blocks: Vec<OwnedBlock>,
    /// Record main data.
    pub main_data: Vec<u8>,
}

impl RedoItem {
    pub(crate) fn empty() -> Self {
        Self {
            kind: ItemKind::LsnMarker,
            rmid: 0,
            info: 0,
            read_lsn: 0,
            end_lsn: 0,
            designation: Designation::AnyWorker,
            expected_consumers: 0,
            share_with_txn: false,
            blocked_by_txn: false,
            immediate_checkpoint: false,
            blocks: Vec::new(),
            main_data: Vec::new(),
        }
    }

    /// Whether this item is an LSN marker.
    #[must_use]
    #[inline]
    pub fn is_marker(&self) -> bool {
        self.kind == ItemKind::LsnMarker
    }

    fn reset_flags(&mut self) {
        self.share_with_txn = false;
        self.blocked_by_txn = false;
        self.immediate_checkpoint = false;
    }

    /// Fills this item with a deep copy of `rec`, reusing buffers.
    pub(crate) fn assign_record(
        &mut self,
        rec: &DecodedRecord<'_>,
        designation: Designation,
        expected_consumers: u32,
    ) {
        self.kind = ItemKind::Record;
        self.rmid = rec.rmid;
        self.info = rec.info;
        self.read_lsn = rec.read_lsn;
        self.end_lsn = rec.end_lsn;
        self.designation = designation;
        self.expected_consumers = expected_consumers;
        self.reset_flags();
        self.main_data.clear();
        self.main_data.extend_from_slice(rec.main_data);
        self.blocks.truncate(rec.blocks.len());
        for (i, src) in rec.blocks.iter().enumerate() {
            if let Some(dst) = self.blocks.get_mut(i) {
                dst.tag = src.tag;
                dst.data.clear();
                dst.data.extend_from_slice(src.data);
            } else {
                self.blocks.push(OwnedBlock {
                    tag: src.tag,
                    data: src.data.to_vec(),
                });
            }
        }
    }

    /// Turns this item into an LSN marker for `rec`'s position.
    pub(crate) fn assign_marker(&mut self, rec: &DecodedRecord<'_>, designation: Designation) {
        self.kind = ItemKind::LsnMarker;
        self.rmid = rec.rmid;
        self.info = rec.info;
        self.read_lsn = rec.read_lsn;
        self.end_lsn = rec.end_lsn;
        self.designation = designation;
        self.expected_consumers = 1;
        self.reset_flags();
        self.blocks.clear();
        self.main_data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BlockRef, ForkKind, RelFileLocator};

    fn block(rel: u32, blockno: u32, data: &[u8]) -> BlockRef<'_> {
        BlockRef {
            tag: PageTag {
                rel: RelFileLocator {
                    spc: 1663,
                    db: 1,
                    rel,
                },
                fork: ForkKind::Main,
                block: blockno,
            },
            data,
        }
    }

    #[test]
    fn assign_record_deep_copies() {
        let blocks = [block(10, 1, b"alpha"), block(10, 2, b"beta")];
        let rec = DecodedRecord {
            blocks: &blocks,
            main_data: b"payload",
            ..DecodedRecord::new(10, 0x00, 0x1000, 0x1080)
        };
        let mut item = RedoItem::empty();
        item.assign_record(&rec, Designation::PageWorker(2), 1);
        assert_eq!(item.kind, ItemKind::Record);
        assert_eq!(item.blocks.len(), 2);
        assert_eq!(item.blocks[1].data, b"beta");
        assert_eq!(item.main_data, b"payload");
        assert_eq!(item.end_lsn, 0x1080);
    }

    #[test]
    fn recycling_resets_flags_and_reuses_buffers() {
        let blocks = [block(10, 1, b"some block payload")];
        let rec = DecodedRecord {
            blocks: &blocks,
            main_data: b"main",
            ..DecodedRecord::new(10, 0x00, 0x1000, 0x1080)
        };
        let mut item = RedoItem::empty();
        item.assign_record(&rec, Designation::AllWorkers, 3);
        item.share_with_txn = true;
        item.immediate_checkpoint = true;
        let data_capacity = item.main_data.capacity();

        let rec2 = DecodedRecord {
            main_data: b"x",
            ..DecodedRecord::new(3, 0x00, 0x1080, 0x10C0)
        };
        item.assign_record(&rec2, Designation::TxnWorker, 1);
        assert!(!item.share_with_txn);
        assert!(!item.immediate_checkpoint);
        assert!(item.blocks.is_empty());
        assert_eq!(item.main_data, b"x");
        assert!(item.main_data.capacity() >= data_capacity.min(4));
    }

    #[test]
    fn marker_carries_position_only() {
        let blocks = [block(10, 1, b"data")];
        let rec = DecodedRecord {
            blocks: &blocks,
            ..DecodedRecord::new(10, 0x20, 0x2000, 0x2040)
        };
        let mut item = RedoItem::empty();
        item.assign_record(&rec, Designation::PageWorker(0), 1);
        item.assign_marker(&rec, Designation::PageWorker(1));
        assert!(item.is_marker());
        assert!(item.blocks.is_empty());
        assert!(item.main_data.is_empty());
        assert_eq!(item.read_lsn, 0x2000);
        assert_eq!(item.end_lsn, 0x2040);
    }
}
