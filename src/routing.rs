//! The record routing table: one row per resource manager pairing an
//! opcode validity check with a dispatch strategy.
//!
//! The table is verified against the resource-manager catalog once at
//! startup, and every record is re-checked against its row before the
//! engine acts on it; a record that fails either check is treated as
//! malformed and handled conservatively rather than trusted.

use crate::record::{opcodes, ResourceManager, RESOURCE_MANAGER_COUNT};
use crate::DispatchError;

/// Opcode validity check for one resource manager.
#[derive(Debug, Clone, Copy)]
pub enum OpcodeCheck {
    /// The masked opcode must fall in `min..=max`.
    MaskedRange {
        /// Mask applied to the info byte before comparison.
        mask: u8,
        /// Lowest valid opcode.
        min: u8,
        /// Highest valid opcode.
        max: u8,
    },
    /// The masked opcode must be one of an enumerated set.
    OneOf(&'static [u8]),
}

impl OpcodeCheck {
    /// Whether `info` carries a valid opcode under this check.
    #[must_use]
    pub fn accepts(self, info: u8) -> bool {
        match self {
            Self::MaskedRange { mask, min, max } => {
                let op = info & mask;
                op >= min && op <= max
            }
            Self::OneOf(set) => set.contains(&(info & opcodes::STANDARD_OPMASK)),
        }
    }
}

/// How the engine fans out records of one resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// Control records: checkpoints broadcast, full-page images target
    /// by block, the rest route through the transaction worker.
    Control,
    /// Commit/abort/prepare, with relation-drop synchronization.
    Transaction,
    /// Storage create (single worker) and truncate (synchronized).
    Storage,
    /// Database create/drop: broadcast, drop forces a full sync.
    Database,
    /// Tablespace create/drop: create broadcasts, drop forces a full
    /// sync.
    Tablespace,
    /// Standby bookkeeping; running-xacts may force a full sync.
    Standby,
    /// Heap row changes: targeted by block.
    HeapPage,
    /// Heap maintenance: targeted, with relation-scoped exceptions.
    HeapMaintenance,
    /// B-tree changes: targeted, page reuse routes to the transaction
    /// worker.
    Btree,
    /// GIN changes; vacuum class blocks on the transaction worker under
    /// hot standby.
    GinIndex,
    /// GiST changes; page updates block on the transaction worker under
    /// hot standby.
    GistIndex,
    /// SP-GiST changes; vacuum class blocks on the transaction worker
    /// under hot standby.
    SpgistIndex,
    /// Targeted to one worker by relation key.
    RelationPage,
    /// Routed to the transaction worker with LSN markers to every page
    /// worker; `full_sync` additionally drains everything.
    TxnRouted {
        /// Whether records of this manager always force a full sync.
        full_sync: bool,
    },
}

/// One routing-table row.
#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
    /// Resource manager this row claims to describe.
    pub rm: ResourceManager,
    /// Opcode validity check; `None` accepts everything.
    pub check: Option<OpcodeCheck>,
    /// Strategy the engine applies to valid records.
    pub strategy: DispatchStrategy,
}

const fn masked(mask: u8, min: u8, max: u8) -> Option<OpcodeCheck> {
    Some(OpcodeCheck::MaskedRange { mask, min, max })
}

const fn standard(min: u8, max: u8) -> Option<OpcodeCheck> {
    masked(opcodes::STANDARD_OPMASK, min, max)
}

const GIST_OPCODES: &[u8] = &[
    opcodes::GIST_PAGE_UPDATE,
    opcodes::GIST_PAGE_SPLIT,
    opcodes::GIST_CREATE_INDEX,
];

const ROUTES: [RouteEntry; RESOURCE_MANAGER_COUNT] = [
    RouteEntry {
        rm: ResourceManager::Xlog,
        check: standard(opcodes::XLOG_CHECKPOINT_SHUTDOWN, opcodes::XLOG_FPI_FOR_HINT),
        strategy: DispatchStrategy::Control,
    },
    RouteEntry {
        rm: ResourceManager::Transaction,
        check: standard(opcodes::XACT_COMMIT, opcodes::XACT_ABORT_PREPARED),
        strategy: DispatchStrategy::Transaction,
    },
    RouteEntry {
        rm: ResourceManager::Storage,
        check: standard(opcodes::SMGR_CREATE, opcodes::SMGR_TRUNCATE),
        strategy: DispatchStrategy::Storage,
    },
    RouteEntry {
        rm: ResourceManager::Clog,
        check: standard(opcodes::CLOG_ZERO_PAGE, opcodes::CLOG_TRUNCATE),
        strategy: DispatchStrategy::TxnRouted { full_sync: false },
    },
    RouteEntry {
        rm: ResourceManager::Database,
        check: standard(opcodes::DBASE_CREATE, opcodes::DBASE_DROP),
        strategy: DispatchStrategy::Database,
    },
    RouteEntry {
        rm: ResourceManager::Tablespace,
        check: standard(opcodes::TBLSPC_CREATE, opcodes::TBLSPC_DROP),
        strategy: DispatchStrategy::Tablespace,
    },
    RouteEntry {
        rm: ResourceManager::MultiXact,
        check: standard(opcodes::MULTIXACT_ZERO_OFFSETS, opcodes::MULTIXACT_CREATE_ID),
        strategy: DispatchStrategy::TxnRouted { full_sync: false },
    },
    RouteEntry {
        rm: ResourceManager::RelMap,
        check: standard(opcodes::RELMAP_UPDATE, opcodes::RELMAP_UPDATE),
        strategy: DispatchStrategy::TxnRouted { full_sync: false },
    },
    RouteEntry {
        rm: ResourceManager::Standby,
        check: standard(opcodes::STANDBY_LOCK, opcodes::STANDBY_INVALIDATIONS),
        strategy: DispatchStrategy::Standby,
    },
    RouteEntry {
        rm: ResourceManager::Heap2,
        check: masked(
            opcodes::HEAP_OPMASK,
            opcodes::HEAP2_FREEZE,
            opcodes::HEAP2_LOGICAL_NEWPAGE,
        ),
        strategy: DispatchStrategy::HeapMaintenance,
    },
    RouteEntry {
        rm: ResourceManager::Heap,
        check: masked(
            opcodes::HEAP_OPMASK,
            opcodes::HEAP_INSERT,
            opcodes::HEAP_INPLACE,
        ),
        strategy: DispatchStrategy::HeapPage,
    },
    RouteEntry {
        rm: ResourceManager::Btree,
        check: standard(opcodes::BTREE_INSERT_LEAF, opcodes::BTREE_REUSE_PAGE),
        strategy: DispatchStrategy::Btree,
    },
    RouteEntry {
        rm: ResourceManager::Hash,
        check: None,
        strategy: DispatchStrategy::TxnRouted { full_sync: true },
    },
    RouteEntry {
        rm: ResourceManager::Gin,
        check: standard(opcodes::GIN_CREATE_INDEX, opcodes::GIN_VACUUM_DATA_LEAF),
        strategy: DispatchStrategy::GinIndex,
    },
    RouteEntry {
        rm: ResourceManager::Gist,
        check: Some(OpcodeCheck::OneOf(GIST_OPCODES)),
        strategy: DispatchStrategy::GistIndex,
    },
    RouteEntry {
        rm: ResourceManager::Sequence,
        check: standard(opcodes::SEQ_LOG, opcodes::SEQ_LOG),
        strategy: DispatchStrategy::RelationPage,
    },
    RouteEntry {
        rm: ResourceManager::Spgist,
        check: standard(opcodes::SPGIST_CREATE_INDEX, opcodes::SPGIST_VACUUM_REDIRECT),
        strategy: DispatchStrategy::SpgistIndex,
    },
    RouteEntry {
        rm: ResourceManager::ReplicationSlot,
        check: standard(opcodes::SLOT_CREATE, opcodes::SLOT_ADVANCE),
        strategy: DispatchStrategy::TxnRouted { full_sync: false },
    },
    RouteEntry {
        rm: ResourceManager::Heap3,
        check: standard(opcodes::HEAP3_NEW_CID, opcodes::HEAP3_REWRITE),
        strategy: DispatchStrategy::TxnRouted { full_sync: false },
    },
    RouteEntry {
        rm: ResourceManager::Barrier,
        check: None,
        strategy: DispatchStrategy::TxnRouted { full_sync: false },
    },
];

/// The fixed routing table, indexed by resource-manager id.
#[derive(Debug)]
pub struct RoutingTable {
    entries: [RouteEntry; RESOURCE_MANAGER_COUNT],
}

impl RoutingTable {
    /// Builds the routing table.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: ROUTES }
    }

    /// Verifies every row against the resource-manager catalog: the row
    /// at index `i` must claim manager id `i`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::RoutingTableCorrupt`] naming the first
    /// inconsistent row.
    pub fn verify(&self) -> Result<(), DispatchError> {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.rm.id() as usize != index {
                return Err(DispatchError::RoutingTableCorrupt {
                    index,
                    claimed: entry.rm.id(),
                });
            }
        }
        Ok(())
    }

    /// Classifies one record: resolves its route row, re-checks the row's
    /// claim, and validates the opcode.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MalformedRecord`] when the manager id is
    /// unknown, the row claim disagrees with the id, or the opcode check
    /// fails. The caller must then dispatch conservatively and abort.
    pub fn classify(&self, rmid: u8, info: u8) -> Result<DispatchStrategy, DispatchError> {
        let malformed = DispatchError::MalformedRecord { rmid, info };
        let Some(entry) = self.entries.get(rmid as usize) else {
            return Err(malformed);
        };
        if entry.rm.id() != rmid {
            return Err(malformed);
        }
        if let Some(check) = entry.check {
            if !check.accepts(info) {
                return Err(malformed);
            }
        }
        Ok(entry.strategy)
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
