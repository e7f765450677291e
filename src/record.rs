//! WAL record identity: LSNs, page keys, the resource-manager catalog,
//! and the transient decoded-record view handed in by the decoding layer.

/// Log sequence number. Byte position in the WAL stream.
pub type Lsn = u64;

/// Physical relation identity: tablespace, database, relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelFileLocator {
    /// Tablespace oid.
    pub spc: u32,
    /// Database oid.
    pub db: u32,
    /// Relation file node.
    pub rel: u32,
}

/// Relation fork a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForkKind {
    /// Main data fork.
    Main,
    /// Free-space map fork.
    Fsm,
    /// Visibility map fork.
    VisibilityMap,
    /// Unlogged-relation init fork.
    Init,
}

/// Full identity of one page: relation, fork, block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTag {
    /// Relation the block belongs to.
    pub rel: RelFileLocator,
    /// Fork within the relation.
    pub fork: ForkKind,
    /// Block number within the fork.
    pub block: u32,
}

/// Resource managers, in catalog order. The discriminant is the wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResourceManager {
    /// Control records: checkpoints, switches, full-page images.
    Xlog = 0,
    /// Transaction commit/abort/prepare.
    Transaction = 1,
    /// Relation storage create/truncate.
    Storage = 2,
    /// Commit-log pages.
    Clog = 3,
    /// Database create/drop.
    Database = 4,
    /// Tablespace create/drop.
    Tablespace = 5,
    /// Multi-transaction state.
    MultiXact = 6,
    /// Relation map updates.
    RelMap = 7,
    /// Hot-standby bookkeeping: locks, running transactions.
    Standby = 8,
    /// Heap maintenance: freeze, clean, visibility.
    Heap2 = 9,
    /// Heap row changes.
    Heap = 10,
    /// B-tree index changes.
    Btree = 11,
    /// Hash index changes.
    Hash = 12,
    /// GIN index changes.
    Gin = 13,
    /// GiST index changes.
    Gist = 14,
    /// Sequence updates.
    Sequence = 15,
    /// SP-GiST index changes.
    Spgist = 16,
    /// Replication slot state.
    ReplicationSlot = 17,
    /// Auxiliary heap records: combo cids, rewrites.
    Heap3 = 18,
    /// Cluster barrier records.
    Barrier = 19,
}

/// Number of resource managers in the catalog.
pub const RESOURCE_MANAGER_COUNT: usize = 20;

impl ResourceManager {
    /// Wire id of this resource manager.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a resource manager by wire id.
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Xlog),
            1 => Some(Self::Transaction),
            2 => Some(Self::Storage),
            3 => Some(Self::Clog),
            4 => Some(Self::Database),
            5 => Some(Self::Tablespace),
            6 => Some(Self::MultiXact),
            7 => Some(Self::RelMap),
            8 => Some(Self::Standby),
            9 => Some(Self::Heap2),
            10 => Some(Self::Heap),
            11 => Some(Self::Btree),
            12 => Some(Self::Hash),
            13 => Some(Self::Gin),
            14 => Some(Self::Gist),
            15 => Some(Self::Sequence),
            16 => Some(Self::Spgist),
            17 => Some(Self::ReplicationSlot),
            18 => Some(Self::Heap3),
            19 => Some(Self::Barrier),
            _ => None,
        }
    }
}

/// Per-manager opcode constants. The high nibble of the info byte carries
/// the operation code; the low nibble carries per-record flags. Heap-family
/// opcodes additionally reserve the top bit for the init-page flag, which
/// [`HEAP_OPMASK`] strips before comparison.
pub mod opcodes {
    /// Standard opcode mask: high nibble only.
    pub const STANDARD_OPMASK: u8 = 0xF0;
    /// Heap-family opcode mask: strips the init-page bit as well.
    pub const HEAP_OPMASK: u8 = 0x70;

    /// Shutdown checkpoint.
    pub const XLOG_CHECKPOINT_SHUTDOWN: u8 = 0x00;
    /// Online checkpoint.
    pub const XLOG_CHECKPOINT_ONLINE: u8 = 0x10;
    /// No-op record.
    pub const XLOG_NOOP: u8 = 0x20;
    /// Segment switch.
    pub const XLOG_SWITCH: u8 = 0x30;
    /// Runtime parameter change.
    pub const XLOG_PARAMETER_CHANGE: u8 = 0x40;
    /// Full-page image.
    pub const XLOG_FPI: u8 = 0x50;
    /// Full-page image written for a hint bit.
    pub const XLOG_FPI_FOR_HINT: u8 = 0x60;

    /// Transaction commit.
    pub const XACT_COMMIT: u8 = 0x00;
    /// Transaction abort.
    pub const XACT_ABORT: u8 = 0x10;
    /// Transaction prepare.
    pub const XACT_PREPARE: u8 = 0x20;
    /// Commit of a prepared transaction.
    pub const XACT_COMMIT_PREPARED: u8 = 0x30;
    /// Abort of a prepared transaction.
    pub const XACT_ABORT_PREPARED: u8 = 0x40;

    /// Relation storage creation.
    pub const SMGR_CREATE: u8 = 0x00;
    /// Relation storage truncation.
    pub const SMGR_TRUNCATE: u8 = 0x10;

    /// Commit-log page zeroing.
    pub const CLOG_ZERO_PAGE: u8 = 0x00;
    /// Commit-log truncation.
    pub const CLOG_TRUNCATE: u8 = 0x10;

    /// Database creation.
    pub const DBASE_CREATE: u8 = 0x00;
    /// Database drop.
    pub const DBASE_DROP: u8 = 0x10;

    /// Tablespace creation.
    pub const TBLSPC_CREATE: u8 = 0x00;
    /// Tablespace drop.
    pub const TBLSPC_DROP: u8 = 0x10;

    /// Multixact offsets page zeroing.
    pub const MULTIXACT_ZERO_OFFSETS: u8 = 0x00;
    /// Multixact members page zeroing.
    pub const MULTIXACT_ZERO_MEMBERS: u8 = 0x10;
    /// Multixact id creation.
    pub const MULTIXACT_CREATE_ID: u8 = 0x20;

    /// Relation map update.
    pub const RELMAP_UPDATE: u8 = 0x00;

    /// Standby AccessExclusive lock.
    pub const STANDBY_LOCK: u8 = 0x00;
    /// Running-transactions snapshot.
    pub const STANDBY_RUNNING_XACTS: u8 = 0x10;
    /// Standby invalidation messages.
    pub const STANDBY_INVALIDATIONS: u8 = 0x20;

    /// Heap tuple freeze.
    pub const HEAP2_FREEZE: u8 = 0x00;
    /// Heap page pruning.
    pub const HEAP2_CLEAN: u8 = 0x10;
    /// Vacuum cleanup-info record.
    pub const HEAP2_CLEANUP_INFO: u8 = 0x20;
    /// All-visible flag set.
    pub const HEAP2_VISIBLE: u8 = 0x30;
    /// Batched heap insert.
    pub const HEAP2_MULTI_INSERT: u8 = 0x40;
    /// Block change map update (relation scope, no block reference).
    pub const HEAP2_BCM: u8 = 0x50;
    /// Logical-decoding new page image.
    pub const HEAP2_LOGICAL_NEWPAGE: u8 = 0x60;

    /// Heap insert.
    pub const HEAP_INSERT: u8 = 0x00;
    /// Heap delete.
    pub const HEAP_DELETE: u8 = 0x10;
    /// Heap update.
    pub const HEAP_UPDATE: u8 = 0x20;
    /// Heap HOT update.
    pub const HEAP_HOT_UPDATE: u8 = 0x30;
    /// Heap new page.
    pub const HEAP_NEWPAGE: u8 = 0x40;
    /// Heap row lock.
    pub const HEAP_LOCK: u8 = 0x50;
    /// In-place heap update.
    pub const HEAP_INPLACE: u8 = 0x60;

    /// B-tree leaf insert.
    pub const BTREE_INSERT_LEAF: u8 = 0x00;
    /// B-tree internal insert.
    pub const BTREE_INSERT_UPPER: u8 = 0x10;
    /// B-tree left page split.
    pub const BTREE_SPLIT_L: u8 = 0x20;
    /// B-tree right page split.
    pub const BTREE_SPLIT_R: u8 = 0x30;
    /// B-tree items delete.
    pub const BTREE_DELETE: u8 = 0x40;
    /// B-tree page unlink.
    pub const BTREE_UNLINK_PAGE: u8 = 0x50;
    /// B-tree new root.
    pub const BTREE_NEWROOT: u8 = 0x60;
    /// B-tree page reuse after vacuum (relation scope).
    pub const BTREE_REUSE_PAGE: u8 = 0x70;

    /// GIN index creation.
    pub const GIN_CREATE_INDEX: u8 = 0x00;
    /// GIN posting-tree creation.
    pub const GIN_CREATE_PTREE: u8 = 0x10;
    /// GIN entry insert.
    pub const GIN_INSERT: u8 = 0x20;
    /// GIN page split.
    pub const GIN_SPLIT: u8 = 0x30;
    /// GIN page vacuum.
    pub const GIN_VACUUM_PAGE: u8 = 0x40;
    /// GIN page delete during vacuum.
    pub const GIN_DELETE_PAGE: u8 = 0x50;
    /// GIN metapage update.
    pub const GIN_UPDATE_META: u8 = 0x60;
    /// GIN pending-list insert.
    pub const GIN_INSERT_LISTPAGE: u8 = 0x70;
    /// GIN pending-list delete.
    pub const GIN_DELETE_LISTPAGE: u8 = 0x80;
    /// GIN data-leaf vacuum.
    pub const GIN_VACUUM_DATA_LEAF: u8 = 0x90;

    /// GiST page update (covers vacuum deletions).
    pub const GIST_PAGE_UPDATE: u8 = 0x00;
    /// GiST page split.
    pub const GIST_PAGE_SPLIT: u8 = 0x10;
    /// GiST index creation.
    pub const GIST_CREATE_INDEX: u8 = 0x20;

    /// Sequence state log.
    pub const SEQ_LOG: u8 = 0x00;

    /// SP-GiST index creation.
    pub const SPGIST_CREATE_INDEX: u8 = 0x00;
    /// SP-GiST leaf add.
    pub const SPGIST_ADD_LEAF: u8 = 0x10;
    /// SP-GiST leaf move.
    pub const SPGIST_MOVE_LEAFS: u8 = 0x20;
    /// SP-GiST node add.
    pub const SPGIST_ADD_NODE: u8 = 0x30;
    /// SP-GiST tuple split.
    pub const SPGIST_SPLIT_TUPLE: u8 = 0x40;
    /// SP-GiST pick-split.
    pub const SPGIST_PICKSPLIT: u8 = 0x50;
    /// SP-GiST leaf vacuum.
    pub const SPGIST_VACUUM_LEAF: u8 = 0x60;
    /// SP-GiST root vacuum.
    pub const SPGIST_VACUUM_ROOT: u8 = 0x70;
    /// SP-GiST redirect vacuum.
    pub const SPGIST_VACUUM_REDIRECT: u8 = 0x80;

    /// Replication slot creation.
    pub const SLOT_CREATE: u8 = 0x00;
    /// Replication slot drop.
    pub const SLOT_DROP: u8 = 0x10;
    /// Replication slot advance.
    pub const SLOT_ADVANCE: u8 = 0x20;

    /// New combo command id.
    pub const HEAP3_NEW_CID: u8 = 0x00;
    /// Heap rewrite.
    pub const HEAP3_REWRITE: u8 = 0x10;

    /// Barrier creation.
    pub const BARRIER_CREATE: u8 = 0x00;
}

/// One block touched by a record, with its backup data if any.
#[derive(Debug, Clone, Copy)]
pub struct BlockRef<'a> {
    /// Page the record touches.
    pub tag: PageTag,
    /// Backup block data, possibly empty.
    pub data: &'a [u8],
}

/// Transient, borrowed view of one decoded WAL record.
///
/// Produced by the decoding layer and valid only for the duration of a
/// `dispatch` call; the engine deep-copies what it needs into pool items
/// before anything crosses a thread boundary.
#[derive(Debug, Clone, Copy)]
pub struct DecodedRecord<'a> {
    /// Resource manager id claimed by the record.
    pub rmid: u8,
    /// Raw info byte: opcode in the high nibble, flags in the low.
    pub info: u8,
    /// LSN the record starts at.
    pub read_lsn: Lsn,
    /// First LSN past the record.
    pub end_lsn: Lsn,
    /// Blocks the record touches.
    pub blocks: &'a [BlockRef<'a>],
    /// Record main data.
    pub main_data: &'a [u8],
    /// Relations a commit/abort record will unlink, if any.
    pub dropped_rels: &'a [RelFileLocator],
    /// Target relation of relation-scoped records (storage create and
    /// truncate, block-change-map updates).
    pub target_rel: Option<RelFileLocator>,
}

impl<'a> DecodedRecord<'a> {
    /// Creates a record with no blocks, payload, or relation references.
    #[must_use]
    pub const fn new(rmid: u8, info: u8, read_lsn: Lsn, end_lsn: Lsn) -> Self {
        Self {
            rmid,
            info,
            read_lsn,
            end_lsn,
            blocks: &[],
            main_data: &[],
            dropped_rels: &[],
            target_rel: None,
        }
    }
}
