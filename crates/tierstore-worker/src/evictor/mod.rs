//! Pluggable eviction policy
//!
//! An evictor turns a space request into an [`EvictionPlan`] using only
//! an immutable snapshot of the store plus the set of pinned block ids.
//! Implementations must not perform I/O or block, so they can be swapped
//! and unit-tested in isolation.

pub mod lru;

pub use lru::LruEvictor;

use crate::meta::manager::{BlockStoreMeta, StorageDirMeta};
use std::collections::HashSet;
use tierstore_common::{BlockId, BlockStoreLocation};

/// Immutable snapshot handed to an evictor: per-dir state plus the block
/// ids that are off-limits because a lock is held on them.
pub struct EvictorView {
    meta: BlockStoreMeta,
    pinned: HashSet<BlockId>,
}

impl EvictorView {
    /// Build a view over a snapshot and a pin set
    #[must_use]
    pub fn new(meta: BlockStoreMeta, pinned: HashSet<BlockId>) -> Self {
        Self { meta, pinned }
    }

    /// Per-dir snapshots
    #[must_use]
    pub fn dirs(&self) -> &[StorageDirMeta] {
        &self.meta.dirs
    }

    /// Whether a block may not appear in a plan
    #[must_use]
    pub fn is_pinned(&self, block_id: BlockId) -> bool {
        self.pinned.contains(&block_id)
    }
}

/// One relocation step of a plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTransfer {
    /// Block to relocate
    pub block_id: BlockId,
    /// Dir it currently resides in
    pub src: BlockStoreLocation,
    /// Concrete destination dir
    pub dst: BlockStoreLocation,
}

/// Result of a feasible space request: blocks to relocate to lower
/// tiers, and blocks to delete outright.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Relocations, applied before evictions
    pub to_move: Vec<BlockTransfer>,
    /// Outright evictions: block and the dir it resides in
    pub to_evict: Vec<(BlockId, BlockStoreLocation)>,
}

impl EvictionPlan {
    /// A plan with no steps
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the plan has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_move.is_empty() && self.to_evict.is_empty()
    }
}

/// Eviction policy contract.
///
/// `free_space` must return a plan that, once applied, leaves at least
/// `bytes_to_free` contiguous free capacity in some dir of `location`,
/// without referencing any pinned block; `None` means no such plan
/// exists. The `on_*` hooks feed access history to stateful policies;
/// the façade invokes them on read-lock grants, commits, moves and
/// removals.
pub trait Evictor: Send + Sync {
    /// Compute a plan freeing `bytes_to_free` in `location`
    fn free_space(
        &self,
        bytes_to_free: u64,
        location: BlockStoreLocation,
        view: &EvictorView,
    ) -> Option<EvictionPlan>;

    /// A committed block was read
    fn on_access_block(&self, _block_id: BlockId) {}

    /// A temp block became committed
    fn on_commit_block(&self, _block_id: BlockId) {}

    /// A committed block moved between dirs
    fn on_move_block(&self, _block_id: BlockId) {}

    /// A committed block was removed
    fn on_remove_block(&self, _block_id: BlockId) {}
}
