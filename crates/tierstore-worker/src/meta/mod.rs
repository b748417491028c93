//! Block metadata model
//!
//! Records describing committed and in-flight blocks. Both record kinds
//! carry a fully-resolved location (tier plus concrete dir index); the
//! owning [`StorageDir`](dir::StorageDir) knows the matching paths.

pub mod dir;
pub mod manager;
pub mod tier;

use tierstore_common::{BlockId, BlockStoreLocation, SessionId};

/// Identity of a committed block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    block_id: BlockId,
    size: u64,
    location: BlockStoreLocation,
}

impl BlockMeta {
    /// Create a record for a committed block.
    ///
    /// `location` must name a concrete directory.
    #[must_use]
    pub fn new(block_id: BlockId, size: u64, location: BlockStoreLocation) -> Self {
        debug_assert!(location.dir_index().is_some());
        Self {
            block_id,
            size,
            location,
        }
    }

    /// The block id
    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Committed size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The directory holding this block
    #[must_use]
    pub fn location(&self) -> BlockStoreLocation {
        self.location
    }

    pub(crate) fn relocate(&mut self, location: BlockStoreLocation) {
        debug_assert!(location.dir_index().is_some());
        self.location = location;
    }
}

/// Identity of an uncommitted block
///
/// The owning session never changes; the size is the current reservation
/// and only ever grows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TempBlockMeta {
    block_id: BlockId,
    session_id: SessionId,
    size: u64,
    location: BlockStoreLocation,
}

impl TempBlockMeta {
    /// Create a record for an in-flight block.
    ///
    /// `location` must name a concrete directory.
    #[must_use]
    pub fn new(
        block_id: BlockId,
        session_id: SessionId,
        size: u64,
        location: BlockStoreLocation,
    ) -> Self {
        debug_assert!(location.dir_index().is_some());
        Self {
            block_id,
            session_id,
            size,
            location,
        }
    }

    /// The block id
    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// The owning session
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current reservation in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The directory holding this block
    #[must_use]
    pub fn location(&self) -> BlockStoreLocation {
        self.location
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        debug_assert!(size >= self.size);
        self.size = size;
    }
}
