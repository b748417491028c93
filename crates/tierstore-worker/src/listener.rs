//! Block store event listeners
//!
//! Callbacks fired synchronously after a state transition completes,
//! while the store still holds its exclusive metadata lock. Listeners
//! must be fast and must not reenter the store.

use tierstore_common::{BlockId, BlockStoreLocation, SessionId};

/// Observer of block lifecycle events
pub trait BlockStoreEventListener: Send + Sync {
    /// A temp block became committed in `location`
    fn on_commit_block(
        &self,
        _session_id: SessionId,
        _block_id: BlockId,
        _location: BlockStoreLocation,
    ) {
    }

    /// A temp block was aborted
    fn on_abort_block(&self, _session_id: SessionId, _block_id: BlockId) {}

    /// A committed block moved between dirs
    fn on_move_block(
        &self,
        _session_id: SessionId,
        _block_id: BlockId,
        _old_location: BlockStoreLocation,
        _new_location: BlockStoreLocation,
    ) {
    }

    /// A committed block was removed
    fn on_remove_block(&self, _session_id: SessionId, _block_id: BlockId) {}
}
