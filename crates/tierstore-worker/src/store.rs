//! Tiered block store façade
//!
//! Coordinates the metadata manager, lock manager and evictor behind the
//! public operation set. Two locking layers are involved: per-block
//! read/write locks delegated to the [`LockManager`], and one exclusive
//! metadata lock guarding the [`BlockMetadataManager`] and the evictor's
//! view. To stay deadlock-free the façade always acquires the per-block
//! lock first and the metadata lock second, never the reverse, and never
//! holds more than one block lock at a time.

use crate::evictor::{EvictionPlan, Evictor, EvictorView, LruEvictor};
use crate::fileops::{BlockWriter, FileOps, LocalFileOps};
use crate::listener::BlockStoreEventListener;
use crate::lock::{LockManager, LockMode};
use crate::meta::manager::{BlockMetadataManager, BlockStoreMeta};
use crate::meta::{BlockMeta, TempBlockMeta};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tierstore_common::{
    BlockId, BlockStoreLocation, Error, LockId, Result, SessionId, StoreConfig,
};
use tracing::{debug, info, warn};

/// Monotonic operation counters
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Temp blocks created
    pub blocks_created: AtomicU64,
    /// Temp blocks committed
    pub blocks_committed: AtomicU64,
    /// Temp blocks aborted (including session cleanup)
    pub blocks_aborted: AtomicU64,
    /// Committed blocks moved between dirs
    pub blocks_moved: AtomicU64,
    /// Committed blocks removed by callers
    pub blocks_removed: AtomicU64,
    /// Committed blocks evicted for space
    pub blocks_evicted: AtomicU64,
    /// Bytes reclaimed by eviction
    pub bytes_evicted: AtomicU64,
}

/// Worker-local tiered block store
pub struct TieredBlockStore {
    metadata: RwLock<BlockMetadataManager>,
    lock_manager: LockManager,
    evictor: Arc<dyn Evictor>,
    file_ops: Arc<dyn FileOps>,
    listeners: RwLock<Vec<Arc<dyn BlockStoreEventListener>>>,
    stats: StoreStats,
}

impl TieredBlockStore {
    /// Open a store with the default collaborators: local filesystem
    /// I/O and LRU eviction.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(LocalFileOps), Arc::new(LruEvictor::new()))
    }

    /// Open a store with injected collaborators
    pub fn with_parts(
        config: &StoreConfig,
        file_ops: Arc<dyn FileOps>,
        evictor: Arc<dyn Evictor>,
    ) -> Result<Self> {
        config.validate()?;
        let metadata = BlockMetadataManager::open(config, file_ops.as_ref())?;
        info!("opened tiered block store with {} tiers", config.tiers.len());
        Ok(Self {
            metadata: RwLock::new(metadata),
            lock_manager: LockManager::new(),
            evictor,
            file_ops,
            listeners: RwLock::new(Vec::new()),
            stats: StoreStats::default(),
        })
    }

    /// Register a lifecycle listener
    pub fn add_listener(&self, listener: Arc<dyn BlockStoreEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Operation counters
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    // ---- read path ----

    /// Acquire a read lock on a committed block
    pub fn lock_block(&self, session_id: SessionId, block_id: BlockId) -> Result<LockId> {
        if !self.metadata.read().has_block_meta(block_id) {
            return Err(Error::BlockNotFound(block_id));
        }
        let lock_id = self
            .lock_manager
            .lock_block(session_id, block_id, LockMode::Read);
        self.evictor.on_access_block(block_id);
        Ok(lock_id)
    }

    /// Like [`lock_block`](Self::lock_block) but bounded by a deadline
    pub fn lock_block_timeout(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        timeout: Duration,
    ) -> Result<LockId> {
        if !self.metadata.read().has_block_meta(block_id) {
            return Err(Error::BlockNotFound(block_id));
        }
        let lock_id =
            self.lock_manager
                .lock_block_timeout(session_id, block_id, LockMode::Read, timeout)?;
        self.evictor.on_access_block(block_id);
        Ok(lock_id)
    }

    /// Release a lock by handle
    pub fn unlock_block(&self, lock_id: LockId) -> Result<()> {
        self.lock_manager.unlock_block(lock_id)
    }

    /// Release one lock a session holds on a block
    pub fn unlock_block_for_session(
        &self,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<()> {
        self.lock_manager.unlock_block_for_session(session_id, block_id)
    }

    /// Whether a committed block exists
    #[must_use]
    pub fn has_block_meta(&self, block_id: BlockId) -> bool {
        self.metadata.read().has_block_meta(block_id)
    }

    /// Look up a committed block
    pub fn get_block_meta(&self, block_id: BlockId) -> Result<BlockMeta> {
        self.metadata.read().get_block_meta(block_id)
    }

    /// Look up an in-flight block
    pub fn get_temp_block_meta(&self, block_id: BlockId) -> Result<TempBlockMeta> {
        self.metadata.read().get_temp_block_meta(block_id)
    }

    /// Snapshot of per-dir capacities and block lists
    #[must_use]
    pub fn block_store_meta(&self) -> BlockStoreMeta {
        self.metadata.read().block_store_meta()
    }

    /// Snapshot of block ids currently under lock
    #[must_use]
    pub fn locked_blocks(&self) -> HashSet<BlockId> {
        self.lock_manager.locked_blocks()
    }

    // ---- write path ----

    /// Create a temp block with an initial reservation, evicting in
    /// `location` if no dir has room.
    pub fn create_block_meta(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        location: BlockStoreLocation,
        initial_bytes: u64,
    ) -> Result<TempBlockMeta> {
        let mut metadata = self.metadata.write();
        if metadata.has_block_meta(block_id) || metadata.has_temp_block_meta(block_id) {
            return Err(Error::BlockAlreadyExists(block_id));
        }
        let dir = match metadata.get_eligible_dir(location, initial_bytes) {
            Some(dir) => dir,
            None => {
                self.free_space_locked(&mut metadata, session_id, initial_bytes, location, None)?;
                metadata
                    .get_eligible_dir(location, initial_bytes)
                    .ok_or(Error::NoEvictionPlan {
                        bytes: initial_bytes,
                        location,
                    })?
            }
        };
        let temp = TempBlockMeta::new(block_id, session_id, initial_bytes, dir);
        metadata.add_temp_block_meta(temp.clone())?;
        self.stats.blocks_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            "session {} created temp block {} ({} bytes) in {}",
            session_id, block_id, initial_bytes, dir
        );
        Ok(temp)
    }

    /// Open an append writer on a temp block's file
    pub fn get_block_writer(
        &self,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<Box<dyn BlockWriter>> {
        let path = {
            let metadata = self.metadata.read();
            let temp = metadata.get_temp_block_meta(block_id)?;
            self.temp_path(&metadata, &temp)?
        };
        debug!("session {} opened writer for temp block {}", session_id, block_id);
        self.file_ops.create_writer(&path)
    }

    /// Grow a temp block's reservation, evicting in its dir if needed
    pub fn request_space(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        additional_bytes: u64,
    ) -> Result<()> {
        let mut metadata = self.metadata.write();
        let temp = metadata.get_temp_block_meta(block_id)?;
        if temp.session_id() != session_id {
            return Err(Error::WrongSession {
                block_id,
                owner: temp.session_id(),
                session_id,
            });
        }
        let dir = temp.location();
        let available = metadata.get_available_bytes(dir);
        if available < additional_bytes {
            self.free_space_locked(&mut metadata, session_id, additional_bytes, dir, None)?;
        }
        metadata.resize_temp_block_meta(block_id, temp.size() + additional_bytes)
    }

    /// Promote a temp block to a committed block
    pub fn commit_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let mut metadata = self.metadata.write();
        let temp = self.checked_temp_block(&metadata, session_id, block_id)?;
        let location = temp.location();
        let src = self.temp_path(&metadata, &temp)?;
        let dst = self.block_path(&metadata, location, block_id)?;

        self.file_ops.rename(&src, &dst)?;
        if let Err(e) = metadata.commit_temp_block(block_id) {
            if let Err(undo) = self.file_ops.rename(&dst, &src) {
                warn!("failed to undo commit rename of block {}: {}", block_id, undo);
            }
            return Err(e);
        }
        self.evictor.on_commit_block(block_id);
        for listener in self.listeners.read().iter() {
            listener.on_commit_block(session_id, block_id, location);
        }
        self.stats.blocks_committed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "session {} committed block {} ({} bytes) in {}",
            session_id,
            block_id,
            temp.size(),
            location
        );
        Ok(())
    }

    /// Discard a temp block and its file
    pub fn abort_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let mut metadata = self.metadata.write();
        let temp = self.checked_temp_block(&metadata, session_id, block_id)?;
        let path = self.temp_path(&metadata, &temp)?;

        self.file_ops.delete(&path)?;
        metadata.abort_temp_block(block_id)?;
        for listener in self.listeners.read().iter() {
            listener.on_abort_block(session_id, block_id);
        }
        self.stats.blocks_aborted.fetch_add(1, Ordering::Relaxed);
        debug!("session {} aborted temp block {}", session_id, block_id);
        Ok(())
    }

    /// Move a committed block to another location, evicting there if
    /// needed. Blocks until concurrent readers of the block drain.
    pub fn move_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        new_location: BlockStoreLocation,
    ) -> Result<()> {
        let lock_id = self
            .lock_manager
            .lock_block(session_id, block_id, LockMode::Write);
        let result = self.move_block_locked(session_id, block_id, new_location);
        if let Err(e) = self.lock_manager.unlock_block(lock_id) {
            warn!("failed to release move lock on block {}: {}", block_id, e);
        }
        result
    }

    fn move_block_locked(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        new_location: BlockStoreLocation,
    ) -> Result<()> {
        let mut metadata = self.metadata.write();
        let meta = metadata.get_block_meta(block_id)?;
        let src_location = meta.location();
        if new_location.contains(&src_location) {
            debug!("block {} already resides in {}", block_id, new_location);
            return Ok(());
        }
        let dst_location = match metadata.get_eligible_dir(new_location, meta.size()) {
            Some(dir) => dir,
            None => {
                // the block's own write lock must not pin it out of the plan
                self.free_space_locked(
                    &mut metadata,
                    session_id,
                    meta.size(),
                    new_location,
                    Some(block_id),
                )?;
                metadata
                    .get_eligible_dir(new_location, meta.size())
                    .ok_or(Error::NoEvictionPlan {
                        bytes: meta.size(),
                        location: new_location,
                    })?
            }
        };

        let src = self.block_path(&metadata, src_location, block_id)?;
        let dst = self.block_path(&metadata, dst_location, block_id)?;
        self.file_ops.rename(&src, &dst)?;
        if let Err(e) = metadata.move_block_meta(block_id, dst_location) {
            if let Err(undo) = self.file_ops.rename(&dst, &src) {
                warn!("failed to undo move rename of block {}: {}", block_id, undo);
            }
            return Err(e);
        }
        self.evictor.on_move_block(block_id);
        for listener in self.listeners.read().iter() {
            listener.on_move_block(session_id, block_id, src_location, dst_location);
        }
        self.stats.blocks_moved.fetch_add(1, Ordering::Relaxed);
        debug!(
            "session {} moved block {} from {} to {}",
            session_id, block_id, src_location, dst_location
        );
        Ok(())
    }

    /// Delete a committed block. Blocks until concurrent readers drain.
    pub fn remove_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let lock_id = self
            .lock_manager
            .lock_block(session_id, block_id, LockMode::Write);
        let result = self.remove_block_locked(session_id, block_id);
        if let Err(e) = self.lock_manager.unlock_block(lock_id) {
            warn!("failed to release remove lock on block {}: {}", block_id, e);
        }
        result
    }

    fn remove_block_locked(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let mut metadata = self.metadata.write();
        if metadata.has_temp_block_meta(block_id) {
            return Err(Error::RemoveUncommittedBlock(block_id));
        }
        let meta = metadata.get_block_meta(block_id)?;
        let path = self.block_path(&metadata, meta.location(), block_id)?;

        self.file_ops.delete(&path)?;
        metadata.remove_block_meta(block_id)?;
        self.evictor.on_remove_block(block_id);
        for listener in self.listeners.read().iter() {
            listener.on_remove_block(session_id, block_id);
        }
        self.stats.blocks_removed.fetch_add(1, Ordering::Relaxed);
        debug!("session {} removed block {}", session_id, block_id);
        Ok(())
    }

    /// Free at least `bytes` in `location` by eviction
    pub fn free_space(
        &self,
        session_id: SessionId,
        bytes: u64,
        location: BlockStoreLocation,
    ) -> Result<()> {
        let mut metadata = self.metadata.write();
        self.free_space_locked(&mut metadata, session_id, bytes, location, None)
    }

    /// Release a session's locks and abort its temp blocks, best-effort
    pub fn cleanup_session(&self, session_id: SessionId) {
        let released = self.lock_manager.cleanup_session(session_id);

        let mut metadata = self.metadata.write();
        let mut aborted = 0usize;
        for temp in metadata.session_temp_blocks(session_id) {
            let block_id = temp.block_id();
            match self.temp_path(&metadata, &temp) {
                Ok(path) => {
                    if let Err(e) = self.file_ops.delete(&path) {
                        warn!("failed to delete temp file of block {}: {}", block_id, e);
                    }
                }
                Err(e) => warn!("failed to resolve temp path of block {}: {}", block_id, e),
            }
            match metadata.abort_temp_block(block_id) {
                Ok(_) => {
                    aborted += 1;
                    self.stats.blocks_aborted.fetch_add(1, Ordering::Relaxed);
                    for listener in self.listeners.read().iter() {
                        listener.on_abort_block(session_id, block_id);
                    }
                }
                Err(e) => warn!("failed to abort temp block {}: {}", block_id, e),
            }
        }
        if released > 0 || aborted > 0 {
            info!(
                "cleaned up session {}: {} locks released, {} temp blocks aborted",
                session_id, released, aborted
            );
        }
    }

    // ---- space admission ----

    // Samples the pin set and the metadata snapshot under the exclusive
    // metadata lock the caller already holds, asks the evictor for a
    // plan, and executes it: moves first, then evictions. `exclude`
    // removes a block from the pin set (the caller's own write lock).
    fn free_space_locked(
        &self,
        metadata: &mut BlockMetadataManager,
        session_id: SessionId,
        bytes: u64,
        location: BlockStoreLocation,
        exclude: Option<BlockId>,
    ) -> Result<()> {
        let mut pinned = self.lock_manager.locked_blocks();
        if let Some(block_id) = exclude {
            pinned.remove(&block_id);
        }
        let view = EvictorView::new(metadata.block_store_meta(), pinned);
        let plan = self
            .evictor
            .free_space(bytes, location, &view)
            .ok_or(Error::NoEvictionPlan { bytes, location })?;
        debug!(
            "executing eviction plan for {} bytes in {}: {} moves, {} evictions",
            bytes,
            location,
            plan.to_move.len(),
            plan.to_evict.len()
        );
        self.execute_plan(metadata, session_id, plan)
    }

    fn execute_plan(
        &self,
        metadata: &mut BlockMetadataManager,
        session_id: SessionId,
        plan: EvictionPlan,
    ) -> Result<()> {
        for transfer in plan.to_move {
            let block_id = transfer.block_id;
            let src = self.block_path(metadata, transfer.src, block_id)?;
            let dst = self.block_path(metadata, transfer.dst, block_id)?;
            self.file_ops.rename(&src, &dst)?;
            if let Err(e) = metadata.move_block_meta(block_id, transfer.dst) {
                if let Err(undo) = self.file_ops.rename(&dst, &src) {
                    warn!("failed to undo demotion of block {}: {}", block_id, undo);
                }
                return Err(e);
            }
            self.evictor.on_move_block(block_id);
            for listener in self.listeners.read().iter() {
                listener.on_move_block(session_id, block_id, transfer.src, transfer.dst);
            }
            self.stats.blocks_moved.fetch_add(1, Ordering::Relaxed);
        }
        for (block_id, location) in plan.to_evict {
            let size = metadata.get_block_meta(block_id)?.size();
            let path = self.block_path(metadata, location, block_id)?;
            self.file_ops.delete(&path)?;
            metadata.remove_block_meta(block_id)?;
            self.evictor.on_remove_block(block_id);
            for listener in self.listeners.read().iter() {
                listener.on_remove_block(session_id, block_id);
            }
            self.stats.blocks_evicted.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes_evicted.fetch_add(size, Ordering::Relaxed);
        }
        Ok(())
    }

    // ---- helpers ----

    // Commit/abort share the ownership checks: a committed block wins
    // over a missing temp record, then the record must exist and belong
    // to the calling session.
    fn checked_temp_block(
        &self,
        metadata: &BlockMetadataManager,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<TempBlockMeta> {
        if metadata.has_block_meta(block_id) {
            return Err(Error::BlockAlreadyCommitted(block_id));
        }
        let temp = metadata.get_temp_block_meta(block_id)?;
        if temp.session_id() != session_id {
            return Err(Error::WrongSession {
                block_id,
                owner: temp.session_id(),
                session_id,
            });
        }
        Ok(temp)
    }

    fn block_path(
        &self,
        metadata: &BlockMetadataManager,
        location: BlockStoreLocation,
        block_id: BlockId,
    ) -> Result<PathBuf> {
        metadata
            .dir_at(location)
            .map(|d| d.block_path(block_id))
            .ok_or(Error::BlockNotFound(block_id))
    }

    fn temp_path(
        &self,
        metadata: &BlockMetadataManager,
        temp: &TempBlockMeta,
    ) -> Result<PathBuf> {
        metadata
            .dir_at(temp.location())
            .map(|d| d.temp_block_path(temp.session_id(), temp.block_id()))
            .ok_or(Error::TempBlockNotFound(temp.block_id()))
    }
}
