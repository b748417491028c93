//! Capacity-bounded storage directory
//!
//! One filesystem directory within a tier. Tracks the committed and temp
//! blocks residing in it and enforces the capacity invariant:
//! `available == capacity - committed bytes - temp bytes >= 0`.

use super::{BlockMeta, TempBlockMeta};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tierstore_common::{BlockId, BlockStoreLocation, Error, Result, SessionId, TierAlias};

/// Subdirectory holding in-flight block files
pub const TEMP_DIR_NAME: &str = "tmp";

/// A capacity-bounded directory holding block files
#[derive(Debug)]
pub struct StorageDir {
    location: BlockStoreLocation,
    root: PathBuf,
    capacity_bytes: u64,
    available_bytes: u64,
    committed: HashMap<BlockId, BlockMeta>,
    temp: HashMap<BlockId, TempBlockMeta>,
}

impl StorageDir {
    /// Create an empty dir record
    #[must_use]
    pub fn new(tier: TierAlias, index: usize, root: PathBuf, capacity_bytes: u64) -> Self {
        Self {
            location: BlockStoreLocation::in_dir(tier, index),
            root,
            capacity_bytes,
            available_bytes: capacity_bytes,
            committed: HashMap::new(),
            temp: HashMap::new(),
        }
    }

    /// The concrete location of this dir
    #[must_use]
    pub fn location(&self) -> BlockStoreLocation {
        self.location
    }

    /// Filesystem root of this dir
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capacity bound in bytes
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Bytes not reserved by committed or temp blocks
    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.available_bytes
    }

    /// Path of a committed block file in this dir
    #[must_use]
    pub fn block_path(&self, block_id: BlockId) -> PathBuf {
        self.root.join(block_id.to_string())
    }

    /// Path of an in-flight block file in this dir
    #[must_use]
    pub fn temp_block_path(&self, session_id: SessionId, block_id: BlockId) -> PathBuf {
        self.root
            .join(TEMP_DIR_NAME)
            .join(session_id.to_string())
            .join(block_id.to_string())
    }

    /// Root of the temp subtree
    #[must_use]
    pub fn temp_dir_path(&self) -> PathBuf {
        self.root.join(TEMP_DIR_NAME)
    }

    /// Whether a committed block resides here
    #[must_use]
    pub fn has_block_meta(&self, block_id: BlockId) -> bool {
        self.committed.contains_key(&block_id)
    }

    /// Whether a temp block resides here
    #[must_use]
    pub fn has_temp_block_meta(&self, block_id: BlockId) -> bool {
        self.temp.contains_key(&block_id)
    }

    /// Look up a committed block
    pub fn block_meta(&self, block_id: BlockId) -> Result<&BlockMeta> {
        self.committed
            .get(&block_id)
            .ok_or(Error::BlockNotFound(block_id))
    }

    /// Look up a temp block
    pub fn temp_block_meta(&self, block_id: BlockId) -> Result<&TempBlockMeta> {
        self.temp
            .get(&block_id)
            .ok_or(Error::TempBlockNotFound(block_id))
    }

    /// Register a committed block, reserving its bytes
    pub fn add_block_meta(&mut self, meta: BlockMeta) -> Result<()> {
        let block_id = meta.block_id();
        if self.committed.contains_key(&block_id) {
            return Err(Error::BlockAlreadyExists(block_id));
        }
        if meta.size() > self.available_bytes {
            return Err(Error::InsufficientSpace {
                location: self.location,
                required: meta.size(),
                available: self.available_bytes,
            });
        }
        self.available_bytes -= meta.size();
        self.committed.insert(block_id, meta);
        Ok(())
    }

    /// Unregister a committed block, releasing its bytes
    pub fn remove_block_meta(&mut self, block_id: BlockId) -> Result<BlockMeta> {
        let meta = self
            .committed
            .remove(&block_id)
            .ok_or(Error::BlockNotFound(block_id))?;
        self.available_bytes += meta.size();
        Ok(meta)
    }

    /// Register a temp block, reserving its current size
    pub fn add_temp_block_meta(&mut self, meta: TempBlockMeta) -> Result<()> {
        let block_id = meta.block_id();
        if self.temp.contains_key(&block_id) {
            return Err(Error::BlockAlreadyExists(block_id));
        }
        if meta.size() > self.available_bytes {
            return Err(Error::InsufficientSpace {
                location: self.location,
                required: meta.size(),
                available: self.available_bytes,
            });
        }
        self.available_bytes -= meta.size();
        self.temp.insert(block_id, meta);
        Ok(())
    }

    /// Unregister a temp block, releasing its reservation
    pub fn remove_temp_block_meta(&mut self, block_id: BlockId) -> Result<TempBlockMeta> {
        let meta = self
            .temp
            .remove(&block_id)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        self.available_bytes += meta.size();
        Ok(meta)
    }

    /// Grow a temp block's reservation to `new_size`
    pub fn resize_temp_block_meta(&mut self, block_id: BlockId, new_size: u64) -> Result<()> {
        let location = self.location;
        let available = self.available_bytes;
        let meta = self
            .temp
            .get_mut(&block_id)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        debug_assert!(new_size >= meta.size());
        let delta = new_size.saturating_sub(meta.size());
        if delta > available {
            return Err(Error::InsufficientSpace {
                location,
                required: delta,
                available,
            });
        }
        meta.set_size(new_size);
        self.available_bytes -= delta;
        Ok(())
    }

    /// Register a block discovered by the startup scan.
    ///
    /// Unlike [`add_block_meta`](Self::add_block_meta) this never fails:
    /// on-disk content always gets a record, and available bytes saturate
    /// at zero if the scan finds more than the configured capacity.
    /// Returns false if the dir is over capacity afterwards.
    pub(crate) fn restore_block_meta(&mut self, block_id: BlockId, size: u64) -> bool {
        self.committed
            .insert(block_id, BlockMeta::new(block_id, size, self.location));
        let used: u64 = self.committed.values().map(BlockMeta::size).sum();
        self.available_bytes = self.capacity_bytes.saturating_sub(used);
        used <= self.capacity_bytes
    }

    /// Committed blocks in this dir
    pub fn committed_blocks(&self) -> impl Iterator<Item = &BlockMeta> {
        self.committed.values()
    }

    /// Temp blocks in this dir
    pub fn temp_blocks(&self) -> impl Iterator<Item = &TempBlockMeta> {
        self.temp.values()
    }

    /// Number of temp blocks in this dir
    #[must_use]
    pub fn temp_block_count(&self) -> usize {
        self.temp.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK1: BlockId = BlockId::new(1000);
    const BLOCK2: BlockId = BlockId::new(1001);
    const SESSION: SessionId = SessionId::new(2);

    fn test_dir(capacity: u64) -> StorageDir {
        StorageDir::new(TierAlias::Mem, 0, PathBuf::from("/data/mem0"), capacity)
    }

    #[test]
    fn test_capacity_accounting() {
        let mut dir = test_dir(1024);
        dir.add_block_meta(BlockMeta::new(BLOCK1, 512, dir.location()))
            .unwrap();
        assert_eq!(dir.available_bytes(), 512);

        dir.add_temp_block_meta(TempBlockMeta::new(BLOCK2, SESSION, 256, dir.location()))
            .unwrap();
        assert_eq!(dir.available_bytes(), 256);

        dir.remove_block_meta(BLOCK1).unwrap();
        dir.remove_temp_block_meta(BLOCK2).unwrap();
        assert_eq!(dir.available_bytes(), 1024);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut dir = test_dir(1024);
        dir.add_block_meta(BlockMeta::new(BLOCK1, 1, dir.location()))
            .unwrap();
        let err = dir
            .add_block_meta(BlockMeta::new(BLOCK1, 1, dir.location()))
            .unwrap_err();
        assert_eq!(err.kind(), tierstore_common::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_add_beyond_capacity_rejected() {
        let mut dir = test_dir(512);
        let err = dir
            .add_block_meta(BlockMeta::new(BLOCK1, 1024, dir.location()))
            .unwrap_err();
        assert!(err.is_out_of_space());
        assert_eq!(dir.available_bytes(), 512);
    }

    #[test]
    fn test_remove_absent_rejected() {
        let mut dir = test_dir(512);
        assert!(dir.remove_block_meta(BLOCK1).unwrap_err().is_not_found());
        assert!(dir
            .remove_temp_block_meta(BLOCK1)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_resize_temp_block() {
        let mut dir = test_dir(1024);
        dir.add_temp_block_meta(TempBlockMeta::new(BLOCK1, SESSION, 1, dir.location()))
            .unwrap();

        dir.resize_temp_block_meta(BLOCK1, 512).unwrap();
        assert_eq!(dir.temp_block_meta(BLOCK1).unwrap().size(), 512);
        assert_eq!(dir.available_bytes(), 512);

        let err = dir.resize_temp_block_meta(BLOCK1, 2048).unwrap_err();
        assert!(err.is_out_of_space());
        assert_eq!(dir.temp_block_meta(BLOCK1).unwrap().size(), 512);
    }

    #[test]
    fn test_paths() {
        let dir = test_dir(1024);
        assert_eq!(dir.block_path(BLOCK1), PathBuf::from("/data/mem0/1000"));
        assert_eq!(
            dir.temp_block_path(SESSION, BLOCK1),
            PathBuf::from("/data/mem0/tmp/2/1000")
        );
    }

    #[test]
    fn test_restore_saturates_available() {
        let mut dir = test_dir(512);
        assert!(dir.restore_block_meta(BLOCK1, 512));
        assert_eq!(dir.available_bytes(), 0);
        assert!(!dir.restore_block_meta(BLOCK2, 512));
        assert_eq!(dir.available_bytes(), 0);
        assert!(dir.has_block_meta(BLOCK2));
    }
}
