//! Global block metadata index
//!
//! Owns all tiers and dirs, and keeps flat `block id -> dir` indexes for
//! O(1) lookup of committed and temp blocks. Every mutation goes through
//! this manager so the per-dir capacity invariant holds from any
//! observer's perspective; the façade serializes mutators behind its
//! exclusive metadata lock.

use super::dir::StorageDir;
use super::tier::StorageTier;
use super::{BlockMeta, TempBlockMeta};
use crate::fileops::FileOps;
use std::collections::HashMap;
use std::path::PathBuf;
use tierstore_common::{
    BlockId, BlockStoreLocation, Error, Result, SessionId, StoreConfig, TierAlias,
};

/// Index of all committed and temp blocks across all tiers
#[derive(Debug)]
pub struct BlockMetadataManager {
    tiers: Vec<StorageTier>,
    committed_index: HashMap<BlockId, BlockStoreLocation>,
    temp_index: HashMap<BlockId, BlockStoreLocation>,
}

impl BlockMetadataManager {
    /// Open the manager from a validated configuration, scanning every
    /// dir on disk (startup rescan).
    pub fn open(config: &StoreConfig, file_ops: &dyn FileOps) -> Result<Self> {
        let mut tiers = Vec::with_capacity(config.tiers.len());
        for tier_config in &config.tiers {
            tiers.push(StorageTier::open(tier_config, file_ops)?);
        }
        let mut committed_index = HashMap::new();
        for tier in &tiers {
            for dir in tier.dirs() {
                for meta in dir.committed_blocks() {
                    committed_index.insert(meta.block_id(), dir.location());
                }
            }
        }
        Ok(Self {
            tiers,
            committed_index,
            temp_index: HashMap::new(),
        })
    }

    /// A tier by alias
    #[must_use]
    pub fn tier(&self, alias: TierAlias) -> Option<&StorageTier> {
        self.tiers.iter().find(|t| t.alias() == alias)
    }

    pub(crate) fn dir_at(&self, location: BlockStoreLocation) -> Option<&StorageDir> {
        let index = location.dir_index()?;
        self.tier(location.tier())?.dir(index)
    }

    fn dir_at_mut(&mut self, location: BlockStoreLocation) -> Option<&mut StorageDir> {
        let index = location.dir_index()?;
        self.tiers
            .iter_mut()
            .find(|t| t.alias() == location.tier())?
            .dir_mut(index)
    }

    fn dirs_in(&self, location: BlockStoreLocation) -> impl Iterator<Item = &StorageDir> {
        self.tiers
            .iter()
            .filter(move |t| t.alias() == location.tier())
            .flat_map(|t| t.dirs())
            .filter(move |d| location.contains(&d.location()))
    }

    /// Whether a committed block exists anywhere
    #[must_use]
    pub fn has_block_meta(&self, block_id: BlockId) -> bool {
        self.committed_index.contains_key(&block_id)
    }

    /// Whether a temp block exists anywhere
    #[must_use]
    pub fn has_temp_block_meta(&self, block_id: BlockId) -> bool {
        self.temp_index.contains_key(&block_id)
    }

    /// Look up a committed block
    pub fn get_block_meta(&self, block_id: BlockId) -> Result<BlockMeta> {
        let location = self
            .committed_index
            .get(&block_id)
            .ok_or(Error::BlockNotFound(block_id))?;
        let dir = self
            .dir_at(*location)
            .ok_or(Error::BlockNotFound(block_id))?;
        dir.block_meta(block_id).cloned()
    }

    /// Look up a temp block
    pub fn get_temp_block_meta(&self, block_id: BlockId) -> Result<TempBlockMeta> {
        let location = self
            .temp_index
            .get(&block_id)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        let dir = self
            .dir_at(*location)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        dir.temp_block_meta(block_id).cloned()
    }

    /// Register a new temp block in its dir
    pub fn add_temp_block_meta(&mut self, meta: TempBlockMeta) -> Result<()> {
        let block_id = meta.block_id();
        if self.committed_index.contains_key(&block_id) || self.temp_index.contains_key(&block_id)
        {
            return Err(Error::BlockAlreadyExists(block_id));
        }
        let location = meta.location();
        let dir = self
            .dir_at_mut(location)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        dir.add_temp_block_meta(meta)?;
        self.temp_index.insert(block_id, location);
        Ok(())
    }

    /// Grow a temp block's reservation to `new_size`
    pub fn resize_temp_block_meta(&mut self, block_id: BlockId, new_size: u64) -> Result<()> {
        let location = *self
            .temp_index
            .get(&block_id)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        let dir = self
            .dir_at_mut(location)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        dir.resize_temp_block_meta(block_id, new_size)
    }

    /// Turn a temp block into a committed block of the same final size in
    /// the same dir.
    pub fn commit_temp_block(&mut self, block_id: BlockId) -> Result<BlockMeta> {
        if self.committed_index.contains_key(&block_id) {
            return Err(Error::BlockAlreadyCommitted(block_id));
        }
        let location = *self
            .temp_index
            .get(&block_id)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        let dir = self
            .dir_at_mut(location)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        let temp = dir.remove_temp_block_meta(block_id)?;
        let meta = BlockMeta::new(block_id, temp.size(), location);
        dir.add_block_meta(meta.clone())?;
        self.temp_index.remove(&block_id);
        self.committed_index.insert(block_id, location);
        Ok(meta)
    }

    /// Discard a temp block's record
    pub fn abort_temp_block(&mut self, block_id: BlockId) -> Result<TempBlockMeta> {
        let location = *self
            .temp_index
            .get(&block_id)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        let dir = self
            .dir_at_mut(location)
            .ok_or(Error::TempBlockNotFound(block_id))?;
        let temp = dir.remove_temp_block_meta(block_id)?;
        self.temp_index.remove(&block_id);
        Ok(temp)
    }

    /// Move a committed block's record to another dir.
    ///
    /// The destination must have room before the source record is
    /// touched; either both sides of the move apply or neither does.
    pub fn move_block_meta(&mut self, block_id: BlockId, dst: BlockStoreLocation) -> Result<BlockMeta> {
        let mut meta = self.get_block_meta(block_id)?;
        let src = meta.location();
        if src == dst {
            return Ok(meta);
        }
        {
            let dst_dir = self.dir_at(dst).ok_or(Error::BlockNotFound(block_id))?;
            if meta.size() > dst_dir.available_bytes() {
                return Err(Error::InsufficientSpace {
                    location: dst,
                    required: meta.size(),
                    available: dst_dir.available_bytes(),
                });
            }
        }
        let removed = self
            .dir_at_mut(src)
            .ok_or(Error::BlockNotFound(block_id))?
            .remove_block_meta(block_id)?;
        meta.relocate(dst);
        let inserted = self
            .dir_at_mut(dst)
            .ok_or(Error::BlockNotFound(block_id))
            .and_then(|d| d.add_block_meta(meta.clone()));
        if let Err(e) = inserted {
            // both sides must apply or neither; put the record back
            if let Some(dir) = self.dir_at_mut(src) {
                let _ = dir.add_block_meta(removed);
            }
            return Err(e);
        }
        self.committed_index.insert(block_id, dst);
        Ok(meta)
    }

    /// Remove a committed block's record
    pub fn remove_block_meta(&mut self, block_id: BlockId) -> Result<BlockMeta> {
        let location = *self
            .committed_index
            .get(&block_id)
            .ok_or(Error::BlockNotFound(block_id))?;
        let dir = self
            .dir_at_mut(location)
            .ok_or(Error::BlockNotFound(block_id))?;
        let meta = dir.remove_block_meta(block_id)?;
        self.committed_index.remove(&block_id);
        Ok(meta)
    }

    /// Total available bytes across the dirs in a location
    #[must_use]
    pub fn get_available_bytes(&self, location: BlockStoreLocation) -> u64 {
        self.dirs_in(location).map(StorageDir::available_bytes).sum()
    }

    /// A dir in `location` with at least `bytes` available, if any
    #[must_use]
    pub fn get_eligible_dir(&self, location: BlockStoreLocation, bytes: u64) -> Option<BlockStoreLocation> {
        self.dirs_in(location)
            .find(|d| d.available_bytes() >= bytes)
            .map(|d| d.location())
    }

    /// All temp blocks owned by a session
    #[must_use]
    pub fn session_temp_blocks(&self, session_id: SessionId) -> Vec<TempBlockMeta> {
        self.tiers
            .iter()
            .flat_map(|t| t.dirs())
            .flat_map(|d| d.temp_blocks())
            .filter(|t| t.session_id() == session_id)
            .cloned()
            .collect()
    }

    /// Snapshot of per-dir capacities and block lists
    #[must_use]
    pub fn block_store_meta(&self) -> BlockStoreMeta {
        let dirs = self
            .tiers
            .iter()
            .flat_map(|t| t.dirs())
            .map(|d| StorageDirMeta {
                location: d.location(),
                path: d.root().to_path_buf(),
                capacity_bytes: d.capacity_bytes(),
                available_bytes: d.available_bytes(),
                blocks: d
                    .committed_blocks()
                    .map(|b| (b.block_id(), b.size()))
                    .collect(),
                temp_block_count: d.temp_block_count(),
            })
            .collect();
        BlockStoreMeta { dirs }
    }
}

/// Point-in-time snapshot of the store's dirs
#[derive(Clone, Debug)]
pub struct BlockStoreMeta {
    /// Per-dir state, tier order then index order
    pub dirs: Vec<StorageDirMeta>,
}

impl BlockStoreMeta {
    /// The snapshot entry for a concrete dir location
    #[must_use]
    pub fn dir(&self, location: BlockStoreLocation) -> Option<&StorageDirMeta> {
        self.dirs.iter().find(|d| d.location == location)
    }
}

/// Snapshot of one dir
#[derive(Clone, Debug)]
pub struct StorageDirMeta {
    /// Concrete location of the dir
    pub location: BlockStoreLocation,
    /// Filesystem root
    pub path: PathBuf,
    /// Capacity bound in bytes
    pub capacity_bytes: u64,
    /// Unreserved bytes at snapshot time
    pub available_bytes: u64,
    /// Committed blocks and their sizes
    pub blocks: Vec<(BlockId, u64)>,
    /// Number of in-flight blocks
    pub temp_block_count: usize,
}
