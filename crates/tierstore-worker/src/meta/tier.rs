//! Storage tier: ordered directories at one level of the hierarchy

use super::dir::StorageDir;
use crate::fileops::FileOps;
use tierstore_common::{BlockId, Result, TierAlias, TierConfig};
use tracing::{info, warn};

/// Ordered collection of dirs at one tier level
#[derive(Debug)]
pub struct StorageTier {
    alias: TierAlias,
    dirs: Vec<StorageDir>,
}

impl StorageTier {
    /// Open a tier from its configuration, scanning each directory.
    ///
    /// For every dir: the root is created if missing, the `tmp/` subtree
    /// left by prior sessions is deleted, and every committed block file
    /// found on disk is registered with its on-disk size. Entries whose
    /// names do not parse as block ids are skipped.
    pub fn open(config: &TierConfig, file_ops: &dyn FileOps) -> Result<Self> {
        let mut dirs = Vec::with_capacity(config.dirs.len());
        let mut restored = 0usize;
        for (index, dir_config) in config.dirs.iter().enumerate() {
            let mut dir = StorageDir::new(
                config.alias,
                index,
                dir_config.path.clone(),
                dir_config.capacity_bytes,
            );
            file_ops.create_dirs(dir.root())?;
            file_ops.remove_dir_all(&dir.temp_dir_path())?;

            for path in file_ops.list_files(dir.root())? {
                let name = path.file_name().and_then(|n| n.to_str());
                let Some(block_id) = name.and_then(|n| n.parse::<u64>().ok()) else {
                    warn!("skipping non-block entry {:?} in {:?}", path, dir.root());
                    continue;
                };
                let size = file_ops.size(&path)?;
                if !dir.restore_block_meta(BlockId::new(block_id), size) {
                    warn!(
                        "dir {:?} holds more than its configured capacity of {} bytes",
                        dir.root(),
                        dir.capacity_bytes()
                    );
                }
                restored += 1;
            }
            dirs.push(dir);
        }
        info!(
            "opened tier {} with {} dirs, {} blocks restored",
            config.alias,
            dirs.len(),
            restored
        );
        Ok(Self {
            alias: config.alias,
            dirs,
        })
    }

    /// The tier alias
    #[must_use]
    pub fn alias(&self) -> TierAlias {
        self.alias
    }

    /// A dir by index
    #[must_use]
    pub fn dir(&self, index: usize) -> Option<&StorageDir> {
        self.dirs.get(index)
    }

    pub(crate) fn dir_mut(&mut self, index: usize) -> Option<&mut StorageDir> {
        self.dirs.get_mut(index)
    }

    /// All dirs, in index order
    #[must_use]
    pub fn dirs(&self) -> &[StorageDir] {
        &self.dirs
    }
}
