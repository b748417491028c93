//! Configuration types for tierstore
//!
//! The worker reads only the tier layout: an ordered list of tiers, each
//! naming its directories and their capacities. Loading these structures
//! from files is the embedding application's concern.

use crate::error::{Error, Result};
use crate::types::TierAlias;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for a tiered block store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Tier layout, fastest tier first
    pub tiers: Vec<TierConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tiers: vec![TierConfig {
                alias: TierAlias::Mem,
                dirs: vec![DirConfig::default()],
            }],
        }
    }
}

impl StoreConfig {
    /// Validate the tier layout.
    ///
    /// Tiers must be non-empty, listed fastest-first with strictly
    /// ascending aliases, and every tier must name at least one directory
    /// with a non-zero capacity.
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(invalid("no tiers configured"));
        }
        let mut prev: Option<TierAlias> = None;
        for tier in &self.tiers {
            if let Some(p) = prev {
                if tier.alias <= p {
                    return Err(invalid(format!(
                        "tier {} listed after tier {}: aliases must be strictly ascending",
                        tier.alias, p
                    )));
                }
            }
            prev = Some(tier.alias);
            if tier.dirs.is_empty() {
                return Err(invalid(format!("tier {} has no directories", tier.alias)));
            }
            for dir in &tier.dirs {
                if dir.capacity_bytes == 0 {
                    return Err(invalid(format!(
                        "dir {:?} in tier {} has zero capacity",
                        dir.path, tier.alias
                    )));
                }
            }
        }
        Ok(())
    }

    /// The configured tier for an alias, if present
    #[must_use]
    pub fn tier(&self, alias: TierAlias) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.alias == alias)
    }
}

/// Configuration for one storage tier
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier alias; defines precedence
    pub alias: TierAlias,
    /// Directories in this tier, in index order
    pub dirs: Vec<DirConfig>,
}

/// Configuration for a single directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirConfig {
    /// Filesystem root of the directory
    pub path: PathBuf,
    /// Capacity bound in bytes
    pub capacity_bytes: u64,
}

impl Default for DirConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/tierstore/mem"),
            capacity_bytes: 1024 * 1024 * 1024, // 1 GB
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}
