//! Core type definitions for tierstore
//!
//! This module defines the fundamental identifiers used throughout the
//! system: block, session and lock ids, the ordered tier alias, and the
//! location value type naming a region of the store.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a block
///
/// Assigned by the layer above the worker; immutable for the lifetime of
/// the block.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
#[display("{_0}")]
pub struct BlockId(u64);

impl BlockId {
    /// Create from a raw 64-bit id
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the underlying id
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Identity of a client session
///
/// Scopes ownership of in-flight writes and session cleanup.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
#[display("{_0}")]
pub struct SessionId(u64);

impl SessionId {
    /// Create from a raw 64-bit id
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the underlying id
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Handle to an acquired block lock
///
/// Issued by the lock manager; every handle it returns is distinct.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
#[display("{_0}")]
pub struct LockId(u64);

impl LockId {
    /// Create from a raw 64-bit id
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the underlying id
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Alias of a storage tier
///
/// The ordinal defines tier precedence: a lower ordinal is a faster,
/// more-preferred tier. Eviction demotes blocks towards higher ordinals.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TierAlias {
    /// Memory-backed tier (fastest)
    Mem = 0,
    /// SSD-backed tier
    Ssd = 1,
    /// HDD-backed tier (slowest)
    Hdd = 2,
}

impl TierAlias {
    /// All aliases, fastest first
    pub const ORDERED: [TierAlias; 3] = [TierAlias::Mem, TierAlias::Ssd, TierAlias::Hdd];

    /// Tier precedence; lower is faster
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// The adjacent slower tier, if any
    #[must_use]
    pub const fn next_lower(self) -> Option<TierAlias> {
        match self {
            TierAlias::Mem => Some(TierAlias::Ssd),
            TierAlias::Ssd => Some(TierAlias::Hdd),
            TierAlias::Hdd => None,
        }
    }

    /// Short lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TierAlias::Mem => "mem",
            TierAlias::Ssd => "ssd",
            TierAlias::Hdd => "hdd",
        }
    }
}

impl fmt::Display for TierAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory selector within a tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirIndex {
    /// Any directory in the tier
    Any,
    /// A specific directory, by position in the tier's ordered dir list
    Index(usize),
}

/// Names a region of the block store: a tier, and optionally a specific
/// directory within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockStoreLocation {
    tier: TierAlias,
    dir: DirIndex,
}

impl BlockStoreLocation {
    /// Any directory in the given tier
    #[must_use]
    pub const fn any_dir_in_tier(tier: TierAlias) -> Self {
        Self {
            tier,
            dir: DirIndex::Any,
        }
    }

    /// A specific directory in the given tier
    #[must_use]
    pub const fn in_dir(tier: TierAlias, index: usize) -> Self {
        Self {
            tier,
            dir: DirIndex::Index(index),
        }
    }

    /// The tier this location names
    #[must_use]
    pub const fn tier(&self) -> TierAlias {
        self.tier
    }

    /// The directory selector
    #[must_use]
    pub const fn dir(&self) -> DirIndex {
        self.dir
    }

    /// The concrete directory index, if this location names one
    #[must_use]
    pub const fn dir_index(&self) -> Option<usize> {
        match self.dir {
            DirIndex::Any => None,
            DirIndex::Index(i) => Some(i),
        }
    }

    /// Whether this location contains `other`: same tier, and either this
    /// location names any dir or the same specific dir.
    #[must_use]
    pub fn contains(&self, other: &BlockStoreLocation) -> bool {
        self.tier == other.tier
            && match self.dir {
                DirIndex::Any => true,
                DirIndex::Index(i) => other.dir == DirIndex::Index(i),
            }
    }
}

impl fmt::Display for BlockStoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dir {
            DirIndex::Any => write!(f, "{}:*", self.tier),
            DirIndex::Index(i) => write!(f, "{}:{}", self.tier, i),
        }
    }
}
