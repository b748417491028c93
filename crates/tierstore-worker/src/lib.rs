//! Tierstore Worker - Tiered block store
//!
//! This crate implements the worker-local block store of a distributed
//! file cache: opaque fixed-identity byte blocks managed across a
//! hierarchy of storage media, each tier composed of capacity-bounded
//! directories.
//!
//! # Features
//!
//! - **Two-phase writes**: temp blocks owned by a session, promoted to
//!   committed blocks by an atomic rename
//! - **Space admission**: eviction plans that demote cold blocks to
//!   lower tiers or drop them, never touching blocks under a lock
//! - **Concurrent reads**: per-block reader/writer locks handed out as
//!   opaque lock ids
//! - **Startup rescan**: committed blocks are rediscovered from disk,
//!   stale temp data is purged
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   TieredBlockStore   │  public operations, locking discipline
//! └──┬────────┬───────┬──┘
//!    │        │       │
//! ┌──▼──────┐┌▼──────┐┌▼─────────────────────┐
//! │ Lock    ││Evictor││ BlockMetadataManager │
//! │ Manager ││ (LRU) ││  tiers ▸ dirs ▸ meta │
//! └─────────┘└───────┘└──────────┬───────────┘
//!                                │
//!                          ┌─────▼─────┐
//!                          │  FileOps  │  (local filesystem)
//!                          └───────────┘
//! ```

pub mod evictor;
pub mod fileops;
pub mod listener;
pub mod lock;
pub mod meta;
pub mod store;

pub use evictor::{BlockTransfer, EvictionPlan, Evictor, EvictorView, LruEvictor};
pub use fileops::{BlockWriter, FileOps, LocalFileOps};
pub use listener::BlockStoreEventListener;
pub use lock::{LockManager, LockMode};
pub use meta::dir::StorageDir;
pub use meta::manager::{BlockMetadataManager, BlockStoreMeta, StorageDirMeta};
pub use meta::tier::StorageTier;
pub use meta::{BlockMeta, TempBlockMeta};
pub use store::{StoreStats, TieredBlockStore};
