//! Tierstore Common - Shared types and utilities
//!
//! This crate provides the identifiers, error definitions and
//! configuration types used across all tierstore components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DirConfig, StoreConfig, TierConfig};
pub use error::{Error, ErrorKind, Result};
pub use types::*;
