//! Error types for tierstore
//!
//! One error enum is shared by all worker components so the façade can
//! surface any failure unchanged. Every variant carries the identifiers
//! of the entities involved, and classifies into an [`ErrorKind`].

use crate::types::{BlockId, BlockStoreLocation, LockId, SessionId};
use thiserror::Error;

/// Common result type for tierstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Addressed entity (block, temp block, lock) does not exist
    NotFound,
    /// Insertion would violate uniqueness
    AlreadyExists,
    /// Precondition on an existing entity violated
    InvalidState,
    /// No feasible admission or eviction plan
    OutOfSpace,
    /// A deadline-bounded acquisition expired
    Timeout,
    /// Underlying file operation failed
    Io,
}

/// Common error type for tierstore
#[derive(Debug, Error)]
pub enum Error {
    /// No committed block with this id
    #[error("block {0} not found")]
    BlockNotFound(BlockId),

    /// No temp block with this id
    #[error("temp block {0} not found")]
    TempBlockNotFound(BlockId),

    /// No lock record behind this handle
    #[error("lock id {0} has no lock record")]
    LockNotFound(LockId),

    /// The session holds no lock on this block
    #[error("session {session_id} holds no lock on block {block_id}")]
    SessionLockNotFound {
        session_id: SessionId,
        block_id: BlockId,
    },

    /// A block with this id already exists, temp or committed
    #[error("block {0} already exists")]
    BlockAlreadyExists(BlockId),

    /// The block was already committed
    #[error("block {0} is already committed")]
    BlockAlreadyCommitted(BlockId),

    /// A temp-block operation came from a session that does not own it
    #[error("block {block_id} is owned by session {owner}, not session {session_id}")]
    WrongSession {
        block_id: BlockId,
        owner: SessionId,
        session_id: SessionId,
    },

    /// `remove_block` addressed an uncommitted block
    #[error("failed to remove block {0}: block is uncommitted")]
    RemoveUncommittedBlock(BlockId),

    /// The evictor produced no feasible plan
    #[error("Failed to free space: no eviction plan by evictor ({bytes} bytes in {location})")]
    NoEvictionPlan {
        bytes: u64,
        location: BlockStoreLocation,
    },

    /// A directory cannot hold the requested bytes
    #[error("insufficient space in {location}: required {required} bytes, available {available} bytes")]
    InsufficientSpace {
        location: BlockStoreLocation,
        required: u64,
        available: u64,
    },

    /// Deadline expired while waiting for a block lock
    #[error("timed out waiting for lock on block {0}")]
    LockTimeout(BlockId),

    /// Invalid tier layout
    #[error("configuration error: {0}")]
    Config(String),

    /// File operation failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Coarse classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BlockNotFound(_)
            | Self::TempBlockNotFound(_)
            | Self::LockNotFound(_)
            | Self::SessionLockNotFound { .. } => ErrorKind::NotFound,
            Self::BlockAlreadyExists(_) | Self::BlockAlreadyCommitted(_) => {
                ErrorKind::AlreadyExists
            }
            Self::WrongSession { .. } | Self::RemoveUncommittedBlock(_) => ErrorKind::InvalidState,
            Self::NoEvictionPlan { .. } | Self::InsufficientSpace { .. } => ErrorKind::OutOfSpace,
            Self::LockTimeout(_) => ErrorKind::Timeout,
            Self::Config(_) => ErrorKind::InvalidState,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this is an out of space error
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        self.kind() == ErrorKind::OutOfSpace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TierAlias;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::BlockNotFound(BlockId::new(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::BlockAlreadyCommitted(BlockId::new(1)).kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            Error::WrongSession {
                block_id: BlockId::new(1),
                owner: SessionId::new(2),
                session_id: SessionId::new(3),
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            Error::NoEvictionPlan {
                bytes: 512,
                location: BlockStoreLocation::any_dir_in_tier(TierAlias::Mem),
            }
            .kind(),
            ErrorKind::OutOfSpace
        );
        assert_eq!(
            Error::LockTimeout(BlockId::new(1)).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_no_eviction_plan_message() {
        let err = Error::NoEvictionPlan {
            bytes: 1024,
            location: BlockStoreLocation::in_dir(TierAlias::Mem, 0),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to free space: no eviction plan by evictor"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("mem:0"));
    }

    #[test]
    fn test_messages_name_entities() {
        let err = Error::WrongSession {
            block_id: BlockId::new(1003),
            owner: SessionId::new(2),
            session_id: SessionId::new(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("1003"));
        assert!(msg.contains('2'));
        assert!(msg.contains('3'));
    }
}
