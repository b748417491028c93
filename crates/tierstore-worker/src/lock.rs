//! Block lock manager
//!
//! Grants read/write locks on block ids and hands back unique lock ids
//! that callers later redeem to release. Internally synchronized and
//! independent of the metadata lock; the façade validates block
//! existence before acquiring.
//!
//! Acquisition blocks outside the manager's own mutex, so waiting for a
//! contended block never stalls unrelated lock traffic.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tierstore_common::{BlockId, Error, LockId, Result, SessionId};
use tracing::debug;

/// Lock mode for a block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access; many readers may hold the block at once
    Read,
    /// Exclusive access; blocks until all readers drain
    Write,
}

enum BlockLockGuard {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

struct LockRecord {
    session_id: SessionId,
    block_id: BlockId,
    mode: LockMode,
    // held for the record's lifetime; dropping it releases the block
    _guard: BlockLockGuard,
}

#[derive(Default)]
struct LockState {
    records: HashMap<LockId, LockRecord>,
    block_locks: HashMap<BlockId, Arc<RwLock<()>>>,
}

/// Grants and releases read/write locks on block ids
pub struct LockManager {
    next_lock_id: AtomicU64,
    state: Mutex<LockState>,
}

impl LockManager {
    /// Create an empty lock manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_lock_id: AtomicU64::new(1),
            state: Mutex::new(LockState::default()),
        }
    }

    fn block_lock(&self, block_id: BlockId) -> Arc<RwLock<()>> {
        let mut state = self.state.lock();
        state
            .block_locks
            .entry(block_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn register(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        mode: LockMode,
        guard: BlockLockGuard,
    ) -> LockId {
        let lock_id = LockId::new(self.next_lock_id.fetch_add(1, Ordering::SeqCst));
        let record = LockRecord {
            session_id,
            block_id,
            mode,
            _guard: guard,
        };
        self.state.lock().records.insert(lock_id, record);
        debug!(
            "session {} locked block {} ({:?}) as lock {}",
            session_id, block_id, mode, lock_id
        );
        lock_id
    }

    /// Acquire a lock on a block, blocking until the mode is compatible
    /// with all current holders. Returns a fresh lock id.
    pub fn lock_block(&self, session_id: SessionId, block_id: BlockId, mode: LockMode) -> LockId {
        let lock = self.block_lock(block_id);
        let guard = match mode {
            LockMode::Read => BlockLockGuard::Read(lock.read_arc()),
            LockMode::Write => BlockLockGuard::Write(lock.write_arc()),
        };
        self.register(session_id, block_id, mode, guard)
    }

    /// Like [`lock_block`](Self::lock_block) but bounded by a deadline;
    /// surfaces `LockTimeout` when it expires.
    pub fn lock_block_timeout(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<LockId> {
        let lock = self.block_lock(block_id);
        let guard = match mode {
            LockMode::Read => lock.try_read_arc_for(timeout).map(BlockLockGuard::Read),
            LockMode::Write => lock.try_write_arc_for(timeout).map(BlockLockGuard::Write),
        }
        .ok_or(Error::LockTimeout(block_id))?;
        Ok(self.register(session_id, block_id, mode, guard))
    }

    /// Release a lock by its id
    pub fn unlock_block(&self, lock_id: LockId) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .records
            .remove(&lock_id)
            .ok_or(Error::LockNotFound(lock_id))?;
        let block_id = record.block_id;
        drop(record);
        Self::prune(&mut state, block_id);
        Ok(())
    }

    /// Release one lock a session holds on a block
    pub fn unlock_block_for_session(
        &self,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let lock_id = state
            .records
            .iter()
            .find(|(_, r)| r.session_id == session_id && r.block_id == block_id)
            .map(|(id, _)| *id)
            .ok_or(Error::SessionLockNotFound {
                session_id,
                block_id,
            })?;
        drop(state.records.remove(&lock_id));
        Self::prune(&mut state, block_id);
        Ok(())
    }

    /// Release every lock a session holds; returns the number released
    pub fn cleanup_session(&self, session_id: SessionId) -> usize {
        let mut state = self.state.lock();
        let stale: Vec<(LockId, BlockId)> = state
            .records
            .iter()
            .filter(|(_, r)| r.session_id == session_id)
            .map(|(id, r)| (*id, r.block_id))
            .collect();
        for (lock_id, block_id) in &stale {
            drop(state.records.remove(lock_id));
            Self::prune(&mut state, *block_id);
        }
        stale.len()
    }

    /// Snapshot of block ids with at least one active lock
    #[must_use]
    pub fn locked_blocks(&self) -> HashSet<BlockId> {
        self.state
            .lock()
            .records
            .values()
            .map(|r| r.block_id)
            .collect()
    }

    // Drop the per-block primitive once nothing references it: no record
    // guard and no waiter holds a clone of the Arc.
    fn prune(state: &mut LockState, block_id: BlockId) {
        if let Some(lock) = state.block_locks.get(&block_id) {
            if Arc::strong_count(lock) == 1 {
                state.block_locks.remove(&block_id);
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK1: BlockId = BlockId::new(1000);
    const BLOCK2: BlockId = BlockId::new(1001);
    const SESSION1: SessionId = SessionId::new(2);
    const SESSION2: SessionId = SessionId::new(3);

    #[test]
    fn test_lock_ids_are_distinct() {
        let manager = LockManager::new();
        let l1 = manager.lock_block(SESSION1, BLOCK1, LockMode::Read);
        let l2 = manager.lock_block(SESSION2, BLOCK2, LockMode::Read);
        let l3 = manager.lock_block(SESSION1, BLOCK1, LockMode::Read);
        assert_ne!(l1, l2);
        assert_ne!(l2, l3);
        assert_ne!(l1, l3);
    }

    #[test]
    fn test_locked_blocks_snapshot() {
        let manager = LockManager::new();
        let l1 = manager.lock_block(SESSION1, BLOCK1, LockMode::Read);
        let l2 = manager.lock_block(SESSION2, BLOCK2, LockMode::Read);
        assert_eq!(
            manager.locked_blocks(),
            HashSet::from([BLOCK1, BLOCK2])
        );

        manager.unlock_block(l2).unwrap();
        assert_eq!(manager.locked_blocks(), HashSet::from([BLOCK1]));
        manager.unlock_block(l1).unwrap();
        assert!(manager.locked_blocks().is_empty());
    }

    #[test]
    fn test_unlock_unknown_lock() {
        let manager = LockManager::new();
        let err = manager.unlock_block(LockId::new(1003)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_shared_readers_coexist() {
        let manager = LockManager::new();
        let l1 = manager.lock_block(SESSION1, BLOCK1, LockMode::Read);
        let l2 = manager.lock_block(SESSION2, BLOCK1, LockMode::Read);
        assert_eq!(manager.locked_blocks(), HashSet::from([BLOCK1]));
        manager.unlock_block(l1).unwrap();
        manager.unlock_block(l2).unwrap();
    }

    #[test]
    fn test_write_lock_times_out_under_reader() {
        let manager = LockManager::new();
        let l1 = manager.lock_block(SESSION1, BLOCK1, LockMode::Read);
        let err = manager
            .lock_block_timeout(SESSION2, BLOCK1, LockMode::Write, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.kind(), tierstore_common::ErrorKind::Timeout);

        manager.unlock_block(l1).unwrap();
        let l2 = manager
            .lock_block_timeout(SESSION2, BLOCK1, LockMode::Write, Duration::from_millis(20))
            .unwrap();
        manager.unlock_block(l2).unwrap();
    }

    #[test]
    fn test_unlock_for_session() {
        let manager = LockManager::new();
        manager.lock_block(SESSION1, BLOCK1, LockMode::Read);
        manager.unlock_block_for_session(SESSION1, BLOCK1).unwrap();
        assert!(manager.locked_blocks().is_empty());

        let err = manager
            .unlock_block_for_session(SESSION1, BLOCK1)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cleanup_session_releases_all() {
        let manager = LockManager::new();
        manager.lock_block(SESSION1, BLOCK1, LockMode::Read);
        manager.lock_block(SESSION1, BLOCK2, LockMode::Read);
        let keep = manager.lock_block(SESSION2, BLOCK2, LockMode::Read);

        assert_eq!(manager.cleanup_session(SESSION1), 2);
        assert_eq!(manager.locked_blocks(), HashSet::from([BLOCK2]));
        manager.unlock_block(keep).unwrap();
    }

    #[test]
    fn test_write_lock_reacquirable_after_unlock() {
        let manager = LockManager::new();
        let l1 = manager.lock_block(SESSION1, BLOCK1, LockMode::Write);
        manager.unlock_block(l1).unwrap();
        let l2 = manager.lock_block(SESSION1, BLOCK1, LockMode::Write);
        manager.unlock_block(l2).unwrap();
    }
}
