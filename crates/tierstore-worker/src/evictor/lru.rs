//! Least-recently-used eviction policy
//!
//! Keeps a logical access clock per block across all tiers. Victims are
//! taken oldest-first from the requested location; a victim in a
//! non-bottom tier is demoted to the next lower tier when room can be
//! found or freed there, otherwise it is evicted outright.

use super::{BlockTransfer, EvictionPlan, Evictor, EvictorView};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tierstore_common::{BlockId, BlockStoreLocation, TierAlias};

/// Default access-ordered evictor
pub struct LruEvictor {
    clock: AtomicU64,
    access: Mutex<HashMap<BlockId, u64>>,
}

impl LruEvictor {
    /// Create an evictor with empty access history
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(1),
            access: Mutex::new(HashMap::new()),
        }
    }

    fn touch(&self, block_id: BlockId) {
        let now = self.clock.fetch_add(1, Ordering::SeqCst);
        self.access.lock().insert(block_id, now);
    }
}

impl Default for LruEvictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Evictor for LruEvictor {
    fn free_space(
        &self,
        bytes_to_free: u64,
        location: BlockStoreLocation,
        view: &EvictorView,
    ) -> Option<EvictionPlan> {
        let order = self.access.lock().clone();
        let mut state = PlanState::new(view);
        let mut plan = EvictionPlan::empty();
        if state.free_in(bytes_to_free, location, view, &order, &mut plan) {
            Some(plan)
        } else {
            None
        }
    }

    fn on_access_block(&self, block_id: BlockId) {
        self.touch(block_id);
    }

    fn on_commit_block(&self, block_id: BlockId) {
        self.touch(block_id);
    }

    fn on_move_block(&self, block_id: BlockId) {
        self.touch(block_id);
    }

    fn on_remove_block(&self, block_id: BlockId) {
        self.access.lock().remove(&block_id);
    }
}

// A block never touched (e.g. restored by the startup scan) ranks oldest.
fn age(order: &HashMap<BlockId, u64>, block_id: BlockId) -> (u64, BlockId) {
    (order.get(&block_id).copied().unwrap_or(0), block_id)
}

struct DirState {
    location: BlockStoreLocation,
    available: u64,
    // committed blocks still eligible as victims
    blocks: HashMap<BlockId, u64>,
}

// Working copy of the view that the planner mutates as it enqueues
// steps. Blocks a plan relocates are not re-offered as victims.
struct PlanState {
    dirs: Vec<DirState>,
}

impl PlanState {
    fn new(view: &EvictorView) -> Self {
        let dirs = view
            .dirs()
            .iter()
            .map(|d| DirState {
                location: d.location,
                available: d.available_bytes,
                blocks: d.blocks.iter().copied().collect(),
            })
            .collect();
        Self { dirs }
    }

    fn eligible_dir(&self, location: BlockStoreLocation, bytes: u64) -> Option<usize> {
        self.dirs
            .iter()
            .position(|d| location.contains(&d.location) && d.available >= bytes)
    }

    // Next lower tier alias that actually has dirs configured.
    fn next_lower_tier(&self, tier: TierAlias) -> Option<TierAlias> {
        let mut current = tier;
        while let Some(lower) = current.next_lower() {
            if self.dirs.iter().any(|d| d.location.tier() == lower) {
                return Some(lower);
            }
            current = lower;
        }
        None
    }

    // Oldest unpinned victim residing in `location`; ties break on the
    // lowest block id.
    fn pick_victim(
        &self,
        location: BlockStoreLocation,
        view: &EvictorView,
        order: &HashMap<BlockId, u64>,
    ) -> Option<(usize, BlockId, u64)> {
        let mut victim: Option<(usize, BlockId, u64)> = None;
        for (index, dir) in self.dirs.iter().enumerate() {
            if !location.contains(&dir.location) {
                continue;
            }
            for (&block_id, &size) in &dir.blocks {
                if view.is_pinned(block_id) {
                    continue;
                }
                let better = match victim {
                    None => true,
                    Some((_, best, _)) => age(order, block_id) < age(order, best),
                };
                if better {
                    victim = Some((index, block_id, size));
                }
            }
        }
        victim
    }

    // Enqueue steps until some dir in `location` has `bytes` free.
    // Demotion recurses into the lower tier with the same pin set.
    fn free_in(
        &mut self,
        bytes: u64,
        location: BlockStoreLocation,
        view: &EvictorView,
        order: &HashMap<BlockId, u64>,
        plan: &mut EvictionPlan,
    ) -> bool {
        loop {
            if self.eligible_dir(location, bytes).is_some() {
                return true;
            }
            let Some((dir_index, block_id, size)) = self.pick_victim(location, view, order)
            else {
                return false;
            };
            let src = self.dirs[dir_index].location;
            self.dirs[dir_index].blocks.remove(&block_id);

            match self.next_lower_tier(src.tier()) {
                Some(lower) => {
                    let lower_loc = BlockStoreLocation::any_dir_in_tier(lower);
                    let dst_index = if self.free_in(size, lower_loc, view, order, plan) {
                        self.eligible_dir(lower_loc, size)
                    } else {
                        None
                    };
                    match dst_index {
                        Some(dst_index) => {
                            self.dirs[dst_index].available -= size;
                            self.dirs[dir_index].available += size;
                            plan.to_move.push(BlockTransfer {
                                block_id,
                                src,
                                dst: self.dirs[dst_index].location,
                            });
                        }
                        None => {
                            self.dirs[dir_index].available += size;
                            plan.to_evict.push((block_id, src));
                        }
                    }
                }
                None => {
                    self.dirs[dir_index].available += size;
                    plan.to_evict.push((block_id, src));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::manager::{BlockStoreMeta, StorageDirMeta};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn dir_meta(
        location: BlockStoreLocation,
        capacity: u64,
        blocks: Vec<(BlockId, u64)>,
    ) -> StorageDirMeta {
        let used: u64 = blocks.iter().map(|(_, s)| s).sum();
        StorageDirMeta {
            location,
            path: PathBuf::from(format!("/data/{location}")),
            capacity_bytes: capacity,
            available_bytes: capacity - used,
            blocks,
            temp_block_count: 0,
        }
    }

    fn view(dirs: Vec<StorageDirMeta>, pinned: &[BlockId]) -> EvictorView {
        EvictorView::new(
            BlockStoreMeta { dirs },
            pinned.iter().copied().collect::<HashSet<_>>(),
        )
    }

    fn mem(index: usize) -> BlockStoreLocation {
        BlockStoreLocation::in_dir(TierAlias::Mem, index)
    }

    const B1: BlockId = BlockId::new(1000);
    const B2: BlockId = BlockId::new(1001);
    const B3: BlockId = BlockId::new(1002);

    #[test]
    fn test_empty_plan_when_space_already_free() {
        let evictor = LruEvictor::new();
        let v = view(vec![dir_meta(mem(0), 1024, vec![(B1, 512)])], &[]);
        let plan = evictor.free_space(512, mem(0), &v).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_bottom_tier_victims_are_evicted() {
        let evictor = LruEvictor::new();
        let v = view(
            vec![dir_meta(
                BlockStoreLocation::in_dir(TierAlias::Hdd, 0),
                1024,
                vec![(B1, 512), (B2, 512)],
            )],
            &[],
        );
        let plan = evictor
            .free_space(512, BlockStoreLocation::in_dir(TierAlias::Hdd, 0), &v)
            .unwrap();
        assert!(plan.to_move.is_empty());
        assert_eq!(plan.to_evict.len(), 1);
    }

    #[test]
    fn test_lru_order_and_id_tie_break() {
        let evictor = LruEvictor::new();
        evictor.on_commit_block(B1);
        evictor.on_commit_block(B2);
        evictor.on_access_block(B1);
        // B2 is now oldest

        let v = view(
            vec![dir_meta(
                BlockStoreLocation::in_dir(TierAlias::Hdd, 0),
                1024,
                vec![(B1, 512), (B2, 512)],
            )],
            &[],
        );
        let plan = evictor
            .free_space(512, BlockStoreLocation::in_dir(TierAlias::Hdd, 0), &v)
            .unwrap();
        assert_eq!(plan.to_evict, vec![(
            B2,
            BlockStoreLocation::in_dir(TierAlias::Hdd, 0)
        )]);

        // untouched blocks rank oldest, lowest id first
        let evictor = LruEvictor::new();
        let v = view(
            vec![dir_meta(
                BlockStoreLocation::in_dir(TierAlias::Hdd, 0),
                1024,
                vec![(B2, 512), (B1, 512)],
            )],
            &[],
        );
        let plan = evictor
            .free_space(512, BlockStoreLocation::in_dir(TierAlias::Hdd, 0), &v)
            .unwrap();
        assert_eq!(plan.to_evict[0].0, B1);
    }

    #[test]
    fn test_pinned_blocks_are_skipped() {
        let evictor = LruEvictor::new();
        let v = view(
            vec![dir_meta(mem(0), 1024, vec![(B1, 512), (B2, 512)])],
            &[B1],
        );
        let plan = evictor.free_space(512, mem(0), &v).unwrap();
        assert_eq!(plan.to_evict, vec![(B2, mem(0))]);
    }

    #[test]
    fn test_no_plan_when_all_pinned() {
        let evictor = LruEvictor::new();
        let v = view(vec![dir_meta(mem(0), 1024, vec![(B1, 1024)])], &[B1]);
        assert!(evictor.free_space(512, mem(0), &v).is_none());
    }

    #[test]
    fn test_no_plan_when_request_exceeds_capacity() {
        let evictor = LruEvictor::new();
        let v = view(vec![dir_meta(mem(0), 1024, vec![(B1, 512)])], &[]);
        assert!(evictor.free_space(2048, mem(0), &v).is_none());
    }

    #[test]
    fn test_victim_demoted_to_lower_tier() {
        let evictor = LruEvictor::new();
        let v = view(
            vec![
                dir_meta(mem(0), 1024, vec![(B1, 1024)]),
                dir_meta(BlockStoreLocation::in_dir(TierAlias::Hdd, 0), 2048, vec![]),
            ],
            &[],
        );
        let plan = evictor.free_space(1024, mem(0), &v).unwrap();
        assert!(plan.to_evict.is_empty());
        assert_eq!(
            plan.to_move,
            vec![BlockTransfer {
                block_id: B1,
                src: mem(0),
                dst: BlockStoreLocation::in_dir(TierAlias::Hdd, 0),
            }]
        );
    }

    #[test]
    fn test_demotion_cascades_into_lower_tier() {
        let evictor = LruEvictor::new();
        evictor.on_commit_block(B3);
        evictor.on_commit_block(B1);
        // lower tier is full; its LRU victim (B3) must be evicted to make
        // room for the demoted B1
        let v = view(
            vec![
                dir_meta(mem(0), 1024, vec![(B1, 1024)]),
                dir_meta(
                    BlockStoreLocation::in_dir(TierAlias::Hdd, 0),
                    1024,
                    vec![(B3, 1024)],
                ),
            ],
            &[],
        );
        let plan = evictor.free_space(1024, mem(0), &v).unwrap();
        assert_eq!(plan.to_evict, vec![(
            B3,
            BlockStoreLocation::in_dir(TierAlias::Hdd, 0)
        )]);
        assert_eq!(plan.to_move.len(), 1);
        assert_eq!(plan.to_move[0].block_id, B1);
    }

    #[test]
    fn test_demotion_blocked_by_pin_falls_back_to_eviction() {
        let evictor = LruEvictor::new();
        // lower tier full of pinned data: demotion infeasible, victim is
        // evicted outright
        let v = view(
            vec![
                dir_meta(mem(0), 1024, vec![(B1, 1024)]),
                dir_meta(
                    BlockStoreLocation::in_dir(TierAlias::Hdd, 0),
                    1024,
                    vec![(B3, 1024)],
                ),
            ],
            &[B3],
        );
        let plan = evictor.free_space(1024, mem(0), &v).unwrap();
        assert!(plan.to_move.is_empty());
        assert_eq!(plan.to_evict, vec![(B1, mem(0))]);
    }

    #[test]
    fn test_victims_limited_to_requested_location() {
        let evictor = LruEvictor::new();
        let v = view(
            vec![
                dir_meta(mem(0), 1024, vec![(B1, 1024)]),
                dir_meta(mem(1), 1024, vec![(B2, 1024)]),
            ],
            &[B1],
        );
        // dir 0 is pinned solid; a request against dir 0 specifically
        // must not touch dir 1
        assert!(evictor.free_space(512, mem(0), &v).is_none());
        // but a tier-wide request may free dir 1
        let plan = evictor
            .free_space(512, BlockStoreLocation::any_dir_in_tier(TierAlias::Mem), &v)
            .unwrap();
        assert_eq!(plan.to_evict, vec![(B2, mem(1))]);
    }
}
