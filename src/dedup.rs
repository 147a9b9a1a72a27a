use ahash::{AHashSet, RandomState};
use parking_lot::Mutex;
use std::hash::{BuildHasher, Hash, Hasher};

/// Process-wide registry of post ids that have already been flattened.
///
/// The id space is split across independently locked shards so workers that
/// race on different ids rarely contend. Test-and-insert is atomic per id. The
/// index never evicts; it lives as long as the run.
pub struct DedupIndex {
    shards: Vec<Mutex<AHashSet<i64>>>,
    state: RandomState, // seeded for deterministic sharding
}

impl DedupIndex {
    pub const DEFAULT_SHARDS: usize = 64;

    pub fn new() -> Self {
        Self::with_shards(Self::DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        let shards = (0..count).map(|_| Mutex::new(AHashSet::with_capacity(4096))).collect();
        let state = RandomState::with_seeds(
            0x9e37_79b9_7f4a_7c15,
            0xc2b2_ae3d_27d4_eb4f,
            0x1656_67b1_9e37_79f9,
            0x27d4_eb2f_1656_67c5,
        );
        Self { shards, state }
    }

    #[inline]
    fn shard_index(&self, id: i64) -> usize {
        let mut h = self.state.build_hasher();
        id.hash(&mut h);
        (h.finish() as usize) % self.shards.len()
    }

    /// Returns true (and records `id`) the first time an id is seen, false afterwards.
    pub fn test_and_insert(&self, id: i64) -> bool {
        self.shards[self.shard_index(id)].lock().insert(id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.shards[self.shard_index(id)].lock().contains(&id)
    }

    /// Number of distinct ids recorded.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new()
    }
}
