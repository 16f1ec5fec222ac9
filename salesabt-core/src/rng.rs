//! Deterministic seed hierarchy.
//!
//! A master seed (the run-wide `random_state`) expands into sub-seeds for each
//! `(scope, index)` pair: the train/test shuffle, each forest tree, each boosting
//! round. Sub-seeds are derived via BLAKE3, independently of thread scheduling
//! order, so parallel fitting produces identical models regardless of thread count.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Deterministic seed hierarchy keyed by a master seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive a deterministic sub-seed for a specific `(scope, index)`.
    ///
    /// Derivation is hash-based: `sub_seed("tree", 3)` is the same value whether
    /// it is computed before or after `sub_seed("tree", 2)`.
    pub fn sub_seed(&self, scope: &str, index: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(scope.as_bytes());
        hasher.update(&index.to_le_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    /// Create a seeded StdRng for a `(scope, index)` pair.
    pub fn rng_for(&self, scope: &str, index: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(scope, index))
    }
}
