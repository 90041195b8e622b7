//! MinHash bucketing for Jaccard similarity.
//!
//! For each hash function `h_i`, `minhash_i(S) = min over x in S of h_i(x)`;
//! the probability that two sets agree on a minhash value equals their
//! Jaccard index (Broder 1997). Each stage combines a few minhash values
//! into one bucket, so strings with a high Jaccard index collide with high
//! probability in at least one stage.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::build::{Callback, LshFamily, ProgressData};
use crate::hash::shingling::Shingling;
use crate::node::Node;

/// Minhash values combined into one bucket per stage.
const ROWS_PER_STAGE: usize = 2;

/// MinHash LSH family over string shingle sets.
pub struct MinHashFamily {
    shingling: Shingling,
    stages: usize,
    partitions: usize,
    seeds: Vec<u64>,
}

impl MinHashFamily {
    pub fn new(stages: usize, partitions: usize, shingle_size: usize) -> Self {
        Self::with_seed(stages, partitions, shingle_size, 42)
    }

    /// Fix the hash seeds for reproducible bucketing.
    pub fn with_seed(
        stages: usize,
        partitions: usize,
        shingle_size: usize,
        seed: u64,
    ) -> Self {
        // One seed per (stage, row), derived with an LCG.
        let mut seeds = Vec::with_capacity(stages * ROWS_PER_STAGE);
        let mut state = seed;
        for _ in 0..stages * ROWS_PER_STAGE {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            seeds.push(state);
        }
        Self {
            shingling: Shingling::new(shingle_size),
            stages,
            partitions,
            seeds,
        }
    }

    fn hash_with_seed<V: Hash>(value: &V, seed: u64) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        seed.hash(&mut hasher);
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn min_hash(set: &HashSet<usize>, seed: u64) -> u64 {
        set.iter()
            .map(|index| Self::hash_with_seed(index, seed))
            .min()
            .unwrap_or(u64::MAX)
    }
}

impl LshFamily<String> for MinHashFamily {
    fn prepare(&mut self, nodes: &[Node<String>], callback: Option<&Callback>) {
        for node in nodes {
            self.shingling.parse(node.value());
        }
        if let Some(callback) = callback {
            let mut data = ProgressData::new();
            data.insert("step".into(), "dictionary computed".into());
            data.insert("dictionary_size".into(), self.shingling.len().into());
            callback(&data);
        }
    }

    fn hash(&self, value: &String) -> Vec<usize> {
        let set = self.shingling.set_of(value);
        (0..self.stages)
            .map(|stage| {
                let rows = &self.seeds[stage * ROWS_PER_STAGE..(stage + 1) * ROWS_PER_STAGE];
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                for &seed in rows {
                    Self::min_hash(&set, seed).hash(&mut hasher);
                }
                (hasher.finish() % self.partitions as u64) as usize
            })
            .collect()
    }
}
