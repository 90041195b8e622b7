//! SuperBit bucketing for cosine similarity.
//!
//! Signed random projections: each hyperplane contributes one signature
//! bit, `sign(dot(plane, profile))`, and the probability that two profiles
//! agree on a bit is `1 - angle / pi` (Charikar 2002). SuperBit
//! orthogonalizes each batch of hyperplanes, which lowers the variance of
//! the estimate (Ji et al., NIPS 2012). One batch per stage; the packed
//! signature bits select the bucket.
//!
//! Hyperplanes are drawn over the shingle vocabulary, so `prepare` must
//! see the whole dataset before any hashing.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::build::{Callback, LshFamily, ProgressData};
use crate::hash::shingling::Shingling;
use crate::node::Node;

/// SuperBit LSH family over string shingle profiles.
pub struct SuperBitFamily {
    shingling: Shingling,
    stages: usize,
    partitions: usize,
    bits_per_stage: usize,
    seed: u64,
    /// `stages * bits_per_stage` dense hyperplanes over the vocabulary,
    /// generated by `prepare`.
    hyperplanes: Vec<Vec<f64>>,
}

impl SuperBitFamily {
    pub fn new(stages: usize, partitions: usize, shingle_size: usize) -> Self {
        Self::with_seed(stages, partitions, shingle_size, 42)
    }

    /// Fix the hyperplane RNG for reproducible bucketing.
    pub fn with_seed(
        stages: usize,
        partitions: usize,
        shingle_size: usize,
        seed: u64,
    ) -> Self {
        // Enough bits to address every partition.
        let bits_per_stage = usize::max(1, partitions.next_power_of_two().trailing_zeros() as usize);
        Self {
            shingling: Shingling::new(shingle_size),
            stages,
            partitions,
            bits_per_stage,
            seed,
            hyperplanes: Vec::new(),
        }
    }

    /// One batch of `bits_per_stage` hyperplanes, orthogonalized with
    /// Gram-Schmidt as far as the dimension allows.
    fn batch(dimension: usize, bits: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut planes: Vec<Vec<f64>> = Vec::with_capacity(bits);
        for _ in 0..bits {
            let mut plane: Vec<f64> =
                (0..dimension).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect();

            for previous in planes.iter().take(dimension) {
                let dot: f64 = plane.iter().zip(previous).map(|(a, b)| a * b).sum();
                for (x, p) in plane.iter_mut().zip(previous) {
                    *x -= dot * p;
                }
            }

            let norm: f64 = plane.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 1e-12 {
                for x in &mut plane {
                    *x /= norm;
                }
            }
            planes.push(plane);
        }
        planes
    }

    fn signature(&self, stage: usize, profile: &HashMap<usize, f64>) -> usize {
        let planes =
            &self.hyperplanes[stage * self.bits_per_stage..(stage + 1) * self.bits_per_stage];
        let mut bits = 0usize;
        for (i, plane) in planes.iter().enumerate() {
            let dot: f64 = profile
                .iter()
                .map(|(&index, &weight)| plane.get(index).copied().unwrap_or(0.0) * weight)
                .sum();
            if dot >= 0.0 {
                bits |= 1 << i;
            }
        }
        bits
    }
}

impl LshFamily<String> for SuperBitFamily {
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

        let dimension = self.shingling.len().max(1);
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.hyperplanes = (0..self.stages)
            .flat_map(|_| Self::batch(dimension, self.bits_per_stage, &mut rng))
            .collect();
    }

    fn hash(&self, value: &String) -> Vec<usize> {
        let profile = self.shingling.profile_of(value);
        (0..self.stages)
            .map(|stage| self.signature(stage, &profile) % self.partitions)
            .collect()
    }
}
