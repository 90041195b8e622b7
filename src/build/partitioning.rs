//! LSH partitioning builder.
//!
//! Buckets the dataset with a locality-sensitive hash family, builds a
//! graph on each bucket with an inner builder, and merges the per-bucket
//! neighbor lists across all stages. Similar items collide with high
//! probability, so most true neighbors share at least one bucket; using
//! several independent stages recovers the pairs a single hashing misses.
//!
//! Any builder satisfying [`GraphBuilder`] works as the inner builder,
//! including another partitioner. The default is the exact brute-force
//! builder, which makes each bucket locally exact.

use std::sync::Arc;

use crate::build::{Brute, Callback, GraphBuilder, ProgressData};
use crate::error::{GraphError, Result};
use crate::graph::neighborlist::NeighborList;
use crate::graph::Graph;
use crate::node::Node;
use crate::similarity::Similarity;

/// A locality-sensitive hash family: similar values collide with high
/// probability.
pub trait LshFamily<T>: Send + Sync {
    /// Called once per build with the whole dataset before any hashing.
    /// Families that need a shared vocabulary (shingling) build it here.
    fn prepare(&mut self, _nodes: &[Node<T>], _callback: Option<&Callback>) {}

    /// Bucket of `value` for each stage; every entry must be in
    /// `[0, partitions)`.
    fn hash(&self, value: &T) -> Vec<usize>;
}

/// Generic LSH partitioning builder.
pub struct Partitioning<T, F: LshFamily<T>> {
    k: usize,
    stages: usize,
    partitions: usize,
    family: F,
    inner: Box<dyn GraphBuilder<T>>,
    similarity: Arc<dyn Similarity<T>>,
    callback: Option<Callback>,
    estimated_speedup: Option<f64>,
}

impl<T, F: LshFamily<T>> Partitioning<T, F> {
    /// Partitioner with `stages` independent hash tables of `partitions`
    /// buckets each, and the brute-force builder inside.
    pub fn new(
        k: usize,
        stages: usize,
        partitions: usize,
        family: F,
        similarity: Arc<dyn Similarity<T>>,
    ) -> Result<Self>
    where
        T: 'static,
    {
        if k == 0 {
            return Err(GraphError::InvalidParameter(
                "k must be >= 1".to_string(),
            ));
        }
        if stages == 0 {
            return Err(GraphError::InvalidParameter(
                "stages must be >= 1".to_string(),
            ));
        }
        if partitions == 0 {
            return Err(GraphError::InvalidParameter(
                "partitions must be >= 1".to_string(),
            ));
        }
        let inner = Box::new(Brute::new(k, Arc::clone(&similarity))?);
        Ok(Self {
            k,
            stages,
            partitions,
            family,
            inner,
            similarity,
            callback: None,
            estimated_speedup: None,
        })
    }

    /// Replace the inner builder. It must be configured with the same `k`
    /// as the partitioner.
    pub fn set_internal_builder(&mut self, inner: Box<dyn GraphBuilder<T>>) {
        self.inner = inner;
    }

    pub fn set_callback(&mut self, callback: Callback) {
        self.callback = Some(callback);
    }

    /// `n / average bucket size` of the last build: the rough factor by
    /// which bucketing cut the pairwise work.
    pub fn estimated_speedup(&self) -> Option<f64> {
        self.estimated_speedup
    }

    fn report(&self, step: &str, extra: &[(&str, usize)]) {
        if let Some(callback) = &self.callback {
            let mut data = ProgressData::new();
            data.insert("step".into(), step.into());
            for &(key, value) in extra {
                data.insert(key.into(), value.into());
            }
            callback(&data);
        }
    }
}

impl<T, F: LshFamily<T>> GraphBuilder<T> for Partitioning<T, F> {
    fn build(&mut self, nodes: Vec<Node<T>>) -> Result<Graph<T>> {
        self.family.prepare(&nodes, self.callback.as_ref());

        // Bucket every node, once per stage.
        let mut buckets: Vec<Vec<Vec<Node<T>>>> =
            vec![vec![Vec::new(); self.partitions]; self.stages];
        for node in &nodes {
            let hashes = self.family.hash(node.value());
            if hashes.len() != self.stages {
                return Err(GraphError::InvalidParameter(format!(
                    "hash family returned {} stages, expected {}",
                    hashes.len(),
                    self.stages
                )));
            }
            for (stage, &bucket) in hashes.iter().enumerate() {
                if bucket >= self.partitions {
                    return Err(GraphError::InvalidParameter(format!(
                        "hash family returned bucket {bucket}, expected < {}",
                        self.partitions
                    )));
                }
                buckets[stage][bucket].push(node.clone());
            }
        }
        self.report("hashes computed", &[("computed_hashes", nodes.len())]);

        let mut graph = Graph::new(self.k);
        graph.set_similarity(Arc::clone(&self.similarity));
        for node in &nodes {
            graph.put(node.clone(), NeighborList::new(self.k));
        }

        // Build each bucket with the inner builder and merge the lists.
        let mut bucket_count = 0usize;
        let mut bucket_total = 0usize;
        for (stage, stage_buckets) in buckets.into_iter().enumerate() {
            for bucket in stage_buckets {
                if bucket.is_empty() {
                    continue;
                }
                bucket_count += 1;
                bucket_total += bucket.len();

                let sub = self.inner.build(bucket)?;
                for (node, nl) in sub.entries() {
                    if let Some(target) = graph.get_mut(node.id()) {
                        target.merge(nl);
                    }
                }
            }
            self.report(
                "stage merged",
                &[
                    ("stage", stage),
                    ("computed_similarities", self.inner.computed_similarities()),
                ],
            );
        }

        if bucket_count > 0 {
            let avg = bucket_total as f64 / bucket_count as f64;
            self.estimated_speedup = Some(nodes.len() as f64 / avg.max(1.0));
        }

        Ok(graph)
    }

    fn computed_similarities(&self) -> usize {
        self.inner.computed_similarities()
    }
}
