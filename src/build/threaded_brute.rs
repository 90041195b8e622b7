//! Exact graph construction, block-parallel.
//!
//! The n x n lower triangle of the pairwise similarity matrix is tiled
//! into square blocks; each block is evaluated by a worker and produces a
//! partial graph holding neighbor lists for the nodes it touched. A single
//! reduction pass then merges the partials into the final graph.
//!
//! Merging relies on the monotone-improve insert of the neighbor list:
//! inserts are associative and idempotent, so overlapping partials reduce
//! to the same top-k as a single sequential pass.
//!
//! A worker that panics (a similarity measure misbehaving on some pair)
//! only costs the edges of its own block: the partial is logged and
//! discarded, and the rest of the graph is still produced.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::build::GraphBuilder;
use crate::error::{GraphError, Result};
use crate::graph::neighborlist::{Neighbor, NeighborList};
use crate::graph::Graph;
use crate::node::Node;
use crate::similarity::Similarity;

/// Default block side.
pub const NODES_PER_BLOCK: usize = 1000;

/// Parallel brute-force builder.
pub struct ThreadedBrute<T> {
    k: usize,
    similarity: Arc<dyn Similarity<T>>,
    block_size: usize,
    thread_count: Option<usize>,
    computed_similarities: AtomicUsize,
}

impl<T: Send + Sync> ThreadedBrute<T> {
    pub fn new(k: usize, similarity: Arc<dyn Similarity<T>>) -> Result<Self> {
        if k == 0 {
            return Err(GraphError::InvalidParameter(
                "k must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            k,
            similarity,
            block_size: NODES_PER_BLOCK,
            thread_count: None,
            computed_similarities: AtomicUsize::new(0),
        })
    }

    /// Side of the square blocks the pair matrix is tiled into.
    pub fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        if block_size == 0 {
            return Err(GraphError::InvalidParameter(
                "block size must be >= 1".to_string(),
            ));
        }
        self.block_size = block_size;
        Ok(())
    }

    /// Cap the worker pool. Default: one worker per available core.
    pub fn set_thread_count(&mut self, threads: usize) -> Result<()> {
        if threads == 0 {
            return Err(GraphError::InvalidParameter(
                "thread count must be >= 1".to_string(),
            ));
        }
        self.thread_count = Some(threads);
        Ok(())
    }

    /// Evaluate one block of the lower triangle. Returns the partial
    /// neighbor lists, keyed by node position.
    fn block(
        &self,
        nodes: &[Node<T>],
        row_start: usize,
        col_start: usize,
    ) -> HashMap<usize, NeighborList> {
        let n = nodes.len();
        let row_end = (row_start + self.block_size).min(n);
        let col_end = (col_start + self.block_size).min(n);

        let mut partial: HashMap<usize, NeighborList> = HashMap::new();

        for i in row_start..row_end {
            for j in col_start..col_end {
                if j == i {
                    break;
                }
                let sim = self
                    .similarity
                    .similarity(nodes[i].value(), nodes[j].value());
                self.computed_similarities.fetch_add(1, Ordering::Relaxed);

                partial
                    .entry(i)
                    .or_insert_with(|| NeighborList::new(self.k))
                    .insert(Neighbor::new(nodes[j].id().clone(), sim));
                partial
                    .entry(j)
                    .or_insert_with(|| NeighborList::new(self.k))
                    .insert(Neighbor::new(nodes[i].id().clone(), sim));
            }
        }

        partial
    }

    fn build_inner(&self, nodes: &[Node<T>]) -> Vec<NeighborList> {
        let n = nodes.len();

        let mut blocks: Vec<(usize, usize)> = Vec::new();
        for i in (0..n).step_by(self.block_size) {
            for j in (0..=i).step_by(self.block_size) {
                blocks.push((i, j));
            }
        }

        let partials: Vec<Option<HashMap<usize, NeighborList>>> = blocks
            .par_iter()
            .map(|&(i, j)| {
                match catch_unwind(AssertUnwindSafe(|| self.block(nodes, i, j))) {
                    Ok(partial) => Some(partial),
                    Err(_) => {
                        tracing::warn!(
                            row_start = i,
                            col_start = j,
                            "brute block worker failed, discarding its partial graph"
                        );
                        None
                    }
                }
            })
            .collect();

        // Reduce: merge every partial into the aggregate lists.
        let mut lists: Vec<NeighborList> =
            (0..n).map(|_| NeighborList::new(self.k)).collect();
        for partial in partials.into_iter().flatten() {
            for (idx, nl) in partial {
                lists[idx].merge(&nl);
            }
        }
        lists
    }
}

impl<T: Send + Sync> GraphBuilder<T> for ThreadedBrute<T> {
    fn build(&mut self, nodes: Vec<Node<T>>) -> Result<Graph<T>> {
        let lists = match self.thread_count {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| GraphError::InvalidParameter(e.to_string()))?;
                pool.install(|| self.build_inner(&nodes))
            }
            None => self.build_inner(&nodes),
        };

        let mut graph = Graph::new(self.k);
        graph.set_similarity(Arc::clone(&self.similarity));
        for (node, nl) in nodes.into_iter().zip(lists) {
            graph.put(node, nl);
        }
        Ok(graph)
    }

    fn computed_similarities(&self) -> usize {
        self.computed_similarities.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::Brute;

    fn integer_similarity() -> Arc<dyn Similarity<i64>> {
        Arc::new(|a: &i64, b: &i64| 1.0 / (1.0 + (a - b).abs() as f64))
    }

    fn nodes(values: impl Iterator<Item = i64>) -> Vec<Node<i64>> {
        values.map(|v| Node::new(v.to_string(), v)).collect()
    }

    #[test]
    fn matches_the_sequential_brute() {
        let values: Vec<i64> = (0..197).map(|i| i * 7 % 500).collect();

        let mut sequential = Brute::new(5, integer_similarity()).unwrap();
        let expected = sequential.build(nodes(values.iter().copied())).unwrap();

        let mut threaded = ThreadedBrute::new(5, integer_similarity()).unwrap();
        // Small blocks so the triangle actually tiles.
        threaded.set_block_size(32).unwrap();
        let got = threaded.build(nodes(values.iter().copied())).unwrap();

        assert_eq!(got.len(), expected.len());
        for (node, nl) in expected.entries() {
            let other = got.get(node.id()).unwrap();
            let a: Vec<&str> = nl.iter().map(|n| n.id.as_str()).collect();
            let b: Vec<&str> = other.iter().map(|n| n.id.as_str()).collect();
            assert_eq!(a, b, "neighbor lists differ for node {}", node.id());
        }
    }

    #[test]
    fn counts_every_pair_once() {
        let mut threaded = ThreadedBrute::new(3, integer_similarity()).unwrap();
        threaded.set_block_size(10).unwrap();
        threaded.build(nodes(0..50)).unwrap();
        assert_eq!(threaded.computed_similarities(), 50 * 49 / 2);
    }

    #[test]
    fn a_panicking_pair_only_costs_its_block() {
        let sim: Arc<dyn Similarity<i64>> = Arc::new(|a: &i64, b: &i64| {
            if (*a, *b) == (13, 12) || (*a, *b) == (12, 13) {
                panic!("bad pair");
            }
            1.0 / (1.0 + (a - b).abs() as f64)
        });

        let mut threaded = ThreadedBrute::new(3, sim).unwrap();
        threaded.set_block_size(4).unwrap();
        let graph = threaded.build(nodes(0..20)).unwrap();

        // The graph is still produced, over all nodes.
        assert_eq!(graph.len(), 20);
        // Nodes far from the failed block keep their exact lists.
        let nl = graph.get(&"0".into()).unwrap();
        assert_eq!(nl.iter().next().unwrap().id.as_str(), "1");
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(ThreadedBrute::new(0, integer_similarity()).is_err());
        let mut b = ThreadedBrute::new(2, integer_similarity()).unwrap();
        assert!(b.set_block_size(0).is_err());
        assert!(b.set_thread_count(0).is_err());
    }
}
