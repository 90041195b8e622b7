//! Exact graph construction by exhaustive pairwise comparison.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::build::GraphBuilder;
use crate::error::{GraphError, Result};
use crate::graph::neighborlist::{Neighbor, NeighborList};
use crate::graph::Graph;
use crate::node::Node;
use crate::similarity::Similarity;

/// Sequential brute-force builder.
///
/// Evaluates every unordered pair exactly once; the result is the exact
/// k-nn graph for the given similarity. Quadratic, so only suitable for
/// small datasets and as the ground truth for the approximate builders.
pub struct Brute<T> {
    k: usize,
    similarity: Arc<dyn Similarity<T>>,
    computed_similarities: AtomicUsize,
}

impl<T> Brute<T> {
    pub fn new(k: usize, similarity: Arc<dyn Similarity<T>>) -> Result<Self> {
        if k == 0 {
            return Err(GraphError::InvalidParameter(
                "k must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            k,
            similarity,
            computed_similarities: AtomicUsize::new(0),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

impl<T> GraphBuilder<T> for Brute<T> {
    fn build(&mut self, nodes: Vec<Node<T>>) -> Result<Graph<T>> {
        let mut lists: Vec<NeighborList> =
            (0..nodes.len()).map(|_| NeighborList::new(self.k)).collect();

        for i in 0..nodes.len() {
            for j in 0..i {
                let sim = self
                    .similarity
                    .similarity(nodes[i].value(), nodes[j].value());
                self.computed_similarities.fetch_add(1, Ordering::Relaxed);

                lists[i].insert(Neighbor::new(nodes[j].id().clone(), sim));
                lists[j].insert(Neighbor::new(nodes[i].id().clone(), sim));
            }
        }

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
