//! Graph-based approximate search (GNNS).
//!
//! Hill-climbing over the k-nn graph with random restarts, as described in
//! "Fast Online k-nn Graph Building" (Debatty et al., arXiv:1602.06819).
//! Each query gets a budget of `n / speedup` similarity evaluations; a
//! restart seed is discarded when it scores below the best descent so far
//! divided by `expansion`, and each descent step also probes `long_jumps`
//! random nodes to simulate the long-range edges of a small-world graph.
//!
//! The descent is greedy first-improvement: scanning a neighbor list stops
//! at the first candidate that beats the current node.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;

use crate::error::{GraphError, Result};
use crate::graph::neighborlist::{Neighbor, NeighborList};
use crate::graph::{
    Graph, DEFAULT_SEARCH_EXPANSION, DEFAULT_SEARCH_LONG_JUMPS, DEFAULT_SEARCH_SPEEDUP,
};
use crate::node::NodeId;
use crate::stats::StatisticsContainer;

/// Knobs of the graph-based search.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Target speedup compared to exhaustive search. Must be > 1.
    pub speedup: f64,
    /// Random nodes probed at each descent step.
    pub long_jumps: usize,
    /// Restart filter: a seed scoring below `best / expansion` is
    /// discarded. Must be > 1.
    pub expansion: f64,
    /// Seed for the restart/jump RNG. `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            speedup: DEFAULT_SEARCH_SPEEDUP,
            long_jumps: DEFAULT_SEARCH_LONG_JUMPS,
            expansion: DEFAULT_SEARCH_EXPANSION,
            seed: None,
        }
    }
}

impl SearchParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.speedup <= 1.0 {
            return Err(GraphError::InvalidParameter(format!(
                "speedup must be > 1.0, got {}",
                self.speedup
            )));
        }
        if self.expansion <= 1.0 {
            return Err(GraphError::InvalidParameter(format!(
                "expansion must be > 1.0, got {}",
                self.expansion
            )));
        }
        Ok(())
    }
}

impl<T> Graph<T> {
    /// Approximate search for the `k` nodes most similar to `query`, with
    /// default parameters.
    pub fn fast_search(&self, query: &T, k: usize) -> Result<NeighborList> {
        self.fast_search_with(
            query,
            k,
            &SearchParams::default(),
            &StatisticsContainer::new(),
        )
    }

    /// Approximate search for the `k` nodes most similar to `query`.
    ///
    /// Falls back to an exhaustive scan when `k` or the similarity budget
    /// covers the whole graph. Exhausting the budget is not an error: the
    /// best nodes visited so far are returned.
    pub fn fast_search_with(
        &self,
        query: &T,
        k: usize,
        params: &SearchParams,
        stats: &StatisticsContainer,
    ) -> Result<NeighborList> {
        params.validate()?;
        let similarity = self
            .similarity
            .as_ref()
            .ok_or(GraphError::MissingSimilarity)?;

        let n = self.nodes.len();
        let max_similarities = (n as f64 / params.speedup) as usize;

        // Looking for more nodes than the graph contains, or a budget that
        // covers everything: exhaustive scan.
        if k >= n || max_similarities >= n {
            let mut nl = NeighborList::new(k.max(1));
            for node in self.nodes.values() {
                stats.inc_search_similarities();
                nl.insert(Neighbor::new(
                    node.id().clone(),
                    similarity.similarity(query, node.value()),
                ));
            }
            return Ok(nl);
        }

        let ids = self.sorted_ids();
        let mut rng: Box<dyn RngCore> = match params.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };

        // id -> similarity with the query
        let mut visited: HashMap<NodeId, f64> = HashMap::new();
        let mut global_best = 0.0f64;

        'restart: while stats.search_similarities() < max_similarities {
            stats.inc_search_restarts();

            let seed_id = &ids[rng.random_range(0..ids.len())];
            if visited.contains_key(seed_id) {
                continue;
            }

            let seed_node = &self.nodes[seed_id];
            let mut descent_best = similarity.similarity(query, seed_node.value());
            stats.inc_search_similarities();
            visited.insert(seed_id.clone(), descent_best);

            // Seed too far from anything found so far: discard.
            if descent_best < global_best / params.expansion {
                continue;
            }

            let mut current = seed_id.clone();

            while stats.search_similarities() < max_similarities {
                let Some(nl) = self.lists.get(&current) else {
                    // Dead end: this list lives in another partition.
                    stats.inc_search_cross_partition_restarts();
                    continue 'restart;
                };

                let mut improved: Option<NodeId> = None;

                // Long jumps: random probes outside the neighborhood.
                for _ in 0..params.long_jumps {
                    if stats.search_similarities() >= max_similarities {
                        break;
                    }
                    let other_id = &ids[rng.random_range(0..ids.len())];
                    if visited.contains_key(other_id) {
                        continue;
                    }
                    let sim = similarity.similarity(query, self.nodes[other_id].value());
                    stats.inc_search_similarities();
                    visited.insert(other_id.clone(), sim);

                    if sim > descent_best {
                        improved = Some(other_id.clone());
                        descent_best = sim;
                    }
                }

                // Neighbors of the current node, greedy first-improvement.
                for neighbor in nl {
                    if stats.search_similarities() >= max_similarities {
                        break;
                    }
                    if visited.contains_key(&neighbor.id) {
                        continue;
                    }
                    let Some(other) = self.nodes.get(&neighbor.id) else {
                        // Edge into another partition: abandon the descent.
                        stats.inc_search_cross_partition_restarts();
                        continue 'restart;
                    };
                    let sim = similarity.similarity(query, other.value());
                    stats.inc_search_similarities();
                    visited.insert(neighbor.id.clone(), sim);

                    if sim > descent_best {
                        improved = Some(neighbor.id.clone());
                        descent_best = sim;
                        break;
                    }
                }

                match improved {
                    Some(next) => current = next,
                    None => {
                        // End of the track.
                        global_best = global_best.max(descent_best);
                        break;
                    }
                }
            }
        }

        let mut nl = NeighborList::new(k.max(1));
        for (id, sim) in visited {
            nl.insert(Neighbor::new(id, sim));
        }
        Ok(nl)
    }
}

impl<T: Send + Sync> Graph<T> {
    /// Exact search: evaluate the similarity of `query` against every node,
    /// split across the worker pool, and keep the best `k`.
    pub fn search_exhaustive(&self, query: &T, k: usize) -> Result<NeighborList> {
        let similarity = self
            .similarity
            .as_ref()
            .ok_or(GraphError::MissingSimilarity)?;

        let nodes: Vec<_> = self.nodes.values().collect();
        let nl = nodes
            .par_iter()
            .fold(
                || NeighborList::new(k.max(1)),
                |mut nl, node| {
                    nl.insert(Neighbor::new(
                        node.id().clone(),
                        similarity.similarity(query, node.value()),
                    ));
                    nl
                },
            )
            .reduce(
                || NeighborList::new(k.max(1)),
                |mut a, b| {
                    a.merge(&b);
                    a
                },
            );
        Ok(nl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::sync::Arc;

    fn integer_similarity() -> Arc<dyn crate::similarity::Similarity<i64>> {
        Arc::new(|a: &i64, b: &i64| 1.0 / (1.0 + (a - b).abs() as f64))
    }

    fn line_graph(n: i64) -> Graph<i64> {
        // Chain: each node linked to its two closest values.
        let mut g = Graph::new(2);
        g.set_similarity(integer_similarity());
        for i in 0..n {
            let mut nl = NeighborList::new(2);
            if i > 0 {
                nl.insert(Neighbor::new((i - 1).to_string(), 0.5));
            }
            if i < n - 1 {
                nl.insert(Neighbor::new((i + 1).to_string(), 0.5));
            }
            g.put(Node::new(i.to_string(), i), nl);
        }
        g
    }

    #[test]
    fn rejects_bad_parameters() {
        let g = line_graph(10);
        let stats = StatisticsContainer::new();

        let mut params = SearchParams::default();
        params.speedup = 1.0;
        assert!(matches!(
            g.fast_search_with(&3, 1, &params, &stats),
            Err(GraphError::InvalidParameter(_))
        ));

        let mut params = SearchParams::default();
        params.expansion = 0.9;
        assert!(matches!(
            g.fast_search_with(&3, 1, &params, &stats),
            Err(GraphError::InvalidParameter(_))
        ));
    }

    #[test]
    fn missing_similarity_is_an_error() {
        let mut g = line_graph(10);
        g.similarity = None;
        assert!(matches!(
            g.fast_search(&3, 1),
            Err(GraphError::MissingSimilarity)
        ));
    }

    #[test]
    fn falls_back_to_exhaustive_for_large_k() {
        let g = line_graph(5);
        let stats = StatisticsContainer::new();
        let nl = g
            .fast_search_with(&2, 10, &SearchParams::default(), &stats)
            .unwrap();

        // Every node evaluated exactly once.
        assert_eq!(stats.search_similarities(), 5);
        assert_eq!(nl.len(), 5);
        assert_eq!(nl.iter().next().unwrap().id.as_str(), "2");
    }

    #[test]
    fn respects_similarity_budget() {
        let g = line_graph(100);
        let stats = StatisticsContainer::new();
        let mut params = SearchParams::default();
        params.speedup = 4.0;
        params.seed = Some(7);

        let nl = g.fast_search_with(&50, 3, &params, &stats).unwrap();

        // Budget is a hard bound: floor(100 / 4) evaluations.
        assert!(stats.search_similarities() <= 25);
        assert!(!nl.is_empty());
        assert!(nl.len() <= 3);
    }

    #[test]
    fn exhaustive_search_finds_the_best_node() {
        let g = line_graph(50);
        let nl = g.search_exhaustive(&17, 3).unwrap();
        assert_eq!(nl.iter().next().unwrap().id.as_str(), "17");
        assert_eq!(nl.len(), 3);
    }
}
