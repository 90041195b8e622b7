//! Online graph maintenance: add and remove nodes without rebuilding.
//!
//! `fast_add` locates the new node's neighbor list with the graph-based
//! search, then repairs nearby lists through a bounded-depth breadth-first
//! walk. `fast_remove` drops every reference to the removed node and
//! refills the affected lists from the surrounding neighborhood. Both are
//! approximate: the update radius is bounded by `update_depth`.
//!
//! When a window size is set, each `fast_add` first evicts the node that
//! fell out of the window, so the graph tracks the last `window_size`
//! insertions.

use std::collections::{HashSet, VecDeque};

use smallvec::SmallVec;

use crate::error::{GraphError, Result};
use crate::graph::neighborlist::{Neighbor, NeighborList};
use crate::graph::search::SearchParams;
use crate::graph::{Graph, DEFAULT_UPDATE_DEPTH};
use crate::node::{Node, NodeId};
use crate::stats::StatisticsContainer;

impl<T> Graph<T> {
    /// Add a node by exhaustive comparison: the similarity with every
    /// existing node is computed, and both endpoints of each new edge are
    /// offered to the respective lists.
    pub fn add(&mut self, node: Node<T>) -> Result<()> {
        if self.contains(node.id()) {
            return Err(GraphError::DuplicateId(node.id().to_string()));
        }
        let similarity = self
            .similarity
            .clone()
            .ok_or(GraphError::MissingSimilarity)?;

        self.sequences
            .insert(node.id().clone(), self.current_sequence);
        self.current_sequence += 1;

        let mut nl = NeighborList::new(self.k);
        let mut touched: Vec<(NodeId, f64)> = Vec::with_capacity(self.nodes.len());
        for other in self.nodes.values() {
            let sim = similarity.similarity(node.value(), other.value());
            nl.insert(Neighbor::new(other.id().clone(), sim));
            touched.push((other.id().clone(), sim));
        }
        for (id, sim) in touched {
            if let Some(other_nl) = self.lists.get_mut(&id) {
                other_nl.insert(Neighbor::new(node.id().clone(), sim));
            }
        }

        self.put(node, nl);
        Ok(())
    }

    /// Add a node with the approximate online algorithm and default
    /// parameters.
    pub fn fast_add(&mut self, node: Node<T>) -> Result<()> {
        self.fast_add_with(
            node,
            &SearchParams::default(),
            DEFAULT_UPDATE_DEPTH,
            &StatisticsContainer::new(),
        )
    }

    /// Add a node with the approximate online algorithm from "Fast Online
    /// k-nn Graph Building" (Debatty et al.).
    ///
    /// The new node's list comes from a graph-based search; existing lists
    /// within `update_depth` hops of it are then offered the new node.
    /// With a non-zero window size, the node that fell out of the window
    /// is evicted first.
    pub fn fast_add_with(
        &mut self,
        node: Node<T>,
        params: &SearchParams,
        update_depth: usize,
        stats: &StatisticsContainer,
    ) -> Result<()> {
        if self.contains(node.id()) {
            return Err(GraphError::DuplicateId(node.id().to_string()));
        }
        params.validate()?;
        let similarity = self
            .similarity
            .clone()
            .ok_or(GraphError::MissingSimilarity)?;

        self.sequences
            .insert(node.id().clone(), self.current_sequence);
        self.current_sequence += 1;

        // Evict before searching: one less node to compare against.
        if self.window_size != 0 {
            if let Some(expired) = self.current_sequence.checked_sub(self.window_size + 1) {
                let evict = self
                    .sequences
                    .iter()
                    .find(|(_, &seq)| seq == expired)
                    .map(|(id, _)| id.clone());
                if let Some(id) = evict {
                    self.fast_remove_with(&id, update_depth, stats)?;
                }
            }
        }

        let nl = self.fast_search_with(node.value(), self.k, params, stats)?;
        let new_id = node.id().clone();
        let value = node.value();

        // Walk outward from the new node's neighbors and offer the new
        // node to every list reached. The new node itself is marked
        // visited up front so it never lands in its own list.
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(new_id.clone());

        let mut frontier: VecDeque<NodeId> = nl.iter().map(|n| n.id.clone()).collect();

        for _ in 0..update_depth {
            let mut next = VecDeque::new();
            while let Some(other_id) = frontier.pop_front() {
                if !visited.insert(other_id.clone()) {
                    continue;
                }
                let Some(other_nl) = self.lists.get(&other_id) else {
                    continue;
                };
                let expand: SmallVec<[NodeId; 16]> = other_nl
                    .iter()
                    .filter(|n| !visited.contains(&n.id))
                    .map(|n| n.id.clone())
                    .collect();
                next.extend(expand);

                let Some(other) = self.nodes.get(&other_id) else {
                    continue;
                };
                let sim = similarity.similarity(value, other.value());
                stats.inc_add_similarities();
                if let Some(other_nl) = self.lists.get_mut(&other_id) {
                    other_nl.insert(Neighbor::new(new_id.clone(), sim));
                }
            }
            frontier = next;
        }

        self.put(node, nl);
        Ok(())
    }

    /// Remove a node with default parameters.
    pub fn fast_remove(&mut self, id: &NodeId) -> Result<()> {
        self.fast_remove_with(id, DEFAULT_UPDATE_DEPTH, &StatisticsContainer::new())
    }

    /// Remove a node and repair the lists that referenced it.
    ///
    /// Every list containing the node drops it, then gets offered
    /// replacement candidates gathered by a breadth-first walk of depth
    /// `update_depth` around the removed node and the affected lists.
    pub fn fast_remove_with(
        &mut self,
        id: &NodeId,
        update_depth: usize,
        stats: &StatisticsContainer,
    ) -> Result<()> {
        let similarity = self
            .similarity
            .clone()
            .ok_or(GraphError::MissingSimilarity)?;

        // Drop the node from every list that references it.
        let mut to_update: Vec<NodeId> = Vec::new();
        for (owner, nl) in self.lists.iter_mut() {
            if nl.remove(id) {
                to_update.push(owner.clone());
            }
        }

        // Candidate replacements: the neighborhood of the removed node and
        // of the lists it appeared in.
        let mut starting: Vec<NodeId> = Vec::with_capacity(to_update.len() + 1);
        starting.push(id.clone());
        starting.extend(to_update.iter().cloned());

        let mut candidates = self.find_neighbors(&starting, update_depth);
        candidates.retain(|c| c != id);

        for owner in &to_update {
            let Some(owner_node) = self.nodes.get(owner) else {
                continue;
            };
            let owner_value = owner_node.value();

            let mut offers: SmallVec<[(NodeId, f64); 16]> = SmallVec::new();
            for candidate in &candidates {
                if candidate == owner {
                    continue;
                }
                let Some(candidate_node) = self.nodes.get(candidate) else {
                    continue;
                };
                let sim = similarity.similarity(owner_value, candidate_node.value());
                stats.inc_remove_similarities();
                offers.push((candidate.clone(), sim));
            }

            if let Some(nl) = self.lists.get_mut(owner) {
                for (candidate, sim) in offers {
                    nl.insert(Neighbor::new(candidate, sim));
                }
            }
        }

        self.nodes.remove(id);
        self.lists.remove(id);
        self.sequences.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn integer_similarity() -> Arc<dyn crate::similarity::Similarity<i64>> {
        Arc::new(|a: &i64, b: &i64| 1.0 / (1.0 + (a - b).abs() as f64))
    }

    fn graph_with(values: &[i64], k: usize) -> Graph<i64> {
        let mut g = Graph::new(k);
        g.set_similarity(integer_similarity());
        for &v in values {
            g.add(Node::new(v.to_string(), v)).unwrap();
        }
        g
    }

    #[test]
    fn add_links_both_endpoints() {
        let g = graph_with(&[0, 10, 20], 2);

        assert_eq!(g.len(), 3);
        assert!(g.get(&"0".into()).unwrap().contains(&"10".into()));
        assert!(g.get(&"10".into()).unwrap().contains(&"0".into()));
        assert!(g.get(&"20".into()).unwrap().contains(&"10".into()));
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut g = graph_with(&[0, 10], 2);
        let before = g.len();

        let err = g.add(Node::new("10", 99)).unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("10".to_string()));
        assert_eq!(g.len(), before);

        let err = g.fast_add(Node::new("0", 5)).unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("0".to_string()));
        assert_eq!(g.len(), before);
    }

    #[test]
    fn fast_add_inserts_and_updates_neighborhood() {
        let mut g = graph_with(&[0, 10, 20, 30, 40], 2);
        g.fast_add(Node::new("15", 15)).unwrap();

        assert_eq!(g.len(), 6);
        let nl = g.get(&"15".into()).unwrap();
        assert!(!nl.is_empty());
        assert!(!nl.contains(&"15".into()));

        // 15 is the best possible neighbor of 10 and 20; with the default
        // update depth the whole (tiny) graph is within reach.
        assert!(g.get(&"10".into()).unwrap().contains(&"15".into()));
        assert!(g.get(&"20".into()).unwrap().contains(&"15".into()));
    }

    #[test]
    fn fast_add_honors_update_depth_zero() {
        let mut g = graph_with(&[0, 10, 20, 30, 40], 2);
        g.fast_add_with(
            Node::new("15", 15),
            &SearchParams::default(),
            0,
            &StatisticsContainer::new(),
        )
        .unwrap();

        // Depth 0: the new node gets its list, but no existing list is
        // touched.
        assert!(g.get(&"15".into()).is_some());
        for (node, nl) in g.entries() {
            if node.id().as_str() != "15" {
                assert!(!nl.contains(&"15".into()));
            }
        }
    }

    #[test]
    fn fast_remove_leaves_no_dangling_references() {
        let mut g = graph_with(&[0, 10, 20, 30, 40], 3);
        g.fast_remove(&"20".into()).unwrap();

        assert_eq!(g.len(), 4);
        assert!(!g.contains(&"20".into()));
        for (_, nl) in g.entries() {
            assert!(!nl.contains(&"20".into()));
        }
    }

    #[test]
    fn fast_remove_refills_from_neighborhood() {
        let mut g = graph_with(&[0, 10, 20, 30, 40], 2);
        g.fast_remove(&"20".into()).unwrap();

        // 10 lost its best neighbor; the repair walk offers replacements.
        let nl = g.get(&"10".into()).unwrap();
        assert_eq!(nl.len(), 2);
    }

    #[test]
    fn sliding_window_keeps_the_last_w_nodes() {
        let mut g: Graph<i64> = Graph::new(2);
        g.set_similarity(integer_similarity());
        g.set_window_size(3);

        for v in 0..8i64 {
            g.fast_add(Node::new(v.to_string(), v)).unwrap();
        }

        assert_eq!(g.len(), 3);
        let mut present: Vec<String> =
            g.nodes().map(|n| n.id().to_string()).collect();
        present.sort();
        assert_eq!(present, vec!["5", "6", "7"]);
    }
}
