//! k-nn graph: a mapping node -> neighbor list.
//!
//! The container itself is a plain mapping plus the active similarity
//! measure and the builder parameter `k`. It is not synchronized; the
//! builders manage concurrency and hand back an owned graph.
//!
//! Sub-graphs (connected components, partition buckets) reference the same
//! payloads through `Arc`, so splitting a graph never copies item data. A
//! neighbor id that is not a key of the graph marks a cross-partition edge;
//! every traversal here treats such edges as absent rather than as errors.

pub mod components;
pub mod gexf;
pub mod neighborlist;
pub mod online;
pub mod search;

pub use neighborlist::{Neighbor, NeighborList};
pub use search::SearchParams;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::node::{Node, NodeId};
use crate::similarity::Similarity;

/// Default number of edges per node.
pub const DEFAULT_K: usize = 10;

/// Default speedup of graph-based search compared to exhaustive search.
pub const DEFAULT_SEARCH_SPEEDUP: f64 = 4.0;

/// Default expansion parameter of graph-based search.
pub const DEFAULT_SEARCH_EXPANSION: f64 = 1.2;

/// Default number of random long jumps per descent step.
pub const DEFAULT_SEARCH_LONG_JUMPS: usize = 2;

/// Default depth of the neighborhood updated by `fast_add` / `fast_remove`.
pub const DEFAULT_UPDATE_DEPTH: usize = 3;

/// k-nn graph over payloads of type `T`.
pub struct Graph<T> {
    pub(crate) nodes: HashMap<NodeId, Node<T>>,
    pub(crate) lists: HashMap<NodeId, NeighborList>,
    /// Insertion sequence numbers, used by the sliding window. Nodes that
    /// entered through a bulk builder carry no sequence and are never
    /// evicted.
    pub(crate) sequences: HashMap<NodeId, u64>,
    pub(crate) similarity: Option<Arc<dyn Similarity<T>>>,
    pub(crate) k: usize,
    pub(crate) window_size: u64,
    pub(crate) current_sequence: u64,
}

impl<T> Graph<T> {
    /// Empty graph with `k` edges per node (`k >= 1`).
    pub fn new(k: usize) -> Self {
        debug_assert!(k >= 1, "k must be >= 1");
        Self {
            nodes: HashMap::new(),
            lists: HashMap::new(),
            sequences: HashMap::new(),
            similarity: None,
            k,
            window_size: 0,
            current_sequence: 0,
        }
    }

    /// Empty graph with the default k.
    pub fn with_default_k() -> Self {
        Self::new(DEFAULT_K)
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Set k for nodes added later. The existing graph is not modified.
    pub fn set_k(&mut self, k: usize) {
        debug_assert!(k >= 1, "k must be >= 1");
        self.k = k;
    }

    pub fn similarity(&self) -> Option<&Arc<dyn Similarity<T>>> {
        self.similarity.as_ref()
    }

    /// Set the similarity measure used to search and maintain the graph.
    pub fn set_similarity(&mut self, similarity: Arc<dyn Similarity<T>>) {
        self.similarity = Some(similarity);
    }

    /// Number of nodes to keep in the graph. 0 (the default) = unlimited.
    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    pub fn set_window_size(&mut self, window_size: u64) {
        self.window_size = window_size;
    }

    /// Insert a node together with its neighbor list.
    ///
    /// Replaces both the payload and the list when the id is already
    /// present.
    pub fn put(&mut self, node: Node<T>, neighbors: NeighborList) {
        let id = node.id().clone();
        self.nodes.insert(id.clone(), node);
        self.lists.insert(id, neighbors);
    }

    /// Insert a node without a neighbor list (cross-partition member).
    pub fn put_node(&mut self, node: Node<T>) {
        self.nodes.insert(node.id().clone(), node);
    }

    /// The neighbor list of `id`, or `None` if the node is absent or its
    /// list lives in another partition. Absence is never an error.
    pub fn get(&self, id: &NodeId) -> Option<&NeighborList> {
        self.lists.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &NodeId) -> Option<&mut NeighborList> {
        self.lists.get_mut(id)
    }

    /// The node stored under `id`.
    pub fn node(&self, id: &NodeId) -> Option<&Node<T>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Some node of the graph, if any. Iteration order is unspecified.
    pub fn first(&self) -> Option<&Node<T>> {
        self.nodes.values().next()
    }

    /// Iterate over the nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.values()
    }

    /// Iterate over `(node, neighbor list)` entries. Nodes without a list
    /// are skipped.
    pub fn entries(&self) -> impl Iterator<Item = (&Node<T>, &NeighborList)> {
        self.nodes.values().filter_map(|node| {
            self.lists.get(node.id()).map(|nl| (node, nl))
        })
    }

    /// Node ids in sorted order. Used wherever a deterministic iteration
    /// order matters (seeded search, component output).
    pub(crate) fn sorted_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every edge with a similarity below `threshold`.
    pub fn prune(&mut self, threshold: f64) {
        for nl in self.lists.values_mut() {
            nl.prune(threshold);
        }
    }

    /// Breadth-first neighborhood: starting from `starting`, expand through
    /// neighbor-list edges for `depth` rounds and return every id reached
    /// (the starting points included), in discovery order.
    ///
    /// Edges into other partitions (ids without a stored list) end the
    /// expansion at that id.
    pub fn find_neighbors(&self, starting: &[NodeId], depth: usize) -> Vec<NodeId> {
        let mut seen: HashSet<NodeId> = starting.iter().cloned().collect();
        let mut result: Vec<NodeId> = starting.to_vec();
        let mut frontier: VecDeque<NodeId> = starting.iter().cloned().collect();

        for _ in 0..depth {
            let mut next = VecDeque::new();
            while let Some(id) = frontier.pop_front() {
                let Some(nl) = self.lists.get(&id) else {
                    continue;
                };
                for neighbor in nl {
                    if seen.insert(neighbor.id.clone()) {
                        result.push(neighbor.id.clone());
                        next.push_back(neighbor.id.clone());
                    }
                }
            }
            frontier = next;
        }

        result
    }
}

// Deep-copies the neighbor lists; payloads stay shared through `Arc`.
impl<T> Clone for Graph<T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            lists: self.lists.clone(),
            sequences: self.sequences.clone(),
            similarity: self.similarity.clone(),
            k: self.k,
            window_size: self.window_size,
            current_sequence: self.current_sequence,
        }
    }
}

impl<T> std::fmt::Debug for Graph<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("k", &self.k)
            .field("window_size", &self.window_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> Graph<i64> {
        // 1 -> 2 -> 3, 3 -> 1, 4 -> 3
        let mut g = Graph::new(2);
        for i in 1..=4 {
            g.put_node(Node::new(i.to_string(), i));
        }
        let edge = |to: &str, s: f64| {
            let mut nl = NeighborList::new(2);
            nl.insert(Neighbor::new(to, s));
            nl
        };
        g.lists.insert("1".into(), edge("2", 0.9));
        g.lists.insert("2".into(), edge("3", 0.5));
        g.lists.insert("3".into(), edge("1", 0.1));
        g.lists.insert("4".into(), edge("3", 0.05));
        g
    }

    #[test]
    fn prune_removes_weak_edges() {
        let mut g = sample_graph();
        g.prune(0.2);

        let remaining: usize = g.lists.values().map(|nl| nl.len()).sum();
        assert_eq!(remaining, 2);
        assert!(g.get(&"1".into()).unwrap().contains(&"2".into()));
        assert!(g.get(&"2".into()).unwrap().contains(&"3".into()));
    }

    #[test]
    fn find_neighbors_expands_by_rounds() {
        let g = sample_graph();
        let start = vec![NodeId::from("4")];

        let depth0 = g.find_neighbors(&start, 0);
        assert_eq!(depth0, vec![NodeId::from("4")]);

        let depth1 = g.find_neighbors(&start, 1);
        assert_eq!(depth1, vec![NodeId::from("4"), NodeId::from("3")]);

        let depth3 = g.find_neighbors(&start, 3);
        assert_eq!(depth3.len(), 4);
    }

    #[test]
    fn find_neighbors_tolerates_missing_lists() {
        let mut g = sample_graph();
        g.lists.remove(&NodeId::from("3"));

        let reached = g.find_neighbors(&[NodeId::from("4")], 5);
        // 4 -> 3, and 3 has no list here: expansion stops.
        assert_eq!(reached.len(), 2);
    }

    #[test]
    fn clone_deep_copies_lists() {
        let g = sample_graph();
        let mut copy = g.clone();
        copy.get_mut(&"1".into()).unwrap().remove(&"2".into());

        assert!(g.get(&"1".into()).unwrap().contains(&"2".into()));
        assert!(!copy.get(&"1".into()).unwrap().contains(&"2".into()));
    }
}
