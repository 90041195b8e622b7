//! Property-based tests for the neighbor-list and graph invariants.
//!
//! These hold regardless of input:
//! - a neighbor list never exceeds its capacity, stays sorted, and never
//!   holds two entries for the same node;
//! - with distinct similarities, the final contents of a list do not
//!   depend on insertion order (the list is an idempotent top-k set);
//! - merging is idempotent;
//! - graphs built by any builder satisfy the structural invariants.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use simgraph::build::{GraphBuilder, NnDescent};
use simgraph::{Neighbor, NeighborList, Node, Similarity};

fn arb_entries(max_len: usize) -> impl Strategy<Value = Vec<(u8, f64)>> {
    prop::collection::vec((0u8..40, 0.0f64..1.0), 0..max_len)
}

/// Distinct ids, distinct similarities: the regime where order
/// independence is exact.
fn distinct_entries(entries: Vec<(u8, f64)>) -> Vec<(String, f64)> {
    let mut seen_ids = HashSet::new();
    let mut out: Vec<(String, f64)> = Vec::new();
    for (i, (id, sim)) in entries.into_iter().enumerate() {
        if seen_ids.insert(id) {
            // Spread similarities so no two are equal.
            out.push((id.to_string(), sim + i as f64));
        }
    }
    out
}

fn filled(k: usize, entries: &[(String, f64)]) -> NeighborList {
    let mut nl = NeighborList::new(k);
    for (id, sim) in entries {
        nl.insert(Neighbor::new(id.as_str(), *sim));
    }
    nl
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn list_invariants_hold(
        k in 1usize..8,
        entries in arb_entries(60),
    ) {
        let mut nl = NeighborList::new(k);
        for (id, sim) in entries {
            nl.insert(Neighbor::new(id.to_string().as_str(), sim));
        }

        prop_assert!(nl.len() <= k);

        let ids: Vec<&str> = nl.iter().map(|n| n.id.as_str()).collect();
        let unique: HashSet<&&str> = ids.iter().collect();
        prop_assert_eq!(unique.len(), ids.len(), "duplicate node in list");

        let sims: Vec<f64> = nl.iter().map(|n| n.similarity).collect();
        for pair in sims.windows(2) {
            prop_assert!(pair[0] >= pair[1], "not sorted: {:?}", sims);
        }
    }

    #[test]
    fn insertion_order_does_not_matter(
        k in 1usize..8,
        entries in arb_entries(40),
        rotation in 0usize..40,
    ) {
        let entries = distinct_entries(entries);

        let forward = filled(k, &entries);

        let mut rotated = entries.clone();
        if !rotated.is_empty() {
            let len = rotated.len();
            rotated.rotate_left(rotation % len);
        }
        let shuffled = filled(k, &rotated);

        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed = filled(k, &reversed_entries);

        let a: HashSet<&str> = forward.iter().map(|n| n.id.as_str()).collect();
        let b: HashSet<&str> = shuffled.iter().map(|n| n.id.as_str()).collect();
        let c: HashSet<&str> = reversed.iter().map(|n| n.id.as_str()).collect();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a, &c);
    }

    #[test]
    fn merge_is_idempotent(
        k in 1usize..8,
        entries in arb_entries(40),
    ) {
        let entries = distinct_entries(entries);
        let mut nl = filled(k, &entries);
        let snapshot = nl.clone();

        // Merging a list into an equal list changes nothing.
        let changes = nl.merge(&snapshot);
        prop_assert_eq!(changes, 0);
        prop_assert_eq!(nl.len(), snapshot.len());
    }

    #[test]
    fn built_graphs_satisfy_structural_invariants(
        seed in 0u64..1000,
        n in 12usize..60,
    ) {
        let sim: Arc<dyn Similarity<i64>> =
            Arc::new(|a: &i64, b: &i64| 1.0 / (1.0 + (a - b).abs() as f64));
        let nodes: Vec<Node<i64>> = (0..n)
            .map(|i| Node::new(i.to_string(), (i as i64 * 37) % 101))
            .collect();

        let mut builder = NnDescent::new(4, sim).unwrap();
        builder.set_seed(seed);
        let graph = builder.build(nodes).unwrap();

        prop_assert_eq!(graph.len(), n);
        for (node, nl) in graph.entries() {
            // Capacity k everywhere, owner never among its own neighbors.
            prop_assert_eq!(nl.capacity(), 4);
            prop_assert!(nl.len() <= 4);
            prop_assert!(!nl.contains(node.id()));
            // Every referenced node is a key of the graph.
            for neighbor in nl {
                prop_assert!(graph.contains(&neighbor.id));
            }
        }
    }
}
