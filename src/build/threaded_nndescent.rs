//! NN-Descent, parallel local join.
//!
//! Same refinement loop as [`NnDescent`](crate::build::NnDescent), with the
//! expensive phase (the local join) spread over the worker pool. Sampling
//! and bookkeeping stay sequential; they are linear and cheap.
//!
//! Neighbor lists are the only shared mutable state, and each is guarded
//! by its own mutex. A join step locks one list at a time, so there is no
//! lock ordering to get wrong. The sequential and parallel builders
//! produce graphs satisfying the same invariants, but iteration counts
//! (and thus exact neighbor sets) can differ: workers observe each
//! other's inserts in a nondeterministic order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;

use crate::build::{Callback, GraphBuilder, ProgressData};
use crate::error::{GraphError, Result};
use crate::graph::neighborlist::{Neighbor, NeighborList};
use crate::graph::Graph;
use crate::node::Node;
use crate::similarity::Similarity;

/// Parallel NN-Descent builder.
pub struct ThreadedNnDescent<T> {
    k: usize,
    similarity: Arc<dyn Similarity<T>>,
    rho: f64,
    delta: f64,
    max_iterations: usize,
    seed: Option<u64>,
    thread_count: Option<usize>,
    callback: Option<Callback>,
    computed_similarities: AtomicUsize,
    iterations: usize,
    c: usize,
}

impl<T: Send + Sync> ThreadedNnDescent<T> {
    pub fn new(k: usize, similarity: Arc<dyn Similarity<T>>) -> Result<Self> {
        if k == 0 {
            return Err(GraphError::InvalidParameter(
                "k must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            k,
            similarity,
            rho: 0.5,
            delta: 0.001,
            max_iterations: usize::MAX,
            seed: None,
            thread_count: None,
            callback: None,
            computed_similarities: AtomicUsize::new(0),
            iterations: 0,
            c: 0,
        })
    }

    /// Sampling coefficient, in (0, 1].
    pub fn set_rho(&mut self, rho: f64) -> Result<()> {
        if !(rho > 0.0 && rho <= 1.0) {
            return Err(GraphError::InvalidParameter(format!(
                "rho must be in (0, 1], got {rho}"
            )));
        }
        self.rho = rho;
        Ok(())
    }

    /// Early-termination coefficient, in (0, 1).
    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if !(delta > 0.0 && delta < 1.0) {
            return Err(GraphError::InvalidParameter(format!(
                "delta must be in (0, 1), got {delta}"
            )));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
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

    pub fn set_callback(&mut self, callback: Callback) {
        self.callback = Some(callback);
    }

    /// Iterations executed by the last build.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Edges changed during the last iteration of the last build.
    pub fn c(&self) -> usize {
        self.c
    }

    fn similarity_of(&self, a: &Node<T>, b: &Node<T>) -> f64 {
        self.computed_similarities.fetch_add(1, Ordering::Relaxed);
        self.similarity.similarity(a.value(), b.value())
    }

    fn report(&self, n: usize) {
        if let Some(callback) = &self.callback {
            let computed = self.computed_similarities();
            let pairs = (n * n.saturating_sub(1) / 2).max(1);
            let mut data = ProgressData::new();
            data.insert("c".into(), self.c.into());
            data.insert("computed_similarities".into(), computed.into());
            data.insert(
                "computed_similarities_ratio".into(),
                (computed as f64 / pairs as f64).into(),
            );
            data.insert("iterations".into(), self.iterations.into());
            callback(&data);
        }
    }

    fn build_inner(&mut self, nodes: &[Node<T>]) -> Vec<NeighborList> {
        let n = nodes.len();
        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };

        let index_of: HashMap<_, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id().clone(), i))
            .collect();

        // Random initial lists, all entries fresh.
        let lists: Vec<Mutex<NeighborList>> = (0..n)
            .map(|v| {
                let mut nl = NeighborList::new(self.k);
                while nl.len() < self.k {
                    let u = rng.random_range(0..n);
                    if u == v {
                        continue;
                    }
                    let sim = self.similarity_of(&nodes[u], &nodes[v]);
                    nl.insert(Neighbor::new(nodes[u].id().clone(), sim));
                }
                Mutex::new(nl)
            })
            .collect();

        let processed: Vec<Mutex<HashSet<usize>>> =
            (0..n).map(|_| Mutex::new(HashSet::new())).collect();

        let sample_size = (self.rho * self.k as f64) as usize;

        loop {
            self.iterations += 1;
            let c = AtomicUsize::new(0);

            // Partition each list into processed and freshly sampled
            // entries; sequential, the RNG is shared.
            let mut old_lists: Vec<Vec<usize>> = Vec::with_capacity(n);
            let mut new_lists: Vec<Vec<usize>> = Vec::with_capacity(n);
            for v in 0..n {
                let nl = lists[v].lock().expect("neighbor list poisoned");
                let mut marks = processed[v].lock().expect("marks poisoned");
                let mut old = Vec::new();
                let mut fresh = Vec::new();
                for neighbor in nl.iter() {
                    let u = index_of[&neighbor.id];
                    if marks.contains(&u) {
                        old.push(u);
                    } else if rng.random::<f64>() < self.rho {
                        fresh.push(u);
                    }
                }
                for &u in &fresh {
                    marks.insert(u);
                }
                old_lists.push(old);
                new_lists.push(fresh);
            }

            let mut old_reversed = reverse(&old_lists);
            let mut new_reversed = reverse(&new_lists);

            // Extend with sampled reverse neighbors before the join: the
            // join reads other nodes' lists across workers, so they must
            // be final for this iteration.
            for v in 0..n {
                old_lists[v] = union(
                    std::mem::take(&mut old_lists[v]),
                    sample(
                        std::mem::take(&mut old_reversed[v]),
                        sample_size,
                        rng.as_mut(),
                    ),
                );
                new_lists[v] = union(
                    std::mem::take(&mut new_lists[v]),
                    sample(
                        std::mem::take(&mut new_reversed[v]),
                        sample_size,
                        rng.as_mut(),
                    ),
                );
            }

            // Parallel local join.
            (0..n).into_par_iter().for_each(|v| {
                for j in 0..new_lists[v].len() {
                    let u1 = new_lists[v][j];

                    for l in (j + 1)..new_lists[u1].len() {
                        let u2 = new_lists[u1][l];
                        if u1 == u2 {
                            continue;
                        }
                        let sim = self.similarity_of(&nodes[u1], &nodes[u2]);
                        self.join_insert(&lists, &processed, nodes, u1, u2, sim, &c);
                        self.join_insert(&lists, &processed, nodes, u2, u1, sim, &c);
                    }

                    for l in 0..old_lists[v].len() {
                        let u2 = old_lists[v][l];
                        if u1 == u2 {
                            continue;
                        }
                        let sim = self.similarity_of(&nodes[u1], &nodes[u2]);
                        self.join_insert(&lists, &processed, nodes, u1, u2, sim, &c);
                        self.join_insert(&lists, &processed, nodes, u2, u1, sim, &c);
                    }
                }
            });

            self.c = c.load(Ordering::Relaxed);
            self.report(n);

            if (self.c as f64) <= self.delta * (n * self.k) as f64 {
                break;
            }
            if self.iterations >= self.max_iterations {
                break;
            }
        }

        lists
            .into_iter()
            .map(|nl| nl.into_inner().expect("neighbor list poisoned"))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn join_insert(
        &self,
        lists: &[Mutex<NeighborList>],
        processed: &[Mutex<HashSet<usize>>],
        nodes: &[Node<T>],
        owner: usize,
        neighbor: usize,
        sim: f64,
        c: &AtomicUsize,
    ) {
        let changed = lists[owner]
            .lock()
            .expect("neighbor list poisoned")
            .insert(Neighbor::new(nodes[neighbor].id().clone(), sim));
        if changed {
            // The edge has not been through a join yet: fresh again.
            processed[owner]
                .lock()
                .expect("marks poisoned")
                .remove(&neighbor);
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Exact fallback for datasets too small to descend on.
    fn fully_linked(&self, nodes: Vec<Node<T>>) -> Graph<T> {
        let mut lists: Vec<NeighborList> =
            (0..nodes.len()).map(|_| NeighborList::new(self.k)).collect();
        for i in 0..nodes.len() {
            for j in 0..i {
                let sim = self.similarity_of(&nodes[i], &nodes[j]);
                lists[i].insert(Neighbor::new(nodes[j].id().clone(), sim));
                lists[j].insert(Neighbor::new(nodes[i].id().clone(), sim));
            }
        }

        let mut graph = Graph::new(self.k);
        graph.set_similarity(Arc::clone(&self.similarity));
        for (node, nl) in nodes.into_iter().zip(lists) {
            graph.put(node, nl);
        }
        graph
    }
}

/// Keep the first occurrence of every element of `a` then `b`.
fn union(a: Vec<usize>, b: Vec<usize>) -> Vec<usize> {
    let mut seen: HashSet<usize> = HashSet::with_capacity(a.len() + b.len());
    let mut out = Vec::with_capacity(a.len() + b.len());
    for u in a.into_iter().chain(b) {
        if seen.insert(u) {
            out.push(u);
        }
    }
    out
}

/// Shrink `list` to `count` elements by random deletion.
fn sample(mut list: Vec<usize>, count: usize, rng: &mut dyn RngCore) -> Vec<usize> {
    while list.len() > count {
        let at = rng.random_range(0..list.len());
        list.remove(at);
    }
    list
}

/// `reverse(lists)[u]` holds every `v` such that `u ∈ lists[v]`.
fn reverse(lists: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut reversed: Vec<Vec<usize>> = vec![Vec::new(); lists.len()];
    for (v, list) in lists.iter().enumerate() {
        for &u in list {
            reversed[u].push(v);
        }
    }
    reversed
}

impl<T: Send + Sync> GraphBuilder<T> for ThreadedNnDescent<T> {
    fn build(&mut self, nodes: Vec<Node<T>>) -> Result<Graph<T>> {
        self.iterations = 0;
        self.c = 0;

        if nodes.len() <= self.k + 1 {
            return Ok(self.fully_linked(nodes));
        }

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

    fn integer_similarity() -> Arc<dyn Similarity<i64>> {
        Arc::new(|a: &i64, b: &i64| 1.0 / (1.0 + (a - b).abs() as f64))
    }

    fn nodes(values: impl Iterator<Item = i64>) -> Vec<Node<i64>> {
        values.map(|v| Node::new(v.to_string(), v)).collect()
    }

    #[test]
    fn produces_a_valid_graph() {
        let mut builder = ThreadedNnDescent::new(4, integer_similarity()).unwrap();
        builder.set_seed(42);
        let graph = builder.build(nodes(0..120)).unwrap();

        assert_eq!(graph.len(), 120);
        for (node, nl) in graph.entries() {
            assert_eq!(nl.capacity(), 4);
            assert_eq!(nl.len(), 4);
            assert!(!nl.contains(node.id()));
            let sims: Vec<f64> = nl.iter().map(|n| n.similarity).collect();
            for pair in sims.windows(2) {
                assert!(pair[0] >= pair[1]);
            }
        }
    }

    #[test]
    fn small_datasets_fall_back_to_exact() {
        let mut builder = ThreadedNnDescent::new(6, integer_similarity()).unwrap();
        let graph = builder.build(nodes(0..5)).unwrap();
        for (_, nl) in graph.entries() {
            assert_eq!(nl.len(), 4);
        }
    }

    #[test]
    fn thread_count_is_validated() {
        let mut builder = ThreadedNnDescent::new(4, integer_similarity()).unwrap();
        assert!(builder.set_thread_count(0).is_err());
        assert!(builder.set_thread_count(2).is_ok());
        builder.set_seed(9);
        let graph = builder.build(nodes(0..60)).unwrap();
        assert_eq!(graph.len(), 60);
    }
}
