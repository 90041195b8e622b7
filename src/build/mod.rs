//! Graph builders.
//!
//! All builders share one capability: given a list of nodes, produce a
//! k-nn graph over exactly those nodes. Pick by dataset size and accuracy
//! needs:
//!
//! | Builder | Guarantee | Cost | Use when |
//! |---------|-----------|------|----------|
//! | [`Brute`] | exact | O(n²) | baselines, small n |
//! | [`ThreadedBrute`] | exact | O(n²), parallel | exact graph, many cores |
//! | [`NnDescent`] | approximate | empirically O(n^1.14) | large n, generic similarity |
//! | [`ThreadedNnDescent`] | approximate | parallel | large n, many cores |
//! | [`Partitioning`] | approximate | sub-quadratic | LSH-friendly similarities |
//!
//! Builders are configured with validating setters: invalid parameters are
//! rejected at configuration time, before any work starts.

pub mod brute;
pub mod nndescent;
pub mod partitioning;
pub mod threaded_brute;
pub mod threaded_nndescent;

pub use brute::Brute;
pub use nndescent::NnDescent;
pub use partitioning::{LshFamily, Partitioning};
pub use threaded_brute::ThreadedBrute;
pub use threaded_nndescent::ThreadedNnDescent;

use std::sync::Arc;

use crate::error::Result;
use crate::graph::Graph;
use crate::node::Node;

/// Free-form key/value payload handed to progress callbacks.
pub type ProgressData = serde_json::Map<String, serde_json::Value>;

/// Optional progress sink, invoked at well-known checkpoints (dictionary
/// built, hashes computed, iteration complete). Never required for
/// correctness.
pub type Callback = Arc<dyn Fn(&ProgressData) + Send + Sync>;

/// Capability shared by every graph builder.
///
/// The returned graph contains exactly the given nodes, each with a
/// neighbor list of capacity k, never containing the owning node itself.
pub trait GraphBuilder<T> {
    /// Build a k-nn graph over `nodes`.
    fn build(&mut self, nodes: Vec<Node<T>>) -> Result<Graph<T>>;

    /// Similarities computed so far by this builder (cumulative across
    /// runs).
    fn computed_similarities(&self) -> usize;
}
