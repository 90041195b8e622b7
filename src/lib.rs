//! simgraph: approximate k-nn graphs for generic similarity measures.
//!
//! Builds, maintains and queries directed graphs in which every node keeps
//! edges to (approximately) its k most similar peers, for any payload type
//! and any user-supplied similarity. No vectors, no metric axioms: the
//! only operation ever performed on a payload is the similarity function.
//!
//! # Which Builder Should I Use?
//!
//! | Situation | Recommendation |
//! |-----------|----------------|
//! | **Small dataset / ground truth** | [`build::Brute`] |
//! | **Exact graph, many cores** | [`build::ThreadedBrute`] |
//! | **Large dataset, generic similarity** | [`build::NnDescent`] |
//! | **Large dataset, many cores** | [`build::ThreadedNnDescent`] |
//! | **Strings with Jaccard / cosine** | [`build::Partitioning`] + [`hash`] |
//!
//! # Quick Start
//!
//! ```ignore
//! use simgraph::build::{GraphBuilder, NnDescent};
//! use simgraph::Node;
//! use std::sync::Arc;
//!
//! let sim = Arc::new(|a: &i64, b: &i64| 1.0 / (1.0 + (a - b).abs() as f64));
//! let mut builder = NnDescent::new(10, sim)?;
//!
//! let nodes: Vec<Node<i64>> = (0..10_000)
//!     .map(|i| Node::new(i.to_string(), i))
//!     .collect();
//! let mut graph = builder.build(nodes)?;
//!
//! // Approximate query, ~4x faster than scanning everything.
//! let neighbors = graph.fast_search(&1234, 10)?;
//!
//! // The graph stays queryable while nodes come and go.
//! graph.fast_add(Node::new("new", 42))?;
//! graph.fast_remove(&"17".into())?;
//! ```
//!
//! # The Moving Parts
//!
//! - A **neighbor list** is a bounded, similarity-ordered, deduplicating
//!   top-k set ([`NeighborList`]). Its monotone-improve insert makes
//!   merging partial results associative and idempotent, which is what
//!   lets every parallel builder reduce worker output safely.
//! - The **graph** ([`Graph`]) maps nodes to neighbor lists and carries
//!   the similarity measure, the search engine ([`Graph::fast_search`]),
//!   online maintenance ([`Graph::fast_add`], [`Graph::fast_remove`],
//!   sliding window) and the analysis utilities (pruning, connected
//!   components, GEXF export).
//! - **Builders** ([`build`]) construct the graph in bulk; they share one
//!   trait, so the LSH partitioner can run any of them on its buckets.
//!
//! # Thread Safety
//!
//! The similarity measure is called concurrently from worker threads; it
//! must be pure or internally synchronized (the [`Similarity`] trait
//! requires `Send + Sync`). The graph itself is a plain value: builders
//! run their own worker pools and hand back an owned graph.

pub mod build;
pub mod error;
pub mod graph;
pub mod hash;
pub mod node;
pub mod similarity;
pub mod stats;

pub use error::{GraphError, Result};
pub use graph::neighborlist::{Neighbor, NeighborList};
pub use graph::search::SearchParams;
pub use graph::Graph;
pub use node::{Node, NodeId};
pub use similarity::Similarity;
pub use stats::StatisticsContainer;
