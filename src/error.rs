//! Error types for simgraph.

use thiserror::Error;

/// Errors that can occur while configuring builders or mutating a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A node with the same id is already present in the graph.
    #[error("graph already contains a node with id \"{0}\"")]
    DuplicateId(String),

    /// No similarity measure has been set on the graph.
    #[error("no similarity measure set")]
    MissingSimilarity,

    /// Export failed.
    #[error("export failed: {0}")]
    Export(String),
}

/// Result type alias for simgraph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
