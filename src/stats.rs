//! Shared operation counters.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters collected during search and online graph updates.
///
/// A single container can be shared by reference across worker threads;
/// counters use relaxed atomics since they carry reporting data, not
/// synchronization.
#[derive(Debug, Default)]
pub struct StatisticsContainer {
    search_similarities: AtomicUsize,
    search_restarts: AtomicUsize,
    search_cross_partition_restarts: AtomicUsize,
    add_similarities: AtomicUsize,
    remove_similarities: AtomicUsize,
}

impl StatisticsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_search_similarities(&self) {
        self.search_similarities.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_search_restarts(&self) {
        self.search_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_search_cross_partition_restarts(&self) {
        self.search_cross_partition_restarts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_add_similarities(&self) {
        self.add_similarities.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_remove_similarities(&self) {
        self.remove_similarities.fetch_add(1, Ordering::Relaxed);
    }

    /// Similarities computed during graph-based and exhaustive search.
    pub fn search_similarities(&self) -> usize {
        self.search_similarities.load(Ordering::Relaxed)
    }

    /// Search restarts (including discarded seeds).
    pub fn search_restarts(&self) -> usize {
        self.search_restarts.load(Ordering::Relaxed)
    }

    /// Descents abandoned because they crossed into another partition.
    pub fn search_cross_partition_restarts(&self) -> usize {
        self.search_cross_partition_restarts.load(Ordering::Relaxed)
    }

    /// Similarities computed while updating existing edges in `fast_add`.
    pub fn add_similarities(&self) -> usize {
        self.add_similarities.load(Ordering::Relaxed)
    }

    /// Similarities computed while repairing edges in `fast_remove`.
    pub fn remove_similarities(&self) -> usize {
        self.remove_similarities.load(Ordering::Relaxed)
    }
}
