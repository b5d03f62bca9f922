//! Adjacency storage for the proximity graph.
//!
//! Two representations share the same inline-list layout: [`BuildGraph`]
//! guards every vertex with its own lock while workers commit edges in
//! parallel, and [`Graph`] is the frozen read-only result a search walks.
//! Readers never hold a vertex lock while scanning: they copy the list
//! under the lock and scan the copy, tolerating a slightly stale view.

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

/// Inline adjacency list. Spills to the heap past the typical degree cap
/// plus build slack.
pub type AdjList = SmallVec<[u32; 32]>;

/// Outcome of a bounded append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Append {
    /// Edge added.
    Added,
    /// Edge already present; list unchanged.
    Duplicate,
    /// List is at capacity; caller must prune before retrying.
    Full,
}

/// Mutable graph under construction: one lock per vertex, no global lock.
pub(crate) struct BuildGraph {
    slots: Vec<Mutex<AdjList>>,
}

impl BuildGraph {
    /// Create `n` empty adjacency lists, each pre-sized to `cap`.
    pub(crate) fn new(n: usize, cap: usize) -> Self {
        let slots = (0..n)
            .map(|_| Mutex::new(AdjList::with_capacity(cap)))
            .collect();
        Self { slots }
    }

    pub(crate) fn num_vertices(&self) -> usize {
        self.slots.len()
    }

    /// Publish a complete neighbor list for `p`.
    pub(crate) fn set_neighbors(&self, p: u32, list: &[u32]) {
        let mut guard = self.slots[p as usize].lock();
        guard.clear();
        guard.extend_from_slice(list);
    }

    /// Append `q` to `adj(p)` if it is absent and the list holds fewer
    /// than `cap` entries.
    pub(crate) fn try_append(&self, p: u32, q: u32, cap: usize) -> Append {
        let mut guard = self.slots[p as usize].lock();
        if guard.contains(&q) {
            Append::Duplicate
        } else if guard.len() >= cap {
            Append::Full
        } else {
            guard.push(q);
            Append::Added
        }
    }

    /// Lock one vertex for a read-modify-write (capacity pruning).
    pub(crate) fn lock(&self, p: u32) -> MutexGuard<'_, AdjList> {
        self.slots[p as usize].lock()
    }

    pub(crate) fn degree(&self, p: u32) -> usize {
        self.slots[p as usize].lock().len()
    }

    /// Tear down the locks and hand the lists over for freezing.
    pub(crate) fn into_lists(self) -> Vec<AdjList> {
        self.slots.into_iter().map(Mutex::into_inner).collect()
    }
}

/// Read access to adjacency lists during a graph walk.
///
/// The beam search is generic over this seam so it can run both over the
/// partial graph during build (snapshot reads under per-vertex locks) and
/// over the frozen graph at query time.
pub trait NeighborSource: Sync {
    /// Number of vertices.
    fn num_vertices(&self) -> usize;

    /// Replace `out` with the current out-neighbors of `id`.
    fn copy_neighbors(&self, id: u32, out: &mut Vec<u32>);
}

impl NeighborSource for BuildGraph {
    fn num_vertices(&self) -> usize {
        self.slots.len()
    }

    fn copy_neighbors(&self, id: u32, out: &mut Vec<u32>) {
        out.clear();
        let guard = self.slots[id as usize].lock();
        out.extend_from_slice(&guard);
    }
}

/// Borrowed view over raw adjacency lists (used between freeze and
/// connectivity repair, when no locks exist yet).
pub(crate) struct ListView<'a>(pub(crate) &'a [AdjList]);

impl NeighborSource for ListView<'_> {
    fn num_vertices(&self) -> usize {
        self.0.len()
    }

    fn copy_neighbors(&self, id: u32, out: &mut Vec<u32>) {
        out.clear();
        out.extend_from_slice(&self.0[id as usize]);
    }
}

/// Frozen, read-only graph with its search entry point.
pub struct Graph {
    adj: Vec<AdjList>,
    entry: u32,
    max_degree: u32,
}

impl Graph {
    pub(crate) fn from_parts(adj: Vec<AdjList>, entry: u32, max_degree: u32) -> Self {
        Self {
            adj,
            entry,
            max_degree,
        }
    }

    /// Number of vertices.
    #[inline]
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.adj.len()
    }

    /// Out-neighbors of `id`.
    #[inline]
    #[must_use]
    pub fn neighbors(&self, id: u32) -> &[u32] {
        &self.adj[id as usize]
    }

    /// Declared per-vertex degree cap `R`.
    #[inline]
    #[must_use]
    pub fn max_degree(&self) -> u32 {
        self.max_degree
    }

    /// Fixed id every query-time search starts from.
    #[inline]
    #[must_use]
    pub fn entry_point(&self) -> u32 {
        self.entry
    }
}

impl NeighborSource for Graph {
    fn num_vertices(&self) -> usize {
        self.adj.len()
    }

    fn copy_neighbors(&self, id: u32, out: &mut Vec<u32>) {
        out.clear();
        out.extend_from_slice(&self.adj[id as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_append_reports_duplicates_and_capacity() {
        let graph = BuildGraph::new(3, 2);
        assert_eq!(graph.try_append(0, 1, 2), Append::Added);
        assert_eq!(graph.try_append(0, 1, 2), Append::Duplicate);
        assert_eq!(graph.try_append(0, 2, 2), Append::Added);
        assert_eq!(graph.try_append(0, 3, 2), Append::Full);
        assert_eq!(graph.degree(0), 2);
    }

    #[test]
    fn set_neighbors_replaces_the_list() {
        let graph = BuildGraph::new(2, 4);
        graph.set_neighbors(1, &[0]);
        graph.set_neighbors(1, &[0, 1, 0]);
        let mut buf = Vec::new();
        graph.copy_neighbors(1, &mut buf);
        assert_eq!(buf, vec![0, 1, 0]);
    }

    #[test]
    fn frozen_graph_exposes_lists() {
        let graph = BuildGraph::new(2, 4);
        graph.set_neighbors(0, &[1]);
        graph.set_neighbors(1, &[0]);
        let frozen = Graph::from_parts(graph.into_lists(), 1, 4);
        assert_eq!(frozen.neighbors(0), &[1]);
        assert_eq!(frozen.entry_point(), 1);
    }
}
