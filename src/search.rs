//! Bounded best-first graph search.
//!
//! The walk keeps the `L` closest candidates seen so far in a sorted
//! fixed-capacity pool, repeatedly expands the closest unexpanded entry,
//! and stops when the whole pool has been expanded. Ties break on id
//! ascending, which makes the walk deterministic for a fixed graph and
//! seed set.

use crate::distance::{squared_l2, Element};
use crate::error::{Result, StratumError};
use crate::graph::NeighborSource;
use crate::points::PointStore;

/// One scored vertex.
#[derive(Clone, Copy, Debug)]
pub struct Neighbor {
    /// Point id.
    pub id: u32,
    /// Squared L2 distance to the query.
    pub dist: f32,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // total_cmp for IEEE 754 total ordering (NaN-safe), then id so
        // equidistant candidates order deterministically.
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Search telemetry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchStats {
    /// Pool pops (vertices expanded).
    pub hops: u32,
    /// `(query, point)` distance evaluations.
    pub comparisons: u32,
}

/// Result of one beam search.
#[derive(Debug)]
pub struct SearchOutput {
    /// Up to `k` neighbors, ascending by distance.
    pub results: Vec<Neighbor>,
    /// Telemetry counters.
    pub stats: SearchStats,
}

struct PoolEntry {
    neighbor: Neighbor,
    expanded: bool,
}

/// Fixed-capacity candidate pool ordered by ascending `(distance, id)`.
///
/// Inserting past capacity evicts the worst entry; entries carry an
/// expanded flag so the closest unexpanded one can be popped in order.
pub(crate) struct CandidatePool {
    entries: Vec<PoolEntry>,
    cap: usize,
    cursor: usize,
}

impl CandidatePool {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap + 1),
            cap,
            cursor: 0,
        }
    }

    pub(crate) fn reset(&mut self, cap: usize) {
        self.entries.clear();
        self.cap = cap;
        self.cursor = 0;
    }

    /// Insert unless the pool is full and `n` is worse than every entry.
    /// Returns whether the pool changed.
    pub(crate) fn insert(&mut self, n: Neighbor) -> bool {
        if self.cap == 0 {
            return false;
        }
        match self.entries.binary_search_by(|e| e.neighbor.cmp(&n)) {
            Ok(_) => false,
            Err(pos) => {
                if pos >= self.cap {
                    return false;
                }
                self.entries.insert(
                    pos,
                    PoolEntry {
                        neighbor: n,
                        expanded: false,
                    },
                );
                self.entries.truncate(self.cap);
                if pos < self.cursor {
                    self.cursor = pos;
                }
                true
            }
        }
    }

    /// Pop the closest entry not yet expanded, marking it.
    pub(crate) fn pop_closest_unexpanded(&mut self) -> Option<Neighbor> {
        while self.cursor < self.entries.len() {
            let entry = &mut self.entries[self.cursor];
            if !entry.expanded {
                entry.expanded = true;
                return Some(entry.neighbor);
            }
            self.cursor += 1;
        }
        None
    }

    /// Best `k` entries, ascending.
    pub(crate) fn top_k(&self, k: usize) -> Vec<Neighbor> {
        self.entries.iter().take(k).map(|e| e.neighbor).collect()
    }
}

/// Generation-stamped visited set: `clear` bumps a counter instead of
/// zeroing the array, so reuse across many searches stays O(1).
pub(crate) struct VisitedSet {
    stamp: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            stamp: vec![0u16; capacity],
            generation: 1,
        }
    }

    pub(crate) fn reset(&mut self, capacity: usize) {
        if capacity > self.stamp.len() {
            self.stamp.resize(capacity, 0);
        }
        if self.generation == u16::MAX {
            self.stamp.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Mark `id`; returns `true` if it was not previously visited.
    #[inline]
    pub(crate) fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.stamp[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

/// Per-worker scratch reused across searches: candidate pool, visited
/// stamps, and a neighbor copy buffer.
pub(crate) struct SearchScratch {
    pool: CandidatePool,
    visited: VisitedSet,
    adj_buf: Vec<u32>,
}

impl SearchScratch {
    pub(crate) fn new(num_points: usize, list_size: usize) -> Self {
        Self {
            pool: CandidatePool::new(list_size),
            visited: VisitedSet::new(num_points),
            adj_buf: Vec::with_capacity(64),
        }
    }
}

/// Best-first greedy walk from `seeds`, pool size `l`, returning the top
/// `k` hits and, when requested, the expansion-order trace.
///
/// `k = 0` evaluates the seeds and returns empty without walking.
pub(crate) fn beam_search<T: Element, G: NeighborSource>(
    points: &PointStore<T>,
    graph: &G,
    query: &[T],
    seeds: &[u32],
    l: usize,
    k: usize,
    scratch: &mut SearchScratch,
    mut trace: Option<&mut Vec<Neighbor>>,
) -> Result<SearchOutput> {
    if l < k {
        return Err(StratumError::Config(format!(
            "search list size {l} is smaller than k = {k}"
        )));
    }
    let n = points.len();
    for &seed in seeds {
        if seed as usize >= n {
            return Err(StratumError::InvalidSeed { seed, len: n });
        }
    }

    let SearchScratch {
        pool,
        visited,
        adj_buf,
    } = scratch;
    pool.reset(l);
    visited.reset(n);

    let mut stats = SearchStats::default();
    for &seed in seeds {
        if visited.insert(seed) {
            let dist = squared_l2(query, points.get(seed));
            stats.comparisons += 1;
            pool.insert(Neighbor { id: seed, dist });
        }
    }

    if k == 0 {
        return Ok(SearchOutput {
            results: Vec::new(),
            stats,
        });
    }

    while let Some(current) = pool.pop_closest_unexpanded() {
        stats.hops += 1;
        if let Some(out) = trace.as_deref_mut() {
            out.push(current);
        }
        graph.copy_neighbors(current.id, adj_buf);
        for &nb in adj_buf.iter() {
            debug_assert!((nb as usize) < n);
            if visited.insert(nb) {
                let dist = squared_l2(query, points.get(nb));
                stats.comparisons += 1;
                pool.insert(Neighbor { id: nb, dist });
            }
        }
    }

    Ok(SearchOutput {
        results: pool.top_k(k),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AdjList, ListView};

    fn line_graph(n: usize) -> Vec<AdjList> {
        (0..n)
            .map(|i| {
                let mut adj = AdjList::new();
                if i > 0 {
                    adj.push(i as u32 - 1);
                }
                if i + 1 < n {
                    adj.push(i as u32 + 1);
                }
                adj
            })
            .collect()
    }

    fn line_points(n: usize) -> PointStore<f32> {
        let rows: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
        PointStore::from_rows(&rows).unwrap()
    }

    #[test]
    fn pool_orders_by_distance_then_id() {
        let mut pool = CandidatePool::new(4);
        pool.insert(Neighbor { id: 5, dist: 1.0 });
        pool.insert(Neighbor { id: 2, dist: 1.0 });
        pool.insert(Neighbor { id: 9, dist: 0.5 });
        assert_eq!(pool.pop_closest_unexpanded().unwrap().id, 9);
        assert_eq!(pool.pop_closest_unexpanded().unwrap().id, 2);
        assert_eq!(pool.pop_closest_unexpanded().unwrap().id, 5);
        assert!(pool.pop_closest_unexpanded().is_none());
    }

    #[test]
    fn pool_evicts_the_worst_when_full() {
        let mut pool = CandidatePool::new(2);
        assert!(pool.insert(Neighbor { id: 0, dist: 3.0 }));
        assert!(pool.insert(Neighbor { id: 1, dist: 2.0 }));
        assert!(pool.insert(Neighbor { id: 2, dist: 1.0 }));
        assert!(!pool.insert(Neighbor { id: 3, dist: 9.0 }));
        let top = pool.top_k(2);
        assert_eq!(top[0].id, 2);
        assert_eq!(top[1].id, 1);
    }

    #[test]
    fn insert_below_cursor_reopens_the_pool() {
        let mut pool = CandidatePool::new(4);
        pool.insert(Neighbor { id: 0, dist: 5.0 });
        assert_eq!(pool.pop_closest_unexpanded().unwrap().id, 0);
        pool.insert(Neighbor { id: 1, dist: 1.0 });
        assert_eq!(pool.pop_closest_unexpanded().unwrap().id, 1);
    }

    #[test]
    fn visited_set_survives_reset() {
        let mut visited = VisitedSet::new(8);
        assert!(visited.insert(3));
        assert!(!visited.insert(3));
        visited.reset(8);
        assert!(visited.insert(3));
    }

    #[test]
    fn walks_a_line_graph_to_the_target() {
        let n = 16;
        let points = line_points(n);
        let adj = line_graph(n);
        let graph = ListView(&adj);
        let mut scratch = SearchScratch::new(n, 8);

        let query = [13.2f32, 0.0];
        let out = beam_search(&points, &graph, &query, &[0], 8, 3, &mut scratch, None).unwrap();
        assert_eq!(out.results[0].id, 13);
        assert!(out.stats.hops > 0);
        assert!(out.stats.comparisons >= out.stats.hops);
    }

    #[test]
    fn k_zero_touches_only_seeds() {
        let n = 16;
        let points = line_points(n);
        let adj = line_graph(n);
        let graph = ListView(&adj);
        let mut scratch = SearchScratch::new(n, 8);

        let out =
            beam_search(&points, &graph, &[0.0, 0.0], &[0, 5], 8, 0, &mut scratch, None).unwrap();
        assert!(out.results.is_empty());
        assert_eq!(out.stats.comparisons, 2);
        assert_eq!(out.stats.hops, 0);
    }

    #[test]
    fn list_smaller_than_k_is_rejected() {
        let points = line_points(4);
        let adj = line_graph(4);
        let graph = ListView(&adj);
        let mut scratch = SearchScratch::new(4, 8);

        let err =
            beam_search(&points, &graph, &[0.0, 0.0], &[0], 2, 5, &mut scratch, None).unwrap_err();
        assert!(matches!(err, StratumError::Config(_)));
    }

    #[test]
    fn out_of_range_seed_is_rejected() {
        let points = line_points(4);
        let adj = line_graph(4);
        let graph = ListView(&adj);
        let mut scratch = SearchScratch::new(4, 8);

        let err =
            beam_search(&points, &graph, &[0.0, 0.0], &[7], 8, 1, &mut scratch, None).unwrap_err();
        assert!(matches!(err, StratumError::InvalidSeed { seed: 7, len: 4 }));
    }

    #[test]
    fn trace_records_expansion_order() {
        let n = 8;
        let points = line_points(n);
        let adj = line_graph(n);
        let graph = ListView(&adj);
        let mut scratch = SearchScratch::new(n, 8);

        let mut trace = Vec::new();
        let out = beam_search(
            &points,
            &graph,
            &[0.0, 0.0],
            &[0],
            8,
            1,
            &mut scratch,
            Some(&mut trace),
        )
        .unwrap();
        assert_eq!(out.stats.hops as usize, trace.len());
        assert_eq!(trace[0].id, 0);
    }
}
