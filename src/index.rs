//! Frozen index: query-time search and persistence entry points.

use std::path::Path;

use crate::distance::Element;
use crate::error::{Result, StratumError};
use crate::graph::Graph;
use crate::persistence;
use crate::points::PointStore;
use crate::search::{beam_search, SearchOutput, SearchScratch};

/// Immutable search index: the point store plus the frozen graph and its
/// entry point. Produced by [`crate::IndexBuilder::build`] or
/// [`Index::load`].
pub struct Index<T: Element> {
    points: PointStore<T>,
    graph: Graph,
}

impl<T: Element> Index<T> {
    pub(crate) fn from_parts(points: PointStore<T>, graph: Graph) -> Self {
        Self { points, graph }
    }

    /// Greedy beam search for the `k` nearest points to `query` with
    /// list size `l` (`l ≥ k` required).
    ///
    /// Results are ascending by squared L2 distance; the returned stats
    /// count pool pops and distance evaluations.
    pub fn search(&self, query: &[T], k: usize, l: usize) -> Result<SearchOutput> {
        if query.len() != self.points.dim() {
            return Err(StratumError::MalformedInput(format!(
                "query has dimension {}, index holds {}-dimensional points",
                query.len(),
                self.points.dim()
            )));
        }
        let mut scratch = SearchScratch::new(self.points.len(), l);
        beam_search(
            &self.points,
            &self.graph,
            query,
            &[self.graph.entry_point()],
            l,
            k,
            &mut scratch,
            None,
        )
    }

    /// Stored points.
    #[must_use]
    pub fn points(&self) -> &PointStore<T> {
        &self.points
    }

    /// Frozen graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Write `<prefix>.graph` and `<prefix>.data`.
    pub fn save(&self, prefix: &Path) -> Result<()> {
        persistence::write_graph(prefix, &self.graph)?;
        persistence::write_points(prefix, &self.points)?;
        Ok(())
    }

    /// Load an index saved by [`Index::save`], validating both files
    /// against each other.
    pub fn load(prefix: &Path) -> Result<Self> {
        let graph = persistence::read_graph(prefix)?;
        let points = persistence::read_points::<T>(prefix)?;
        if points.len() != graph.num_vertices() {
            return Err(StratumError::MalformedInput(format!(
                "graph file holds {} vertices but data file holds {} points",
                graph.num_vertices(),
                points.len()
            )));
        }
        Ok(Self { points, graph })
    }
}
