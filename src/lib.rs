//! stratum: grid-stratified proximity-graph index for approximate
//! nearest neighbor search.
//!
//! Builds a directed graph over low-dimensional points whose coordinates
//! live in a bounded integer box, then answers queries with a greedy beam
//! search from a fixed entry point. Construction is grid-aware: each
//! point's out-edges are allocated across concentric Chebyshev shells of
//! grid cells, with an independent search-list size, alpha, and edge
//! budget per shell. Near shells keep the graph locally dense; far shells
//! carry the long-range edges that let the search converge from anywhere,
//! so recall stays high at low degree.
//!
//! # Usage
//!
//! ```no_run
//! use stratum::{BuildParams, Index, IndexBuilder, PointStore};
//!
//! # fn main() -> stratum::Result<()> {
//! let points = PointStore::<u8>::from_rows(&[
//!     vec![12, 40],
//!     vec![200, 33],
//!     vec![90, 250],
//! ])?;
//!
//! let index = IndexBuilder::new(points, BuildParams::grid_2d())?.build()?;
//! let hits = index.search(&[13, 41], 2, 50)?;
//! assert_eq!(hits.results[0].id, 0);
//!
//! index.save(std::path::Path::new("demo_index"))?;
//! let reloaded = Index::<u8>::load(std::path::Path::new("demo_index"))?;
//! # let _ = reloaded;
//! # Ok(())
//! # }
//! ```
//!
//! # Guarantees
//!
//! - After build every vertex has at most `max_degree` out-neighbors, no
//!   self-loops, no duplicates, and is reachable from the entry point.
//! - Search is deterministic for a fixed graph: ties break on id.
//! - A build is bit-reproducible for a fixed seed and one worker thread;
//!   more workers reorder back-edge insertion but not search semantics.
//!
//! # References
//!
//! - Subramanya et al. (2019): "DiskANN: Fast Accurate Billion-point
//!   Nearest Neighbor Search on a Single Node"

pub mod builder;
pub mod distance;
pub mod error;
pub mod graph;
pub mod grid;
pub mod index;
mod persistence;
pub mod points;
pub mod search;

pub use builder::{BuildParams, IndexBuilder, Shell, StagePolicy};
pub use distance::{squared_l2, Element};
pub use error::{Result, StratumError};
pub use graph::{Graph, NeighborSource};
pub use grid::GridMap;
pub use index::Index;
pub use points::PointStore;
pub use search::{Neighbor, SearchOutput, SearchStats};
