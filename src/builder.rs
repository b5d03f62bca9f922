//! Multi-stage grid-aware graph construction.
//!
//! For every point the builder runs a beam search over the current
//! partial graph, partitions the visited candidates by Chebyshev grid
//! stratum, and applies the relative-neighborhood alpha-prune per stage
//! under that stage's own list size, alpha, and edge budget. Committed
//! edges get back edges, with capacity pruning when a vertex overflows
//! its slack bound. Inner shells keep the graph locally dense; outer
//! shells supply the long edges greedy search needs to converge.
//!
//! # Algorithm
//!
//! For each point `p`, per pass:
//! 1. Beam search with `p` as the query from the medoid plus a small
//!    random seed set; the expansion-order trace is the candidate set.
//! 2. For each stage in order: keep candidates whose stratum falls in
//!    the stage's shell, truncate to the stage list size, alpha-prune up
//!    to the stage budget.
//! 3. Union the stage picks (deduplicated), optionally saturate to `R`,
//!    truncate to `R` preferring closer edges, publish `adj(p)`.
//! 4. For each committed `q`: append the back edge `q → p`; on overflow
//!    re-prune `adj(q) ∪ {p}` down to `R`.
//!
//! Pass 1 of a multi-pass build runs every alpha at 1.0; later passes use
//! the configured alphas over the populated graph.
//!
//! # References
//!
//! - Subramanya et al. (2019): "DiskANN: Fast Accurate Billion-point
//!   Nearest Neighbor Search on a Single Node" (greedy search +
//!   RobustPrune; the per-stratum stage split is the variant here)

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::distance::{squared_l2, Element};
use crate::error::{Result, StratumError};
use crate::graph::{AdjList, Append, BuildGraph, Graph, ListView};
use crate::grid::GridMap;
use crate::index::Index;
use crate::points::PointStore;
use crate::search::{beam_search, Neighbor, SearchScratch};

/// Extra random seeds mixed into each per-point candidate search.
const EXTRA_SEEDS: usize = 2;

/// Upper bound on connectivity-repair sweeps.
const MAX_REPAIR_ROUNDS: usize = 8;

/// Chebyshev strata admitted by one build stage.
///
/// `max = None` leaves the shell open-ended (everything at or past
/// `min`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shell {
    /// Smallest admitted stratum.
    pub min: u32,
    /// Largest admitted stratum, inclusive; `None` for open-ended.
    pub max: Option<u32>,
}

impl Shell {
    /// Shell covering `min..=max`.
    #[must_use]
    pub const fn bounded(min: u32, max: u32) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Shell covering everything at or past `min`.
    #[must_use]
    pub const fn open(min: u32) -> Self {
        Self { min, max: None }
    }

    /// Whether `stratum` falls inside the shell.
    #[inline]
    #[must_use]
    pub fn contains(&self, stratum: u32) -> bool {
        stratum >= self.min && self.max.map_or(true, |max| stratum <= max)
    }

    fn overlaps(&self, other: &Shell) -> bool {
        let self_max = self.max.unwrap_or(u32::MAX);
        let other_max = other.max.unwrap_or(u32::MAX);
        self.min <= other_max && other.min <= self_max
    }
}

/// One stage of the stratified neighbor selection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Beam-search list size feeding this stage's candidate pool.
    pub search_list: usize,
    /// Edge budget the stage may add to `adj(p)`.
    pub budget: usize,
    /// Alpha of the pruning rule for this stage.
    pub alpha: f32,
    /// Strata that qualify for this stage.
    pub shell: Shell,
}

/// Build-time configuration.
///
/// The shipped grids are available as [`BuildParams::grid_2d`] and
/// [`BuildParams::grid_3d`]; every knob is a plain field, nothing in the
/// build path hard-codes a policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildParams {
    /// Final per-vertex degree cap (`R`).
    pub max_degree: usize,
    /// Global cap on the beam-search list size during build.
    pub build_list: usize,
    /// Default alpha where no stage shell matches.
    pub alpha: f32,
    /// Cells per grid axis.
    pub grid_size: u32,
    /// Axis extent of one grid cell.
    pub cell_size: u32,
    /// Stage policies, applied in order.
    pub stages: Vec<StagePolicy>,
    /// Worker threads; `0` uses all cores.
    pub num_threads: usize,
    /// Build passes over the point set.
    pub num_passes: usize,
    /// Fill `adj(p)` to exactly `R` with unpruned next-closest
    /// candidates.
    pub saturate: bool,
    /// Transient degree slack factor during build.
    pub slack: f32,
    /// Seed for every random choice the build makes.
    pub seed: u64,
}

impl BuildParams {
    /// Defaults for 2D points on the `[0, 256)` box: 32×32 grid of
    /// 8-unit cells, three shells of Chebyshev radius 1/2/3+, three
    /// edges per stage.
    #[must_use]
    pub fn grid_2d() -> Self {
        Self {
            max_degree: 32,
            build_list: 240,
            alpha: 1.2,
            grid_size: 32,
            cell_size: 8,
            stages: vec![
                StagePolicy {
                    search_list: 90,
                    budget: 3,
                    alpha: 1.2,
                    shell: Shell::bounded(0, 1),
                },
                StagePolicy {
                    search_list: 160,
                    budget: 3,
                    alpha: 1.2,
                    shell: Shell::bounded(2, 2),
                },
                StagePolicy {
                    search_list: 240,
                    budget: 3,
                    alpha: 1.2,
                    shell: Shell::open(3),
                },
            ],
            num_threads: 0,
            num_passes: 2,
            saturate: false,
            slack: 1.3,
            seed: 42,
        }
    }

    /// Defaults for 3D points on the `[0, 256)` box: 21×21×21 grid of
    /// 12-unit cells (the top cell absorbs the residual), budgets
    /// 10/10/5.
    #[must_use]
    pub fn grid_3d() -> Self {
        Self {
            max_degree: 32,
            build_list: 300,
            alpha: 1.2,
            grid_size: 21,
            cell_size: 12,
            stages: vec![
                StagePolicy {
                    search_list: 100,
                    budget: 10,
                    alpha: 1.2,
                    shell: Shell::bounded(0, 1),
                },
                StagePolicy {
                    search_list: 180,
                    budget: 10,
                    alpha: 2.0,
                    shell: Shell::bounded(2, 3),
                },
                StagePolicy {
                    search_list: 300,
                    budget: 5,
                    alpha: 1.0,
                    shell: Shell::open(4),
                },
            ],
            num_threads: 0,
            num_passes: 2,
            saturate: false,
            slack: 1.3,
            seed: 42,
        }
    }

    /// Transient degree bound during build: `⌊R × slack⌋`.
    #[must_use]
    pub fn slack_cap(&self) -> usize {
        (self.max_degree as f32 * self.slack) as usize
    }

    fn validate(&self) -> Result<()> {
        if self.max_degree == 0 {
            return Err(StratumError::Config("max_degree must be positive".into()));
        }
        if self.build_list == 0 {
            return Err(StratumError::Config("build_list must be positive".into()));
        }
        if self.num_passes == 0 {
            return Err(StratumError::Config("num_passes must be positive".into()));
        }
        if self.slack < 1.0 {
            return Err(StratumError::Config("slack must be at least 1.0".into()));
        }
        if self.alpha < 1.0 {
            return Err(StratumError::Config("alpha must be at least 1.0".into()));
        }
        if self.grid_size == 0 || self.cell_size == 0 {
            return Err(StratumError::Config(
                "grid_size and cell_size must be positive".into(),
            ));
        }
        if self.stages.is_empty() {
            return Err(StratumError::Config(
                "at least one stage policy is required".into(),
            ));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.search_list == 0 {
                return Err(StratumError::Config(format!(
                    "stage {i} has a non-positive search list size"
                )));
            }
            if stage.search_list > self.build_list {
                return Err(StratumError::Config(format!(
                    "stage {i} list size {} exceeds build_list {}",
                    stage.search_list, self.build_list
                )));
            }
            if stage.budget == 0 {
                return Err(StratumError::Config(format!(
                    "stage {i} has a zero edge budget"
                )));
            }
            if stage.alpha < 1.0 {
                return Err(StratumError::Config(format!(
                    "stage {i} alpha must be at least 1.0"
                )));
            }
            for (j, other) in self.stages.iter().enumerate().skip(i + 1) {
                if stage.shell.overlaps(&other.shell) {
                    return Err(StratumError::Config(format!(
                        "stage {i} and stage {j} shells overlap"
                    )));
                }
            }
        }
        let budget_sum: usize = self.stages.iter().map(|s| s.budget).sum();
        if budget_sum > self.slack_cap() {
            return Err(StratumError::Config(format!(
                "stage budgets sum to {budget_sum}, above the slack bound {}",
                self.slack_cap()
            )));
        }
        Ok(())
    }
}

/// Graph construction over an immutable point store.
///
/// Owns the points and the partial graph; [`IndexBuilder::build`]
/// consumes it into a frozen [`Index`].
pub struct IndexBuilder<T: Element> {
    points: PointStore<T>,
    params: BuildParams,
    grid: GridMap,
}

impl<T: Element> IndexBuilder<T> {
    /// Validate the configuration against the point set.
    pub fn new(points: PointStore<T>, params: BuildParams) -> Result<Self> {
        params.validate()?;
        if points.is_empty() {
            return Err(StratumError::MalformedInput(
                "cannot build an index over zero points".to_string(),
            ));
        }
        if points.len() > u32::MAX as usize {
            return Err(StratumError::MalformedInput(
                "point count exceeds the 32-bit id space".to_string(),
            ));
        }
        if !(2..=3).contains(&points.dim()) {
            return Err(StratumError::MalformedInput(format!(
                "grid-aware build requires 2 or 3 dimensions, data has {}",
                points.dim()
            )));
        }
        let grid = GridMap::new(params.grid_size, params.cell_size, points.dim())?;
        Ok(Self {
            points,
            params,
            grid,
        })
    }

    /// Build without a cancellation flag.
    pub fn build(self) -> Result<Index<T>> {
        self.build_with_cancel(&AtomicBool::new(false))
    }

    /// Build the graph, polling `cancel` between points. On cancellation
    /// the partial graph is dropped and [`StratumError::Cancelled`] is
    /// returned.
    pub fn build_with_cancel(self, cancel: &AtomicBool) -> Result<Index<T>> {
        let n = self.points.len();
        let graph = BuildGraph::new(n, self.params.slack_cap());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.num_threads)
            .build()
            .map_err(|e| StratumError::Config(e.to_string()))?;

        let medoid = pool.install(|| self.initial_medoid());
        info!(
            points = n,
            dim = self.points.dim(),
            max_degree = self.params.max_degree,
            passes = self.params.num_passes,
            medoid,
            "starting grid-stratified build"
        );

        for pass in 0..self.params.num_passes {
            if cancel.load(Ordering::Relaxed) {
                return Err(StratumError::Cancelled);
            }
            // Pass 1 of a multi-pass build approximates the plain
            // relative-neighborhood graph; later passes re-prune with the
            // configured alphas over the populated graph.
            let relaxed = pass == 0 && self.params.num_passes > 1;
            pool.install(|| self.run_pass(&graph, medoid, relaxed, cancel))?;
            self.log_degree_stats(&graph, pass);
        }

        // Back edges may have left vertices between R and the slack
        // bound; restore the R cap everywhere before freezing.
        pool.install(|| self.final_prune(&graph));

        let entry = self.select_entry(&graph, medoid)?;
        let mut lists = graph.into_lists();
        let repaired = self.repair_connectivity(&mut lists, entry)?;
        if repaired > 0 {
            debug!(edges = repaired, "connectivity repair added edges");
        }
        info!(entry, "build complete");

        let graph = Graph::from_parts(lists, entry, self.params.max_degree as u32);
        Ok(Index::from_parts(self.points, graph))
    }

    fn run_pass(
        &self,
        graph: &BuildGraph,
        medoid: u32,
        relaxed: bool,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let n = self.points.len();
        (0..n as u32).into_par_iter().try_for_each_init(
            || SearchScratch::new(n, self.params.build_list),
            |scratch, p| self.build_point(p, graph, medoid, relaxed, scratch, cancel),
        )
    }

    fn build_point(
        &self,
        p: u32,
        graph: &BuildGraph,
        medoid: u32,
        relaxed: bool,
        scratch: &mut SearchScratch,
        cancel: &AtomicBool,
    ) -> Result<()> {
        if cancel.load(Ordering::Relaxed) {
            return Err(StratumError::Cancelled);
        }
        let n = self.points.len();
        let query = self.points.get(p);

        // Per-point seed stream: candidate generation does not depend on
        // worker scheduling.
        let mut rng = StdRng::seed_from_u64(
            self.params
                .seed
                .wrapping_add((u64::from(p)).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        );
        let mut seeds = Vec::with_capacity(1 + EXTRA_SEEDS);
        seeds.push(medoid);
        for _ in 0..EXTRA_SEEDS {
            seeds.push(rng.random_range(0..n as u32));
        }

        let mut trace = Vec::with_capacity(self.params.build_list);
        beam_search(
            &self.points,
            graph,
            query,
            &seeds,
            self.params.build_list,
            self.params.build_list,
            scratch,
            Some(&mut trace),
        )
        .map_err(|e| {
            tracing::error!(point = p, "candidate search failed");
            e
        })?;

        trace.retain(|c| c.id != p);
        trace.sort_unstable();

        let chosen = self.select_stage_neighbors(p, &trace, relaxed);
        graph.set_neighbors(p, &chosen);

        for &q in &chosen {
            match graph.try_append(q, p, self.params.slack_cap()) {
                Append::Added | Append::Duplicate => {}
                Append::Full => self.capacity_prune(graph, q, p, relaxed),
            }
        }
        Ok(())
    }

    /// Stage-partitioned neighbor selection for `p` over the ranked
    /// candidate trace.
    fn select_stage_neighbors(&self, p: u32, candidates: &[Neighbor], relaxed: bool) -> Vec<u32> {
        let r = self.params.max_degree;
        let p_vec = self.points.get(p);
        let mut chosen: Vec<Neighbor> = Vec::with_capacity(r);
        let mut stage_pool: Vec<Neighbor> = Vec::new();
        let mut accepted: Vec<Neighbor> = Vec::new();

        for stage in &self.params.stages {
            stage_pool.clear();
            for c in candidates {
                if stage_pool.len() >= stage.search_list {
                    break;
                }
                let stratum = self.grid.stratum_of(p_vec, self.points.get(c.id));
                if stage.shell.contains(stratum) {
                    stage_pool.push(*c);
                }
            }

            let alpha = if relaxed { 1.0 } else { stage.alpha };
            occlude(&self.points, &stage_pool, alpha, stage.budget, &mut accepted);
            for c in &accepted {
                if !chosen.iter().any(|s| s.id == c.id) {
                    chosen.push(*c);
                }
            }
        }

        if self.params.saturate && chosen.len() < r {
            for c in candidates {
                if chosen.len() >= r {
                    break;
                }
                if !chosen.iter().any(|s| s.id == c.id) {
                    chosen.push(*c);
                }
            }
        }

        chosen.sort_unstable();
        chosen.truncate(r);
        chosen.into_iter().map(|c| c.id).collect()
    }

    /// Re-prune `adj(q) ∪ {p}` down to `R` after a back edge overflowed
    /// the slack bound. Uses the alpha of the stage whose shell holds
    /// `p`'s stratum relative to `q`, falling back to the global alpha.
    fn capacity_prune(&self, graph: &BuildGraph, q: u32, p: u32, relaxed: bool) {
        let q_vec = self.points.get(q);
        let alpha = if relaxed {
            1.0
        } else {
            let stratum = self.grid.stratum_of(q_vec, self.points.get(p));
            self.params
                .stages
                .iter()
                .find(|s| s.shell.contains(stratum))
                .map_or(self.params.alpha, |s| s.alpha)
        };

        let mut guard = graph.lock(q);
        let mut pool: Vec<Neighbor> = Vec::with_capacity(guard.len() + 1);
        for &nb in guard.iter() {
            pool.push(Neighbor {
                id: nb,
                dist: squared_l2(q_vec, self.points.get(nb)),
            });
        }
        if !guard.iter().any(|&nb| nb == p) {
            pool.push(Neighbor {
                id: p,
                dist: squared_l2(q_vec, self.points.get(p)),
            });
        }
        pool.sort_unstable();

        let mut kept = Vec::with_capacity(self.params.max_degree);
        occlude(&self.points, &pool, alpha, self.params.max_degree, &mut kept);
        guard.clear();
        guard.extend(kept.iter().map(|c| c.id));
    }

    /// Approximate medoid: the point minimizing summed distance to a
    /// small random pivot set.
    fn initial_medoid(&self) -> u32 {
        let n = self.points.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let pivots: Vec<u32> = (0..8.min(n))
            .map(|_| rng.random_range(0..n as u32))
            .collect();

        let (best, _) = (0..n as u32)
            .into_par_iter()
            .map(|i| {
                let score: f32 = pivots
                    .iter()
                    .map(|&p| squared_l2(self.points.get(i), self.points.get(p)))
                    .sum();
                (i, score)
            })
            .reduce(
                || (0u32, f32::INFINITY),
                |a, b| match a.1.total_cmp(&b.1) {
                    std::cmp::Ordering::Less => a,
                    std::cmp::Ordering::Greater => b,
                    std::cmp::Ordering::Equal => {
                        if a.0 <= b.0 {
                            a
                        } else {
                            b
                        }
                    }
                },
            );
        best
    }

    /// Locate the stored point nearest the centroid with a wide beam
    /// search and record it as the entry point.
    fn select_entry(&self, graph: &BuildGraph, medoid: u32) -> Result<u32> {
        let n = self.points.len();
        let centroid: Vec<T> = self
            .points
            .centroid()
            .into_iter()
            .map(T::from_f32)
            .collect();

        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(1));
        let mut seeds = Vec::with_capacity(9);
        seeds.push(medoid);
        for _ in 0..8.min(n) {
            seeds.push(rng.random_range(0..n as u32));
        }

        let list = 4 * self.params.max_degree;
        let mut scratch = SearchScratch::new(n, list);
        let out = beam_search(&self.points, graph, &centroid, &seeds, list, 1, &mut scratch, None)?;
        Ok(out.results.first().map_or(medoid, |c| c.id))
    }

    /// Prune every vertex still above `R` down to `R`: alpha-prune with
    /// the global alpha, then fill back up with the closest survivors.
    fn final_prune(&self, graph: &BuildGraph) {
        let r = self.params.max_degree;
        let n = graph.num_vertices();
        (0..n as u32).into_par_iter().for_each(|v| {
            if graph.degree(v) <= r {
                return;
            }
            let v_vec = self.points.get(v);
            let mut guard = graph.lock(v);
            if guard.len() <= r {
                return;
            }
            let mut pool: Vec<Neighbor> = guard
                .iter()
                .map(|&nb| Neighbor {
                    id: nb,
                    dist: squared_l2(v_vec, self.points.get(nb)),
                })
                .collect();
            pool.sort_unstable();

            let mut kept = Vec::with_capacity(r);
            occlude(&self.points, &pool, self.params.alpha, r, &mut kept);
            if kept.len() < r {
                for c in &pool {
                    if kept.len() >= r {
                        break;
                    }
                    if !kept.iter().any(|s| s.id == c.id) {
                        kept.push(*c);
                    }
                }
                kept.sort_unstable();
            }
            guard.clear();
            guard.extend(kept.iter().map(|c| c.id));
        });
    }

    /// Make every vertex reachable from the entry point, attaching each
    /// unreached vertex from its nearest reached one.
    fn repair_connectivity(&self, adj: &mut [AdjList], entry: u32) -> Result<usize> {
        let n = adj.len();
        let r = self.params.max_degree;
        let list = (2 * r).max(8);
        let mut scratch = SearchScratch::new(n, list);
        let mut added = 0usize;

        for round in 0..MAX_REPAIR_ROUNDS {
            let mut reached = vec![false; n];
            mark_reachable(&*adj, entry, &mut reached);
            let unreached: Vec<u32> = (0..n as u32).filter(|&v| !reached[v as usize]).collect();
            if unreached.is_empty() {
                return Ok(added);
            }
            warn!(
                count = unreached.len(),
                round, "entry point cannot reach every vertex; adding repair edges"
            );

            for p in unreached {
                if reached[p as usize] {
                    continue;
                }
                let view = ListView(&*adj);
                let out = beam_search(
                    &self.points,
                    &view,
                    self.points.get(p),
                    &[entry],
                    list,
                    list,
                    &mut scratch,
                    None,
                )?;
                let q = out
                    .results
                    .iter()
                    .find(|c| reached[c.id as usize])
                    .map_or(entry, |c| c.id);

                let q_vec = self.points.get(q);
                let list_q = &mut adj[q as usize];
                if !list_q.contains(&p) {
                    if list_q.len() < r {
                        list_q.push(p);
                    } else {
                        // Evict the farthest neighbor to make room.
                        let mut worst = 0usize;
                        let mut worst_dist = f32::NEG_INFINITY;
                        for (slot, &nb) in list_q.iter().enumerate() {
                            let d = squared_l2(q_vec, self.points.get(nb));
                            if d > worst_dist {
                                worst_dist = d;
                                worst = slot;
                            }
                        }
                        list_q[worst] = p;
                    }
                    added += 1;
                }
                mark_reachable(&*adj, p, &mut reached);
            }
        }

        let mut reached = vec![false; n];
        mark_reachable(&*adj, entry, &mut reached);
        let remaining = reached.iter().filter(|&&v| !v).count();
        if remaining > 0 {
            warn!(remaining, "connectivity repair did not converge");
        }
        Ok(added)
    }

    fn log_degree_stats(&self, graph: &BuildGraph, pass: usize) {
        let n = graph.num_vertices();
        let mut min = usize::MAX;
        let mut max = 0usize;
        let mut total = 0usize;
        for v in 0..n as u32 {
            let d = graph.degree(v);
            min = min.min(d);
            max = max.max(d);
            total += d;
        }
        debug!(
            pass,
            min_degree = min,
            max_degree = max,
            mean_degree = total as f64 / n as f64,
            "pass complete"
        );
    }
}

/// Relative-neighborhood prune with slack: iterate `sorted` (ascending by
/// distance to the base point) and accept a candidate unless an accepted
/// neighbor `n` occludes it (`alpha · d(n, c) ≤ d(base, c)`).
fn occlude<T: Element>(
    points: &PointStore<T>,
    sorted: &[Neighbor],
    alpha: f32,
    cap: usize,
    out: &mut Vec<Neighbor>,
) {
    out.clear();
    'candidates: for c in sorted {
        if out.len() >= cap {
            break;
        }
        for sel in out.iter() {
            let between = squared_l2(points.get(sel.id), points.get(c.id));
            if alpha * between <= c.dist {
                continue 'candidates;
            }
        }
        out.push(*c);
    }
}

/// Depth-first flood fill over out-edges, marking `reached`.
fn mark_reachable(adj: &[AdjList], start: u32, reached: &mut [bool]) {
    if reached[start as usize] {
        return;
    }
    reached[start as usize] = true;
    let mut stack = vec![start];
    while let Some(v) = stack.pop() {
        for &nb in &adj[v as usize] {
            if !reached[nb as usize] {
                reached[nb as usize] = true;
                stack.push(nb);
            }
        }
    }
}
