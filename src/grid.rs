//! Spatial grid over the bounded coordinate box.
//!
//! The grid quantizes each coordinate axis into `grid_size` cells of
//! `cell_size` units. Cell distance is Chebyshev (max per-axis
//! difference), so the strata around a reference cell are square shells:
//! stratum 0 is the cell itself, stratum 1 its ring of direct neighbors,
//! and so on. The builder allocates edges per stratum.

use crate::distance::Element;
use crate::error::{Result, StratumError};

/// Grid cell coordinate. Axes beyond the map's dimension stay zero.
pub type Cell = [u32; 3];

/// Quantizer from point coordinates to grid cells.
///
/// `grid_size × cell_size` covers the coordinate range; coordinates past
/// the last cell boundary clamp into the top cell, so a range the product
/// covers only approximately (e.g. 21 × 12 = 252 of 256) still maps every
/// point.
#[derive(Clone, Copy, Debug)]
pub struct GridMap {
    grid_size: u32,
    cell_size: u32,
    dim: usize,
}

impl GridMap {
    /// Create a map with `grid_size` cells of `cell_size` units per axis.
    pub fn new(grid_size: u32, cell_size: u32, dim: usize) -> Result<Self> {
        if grid_size == 0 || cell_size == 0 {
            return Err(StratumError::Config(
                "grid_size and cell_size must be positive".to_string(),
            ));
        }
        if !(2..=3).contains(&dim) {
            return Err(StratumError::Config(format!(
                "grid partitioning supports 2 or 3 dimensions, got {dim}"
            )));
        }
        Ok(Self {
            grid_size,
            cell_size,
            dim,
        })
    }

    /// Cells per axis.
    #[inline]
    #[must_use]
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Axis extent of one cell.
    #[inline]
    #[must_use]
    pub fn cell_size(&self) -> u32 {
        self.cell_size
    }

    /// Grid cell of a point.
    #[inline]
    #[must_use]
    pub fn cell<T: Element>(&self, point: &[T]) -> Cell {
        debug_assert!(point.len() >= self.dim);
        let mut cell = [0u32; 3];
        for (axis, slot) in cell.iter_mut().take(self.dim).enumerate() {
            *slot = self.axis_cell(point[axis]);
        }
        cell
    }

    /// Chebyshev distance between two cells.
    #[inline]
    #[must_use]
    pub fn chebyshev(&self, a: Cell, b: Cell) -> u32 {
        let mut max = 0;
        for axis in 0..self.dim {
            max = max.max(a[axis].abs_diff(b[axis]));
        }
        max
    }

    /// Chebyshev stratum of point `q` relative to point `p`.
    #[inline]
    #[must_use]
    pub fn stratum_of<T: Element>(&self, p: &[T], q: &[T]) -> u32 {
        let mut max = 0;
        for axis in 0..self.dim {
            let a = self.axis_cell(p[axis]);
            let b = self.axis_cell(q[axis]);
            max = max.max(a.abs_diff(b));
        }
        max
    }

    #[inline]
    fn axis_cell<T: Element>(&self, v: T) -> u32 {
        (v.grid_coord() / self.cell_size).min(self.grid_size - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_by_integer_division() {
        let grid = GridMap::new(32, 8, 2).unwrap();
        assert_eq!(grid.cell(&[0u8, 7]), [0, 0, 0]);
        assert_eq!(grid.cell(&[8u8, 15]), [1, 1, 0]);
        assert_eq!(grid.cell(&[255u8, 0]), [31, 0, 0]);
    }

    #[test]
    fn upper_boundary_clamps_into_top_cell() {
        // 21 cells of 12 cover 252 of the 256 range; 252..=255 clamp.
        let grid = GridMap::new(21, 12, 3).unwrap();
        assert_eq!(grid.cell(&[252u8, 255, 0]), [20, 20, 0]);
    }

    #[test]
    fn chebyshev_takes_the_max_axis() {
        let grid = GridMap::new(32, 8, 2).unwrap();
        assert_eq!(grid.chebyshev([0, 0, 0], [3, 1, 0]), 3);
        assert_eq!(grid.chebyshev([5, 5, 0], [5, 5, 0]), 0);
    }

    #[test]
    fn stratum_matches_cell_chebyshev() {
        let grid = GridMap::new(32, 8, 2).unwrap();
        let p = [0u8, 0];
        let q = [17u8, 9]; // cells (2, 1)
        assert_eq!(grid.stratum_of(&p, &q), 2);
        assert_eq!(grid.stratum_of(&q, &p), 2);
    }

    #[test]
    fn rejects_unsupported_dimensions() {
        assert!(GridMap::new(32, 8, 1).is_err());
        assert!(GridMap::new(32, 8, 4).is_err());
        assert!(GridMap::new(0, 8, 2).is_err());
    }
}
