//! 2-d process grids for SUMMA contractions
//!
//! A [`ProcGrid`] factors the world into `rows × cols` so that the grid's
//! aspect ratio approximates the element-space aspect ratio of the result
//! matrix `(M, N)`. Contraction inputs arrive *row-phased* (left operand
//! rows aligned with grid rows) and *col-phased* (right operand columns
//! aligned with grid columns); both phasings, and the cyclic output
//! distribution, are [`CyclicPmap`]s produced here.

use std::sync::Arc;

use mosaic_runtime::World;

use crate::pmap::{CyclicPmap, PmapRef};

/// A rows × cols arrangement of the world's ranks.
#[derive(Debug, Clone)]
pub struct ProcGrid {
    world: World,
    rows: usize,
    cols: usize,
    row_tiles: usize,
    col_tiles: usize,
}

impl ProcGrid {
    /// Arrange `world` into a grid for an `(M, N)` result partitioned into
    /// `row_tiles × col_tiles` tiles with `row_elems × col_elems` elements.
    ///
    /// Among the factorizations `rows · cols == world.size()`, the one whose
    /// `rows / cols` ratio is closest to `M / N` (in log space, so wide and
    /// tall mismatches penalize equally) is selected. The grid never has
    /// more rows than result tile rows or more columns than result tile
    /// columns, when avoidable.
    pub fn new(
        world: World,
        row_tiles: usize,
        col_tiles: usize,
        row_elems: usize,
        col_elems: usize,
    ) -> Self {
        let procs = world.size();
        let target = (row_elems.max(1) as f64 / col_elems.max(1) as f64).ln();

        let mut best = (1, procs);
        let mut best_cost = f64::INFINITY;
        for rows in 1..=procs {
            if procs % rows != 0 {
                continue;
            }
            let cols = procs / rows;
            let mut cost = ((rows as f64 / cols as f64).ln() - target).abs();
            // Heavily penalize grids that leave ranks without any tile row
            // or column to own.
            if rows > row_tiles.max(1) || cols > col_tiles.max(1) {
                cost += 1e3;
            }
            if cost < best_cost {
                best_cost = cost;
                best = (rows, cols);
            }
        }

        Self {
            world,
            rows: best.0,
            cols: best.1,
            row_tiles,
            col_tiles,
        }
    }

    /// Grid rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Grid columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// This rank's grid row.
    pub fn rank_row(&self) -> usize {
        self.world.rank() / self.cols
    }

    /// This rank's grid column.
    pub fn rank_col(&self) -> usize {
        self.world.rank() % self.cols
    }

    /// The rank sitting at grid position `(row, col)`.
    pub fn rank_at(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.rows && col < self.cols);
        row * self.cols + col
    }

    /// Owner of result tile `(tile_row, tile_col)` under the cyclic output
    /// distribution.
    pub fn owner(&self, tile_row: usize, tile_col: usize) -> usize {
        self.rank_at(tile_row % self.rows, tile_col % self.cols)
    }

    /// All ranks in this rank's grid row.
    pub fn row_ranks(&self) -> Vec<usize> {
        let row = self.rank_row();
        (0..self.cols).map(|col| self.rank_at(row, col)).collect()
    }

    /// All ranks in this rank's grid column.
    pub fn col_ranks(&self) -> Vec<usize> {
        let col = self.rank_col();
        (0..self.rows).map(|row| self.rank_at(row, col)).collect()
    }

    /// Row-phased pmap for the left operand's `row_tiles × inner_tiles`
    /// tile matrix: tile row `i` lives in grid row `i mod rows`.
    pub fn make_row_phase_pmap(&self, inner_tiles: usize) -> PmapRef {
        Arc::new(CyclicPmap::new(
            &self.world,
            self.row_tiles,
            inner_tiles,
            self.rows,
            self.cols,
        ))
    }

    /// Column-phased pmap for the right operand's `inner_tiles × col_tiles`
    /// tile matrix: tile column `j` lives in grid column `j mod cols`.
    pub fn make_col_phase_pmap(&self, inner_tiles: usize) -> PmapRef {
        Arc::new(CyclicPmap::new(
            &self.world,
            inner_tiles,
            self.col_tiles,
            self.rows,
            self.cols,
        ))
    }

    /// Cyclic pmap for the result's `row_tiles × col_tiles` tile matrix.
    pub fn make_cyclic_pmap(&self) -> PmapRef {
        Arc::new(CyclicPmap::new(
            &self.world,
            self.row_tiles,
            self.col_tiles,
            self.rows,
            self.cols,
        ))
    }
}
