//! Tile-ordinal → owner-rank maps
//!
//! A [`Pmap`] assigns every tile ordinal of an array to exactly one owner
//! rank, deterministically: every rank computes the same `owner(i)` without
//! communication, and the set of `is_local` tiles on rank `r` is exactly
//! `{i : owner(i) == r}`. The exception is the replicated map, where every
//! rank owns every tile.

use std::sync::Arc;

use mosaic_runtime::World;

/// Deterministic tile-distribution contract.
pub trait Pmap: Send + Sync + std::fmt::Debug {
    /// Number of tiles this map distributes.
    fn size(&self) -> usize;

    /// The calling process's rank.
    fn rank(&self) -> usize;

    /// Number of ranks in the world this map distributes over.
    fn procs(&self) -> usize;

    /// Owner rank of tile `ord`; identical on every rank.
    fn owner(&self, ord: usize) -> usize;

    /// `true` when this rank owns tile `ord`.
    fn is_local(&self, ord: usize) -> bool {
        self.owner(ord) == self.rank()
    }

    /// `true` when every rank owns every tile.
    fn is_replicated(&self) -> bool {
        false
    }

    /// The tiles owned by this rank, each exactly once, in increasing order.
    fn local_indices(&self) -> Vec<usize> {
        (0..self.size()).filter(|&ord| self.is_local(ord)).collect()
    }
}

/// Contiguous blocks of tiles per rank.
///
/// The first `size % procs` ranks receive one extra tile, so block sizes
/// differ by at most one.
#[derive(Debug)]
pub struct BlockedPmap {
    size: usize,
    rank: usize,
    procs: usize,
    block: usize,
    remainder: usize,
}

impl BlockedPmap {
    pub fn new(world: &World, size: usize) -> Self {
        Self {
            size,
            rank: world.rank(),
            procs: world.size(),
            block: size / world.size(),
            remainder: size % world.size(),
        }
    }
}

impl Pmap for BlockedPmap {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn procs(&self) -> usize {
        self.procs
    }

    fn owner(&self, ord: usize) -> usize {
        debug_assert!(ord < self.size);
        let wide = self.remainder * (self.block + 1);
        if ord < wide {
            ord / (self.block + 1)
        } else {
            self.remainder + (ord - wide) / self.block
        }
    }

    fn local_indices(&self) -> Vec<usize> {
        let lower = if self.rank < self.remainder {
            self.rank * (self.block + 1)
        } else {
            self.remainder * (self.block + 1) + (self.rank - self.remainder) * self.block
        };
        let width = if self.rank < self.remainder {
            self.block + 1
        } else {
            self.block
        };
        (lower..(lower + width).min(self.size)).collect()
    }
}

/// Block-cyclic distribution of a 2-d tile matrix over a process grid.
///
/// Tile `(i, j)` lives on the grid process `(i mod rows, j mod cols)`. Row-
/// and column-phased SUMMA inputs and cyclic SUMMA outputs are all instances
/// of this map with the appropriate tile-matrix shape.
#[derive(Debug)]
pub struct CyclicPmap {
    size: usize,
    rank: usize,
    procs: usize,
    tile_cols: usize,
    grid_rows: usize,
    grid_cols: usize,
}

impl CyclicPmap {
    /// Distribute a `tile_rows × tile_cols` tile matrix over a
    /// `grid_rows × grid_cols` process grid.
    pub fn new(
        world: &World,
        tile_rows: usize,
        tile_cols: usize,
        grid_rows: usize,
        grid_cols: usize,
    ) -> Self {
        assert!(
            grid_rows * grid_cols <= world.size(),
            "process grid {grid_rows}×{grid_cols} exceeds world size {}",
            world.size()
        );
        Self {
            size: tile_rows * tile_cols,
            rank: world.rank(),
            procs: world.size(),
            tile_cols,
            grid_rows,
            grid_cols,
        }
    }
}

impl Pmap for CyclicPmap {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn procs(&self) -> usize {
        self.procs
    }

    fn owner(&self, ord: usize) -> usize {
        debug_assert!(ord < self.size);
        let row = ord / self.tile_cols;
        let col = ord % self.tile_cols;
        (row % self.grid_rows) * self.grid_cols + (col % self.grid_cols)
    }
}

/// Every rank owns every tile.
#[derive(Debug)]
pub struct ReplicatedPmap {
    size: usize,
    rank: usize,
    procs: usize,
}

impl ReplicatedPmap {
    pub fn new(world: &World, size: usize) -> Self {
        Self {
            size,
            rank: world.rank(),
            procs: world.size(),
        }
    }
}

impl Pmap for ReplicatedPmap {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn procs(&self) -> usize {
        self.procs
    }

    fn owner(&self, _ord: usize) -> usize {
        self.rank
    }

    fn is_local(&self, _ord: usize) -> bool {
        true
    }

    fn is_replicated(&self) -> bool {
        true
    }

    fn local_indices(&self) -> Vec<usize> {
        (0..self.size).collect()
    }
}

/// Shared pmap handle used throughout the evaluation pipeline.
pub type PmapRef = Arc<dyn Pmap>;
