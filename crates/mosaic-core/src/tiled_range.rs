//! Tiled index domains
//!
//! A [`TiledRange1`] partitions one mode into contiguous tiles by an ordered
//! list of boundaries; a [`TiledRange`] combines one per mode. The tiled
//! range induces two boxes: the *tile range* (one coordinate per tile) and
//! the *element range* (the union of all tile element boxes), with
//! `make_tile_range` mapping tile coordinates to element boxes.
//!
//! Invariant: the tile element boxes partition the element range, so their
//! volumes always sum to the element-range volume.

use std::ops::Mul;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::permutation::Permutation;
use crate::range::Range;

/// Tile boundaries for a single mode.
///
/// `boundaries = [e_0, …, e_n]` produces `n` tiles, tile `i` covering the
/// element interval `[e_i, e_{i+1})`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiledRange1 {
    boundaries: Box<[usize]>,
}

impl TiledRange1 {
    /// Create a mode tiling from explicit boundaries.
    ///
    /// # Errors
    ///
    /// [`Error::BoundariesNotIncreasing`] unless the list is non-empty and
    /// strictly increasing.
    pub fn from_boundaries(boundaries: Vec<usize>) -> Result<Self> {
        let increasing = boundaries.windows(2).all(|pair| pair[0] < pair[1]);
        if boundaries.is_empty() || !increasing {
            return Err(Error::BoundariesNotIncreasing(boundaries));
        }
        Ok(Self {
            boundaries: boundaries.into_boxed_slice(),
        })
    }

    /// Uniform tiling of `[0, extent)` into blocks of `block` elements; the
    /// final tile absorbs the remainder.
    pub fn from_uniform(extent: usize, block: usize) -> Self {
        assert!(block > 0, "tile block size must be positive");
        let mut boundaries: Vec<usize> = (0..extent).step_by(block).collect();
        if boundaries.is_empty() {
            boundaries.push(0);
        }
        if *boundaries.last().expect("non-empty") != extent {
            boundaries.push(extent);
        }
        Self {
            boundaries: boundaries.into_boxed_slice(),
        }
    }

    /// Number of tiles in this mode.
    pub fn tile_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Element interval `[lo, hi)` of tile `i`.
    pub fn tile(&self, i: usize) -> (usize, usize) {
        (self.boundaries[i], self.boundaries[i + 1])
    }

    /// Element count of tile `i`.
    pub fn tile_extent(&self, i: usize) -> usize {
        self.boundaries[i + 1] - self.boundaries[i]
    }

    /// First element covered by this mode.
    pub fn elements_lower(&self) -> usize {
        self.boundaries[0]
    }

    /// One past the last element covered by this mode.
    pub fn elements_upper(&self) -> usize {
        *self.boundaries.last().expect("non-empty boundaries")
    }

    /// The tile containing element `e`, when any.
    pub fn element_to_tile(&self, e: usize) -> Option<usize> {
        if e < self.elements_lower() || e >= self.elements_upper() {
            return None;
        }
        Some(self.boundaries.partition_point(|&boundary| boundary <= e) - 1)
    }

    /// The tile boundaries.
    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }
}

/// An n-dimensional tiled index domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiledRange {
    modes: Box<[TiledRange1]>,
    tiles: Range,
    elements: Range,
}

impl TiledRange {
    /// Combine one mode tiling per dimension.
    pub fn new(modes: Vec<TiledRange1>) -> Self {
        let tiles = Range::from_extents(&modes.iter().map(TiledRange1::tile_count).collect::<Vec<_>>());
        let elements = Range::new(
            modes.iter().map(TiledRange1::elements_lower).collect(),
            modes.iter().map(TiledRange1::elements_upper).collect(),
        )
        .expect("mode boundaries are increasing");
        Self {
            modes: modes.into_boxed_slice(),
            tiles,
            elements,
        }
    }

    /// Uniform tiling of the box `[0, extents)` with per-mode block sizes.
    pub fn from_uniform(extents: &[usize], blocks: &[usize]) -> Self {
        assert_eq!(
            extents.len(),
            blocks.len(),
            "one block size per mode is required"
        );
        Self::new(
            extents
                .iter()
                .zip(blocks)
                .map(|(&extent, &block)| TiledRange1::from_uniform(extent, block))
                .collect(),
        )
    }

    /// Number of modes.
    pub fn rank(&self) -> usize {
        self.modes.len()
    }

    /// The box with one coordinate per tile.
    pub fn tiles_range(&self) -> &Range {
        &self.tiles
    }

    /// The box of all elements covered by the tiling.
    pub fn elements_range(&self) -> &Range {
        &self.elements
    }

    /// The tiling of mode `i`.
    pub fn mode(&self, i: usize) -> &TiledRange1 {
        &self.modes[i]
    }

    /// All mode tilings.
    pub fn modes(&self) -> &[TiledRange1] {
        &self.modes
    }

    /// Element box of the tile with coordinate `coord`.
    ///
    /// # Errors
    ///
    /// [`Error::CoordOutOfRange`] when `coord` is outside the tile range.
    pub fn make_tile_range_coord(&self, coord: &[usize]) -> Result<Range> {
        if !self.tiles.includes(coord) {
            return Err(Error::CoordOutOfRange {
                coord: coord.to_vec(),
            });
        }
        let mut lower = Vec::with_capacity(self.rank());
        let mut upper = Vec::with_capacity(self.rank());
        for (mode, &tile) in self.modes.iter().zip(coord) {
            let (lo, hi) = mode.tile(tile);
            lower.push(lo);
            upper.push(hi);
        }
        Range::new(lower, upper)
    }

    /// Element box of the tile with ordinal `ord` in the tile range.
    pub fn make_tile_range(&self, ord: usize) -> Result<Range> {
        let coord = self.tiles.coord(ord)?;
        self.make_tile_range_coord(&coord)
    }

    /// The tile coordinate containing element coordinate `element`, when any.
    pub fn element_to_tile(&self, element: &[usize]) -> Option<Vec<usize>> {
        if element.len() != self.rank() {
            return None;
        }
        self.modes
            .iter()
            .zip(element)
            .map(|(mode, &e)| mode.element_to_tile(e))
            .collect()
    }
}

impl Mul<&TiledRange> for &Permutation {
    type Output = TiledRange;

    /// Reorder the mode tilings: mode `i` of the input becomes mode `p(i)`.
    fn mul(self, trange: &TiledRange) -> TiledRange {
        TiledRange::new(self.apply(trange.modes()))
    }
}

impl std::fmt::Display for TiledRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TiledRange(")?;
        for (i, mode) in self.modes.iter().enumerate() {
            if i > 0 {
                write!(f, " × ")?;
            }
            write!(f, "{:?}", mode.boundaries())?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tr_2x2() -> TiledRange {
        // 4 elements per mode, tiled [0, 2, 4): two tiles of two elements.
        TiledRange::from_uniform(&[4, 4], &[2, 2])
    }

    #[test]
    fn test_boundaries_must_increase() {
        assert!(TiledRange1::from_boundaries(vec![0, 3, 3]).is_err());
        assert!(TiledRange1::from_boundaries(vec![]).is_err());
        assert!(TiledRange1::from_boundaries(vec![0, 3, 7]).is_ok());
    }

    #[test]
    fn test_tile_and_element_ranges() {
        let tr = tr_2x2();
        assert_eq!(tr.tiles_range().extent(), &[2, 2]);
        assert_eq!(tr.elements_range().extent(), &[4, 4]);

        let block = tr.make_tile_range_coord(&[1, 0]).unwrap();
        assert_eq!(block.lower(), &[2, 0]);
        assert_eq!(block.upper(), &[4, 2]);
    }

    #[test]
    fn test_tile_volumes_partition_elements() {
        let tr = TiledRange::new(vec![
            TiledRange1::from_boundaries(vec![0, 3, 4, 9]).unwrap(),
            TiledRange1::from_boundaries(vec![1, 2, 6]).unwrap(),
        ]);
        let total: usize = (0..tr.tiles_range().volume())
            .map(|ord| tr.make_tile_range(ord).unwrap().volume())
            .sum();
        assert_eq!(total, tr.elements_range().volume());
    }

    #[test]
    fn test_element_to_tile_lookup() {
        let mode = TiledRange1::from_boundaries(vec![2, 5, 6, 10]).unwrap();
        assert_eq!(mode.element_to_tile(1), None);
        assert_eq!(mode.element_to_tile(2), Some(0));
        assert_eq!(mode.element_to_tile(4), Some(0));
        assert_eq!(mode.element_to_tile(5), Some(1));
        assert_eq!(mode.element_to_tile(9), Some(2));
        assert_eq!(mode.element_to_tile(10), None);
    }

    #[test]
    fn test_permutation_acts_on_modes() {
        let tr = TiledRange::new(vec![
            TiledRange1::from_uniform(6, 3),
            TiledRange1::from_uniform(4, 2),
        ]);
        let p = Permutation::new(vec![1, 0]).unwrap();
        let permuted = &p * &tr;
        assert_eq!(permuted.tiles_range().extent(), &[2, 2]);
        assert_eq!(permuted.elements_range().extent(), &[4, 6]);
        assert_eq!(permuted.mode(0).tile_extent(0), 2);
    }
}
