//! Error types for mosaic-core operations

use mosaic_runtime::RuntimeError;

/// Result type for mosaic-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mosaic-core operations
///
/// User-contract violations (bad labels, out-of-range tile indices, double
/// sets, uninitialized arrays) carry enough context to be reported on rank 0.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Permutation or operand rank mismatch
    #[error("rank mismatch: {left} vs {right}")]
    RankMismatch { left: usize, right: usize },

    /// A permutation vector that is not a bijection on its positions
    #[error("invalid permutation: {0:?} is not a bijection")]
    InvalidPermutation(Vec<usize>),

    /// Range lower bound exceeds upper bound in some mode
    #[error("invalid range bounds: lower {lower:?} exceeds upper {upper:?}")]
    InvalidBounds { lower: Vec<usize>, upper: Vec<usize> },

    /// Tile boundaries that are not strictly increasing
    #[error("tile boundaries must be strictly increasing: {0:?}")]
    BoundariesNotIncreasing(Vec<usize>),

    /// Coordinate outside its range
    #[error("coordinate {coord:?} is outside the range")]
    CoordOutOfRange { coord: Vec<usize> },

    /// Tile ordinal outside the tile range
    #[error("tile ordinal {ord} is out of range: array has {size} tiles")]
    TileOutOfRange { ord: usize, size: usize },

    /// Second assignment of the same tile without `skip_set`
    #[error("tile {ord} has already been set")]
    TileAlreadySet { ord: usize },

    /// Assignment of a tile owned by another rank
    #[error("tile {ord} is owned by rank {owner}, not rank {rank}")]
    NotLocal { ord: usize, owner: usize, rank: usize },

    /// Access to a tile that is structurally zero under the array shape
    #[error("tile {ord} is zero under the array shape")]
    ZeroTile { ord: usize },

    /// Operation on a default-constructed array handle
    #[error("array has not been initialized: it was default constructed and never assigned")]
    Uninitialized,

    /// Shape whose tile range disagrees with the tiled range
    #[error("shape range does not match the array tile range")]
    ShapeMismatch,

    /// Index-string label count differs from the array rank
    #[error("index labels {labels:?} do not match the array rank {rank}")]
    LabelCount { labels: String, rank: usize },

    /// The same label appears twice in one index string
    #[error("duplicate index label {0:?}")]
    DuplicateLabel(String),

    /// Expression operands whose label sets cannot be combined
    #[error("incompatible expression labels: {left:?} vs {right:?}")]
    IncompatibleLabels {
        left: Vec<String>,
        right: Vec<String>,
    },

    /// Tile extent mismatch between operands
    #[error("tile extents do not match: {left:?} vs {right:?}")]
    ExtentMismatch {
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// Error propagated from the task runtime
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
