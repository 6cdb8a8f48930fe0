//! # mosaic-core - Distributed Block-Tiled Arrays
//!
//! A distributed, block-tiled multidimensional array library for numerical
//! tensor algebra. Arrays are partitioned into rectangular tiles; tiles are
//! distributed across the ranks of a [`mosaic_runtime::World`]; dense and
//! block-sparse arrays share one programming model. Index-string tensor
//! expressions (`c.assign("i,j", a.idx("i,k")? * b.idx("k,j")?)`) compile at
//! runtime into a dataflow graph of distributed tile operations executed
//! asynchronously.
//!
//! ## Architecture
//!
//! ```text
//! expr      index-string expressions and the two-pass engines
//! eval      distributed evaluators (leaf / unary / binary / SUMMA)
//! array     DistArray / ArrayImpl, replication, deferred cleanup
//! tensor    tiles, element kernels, gemm
//! shape     dense / sparse structure metadata
//! pmap      tile-ordinal to owner-rank maps, process grids
//! range     permutations, ranges, tiled ranges
//! ```
//!
//! The layers are strict: everything below `array` is plain immutable data,
//! everything above it is asynchronous and distribution-aware.

pub mod array;
pub mod error;
pub mod eval;
pub mod expr;
pub mod permutation;
pub mod pmap;
pub mod proc_grid;
pub mod range;
pub mod reduce;
pub mod shape;
pub mod tensor;
pub mod tiled_range;

pub use array::{ArrayImpl, DistArray, TileFuture};
pub use error::{Error, Result};
pub use expr::{Expr, VariableList};
pub use permutation::Permutation;
pub use pmap::{BlockedPmap, CyclicPmap, Pmap, PmapRef, ReplicatedPmap};
pub use proc_grid::ProcGrid;
pub use range::Range;
pub use shape::{Shape, SparseShape};
pub use tensor::{GemmHelper, Scalar, Tensor, TileValue, TransposeFlag};
pub use tiled_range::{TiledRange, TiledRange1};
