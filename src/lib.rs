//! # mosaic - Distributed Block-Tiled Multidimensional Arrays
//!
//! The facade crate for the mosaic workspace: re-exports the user-facing
//! surface of [`mosaic_core`] (arrays, expressions, shapes, process maps)
//! and [`mosaic_runtime`] (worlds, futures, collectives).
//!
//! ```
//! use mosaic::{DistArray, TiledRange, World};
//!
//! let world = World::local();
//! let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
//! let a = DistArray::<f64>::new_dense(&world, tr.clone()).unwrap();
//! let b = DistArray::<f64>::new_dense(&world, tr).unwrap();
//! a.fill_local(1.0, false).unwrap();
//! b.fill_local(1.0, false).unwrap();
//!
//! let mut c = DistArray::<f64>::default();
//! c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap()).unwrap();
//! assert_eq!(c.tile(0).unwrap().data(), &[4.0; 4]);
//! ```

pub use mosaic_core::{
    array, error, eval, expr, permutation, pmap, proc_grid, range, reduce, shape, tensor,
    tiled_range,
};

pub use mosaic_core::{
    ArrayImpl, BlockedPmap, CyclicPmap, DistArray, Error, Expr, GemmHelper, Permutation, Pmap,
    PmapRef, ProcGrid, Range, ReplicatedPmap, Result, Scalar, Shape, SparseShape, Tensor,
    TileFuture, TileValue, TiledRange, TiledRange1, TransposeFlag, VariableList,
};

pub use mosaic_runtime::{Future, ObjectId, RuntimeError, TaskPool, World, WorldGroup};

pub use mosaic_tracing as tracing_setup;
