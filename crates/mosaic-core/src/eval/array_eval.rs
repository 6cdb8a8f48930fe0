//! Leaf evaluation over a distributed array
//!
//! An [`ArrayEval`] wraps a [`DistArray`] as an expression source,
//! optionally applying a unary [`TileOp`] (scale, negate, permute) lazily
//! per tile: fetching a tile binds the source future to the op and the
//! result materializes only when the source tile arrives. The eval's pmap
//! may differ from the array's; consumers that are not the storage owner
//! pull tiles through the array's remote-get path, which is how SUMMA
//! operands arrive row- and column-phased.

use std::sync::Arc;

use mosaic_runtime::{Future, World};

use crate::array::DistArray;
use crate::error::Result;
use crate::permutation::Permutation;
use crate::pmap::PmapRef;
use crate::shape::Shape;
use crate::tensor::{Scalar, TileValue};
use crate::tiled_range::TiledRange;

use super::{DistEval, TileFuture};

/// A deferred unary tile transform: an element-wise op fused with an
/// optional permutation.
#[derive(Clone, Debug)]
pub struct TileOp<T: Scalar> {
    factor: T,
    perm: Option<Permutation>,
}

impl<T: Scalar> TileOp<T> {
    /// The identity transform.
    pub fn noop() -> Self {
        Self {
            factor: T::one(),
            perm: None,
        }
    }

    /// Multiply every element by `factor`.
    pub fn scale(factor: T) -> Self {
        Self {
            factor,
            perm: None,
        }
    }

    /// Negate every element.
    pub fn neg() -> Self {
        Self::scale(T::zero() - T::one())
    }

    /// Fuse a permutation into the transform.
    pub fn with_perm(mut self, perm: Option<Permutation>) -> Self {
        self.perm = perm.filter(|perm| !perm.is_identity());
        self
    }

    /// Fold another scaling into this transform.
    pub fn scaled(mut self, factor: T) -> Self {
        self.factor *= factor;
        self
    }

    /// `true` when the transform changes neither values nor layout.
    pub fn is_noop(&self) -> bool {
        self.factor == T::one() && self.perm.is_none()
    }

    /// The fused permutation, when any.
    pub fn perm(&self) -> Option<&Permutation> {
        self.perm.as_ref()
    }

    /// Apply to a tile value. Zero stays zero without allocating; owned
    /// tiles are transformed in place when no permutation is fused.
    pub fn apply(&self, value: TileValue<T>) -> TileValue<T> {
        if value.is_zero() {
            return TileValue::Zero;
        }
        let factor = self.factor;
        match (&self.perm, value) {
            (None, value) if factor == T::one() => value,
            (None, TileValue::Owned(mut tile)) => {
                tile.scale_to(factor);
                TileValue::Owned(tile)
            }
            (None, TileValue::Shared(tile)) => TileValue::Owned(tile.scale(factor)),
            (Some(perm), TileValue::Owned(tile)) => {
                TileValue::Owned(tile.scale_permuted(factor, perm))
            }
            (Some(perm), TileValue::Shared(tile)) => {
                TileValue::Owned(tile.scale_permuted(factor, perm))
            }
            (_, TileValue::Zero) => TileValue::Zero,
        }
    }

    /// The shape of the transformed array.
    pub fn apply_to_shape(&self, shape: &Shape) -> Shape {
        let scaled = shape.scale(self.factor.magnitude());
        match &self.perm {
            Some(perm) => scaled.perm(perm),
            None => scaled,
        }
    }
}

/// Bind `source` to `op`: the returned future completes with the
/// transformed tile once the source tile arrives.
///
/// The result is always a detached future, even for the identity op: the
/// source may be an array's stored tile with other readers, while the
/// caller receives a consume-read it may `take` from.
pub(crate) fn lazy_apply<T: Scalar>(world: &World, source: TileFuture<T>, op: TileOp<T>) -> TileFuture<T> {
    let result: TileFuture<T> = Future::with_pool(world.taskq());
    let reader = source.clone();
    let out = result.clone();
    source.register_callback(move || match reader.get() {
        Ok(value) => {
            let _ = out.set(op.apply(value));
        }
        Err(failure) => {
            let _ = out.fail(failure);
        }
    });
    result
}

/// Expression leaf: a distributed array viewed through a [`TileOp`] under a
/// consumer-chosen distribution.
pub struct ArrayEval<T: Scalar> {
    array: DistArray<T>,
    op: TileOp<T>,
    trange: TiledRange,
    shape: Shape,
    pmap: PmapRef,
}

impl<T: Scalar> ArrayEval<T> {
    /// View `array` through `op`, producing tiles under `pmap`.
    ///
    /// The eval's tiled range and shape are the array's with the op's
    /// permutation and scaling applied.
    pub fn new(array: DistArray<T>, op: TileOp<T>, pmap: PmapRef) -> Result<Arc<Self>> {
        let source = array.pimpl()?;
        let trange = match op.perm() {
            Some(perm) => perm * source.trange(),
            None => source.trange().clone(),
        };
        let shape = op.apply_to_shape(source.shape());
        Ok(Arc::new(Self {
            array: array.clone(),
            op,
            trange,
            shape,
            pmap,
        }))
    }

    /// Map a produced (permuted) ordinal back to the source array ordinal.
    fn source_ord(&self, ord: usize) -> Result<usize> {
        match self.op.perm() {
            None => Ok(ord),
            Some(perm) => {
                let coord = self.trange.tiles_range().coord(ord)?;
                let source_coord = perm.apply_inverse(&coord);
                self.array.pimpl()?.range().ord(&source_coord)
            }
        }
    }
}

impl<T: Scalar> DistEval<T> for ArrayEval<T> {
    fn world(&self) -> &World {
        self.array.world()
    }

    fn trange(&self) -> &TiledRange {
        &self.trange
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn pmap(&self) -> &PmapRef {
        &self.pmap
    }

    fn fetch(&self, ord: usize) -> TileFuture<T> {
        if self.is_zero(ord) {
            return Future::ready(TileValue::Zero);
        }
        let source_ord = match self.source_ord(ord) {
            Ok(source_ord) => source_ord,
            Err(_) => panic!("tile ordinal {ord} outside the evaluated range"),
        };
        let source = self
            .array
            .find(source_ord)
            .expect("source tile exists for non-zero evaluated tile");
        lazy_apply(self.world(), source, self.op.clone())
    }

    fn eval(self: Arc<Self>) -> Result<()> {
        // Source tiles are produced by whoever assigns the array; nothing to
        // schedule here.
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        Ok(())
    }
}
