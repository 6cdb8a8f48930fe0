//! Distributed, asynchronous tile producers
//!
//! A [`DistEval`] is one node of an evaluated expression: a distributed
//! producer of result tiles. Every node exposes the same access surface:
//! metadata (`trange`, `shape`, `pmap`), `eval` to kick off production,
//! `fetch` to consume a produced tile, and `wait` to drain local
//! production. Consumers fetch a given ordinal at most once; tile futures
//! hand over [`TileValue`]s so zero tiles and consumable buffers flow
//! through without copies.

mod array_eval;
mod binary;
mod contraction;
mod unary;

pub use array_eval::{ArrayEval, TileOp};
pub use binary::{BinaryEval, BinaryKind};
pub use contraction::ContractionEval;
pub use unary::UnaryEval;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use mosaic_runtime::{Future, World};

use crate::error::Result;
use crate::pmap::{Pmap, PmapRef};
use crate::range::Range;
use crate::shape::Shape;
use crate::tensor::{Scalar, TileValue};
use crate::tiled_range::TiledRange;

/// Future of one produced tile.
pub type TileFuture<T> = Future<TileValue<T>>;

/// Shared handle to an evaluation node.
pub type DistEvalRef<T> = Arc<dyn DistEval<T>>;

/// A distributed, asynchronous producer of tiles.
pub trait DistEval<T: Scalar>: Send + Sync {
    /// The world production runs in.
    fn world(&self) -> &World;

    /// Tiled range of the produced array.
    fn trange(&self) -> &TiledRange;

    /// Structure of the produced array.
    fn shape(&self) -> &Shape;

    /// Distribution of the produced tiles; `fetch(ord)` may only be called
    /// for ordinals this map assigns to the calling rank.
    fn pmap(&self) -> &PmapRef;

    /// The tile range of the produced array.
    fn range(&self) -> &Range {
        self.trange().tiles_range()
    }

    /// Number of produced tiles.
    fn size(&self) -> usize {
        self.range().volume()
    }

    /// `true` when tile `ord` is structurally zero in the result.
    fn is_zero(&self, ord: usize) -> bool {
        self.shape().is_zero(ord)
    }

    /// `true` when this rank produces tile `ord`.
    fn is_local(&self, ord: usize) -> bool {
        self.pmap().is_local(ord)
    }

    /// Consume-read of tile `ord`: the future completes when the tile has
    /// been produced. Each ordinal may be fetched at most once per caller.
    fn fetch(&self, ord: usize) -> TileFuture<T>;

    /// Kick off production of this rank's tiles. Idempotent per node; must
    /// be invoked on every rank (collective).
    fn eval(self: Arc<Self>) -> Result<()>;

    /// Block until every locally produced tile has been set.
    fn wait(&self) -> Result<()>;
}

/// Ordinal-keyed tile futures, created unset on first access from either
/// the producing or the consuming side.
pub(crate) struct TileSlots<T: Scalar> {
    world: World,
    slots: Mutex<HashMap<usize, TileFuture<T>>>,
}

impl<T: Scalar> TileSlots<T> {
    pub fn new(world: World) -> Self {
        Self {
            world,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The future for `ord`, creating it unset when absent.
    pub fn slot(&self, ord: usize) -> TileFuture<T> {
        self.slots
            .lock()
            .entry(ord)
            .or_insert_with(|| Future::with_pool(self.world.taskq()))
            .clone()
    }

    /// Drop the stored future for `ord`, when any.
    pub fn retire(&self, ord: usize) {
        self.slots.lock().remove(&ord);
    }
}

/// Wait for every listed slot of `slots` to complete.
pub(crate) fn wait_local<T: Scalar>(slots: &TileSlots<T>, ords: impl IntoIterator<Item = usize>) -> Result<()> {
    for ord in ords {
        slots.slot(ord).wait()?;
    }
    Ok(())
}
