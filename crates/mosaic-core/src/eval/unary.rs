//! Unary evaluation over a produced child
//!
//! A [`UnaryEval`] applies a [`TileOp`] to every tile of a child evaluator.
//! Leaves fold their unary ops into [`ArrayEval`](super::ArrayEval)
//! directly; this node exists for unary ops over computed children (a
//! scaled sum, a negated contraction). It produces under the child's
//! distribution: `eval` schedules one task per local non-zero tile, fired
//! when the child tile arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mosaic_runtime::World;

use crate::error::Result;
use crate::pmap::{Pmap, PmapRef};
use crate::shape::Shape;
use crate::tensor::{Scalar, TileValue};
use crate::tiled_range::TiledRange;

use super::{wait_local, DistEval, DistEvalRef, TileFuture, TileOp, TileSlots};

/// Element-wise unary transform of a child evaluator.
pub struct UnaryEval<T: Scalar> {
    child: DistEvalRef<T>,
    op: TileOp<T>,
    shape: Shape,
    slots: TileSlots<T>,
    started: AtomicBool,
}

impl<T: Scalar> UnaryEval<T> {
    /// Transform `child` by `op` (no permutation; layout changes are pushed
    /// to the leaves).
    pub fn new(child: DistEvalRef<T>, op: TileOp<T>) -> Arc<Self> {
        assert!(
            op.perm().is_none(),
            "unary nodes do not permute; permutations belong to the leaves"
        );
        let shape = op.apply_to_shape(child.shape());
        let slots = TileSlots::new(child.world().clone());
        Arc::new(Self {
            child,
            op,
            shape,
            slots,
            started: AtomicBool::new(false),
        })
    }

    fn local_nonzero(&self) -> Vec<usize> {
        self.pmap()
            .local_indices()
            .into_iter()
            .filter(|&ord| !self.is_zero(ord))
            .collect()
    }
}

impl<T: Scalar> DistEval<T> for UnaryEval<T> {
    fn world(&self) -> &World {
        self.child.world()
    }

    fn trange(&self) -> &TiledRange {
        self.child.trange()
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn pmap(&self) -> &PmapRef {
        self.child.pmap()
    }

    fn fetch(&self, ord: usize) -> TileFuture<T> {
        if self.is_zero(ord) {
            return TileFuture::ready(TileValue::Zero);
        }
        self.slots.slot(ord)
    }

    fn eval(self: Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.child.clone().eval()?;

        for ord in self.local_nonzero() {
            let source = self.child.fetch(ord);
            let slot = self.slots.slot(ord);
            let op = self.op.clone();
            let taskq = self.world().taskq().clone();
            let reader = source.clone();
            source.register_callback(move || {
                let reader = reader.clone();
                let slot = slot.clone();
                let op = op.clone();
                taskq.submit(move || match reader.take() {
                    Ok(value) => {
                        let _ = slot.set(op.apply(value));
                    }
                    Err(failure) => {
                        let _ = slot.fail(failure);
                    }
                });
            });
        }
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        self.child.wait()?;
        wait_local(&self.slots, self.local_nonzero())
    }
}
