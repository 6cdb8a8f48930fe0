//! Binary element-wise evaluation
//!
//! A [`BinaryEval`] combines two produced children tile-by-tile (addition,
//! subtraction, Hadamard product). `eval` schedules one task per local
//! non-zero output tile, fired once both input tiles have arrived. Zero
//! tiles follow the op's algebra without allocating: a sum with one zero
//! side passes the other side through, a product with any zero side is
//! zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mosaic_runtime::World;

use crate::error::Result;
use crate::pmap::{Pmap, PmapRef};
use crate::shape::Shape;
use crate::tensor::{Scalar, TileValue};
use crate::tiled_range::TiledRange;

use super::{wait_local, DistEval, DistEvalRef, TileFuture, TileSlots};

/// The element-wise combining operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryKind {
    /// `left + right`
    Add,
    /// `left - right`
    Subt,
    /// Hadamard product `left ∘ right`
    Mult,
}

impl BinaryKind {
    fn combine<T: Scalar>(self, left: TileValue<T>, right: TileValue<T>) -> TileValue<T> {
        match (self, left.is_zero(), right.is_zero()) {
            (_, true, true) => TileValue::Zero,
            (BinaryKind::Mult, _, _) if left.is_zero() || right.is_zero() => TileValue::Zero,
            (BinaryKind::Add, false, true) | (BinaryKind::Subt, false, true) => left,
            (BinaryKind::Add, true, false) => right,
            (BinaryKind::Subt, true, false) => match right {
                TileValue::Owned(mut tile) => {
                    tile.neg_to();
                    TileValue::Owned(tile)
                }
                TileValue::Shared(tile) => TileValue::Owned(tile.neg()),
                TileValue::Zero => TileValue::Zero,
            },
            (kind, false, false) => {
                let rhs = right;
                match left {
                    // A consumable left operand absorbs the operation.
                    TileValue::Owned(mut tile) => {
                        let other = rhs.tensor().expect("non-zero right operand");
                        match kind {
                            BinaryKind::Add => tile.add_to(other),
                            BinaryKind::Subt => tile.subt_to(other),
                            BinaryKind::Mult => tile.mult_to(other),
                        }
                        TileValue::Owned(tile)
                    }
                    TileValue::Shared(tile) => {
                        let other = rhs.tensor().expect("non-zero right operand");
                        TileValue::Owned(match kind {
                            BinaryKind::Add => tile.add(other),
                            BinaryKind::Subt => tile.subt(other),
                            BinaryKind::Mult => tile.mult(other),
                        })
                    }
                    TileValue::Zero => unreachable!("zero cases handled above"),
                }
            }
            _ => unreachable!("all zero-pattern cases covered"),
        }
    }

    /// Result shape of combining `left` and `right`.
    pub(crate) fn shape_of(self, left: &Shape, right: &Shape) -> Shape {
        match self {
            BinaryKind::Add | BinaryKind::Subt => left.add(right),
            BinaryKind::Mult => left.mult(right),
        }
    }
}

/// Element-wise combination of two child evaluators.
///
/// Both children produce under this node's pmap and in this node's label
/// order; layout differences were pushed to the leaves during variable
/// propagation.
pub struct BinaryEval<T: Scalar> {
    left: DistEvalRef<T>,
    right: DistEvalRef<T>,
    kind: BinaryKind,
    shape: Shape,
    slots: TileSlots<T>,
    started: AtomicBool,
}

impl<T: Scalar> BinaryEval<T> {
    /// Combine two conformant children.
    ///
    /// # Panics
    ///
    /// Panics when the children's tiled ranges disagree; the expression
    /// layer guarantees conformance before construction.
    pub fn new(left: DistEvalRef<T>, right: DistEvalRef<T>, kind: BinaryKind) -> Arc<Self> {
        assert_eq!(
            left.trange(),
            right.trange(),
            "binary operands must share one tiled range"
        );
        let shape = kind.shape_of(left.shape(), right.shape());
        let slots = TileSlots::new(left.world().clone());
        Arc::new(Self {
            left,
            right,
            kind,
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

impl<T: Scalar> DistEval<T> for BinaryEval<T> {
    fn world(&self) -> &World {
        self.left.world()
    }

    fn trange(&self) -> &TiledRange {
        self.left.trange()
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn pmap(&self) -> &PmapRef {
        self.left.pmap()
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
        self.left.clone().eval()?;
        self.right.clone().eval()?;

        for ord in self.local_nonzero() {
            let left = self.left.fetch(ord);
            let right = self.right.fetch(ord);
            let slot = self.slots.slot(ord);
            let kind = self.kind;
            let taskq = self.world().taskq().clone();

            // Fire the combining task once both inputs are set; the second
            // callback to run submits it.
            let left_reader = left.clone();
            let right_reader = right.clone();
            let task = move || match (left_reader.take(), right_reader.take()) {
                (Ok(l), Ok(r)) => {
                    let _ = slot.set(kind.combine(l, r));
                }
                (Err(failure), _) | (_, Err(failure)) => {
                    let _ = slot.fail(failure);
                }
            };

            let pending = Arc::new(AtomicBool::new(false));
            let task = Arc::new(parking_lot::Mutex::new(Some(task)));
            for input in [left, right] {
                let pending = Arc::clone(&pending);
                let task = Arc::clone(&task);
                let taskq = taskq.clone();
                input.register_callback(move || {
                    // Only the second arrival schedules the task.
                    if pending.swap(true, Ordering::AcqRel) {
                        if let Some(task) = task.lock().take() {
                            taskq.submit(task);
                        }
                    }
                });
            }
        }
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        self.left.wait()?;
        self.right.wait()?;
        wait_local(&self.slots, self.local_nonzero())
    }
}
