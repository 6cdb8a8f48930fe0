//! SUMMA-style distributed contraction
//!
//! The contraction evaluator multiplies two produced operands over a 2-d
//! process grid. The left operand arrives row-phased (tile row `i` lives in
//! grid row `i mod rows`), the right operand column-phased. For each inner
//! stripe `k`:
//!
//! 1. the owner of each left tile `(i, k)` broadcasts it along its grid
//!    row, and the owner of each right tile `(k, j)` along its grid column;
//! 2. every process folds `factor · L[i,k] · R[k,j]` into its running
//!    output tile `(i, j)`, skipping pairs with a shape-zero operand;
//! 3. when the last stripe contributing to `(i, j)` retires, the finished
//!    tile (result-permuted if requested) is published to the owner of the
//!    corresponding output ordinal under the target pmap.
//!
//! Stripe broadcasts are pipelined ahead of the accumulation loop, bounded
//! by a fixed in-flight window so receive buffers cannot grow without
//! limit. Accumulation order over `k` is fixed per process but broadcast
//! arrival order is not, and no bit-exact cross-run ordering is guaranteed.
//!
//! Operands are consumed in canonical layout (left `[outer…, inner…]`,
//! right `[inner…, outer…]`), which the expression layer arranges by fusing
//! permutations into the leaves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use mosaic_runtime::{Future, ObjectId, ObjectLookup, World};

use crate::error::Result;
use crate::permutation::Permutation;
use crate::pmap::{Pmap, PmapRef};
use crate::proc_grid::ProcGrid;
use crate::shape::Shape;
use crate::tensor::{GemmHelper, Scalar, Tensor, TileValue};
use crate::tiled_range::TiledRange;

use super::{DistEval, DistEvalRef, TileFuture, TileSlots};

/// Maximum number of stripes whose broadcasts may be in flight beyond the
/// stripe currently being accumulated.
const STRIPE_WINDOW: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Side {
    Left,
    Right,
}

type StripeKey = (Side, usize, usize);

/// Distributed SUMMA contraction of two produced operands.
pub struct ContractionEval<T: Scalar> {
    world: World,
    id: ObjectId,
    left: DistEvalRef<T>,
    right: DistEvalRef<T>,
    factor: T,
    helper: GemmHelper,
    grid: ProcGrid,
    perm: Option<Permutation>,
    natural_trange: TiledRange,
    trange: TiledRange,
    shape: Shape,
    pmap: PmapRef,
    m_tiles: usize,
    n_tiles: usize,
    k_tiles: usize,
    slots: TileSlots<T>,
    stripes: Mutex<HashMap<StripeKey, TileFuture<T>>>,
    driver: Mutex<Option<Future<()>>>,
    started: AtomicBool,
}

impl<T: Scalar> ContractionEval<T> {
    /// Collective constructor; every rank must build the node with matching
    /// arguments.
    ///
    /// `left` must produce `[outer…, inner…]` tiles under a row-phase pmap
    /// of `grid`, `right` `[inner…, outer…]` tiles under a column-phase
    /// pmap. `shape`, `trange`, and `pmap` describe the (possibly
    /// permuted) target.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: DistEvalRef<T>,
        right: DistEvalRef<T>,
        factor: T,
        helper: GemmHelper,
        grid: ProcGrid,
        perm: Option<Permutation>,
        natural_trange: TiledRange,
        trange: TiledRange,
        shape: Shape,
        pmap: PmapRef,
    ) -> Arc<Self> {
        let world = left.world().clone();
        let left_ext = left.trange().tiles_range().extent().to_vec();
        let right_ext = right.trange().tiles_range().extent().to_vec();
        let outer = helper.left_outer_rank();
        let inner = helper.num_contract();
        assert_eq!(
            &left_ext[outer..],
            &right_ext[..inner],
            "contracted tile extents disagree between the operands"
        );

        let m_tiles: usize = left_ext[..outer].iter().product();
        let k_tiles: usize = left_ext[outer..].iter().product();
        let n_tiles: usize = right_ext[inner..].iter().product();

        let id = world.next_object_id();
        let eval = Arc::new(Self {
            world: world.clone(),
            id,
            left,
            right,
            factor,
            helper,
            grid,
            perm: perm.filter(|perm| !perm.is_identity()),
            natural_trange,
            trange,
            shape,
            pmap,
            m_tiles,
            n_tiles,
            k_tiles,
            slots: TileSlots::new(world.clone()),
            stripes: Mutex::new(HashMap::new()),
            driver: Mutex::new(None),
            started: AtomicBool::new(false),
        });
        let as_any: Arc<dyn std::any::Any + Send + Sync> = eval.clone();
        world.register_object(id, Arc::downgrade(&as_any));
        eval
    }

    fn left_ord(&self, i: usize, k: usize) -> usize {
        i * self.k_tiles + k
    }

    fn right_ord(&self, k: usize, j: usize) -> usize {
        k * self.n_tiles + j
    }

    fn natural_ord(&self, i: usize, j: usize) -> usize {
        i * self.n_tiles + j
    }

    /// Target ordinal of natural output tile `(i, j)`.
    fn target_ord(&self, i: usize, j: usize) -> usize {
        let natural = self.natural_ord(i, j);
        match &self.perm {
            None => natural,
            Some(perm) => {
                let coord = self
                    .natural_trange
                    .tiles_range()
                    .coord(natural)
                    .expect("natural ordinal in range");
                self.trange
                    .tiles_range()
                    .ord(&perm.apply(&coord))
                    .expect("permuted coordinate in range")
            }
        }
    }

    fn stripe_slot(&self, side: Side, k: usize, index: usize) -> TileFuture<T> {
        self.stripes
            .lock()
            .entry((side, k, index))
            .or_insert_with(|| Future::with_pool(self.world.taskq()))
            .clone()
    }

    /// Install a broadcast stripe tile (called locally or via delivery).
    fn provide_stripe(&self, side: Side, k: usize, index: usize, value: TileValue<T>) {
        let _ = self.stripe_slot(side, k, index).set(value);
    }

    /// Install a finished output tile on its target owner.
    fn provide_output(&self, target_ord: usize, value: TileValue<T>) {
        let _ = self.slots.slot(target_ord).set(value);
    }

    /// Broadcast this rank's share of stripe `k` along its grid row and
    /// column.
    fn start_stripe(self: &Arc<Self>, k: usize) {
        trace!(rank = self.world.rank(), stripe = k, "starting stripe broadcast");

        // Left tiles (i, k) this rank owns ship to every process in its
        // grid row.
        for i in 0..self.m_tiles {
            let ord = self.left_ord(i, k);
            if self.left.is_zero(ord) || !self.left.pmap().is_local(ord) {
                continue;
            }
            self.broadcast_tile(Side::Left, k, i, self.left.fetch(ord), self.grid.row_ranks());
        }

        // Right tiles (k, j) ship along the grid column.
        for j in 0..self.n_tiles {
            let ord = self.right_ord(k, j);
            if self.right.is_zero(ord) || !self.right.pmap().is_local(ord) {
                continue;
            }
            self.broadcast_tile(Side::Right, k, j, self.right.fetch(ord), self.grid.col_ranks());
        }
    }

    fn broadcast_tile(
        self: &Arc<Self>,
        side: Side,
        k: usize,
        index: usize,
        source: TileFuture<T>,
        peers: Vec<usize>,
    ) {
        let eval = Arc::clone(self);
        let reader = source.clone();
        source.register_callback(move || {
            let value = match reader.take() {
                Ok(value) => value.into_shared(),
                Err(failure) => {
                    panic!(
                        "rank {}: operand tile ({side:?}, stripe {k}, index {index}) never arrived: {failure}",
                        eval.world.rank()
                    );
                }
            };
            let rank = eval.world.rank();
            for peer in peers {
                if peer == rank {
                    eval.provide_stripe(side, k, index, value.clone());
                } else {
                    deliver(
                        eval.world.clone(),
                        peer,
                        eval.id,
                        Message::Stripe {
                            side,
                            k,
                            index,
                            value: value.clone(),
                        },
                    );
                }
            }
        });
    }

    /// Fold stripe `k` into the running accumulators for this rank's
    /// outputs, publishing every output whose last stripe retired.
    fn process_stripe(
        &self,
        k: usize,
        outputs: &[(usize, usize)],
        acc: &mut HashMap<(usize, usize), Tensor<T>>,
        remaining: &mut HashMap<(usize, usize), usize>,
    ) {
        for &(i, j) in outputs {
            if !remaining.contains_key(&(i, j)) {
                continue;
            }
            if self.left.is_zero(self.left_ord(i, k)) || self.right.is_zero(self.right_ord(k, j)) {
                continue;
            }

            let left_value = self
                .stripe_slot(Side::Left, k, i)
                .get()
                .unwrap_or_else(|failure| {
                    panic!(
                        "rank {}: left stripe tile ({i}, {k}) missing: {failure}",
                        self.world.rank()
                    )
                });
            let right_value = self
                .stripe_slot(Side::Right, k, j)
                .get()
                .unwrap_or_else(|failure| {
                    panic!(
                        "rank {}: right stripe tile ({k}, {j}) missing: {failure}",
                        self.world.rank()
                    )
                });
            let left_tile = left_value.tensor().expect("broadcast tiles are non-zero");
            let right_tile = right_value.tensor().expect("broadcast tiles are non-zero");

            let output = acc.entry((i, j)).or_insert_with(|| {
                Tensor::new(
                    self.natural_trange
                        .make_tile_range(self.natural_ord(i, j))
                        .expect("output ordinal in range"),
                )
            });
            output.gemm_into(left_tile, right_tile, self.factor, &self.helper);

            let count = remaining.get_mut(&(i, j)).expect("checked above");
            *count -= 1;
            if *count == 0 {
                remaining.remove(&(i, j));
                let tile = acc.remove(&(i, j)).expect("accumulator exists");
                self.publish(i, j, Some(tile));
            }
        }

        // Receive buffers for this stripe are dead now.
        self.stripes.lock().retain(|&(_, stripe, _), _| stripe != k);
    }

    /// Publish output tile `(i, j)`, permuted into target layout, to the
    /// owner of its target ordinal. `None` publishes a zero tile for
    /// predicted-nonzero outputs that accumulated nothing.
    fn publish(&self, i: usize, j: usize, tile: Option<Tensor<T>>) {
        let target_ord = self.target_ord(i, j);
        let value = match (tile, &self.perm) {
            (Some(tile), Some(perm)) => TileValue::Owned(tile.permute(perm)),
            (Some(tile), None) => TileValue::Owned(tile),
            (None, _) => TileValue::Zero,
        };
        let owner = self.pmap.owner(target_ord);
        if owner == self.world.rank() {
            self.provide_output(target_ord, value);
        } else {
            deliver(
                self.world.clone(),
                owner,
                self.id,
                Message::Output {
                    target_ord,
                    value,
                },
            );
        }
    }

    fn run_driver(self: &Arc<Self>) {
        let my_row = self.grid.rank_row();
        let my_col = self.grid.rank_col();

        // This rank's outputs under the cyclic grid distribution, with the
        // number of stripes contributing to each.
        let mut outputs = Vec::new();
        let mut remaining = HashMap::new();
        let mut i = my_row;
        while i < self.m_tiles {
            let mut j = my_col;
            while j < self.n_tiles {
                if !self.shape.is_zero(self.target_ord(i, j)) {
                    let count = (0..self.k_tiles)
                        .filter(|&k| {
                            !self.left.is_zero(self.left_ord(i, k))
                                && !self.right.is_zero(self.right_ord(k, j))
                        })
                        .count();
                    if count == 0 {
                        // Predicted nonzero, nothing to accumulate: the
                        // output degenerates to a zero tile.
                        self.publish(i, j, None);
                    } else {
                        remaining.insert((i, j), count);
                        outputs.push((i, j));
                    }
                }
                j += self.grid.cols();
            }
            i += self.grid.rows();
        }
        debug!(
            rank = self.world.rank(),
            outputs = outputs.len(),
            stripes = self.k_tiles,
            "contraction driver started"
        );

        let mut acc = HashMap::new();
        let mut send_k = 0;
        for k in 0..self.k_tiles {
            while send_k < self.k_tiles && send_k <= k + STRIPE_WINDOW {
                self.start_stripe(send_k);
                send_k += 1;
            }
            self.process_stripe(k, &outputs, &mut acc, &mut remaining);
        }
        debug_assert!(remaining.is_empty(), "all outputs retired with the last stripe");
        debug!(rank = self.world.rank(), "contraction driver finished");
    }

    fn local_nonzero(&self) -> Vec<usize> {
        self.pmap
            .local_indices()
            .into_iter()
            .filter(|&ord| !self.is_zero(ord))
            .collect()
    }
}

impl<T: Scalar> DistEval<T> for ContractionEval<T> {
    fn world(&self) -> &World {
        &self.world
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
        self.slots.slot(ord)
    }

    fn eval(self: Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.left.clone().eval()?;
        self.right.clone().eval()?;

        let eval = Arc::clone(&self);
        let driver = self.world.taskq().add(move || eval.run_driver());
        *self.driver.lock() = Some(driver);
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        self.left.wait()?;
        self.right.wait()?;
        let driver = self.driver.lock().clone();
        if let Some(driver) = driver {
            driver.wait().map_err(crate::error::Error::from)?;
        }
        for ord in self.local_nonzero() {
            self.slots.slot(ord).wait()?;
        }
        Ok(())
    }
}

impl<T: Scalar> Drop for ContractionEval<T> {
    fn drop(&mut self) {
        self.world.deregister_object(self.id);
    }
}

/// A cross-rank contraction message.
enum Message<T: Scalar> {
    Stripe {
        side: Side,
        k: usize,
        index: usize,
        value: TileValue<T>,
    },
    Output {
        target_ord: usize,
        value: TileValue<T>,
    },
}

/// Deliver a contraction message to the peer's evaluator instance.
///
/// Re-enqueues while the peer's collective construction is in flight; a
/// message reaching an already-retired evaluator is surplus broadcast (the
/// peer consumed everything it needed before dropping the node) and is
/// discarded.
fn deliver<T: Scalar>(world: World, peer: usize, id: ObjectId, message: Message<T>) {
    let task_world = world.clone();
    world.taskq_of(peer).submit(move || {
        match task_world.find_object(peer, id) {
            ObjectLookup::Found(object) => {
                let eval = object
                    .downcast::<ContractionEval<T>>()
                    .unwrap_or_else(|_| panic!("object {id} is not a contraction evaluator"));
                match message {
                    Message::Stripe {
                        side,
                        k,
                        index,
                        value,
                    } => eval.provide_stripe(side, k, index, value),
                    Message::Output { target_ord, value } => eval.provide_output(target_ord, value),
                }
            }
            ObjectLookup::Pending => {
                std::thread::sleep(std::time::Duration::from_millis(1));
                deliver::<T>(task_world, peer, id, message);
            }
            ObjectLookup::Retired => {
                trace!(peer, %id, "dropping message to a retired contraction evaluator");
            }
        }
    });
}
