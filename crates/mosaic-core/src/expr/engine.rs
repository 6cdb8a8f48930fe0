//! Expression engines
//!
//! Compiling an expression into distributed evaluators takes two passes:
//!
//! 1. **Variable-list propagation** (top-down): the parent proposes a
//!    target label order; each node decides the order it will produce and
//!    which permutations must be applied. Element-wise nodes forward the
//!    target unchanged, contractions fix canonical operand layouts
//!    (`[outer…, inner…]` on the left, `[inner…, outer…]` on the right) and
//!    record the result permutation; leaves absorb whatever permutation
//!    reaches them. The result is a [`Plan`].
//! 2. **Metadata realization** (bottom-up): each plan node computes its
//!    output tiled range, shape, and pmap from its children's realizations,
//!    then constructs its [`DistEval`], wiring the children as inputs.

use std::sync::Arc;

use mosaic_runtime::World;

use crate::array::DistArray;
use crate::error::{Error, Result};
use crate::eval::{
    ArrayEval, BinaryEval, BinaryKind, ContractionEval, DistEval, DistEvalRef, TileOp, UnaryEval,
};
use crate::permutation::Permutation;
use crate::pmap::{BlockedPmap, PmapRef};
use crate::proc_grid::ProcGrid;
use crate::tensor::{GemmHelper, Scalar, TransposeFlag};
use crate::tiled_range::TiledRange;

use super::{Expr, VariableList};

/// The outcome of variable-list propagation: every node knows the label
/// order it will produce and the permutations chosen along the way.
pub(crate) enum Plan<T: Scalar> {
    Leaf {
        array: DistArray<T>,
        op: TileOp<T>,
    },
    Unary {
        child: Box<Plan<T>>,
        factor: T,
    },
    Binary {
        kind: BinaryKind,
        left: Box<Plan<T>>,
        right: Box<Plan<T>>,
    },
    Cont {
        left: Box<Plan<T>>,
        right: Box<Plan<T>>,
        /// Natural result order → target order.
        perm: Option<Permutation>,
        /// Number of contracted modes.
        inner: usize,
    },
}

/// Top-down pass: fix each node's produced label order against `target`.
pub(crate) fn propagate_vars<T: Scalar>(expr: Expr<T>, target: &VariableList) -> Result<Plan<T>> {
    match expr {
        Expr::Tsr(leaf) => {
            let perm = leaf.vars.permutation_to(target)?;
            Ok(Plan::Leaf {
                array: leaf.array,
                op: TileOp::noop().with_perm(Some(perm)),
            })
        }
        Expr::Scale { arg, factor } => match propagate_vars(*arg, target)? {
            // Scaling a leaf folds into the leaf's deferred tile op.
            Plan::Leaf { array, op } => Ok(Plan::Leaf {
                array,
                op: op.scaled(factor),
            }),
            child => Ok(Plan::Unary {
                child: Box::new(child),
                factor,
            }),
        },
        Expr::Add { left, right } => Ok(Plan::Binary {
            kind: BinaryKind::Add,
            left: Box::new(propagate_vars(*left, target)?),
            right: Box::new(propagate_vars(*right, target)?),
        }),
        Expr::Subt { left, right } => Ok(Plan::Binary {
            kind: BinaryKind::Subt,
            left: Box::new(propagate_vars(*left, target)?),
            right: Box::new(propagate_vars(*right, target)?),
        }),
        Expr::Mult { left, right } => {
            let left_vars = left.vars()?;
            let right_vars = right.vars()?;
            if left_vars.same_set(&right_vars) {
                // Hadamard product: both operands in target order.
                return Ok(Plan::Binary {
                    kind: BinaryKind::Mult,
                    left: Box::new(propagate_vars(*left, target)?),
                    right: Box::new(propagate_vars(*right, target)?),
                });
            }

            // Contraction: inner labels are the intersection (ordered by
            // appearance on the left), outer labels the symmetric
            // difference.
            let inner = left_vars.common(&right_vars);
            let outer_left = left_vars.minus(&right_vars);
            let outer_right = right_vars.minus(&left_vars);

            let mut natural = outer_left.clone();
            natural.extend(outer_right.iter().cloned());
            let natural = VariableList::from_vec(natural);
            let perm = natural.permutation_to(target)?;

            let mut left_target = outer_left;
            left_target.extend(inner.iter().cloned());
            let mut right_target = inner.clone();
            right_target.extend(outer_right);

            Ok(Plan::Cont {
                left: Box::new(propagate_vars(*left, &VariableList::from_vec(left_target))?),
                right: Box::new(propagate_vars(
                    *right,
                    &VariableList::from_vec(right_target),
                )?),
                perm: Some(perm).filter(|perm| !perm.is_identity()),
                inner: inner.len(),
            })
        }
    }
}

/// The tiled range a plan node will produce, computed without constructing
/// evaluators. Contractions need their operands' tranges before the
/// operands are realized (the process grid shapes their pmaps).
fn plan_trange<T: Scalar>(plan: &Plan<T>) -> Result<TiledRange> {
    match plan {
        Plan::Leaf { array, op } => {
            let trange = array.pimpl()?.trange();
            Ok(match op.perm() {
                Some(perm) => perm * trange,
                None => trange.clone(),
            })
        }
        Plan::Unary { child, .. } => plan_trange(child),
        Plan::Binary { left, .. } => plan_trange(left),
        Plan::Cont {
            left,
            right,
            perm,
            inner,
        } => {
            let left_trange = plan_trange(left)?;
            let right_trange = plan_trange(right)?;
            let natural = cont_natural_trange(&left_trange, &right_trange, *inner)?;
            Ok(match perm {
                Some(perm) => perm * &natural,
                None => natural,
            })
        }
    }
}

/// Natural (unpermuted) result trange of a contraction: the left operand's
/// outer modes followed by the right operand's outer modes.
fn cont_natural_trange(
    left: &TiledRange,
    right: &TiledRange,
    inner: usize,
) -> Result<TiledRange> {
    let outer_left = left.rank() - inner;
    if left.modes()[outer_left..] != right.modes()[..inner] {
        return Err(Error::ExtentMismatch {
            left: left.elements_range().extent()[outer_left..].to_vec(),
            right: right.elements_range().extent()[..inner].to_vec(),
        });
    }
    let mut modes = left.modes()[..outer_left].to_vec();
    modes.extend_from_slice(&right.modes()[inner..]);
    Ok(TiledRange::new(modes))
}

/// Bottom-up pass: realize tranges, shapes, and pmaps, and construct the
/// evaluator graph. `pmap_request` is the distribution the parent will
/// consume under; `None` lets the node choose.
pub(crate) fn realize<T: Scalar>(
    plan: Plan<T>,
    world: &World,
    pmap_request: Option<PmapRef>,
) -> Result<DistEvalRef<T>> {
    match plan {
        Plan::Leaf { array, op } => {
            let pmap = match pmap_request {
                Some(pmap) => pmap,
                None => array.pimpl()?.pmap().clone(),
            };
            let eval: DistEvalRef<T> = ArrayEval::new(array, op, pmap)?;
            Ok(eval)
        }
        Plan::Unary { child, factor } => {
            let child = realize(*child, world, pmap_request)?;
            let eval: DistEvalRef<T> = UnaryEval::new(child, TileOp::scale(factor));
            Ok(eval)
        }
        Plan::Binary { kind, left, right } => {
            let left = realize(*left, world, pmap_request)?;
            let right = realize(*right, world, Some(left.pmap().clone()))?;
            let eval: DistEvalRef<T> = BinaryEval::new(left, right, kind);
            Ok(eval)
        }
        Plan::Cont {
            left,
            right,
            perm,
            inner,
        } => {
            let left_trange = plan_trange(&left)?;
            let right_trange = plan_trange(&right)?;
            let natural_trange = cont_natural_trange(&left_trange, &right_trange, inner)?;

            let left_rank = left_trange.rank();
            let right_rank = right_trange.rank();
            let outer_left = left_rank - inner;
            let result_rank = natural_trange.rank();

            // Flattened tile and element counts shaping the process grid.
            let m_tiles: usize = left_trange.tiles_range().extent()[..outer_left]
                .iter()
                .product();
            let k_tiles: usize = left_trange.tiles_range().extent()[outer_left..]
                .iter()
                .product();
            let n_tiles: usize = right_trange.tiles_range().extent()[inner..].iter().product();
            let m_elems: usize = left_trange.elements_range().extent()[..outer_left]
                .iter()
                .product();
            let n_elems: usize = right_trange.elements_range().extent()[inner..]
                .iter()
                .product();

            let grid = ProcGrid::new(world.clone(), m_tiles, n_tiles, m_elems, n_elems);
            let left = realize(*left, world, Some(grid.make_row_phase_pmap(k_tiles)))?;
            let right = realize(*right, world, Some(grid.make_col_phase_pmap(k_tiles)))?;

            let helper = GemmHelper::new(
                TransposeFlag::NoTrans,
                TransposeFlag::NoTrans,
                result_rank,
                left_rank,
                right_rank,
            );

            let natural_shape = left.shape().gemm(right.shape(), 1.0, &helper);
            let (trange, shape) = match &perm {
                Some(perm) => (perm * &natural_trange, natural_shape.perm(perm)),
                None => (natural_trange.clone(), natural_shape),
            };
            let pmap = match pmap_request {
                Some(pmap) => pmap,
                None => {
                    Arc::new(BlockedPmap::new(world, trange.tiles_range().volume())) as PmapRef
                }
            };

            let eval: DistEvalRef<T> = ContractionEval::new(
                left,
                right,
                T::one(),
                helper,
                grid,
                perm,
                natural_trange,
                trange,
                shape,
                pmap,
            );
            Ok(eval)
        }
    }
}
