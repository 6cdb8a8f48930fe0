//! Tile-level contraction
//!
//! A [`GemmHelper`] describes how two tiles contract: how many modes each
//! operand contributes to the result, how many are summed over, and whether
//! an operand stores its contracted modes first (`Trans`) or last
//! (`NoTrans`). With that description both operands fuse into matrices and
//! the contraction becomes a single `C += factor · A · B` accumulation; no
//! reshaped intermediates are materialized.

use crate::range::Range;
use crate::tensor::{Scalar, Tensor};

/// Layout of an operand's contracted modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransposeFlag {
    /// Contracted modes are the trailing modes (left operand) or leading
    /// modes (right operand); the natural SUMMA layout.
    NoTrans,
    /// The operand stores its modes in the opposite order.
    Trans,
}

/// Mode bookkeeping for a pairwise tile contraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GemmHelper {
    left_op: TransposeFlag,
    right_op: TransposeFlag,
    result_rank: usize,
    left_rank: usize,
    right_rank: usize,
    num_contract: usize,
}

impl GemmHelper {
    /// Describe a contraction of a `left_rank`-mode tile with a
    /// `right_rank`-mode tile into a `result_rank`-mode tile.
    ///
    /// The number of contracted modes is implied:
    /// `(left_rank + right_rank - result_rank) / 2`.
    ///
    /// # Panics
    ///
    /// Panics when the ranks cannot describe a contraction (parity mismatch
    /// or no modes left on either side).
    pub fn new(
        left_op: TransposeFlag,
        right_op: TransposeFlag,
        result_rank: usize,
        left_rank: usize,
        right_rank: usize,
    ) -> Self {
        let total = left_rank + right_rank;
        assert!(
            total >= result_rank && (total - result_rank) % 2 == 0,
            "ranks {left_rank} + {right_rank} -> {result_rank} do not describe a contraction"
        );
        let num_contract = (total - result_rank) / 2;
        assert!(
            num_contract <= left_rank && num_contract <= right_rank,
            "contracted mode count {num_contract} exceeds an operand rank"
        );
        Self {
            left_op,
            right_op,
            result_rank,
            left_rank,
            right_rank,
            num_contract,
        }
    }

    /// Number of contracted (inner) modes.
    pub fn num_contract(&self) -> usize {
        self.num_contract
    }

    /// Result tile rank.
    pub fn result_rank(&self) -> usize {
        self.result_rank
    }

    /// Outer mode count contributed by the left operand.
    pub fn left_outer_rank(&self) -> usize {
        self.left_rank - self.num_contract
    }

    /// Outer mode count contributed by the right operand.
    pub fn right_outer_rank(&self) -> usize {
        self.right_rank - self.num_contract
    }

    /// Left operand layout.
    pub fn left_op(&self) -> TransposeFlag {
        self.left_op
    }

    /// Right operand layout.
    pub fn right_op(&self) -> TransposeFlag {
        self.right_op
    }

    /// Fused `(m, k)` dimensions of the left operand.
    pub fn left_dims(&self, left: &Range) -> (usize, usize) {
        assert_eq!(left.rank(), self.left_rank, "left tile rank mismatch");
        let split = match self.left_op {
            TransposeFlag::NoTrans => self.left_outer_rank(),
            TransposeFlag::Trans => self.num_contract,
        };
        let head: usize = left.extent()[..split].iter().product();
        let tail: usize = left.extent()[split..].iter().product();
        match self.left_op {
            TransposeFlag::NoTrans => (head, tail),
            TransposeFlag::Trans => (tail, head),
        }
    }

    /// Fused `(k, n)` dimensions of the right operand.
    pub fn right_dims(&self, right: &Range) -> (usize, usize) {
        assert_eq!(right.rank(), self.right_rank, "right tile rank mismatch");
        let split = match self.right_op {
            TransposeFlag::NoTrans => self.num_contract,
            TransposeFlag::Trans => self.right_outer_rank(),
        };
        let head: usize = right.extent()[..split].iter().product();
        let tail: usize = right.extent()[split..].iter().product();
        match self.right_op {
            TransposeFlag::NoTrans => (head, tail),
            TransposeFlag::Trans => (tail, head),
        }
    }

    /// The outer (result) mode bounds contributed by the left operand, in
    /// result order.
    fn left_outer_bounds(&self, left: &Range) -> (Vec<usize>, Vec<usize>) {
        let outer = self.left_outer_rank();
        let modes: Vec<usize> = match self.left_op {
            TransposeFlag::NoTrans => (0..outer).collect(),
            TransposeFlag::Trans => (self.num_contract..self.left_rank).collect(),
        };
        (
            modes.iter().map(|&m| left.lower()[m]).collect(),
            modes.iter().map(|&m| left.upper()[m]).collect(),
        )
    }

    /// The outer (result) mode bounds contributed by the right operand.
    fn right_outer_bounds(&self, right: &Range) -> (Vec<usize>, Vec<usize>) {
        let outer = self.right_outer_rank();
        let modes: Vec<usize> = match self.right_op {
            TransposeFlag::NoTrans => (self.num_contract..self.right_rank).collect(),
            TransposeFlag::Trans => (0..outer).collect(),
        };
        (
            modes.iter().map(|&m| right.lower()[m]).collect(),
            modes.iter().map(|&m| right.upper()[m]).collect(),
        )
    }

    /// Result tile range: left outer modes followed by right outer modes.
    pub fn make_result_range(&self, left: &Range, right: &Range) -> Range {
        let (mut lower, mut upper) = self.left_outer_bounds(left);
        let (right_lower, right_upper) = self.right_outer_bounds(right);
        lower.extend(right_lower);
        upper.extend(right_upper);
        Range::new(lower, upper).expect("operand bounds are valid")
    }
}

/// `factor · A · B` into a fresh result tile.
pub fn gemm<T: Scalar>(
    left: &Tensor<T>,
    right: &Tensor<T>,
    factor: T,
    helper: &GemmHelper,
) -> Tensor<T> {
    let mut result = Tensor::new(helper.make_result_range(left.range(), right.range()));
    gemm_into(&mut result, left, right, factor, helper);
    result
}

/// `C += factor · A · B`, accumulating into an existing result tile.
///
/// # Panics
///
/// Panics when the contracted extents of the operands disagree or the result
/// tile does not conform to the operands' outer modes.
pub fn gemm_into<T: Scalar>(
    result: &mut Tensor<T>,
    left: &Tensor<T>,
    right: &Tensor<T>,
    factor: T,
    helper: &GemmHelper,
) {
    let (m, k) = helper.left_dims(left.range());
    let (k_right, n) = helper.right_dims(right.range());
    assert_eq!(k, k_right, "contracted extents do not match: {k} vs {k_right}");
    assert_eq!(
        result.volume(),
        m * n,
        "result tile volume {} does not match {m}×{n}",
        result.volume()
    );

    let a = left.data();
    let b = right.data();
    let c = result.data_mut();
    let a_index = |i: usize, l: usize| match helper.left_op {
        TransposeFlag::NoTrans => i * k + l,
        TransposeFlag::Trans => l * m + i,
    };
    let b_index = |l: usize, j: usize| match helper.right_op {
        TransposeFlag::NoTrans => l * n + j,
        TransposeFlag::Trans => j * k + l,
    };

    for i in 0..m {
        for l in 0..k {
            let scaled = factor * a[a_index(i, l)];
            if scaled == T::zero() {
                continue;
            }
            let row = &mut c[i * n..(i + 1) * n];
            for (j, out) in row.iter_mut().enumerate() {
                *out += scaled * b[b_index(l, j)];
            }
        }
    }
}
