//! Structure metadata over tile grids
//!
//! A [`Shape`] is a predicate over the tile coordinates of a
//! [`TiledRange`](crate::tiled_range::TiledRange): which tiles are
//! structurally zero. The dense shape answers `false` everywhere; the sparse
//! shape stores a per-tile Frobenius-norm bound and a threshold `τ`.
//!
//! Shapes compose under the same operations as arrays (scaling, addition,
//! Hadamard product, contraction), producing the *result* shape without
//! touching tile data. Every composed bound is safe: a tile that could be
//! nonzero under exact arithmetic given the input norms is never declared
//! zero. The zero test is uniformly `norm < τ`; a tile whose bound equals
//! the threshold counts as nonzero.

use crate::permutation::Permutation;
use crate::range::Range;
use crate::tensor::{gemm, GemmHelper, Tensor};

/// Per-tile norm bounds plus a zero threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseShape {
    norms: Tensor<f32>,
    threshold: f32,
}

impl SparseShape {
    /// Build a sparse shape from per-tile norm bounds.
    ///
    /// `norms` ranges over the tile coordinates of the tiled range this
    /// shape will describe. Entries below the threshold (including negative
    /// ones) are clamped to exactly zero: a screened-out tile carries no
    /// data, so no later rescaling may resurrect it.
    pub fn new(mut norms: Tensor<f32>, threshold: f32) -> Self {
        for norm in norms.data_mut() {
            if *norm < threshold {
                *norm = 0.0;
            }
        }
        Self { norms, threshold }
    }

    /// The per-tile norm bounds.
    pub fn norms(&self) -> &Tensor<f32> {
        &self.norms
    }

    /// The zero threshold `τ`.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `true` when the bound for tile `ord` falls below the threshold.
    pub fn is_zero(&self, ord: usize) -> bool {
        self.norms[ord] < self.threshold
    }

    /// Fraction of tiles screened out as zero.
    pub fn sparsity(&self) -> f64 {
        if self.norms.volume() == 0 {
            return 0.0;
        }
        let zeros = (0..self.norms.volume()).filter(|&ord| self.is_zero(ord)).count();
        zeros as f64 / self.norms.volume() as f64
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self::new(crate::tensor::kernels::unary(&self.norms, f), self.threshold)
    }
}

/// Tile-level structure of a distributed array.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Every tile is present.
    Dense,
    /// Tiles are screened by per-tile norm bounds.
    Sparse(SparseShape),
}

impl Shape {
    /// Build the sparse variant from per-tile norms.
    pub fn sparse(norms: Tensor<f32>, threshold: f32) -> Self {
        Shape::Sparse(SparseShape::new(norms, threshold))
    }

    /// `true` for the dense shape.
    pub fn is_dense(&self) -> bool {
        matches!(self, Shape::Dense)
    }

    /// `true` when tile `ord` is structurally zero.
    pub fn is_zero(&self, ord: usize) -> bool {
        match self {
            Shape::Dense => false,
            Shape::Sparse(sparse) => sparse.is_zero(ord),
        }
    }

    /// The sparse payload, when any.
    pub fn as_sparse(&self) -> Option<&SparseShape> {
        match self {
            Shape::Dense => None,
            Shape::Sparse(sparse) => Some(sparse),
        }
    }

    /// Check that this shape describes the given tile range.
    pub fn validate(&self, tiles: &Range) -> bool {
        match self {
            Shape::Dense => true,
            Shape::Sparse(sparse) => sparse.norms.range() == tiles,
        }
    }

    /// Fraction of tiles screened out as zero.
    pub fn sparsity(&self) -> f64 {
        match self {
            Shape::Dense => 0.0,
            Shape::Sparse(sparse) => sparse.sparsity(),
        }
    }

    /// Reorder the tile modes.
    pub fn perm(&self, perm: &Permutation) -> Self {
        match self {
            Shape::Dense => Shape::Dense,
            Shape::Sparse(sparse) => Shape::Sparse(SparseShape {
                norms: sparse.norms.permute(perm),
                threshold: sparse.threshold,
            }),
        }
    }

    /// Shape of `factor · A`: bounds scale with `|factor|`.
    pub fn scale(&self, factor: f64) -> Self {
        match self {
            Shape::Dense => Shape::Dense,
            Shape::Sparse(sparse) => {
                let factor = factor.abs() as f32;
                Shape::Sparse(sparse.map(|norm| norm * factor))
            }
        }
    }

    /// Shape of `A + B` (also of `A - B`): bounds add by the triangle
    /// inequality. Mixing with a dense operand yields the dense shape.
    pub fn add(&self, other: &Self) -> Self {
        match (self, other) {
            (Shape::Sparse(left), Shape::Sparse(right)) => Shape::Sparse(SparseShape::new(
                crate::tensor::kernels::binary(&left.norms, &right.norms, |a, b| a + b),
                left.threshold.max(right.threshold),
            )),
            _ => Shape::Dense,
        }
    }

    /// Shape of `A - B`; the bound is the same as for the sum.
    pub fn subt(&self, other: &Self) -> Self {
        self.add(other)
    }

    /// Shape of the Hadamard product `A ∘ B`: bounds multiply
    /// (`‖A ∘ B‖_F ≤ ‖A‖_F · ‖B‖_F`). A dense operand keeps the other
    /// operand's screening.
    pub fn mult(&self, other: &Self) -> Self {
        match (self, other) {
            (Shape::Sparse(left), Shape::Sparse(right)) => Shape::Sparse(SparseShape::new(
                crate::tensor::kernels::binary(&left.norms, &right.norms, |a, b| a * b),
                left.threshold.max(right.threshold),
            )),
            (Shape::Sparse(sparse), Shape::Dense) | (Shape::Dense, Shape::Sparse(sparse)) => {
                // A zero tile stays zero under the product; the dense side
                // contributes no screening of its own.
                Shape::Sparse(sparse.clone())
            }
            (Shape::Dense, Shape::Dense) => Shape::Dense,
        }
    }

    /// Shape of the contraction `factor · A · B` described by `helper`.
    ///
    /// The bound for output tile `(i, j)` is
    /// `|factor| · Σ_k ‖A[i,k]‖_F · ‖B[k,j]‖_F`, which dominates the
    /// Frobenius norm of the accumulated output by submultiplicativity and
    /// the triangle inequality. The bound is safe but not tight: a
    /// predicted-nonzero tile may still evaluate to zero.
    pub fn gemm(&self, other: &Self, factor: f64, helper: &GemmHelper) -> Self {
        match (self, other) {
            (Shape::Sparse(left), Shape::Sparse(right)) => {
                let norms = gemm(&left.norms, &right.norms, factor.abs() as f32, helper);
                Shape::Sparse(SparseShape::new(
                    norms,
                    left.threshold.max(right.threshold),
                ))
            }
            _ => Shape::Dense,
        }
    }

    /// Zero out every tile that is zero in `other`.
    pub fn mask(&self, other: &Self) -> Self {
        match (self, other) {
            (_, Shape::Dense) => self.clone(),
            (Shape::Dense, Shape::Sparse(mask)) => Shape::Sparse(mask.clone()),
            (Shape::Sparse(sparse), Shape::Sparse(mask)) => {
                let norms = crate::tensor::kernels::binary(&sparse.norms, &mask.norms, |norm, m| {
                    if m < mask.threshold {
                        0.0
                    } else {
                        norm
                    }
                });
                Shape::Sparse(SparseShape::new(norms, sparse.threshold))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TransposeFlag;

    fn norms_2x2(values: [f32; 4]) -> Tensor<f32> {
        Tensor::from_vec(Range::from_extents(&[2, 2]), values.to_vec())
    }

    #[test]
    fn test_dense_shape_screens_nothing() {
        let shape = Shape::Dense;
        assert!(shape.is_dense());
        assert!(!shape.is_zero(17));
        assert_eq!(shape.sparsity(), 0.0);
    }

    #[test]
    fn test_threshold_tie_breaks_to_nonzero() {
        let shape = Shape::sparse(norms_2x2([0.5, 1.0, 1.5, 0.0]), 1.0);
        assert!(shape.is_zero(0));
        assert!(!shape.is_zero(1), "bound equal to τ is nonzero");
        assert!(!shape.is_zero(2));
        assert!(shape.is_zero(3));
        assert_eq!(shape.sparsity(), 0.5);
    }

    #[test]
    fn test_scale_uses_magnitude() {
        let shape = Shape::sparse(norms_2x2([2.0, 1.0, 0.0, 3.0]), 1.0);
        // Scaling down screens out tiles whose bound falls below τ; the
        // magnitude of the factor is what matters.
        let shrunk = shape.scale(-0.25);
        assert!(shrunk.is_zero(0), "2.0 · |-0.25| = 0.5 < τ");
        assert!(shrunk.is_zero(1));
        assert!(shrunk.is_zero(2));
        assert!(shrunk.is_zero(3), "3.0 · |-0.25| = 0.75 < τ");
        // A screened-out tile carries no data; scaling back up cannot
        // resurrect it.
        assert!(shrunk.scale(100.0).is_zero(0));
    }

    #[test]
    fn test_add_bounds_by_triangle_inequality() {
        let left = Shape::sparse(norms_2x2([1.0, 0.0, 0.0, 1.5]), 1.0);
        let right = Shape::sparse(norms_2x2([1.0, 0.0, 1.0, 0.0]), 1.0);
        let sum = left.add(&right);
        assert!(!sum.is_zero(0), "1.0 + 1.0 stays above τ");
        assert!(sum.is_zero(1));
        assert!(!sum.is_zero(2), "a tile present on either side survives");
        assert!(!sum.is_zero(3));
    }

    #[test]
    fn test_gemm_bound_sums_over_inner_modes() {
        let helper = GemmHelper::new(TransposeFlag::NoTrans, TransposeFlag::NoTrans, 2, 2, 2);
        // Row 0 of A is entirely zero, so row 0 of the product must be zero.
        let left = Shape::sparse(norms_2x2([0.0, 0.0, 2.0, 1.0]), 1.0);
        let right = Shape::sparse(norms_2x2([3.0, 0.0, 0.0, 0.0]), 1.0);
        let product = left.gemm(&right, 1.0, &helper);

        assert!(product.is_zero(0));
        assert!(product.is_zero(1));
        // (1,0): 2·3 + 1·0 = 6.
        assert!(!product.is_zero(2));
        assert!(product.is_zero(3));
    }

    #[test]
    fn test_gemm_with_dense_operand_is_dense() {
        let helper = GemmHelper::new(TransposeFlag::NoTrans, TransposeFlag::NoTrans, 2, 2, 2);
        let sparse = Shape::sparse(norms_2x2([1.0; 4]), 0.5);
        assert!(sparse.gemm(&Shape::Dense, 1.0, &helper).is_dense());
    }

    #[test]
    fn test_mask_drops_tiles_zero_in_other() {
        let shape = Shape::sparse(norms_2x2([2.0, 2.0, 2.0, 2.0]), 1.0);
        let mask = Shape::sparse(norms_2x2([2.0, 0.0, 2.0, 0.0]), 1.0);
        let masked = shape.mask(&mask);
        assert!(!masked.is_zero(0));
        assert!(masked.is_zero(1));
        assert!(!masked.is_zero(2));
        assert!(masked.is_zero(3));
    }

    #[test]
    fn test_permutation_moves_norms() {
        let shape = Shape::sparse(norms_2x2([1.5, 0.0, 0.0, 1.5]), 1.0);
        let permuted = shape.perm(&Permutation::new(vec![1, 0]).unwrap());
        // Diagonal stays diagonal under transposition.
        assert!(!permuted.is_zero(0));
        assert!(permuted.is_zero(1));
        assert!(permuted.is_zero(2));
        assert!(!permuted.is_zero(3));
    }

    #[test]
    fn test_validate_checks_tile_range() {
        let shape = Shape::sparse(norms_2x2([1.0; 4]), 0.5);
        assert!(shape.validate(&Range::from_extents(&[2, 2])));
        assert!(!shape.validate(&Range::from_extents(&[4, 1])));
    }
}
