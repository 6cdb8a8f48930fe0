//! Contiguous n-dimensional tiles
//!
//! A [`Tensor`] is one tile of a distributed array: a [`Range`] plus a
//! row-major buffer of `volume` elements. Tiles support element-wise
//! arithmetic (out-of-place and `_to` in-place variants), permutation-fused
//! kernels, and pairwise contraction through [`GemmHelper`].
//!
//! The evaluation pipeline exchanges [`TileValue`]s rather than bare
//! tensors: a tagged state distinguishing the structural zero (no storage),
//! immutable shared tiles, and uniquely-owned *consumable* tiles whose
//! buffers in-place operations may reuse.

pub mod kernels;

mod gemm;

pub use gemm::{gemm, gemm_into, GemmHelper, TransposeFlag};

use std::sync::Arc;

use num_traits::{NumAssign, NumCast};

use crate::permutation::Permutation;
use crate::range::Range;

/// Element types storable in tiles.
///
/// The `Pod` bound gives tiles a byte-level wire form for the runtime's
/// message marshalling; `NumCast` lets norms accumulate in `f64` regardless
/// of the element type.
pub trait Scalar:
    Copy
    + Send
    + Sync
    + 'static
    + bytemuck::Pod
    + NumAssign
    + NumCast
    + PartialOrd
    + std::fmt::Debug
    + std::fmt::Display
{
    /// Magnitude of the element, used for norms and sparsity screening.
    fn magnitude(self) -> f64;
}

macro_rules! impl_scalar_signed {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            fn magnitude(self) -> f64 {
                self.abs() as f64
            }
        }
    )*};
}

macro_rules! impl_scalar_unsigned {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            fn magnitude(self) -> f64 {
                self as f64
            }
        }
    )*};
}

impl_scalar_signed!(f32, f64, i32, i64);
impl_scalar_unsigned!(u32, u64);

/// A contiguous n-dimensional block of scalars over a [`Range`].
#[derive(Clone, PartialEq)]
pub struct Tensor<T> {
    range: Range,
    data: Box<[T]>,
}

impl<T: Scalar> Tensor<T> {
    /// Zero-filled tile over `range`.
    pub fn new(range: Range) -> Self {
        let volume = range.volume();
        Self {
            range,
            data: vec![T::zero(); volume].into_boxed_slice(),
        }
    }

    /// Constant-filled tile over `range`.
    pub fn from_elem(range: Range, value: T) -> Self {
        let volume = range.volume();
        Self {
            range,
            data: vec![value; volume].into_boxed_slice(),
        }
    }

    /// Tile whose element at `coord` is `f(coord)`.
    pub fn from_fn(range: Range, mut f: impl FnMut(&[usize]) -> T) -> Self {
        let data: Vec<T> = range.iter().map(|coord| f(&coord)).collect();
        Self {
            range,
            data: data.into_boxed_slice(),
        }
    }

    /// Tile adopting a row-major buffer.
    ///
    /// # Panics
    ///
    /// Panics when `data.len() != range.volume()`.
    pub fn from_vec(range: Range, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            range.volume(),
            "buffer of {} elements does not fill a tile of volume {}",
            data.len(),
            range.volume()
        );
        Self {
            range,
            data: data.into_boxed_slice(),
        }
    }

    /// Tile filled from an iterator in row-major order.
    pub fn from_iter_over(range: Range, values: impl IntoIterator<Item = T>) -> Self {
        let data: Vec<T> = values.into_iter().take(range.volume()).collect();
        Self::from_vec(range, data)
    }

    /// The tile's element box.
    pub fn range(&self) -> &Range {
        &self.range
    }

    /// Number of elements.
    pub fn volume(&self) -> usize {
        self.data.len()
    }

    /// Row-major element buffer.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable row-major element buffer.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Element at coordinate `coord`.
    ///
    /// # Panics
    ///
    /// Panics when `coord` is outside the tile's range.
    pub fn at(&self, coord: &[usize]) -> T {
        let ord = self
            .range
            .ord(coord)
            .unwrap_or_else(|_| panic!("coordinate {coord:?} outside tile {:?}", self.range));
        self.data[ord]
    }

    /// Iterate elements in row-major order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    // ------------------------------------------------------------------
    // Unary operations
    // ------------------------------------------------------------------

    /// Reordered copy: element at `c` moves to `perm(c)`.
    pub fn permute(&self, perm: &Permutation) -> Self {
        kernels::unary_permuted(self, perm, |x| x)
    }

    /// `factor · self` into a new tile.
    pub fn scale(&self, factor: T) -> Self {
        kernels::unary(self, |x| x * factor)
    }

    /// `self *= factor` in place.
    pub fn scale_to(&mut self, factor: T) {
        kernels::unary_inplace(self, |x| x * factor);
    }

    /// Scaled and reordered copy.
    pub fn scale_permuted(&self, factor: T, perm: &Permutation) -> Self {
        kernels::unary_permuted(self, perm, |x| x * factor)
    }

    /// `-self` into a new tile.
    pub fn neg(&self) -> Self {
        kernels::unary(self, |x| T::zero() - x)
    }

    /// `self = -self` in place.
    pub fn neg_to(&mut self) {
        kernels::unary_inplace(self, |x| T::zero() - x);
    }

    /// Negated and reordered copy.
    pub fn neg_permuted(&self, perm: &Permutation) -> Self {
        kernels::unary_permuted(self, perm, |x| T::zero() - x)
    }

    // ------------------------------------------------------------------
    // Binary operations
    // ------------------------------------------------------------------

    /// `self + other` into a new tile.
    pub fn add(&self, other: &Self) -> Self {
        kernels::binary(self, other, |x, y| x + y)
    }

    /// `self += other` in place.
    pub fn add_to(&mut self, other: &Self) {
        kernels::binary_inplace(self, other, |x, y| x + y);
    }

    /// `perm(self + other)` without an intermediate tile.
    pub fn add_permuted(&self, other: &Self, perm: &Permutation) -> Self {
        kernels::binary_permuted(self, other, perm, |x, y| x + y)
    }

    /// `self - other` into a new tile.
    pub fn subt(&self, other: &Self) -> Self {
        kernels::binary(self, other, |x, y| x - y)
    }

    /// `self -= other` in place.
    pub fn subt_to(&mut self, other: &Self) {
        kernels::binary_inplace(self, other, |x, y| x - y);
    }

    /// `perm(self - other)` without an intermediate tile.
    pub fn subt_permuted(&self, other: &Self, perm: &Permutation) -> Self {
        kernels::binary_permuted(self, other, perm, |x, y| x - y)
    }

    /// Hadamard product `self ∘ other` into a new tile.
    pub fn mult(&self, other: &Self) -> Self {
        kernels::binary(self, other, |x, y| x * y)
    }

    /// `self ∘= other` in place.
    pub fn mult_to(&mut self, other: &Self) {
        kernels::binary_inplace(self, other, |x, y| x * y);
    }

    /// `perm(self ∘ other)` without an intermediate tile.
    pub fn mult_permuted(&self, other: &Self, perm: &Permutation) -> Self {
        kernels::binary_permuted(self, other, perm, |x, y| x * y)
    }

    /// Contract with `other` as described by `helper`, scaled by `factor`.
    pub fn gemm(&self, other: &Self, factor: T, helper: &GemmHelper) -> Self {
        gemm(self, other, factor, helper)
    }

    /// Accumulate `factor · left · right` into this tile.
    pub fn gemm_into(&mut self, left: &Self, right: &Self, factor: T, helper: &GemmHelper) {
        gemm_into(self, left, right, factor, helper);
    }

    // ------------------------------------------------------------------
    // Reductions
    // ------------------------------------------------------------------

    /// Sum of the main diagonal of a square rank-2 tile.
    ///
    /// # Panics
    ///
    /// Panics on tiles that are not square matrices.
    pub fn trace(&self) -> T {
        assert_eq!(self.range.rank(), 2, "trace requires a rank-2 tile");
        let extent = self.range.extent();
        assert_eq!(extent[0], extent[1], "trace requires a square tile");
        let mut total = T::zero();
        for i in 0..extent[0] {
            total += self.data[i * extent[1] + i];
        }
        total
    }

    /// Element-wise inner product with a conformant tile.
    pub fn dot(&self, other: &Self) -> T {
        assert_eq!(
            self.range.extent(),
            other.range.extent(),
            "dot requires conformant tiles"
        );
        let mut total = T::zero();
        for (&x, &y) in self.data.iter().zip(other.data.iter()) {
            total += x * y;
        }
        total
    }

    /// Sum of squared magnitudes.
    pub fn squared_norm(&self) -> f64 {
        self.data.iter().map(|x| x.magnitude() * x.magnitude()).sum()
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.squared_norm().sqrt()
    }

    /// Largest element magnitude.
    pub fn abs_max(&self) -> f64 {
        self.data.iter().map(|x| x.magnitude()).fold(0.0, f64::max)
    }

    // ------------------------------------------------------------------
    // Wire form
    // ------------------------------------------------------------------

    /// Byte-level wire form: the range descriptor followed by the raw
    /// element buffer. This is the marshalling boundary handed to the
    /// runtime when a tile crosses ranks.
    pub fn to_wire(&self) -> Vec<u8> {
        let rank = self.range.rank() as u64;
        let mut bytes = Vec::with_capacity(8 * (1 + 2 * self.range.rank()) + std::mem::size_of_val(self.data.as_ref()));
        bytes.extend_from_slice(&rank.to_le_bytes());
        for &bound in self.range.lower().iter().chain(self.range.upper()) {
            bytes.extend_from_slice(&(bound as u64).to_le_bytes());
        }
        bytes.extend_from_slice(bytemuck::cast_slice(&self.data));
        bytes
    }

    /// Decode a tile from its wire form.
    ///
    /// # Panics
    ///
    /// Panics on a malformed buffer; wire corruption is a runtime invariant
    /// violation, not a user error.
    pub fn from_wire(bytes: &[u8]) -> Self {
        let read_u64 = |offset: usize| {
            u64::from_le_bytes(bytes[offset..offset + 8].try_into().expect("8 bytes"))
        };
        let rank = read_u64(0) as usize;
        let mut offset = 8;
        let mut lower = Vec::with_capacity(rank);
        let mut upper = Vec::with_capacity(rank);
        for _ in 0..rank {
            lower.push(read_u64(offset) as usize);
            offset += 8;
        }
        for _ in 0..rank {
            upper.push(read_u64(offset) as usize);
            offset += 8;
        }
        let range = Range::new(lower, upper).expect("wire range is valid");
        // Element-wise unaligned reads: the byte buffer carries no
        // alignment guarantee for T.
        let data: Vec<T> = bytes[offset..]
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        Self::from_vec(range, data)
    }
}

impl<T: Scalar> std::ops::Index<usize> for Tensor<T> {
    type Output = T;

    fn index(&self, ord: usize) -> &T {
        &self.data[ord]
    }
}

impl<T: Scalar> std::ops::IndexMut<usize> for Tensor<T> {
    fn index_mut(&mut self, ord: usize) -> &mut T {
        &mut self.data[ord]
    }
}

impl<T: Scalar> std::fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor{:?} {:?}", self.range, &self.data[..self.data.len().min(8)])
    }
}

impl<T: Scalar> std::fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}:", self.range)?;
        for (ord, value) in self.data.iter().enumerate() {
            if ord > 0 && ord % self.range.stride().first().copied().unwrap_or(1) == 0 {
                writeln!(f)?;
            }
            write!(f, " {value}")?;
        }
        Ok(())
    }
}

/// A tile as exchanged by distributed evaluators.
///
/// The three states encode storage and consumability:
///
/// - [`TileValue::Zero`]: structural zero; participates in binary
///   operations without allocating.
/// - [`TileValue::Shared`]: immutable tile with shared ownership;
///   operations must allocate their result.
/// - [`TileValue::Owned`]: uniquely-owned *consumable* tile; in-place
///   operations may reuse its buffer.
#[derive(Clone, Debug)]
pub enum TileValue<T: Scalar> {
    Zero,
    Shared(Arc<Tensor<T>>),
    Owned(Tensor<T>),
}

impl<T: Scalar> TileValue<T> {
    /// `true` for the structural zero.
    pub fn is_zero(&self) -> bool {
        matches!(self, TileValue::Zero)
    }

    /// Borrow the stored tensor, when any.
    pub fn tensor(&self) -> Option<&Tensor<T>> {
        match self {
            TileValue::Zero => None,
            TileValue::Shared(tile) => Some(tile),
            TileValue::Owned(tile) => Some(tile),
        }
    }

    /// Convert into an owned tensor, materializing zeros over `zero_range`
    /// and copying shared tiles.
    pub fn into_tensor(self, zero_range: &Range) -> Tensor<T> {
        match self {
            TileValue::Zero => Tensor::new(zero_range.clone()),
            TileValue::Shared(tile) => Arc::try_unwrap(tile).unwrap_or_else(|tile| (*tile).clone()),
            TileValue::Owned(tile) => tile,
        }
    }

    /// Demote to the shared state so further clones are cheap.
    pub fn into_shared(self) -> Self {
        match self {
            TileValue::Owned(tile) => TileValue::Shared(Arc::new(tile)),
            other => other,
        }
    }
}

impl<T: Scalar> From<Tensor<T>> for TileValue<T> {
    fn from(tile: Tensor<T>) -> Self {
        TileValue::Owned(tile)
    }
}
