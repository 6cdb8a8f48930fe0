//! Element-wise tile kernels
//!
//! Kernels come in two flavors: *contiguous* (both operands walked linearly)
//! and *permuted* (the result is written through permuted strides, fusing the
//! permutation with the operation so no intermediate tile is materialized).
//!
//! All kernels assert operand conformance; mismatched tile extents are a
//! caller bug, not a recoverable condition.

use crate::permutation::Permutation;
use crate::range::Range;
use crate::tensor::{Scalar, Tensor};

/// Apply `f` element-wise.
pub fn unary<T: Scalar, F>(a: &Tensor<T>, f: F) -> Tensor<T>
where
    F: Fn(T) -> T,
{
    let data: Vec<T> = a.data().iter().map(|&x| f(x)).collect();
    Tensor::from_vec(a.range().clone(), data)
}

/// Apply `f` element-wise, in place.
pub fn unary_inplace<T: Scalar, F>(a: &mut Tensor<T>, f: F)
where
    F: Fn(T) -> T,
{
    for x in a.data_mut() {
        *x = f(*x);
    }
}

/// Apply `f` element-wise while permuting: `out[perm(c)] = f(a[c])`.
pub fn unary_permuted<T: Scalar, F>(a: &Tensor<T>, perm: &Permutation, f: F) -> Tensor<T>
where
    F: Fn(T) -> T,
{
    assert_eq!(
        perm.rank(),
        a.range().rank(),
        "permutation rank {} does not match tile rank {}",
        perm.rank(),
        a.range().rank()
    );
    let out_range = perm * a.range();
    let mut out = Tensor::new(out_range);
    let mapped = mapped_strides(a.range(), out.range(), perm);
    let src = a.data();
    let dst = out.data_mut();
    for_each_permuted(a.range().extent(), &mapped, |in_ord, out_ord| {
        dst[out_ord] = f(src[in_ord]);
    });
    out
}

/// Combine two conformant tiles element-wise.
pub fn binary<T: Scalar, F>(a: &Tensor<T>, b: &Tensor<T>, f: F) -> Tensor<T>
where
    F: Fn(T, T) -> T,
{
    assert_conformant(a.range(), b.range());
    let data: Vec<T> = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Tensor::from_vec(a.range().clone(), data)
}

/// Combine two conformant tiles element-wise, accumulating into `a`.
pub fn binary_inplace<T: Scalar, F>(a: &mut Tensor<T>, b: &Tensor<T>, f: F)
where
    F: Fn(T, T) -> T,
{
    assert_conformant(a.range(), b.range());
    for (x, &y) in a.data_mut().iter_mut().zip(b.data()) {
        *x = f(*x, y);
    }
}

/// Combine element-wise while permuting the result: `out[perm(c)] = f(a[c], b[c])`.
pub fn binary_permuted<T: Scalar, F>(
    a: &Tensor<T>,
    b: &Tensor<T>,
    perm: &Permutation,
    f: F,
) -> Tensor<T>
where
    F: Fn(T, T) -> T,
{
    assert_conformant(a.range(), b.range());
    let out_range = perm * a.range();
    let mut out = Tensor::new(out_range);
    let mapped = mapped_strides(a.range(), out.range(), perm);
    let left = a.data();
    let right = b.data();
    let dst = out.data_mut();
    for_each_permuted(a.range().extent(), &mapped, |in_ord, out_ord| {
        dst[out_ord] = f(left[in_ord], right[in_ord]);
    });
    out
}

/// Strides of the output tile, reordered into input-mode iteration order.
fn mapped_strides(input: &Range, output: &Range, perm: &Permutation) -> Vec<usize> {
    (0..input.rank())
        .map(|mode| output.stride()[perm.map(mode)])
        .collect()
}

/// Walk the input linearly while tracking the permuted output offset.
///
/// The inner (least-significant) input mode advances by a fixed output
/// stride, so the body stays a strided copy; outer modes adjust the offset
/// on carry.
fn for_each_permuted(extent: &[usize], mapped_stride: &[usize], mut body: impl FnMut(usize, usize)) {
    let volume: usize = extent.iter().product();
    if volume == 0 {
        return;
    }
    if extent.is_empty() {
        body(0, 0);
        return;
    }

    let rank = extent.len();
    let mut counters = vec![0usize; rank];
    let mut out_ord = 0usize;
    for in_ord in 0..volume {
        body(in_ord, out_ord);

        // Odometer increment starting at the least-significant mode.
        let mut mode = rank;
        loop {
            mode -= 1;
            counters[mode] += 1;
            out_ord += mapped_stride[mode];
            if counters[mode] < extent[mode] {
                break;
            }
            counters[mode] = 0;
            out_ord -= extent[mode] * mapped_stride[mode];
            if mode == 0 {
                break;
            }
        }
    }
}

fn assert_conformant(left: &Range, right: &Range) {
    assert_eq!(
        left.extent(),
        right.extent(),
        "tile extents do not conform: {left:?} vs {right:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_2x3() -> Tensor<i64> {
        Tensor::from_vec(Range::from_extents(&[2, 3]), vec![1, 2, 3, 4, 5, 6])
    }

    #[test]
    fn test_unary_applies_everywhere() {
        let doubled = unary(&tensor_2x3(), |x| 2 * x);
        assert_eq!(doubled.data(), &[2, 4, 6, 8, 10, 12]);
    }

    #[test]
    fn test_unary_permuted_transposes() {
        let p = Permutation::new(vec![1, 0]).unwrap();
        let t = unary_permuted(&tensor_2x3(), &p, |x| x);
        assert_eq!(t.range().extent(), &[3, 2]);
        // Row-major transpose of [[1,2,3],[4,5,6]].
        assert_eq!(t.data(), &[1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_binary_permuted_fuses_op_and_layout() {
        let a = tensor_2x3();
        let b = unary(&a, |x| 10 * x);
        let p = Permutation::new(vec![1, 0]).unwrap();
        let sum = binary_permuted(&a, &b, &p, |x, y| x + y);
        let reference = unary_permuted(&binary(&a, &b, |x, y| x + y), &p, |x| x);
        assert_eq!(sum, reference);
    }

    #[test]
    fn test_three_mode_permutation() {
        let range = Range::from_extents(&[2, 3, 4]);
        let a = Tensor::from_fn(range, |coord| (coord[0] * 100 + coord[1] * 10 + coord[2]) as i64);
        let p = Permutation::new(vec![2, 0, 1]).unwrap();
        let t = unary_permuted(&a, &p, |x| x);
        assert_eq!(t.range().extent(), &[3, 4, 2]);
        for coord in a.range().iter() {
            let image = p.apply(&coord);
            assert_eq!(t.at(&image), a.at(&coord));
        }
    }

    #[test]
    #[should_panic(expected = "do not conform")]
    fn test_mismatched_extents_panic() {
        let a = tensor_2x3();
        let b = Tensor::<i64>::new(Range::from_extents(&[3, 2]));
        let _ = binary(&a, &b, |x, y| x + y);
    }
}
