//! Array-level reductions
//!
//! Reductions fold over the calling rank's local tiles, then combine the
//! per-rank partials with an all-reduce over the world. Every function here
//! is collective: all ranks must call it, and all ranks receive the result.

use crate::array::DistArray;
use crate::error::{Error, Result};
use crate::tensor::Scalar;

/// Sum of all elements.
pub fn sum_elements<T: Scalar>(array: &DistArray<T>) -> Result<T> {
    let local = fold_local(array, T::zero(), |total, tile| {
        tile.iter().fold(total, |total, &x| total + x)
    })?;
    let world = array.world().clone();
    Ok(world.gop().all_reduce(local, |a, b| a + b)?)
}

/// Element-wise inner product of two identically tiled arrays.
///
/// Tiles that are zero in either operand contribute nothing.
pub fn dot<T: Scalar>(left: &DistArray<T>, right: &DistArray<T>) -> Result<T> {
    let left_impl = left.pimpl()?;
    let right_impl = right.pimpl()?;
    if left_impl.trange() != right_impl.trange() {
        return Err(Error::ExtentMismatch {
            left: left_impl.trange().elements_range().extent().to_vec(),
            right: right_impl.trange().elements_range().extent().to_vec(),
        });
    }

    let mut local = T::zero();
    for ord in left_impl.local_nonzero() {
        if right_impl.is_zero(ord) {
            continue;
        }
        let range = left_impl.trange().make_tile_range(ord)?;
        let left_tile = left_impl.local_future(ord).get().map_err(Error::from)?;
        // The right tile may live on another rank under a different pmap.
        let right_tile = right_impl.get(ord)?.get().map_err(Error::from)?;
        local += left_tile
            .into_tensor(&range)
            .dot(&right_tile.into_tensor(&range));
    }
    let world = left_impl.world().clone();
    Ok(world.gop().all_reduce(local, |a, b| a + b)?)
}

/// Sum of squared element magnitudes.
pub fn squared_norm<T: Scalar>(array: &DistArray<T>) -> Result<f64> {
    let local = fold_local(array, 0.0, |total, tile| total + tile.squared_norm())?;
    let world = array.world().clone();
    Ok(world.gop().all_reduce(local, |a, b| a + b)?)
}

/// Frobenius norm of the whole array.
pub fn norm<T: Scalar>(array: &DistArray<T>) -> Result<f64> {
    Ok(squared_norm(array)?.sqrt())
}

/// Largest element magnitude.
pub fn abs_max<T: Scalar>(array: &DistArray<T>) -> Result<f64> {
    let local = fold_local(array, 0.0, |largest: f64, tile| largest.max(tile.abs_max()))?;
    let world = array.world().clone();
    Ok(world.gop().all_reduce(local, f64::max)?)
}

/// Trace of a square rank-2 array: the sum of its diagonal elements.
pub fn trace<T: Scalar>(array: &DistArray<T>) -> Result<T> {
    let pimpl = array.pimpl()?;
    let extent = pimpl.trange().elements_range().extent().to_vec();
    if extent.len() != 2 || extent[0] != extent[1] {
        return Err(Error::RankMismatch {
            left: extent.first().copied().unwrap_or(0),
            right: extent.get(1).copied().unwrap_or(0),
        });
    }

    let local = fold_local(array, T::zero(), |total, tile| {
        // Only the elements on the global diagonal contribute.
        let lower = tile.range().lower().to_vec();
        let upper = tile.range().upper().to_vec();
        let start = lower[0].max(lower[1]);
        let end = upper[0].min(upper[1]);
        let mut total = total;
        for d in start..end {
            total += tile.at(&[d, d]);
        }
        total
    })?;
    let world = array.world().clone();
    Ok(world.gop().all_reduce(local, |a, b| a + b)?)
}

fn fold_local<T: Scalar, A, F>(array: &DistArray<T>, init: A, fold: F) -> Result<A>
where
    F: Fn(A, &crate::tensor::Tensor<T>) -> A,
{
    let pimpl = array.pimpl()?;
    let mut accumulated = init;
    for ord in pimpl.local_nonzero() {
        let range = pimpl.trange().make_tile_range(ord)?;
        let value = pimpl.local_future(ord).get().map_err(Error::from)?;
        accumulated = fold(accumulated, &value.into_tensor(&range));
    }
    Ok(accumulated)
}
