//! Shared helpers for the integration suite

use mosaic::{DistArray, Range, Scalar, Tensor, TiledRange, World};

/// Set the tiles this rank owns from a full table of per-tile buffers.
pub fn set_tiles<T: Scalar>(array: &DistArray<T>, tiles: &[Vec<T>]) {
    for ord in array.local_nonzero().unwrap() {
        array.set_from_iter(ord, tiles[ord].iter().copied()).unwrap();
    }
}

/// Materialize the whole array as one dense element tensor (collective
/// reads; every rank gets the full matrix).
pub fn to_dense<T: Scalar>(array: &DistArray<T>) -> Tensor<T> {
    let elements = array.trange().elements_range().clone();
    let mut dense = Tensor::new(elements.clone());
    for ord in 0..array.size() {
        if array.is_zero(ord).unwrap() {
            continue;
        }
        let tile = array.tile(ord).unwrap();
        for coord in tile.range().iter() {
            let flat = elements.ord(&coord).unwrap();
            dense.data_mut()[flat] = tile.at(&coord);
        }
    }
    dense
}

/// Naive reference product of two dense rank-2 tensors.
pub fn dense_matmul(a: &Tensor<f64>, b: &Tensor<f64>) -> Tensor<f64> {
    let (m, k) = (a.range().extent()[0], a.range().extent()[1]);
    let n = b.range().extent()[1];
    assert_eq!(k, b.range().extent()[0]);
    let mut c = Tensor::new(Range::from_extents(&[m, n]));
    for i in 0..m {
        for l in 0..k {
            let a_il = a.data()[i * k + l];
            for j in 0..n {
                c.data_mut()[i * n + j] += a_il * b.data()[l * n + j];
            }
        }
    }
    c
}

/// Compare a distributed array against a dense reference, tile by tile.
pub fn assert_matches_dense(array: &DistArray<f64>, reference: &Tensor<f64>) {
    let elements = array.trange().elements_range().clone();
    for ord in 0..array.size() {
        let block = array.trange().make_tile_range(ord).unwrap();
        if array.is_zero(ord).unwrap() {
            for coord in block.iter() {
                let flat = elements.ord(&coord).unwrap();
                assert_eq!(
                    reference.data()[flat], 0.0,
                    "zero tile {ord} disagrees with the reference at {coord:?}"
                );
            }
            continue;
        }
        let tile = array.tile(ord).unwrap();
        for coord in block.iter() {
            let flat = elements.ord(&coord).unwrap();
            assert!(
                (tile.at(&coord) - reference.data()[flat]).abs() < 1e-10,
                "tile {ord} disagrees with the reference at {coord:?}: {} vs {}",
                tile.at(&coord),
                reference.data()[flat]
            );
        }
    }
}

/// The 4×4 array of the seed scenarios: 2×2 blocks numbered row-major.
pub fn seed_matrix(world: &World) -> DistArray<f64> {
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    let array = DistArray::new_dense(world, tr).unwrap();
    let tiles: Vec<Vec<f64>> = vec![
        vec![1.0, 2.0, 3.0, 4.0],
        vec![5.0, 6.0, 7.0, 8.0],
        vec![9.0, 10.0, 11.0, 12.0],
        vec![13.0, 14.0, 15.0, 16.0],
    ];
    set_tiles(&array, &tiles);
    array
}

/// The 4×4 identity with the same tiling as [`seed_matrix`].
pub fn identity_matrix(world: &World) -> DistArray<f64> {
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    let array = DistArray::new_dense(world, tr).unwrap();
    for ord in array.local_nonzero().unwrap() {
        let block = array.trange().make_tile_range(ord).unwrap();
        array
            .set(
                ord,
                Tensor::from_fn(block, |c| if c[0] == c[1] { 1.0 } else { 0.0 }),
            )
            .unwrap();
    }
    array
}
