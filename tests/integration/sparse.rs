//! Sparse scenarios: block-sparse contraction and shape safety: no output
//! tile the shape declares zero may be nonzero in exact arithmetic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mosaic::{DistArray, Range, Shape, Tensor, TiledRange, World, WorldGroup};

use crate::util::{dense_matmul, to_dense};

/// An 8×8 array with 2×2 tiles where roughly one tile in ten is populated
/// with random nonnegative entries.
fn random_sparse(world: &World, seed: u64) -> DistArray<f64> {
    let tr = TiledRange::from_uniform(&[8, 8], &[2, 2]);
    let tiles = tr.tiles_range().volume();

    // All ranks draw the same tile data from the shared seed; each stores
    // only what it owns.
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data: Vec<Option<Vec<f64>>> = Vec::with_capacity(tiles);
    for ord in 0..tiles {
        // Tile 0 is always present so the array is never empty.
        if ord == 0 || rng.random_bool(0.1) {
            data.push(Some((0..4).map(|_| rng.random_range(0.0..1.0)).collect()));
        } else {
            data.push(None);
        }
    }

    let norms = Tensor::from_vec(
        tr.tiles_range().clone(),
        data.iter()
            .map(|tile| match tile {
                Some(values) => values.iter().map(|x| x * x).sum::<f64>().sqrt() as f32,
                None => 0.0,
            })
            .collect(),
    );
    let array = DistArray::new_sparse(world, tr, Shape::sparse(norms, 1e-6)).unwrap();
    for ord in array.local_nonzero().unwrap() {
        array
            .set_from_iter(ord, data[ord].as_ref().unwrap().iter().copied())
            .unwrap();
    }
    array
}

#[test]
fn test_sparse_contraction_predicted_zeros_are_safe() {
    let world = World::local();
    let a = random_sparse(&world, 23);
    let b = random_sparse(&world, 42);

    let mut c = DistArray::<f64>::default();
    c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
        .unwrap();
    assert!(!c.is_dense());

    let reference = dense_matmul(&to_dense(&a), &to_dense(&b));
    let elements = c.trange().elements_range().clone();
    for ord in 0..c.size() {
        if !c.is_zero(ord).unwrap() {
            continue;
        }
        // Every predicted-zero tile must be exactly zero in the dense
        // reference contraction.
        let block = c.trange().make_tile_range(ord).unwrap();
        for coord in block.iter() {
            assert_eq!(
                reference.data()[elements.ord(&coord).unwrap()],
                0.0,
                "shape declared tile {ord} zero but the reference is nonzero at {coord:?}"
            );
        }
    }
}

#[test]
fn test_sparse_contraction_values_match_reference() {
    let world = World::local();
    let a = random_sparse(&world, 7);
    let b = random_sparse(&world, 11);

    let mut c = DistArray::<f64>::default();
    c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
        .unwrap();

    let reference = dense_matmul(&to_dense(&a), &to_dense(&b));
    crate::util::assert_matches_dense(&c, &reference);
}

#[test]
fn test_sparse_sum_keeps_union_structure() {
    let world = World::local();
    let a = random_sparse(&world, 5);
    let b = random_sparse(&world, 6);

    let mut c = DistArray::<f64>::default();
    c.assign("i,j", a.idx("i,j").unwrap() + b.idx("i,j").unwrap())
        .unwrap();

    for ord in 0..c.size() {
        if c.is_zero(ord).unwrap() {
            assert!(
                a.is_zero(ord).unwrap() && b.is_zero(ord).unwrap(),
                "sum dropped tile {ord} that an operand carries"
            );
        }
    }
}

#[test]
fn test_sparse_contraction_multi_rank() {
    WorldGroup::spawn_ranks(2, |world| {
        let a = random_sparse(&world, 23);
        let b = random_sparse(&world, 42);
        world.gop().fence().unwrap();

        let mut c = DistArray::<f64>::default();
        c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
            .unwrap();
        world.gop().fence().unwrap();

        let reference = dense_matmul(&to_dense(&a), &to_dense(&b));
        crate::util::assert_matches_dense(&c, &reference);
        world.gop().fence().unwrap();
    });
}

#[test]
fn test_truncate_drops_tiny_blocks() {
    let world = World::local();
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    let norms = Tensor::from_elem(Range::from_extents(&[2, 2]), 1.0f32);
    let mut array = DistArray::<f64>::new_sparse(&world, tr, Shape::sparse(norms, 1e-3)).unwrap();
    array.set_elem(0, 0.5).unwrap();
    array.set_elem(1, 1e-9).unwrap();
    array.set_elem(2, 0.0).unwrap();
    array.set_elem(3, 2.0).unwrap();

    array.truncate().unwrap();

    assert!(!array.is_zero(0).unwrap());
    assert!(array.is_zero(1).unwrap());
    assert!(array.is_zero(2).unwrap());
    assert!(!array.is_zero(3).unwrap());
}
