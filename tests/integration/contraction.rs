//! Contraction scenarios: tile-by-tile matrix multiply, permuted
//! contraction, and multi-rank SUMMA agreement.

use mosaic::{DistArray, Tensor, TiledRange, World, WorldGroup};

use crate::util::{assert_matches_dense, dense_matmul, identity_matrix, seed_matrix, to_dense};

#[test]
fn test_identity_multiply_reproduces_the_array() {
    let world = World::local();
    let a = seed_matrix(&world);
    let b = identity_matrix(&world);

    let mut c = DistArray::<f64>::default();
    c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
        .unwrap();

    for ord in 0..4 {
        assert_eq!(
            c.tile(ord).unwrap().data(),
            a.tile(ord).unwrap().data(),
            "tile {ord} of A·I differs from A"
        );
    }
}

#[test]
fn test_contraction_matches_dense_reference() {
    let world = World::local();
    let a = seed_matrix(&world);
    let b = seed_matrix(&world);

    let mut c = DistArray::<f64>::default();
    c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
        .unwrap();

    let reference = dense_matmul(&to_dense(&a), &to_dense(&b));
    assert_matches_dense(&c, &reference);
}

#[test]
fn test_contraction_over_transposed_labels() {
    // C("i,j") = A("i,k") · B("j,k") is A·Bᵀ; with B = A this is A·Aᵀ.
    let world = World::local();
    let a = seed_matrix(&world);
    let b = seed_matrix(&world);

    let mut c = DistArray::<f64>::default();
    c.assign("i,j", a.idx("i,k").unwrap() * b.idx("j,k").unwrap())
        .unwrap();

    let dense_a = to_dense(&a);
    let mut b_t = Tensor::new(dense_a.range().clone());
    for coord in dense_a.range().iter() {
        b_t.data_mut()[dense_a.range().ord(&[coord[1], coord[0]]).unwrap()] = dense_a.at(&coord);
    }
    let reference = dense_matmul(&dense_a, &b_t);
    assert_matches_dense(&c, &reference);
}

#[test]
fn test_permuted_output_contraction() {
    // C("j,i") is the transpose of the usual product.
    let world = World::local();
    let a = seed_matrix(&world);
    let b = seed_matrix(&world);

    let mut c = DistArray::<f64>::default();
    c.assign("j,i", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
        .unwrap();

    let product = dense_matmul(&to_dense(&a), &to_dense(&b));
    let mut transposed = Tensor::new(product.range().clone());
    for coord in product.range().iter() {
        transposed.data_mut()[product.range().ord(&[coord[1], coord[0]]).unwrap()] =
            product.at(&coord);
    }
    assert_matches_dense(&c, &transposed);
}

#[test]
fn test_rectangular_contraction() {
    let world = World::local();
    let a = DistArray::<f64>::new_dense(&world, TiledRange::from_uniform(&[6, 4], &[3, 2])).unwrap();
    let b = DistArray::<f64>::new_dense(&world, TiledRange::from_uniform(&[4, 8], &[2, 4])).unwrap();
    a.init_tiles(
        |range| Tensor::from_fn(range.clone(), |c| (c[0] * 4 + c[1]) as f64),
        false,
    )
    .unwrap();
    b.init_tiles(
        |range| Tensor::from_fn(range.clone(), |c| (c[0] as f64) - (c[1] as f64)),
        false,
    )
    .unwrap();

    let mut c = DistArray::<f64>::default();
    c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
        .unwrap();

    assert_eq!(c.trange().elements_range().extent(), &[6, 8]);
    let reference = dense_matmul(&to_dense(&a), &to_dense(&b));
    assert_matches_dense(&c, &reference);
}

#[test]
fn test_three_mode_contraction() {
    // C("i,j,l") = A("i,j,k") · B("k,l") contracts one of three modes.
    let world = World::local();
    let a =
        DistArray::<f64>::new_dense(&world, TiledRange::from_uniform(&[4, 4, 4], &[2, 2, 2])).unwrap();
    let b = DistArray::<f64>::new_dense(&world, TiledRange::from_uniform(&[4, 4], &[2, 2])).unwrap();
    a.init_tiles(
        |range| Tensor::from_fn(range.clone(), |c| (c[0] + 2 * c[1] + 3 * c[2]) as f64),
        false,
    )
    .unwrap();
    b.init_tiles(
        |range| Tensor::from_fn(range.clone(), |c| ((c[0] * 4 + c[1]) % 5) as f64),
        false,
    )
    .unwrap();

    let mut c = DistArray::<f64>::default();
    c.assign("i,j,l", a.idx("i,j,k").unwrap() * b.idx("k,l").unwrap())
        .unwrap();
    assert_eq!(c.trange().elements_range().extent(), &[4, 4, 4]);

    let dense_a = to_dense(&a);
    let dense_b = to_dense(&b);
    let dense_c = to_dense(&c);
    for i in 0..4 {
        for j in 0..4 {
            for l in 0..4 {
                let expected: f64 = (0..4)
                    .map(|k| dense_a.at(&[i, j, k]) * dense_b.at(&[k, l]))
                    .sum();
                assert!(
                    (dense_c.at(&[i, j, l]) - expected).abs() < 1e-10,
                    "C[{i},{j},{l}] = {} but the reference is {expected}",
                    dense_c.at(&[i, j, l])
                );
            }
        }
    }
}

#[test]
fn test_contraction_agrees_across_ranks() {
    WorldGroup::spawn_ranks(4, |world| {
        let a = seed_matrix(&world);
        let b = seed_matrix(&world);
        world.gop().fence().unwrap();

        let mut c = DistArray::<f64>::default();
        c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
            .unwrap();
        world.gop().fence().unwrap();

        let reference = dense_matmul(&to_dense(&a), &to_dense(&b));
        assert_matches_dense(&c, &reference);
        world.gop().fence().unwrap();
    });
}

#[test]
fn test_larger_multi_rank_contraction() {
    WorldGroup::spawn_ranks(4, |world| {
        let tr = TiledRange::from_uniform(&[12, 12], &[3, 3]);
        let a = DistArray::<f64>::new_dense(&world, tr.clone()).unwrap();
        let b = DistArray::<f64>::new_dense(&world, tr).unwrap();
        a.init_tiles(
            |range| Tensor::from_fn(range.clone(), |c| ((c[0] * 12 + c[1]) % 7) as f64),
            false,
        )
        .unwrap();
        b.init_tiles(
            |range| Tensor::from_fn(range.clone(), |c| ((c[0] + c[1]) % 3) as f64),
            false,
        )
        .unwrap();
        world.gop().fence().unwrap();

        let mut c = DistArray::<f64>::default();
        c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap())
            .unwrap();
        world.gop().fence().unwrap();

        let reference = dense_matmul(&to_dense(&a), &to_dense(&b));
        assert_matches_dense(&c, &reference);
        world.gop().fence().unwrap();
    });
}
