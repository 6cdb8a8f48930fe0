//! Lifecycle scenarios: deferred destruction and double-set detection.

use mosaic::{DistArray, Error, TiledRange, World, WorldGroup};

#[test]
fn test_lazy_cleanup_drains_after_mass_drop() {
    WorldGroup::spawn_ranks(2, |world| {
        let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);

        // Create and drop many arrays without fencing in between.
        for _ in 0..1000 {
            let array = DistArray::<f64>::new_dense(&world, tr.clone()).unwrap();
            drop(array);
        }

        DistArray::<f64>::wait_for_lazy_cleanup(&world).unwrap();
        world.gop().fence().unwrap();

        // The counter is process-wide, so cleanups scheduled by concurrently
        // running tests can flicker it; re-wait until a snapshot is stable.
        let mut pending = DistArray::<f64>::pending_cleanup();
        while pending != 0 {
            DistArray::<f64>::wait_for_lazy_cleanup(&world).unwrap();
            pending = DistArray::<f64>::pending_cleanup();
        }
        assert_eq!(pending, 0);
    });
}

#[test]
fn test_lazy_cleanup_single_rank() {
    let world = World::local();
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    for _ in 0..100 {
        let array = DistArray::<i64>::new_dense(&world, tr.clone()).unwrap();
        array.fill_local(1, false).unwrap();
    }
    DistArray::<i64>::wait_for_lazy_cleanup(&world).unwrap();
}

#[test]
fn test_shallow_copies_share_one_cleanup() {
    let world = World::local();
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    let array = DistArray::<f64>::new_dense(&world, tr).unwrap();
    let copy = array.clone();
    drop(array);
    // The implementation is still reachable through the copy.
    copy.fill_local(4.0, false).unwrap();
    assert_eq!(copy.tile(0).unwrap().data(), &[4.0; 4]);
    drop(copy);
    DistArray::<f64>::wait_for_lazy_cleanup(&world).unwrap();
}

#[test]
fn test_double_set_is_a_contract_error() {
    let world = World::local();
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    let array = DistArray::<f64>::new_dense(&world, tr).unwrap();

    array.set_elem(2, 1.5).unwrap();
    assert!(matches!(
        array.set_elem(2, 2.5),
        Err(Error::TileAlreadySet { ord: 2 })
    ));

    // With skip_set the second assignment is a no-op.
    let range = array.trange().make_tile_range(2).unwrap();
    array
        .set_skip(2, mosaic::Tensor::from_elem(range, 9.0))
        .unwrap();
    assert_eq!(array.tile(2).unwrap().data(), &[1.5; 4]);
}

#[test]
fn test_fill_local_skip_set_preserves_existing_tiles() {
    let world = World::local();
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    let array = DistArray::<f64>::new_dense(&world, tr).unwrap();
    array.set_elem(0, 7.0).unwrap();

    array.fill_local(1.0, true).unwrap();

    assert_eq!(array.tile(0).unwrap().data(), &[7.0; 4]);
    assert_eq!(array.tile(3).unwrap().data(), &[1.0; 4]);
}
