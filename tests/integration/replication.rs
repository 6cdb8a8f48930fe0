//! Replication scenarios: all-to-all broadcast of a blocked array.

use mosaic::{DistArray, Pmap, TiledRange, WorldGroup};

#[test]
fn test_make_replicated_gives_every_rank_every_tile() {
    WorldGroup::spawn_ranks(4, |world| {
        let tr = TiledRange::from_uniform(&[8, 8], &[2, 2]);
        let mut array = DistArray::<f64>::new_dense(&world, tr).unwrap();

        // tile(i)[*] = i under the default blocked distribution.
        for ord in array.local_nonzero().unwrap() {
            array.set_elem(ord, ord as f64).unwrap();
        }
        world.gop().fence().unwrap();
        assert!(!array.pmap().is_replicated());

        array.make_replicated().unwrap();

        assert!(array.pmap().is_replicated());
        for ord in 0..array.size() {
            assert!(array.is_local(ord).unwrap(), "tile {ord} must be local everywhere");
            let tile = array.tile(ord).unwrap();
            assert!(
                tile.iter().all(|&x| x == ord as f64),
                "rank {} sees wrong data in tile {ord}",
                world.rank()
            );
        }
        world.gop().fence().unwrap();
    });
}

#[test]
fn test_make_replicated_is_idempotent() {
    WorldGroup::spawn_ranks(2, |world| {
        let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
        let mut array = DistArray::<f64>::new_dense(&world, tr).unwrap();
        array.fill_local(1.0, false).unwrap();
        world.gop().fence().unwrap();

        array.make_replicated().unwrap();
        let id_after_first = array.id();
        array.make_replicated().unwrap();
        assert_eq!(array.id(), id_after_first, "second call must be a no-op");
        world.gop().fence().unwrap();
    });
}

#[test]
fn test_single_rank_replication_is_a_no_op() {
    let world = mosaic::World::local();
    let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
    let mut array = DistArray::<f64>::new_dense(&world, tr).unwrap();
    array.fill_local(2.0, false).unwrap();
    let id = array.id();
    array.make_replicated().unwrap();
    assert_eq!(array.id(), id);
}
