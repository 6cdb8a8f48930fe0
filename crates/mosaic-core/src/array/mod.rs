//! Distributed tile containers
//!
//! A [`DistArray`] is a shallow handle over a shared [`ArrayImpl`]: the
//! local representation of a global object holding `(World, TiledRange,
//! Shape, Pmap)` plus a map from locally-owned tile ordinals to futures of
//! tile data. Implementations are created collectively (every rank invokes a
//! matching constructor, so ids agree) and destroyed collectively: dropping
//! the last handle on a rank schedules a `lazy_sync` cleanup that deletes
//! the implementation only after every rank has agreed no references
//! remain.
//!
//! An uninitialized (default-constructed) handle carries no implementation
//! and rejects everything except assignment, copy, and destruction.

mod replicator;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use mosaic_runtime::{Future, ObjectId, ObjectLookup, RuntimeError, World};

use crate::error::{Error, Result};
use crate::pmap::{BlockedPmap, Pmap, PmapRef, ReplicatedPmap};
use crate::range::Range;
use crate::shape::Shape;
use crate::tensor::{Scalar, Tensor, TileValue};
use crate::tiled_range::TiledRange;

/// Pending lazy-cleanup operations on this process, across all ranks.
///
/// Incremented when a dropped handle schedules deferred destruction and
/// decremented when the cleanup runs, on the success and failure paths
/// alike.
static CLEANUP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Future of one tile's data.
pub type TileFuture<T> = Future<TileValue<T>>;

/// The shared implementation of a distributed array.
pub struct ArrayImpl<T: Scalar> {
    world: World,
    id: ObjectId,
    trange: TiledRange,
    shape: Shape,
    pmap: PmapRef,
    tiles: Mutex<HashMap<usize, TileFuture<T>>>,
}

impl<T: Scalar> ArrayImpl<T> {
    /// Collective constructor; every rank must call it in matching order.
    pub fn new(world: World, trange: TiledRange, shape: Shape, pmap: Option<PmapRef>) -> Result<Arc<Self>> {
        let tiles = trange.tiles_range().volume();
        let pmap = match pmap {
            Some(pmap) => {
                if pmap.size() != tiles {
                    return Err(Error::TileOutOfRange {
                        ord: pmap.size(),
                        size: tiles,
                    });
                }
                pmap
            }
            None => Arc::new(BlockedPmap::new(&world, tiles)) as PmapRef,
        };
        if !shape.validate(trange.tiles_range()) {
            return Err(Error::ShapeMismatch);
        }

        let id = world.next_object_id();
        let pimpl = Arc::new(Self {
            world: world.clone(),
            id,
            trange,
            shape,
            pmap,
            tiles: Mutex::new(HashMap::new()),
        });
        let as_any: Arc<dyn Any + Send + Sync> = pimpl.clone();
        world.register_object(id, Arc::downgrade(&as_any));
        Ok(pimpl)
    }

    /// The world this array lives in.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Globally unique identifier of this implementation.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The array's tiled index domain.
    pub fn trange(&self) -> &TiledRange {
        &self.trange
    }

    /// The array's tile range (one coordinate per tile).
    pub fn range(&self) -> &Range {
        self.trange.tiles_range()
    }

    /// Number of tiles.
    pub fn size(&self) -> usize {
        self.range().volume()
    }

    /// The array's structure metadata.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The array's tile-distribution map.
    pub fn pmap(&self) -> &PmapRef {
        &self.pmap
    }

    /// `true` when tile `ord` is structurally zero.
    pub fn is_zero(&self, ord: usize) -> bool {
        self.shape.is_zero(ord)
    }

    /// Owner rank of tile `ord`.
    pub fn owner(&self, ord: usize) -> usize {
        self.pmap.owner(ord)
    }

    /// `true` when this rank owns tile `ord`.
    pub fn is_local(&self, ord: usize) -> bool {
        self.pmap.is_local(ord)
    }

    /// The stored future for a locally-owned tile, created unset on first
    /// access.
    pub fn local_future(&self, ord: usize) -> TileFuture<T> {
        self.tiles
            .lock()
            .entry(ord)
            .or_insert_with(|| Future::with_pool(self.world.taskq()))
            .clone()
    }

    fn check_index(&self, ord: usize) -> Result<()> {
        if ord >= self.size() {
            return Err(Error::TileOutOfRange {
                ord,
                size: self.size(),
            });
        }
        Ok(())
    }

    /// Assign tile `ord`. Each tile may be set at most once; a second set
    /// reports [`Error::TileAlreadySet`] unless `skip_set` is given, in
    /// which case it is a no-op.
    pub fn set(&self, ord: usize, value: TileValue<T>, skip_set: bool) -> Result<()> {
        self.check_index(ord)?;
        if !self.is_local(ord) {
            return Err(Error::NotLocal {
                ord,
                owner: self.owner(ord),
                rank: self.world.rank(),
            });
        }
        if self.is_zero(ord) {
            return Err(Error::ZeroTile { ord });
        }
        match self.local_future(ord).set(value.into_shared()) {
            Ok(()) => Ok(()),
            Err(RuntimeError::FutureAlreadySet) if skip_set => Ok(()),
            Err(RuntimeError::FutureAlreadySet) => Err(Error::TileAlreadySet { ord }),
            Err(other) => Err(other.into()),
        }
    }

    /// Bind an incoming future to tile `ord`: when it completes, its value
    /// (or stored error) becomes the tile.
    pub fn set_future(&self, ord: usize, incoming: TileFuture<T>) -> Result<()> {
        self.check_index(ord)?;
        if !self.is_local(ord) {
            return Err(Error::NotLocal {
                ord,
                owner: self.owner(ord),
                rank: self.world.rank(),
            });
        }
        if self.is_zero(ord) {
            return Err(Error::ZeroTile { ord });
        }
        let stored = self.local_future(ord);
        let reader = incoming.clone();
        incoming.register_callback(move || match reader.get() {
            Ok(value) => {
                let _ = stored.set(value.into_shared());
            }
            Err(failure) => {
                let _ = stored.fail(failure);
            }
        });
        Ok(())
    }

    /// Future of tile `ord`, local or remote.
    ///
    /// A local request returns the stored future (unset until assigned). A
    /// remote request sends an active message to the owner, which responds
    /// when its local future completes; the returned future is pending until
    /// the response arrives.
    ///
    /// # Errors
    ///
    /// [`Error::TileOutOfRange`] on a bad ordinal and [`Error::ZeroTile`]
    /// for tiles screened out by the shape.
    pub fn get(&self, ord: usize) -> Result<TileFuture<T>> {
        self.check_index(ord)?;
        if self.is_zero(ord) {
            return Err(Error::ZeroTile { ord });
        }
        if self.is_local(ord) {
            return Ok(self.local_future(ord));
        }

        let result: TileFuture<T> = Future::with_pool(self.world.taskq());
        request_tile::<T>(self.world.clone(), self.owner(ord), self.id, ord, result.clone());
        Ok(result)
    }

    /// Ordinals of the non-zero tiles owned by this rank.
    pub fn local_nonzero(&self) -> Vec<usize> {
        self.pmap
            .local_indices()
            .into_iter()
            .filter(|&ord| !self.is_zero(ord))
            .collect()
    }
}

/// Ask `owner` for tile `ord` of array `id`, completing `result` when the
/// owner's local future is set.
///
/// The request runs on the owner's task queue. If the owner has not yet
/// constructed its implementation (collective construction is in flight),
/// the request re-enqueues itself.
fn request_tile<T: Scalar>(world: World, owner: usize, id: ObjectId, ord: usize, result: TileFuture<T>) {
    let task_world = world.clone();
    world.taskq_of(owner).submit(move || {
        match task_world.find_object(owner, id) {
            ObjectLookup::Found(object) => {
                let pimpl = object
                    .downcast::<ArrayImpl<T>>()
                    .unwrap_or_else(|_| panic!("object {id} is not an array of this element type"));
                let local = pimpl.local_future(ord);
                let reader = local.clone();
                // Respond once the owner's tile exists. Only the futures are
                // captured; the callback does not pin the implementation.
                local.register_callback(move || match reader.get() {
                    Ok(value) => {
                        let _ = result.set(value.into_shared());
                    }
                    Err(failure) => {
                        let _ = result.fail(failure);
                    }
                });
            }
            ObjectLookup::Pending => {
                // Owner has not constructed the array yet; retry shortly.
                std::thread::sleep(std::time::Duration::from_millis(1));
                request_tile::<T>(task_world, owner, id, ord, result);
            }
            ObjectLookup::Retired => {
                let _ = result.fail(RuntimeError::UnknownObject { id: id.0, rank: owner });
            }
        }
    });
}

struct HandleBox<T: Scalar> {
    pimpl: Option<Arc<ArrayImpl<T>>>,
}

impl<T: Scalar> Drop for HandleBox<T> {
    fn drop(&mut self) {
        if let Some(pimpl) = self.pimpl.take() {
            lazy_release(pimpl);
        }
    }
}

/// Schedule deferred destruction of an implementation whose last handle on
/// this rank was dropped.
///
/// The implementation stays alive inside the `lazy_sync` callback until all
/// ranks have dropped theirs; runtime failures here are absorbed and logged,
/// the pending-cleanup counter is decremented on every path, and the
/// implementation is deleted regardless.
fn lazy_release<T: Scalar>(pimpl: Arc<ArrayImpl<T>>) {
    let world = pimpl.world.clone();
    let id = pimpl.id;
    CLEANUP_COUNTER.fetch_add(1, Ordering::SeqCst);
    let outcome = world.gop().lazy_sync(id, move || {
        pimpl.world.deregister_object(pimpl.id);
        drop(pimpl);
        CLEANUP_COUNTER.fetch_sub(1, Ordering::SeqCst);
    });
    if let Err(failure) = outcome {
        error!(
            rank = world.rank(),
            %id,
            %failure,
            "lazy cleanup failed; the exception has been absorbed and the array deleted locally"
        );
        world.deregister_object(id);
        CLEANUP_COUNTER.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A distributed, block-tiled multidimensional array.
///
/// `DistArray` is a shallow handle: copies share one implementation, and
/// mutating operations on any copy are visible through all of them. The
/// default-constructed handle is *uninitialized* and only supports
/// assignment, copy, and destruction.
pub struct DistArray<T: Scalar> {
    handle: Option<Arc<HandleBox<T>>>,
}

impl<T: Scalar> Default for DistArray<T> {
    fn default() -> Self {
        Self { handle: None }
    }
}

impl<T: Scalar> Clone for DistArray<T> {
    /// Shallow copy; no tile data is copied.
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T: Scalar> DistArray<T> {
    /// Dense collective constructor.
    pub fn new_dense(world: &World, trange: TiledRange) -> Result<Self> {
        Self::new(world, trange, Shape::Dense, None)
    }

    /// Sparse collective constructor.
    pub fn new_sparse(world: &World, trange: TiledRange, shape: Shape) -> Result<Self> {
        Self::new(world, trange, shape, None)
    }

    /// Collective constructor with explicit shape and pmap.
    pub fn new(world: &World, trange: TiledRange, shape: Shape, pmap: Option<PmapRef>) -> Result<Self> {
        let pimpl = ArrayImpl::new(world.clone(), trange, shape, pmap)?;
        Ok(Self::from_impl(pimpl))
    }

    pub(crate) fn from_impl(pimpl: Arc<ArrayImpl<T>>) -> Self {
        Self {
            handle: Some(Arc::new(HandleBox { pimpl: Some(pimpl) })),
        }
    }

    /// `false` for a default-constructed handle.
    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// The shared implementation.
    ///
    /// # Errors
    ///
    /// [`Error::Uninitialized`] on a default-constructed handle.
    pub fn pimpl(&self) -> Result<&Arc<ArrayImpl<T>>> {
        self.handle
            .as_ref()
            .and_then(|handle| handle.pimpl.as_ref())
            .ok_or(Error::Uninitialized)
    }

    fn expect_pimpl(&self) -> &Arc<ArrayImpl<T>> {
        self.pimpl()
            .expect("array has not been initialized: it was default constructed and never assigned")
    }

    /// The world this array lives in.
    pub fn world(&self) -> &World {
        self.expect_pimpl().world()
    }

    /// Globally unique identifier, primarily for diagnostics.
    pub fn id(&self) -> ObjectId {
        self.expect_pimpl().id()
    }

    /// The array's tiled index domain.
    pub fn trange(&self) -> &TiledRange {
        self.expect_pimpl().trange()
    }

    /// The array's tile range.
    pub fn range(&self) -> &Range {
        self.expect_pimpl().range()
    }

    /// Number of tiles.
    pub fn size(&self) -> usize {
        self.expect_pimpl().size()
    }

    /// The array's structure metadata.
    pub fn shape(&self) -> &Shape {
        self.expect_pimpl().shape()
    }

    /// `true` when no tiles are screened out.
    pub fn is_dense(&self) -> bool {
        self.shape().is_dense()
    }

    /// The array's tile-distribution map.
    pub fn pmap(&self) -> &PmapRef {
        self.expect_pimpl().pmap()
    }

    /// Owner rank of tile `ord`.
    pub fn owner(&self, ord: usize) -> Result<usize> {
        let pimpl = self.pimpl()?;
        pimpl.check_index(ord)?;
        Ok(pimpl.owner(ord))
    }

    /// `true` when this rank owns tile `ord`.
    pub fn is_local(&self, ord: usize) -> Result<bool> {
        let pimpl = self.pimpl()?;
        pimpl.check_index(ord)?;
        Ok(pimpl.is_local(ord))
    }

    /// `true` when tile `ord` is structurally zero.
    pub fn is_zero(&self, ord: usize) -> Result<bool> {
        let pimpl = self.pimpl()?;
        pimpl.check_index(ord)?;
        Ok(pimpl.is_zero(ord))
    }

    /// Find a local or remote tile; see [`ArrayImpl::get`].
    pub fn find(&self, ord: usize) -> Result<TileFuture<T>> {
        self.pimpl()?.get(ord)
    }

    /// Find a tile by coordinate.
    pub fn find_coord(&self, coord: &[usize]) -> Result<TileFuture<T>> {
        let pimpl = self.pimpl()?;
        let ord = pimpl.range().ord(coord)?;
        pimpl.get(ord)
    }

    /// Blocking convenience: the materialized tensor of tile `ord`.
    pub fn tile(&self, ord: usize) -> Result<Tensor<T>> {
        let pimpl = self.pimpl()?;
        let value = pimpl.get(ord)?.get().map_err(Error::from)?;
        let range = pimpl.trange().make_tile_range(ord)?;
        Ok(value.into_tensor(&range))
    }

    /// Assign tile `ord` from a tensor.
    pub fn set(&self, ord: usize, tile: Tensor<T>) -> Result<()> {
        self.pimpl()?.set(ord, TileValue::Owned(tile), false)
    }

    /// Assign tile `ord` by coordinate.
    pub fn set_coord(&self, coord: &[usize], tile: Tensor<T>) -> Result<()> {
        let pimpl = self.pimpl()?;
        let ord = pimpl.range().ord(coord)?;
        pimpl.set(ord, TileValue::Owned(tile), false)
    }

    /// Assign tile `ord`, ignoring the call when the tile is already set.
    pub fn set_skip(&self, ord: usize, tile: Tensor<T>) -> Result<()> {
        self.pimpl()?.set(ord, TileValue::Owned(tile), true)
    }

    /// Fill tile `ord` with a constant.
    pub fn set_elem(&self, ord: usize, value: T) -> Result<()> {
        let pimpl = self.pimpl()?;
        let range = pimpl.trange().make_tile_range(ord)?;
        pimpl.set(ord, TileValue::Owned(Tensor::from_elem(range, value)), false)
    }

    /// Fill tile `ord` from a row-major element sequence.
    pub fn set_from_iter(&self, ord: usize, values: impl IntoIterator<Item = T>) -> Result<()> {
        let pimpl = self.pimpl()?;
        let range = pimpl.trange().make_tile_range(ord)?;
        pimpl.set(ord, TileValue::Owned(Tensor::from_iter_over(range, values)), false)
    }

    /// Bind an incoming future to tile `ord`.
    pub fn set_future(&self, ord: usize, future: TileFuture<T>) -> Result<()> {
        self.pimpl()?.set_future(ord, future)
    }

    /// Ordinals of the non-zero tiles owned by this rank.
    pub fn local_nonzero(&self) -> Result<Vec<usize>> {
        Ok(self.pimpl()?.local_nonzero())
    }

    /// Iterate `(ordinal, future)` pairs for this rank's non-zero tiles.
    pub fn iter_local(&self) -> Result<Vec<(usize, TileFuture<T>)>> {
        let pimpl = self.pimpl()?;
        Ok(pimpl
            .local_nonzero()
            .into_iter()
            .map(|ord| (ord, pimpl.local_future(ord)))
            .collect())
    }

    /// Fill every local non-zero tile with a constant, in parallel tasks.
    pub fn fill_local(&self, value: T, skip_set: bool) -> Result<()> {
        self.init_tiles(move |range| Tensor::from_elem(range.clone(), value), skip_set)
    }

    /// Initialize every local non-zero tile with `op`, in parallel tasks.
    ///
    /// `op` must be thread-safe; it is invoked from the task pool with each
    /// tile's element range.
    pub fn init_tiles<F>(&self, op: F, skip_set: bool) -> Result<()>
    where
        F: Fn(&Range) -> Tensor<T> + Send + Sync + 'static,
    {
        let pimpl = self.pimpl()?.clone();
        let op = Arc::new(op);
        for ord in pimpl.local_nonzero() {
            if skip_set && pimpl.local_future(ord).probe() {
                continue;
            }
            let range = pimpl.trange().make_tile_range(ord)?;
            let op = Arc::clone(&op);
            let tile = pimpl
                .world()
                .taskq()
                .add(move || TileValue::Owned(op(&range)));
            match pimpl.set_future(ord, tile) {
                Ok(()) => {}
                Err(Error::TileAlreadySet { .. }) if skip_set => {}
                Err(failure) => return Err(failure),
            }
        }
        Ok(())
    }

    /// Deep copy: a new array, equal tile-by-tile, whose tiles are
    /// independent of this array's. Collective.
    pub fn deep_clone(&self) -> Result<Self> {
        self.transformed(|tile| tile)
    }

    /// Unary transform: a new array with the same metadata whose tiles are
    /// `op` applied to this array's tiles. Collective.
    pub fn transformed<F>(&self, op: F) -> Result<Self>
    where
        F: Fn(Tensor<T>) -> Tensor<T> + Send + Sync + 'static,
    {
        let source = self.pimpl()?.clone();
        let result = Self::new(
            source.world(),
            source.trange().clone(),
            source.shape().clone(),
            Some(source.pmap().clone()),
        )?;
        let dest = result.pimpl()?.clone();
        let op = Arc::new(op);
        for ord in source.local_nonzero() {
            let tile = source.local_future(ord);
            let range = source.trange().make_tile_range(ord)?;
            let op = Arc::clone(&op);
            let transformed = source.world().taskq().add(move || {
                let value = tile.get().expect("source tile evaluation failed");
                TileValue::Owned(op(value.into_tensor(&range)))
            });
            dest.set_future(ord, transformed)?;
        }
        Ok(result)
    }

    /// Exchange implementations with another handle.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.handle, &mut other.handle);
    }

    /// Convert this array into a replicated array: installs a replicated
    /// pmap and broadcasts every non-zero tile so each rank owns a copy.
    /// Collective; a no-op for already-replicated arrays and single-rank
    /// worlds.
    pub fn make_replicated(&mut self) -> Result<()> {
        let source = self.pimpl()?.clone();
        if source.pmap().is_replicated() || source.world().size() == 1 {
            return Ok(());
        }
        let world = source.world().clone();
        let pmap: PmapRef = Arc::new(ReplicatedPmap::new(&world, source.size()));
        let result = Self::new(
            &world,
            source.trange().clone(),
            source.shape().clone(),
            Some(pmap),
        )?;
        replicator::replicate(&source, result.pimpl()?)?;
        world.gop().fence().map_err(Error::from)?;
        *self = result;
        Ok(())
    }

    /// Recompute the sparse shape from the actual tile norms and drop tiles
    /// that fall below the threshold. Collective; a no-op for dense arrays.
    pub fn truncate(&mut self) -> Result<()> {
        let source = self.pimpl()?.clone();
        let threshold = match source.shape().as_sparse() {
            Some(sparse) => sparse.threshold(),
            None => return Ok(()),
        };
        let world = source.world().clone();

        // Gather local tile norms, then sum across ranks; each tile is owned
        // by one rank, so the sum is the global norm vector.
        let tiles = source.size();
        let mut norms = vec![0.0f32; tiles];
        let local: Vec<(usize, Tensor<T>)> = source
            .local_nonzero()
            .into_iter()
            .map(|ord| {
                let range = source.trange().make_tile_range(ord)?;
                let value = source.local_future(ord).get().map_err(Error::from)?;
                Ok((ord, value.into_tensor(&range)))
            })
            .collect::<Result<_>>()?;
        use rayon::prelude::*;
        let local_norms: Vec<(usize, f32)> = local
            .par_iter()
            .map(|(ord, tile)| (*ord, tile.norm() as f32))
            .collect();
        for (ord, norm) in local_norms {
            norms[ord] = norm;
        }
        let norms = world.gop().all_reduce(norms, |mut a, b| {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
            a
        })?;

        let shape = Shape::sparse(
            Tensor::from_vec(source.range().clone(), norms),
            threshold,
        );
        let result = Self::new(
            &world,
            source.trange().clone(),
            shape,
            Some(source.pmap().clone()),
        )?;
        let dest = result.pimpl()?.clone();
        for (ord, tile) in local {
            if !dest.is_zero(ord) {
                dest.set(ord, TileValue::Owned(tile), false)?;
            }
        }
        world.gop().fence().map_err(Error::from)?;
        *self = result;
        Ok(())
    }

    /// Wait until every scheduled lazy cleanup on this process has run.
    ///
    /// Ready tasks are executed while waiting. Bounded by the global wait
    /// timeout (`MOSAIC_WAIT_TIMEOUT`); on expiry the timeout propagates
    /// after logging the number of pending cleanups.
    pub fn wait_for_lazy_cleanup(world: &World) -> Result<()> {
        world
            .await_cond(|| CLEANUP_COUNTER.load(Ordering::SeqCst) == 0)
            .map_err(|failure| {
                error!(
                    rank = world.rank(),
                    pending = CLEANUP_COUNTER.load(Ordering::SeqCst),
                    "lazy cleanup timed out"
                );
                failure.into()
            })
    }

    /// Number of lazy cleanups scheduled but not yet run on this process.
    pub fn pending_cleanup() -> usize {
        CLEANUP_COUNTER.load(Ordering::SeqCst)
    }
}

impl<T: Scalar> std::fmt::Display for DistArray<T> {
    /// Prints every non-zero tile on rank 0; other ranks print nothing.
    /// Blocks on remote tiles; callers should fence afterwards.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pimpl = match self.pimpl() {
            Ok(pimpl) => pimpl,
            Err(_) => return write!(f, "DistArray(uninitialized)"),
        };
        if pimpl.world().rank() != 0 {
            return Ok(());
        }
        for ord in 0..pimpl.size() {
            if pimpl.is_zero(ord) {
                continue;
            }
            match self.tile(ord) {
                Ok(tile) => writeln!(f, "{ord}: {tile}")?,
                Err(_) => writeln!(f, "{ord}: <unavailable>")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiled_range::TiledRange;
    use mosaic_runtime::WorldGroup;

    fn tr_4x4() -> TiledRange {
        TiledRange::from_uniform(&[4, 4], &[2, 2])
    }

    #[test]
    fn test_uninitialized_handle_rejects_operations() {
        let array: DistArray<f64> = DistArray::default();
        assert!(!array.is_initialized());
        assert!(matches!(array.find(0), Err(Error::Uninitialized)));
        // Assignment and copies are allowed.
        let copy = array.clone();
        assert!(!copy.is_initialized());
    }

    #[test]
    fn test_set_and_find_local() {
        let world = World::local();
        let array = DistArray::<f64>::new_dense(&world, tr_4x4()).unwrap();
        array.set_elem(0, 2.5).unwrap();
        let tile = array.tile(0).unwrap();
        assert_eq!(tile.data(), &[2.5; 4]);
    }

    #[test]
    fn test_double_set_detection() {
        let world = World::local();
        let array = DistArray::<f64>::new_dense(&world, tr_4x4()).unwrap();
        array.set_elem(1, 1.0).unwrap();
        assert!(matches!(
            array.set_elem(1, 2.0),
            Err(Error::TileAlreadySet { ord: 1 })
        ));
        // skip_set turns the second assignment into a no-op.
        array
            .set_skip(1, Tensor::from_elem(array.trange().make_tile_range(1).unwrap(), 9.0))
            .unwrap();
        assert_eq!(array.tile(1).unwrap().data(), &[1.0; 4]);
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let world = World::local();
        let array = DistArray::<f64>::new_dense(&world, tr_4x4()).unwrap();
        assert!(matches!(
            array.find(99),
            Err(Error::TileOutOfRange { ord: 99, size: 4 })
        ));
    }

    #[test]
    fn test_fill_local_and_iteration() {
        let world = World::local();
        let array = DistArray::<f64>::new_dense(&world, tr_4x4()).unwrap();
        array.fill_local(3.0, false).unwrap();
        let local = array.iter_local().unwrap();
        assert_eq!(local.len(), 4);
        for (_, future) in local {
            let tile = future.get().unwrap();
            assert_eq!(tile.tensor().unwrap().data(), &[3.0; 4]);
        }
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let world = World::local();
        let array = DistArray::<f64>::new_dense(&world, tr_4x4()).unwrap();
        array.fill_local(1.0, false).unwrap();
        let copy = array.deep_clone().unwrap();
        world.gop().fence().unwrap();

        for ord in 0..4 {
            assert_eq!(copy.tile(ord).unwrap(), array.tile(ord).unwrap());
        }
        assert_ne!(copy.id(), array.id());
    }

    #[test]
    fn test_remote_find_round_trip() {
        WorldGroup::spawn_ranks(2, |world| {
            let array = DistArray::<i64>::new_dense(&world, tr_4x4()).unwrap();
            for ord in array.local_nonzero().unwrap() {
                array.set_elem(ord, ord as i64).unwrap();
            }
            world.gop().fence().unwrap();

            // Every rank reads every tile, local or remote.
            for ord in 0..4 {
                let tile = array.tile(ord).unwrap();
                assert_eq!(tile.data()[0], ord as i64);
            }
            world.gop().fence().unwrap();
        });
    }

    #[test]
    fn test_sparse_array_rejects_zero_tile_access() {
        let world = World::local();
        let norms = Tensor::from_vec(Range::from_extents(&[2, 2]), vec![2.0, 0.0, 0.0, 2.0]);
        let array =
            DistArray::<f64>::new_sparse(&world, tr_4x4(), Shape::sparse(norms, 1.0)).unwrap();
        assert!(array.is_zero(1).unwrap());
        assert!(matches!(array.find(1), Err(Error::ZeroTile { ord: 1 })));
        assert!(array.find(0).is_ok());
    }

    #[test]
    fn test_truncate_drops_small_tiles() {
        let world = World::local();
        let norms = Tensor::from_elem(Range::from_extents(&[2, 2]), 10.0);
        let mut array =
            DistArray::<f64>::new_sparse(&world, tr_4x4(), Shape::sparse(norms, 1.0)).unwrap();
        for ord in 0..4 {
            // Tiles 0 and 3 are large; 1 and 2 fall below the threshold.
            let value = if ord % 3 == 0 { 5.0 } else { 1e-4 };
            array.set_elem(ord, value).unwrap();
        }
        array.truncate().unwrap();
        assert!(!array.is_zero(0).unwrap());
        assert!(array.is_zero(1).unwrap());
        assert!(array.is_zero(2).unwrap());
        assert!(!array.is_zero(3).unwrap());
        assert_eq!(array.tile(0).unwrap().data(), &[5.0; 4]);
    }
}
