//! Process groups, collectives, and distributed-object plumbing
//!
//! A [`World`] is one rank's handle onto a process group. Ranks of a group
//! live in the same OS process and are connected by a shared hub: each rank
//! owns a task queue, and cross-rank traffic is delivered by enqueueing onto
//! the destination rank's queue, which preserves FIFO order per
//! (source, destination) pair.
//!
//! Collective operations (`fence`, `lazy_sync`, `broadcast`, `all_reduce`)
//! must be invoked by every rank of the group in matching order; each call
//! site is tagged with a per-rank sequence number, so mismatched orders
//! surface as type-mismatch errors rather than silent cross-talk.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::trace;

use crate::config;
use crate::error::{Result, RuntimeError};
use crate::pool::{TaskPool, DEFAULT_WORKER_THREADS};

/// Identifier of a collectively-constructed distributed object.
///
/// Ids are assigned from a per-rank counter, so ranks that construct their
/// distributed objects in matching order agree on every id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

type AnyBox = Box<dyn Any + Send>;
type LazyCallback = Box<dyn FnOnce() + Send>;

enum CollectiveCell {
    Reduce {
        contributions: Vec<Option<AnyBox>>,
        arrived: usize,
        result: Option<AnyBox>,
        read: usize,
    },
    Broadcast {
        value: Option<AnyBox>,
        read: usize,
    },
}

struct BarrierState {
    arrived: usize,
    generation: u64,
}

struct GroupState {
    size: usize,
    pools: Vec<TaskPool>,
    barrier: Mutex<BarrierState>,
    barrier_cond: Condvar,
    collectives: Mutex<HashMap<u64, CollectiveCell>>,
    lazy: Mutex<HashMap<u64, Vec<(usize, LazyCallback)>>>,
    registry: RwLock<HashMap<(usize, u64), Weak<dyn Any + Send + Sync>>>,
    /// Objects that were registered once and have since been destroyed.
    /// Lets late messages distinguish "not constructed yet" from "gone".
    retired: RwLock<HashSet<(usize, u64)>>,
    torn_down: AtomicBool,
}

/// Outcome of resolving a distributed object, for senders that may race
/// the target's collective construction or its teardown.
pub enum ObjectLookup {
    /// The object is alive.
    Found(Arc<dyn Any + Send + Sync>),
    /// Nothing registered under this id yet; construction may be in flight
    /// and the caller should retry.
    Pending,
    /// The object existed and has been destroyed; messages to it must be
    /// dropped, not retried.
    Retired,
}

impl Drop for GroupState {
    fn drop(&mut self) {
        self.torn_down.store(true, Ordering::Release);
        for pool in &self.pools {
            pool.shutdown();
        }
    }
}

struct WorldInner {
    rank: usize,
    group: Arc<GroupState>,
    pool: TaskPool,
    next_object: AtomicU64,
    next_collective: AtomicU64,
}

/// One rank's handle onto a process group.
///
/// Cheap to clone; clones refer to the same rank.
#[derive(Clone)]
pub struct World {
    inner: Arc<WorldInner>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

impl World {
    /// A standalone single-rank world.
    pub fn local() -> Self {
        WorldGroup::new(1).world(0)
    }

    /// This process's rank within the group, in `[0, size)`.
    pub fn rank(&self) -> usize {
        self.inner.rank
    }

    /// Number of ranks in the group.
    pub fn size(&self) -> usize {
        self.inner.group.size
    }

    /// This rank's task queue.
    pub fn taskq(&self) -> &TaskPool {
        &self.inner.pool
    }

    /// The task queue of another rank. Submitting to it is the transport for
    /// all cross-rank traffic.
    pub fn taskq_of(&self, rank: usize) -> &TaskPool {
        &self.inner.group.pools[rank]
    }

    /// Collective operations on this world.
    pub fn gop(&self) -> GroupOps<'_> {
        GroupOps { world: self }
    }

    /// Next world-unique id for a collectively-constructed object.
    ///
    /// All ranks must create their distributed objects in matching order for
    /// the returned ids to agree.
    pub fn next_object_id(&self) -> ObjectId {
        ObjectId(self.inner.next_object.fetch_add(1, Ordering::Relaxed))
    }

    /// Publish a distributed object under `(self.rank(), id)` so peers can
    /// reach it. The registry keeps a weak reference only; object lifetime is
    /// governed by its owner (typically through `lazy_sync` cleanup).
    pub fn register_object(&self, id: ObjectId, object: Weak<dyn Any + Send + Sync>) {
        self.inner
            .group
            .registry
            .write()
            .insert((self.rank(), id.0), object);
    }

    /// Remove this rank's registry entry for `id` and mark it retired.
    pub fn deregister_object(&self, id: ObjectId) {
        let key = (self.rank(), id.0);
        self.inner.group.registry.write().remove(&key);
        self.inner.group.retired.write().insert(key);
    }

    /// Resolve the object `rank` published under `id`.
    pub fn lookup_object(&self, rank: usize, id: ObjectId) -> Result<Arc<dyn Any + Send + Sync>> {
        match self.find_object(rank, id) {
            ObjectLookup::Found(object) => Ok(object),
            _ => Err(RuntimeError::UnknownObject { id: id.0, rank }),
        }
    }

    /// Resolve the object `rank` published under `id`, distinguishing
    /// in-flight construction from completed teardown.
    pub fn find_object(&self, rank: usize, id: ObjectId) -> ObjectLookup {
        let key = (rank, id.0);
        if let Some(weak) = self.inner.group.registry.read().get(&key) {
            // A dead weak reference means the object was dropped without a
            // formal deregistration; treat it as retired.
            return match weak.upgrade() {
                Some(object) => ObjectLookup::Found(object),
                None => ObjectLookup::Retired,
            };
        }
        if self.inner.group.retired.read().contains(&key) {
            ObjectLookup::Retired
        } else {
            ObjectLookup::Pending
        }
    }

    /// Wait until `condition` holds, running queued tasks while waiting.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Timeout`] after the global wait timeout, reporting the
    /// number of tasks still outstanding on this rank.
    pub fn await_cond<F>(&self, condition: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + config::wait_timeout();
        loop {
            if condition() {
                return Ok(());
            }
            if !self.inner.pool.run_one() {
                std::thread::yield_now();
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::Timeout {
                    seconds: config::wait_timeout().as_secs(),
                    rank: self.rank(),
                    pending: self.inner.pool.outstanding(),
                });
            }
        }
    }

    fn next_collective_tag(&self) -> u64 {
        self.inner.next_collective.fetch_add(1, Ordering::Relaxed)
    }

    fn timeout_error(&self) -> RuntimeError {
        RuntimeError::Timeout {
            seconds: config::wait_timeout().as_secs(),
            rank: self.rank(),
            pending: self.inner.pool.outstanding(),
        }
    }

    /// Spin on `poll`, helping the task queue, until it yields a value.
    fn wait_collective<R>(&self, mut poll: impl FnMut() -> Result<Option<R>>) -> Result<R> {
        let deadline = Instant::now() + config::wait_timeout();
        loop {
            if let Some(value) = poll()? {
                return Ok(value);
            }
            if !self.inner.pool.run_one() {
                std::thread::yield_now();
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error());
            }
        }
    }

    fn barrier(&self) -> Result<()> {
        let group = &self.inner.group;
        let mut state = group.barrier.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == group.size {
            state.arrived = 0;
            state.generation += 1;
            group.barrier_cond.notify_all();
            return Ok(());
        }
        let deadline = Instant::now() + config::wait_timeout();
        while state.generation == generation {
            if group
                .barrier_cond
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.generation == generation
            {
                return Err(self.timeout_error());
            }
        }
        Ok(())
    }

    fn all_reduce_tagged<T, F>(&self, tag: u64, value: T, fold: F) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: Fn(T, T) -> T,
    {
        let group = &self.inner.group;
        let rank = self.rank();
        {
            let mut collectives = group.collectives.lock();
            let cell = collectives.entry(tag).or_insert_with(|| CollectiveCell::Reduce {
                contributions: (0..group.size).map(|_| None).collect(),
                arrived: 0,
                result: None,
                read: 0,
            });
            match cell {
                CollectiveCell::Reduce {
                    contributions,
                    arrived,
                    result,
                    ..
                } => {
                    contributions[rank] = Some(Box::new(value));
                    *arrived += 1;
                    if *arrived == group.size {
                        // Last arriver folds in rank order so every run
                        // combines contributions deterministically.
                        let mut folded: Option<T> = None;
                        for slot in contributions.iter_mut() {
                            let boxed = slot.take().expect("all ranks arrived");
                            let contribution = *boxed
                                .downcast::<T>()
                                .map_err(|_| RuntimeError::CollectiveTypeMismatch { rank })?;
                            folded = Some(match folded {
                                Some(accumulated) => fold(accumulated, contribution),
                                None => contribution,
                            });
                        }
                        *result = Some(Box::new(folded.expect("group size is at least one")));
                    }
                }
                CollectiveCell::Broadcast { .. } => {
                    return Err(RuntimeError::CollectiveTypeMismatch { rank })
                }
            }
        }

        let reduced = self.wait_collective(|| {
            let mut collectives = group.collectives.lock();
            let cell = collectives
                .get_mut(&tag)
                .expect("collective cell removed before all ranks read it");
            let mut done = false;
            let outcome = match cell {
                CollectiveCell::Reduce { result, read, .. } => match result {
                    Some(boxed) => {
                        let value = boxed
                            .downcast_ref::<T>()
                            .ok_or(RuntimeError::CollectiveTypeMismatch { rank })?
                            .clone();
                        *read += 1;
                        done = *read == group.size;
                        Ok(Some(value))
                    }
                    None => Ok(None),
                },
                CollectiveCell::Broadcast { .. } => {
                    Err(RuntimeError::CollectiveTypeMismatch { rank })
                }
            };
            if done {
                collectives.remove(&tag);
            }
            outcome
        })?;
        Ok(reduced)
    }
}

/// Collective operations facade, obtained from [`World::gop`].
pub struct GroupOps<'a> {
    world: &'a World,
}

impl GroupOps<'_> {
    /// Global synchronization point: returns once every rank has entered the
    /// fence and all task queues in the group have gone quiet.
    pub fn fence(&self) -> Result<()> {
        let world = self.world;
        trace!(rank = world.rank(), "entering fence");
        loop {
            world.inner.pool.drain();
            world.barrier()?;
            let quiet = world.inner.pool.outstanding() == 0;
            let tag = world.next_collective_tag();
            let all_quiet = world.all_reduce_tagged(tag, quiet, |a, b| a && b)?;
            if all_quiet {
                trace!(rank = world.rank(), "fence complete");
                return Ok(());
            }
        }
    }

    /// Deferred global agreement keyed by `id`: `callback` runs on this
    /// rank's task queue once every rank of the group has called `lazy_sync`
    /// with the same id. Non-blocking.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::WorldTornDown`] when the group is shutting down; the
    /// caller is then responsible for immediate local cleanup.
    pub fn lazy_sync<F>(&self, id: ObjectId, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let world = self.world;
        let group = &world.inner.group;
        if group.torn_down.load(Ordering::Acquire) {
            return Err(RuntimeError::WorldTornDown);
        }
        let ready = {
            let mut slots = group.lazy.lock();
            let slot = slots.entry(id.0).or_default();
            slot.push((world.rank(), Box::new(callback)));
            if slot.len() == group.size {
                slots.remove(&id.0)
            } else {
                None
            }
        };
        if let Some(callbacks) = ready {
            trace!(id = %id, "lazy_sync complete, scheduling callbacks");
            for (rank, callback) in callbacks {
                group.pools[rank].submit(callback);
            }
        }
        Ok(())
    }

    /// Broadcast `value` from `root` to every rank; returns the value on all
    /// ranks. Non-root ranks pass `None`.
    pub fn broadcast<T>(&self, root: usize, value: Option<T>) -> Result<T>
    where
        T: Clone + Send + 'static,
    {
        let world = self.world;
        let group = &world.inner.group;
        let rank = world.rank();
        let tag = world.next_collective_tag();

        if rank == root {
            let value = value.expect("broadcast root must supply a value");
            let mut collectives = group.collectives.lock();
            let cell = collectives.entry(tag).or_insert_with(|| CollectiveCell::Broadcast {
                value: None,
                read: 0,
            });
            match cell {
                CollectiveCell::Broadcast { value: slot, .. } => {
                    *slot = Some(Box::new(value.clone()));
                }
                CollectiveCell::Reduce { .. } => {
                    return Err(RuntimeError::CollectiveTypeMismatch { rank })
                }
            }
            drop(collectives);
            // The root reads its own copy back to join the cleanup count.
            self.read_broadcast::<T>(tag)?;
            return Ok(value);
        }

        self.read_broadcast::<T>(tag)
    }

    fn read_broadcast<T>(&self, tag: u64) -> Result<T>
    where
        T: Clone + Send + 'static,
    {
        let world = self.world;
        let group = &world.inner.group;
        let rank = world.rank();
        world.wait_collective(|| {
            let mut collectives = group.collectives.lock();
            let cell = collectives.entry(tag).or_insert_with(|| CollectiveCell::Broadcast {
                value: None,
                read: 0,
            });
            let mut done = false;
            let outcome = match cell {
                CollectiveCell::Broadcast { value, read } => match value {
                    Some(boxed) => {
                        let value = boxed
                            .downcast_ref::<T>()
                            .ok_or(RuntimeError::CollectiveTypeMismatch { rank })?
                            .clone();
                        *read += 1;
                        done = *read == group.size;
                        Ok(Some(value))
                    }
                    None => Ok(None),
                },
                CollectiveCell::Reduce { .. } => Err(RuntimeError::CollectiveTypeMismatch { rank }),
            };
            if done {
                collectives.remove(&tag);
            }
            outcome
        })
    }

    /// All-reduce: every rank contributes `value`; all ranks receive the fold
    /// of all contributions, combined in rank order.
    pub fn all_reduce<T, F>(&self, value: T, fold: F) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: Fn(T, T) -> T,
    {
        let tag = self.world.next_collective_tag();
        self.world.all_reduce_tagged(tag, value, fold)
    }
}

/// An in-process group of ranks sharing one hub.
pub struct WorldGroup {
    worlds: Vec<World>,
}

impl WorldGroup {
    /// Create a group of `size` ranks, each with its own task queue.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a world group needs at least one rank");
        let pools: Vec<TaskPool> = (0..size).map(|_| TaskPool::new(DEFAULT_WORKER_THREADS)).collect();
        let group = Arc::new(GroupState {
            size,
            pools: pools.clone(),
            barrier: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            barrier_cond: Condvar::new(),
            collectives: Mutex::new(HashMap::new()),
            lazy: Mutex::new(HashMap::new()),
            registry: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashSet::new()),
            torn_down: AtomicBool::new(false),
        });
        let worlds = (0..size)
            .map(|rank| World {
                inner: Arc::new(WorldInner {
                    rank,
                    group: Arc::clone(&group),
                    pool: pools[rank].clone(),
                    next_object: AtomicU64::new(0),
                    next_collective: AtomicU64::new(0),
                }),
            })
            .collect();
        Self { worlds }
    }

    /// Handles for every rank.
    pub fn worlds(&self) -> &[World] {
        &self.worlds
    }

    /// The handle for `rank`.
    pub fn world(&self, rank: usize) -> World {
        self.worlds[rank].clone()
    }

    /// Run `body` once per rank, each on its own thread, and join them all.
    /// A panic on any rank propagates to the caller.
    ///
    /// This is the harness used by multi-rank tests:
    ///
    /// ```
    /// use mosaic_runtime::WorldGroup;
    ///
    /// WorldGroup::spawn_ranks(4, |world| {
    ///     assert_eq!(world.size(), 4);
    ///     world.gop().fence().unwrap();
    /// });
    /// ```
    pub fn spawn_ranks<F>(size: usize, body: F)
    where
        F: Fn(World) + Send + Sync,
    {
        let group = Self::new(size);
        std::thread::scope(|scope| {
            for world in group.worlds.iter() {
                let world = world.clone();
                let body = &body;
                scope.spawn(move || body(world));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_world_is_rank_zero_of_one() {
        let world = World::local();
        assert_eq!(world.rank(), 0);
        assert_eq!(world.size(), 1);
        world.gop().fence().unwrap();
    }

    #[test]
    fn test_object_ids_match_across_ranks() {
        let group = WorldGroup::new(3);
        let ids: Vec<Vec<ObjectId>> = group
            .worlds()
            .iter()
            .map(|world| (0..4).map(|_| world.next_object_id()).collect())
            .collect();
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[1], ids[2]);
    }

    #[test]
    fn test_all_reduce_sums_contributions() {
        WorldGroup::spawn_ranks(4, |world| {
            let total = world.gop().all_reduce(world.rank() as u64 + 1, |a, b| a + b).unwrap();
            assert_eq!(total, 1 + 2 + 3 + 4);
        });
    }

    #[test]
    fn test_broadcast_delivers_to_all_ranks() {
        WorldGroup::spawn_ranks(3, |world| {
            let payload = if world.rank() == 1 {
                Some(vec![9u32, 8, 7])
            } else {
                None
            };
            let received = world.gop().broadcast(1, payload).unwrap();
            assert_eq!(received, vec![9, 8, 7]);
        });
    }

    #[test]
    fn test_fence_waits_for_cross_rank_tasks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COMPLETED: AtomicUsize = AtomicUsize::new(0);
        COMPLETED.store(0, Ordering::SeqCst);

        WorldGroup::spawn_ranks(2, |world| {
            if world.rank() == 0 {
                // Rank 0 plants work on rank 1's queue before fencing.
                world.taskq_of(1).submit(|| {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    COMPLETED.fetch_add(1, Ordering::SeqCst);
                });
            }
            world.gop().fence().unwrap();
            assert_eq!(COMPLETED.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn test_lazy_sync_fires_after_last_rank() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        FIRED.store(0, Ordering::SeqCst);

        WorldGroup::spawn_ranks(3, |world| {
            let id = world.next_object_id();
            world
                .gop()
                .lazy_sync(id, || {
                    FIRED.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            // One callback per rank once everyone has arrived.
            world.await_cond(|| FIRED.load(Ordering::SeqCst) == 3).unwrap();
            world.gop().fence().unwrap();
        });
        assert_eq!(FIRED.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_registry_round_trip() {
        let group = WorldGroup::new(2);
        let w0 = group.world(0);
        let w1 = group.world(1);

        let id = w0.next_object_id();
        let shared: Arc<Vec<u64>> = Arc::new(vec![3, 1, 4]);
        let as_any: Arc<dyn std::any::Any + Send + Sync> = shared.clone();
        w0.register_object(id, Arc::downgrade(&as_any));

        let found = w1.lookup_object(0, id).unwrap();
        let values = found.downcast_ref::<Vec<u64>>().unwrap();
        assert_eq!(values, &vec![3, 1, 4]);

        w0.deregister_object(id);
        drop(as_any);
        drop(shared);
        assert!(matches!(
            w1.lookup_object(0, id),
            Err(RuntimeError::UnknownObject { .. })
        ));
    }
}
