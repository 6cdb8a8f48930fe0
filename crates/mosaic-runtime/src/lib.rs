//! # mosaic-runtime - Distributed-Memory Task Runtime
//!
//! The runtime consumed by `mosaic-core`: process groups ([`World`]),
//! single-assignment futures with callbacks ([`Future`]), per-rank task
//! queues ([`TaskPool`]), and collective operations (fence, lazy_sync,
//! broadcast, all_reduce).
//!
//! ## Architecture
//!
//! ```text
//! WorldGroup (hub)
//!   ├── World rank 0 ── TaskPool ── worker threads
//!   ├── World rank 1 ── TaskPool ── worker threads
//!   └── ...
//! ```
//!
//! Ranks of a group share one process. Cross-rank traffic is delivered by
//! enqueueing closures on the destination rank's queue (FIFO per source →
//! destination pair); collectives rendezvous through the shared hub. The
//! result is an MPI-flavoured programming model that multi-rank tests can
//! exercise inside a single test binary via [`WorldGroup::spawn_ranks`].
//!
//! ## Blocking discipline
//!
//! No task may park the scheduler: blocking reads ([`Future::get`],
//! [`World::await_cond`]) run queued tasks while they wait, so a task may
//! depend on work queued behind it without deadlocking the pool.

pub mod config;
pub mod error;
pub mod future;
pub mod pool;
pub mod world;

pub use error::{Result, RuntimeError};
pub use future::{wait_all, Future, SetCallback};
pub use pool::{TaskPool, DEFAULT_WORKER_THREADS};
pub use world::{GroupOps, ObjectId, ObjectLookup, World, WorldGroup};
