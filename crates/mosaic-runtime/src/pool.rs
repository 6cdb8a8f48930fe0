//! Cooperative task queue backing one rank of a world
//!
//! Each rank owns a [`TaskPool`]: a FIFO queue of boxed closures serviced by
//! a small set of worker threads. Tasks produce values through
//! single-assignment futures; blocked readers help drain the queue (see
//! [`Future::wait`](crate::future::Future::wait)), so the pool never stalls
//! on a task that blocks on a later task.
//!
//! Tasks submitted from another rank land in this queue in submission order,
//! which gives FIFO delivery per (source, destination) pair.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::RuntimeError;
use crate::future::Future;

type Task = Box<dyn FnOnce() + Send>;

/// Number of worker threads servicing each rank's queue.
pub const DEFAULT_WORKER_THREADS: usize = 2;

struct PoolState {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    /// Tasks popped but not yet finished.
    running: AtomicUsize,
    shutdown: AtomicBool,
}

/// Handle to a rank's task queue. Cheap to clone; all clones share the queue.
#[derive(Clone)]
pub struct TaskPool {
    state: Arc<PoolState>,
}

impl TaskPool {
    /// Create a pool serviced by `threads` detached worker threads.
    pub fn new(threads: usize) -> Self {
        let pool = Self {
            state: Arc::new(PoolState {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                running: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
        };
        for _ in 0..threads.max(1) {
            let worker = pool.clone();
            std::thread::spawn(move || worker.worker_loop());
        }
        pool
    }

    /// Enqueue a raw task. After shutdown, the task runs inline on the caller.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.state.shutdown.load(Ordering::Acquire) {
            task();
            return;
        }
        self.state.queue.lock().push_back(Box::new(task));
        self.state.available.notify_one();
    }

    /// Enqueue a value-producing task and return the future of its result.
    ///
    /// A panic inside `task` is caught and stored in the future as
    /// [`RuntimeError::TaskPanicked`].
    pub fn add<F, R>(&self, task: F) -> Future<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let future = Future::with_pool(self);
        let result = future.clone();
        self.submit(move || match catch_unwind(AssertUnwindSafe(task)) {
            Ok(value) => {
                let _ = result.set(value);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let _ = result.fail(RuntimeError::TaskPanicked(message));
            }
        });
        future
    }

    /// Pop and run one queued task on the calling thread.
    ///
    /// Returns `false` when the queue was empty.
    pub fn run_one(&self) -> bool {
        let task = self.state.queue.lock().pop_front();
        match task {
            Some(task) => {
                self.state.running.fetch_add(1, Ordering::AcqRel);
                task();
                self.state.running.fetch_sub(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Queued plus currently-running task count.
    pub fn outstanding(&self) -> usize {
        self.state.queue.lock().len() + self.state.running.load(Ordering::Acquire)
    }

    /// Run queued tasks on the calling thread until the pool goes quiet.
    pub fn drain(&self) {
        loop {
            if self.run_one() {
                continue;
            }
            if self.outstanding() == 0 {
                return;
            }
            std::thread::yield_now();
        }
    }

    /// Signal workers to exit once the queue is empty. Idempotent.
    pub fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::Release);
        self.state.available.notify_all();
    }

    fn worker_loop(&self) {
        loop {
            let task = {
                let mut queue = self.state.queue.lock();
                loop {
                    if let Some(task) = queue.pop_front() {
                        break Some(task);
                    }
                    if self.state.shutdown.load(Ordering::Acquire) {
                        break None;
                    }
                    self.state.available.wait(&mut queue);
                }
            };
            match task {
                Some(task) => {
                    self.state.running.fetch_add(1, Ordering::AcqRel);
                    task();
                    self.state.running.fetch_sub(1, Ordering::AcqRel);
                }
                None => return,
            }
        }
    }
}

impl Drop for PoolState {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.available.notify_all();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
