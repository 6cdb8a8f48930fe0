//! Single-assignment futures with dependency notification
//!
//! A [`Future`] is a shared cell that moves through exactly one transition:
//! *unset* → *set* (with a value or a stored error). Consumers may block on
//! the value, poll it, or register callbacks that fire when the transition
//! happens. Ownership of the cell is shared; clones observe the same state.
//!
//! Blocking reads cooperate with the task scheduler: a future created by a
//! [`TaskPool`](crate::pool::TaskPool) helps drain that pool's queue while it
//! waits, so a task may block on a future produced by a later task without
//! stalling the pool.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config;
use crate::error::{Result, RuntimeError};
use crate::pool::TaskPool;

/// Callback invoked when a future transitions to the set state.
///
/// Callbacks receive no arguments; observers that need the value read it from
/// the future they registered on.
pub type SetCallback = Box<dyn FnOnce() + Send>;

enum State<T> {
    Unset { callbacks: Vec<SetCallback> },
    Ready(T),
    Taken,
    Failed(RuntimeError),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
    /// Pool drained while blocking on this future, when known.
    helper: Option<TaskPool>,
}

/// A single-assignment cell with shared ownership.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.shared.state.lock() {
            State::Unset { .. } => "unset",
            State::Ready(_) => "ready",
            State::Taken => "taken",
            State::Failed(_) => "failed",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<T: Send + 'static> Future<T> {
    /// Create an unset future with no helper pool.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an unset future whose blocking reads drain `pool`.
    pub fn with_pool(pool: &TaskPool) -> Self {
        Self::build(Some(pool.clone()))
    }

    /// Create a future that is already set to `value`.
    pub fn ready(value: T) -> Self {
        let future = Self::build(None);
        future
            .set(value)
            .expect("fresh future cannot already be set");
        future
    }

    fn build(helper: Option<TaskPool>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Unset { callbacks: Vec::new() }),
                cond: Condvar::new(),
                helper,
            }),
        }
    }

    /// Non-blocking check: has this future been assigned (value or error)?
    pub fn probe(&self) -> bool {
        !matches!(*self.shared.state.lock(), State::Unset { .. })
    }

    /// Assign the value, waking blocked readers and firing callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FutureAlreadySet`] on a second assignment.
    pub fn set(&self, value: T) -> Result<()> {
        self.transition(State::Ready(value))
    }

    /// Store an error instead of a value; surfaced on the first read.
    pub fn fail(&self, error: RuntimeError) -> Result<()> {
        self.transition(State::Failed(error))
    }

    fn transition(&self, next: State<T>) -> Result<()> {
        let callbacks = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Unset { callbacks } => {
                    let callbacks = std::mem::take(callbacks);
                    *state = next;
                    self.shared.cond.notify_all();
                    callbacks
                }
                _ => return Err(RuntimeError::FutureAlreadySet),
            }
        };
        for callback in callbacks {
            callback();
        }
        Ok(())
    }

    /// Register `callback` to run when the future is set. If the future is
    /// already set the callback runs immediately on the calling thread.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let run_now = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Unset { callbacks } => {
                    callbacks.push(Box::new(callback));
                    None
                }
                _ => Some(callback),
            }
        };
        if let Some(callback) = run_now {
            callback();
        }
    }

    /// Block until the future is set, draining the helper pool while waiting.
    ///
    /// # Errors
    ///
    /// Returns the stored error for failed futures, or
    /// [`RuntimeError::Timeout`] after the global wait timeout.
    pub fn wait(&self) -> Result<()> {
        let deadline = Instant::now() + config::wait_timeout();
        loop {
            {
                let mut state = self.shared.state.lock();
                match &*state {
                    State::Unset { .. } => {
                        if self.shared.helper.is_none() {
                            let timeout = self
                                .shared
                                .cond
                                .wait_until(&mut state, deadline)
                                .timed_out();
                            if timeout && matches!(*state, State::Unset { .. }) {
                                return Err(self.timeout_error());
                            }
                            continue;
                        }
                    }
                    State::Failed(error) => return Err(error.clone()),
                    _ => return Ok(()),
                }
            }

            // Unset with a helper pool: make progress instead of parking.
            let helper = self.shared.helper.as_ref().expect("checked above");
            if !helper.run_one() {
                std::thread::yield_now();
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error());
            }
        }
    }

    /// Blocking read of a copy of the value.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.wait()?;
        let state = self.shared.state.lock();
        match &*state {
            State::Ready(value) => Ok(value.clone()),
            State::Taken => Err(RuntimeError::FutureTaken),
            State::Failed(error) => Err(error.clone()),
            State::Unset { .. } => unreachable!("wait() returned with future unset"),
        }
    }

    /// Non-blocking read of a copy of the value, when set.
    pub fn try_get(&self) -> Option<Result<T>>
    where
        T: Clone,
    {
        let state = self.shared.state.lock();
        match &*state {
            State::Unset { .. } => None,
            State::Ready(value) => Some(Ok(value.clone())),
            State::Taken => Some(Err(RuntimeError::FutureTaken)),
            State::Failed(error) => Some(Err(error.clone())),
        }
    }

    /// Blocking consume-read: moves the value out, leaving the future in the
    /// *taken* state. A second `take` (or a later `get`) reports
    /// [`RuntimeError::FutureTaken`].
    pub fn take(&self) -> Result<T> {
        self.wait()?;
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(value) => Ok(value),
            State::Taken => Err(RuntimeError::FutureTaken),
            State::Failed(error) => {
                *state = State::Failed(error.clone());
                Err(error)
            }
            State::Unset { .. } => unreachable!("wait() returned with future unset"),
        }
    }

    fn timeout_error(&self) -> RuntimeError {
        RuntimeError::Timeout {
            seconds: config::wait_timeout().as_secs(),
            rank: 0,
            pending: 1,
        }
    }
}

/// Wait for every future in `futures` to be set, surfacing the first error.
pub fn wait_all<T: Send + 'static>(futures: &[Future<T>]) -> Result<()> {
    for future in futures {
        future.wait()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_set_then_get() {
        let future = Future::new();
        assert!(!future.probe());
        future.set(41usize).unwrap();
        assert!(future.probe());
        assert_eq!(future.get().unwrap(), 41);
    }

    #[test]
    fn test_double_set_is_rejected() {
        let future = Future::ready(1u32);
        assert!(matches!(future.set(2), Err(RuntimeError::FutureAlreadySet)));
        assert_eq!(future.get().unwrap(), 1);
    }

    #[test]
    fn test_take_consumes_value() {
        let future = Future::ready(String::from("tile"));
        assert_eq!(future.take().unwrap(), "tile");
        assert!(matches!(future.take(), Err(RuntimeError::FutureTaken)));
    }

    #[test]
    fn test_callback_fires_on_set() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);

        let future = Future::new();
        future.register_callback(|| {
            FIRED.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);
        future.set(7i64).unwrap();
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);

        // Already-set future runs the callback immediately.
        future.register_callback(|| {
            FIRED.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(FIRED.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stored_error_surfaces_on_get() {
        let future: Future<u8> = Future::new();
        future.fail(RuntimeError::TaskPanicked("boom".into())).unwrap();
        assert!(matches!(future.get(), Err(RuntimeError::TaskPanicked(_))));
    }

    #[test]
    fn test_cross_thread_get() {
        let future: Future<Vec<u32>> = Future::new();
        let writer = future.clone();
        let handle = std::thread::spawn(move || {
            writer.set(vec![1, 2, 3]).unwrap();
        });
        assert_eq!(future.get().unwrap(), vec![1, 2, 3]);
        handle.join().unwrap();
    }
}
