//! Bounded pool of reusable processing handles.
//!
//! Handles are expensive to create and not safe to share, so the pool hands
//! each one to exactly one caller at a time:
//!
//! ```text
//! take()  ── idle handle? ──► yes: hand it out
//!             │ no
//!             ├─ live < capacity ──► create one with the factory
//!             └─ otherwise ─────────► wait until put() or close()
//!
//! put(h)  ── reset h ──► closed? ──► yes: destroy h
//!                                  └─ no: queue h, wake one waiter
//!
//! close() ── mark closed, destroy idle handles, wake every waiter
//! ```
//!
//! The closed flag and the idle queue live under one mutex, so a `put` racing
//! `close` either queues before the drain (and is destroyed by it) or sees the
//! flag and destroys its own handle. Destroying a handle means dropping it;
//! ownership guarantees that happens exactly once.
//!
//! [`HandlePool::take`] returns a [`Pooled`] guard that puts the handle back on
//! drop, so early returns and panics cannot leak a handle.

use crate::imaging::BackendError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool capacity must be a positive number")]
    ZeroCapacity,
    #[error("pool is closed")]
    Closed,
    #[error("pool: rejecting put for missing handle")]
    MissingHandle,
    #[error("pool: rejecting put for a handle that was never taken")]
    Unowned,
    #[error("could not create handle: {0}")]
    Create(#[source] BackendError),
}

/// A handle that can be returned to a neutral state and reused.
pub trait Reusable: Send {
    /// Drop all per-request state.
    fn reset(&mut self);
}

type Factory<H> = Box<dyn Fn() -> Result<H, BackendError> + Send + Sync>;

struct State<H> {
    idle: VecDeque<H>,
    /// Handles created and not yet destroyed, idle or checked out.
    live: usize,
    closed: bool,
}

/// Point-in-time counts, mostly for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub live: usize,
    pub idle: usize,
    pub closed: bool,
}

pub struct HandlePool<H> {
    capacity: usize,
    factory: Factory<H>,
    state: Mutex<State<H>>,
    returned: Condvar,
}

impl<H: Reusable> HandlePool<H> {
    /// Create a pool that lazily builds up to `capacity` handles with `factory`.
    pub fn new<F>(capacity: usize, factory: F) -> Result<Self, PoolError>
    where
        F: Fn() -> Result<H, BackendError> + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            factory: Box::new(factory),
            state: Mutex::new(State {
                idle: VecDeque::with_capacity(capacity),
                live: 0,
                closed: false,
            }),
            returned: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a handle, blocking until one is available.
    ///
    /// Fails with [`PoolError::Closed`] once the pool is closed, including
    /// for callers already waiting when it closes.
    pub fn take(&self) -> Result<Pooled<'_, H>, PoolError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(handle) = state.idle.pop_front() {
                return Ok(Pooled::new(self, handle));
            }
            if state.live < self.capacity {
                // Reserve the slot, then build outside the lock.
                state.live += 1;
                break;
            }
            self.returned.wait(&mut state);
        }
        drop(state);

        // Gives the slot back if the factory fails or panics.
        let slot = Reservation {
            pool: self,
            armed: true,
        };
        let handle = (self.factory)().map_err(PoolError::Create)?;

        let state = self.state.lock();
        if state.closed {
            drop(state);
            drop(handle);
            return Err(PoolError::Closed);
        }
        debug!(live = state.live, capacity = self.capacity, "created handle");
        slot.commit();
        Ok(Pooled::new(self, handle))
    }

    /// Return a handle to the pool.
    ///
    /// The handle is reset first. On a closed pool it is destroyed instead of
    /// queued, which is not an error.
    pub fn put(&self, handle: Option<H>) -> Result<(), PoolError> {
        let mut handle = handle.ok_or(PoolError::MissingHandle)?;
        handle.reset();

        let mut state = self.state.lock();
        if state.idle.len() >= state.live {
            return Err(PoolError::Unowned);
        }
        if state.closed {
            state.live -= 1;
            drop(state);
            debug!("pool closed, destroying returned handle");
            drop(handle);
            return Ok(());
        }
        state.idle.push_back(handle);
        drop(state);
        self.returned.notify_one();
        Ok(())
    }

    /// Close the pool and destroy every idle handle.
    ///
    /// Handles still checked out are destroyed when their holder returns them.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        let drained: Vec<H> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<H> = state.idle.drain(..).collect();
            state.live -= drained.len();
            drained
        };
        self.returned.notify_all();
        debug!(count = drained.len(), "pool closed, destroying idle handles");
        drop(drained);
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            capacity: self.capacity,
            live: state.live,
            idle: state.idle.len(),
            closed: state.closed,
        }
    }
}

impl<H> fmt::Debug for HandlePool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlePool")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// A `live` slot claimed by `take` before the factory runs.
struct Reservation<'a, H> {
    pool: &'a HandlePool<H>,
    armed: bool,
}

impl<H> Reservation<'_, H> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl<H> Drop for Reservation<'_, H> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().live -= 1;
            self.pool.returned.notify_one();
        }
    }
}

/// Exclusive loan of a handle. Returns it to the pool when dropped.
pub struct Pooled<'a, H: Reusable> {
    pool: &'a HandlePool<H>,
    handle: Option<H>,
}

impl<'a, H: Reusable> Pooled<'a, H> {
    fn new(pool: &'a HandlePool<H>, handle: H) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    /// Return the handle now, surfacing any error from the pool.
    pub fn release(mut self) -> Result<(), PoolError> {
        self.pool.put(self.handle.take())
    }
}

impl<H: Reusable> Deref for Pooled<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.handle.as_ref().expect("handle is present until release")
    }
}

impl<H: Reusable> DerefMut for Pooled<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.handle.as_mut().expect("handle is present until release")
    }
}

impl<H: Reusable> Drop for Pooled<'_, H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = self.pool.put(Some(handle))
        {
            warn!("could not return handle to pool: {e}");
        }
    }
}
