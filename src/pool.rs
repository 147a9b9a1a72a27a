//! Bounded pool of reusable sink handles shared by all workers.
//!
//! Handles are built lazily by the factory, up to `max_size`. `acquire` blocks
//! while every handle is checked out. The returned guard puts its handle back
//! when dropped, so a worker releases it on every exit path.

use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};

type Factory<S> = Box<dyn Fn() -> Result<S> + Send + Sync>;

struct PoolState<S> {
    idle: Vec<S>,
    created: usize,
}

pub struct ConnectionPool<S> {
    state: Mutex<PoolState<S>>,
    available: Condvar,
    max_size: usize,
    factory: Factory<S>,
}

impl<S> ConnectionPool<S> {
    pub fn new(max_size: usize, factory: impl Fn() -> Result<S> + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(PoolState { idle: Vec::new(), created: 0 }),
            available: Condvar::new(),
            max_size: max_size.max(1),
            factory: Box::new(factory),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Handles built so far (idle or checked out).
    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Check out a handle, building one if under capacity, otherwise waiting
    /// for a checkin. Factory errors free the reserved slot.
    pub fn acquire(&self) -> Result<PooledSink<'_, S>> {
        let mut state = self.state.lock();
        loop {
            if let Some(handle) = state.idle.pop() {
                return Ok(PooledSink { pool: self, handle: Some(handle) });
            }
            if state.created < self.max_size {
                state.created += 1;
                break;
            }
            self.available.wait(&mut state);
        }
        drop(state);

        // Build outside the lock; a slow connect must not stall checkins.
        match (self.factory)() {
            Ok(handle) => Ok(PooledSink { pool: self, handle: Some(handle) }),
            Err(e) => {
                self.state.lock().created -= 1;
                self.available.notify_one();
                Err(e)
            }
        }
    }

    fn release(&self, handle: S) {
        self.state.lock().idle.push(handle);
        self.available.notify_one();
    }

    /// Take every idle handle out of the pool (used to finalize sinks after a run).
    pub fn drain_idle(&self) -> Vec<S> {
        let mut state = self.state.lock();
        let taken = std::mem::take(&mut state.idle);
        state.created -= taken.len();
        taken
    }
}

/// A checked-out handle; returned to its pool on drop.
pub struct PooledSink<'a, S> {
    pool: &'a ConnectionPool<S>,
    handle: Option<S>,
}

impl<S> Deref for PooledSink<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.handle.as_ref().expect("pooled handle present until drop")
    }
}

impl<S> DerefMut for PooledSink<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.handle.as_mut().expect("pooled handle present until drop")
    }
}

impl<S> Drop for PooledSink<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}
