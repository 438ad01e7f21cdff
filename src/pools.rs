//! Reusable object pools
//!
//! One [`Pools`] instance is built per server and shared by every worker.
//! Objects are reset on release, so whatever [`Pool::acquire`] hands out is
//! always in its empty state but keeps the capacity it grew to earlier.

use crate::http::cookies::Cookies;
use crossbeam::queue::ArrayQueue;
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

/// Objects that can be emptied in place for reuse.
pub trait Reset: Default {
    /// Restores the empty state without giving memory back.
    fn reset(&mut self);
}

impl Reset for Vec<u8> {
    #[inline]
    fn reset(&mut self) {
        self.clear();
    }
}

/// A bounded free list.
///
/// `acquire` never blocks: an empty list falls back to `T::default()`.
/// `release` drops the object when the list is already full.
pub struct Pool<T: Reset> {
    free: ArrayQueue<T>,
}

impl<T: Reset> Pool<T> {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
        }
    }

    #[inline]
    pub fn acquire(&self) -> T {
        self.free.pop().unwrap_or_default()
    }

    /// Returns `value` to the pool. Must only be called once the caller is
    /// done reading and writing it.
    #[inline]
    pub fn release(&self, mut value: T) {
        value.reset();
        let _ = self.free.push(value);
    }

    /// Acquires a value that goes back to the pool when the guard drops.
    #[inline]
    pub fn guard(&self) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            value: self.acquire(),
        }
    }

    /// Number of idle objects.
    #[inline]
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl<T: Reset> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.free.len())
            .field("capacity", &self.free.capacity())
            .finish()
    }
}

/// Scoped pool value, see [`Pool::guard`].
pub struct Pooled<'a, T: Reset> {
    pool: &'a Pool<T>,
    value: T,
}

impl<T: Reset> Deref for Pooled<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Reset> DerefMut for Pooled<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Reset> Drop for Pooled<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.value));
    }
}

/// The pools shared by every worker of one server.
#[derive(Debug)]
pub struct Pools {
    pub buffers: Pool<Vec<u8>>,
    pub cookies: Pool<Cookies>,
}

impl Pools {
    /// Pools sized for `workers` concurrent users (request and response
    /// each hold one cookie store, the serializer one buffer).
    pub fn new(workers: usize) -> Self {
        Self {
            buffers: Pool::new(workers * 2),
            cookies: Pool::new(workers * 2),
        }
    }
}
