//! Per-location write locks
//!
//! Training for one location key runs backup, fit and commit as one unit.
//! [`LocationLocks`] makes sure only one such unit runs per key at a time,
//! while different keys proceed independently. The lock is released when
//! the returned guard drops, including on early `?` returns.

use crate::location::LocationKey;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

/// Registry of keys currently held by a writer
#[derive(Default)]
pub struct LocationLocks {
    held: Mutex<HashSet<LocationKey>>,
    released: Condvar,
}

impl fmt::Debug for LocationLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationLocks")
            .field("held", &self.held.lock().len())
            .finish()
    }
}

impl LocationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it
    pub fn acquire(&self, key: &LocationKey) -> LocationGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(key) {
            log::debug!("Waiting for write lock on '{}'", key);
            self.released.wait(&mut held);
        }
        held.insert(key.clone());
        LocationGuard {
            locks: self,
            key: key.clone(),
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`
    pub fn acquire_timeout(&self, key: &LocationKey, timeout: Duration) -> Option<LocationGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();
        while held.contains(key) {
            if self.released.wait_until(&mut held, deadline).timed_out() && held.contains(key) {
                return None;
            }
        }
        held.insert(key.clone());
        Some(LocationGuard {
            locks: self,
            key: key.clone(),
        })
    }

    /// Whether a writer currently holds `key`
    pub fn is_held(&self, key: &LocationKey) -> bool {
        self.held.lock().contains(key)
    }

    fn release(&self, key: &LocationKey) {
        self.held.lock().remove(key);
        self.released.notify_all();
    }
}

/// Exclusive hold on one location key
pub struct LocationGuard<'a> {
    locks: &'a LocationLocks,
    key: LocationKey,
}

impl LocationGuard<'_> {
    pub fn key(&self) -> &LocationKey {
        &self.key
    }
}

impl fmt::Debug for LocationGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationGuard").field("key", &self.key).finish()
    }
}

impl Drop for LocationGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}
