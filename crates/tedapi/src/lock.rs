// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Re-entrant lock with a bounded acquire.
//!
//! `TimeoutLock` wraps a [`parking_lot::ReentrantMutex`]: the owning thread
//! may take it again without deadlocking, other threads wait at most the
//! configured timeout and then get [`TedapiError::LockTimeout`]. The guard
//! releases on drop, so every exit path (including `?`) unlocks.

use crate::error::{Result, TedapiError};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::fmt;
use std::time::Duration;

/// Guard returned by [`TimeoutLock::acquire`].
pub type TimeoutGuard<'a, T> = ReentrantMutexGuard<'a, T>;

/// Named re-entrant lock bounded by a default timeout.
pub struct TimeoutLock<T = ()> {
    name: String,
    timeout: Duration,
    inner: ReentrantMutex<T>,
}

impl<T> TimeoutLock<T> {
    /// Create a lock protecting `value`.
    pub fn new(name: impl Into<String>, timeout: Duration, value: T) -> Self {
        Self {
            name: name.into(),
            timeout,
            inner: ReentrantMutex::new(value),
        }
    }

    /// Acquire with the lock's default timeout.
    pub fn acquire(&self) -> Result<TimeoutGuard<'_, T>> {
        self.acquire_for(self.timeout)
    }

    /// Acquire with an explicit timeout.
    pub fn acquire_for(&self, timeout: Duration) -> Result<TimeoutGuard<'_, T>> {
        self.inner
            .try_lock_for(timeout)
            .ok_or_else(|| TedapiError::LockTimeout {
                key: self.name.clone(),
                timeout,
            })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl TimeoutLock<()> {
    /// Lock that guards no data, only a critical section.
    pub fn unit(name: impl Into<String>, timeout: Duration) -> Self {
        Self::new(name, timeout, ())
    }
}

impl<T> fmt::Debug for TimeoutLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutLock")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}
