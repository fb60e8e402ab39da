// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TTL cache slots.
//!
//! Every operation key owns exactly one [`CacheSlot`], stored inside that
//! key's [`TimeoutLock`](crate::lock::TimeoutLock). There is no cache-wide
//! lock: a slot is read and written only by the thread holding its key's
//! lock. Expiry is lazy, checked on read.

use std::cell::RefCell;
use std::time::{Duration, Instant};

/// Which TTL applies to an operation's cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Long-lived configuration documents (site config, firmware).
    Config,
    /// Short-lived live telemetry (status, vitals, components).
    Telemetry,
}

/// TTL per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub config_ttl: Duration,
    pub telemetry_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            config_ttl: Duration::from_secs(29),
            telemetry_ttl: Duration::from_secs(4),
        }
    }
}

impl CachePolicy {
    pub fn ttl(&self, tier: CacheTier) -> Duration {
        match tier {
            CacheTier::Config => self.config_ttl,
            CacheTier::Telemetry => self.telemetry_ttl,
        }
    }
}

/// Cached value with an absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now + ttl,
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Single-entry cache owned by one operation key.
#[derive(Debug)]
pub struct CacheSlot<V> {
    entry: RefCell<Option<CacheEntry<V>>>,
}

impl<V> Default for CacheSlot<V> {
    fn default() -> Self {
        Self {
            entry: RefCell::new(None),
        }
    }
}

impl<V: Clone> CacheSlot<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh value, if any. An expired entry is dropped on the way out.
    pub fn get(&self, now: Instant) -> Option<V> {
        let mut entry = self.entry.borrow_mut();
        match entry.as_ref() {
            Some(cached) if cached.is_fresh(now) => Some(cached.value().clone()),
            Some(_) => {
                *entry = None;
                None
            }
            None => None,
        }
    }

    pub fn put(&self, value: V, ttl: Duration, now: Instant) {
        *self.entry.borrow_mut() = Some(CacheEntry::new(value, ttl, now));
    }

    pub fn invalidate(&self) {
        self.entry.borrow_mut().take();
    }

    pub fn is_empty(&self) -> bool {
        self.entry.borrow().is_none()
    }
}
