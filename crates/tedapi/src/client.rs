// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway client: identity, transport and rate-limit cooldown.
//!
//! # Status mapping
//!
//! | Gateway status | Outcome                                        |
//! |----------------|------------------------------------------------|
//! | 200            | body returned                                  |
//! | 429, 503       | cooldown engaged, [`TedapiError::RateLimiting`] |
//! | 403            | [`TedapiError::AccessDenied`]                  |
//! | anything else  | [`TedapiError::Protocol`]                      |
//!
//! While the cooldown is running, non-forced calls fail fast with
//! [`TedapiError::RateLimited`] and never reach the transport.

use crate::error::{Result, TedapiError};
use crate::lock::{TimeoutGuard, TimeoutLock};
use crate::transport::{Response, Transport};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

const DIN_PATH: &str = "tedapi/din";

/// Client tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on waiting for the transport-serializing lock.
    pub lock_timeout: Duration,
    /// Quiet period after the gateway signals rate limiting.
    pub cooldown: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    din: Option<String>,
    cooldown_until: Option<Instant>,
    last_success: Option<Instant>,
    powerwall3: bool,
}

/// Authenticated client for a single gateway.
pub struct GatewayClient<T> {
    transport: T,
    cooldown: Duration,
    api_lock: TimeoutLock,
    state: Mutex<ConnectionState>,
}

impl<T: Transport> GatewayClient<T> {
    /// Create a client. No I/O happens until [`connect`](Self::connect).
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            cooldown: config.cooldown,
            api_lock: TimeoutLock::unit("api", config.lock_timeout),
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Connect unless the gateway identity is already known.
    pub fn connect(&self) -> Result<()> {
        if self.state.lock().din.is_none() {
            self.reconnect()?;
        }
        Ok(())
    }

    /// Probe the gateway and refresh its identity unconditionally.
    pub fn reconnect(&self) -> Result<()> {
        debug!("Testing connection to gateway");
        let status = self.transport.ping().map_err(|e| {
            error!("Unable to connect to gateway: {}", e);
            error!("Please verify the host has a route to the gateway");
            e
        })?;

        if status != 200 {
            // The legacy web UI is gone on Powerwall 3, so the root no longer answers 200
            debug!("Detected Powerwall 3 gateway (ping status {})", status);
            self.state.lock().powerwall3 = true;
        }

        self.identify(true)?;
        Ok(())
    }

    /// Gateway DIN, fetched on first use or when `force` is set.
    ///
    /// A fetched DIN that differs from the cached one means the device
    /// changed under us: [`TedapiError::IdentityChanged`].
    pub fn identify(&self, force: bool) -> Result<String> {
        let _guard = self.api_lock.acquire()?;

        if !force {
            if let Some(din) = self.state.lock().din.clone() {
                debug!("Using cached DIN");
                return Ok(din);
            }
        }

        debug!("Fetching DIN from gateway");
        let response = self.request(DIN_PATH, force)?;
        let din = response.text()?.trim().to_string();

        let mut state = self.state.lock();
        if let Some(previous) = state.din.as_ref() {
            if *previous != din {
                return Err(TedapiError::IdentityChanged {
                    previous: previous.clone(),
                    current: din,
                });
            }
        }
        state.din = Some(din.clone());
        Ok(din)
    }

    /// Authenticated read call.
    pub fn request(&self, path: &str, force: bool) -> Result<Response> {
        let _guard = self.serialize(force)?;

        let response = self.transport.get(path)?;
        self.check_response(&response)?;
        Ok(response)
    }

    /// Authenticated mutating call carrying an opaque body.
    pub fn post(&self, path: &str, body: Vec<u8>, force: bool) -> Result<Response> {
        let _guard = self.serialize(force)?;

        let response = self.transport.post(path, body)?;
        self.check_response(&response)?;
        self.record_success(Instant::now());
        Ok(response)
    }

    /// Cached DIN, without I/O.
    pub fn din(&self) -> Option<String> {
        self.state.lock().din.clone()
    }

    pub fn is_powerwall3(&self) -> bool {
        self.state.lock().powerwall3
    }

    /// Time left before non-forced calls are allowed again.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = self.state.lock().cooldown_until?;
        until.checked_duration_since(Instant::now())
    }

    /// Instant of the last successful mutating call.
    pub fn last_success(&self) -> Option<Instant> {
        self.state.lock().last_success
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Take the transport lock, failing fast while cooling down.
    ///
    /// The cooldown is checked again once the lock is held: the call we
    /// queued behind may have just been rate limited.
    fn serialize(&self, force: bool) -> Result<TimeoutGuard<'_, ()>> {
        self.check_cooldown(force)?;
        let guard = self.api_lock.acquire()?;
        self.check_cooldown(force)?;
        Ok(guard)
    }

    fn check_cooldown(&self, force: bool) -> Result<()> {
        if force {
            return Ok(());
        }
        match self.state.lock().cooldown_until {
            Some(until) if Instant::now() < until => Err(TedapiError::RateLimited),
            _ => Ok(()),
        }
    }

    fn check_response(&self, response: &Response) -> Result<()> {
        match response.status {
            200 => Ok(()),
            429 | 503 => {
                self.engage_cooldown(Instant::now());
                warn!(
                    "Gateway returned {}, pausing calls for {:?}",
                    response.status, self.cooldown
                );
                Err(TedapiError::RateLimiting)
            }
            403 => Err(TedapiError::AccessDenied),
            status => Err(TedapiError::Protocol { status }),
        }
    }

    fn engage_cooldown(&self, now: Instant) {
        let until = now + self.cooldown;
        let mut state = self.state.lock();
        // the deadline never moves backwards
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |cur| cur.max(until)));
    }

    fn record_success(&self, now: Instant) {
        let mut state = self.state.lock();
        // reported only; a running cooldown is never lifted by a success
        state.last_success = Some(now);
    }
}
