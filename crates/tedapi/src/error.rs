// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for gateway calls.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TedapiError>;

/// Errors raised by the gateway client and the cached query service.
#[derive(Debug, Clone, Error)]
pub enum TedapiError {
    /// The gateway answered with an unexpected, non-success status.
    #[error("Gateway returned status {status}")]
    Protocol { status: u16 },

    /// A call was refused locally because the client is cooling down.
    #[error("Possible rate limiting by gateway - API calls paused")]
    RateLimited,

    /// The gateway asked us to back off; the cooldown is now engaged.
    #[error("Gateway signalled rate limiting - cooldown engaged")]
    RateLimiting,

    /// Credentials were rejected.
    #[error("Access denied: check the gateway password")]
    AccessDenied,

    /// The operation does not exist on this device generation.
    #[error("Operation not supported by this gateway generation")]
    VersionUnsupported,

    /// An operation lock could not be taken in time.
    #[error("Could not acquire lock '{key}' within {timeout:?}")]
    LockTimeout { key: String, timeout: Duration },

    /// The device identity changed while the session was live.
    #[error("DIN changed from '{previous}' to '{current}'")]
    IdentityChanged { previous: String, current: String },

    /// The transport failed before producing a status (DNS, TLS, timeout...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response envelope could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl TedapiError {
    /// Errors that must terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AccessDenied | Self::IdentityChanged { .. })
    }

    /// Either side of the rate-limit pair.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited | Self::RateLimiting)
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<serde_json::Error> for TedapiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
