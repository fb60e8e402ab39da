// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge error types.

use crate::config::ConfigError;
use tedapi::TedapiError;
use thiserror::Error;

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Gateway call failed.
    #[error(transparent)]
    Tedapi(#[from] TedapiError),

    /// A gateway document lacks a field the device model needs.
    #[error("{document}: missing or malformed '{field}'")]
    Mapping {
        document: &'static str,
        field: String,
    },

    /// Broker refused or dropped a message.
    #[error("Failed to publish to '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// MQTT client setup failed.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Startup precondition not met.
    #[error("{0}")]
    Fatal(String),
}

/// How the dispatcher reacts to a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Gateway is rate limiting: stretch the poll interval.
    Backoff,
    /// Transient (cooldown running, lock busy): drop this cycle.
    Skip,
    /// Stop the bridge and exit.
    Fatal,
    /// Log and keep going.
    Continue,
}

impl BridgeError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Tedapi(TedapiError::RateLimiting) => Disposition::Backoff,
            Self::Tedapi(TedapiError::RateLimited) => Disposition::Skip,
            Self::Tedapi(TedapiError::LockTimeout { .. }) => Disposition::Skip,
            Self::Tedapi(e) if e.is_fatal() => Disposition::Fatal,
            Self::Fatal(_) | Self::Config(_) => Disposition::Fatal,
            _ => Disposition::Continue,
        }
    }

    pub(crate) fn mapping(document: &'static str, field: impl Into<String>) -> Self {
        Self::Mapping {
            document,
            field: field.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_dispositions() {
        let cases = [
            (TedapiError::RateLimiting, Disposition::Backoff),
            (TedapiError::RateLimited, Disposition::Skip),
            (
                TedapiError::LockTimeout {
                    key: "status".into(),
                    timeout: Duration::from_secs(5),
                },
                Disposition::Skip,
            ),
            (TedapiError::AccessDenied, Disposition::Fatal),
            (
                TedapiError::IdentityChanged {
                    previous: "A".into(),
                    current: "B".into(),
                },
                Disposition::Fatal,
            ),
            (TedapiError::Protocol { status: 500 }, Disposition::Continue),
            (TedapiError::Transport("reset".into()), Disposition::Continue),
        ];

        for (error, expected) in cases {
            let label = error.to_string();
            assert_eq!(BridgeError::from(error).disposition(), expected, "{}", label);
        }

        assert_eq!(
            BridgeError::mapping("status", "control.meterAggregates").disposition(),
            Disposition::Continue
        );
        assert_eq!(
            BridgeError::Fatal("not a Powerwall 3".into()).disposition(),
            Disposition::Fatal
        );
    }

    #[test]
    fn test_display() {
        let err = BridgeError::mapping("config", "site_info.site_name");
        assert_eq!(err.to_string(), "config: missing or malformed 'site_info.site_name'");

        let err = BridgeError::from(TedapiError::Protocol { status: 500 });
        assert_eq!(err.to_string(), TedapiError::Protocol { status: 500 }.to_string());
    }
}
