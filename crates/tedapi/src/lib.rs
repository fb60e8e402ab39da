// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tesla Energy Device API (TEDAPI) client
//!
//! Talks to the local gateway of a Powerwall 3 system and keeps the device
//! from being hammered.
//!
//! # Features
//!
//! - **Per-operation locking**: one bounded, re-entrant lock per operation key
//! - **TTL caching**: configuration tier and telemetry tier
//! - **Single flight**: at most one upstream fetch per key at a time
//! - **Rate-limit cooldown**: fail fast after the gateway says 429/503
//! - **Identity pinning**: the gateway DIN cannot change mid-session
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tedapi::{CachedQueryService, ClientConfig, GatewayClient, HttpTransport, JsonCodec};
//!
//! let transport = HttpTransport::new(tedapi::GATEWAY_IP, "password", Duration::from_secs(5))?;
//! let client = Arc::new(GatewayClient::new(transport, ClientConfig::default()));
//! client.connect()?;
//!
//! let api = CachedQueryService::new(client, JsonCodec, QueryConfig::default());
//! let status = api.status(false)?;
//! ```

pub mod cache;
pub mod client;
pub mod codec;
pub mod error;
pub mod lock;
pub mod model;
pub mod operation;
pub mod query;
pub mod transport;

pub use cache::{CacheEntry, CachePolicy, CacheSlot, CacheTier};
pub use client::{ClientConfig, GatewayClient};
pub use codec::{Codec, JsonCodec};
pub use error::{Result, TedapiError};
pub use lock::{TimeoutGuard, TimeoutLock};
pub use model::{lookup, BatteryBlock, FirmwareInfo};
pub use operation::{Operation, Request};
pub use query::{CachedQueryService, Document, QueryConfig};
pub use transport::{HttpTransport, Response, Transport, GATEWAY_IP, GATEWAY_USER};
