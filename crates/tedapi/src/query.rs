// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cached, per-operation locked gateway queries.
//!
//! Every call follows the same protocol:
//!
//! 1. take the operation key's [`TimeoutLock`] (bounded wait),
//! 2. unless forced, return the key's cached value if still fresh,
//! 3. otherwise fetch through the [`GatewayClient`], decode, store with the
//!    tier TTL,
//! 4. release on return.
//!
//! Because the cache slot lives inside the key's lock, concurrent callers of
//! the same key queue behind the first fetch and then read its result: at
//! most one upstream request per key is ever in flight. Different keys never
//! share a lock.

use crate::cache::{CachePolicy, CacheSlot};
use crate::client::GatewayClient;
use crate::codec::Codec;
use crate::error::{Result, TedapiError};
use crate::lock::TimeoutLock;
use crate::model::{BatteryBlock, FirmwareInfo};
use crate::operation::{Operation, Request};
use crate::transport::Transport;
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared, immutable decoded document.
pub type Document = Arc<Value>;

type Slot = TimeoutLock<CacheSlot<Document>>;

/// Service tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Bound on waiting for an operation key's lock.
    pub lock_timeout: Duration,
    pub cache: CachePolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            cache: CachePolicy::default(),
        }
    }
}

/// Named gateway operations with per-key locking and TTL caching.
pub struct CachedQueryService<T, C> {
    client: Arc<GatewayClient<T>>,
    codec: C,
    policy: CachePolicy,
    lock_timeout: Duration,
    system: Vec<Slot>,
    devices: Mutex<HashMap<(Operation, String), Arc<Slot>>>,
}

impl<T: Transport, C: Codec> CachedQueryService<T, C> {
    pub fn new(client: Arc<GatewayClient<T>>, codec: C, config: QueryConfig) -> Self {
        let system = Operation::SYSTEM
            .iter()
            .map(|op| TimeoutLock::new(op.key(None), config.lock_timeout, CacheSlot::new()))
            .collect();

        Self {
            client,
            codec,
            policy: config.cache,
            lock_timeout: config.lock_timeout,
            system,
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<GatewayClient<T>> {
        &self.client
    }

    /// Site configuration document.
    pub fn config(&self, force: bool) -> Result<Document> {
        self.system_query(Operation::Config, force)
    }

    /// Controller status document.
    pub fn status(&self, force: bool) -> Result<Document> {
        self.system_query(Operation::Status, force)
    }

    /// Status plus component details.
    pub fn device_controller(&self, force: bool) -> Result<Document> {
        self.system_query(Operation::DeviceController, force)
    }

    /// Raw firmware document.
    pub fn firmware(&self, force: bool) -> Result<Document> {
        self.system_query(Operation::Firmware, force)
    }

    /// Firmware document, typed.
    pub fn firmware_info(&self, force: bool) -> Result<FirmwareInfo> {
        let doc = self.firmware(force)?;
        Ok(FirmwareInfo::from_value(&doc)?)
    }

    /// Firmware version string, e.g. `25.10.1`.
    pub fn firmware_version(&self, force: bool) -> Result<String> {
        Ok(self.firmware_info(force)?.version.text)
    }

    /// Powerwall 3 component signals of the leader unit.
    pub fn components(&self, force: bool) -> Result<Document> {
        self.system_query(Operation::Components, force)
    }

    /// Battery block information of one device.
    pub fn battery_block(&self, din: &str, force: bool) -> Result<Document> {
        self.device_query(Operation::BatteryBlock, din, force)
    }

    /// Live vitals of one device.
    pub fn vitals(&self, din: &str, force: bool) -> Result<Document> {
        self.device_query(Operation::Vitals, din, force)
    }

    /// Battery blocks listed in the site configuration; empty when absent.
    pub fn battery_blocks(&self, force: bool) -> Result<Vec<BatteryBlock>> {
        let config = self.config(force)?;
        match config.get("battery_blocks") {
            Some(Value::Array(blocks)) => blocks
                .iter()
                .map(|b| Ok(BatteryBlock::from_value(b)?))
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// Number of device-scoped lock slots created so far.
    pub fn device_slot_count(&self) -> usize {
        self.devices.lock().len()
    }

    fn system_query(&self, op: Operation, force: bool) -> Result<Document> {
        self.ensure_supported(op)?;
        let slot = op
            .slot()
            .map(|i| &self.system[i])
            .ok_or(TedapiError::VersionUnsupported)?;

        self.cached(slot, op, force, || {
            self.client.connect()?;
            debug!("Get {} from gateway", op.name());
            let din = self.client.identify(false)?;
            self.fetch(&Request::system(op, &din))
        })
    }

    fn device_query(&self, op: Operation, din: &str, force: bool) -> Result<Document> {
        self.ensure_supported(op)?;
        let slot = self.device_slot(op, din);

        self.cached(&slot, op, force, || {
            self.client.connect()?;
            debug!("Get {} from gateway ({})", op.name(), din);
            let leader = self.client.identify(false)?;
            self.fetch(&Request::device(op, &leader, din))
        })
    }

    fn cached<F>(&self, slot: &Slot, op: Operation, force: bool, fetch: F) -> Result<Document>
    where
        F: FnOnce() -> Result<Value>,
    {
        let cache = slot.acquire()?;

        if !force {
            if let Some(value) = cache.get(Instant::now()) {
                debug!("Using cached {}", slot.name());
                return Ok(value);
            }
        }

        let value = Arc::new(fetch()?);
        cache.put(Arc::clone(&value), self.policy.ttl(op.tier()), Instant::now());
        Ok(value)
    }

    fn fetch(&self, request: &Request<'_>) -> Result<Value> {
        let body = self.codec.encode(request)?;
        let response = self.client.post(&request.path(), body, false)?;
        self.codec.decode(request.operation, &response.body)
    }

    fn ensure_supported(&self, op: Operation) -> Result<()> {
        if op.requires_powerwall3() {
            // the generation is only known once the gateway has been pinged
            self.client.connect()?;
            if !self.client.is_powerwall3() {
                return Err(TedapiError::VersionUnsupported);
            }
        }
        Ok(())
    }

    fn device_slot(&self, op: Operation, din: &str) -> Arc<Slot> {
        // the table lock is released before the slot lock is taken
        let mut devices = self.devices.lock();
        Arc::clone(devices.entry((op, din.to_string())).or_insert_with(|| {
            Arc::new(TimeoutLock::new(
                op.key(Some(din)),
                self.lock_timeout,
                CacheSlot::new(),
            ))
        }))
    }
}
