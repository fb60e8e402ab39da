// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scripted in-memory gateway shared by the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tedapi::{
    CachePolicy, CachedQueryService, ClientConfig, GatewayClient, JsonCodec, QueryConfig,
    Response, Result, Transport,
};

pub const LEADER_DIN: &str = "1232100-00-E--TG0123456789";

/// Fake gateway counting every call that reaches the wire.
pub struct MockGateway {
    pub ping_status: u16,
    din: Mutex<String>,
    statuses: Mutex<VecDeque<u16>>,
    documents: Mutex<HashMap<String, Value>>,
    post_delay: Mutex<Duration>,
    pub pings: AtomicUsize,
    pub gets: AtomicUsize,
    pub posts: AtomicUsize,
    per_operation: Mutex<HashMap<String, usize>>,
}

impl MockGateway {
    /// A Powerwall 3 gateway (root ping does not answer 200).
    pub fn powerwall3() -> Arc<Self> {
        Arc::new(Self::with_ping_status(404))
    }

    /// An older gateway generation.
    pub fn legacy() -> Arc<Self> {
        Arc::new(Self::with_ping_status(200))
    }

    fn with_ping_status(ping_status: u16) -> Self {
        Self {
            ping_status,
            din: Mutex::new(LEADER_DIN.to_string()),
            statuses: Mutex::new(VecDeque::new()),
            documents: Mutex::new(HashMap::new()),
            post_delay: Mutex::new(Duration::ZERO),
            pings: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            posts: AtomicUsize::new(0),
            per_operation: Mutex::new(HashMap::new()),
        }
    }

    /// Status codes returned by the next calls, in order; 200 afterwards.
    pub fn script(&self, statuses: &[u16]) {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    pub fn set_din(&self, din: &str) {
        *self.din.lock().unwrap() = din.to_string();
    }

    pub fn set_document(&self, operation: &str, value: Value) {
        self.documents
            .lock()
            .unwrap()
            .insert(operation.to_string(), value);
    }

    pub fn set_post_delay(&self, delay: Duration) {
        *self.post_delay.lock().unwrap() = delay;
    }

    pub fn wire_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst) + self.posts.load(Ordering::SeqCst)
    }

    pub fn post_count(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.per_operation
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn next_status(&self) -> u16 {
        self.statuses.lock().unwrap().pop_front().unwrap_or(200)
    }
}

impl Transport for MockGateway {
    fn ping(&self) -> Result<u16> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(self.ping_status)
    }

    fn get(&self, path: &str) -> Result<Response> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let status = self.next_status();
        if status != 200 {
            return Ok(Response::new(status, Vec::new()));
        }
        assert_eq!(path, "tedapi/din");
        Ok(Response::ok(self.din.lock().unwrap().clone()))
    }

    fn post(&self, path: &str, body: Vec<u8>) -> Result<Response> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.post_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let status = self.next_status();
        if status != 200 {
            return Ok(Response::new(status, Vec::new()));
        }

        let request: Value = serde_json::from_slice(&body).expect("json envelope");
        let operation = request["operation"].as_str().unwrap_or_default().to_string();
        let recipient = request["recipient"].as_str().unwrap_or_default().to_string();

        let key = if path.starts_with("tedapi/device/") {
            format!("{}({})", operation, recipient)
        } else {
            operation.clone()
        };
        let call = {
            let mut counts = self.per_operation.lock().unwrap();
            let count = counts.entry(key).or_insert(0);
            *count += 1;
            *count
        };

        let document = self
            .documents
            .lock()
            .unwrap()
            .get(&operation)
            .cloned()
            .unwrap_or_else(|| json!({ "operation": operation, "recipient": recipient }));

        let mut document = document;
        if let Value::Object(map) = &mut document {
            map.insert("call".into(), json!(call));
        }
        Ok(Response::ok(serde_json::to_vec(&document).unwrap()))
    }
}

pub fn client_config(cooldown: Duration) -> ClientConfig {
    ClientConfig {
        lock_timeout: Duration::from_secs(5),
        cooldown,
    }
}

pub fn service(
    gateway: &Arc<MockGateway>,
    lock_timeout: Duration,
    ttl: Duration,
) -> CachedQueryService<Arc<MockGateway>, JsonCodec> {
    let client = Arc::new(GatewayClient::new(
        Arc::clone(gateway),
        client_config(Duration::from_secs(300)),
    ));
    CachedQueryService::new(
        client,
        JsonCodec,
        QueryConfig {
            lock_timeout,
            cache: CachePolicy {
                config_ttl: ttl,
                telemetry_ttl: ttl,
            },
        },
    )
}
