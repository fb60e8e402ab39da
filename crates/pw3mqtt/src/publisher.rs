// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downstream publishing seam.

use crate::error::Result;
use serde_json::Value;

/// Online payload of availability topics.
pub const ONLINE: &str = "online";
/// Offline payload of availability topics.
pub const OFFLINE: &str = "offline";

/// Downstream consumer availability, as announced on its status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    /// Anything but `online` counts as offline.
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload == ONLINE.as_bytes() {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Topic plus JSON payload, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Sink for discovery and state messages.
pub trait Publisher: Send {
    fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

impl<P: Publisher + Sync> Publisher for std::sync::Arc<P> {
    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        (**self).publish(topic, payload)
    }
}
