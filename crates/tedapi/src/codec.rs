// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Envelope codec seam.
//!
//! The gateway speaks a vendor-defined binary envelope. The client treats
//! it as opaque: a [`Codec`] turns a [`Request`] into request bytes and a
//! response body into a JSON document. [`JsonCodec`] is the envelope used by
//! JSON-speaking gateway proxies and by the test suite.

use crate::error::{Result, TedapiError};
use crate::operation::{Operation, Request};
use serde::Serialize;
use serde_json::Value;

/// Encodes requests and decodes responses for the gateway RPC endpoint.
pub trait Codec: Send + Sync {
    fn encode(&self, request: &Request<'_>) -> Result<Vec<u8>>;

    fn decode(&self, operation: Operation, body: &[u8]) -> Result<Value>;
}

/// Plain JSON envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Serialize)]
struct JsonEnvelope<'a> {
    operation: &'static str,
    recipient: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender: Option<&'a str>,
}

impl Codec for JsonCodec {
    fn encode(&self, request: &Request<'_>) -> Result<Vec<u8>> {
        let envelope = JsonEnvelope {
            operation: request.operation.name(),
            recipient: request.recipient,
            sender: request.sender,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(&self, operation: Operation, body: &[u8]) -> Result<Value> {
        serde_json::from_slice(body)
            .map_err(|e| TedapiError::Decode(format!("{}: {}", operation.name(), e)))
    }
}
