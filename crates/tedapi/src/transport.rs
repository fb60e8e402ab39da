// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport seam between the gateway client and the wire.
//!
//! The client only needs three calls: an unauthenticated reachability ping,
//! an authenticated GET and an authenticated POST of an opaque body. The
//! production implementation is [`HttpTransport`]; tests plug in counters.

use crate::error::{Result, TedapiError};
use std::sync::Arc;
use std::time::Duration;

/// Fixed address of the gateway on its local Wi-Fi / LAN interface.
pub const GATEWAY_IP: &str = "192.168.91.1";

/// Basic-auth user expected by the gateway.
pub const GATEWAY_USER: &str = "Tesla_Energy_Device";

const CONTENT_TYPE: &str = "application/octet-string";

/// Raw gateway response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.clone()).map_err(|e| TedapiError::Decode(e.to_string()))
    }
}

/// Wire access to the gateway.
pub trait Transport: Send + Sync {
    /// Unauthenticated GET of the gateway root; returns the HTTP status.
    fn ping(&self) -> Result<u16>;

    /// Authenticated GET of `path`.
    fn get(&self, path: &str) -> Result<Response>;

    /// Authenticated POST of an opaque `body` to `path`.
    fn post(&self, path: &str, body: Vec<u8>) -> Result<Response>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn ping(&self) -> Result<u16> {
        (**self).ping()
    }

    fn get(&self, path: &str) -> Result<Response> {
        (**self).get(path)
    }

    fn post(&self, path: &str, body: Vec<u8>) -> Result<Response> {
        (**self).post(path, body)
    }
}

/// HTTPS transport on a blocking `reqwest` client.
///
/// The gateway serves a self-signed certificate, so certificate validation
/// is disabled; the request timeout bounds an unresponsive device.
pub struct HttpTransport {
    base_url: String,
    password: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(host: &str, password: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            base_url: format!("https://{}", host),
            password: password.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn finish(response: reqwest::blocking::Response) -> Result<Response> {
        let status = response.status().as_u16();
        let body = response.bytes().map_err(transport_error)?;
        Ok(Response::new(status, body.to_vec()))
    }
}

impl Transport for HttpTransport {
    fn ping(&self) -> Result<u16> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .map_err(transport_error)?;
        Ok(response.status().as_u16())
    }

    fn get(&self, path: &str) -> Result<Response> {
        let response = self
            .client
            .get(self.url(path))
            .basic_auth(GATEWAY_USER, Some(&self.password))
            .send()
            .map_err(transport_error)?;
        Self::finish(response)
    }

    fn post(&self, path: &str, body: Vec<u8>) -> Result<Response> {
        let response = self
            .client
            .post(self.url(path))
            .basic_auth(GATEWAY_USER, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .map_err(transport_error)?;
        Self::finish(response)
    }
}

fn transport_error(err: reqwest::Error) -> TedapiError {
    TedapiError::Transport(err.to_string())
}
