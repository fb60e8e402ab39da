// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway client integration tests
//!
//! Identity pinning, status mapping and the rate-limit cooldown.

mod common;

use common::{client_config, MockGateway, LEADER_DIN};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tedapi::{GatewayClient, TedapiError};

fn connected(gateway: &Arc<MockGateway>, cooldown: Duration) -> GatewayClient<Arc<MockGateway>> {
    let client = GatewayClient::new(Arc::clone(gateway), client_config(cooldown));
    client.connect().unwrap();
    client
}

#[test]
fn test_connect_is_idempotent() {
    let gateway = MockGateway::powerwall3();
    let client = connected(&gateway, Duration::from_secs(300));
    client.connect().unwrap();
    client.connect().unwrap();

    assert_eq!(gateway.pings.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(gateway.wire_calls(), 1, "DIN fetched once");
    assert_eq!(client.din().as_deref(), Some(LEADER_DIN));
}

#[test]
fn test_generation_detection() {
    let pw3 = MockGateway::powerwall3();
    assert!(connected(&pw3, Duration::from_secs(1)).is_powerwall3());

    let legacy = MockGateway::legacy();
    assert!(!connected(&legacy, Duration::from_secs(1)).is_powerwall3());
}

#[test]
fn test_rate_limit_engages_cooldown() {
    let gateway = MockGateway::powerwall3();
    let client = connected(&gateway, Duration::from_secs(300));

    gateway.script(&[429]);
    let err = client.post("tedapi/v1", b"{}".to_vec(), false).unwrap_err();
    assert!(matches!(err, TedapiError::RateLimiting));

    let remaining = client.cooldown_remaining().expect("cooldown running");
    assert!(remaining > Duration::from_secs(295));

    // a second, unforced call shortly after never reaches the wire
    thread::sleep(Duration::from_millis(20));
    let before = gateway.wire_calls();
    let err = client.post("tedapi/v1", b"{}".to_vec(), false).unwrap_err();
    assert!(matches!(err, TedapiError::RateLimited));
    let err = client.request("tedapi/din", false).unwrap_err();
    assert!(matches!(err, TedapiError::RateLimited));
    assert_eq!(gateway.wire_calls(), before);
}

#[test]
fn test_call_queued_behind_rate_limited_call_fails_fast() {
    let gateway = MockGateway::powerwall3();
    let client = Arc::new(connected(&gateway, Duration::from_secs(300)));
    gateway.set_post_delay(Duration::from_millis(200));
    gateway.script(&[429]);

    let first = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.post("tedapi/v1", b"{}".to_vec(), false))
    };
    // the second call passes the early check, then waits on the transport
    thread::sleep(Duration::from_millis(50));
    let second = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.post("tedapi/v1", b"{}".to_vec(), false))
    };

    assert!(matches!(first.join().unwrap(), Err(TedapiError::RateLimiting)));
    assert!(matches!(second.join().unwrap(), Err(TedapiError::RateLimited)));
    assert_eq!(gateway.post_count(), 1);
    assert!(client.cooldown_remaining().is_some());
}

#[test]
fn test_service_unavailable_is_rate_limiting() {
    let gateway = MockGateway::powerwall3();
    let client = connected(&gateway, Duration::from_secs(60));

    gateway.script(&[503]);
    let err = client.request("tedapi/din", false).unwrap_err();
    assert!(matches!(err, TedapiError::RateLimiting));
    assert!(client.cooldown_remaining().is_some());
}

#[test]
fn test_forced_call_bypasses_cooldown() {
    let gateway = MockGateway::powerwall3();
    let client = connected(&gateway, Duration::from_secs(300));

    gateway.script(&[429]);
    assert!(client.post("tedapi/v1", b"{}".to_vec(), false).is_err());

    let before = gateway.post_count();
    let remaining = client.cooldown_remaining().expect("cooldown running");
    assert!(client.last_success().is_none());
    client
        .post("tedapi/v1", br#"{"operation":"config","recipient":"x"}"#.to_vec(), true)
        .unwrap();
    assert_eq!(gateway.post_count(), before + 1);
    // the deadline is left where the 429 put it
    let after = client.cooldown_remaining().expect("cooldown running");
    assert!(after <= remaining && remaining - after < Duration::from_secs(1));

    // an unrelated success does not lift the running cooldown
    let err = client.post("tedapi/v1", b"{}".to_vec(), false).unwrap_err();
    assert!(matches!(err, TedapiError::RateLimited));
    assert!(client.last_success().is_some());
}

#[test]
fn test_cooldown_expires() {
    let gateway = MockGateway::powerwall3();
    let client = connected(&gateway, Duration::from_millis(50));

    gateway.script(&[429]);
    assert!(client.request("tedapi/din", false).is_err());
    assert!(matches!(
        client.request("tedapi/din", false),
        Err(TedapiError::RateLimited)
    ));

    thread::sleep(Duration::from_millis(80));
    assert!(client.request("tedapi/din", false).is_ok());
    assert_eq!(client.cooldown_remaining(), None);
}

#[test]
fn test_status_mapping() {
    let gateway = MockGateway::powerwall3();
    let client = connected(&gateway, Duration::from_secs(300));

    gateway.script(&[403]);
    assert!(matches!(
        client.request("tedapi/din", false),
        Err(TedapiError::AccessDenied)
    ));

    gateway.script(&[500]);
    assert!(matches!(
        client.request("tedapi/din", false),
        Err(TedapiError::Protocol { status: 500 })
    ));

    // neither engages the cooldown
    assert_eq!(client.cooldown_remaining(), None);
}

#[test]
fn test_identity_change_is_fatal() {
    let gateway = MockGateway::powerwall3();
    let client = connected(&gateway, Duration::from_secs(300));

    gateway.set_din("1707000-11-J--TG9999999999");

    assert_eq!(client.identify(false).unwrap(), LEADER_DIN);
    let err = client.identify(true).unwrap_err();
    assert!(err.is_fatal());
    match err {
        TedapiError::IdentityChanged { previous, current } => {
            assert_eq!(previous, LEADER_DIN);
            assert_eq!(current, "1707000-11-J--TG9999999999");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(client.din().as_deref(), Some(LEADER_DIN));
}
