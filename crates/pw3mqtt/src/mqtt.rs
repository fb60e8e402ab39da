// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT publisher on top of `rumqttc`.
//!
//! The connection is driven by a dedicated thread. On every (re)connect it
//! subscribes to the Home Assistant status topic and forwards `online` /
//! `offline` payloads as [`Availability`] events.
//!
//! With `mqtt_verify_tls = false` the broker certificate is accepted without
//! any check, for brokers using self-signed certificates.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::{Availability, Publisher, OFFLINE};
use crossbeam::channel::Sender;
use rumqttc::{
    Client, Connection, Event, LastWill, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration,
    Transport,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outgoing request queue depth of the client.
const REQUEST_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Random client id, as several bridges may share a broker.
pub fn client_id() -> String {
    format!("pw3mqtt-{}", fastrand::u32(0..=1000))
}

/// Topic carrying the last will of `client_id`.
pub fn will_topic(client_id: &str) -> String {
    format!("{}/will", client_id)
}

/// Connected MQTT publisher.
pub struct MqttPublisher {
    client: Client,
    will_topic: String,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    /// Connect to the broker named in `config`.
    ///
    /// Availability changes of Home Assistant are sent on `availability`.
    pub fn connect(
        config: &BridgeConfig,
        client_id: &str,
        availability: Sender<Availability>,
    ) -> Result<Self> {
        let host = config
            .mqtt_host
            .clone()
            .ok_or_else(|| BridgeError::Mqtt("mqtt_host not set".into()))?;
        let will_topic = will_topic(client_id);

        let mut options = MqttOptions::new(client_id, host.clone(), config.mqtt_port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_last_will(LastWill::new(
            will_topic.clone(),
            OFFLINE,
            QoS::AtMostOnce,
            false,
        ));
        debug!(topic = %will_topic, payload = OFFLINE, "MQTT will set");
        if let (Some(user), Some(pass)) = (&config.mqtt_username, &config.mqtt_password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        if config.mqtt_ssl {
            options.set_transport(tls_transport(config)?);
        }

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let stopping = Arc::new(AtomicBool::new(false));

        let status_topic = config.status_topic();
        let endpoint = format!("{}:{}", host, config.mqtt_port);
        let thread = {
            let client = client.clone();
            let stopping = Arc::clone(&stopping);
            std::thread::Builder::new()
                .name("pw3mqtt-mqtt".into())
                .spawn(move || {
                    event_loop(connection, client, &status_topic, &endpoint, &availability, &stopping)
                })
                .map_err(|e| BridgeError::Mqtt(format!("failed to spawn thread: {}", e)))?
        };

        Ok(Self {
            client,
            will_topic,
            stopping,
            thread: Some(thread),
        })
    }

    pub fn will_topic(&self) -> &str {
        &self.will_topic
    }

    /// Disconnect and wait for the connection thread.
    pub fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            debug!("MQTT disconnect failed: {}", e);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BridgeError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

fn tls_transport(config: &BridgeConfig) -> Result<Transport> {
    // rumqttc builds its own rustls config from the process-wide provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let read = |path: &str| {
        std::fs::read(path).map_err(|e| BridgeError::Mqtt(format!("cannot read '{}': {}", path, e)))
    };
    let client_auth = match (config.mqtt_cert.as_deref(), config.mqtt_key.as_deref()) {
        (Some(cert), Some(key)) => Some((read(cert)?, read(key)?)),
        _ => None,
    };

    if !config.mqtt_verify_tls {
        warn!("MQTT broker certificate verification disabled");
        return unverified_tls(client_auth);
    }

    let Some(ca_path) = config.mqtt_ca.as_deref() else {
        return Ok(Transport::tls_with_default_config());
    };
    Ok(Transport::tls_with_config(TlsConfiguration::Simple {
        ca: read(ca_path)?,
        alpn: None,
        client_auth,
    }))
}

/// TLS accepting any broker certificate, with optional client auth.
fn unverified_tls(client_auth: Option<(Vec<u8>, Vec<u8>)>) -> Result<Transport> {
    let tls_error = |e: &dyn std::fmt::Display| BridgeError::Mqtt(format!("TLS setup failed: {}", e));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(&e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyBroker { provider }));

    let tls = match client_auth {
        Some((cert_pem, key_pem)) => {
            let certs = CertificateDer::pem_slice_iter(&cert_pem)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| tls_error(&e))?;
            let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| tls_error(&e))?;
            builder.with_client_auth_cert(certs, key).map_err(|e| tls_error(&e))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(tls))))
}

/// Certificate verifier that trusts every broker.
#[derive(Debug)]
struct AcceptAnyBroker {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyBroker {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn event_loop(
    mut connection: Connection,
    client: Client,
    status_topic: &str,
    endpoint: &str,
    availability: &Sender<Availability>,
    stopping: &AtomicBool,
) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker '{}'", endpoint);
                match client.try_subscribe(status_topic, QoS::AtMostOnce) {
                    Ok(()) => info!("Subscribed to MQTT topic '{}'", status_topic),
                    Err(e) => error!("Failed to subscribe to '{}': {}", status_topic, e),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == status_topic => {
                let status = Availability::from_payload(&publish.payload);
                debug!(?status, "Home Assistant status");
                if availability.send(status).is_err() {
                    debug!("Availability receiver gone");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                warn!("MQTT connection error: {}", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    debug!("MQTT connection thread exiting");
}
