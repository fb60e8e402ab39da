// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Powerwall 3 to MQTT bridge
//!
//! Polls the local gateway through [`tedapi`] and republishes the site as
//! Home Assistant devices using MQTT discovery.
//!
//! # Features
//!
//! - **Device discovery**: one system device plus one device per Powerwall
//! - **Availability aware**: pauses while Home Assistant is offline
//! - **Rate-limit backoff**: stretches the poll interval when throttled
//!
//! # Example
//!
//! ```rust,ignore
//! use pw3mqtt::{BridgeConfig, PollingCoordinator};
//!
//! let config = BridgeConfig::load(Some("pw3mqtt.toml".as_ref()))?;
//! let coordinator = PollingCoordinator::new(config.poll_interval(), availability_rx);
//! coordinator.run(&mut bridge)?;
//! ```

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod entity;
pub mod error;
pub mod mqtt;
pub mod publisher;

pub use bridge::{Bridge, BridgeOptions, DISCOVERY_SETTLE};
pub use config::{BridgeConfig, ConfigError};
pub use coordinator::{CoordinatorHandle, PollCycle, PollingCoordinator, BACKOFF_STEP};
pub use device::{Device, DeviceInfo, Origin, Powerwall, SiteSource, TeslaSystem};
pub use entity::{Entity, EntityKind, Platform};
pub use error::{BridgeError, Disposition, Result};
pub use mqtt::MqttPublisher;
pub use publisher::{Availability, Message, Publisher, OFFLINE, ONLINE};
