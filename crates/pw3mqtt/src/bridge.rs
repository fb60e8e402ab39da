// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fetch-and-publish cycle tying the gateway to the broker.

use crate::coordinator::PollCycle;
use crate::device::{Origin, SiteSource, TeslaSystem};
use crate::error::Result;
use crate::publisher::{Message, Publisher};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after discovery so Home Assistant registers entities before states.
pub const DISCOVERY_SETTLE: Duration = Duration::from_millis(500);

/// Topics and identity used when publishing.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Discovery prefix.
    pub prefix: String,
    /// Last-will topic of the MQTT session.
    pub will_topic: String,
    pub origin: Origin,
    pub settle: Duration,
}

/// One Tesla system published to one broker.
pub struct Bridge<S, P> {
    source: S,
    publisher: P,
    system: TeslaSystem,
    options: BridgeOptions,
}

impl<S: SiteSource, P: Publisher> Bridge<S, P> {
    pub fn new(source: S, publisher: P, system: TeslaSystem, options: BridgeOptions) -> Self {
        Self {
            source,
            publisher,
            system,
            options,
        }
    }

    pub fn system(&self) -> &TeslaSystem {
        &self.system
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Publish discovery messages of every device.
    pub fn discover(&self) {
        let messages = self.system.discoveries(
            &self.options.prefix,
            &self.options.will_topic,
            &self.options.origin,
        );
        for message in &messages {
            if self.send(message) {
                info!("Discovery sent to '{}'", message.topic);
            }
        }

        if !self.options.settle.is_zero() {
            info!(
                "Sleeping {:?} to allow Home Assistant to process discovery",
                self.options.settle
            );
            std::thread::sleep(self.options.settle);
        }
    }

    /// Publish the current state of every device, without fetching.
    pub fn publish_states(&self) {
        for message in self.system.states(&self.options.prefix) {
            if self.send(&message) {
                info!("Sent message to '{}'", message.topic);
            }
        }
    }

    /// Refresh from the gateway, then publish.
    pub fn refresh(&mut self) -> Result<()> {
        self.system.update(&self.source)?;
        self.publish_states();
        Ok(())
    }

    /// A failed publish is logged; the next cycle sends fresh values anyway.
    fn send(&self, message: &Message) -> bool {
        let payload = message.payload.to_string();
        match self.publisher.publish(&message.topic, &payload) {
            Ok(()) => {
                debug!(message = %payload, "Published");
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

impl<S: SiteSource, P: Publisher> PollCycle for Bridge<S, P> {
    fn announce(&mut self) -> Result<()> {
        self.discover();
        self.publish_states();
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        self.refresh()
    }
}
