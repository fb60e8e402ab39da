// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static table of gateway operations.
//!
//! Each operation has a fixed slot index, a cache tier and a scope. System
//! operations own one lock slot each; device-scoped operations get one slot
//! per device DIN, created the first time that DIN is queried.

use crate::cache::CacheTier;

/// Named gateway query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Site configuration document (`config.json`).
    Config,
    /// Device controller status query.
    Status,
    /// Status plus component and meter details.
    DeviceController,
    /// Firmware and gateway hardware identity.
    Firmware,
    /// Powerwall 3 component signals of the leader unit.
    Components,
    /// Per-device battery block information.
    BatteryBlock,
    /// Per-device live vitals.
    Vitals,
}

impl Operation {
    /// Operations addressed to the leader gateway, in slot order.
    pub const SYSTEM: [Operation; 5] = [
        Operation::Config,
        Operation::Status,
        Operation::DeviceController,
        Operation::Firmware,
        Operation::Components,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Status => "status",
            Self::DeviceController => "device_controller",
            Self::Firmware => "firmware",
            Self::Components => "components",
            Self::BatteryBlock => "battery_block",
            Self::Vitals => "vitals",
        }
    }

    pub fn tier(self) -> CacheTier {
        match self {
            Self::Config | Self::Firmware => CacheTier::Config,
            _ => CacheTier::Telemetry,
        }
    }

    /// Addressed to a single device rather than the whole system.
    pub fn is_device_scoped(self) -> bool {
        matches!(self, Self::BatteryBlock | Self::Vitals)
    }

    /// Only valid when the gateway is a Powerwall 3.
    pub fn requires_powerwall3(self) -> bool {
        matches!(self, Self::Components | Self::BatteryBlock)
    }

    /// Slot in the static lock table; `None` for device-scoped operations.
    pub(crate) fn slot(self) -> Option<usize> {
        Self::SYSTEM.iter().position(|op| *op == self)
    }

    /// Lock/cache key, e.g. `status` or `vitals(1707000-11-J--TG1234)`.
    pub fn key(self, din: Option<&str>) -> String {
        match din {
            Some(din) if self.is_device_scoped() => format!("{}({})", self.name(), din),
            _ => self.name().to_string(),
        }
    }
}

/// A single encoded call to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub operation: Operation,
    /// DIN of the leader gateway when addressing a follower device.
    pub sender: Option<&'a str>,
    /// DIN of the device the call is for.
    pub recipient: &'a str,
}

impl<'a> Request<'a> {
    pub fn system(operation: Operation, din: &'a str) -> Self {
        Self {
            operation,
            sender: None,
            recipient: din,
        }
    }

    pub fn device(operation: Operation, leader: &'a str, device: &'a str) -> Self {
        Self {
            operation,
            sender: Some(leader),
            recipient: device,
        }
    }

    /// Gateway path the request is posted to.
    pub fn path(&self) -> String {
        if self.operation.is_device_scoped() {
            format!("tedapi/device/{}/v1", self.recipient)
        } else {
            "tedapi/v1".to_string()
        }
    }
}
