// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed views over the few gateway documents the client itself interprets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Firmware document as returned by the firmware operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    #[serde(default)]
    pub gateway: GatewayHardware,
    #[serde(default)]
    pub din: String,
    #[serde(default)]
    pub version: FirmwareVersion,
    #[serde(default)]
    pub wireless: Wireless,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHardware {
    #[serde(default)]
    pub part_number: String,
    #[serde(default)]
    pub serial_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub githash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wireless {
    #[serde(default)]
    pub device: Vec<WirelessDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessDevice {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub fcc_id: String,
    #[serde(default)]
    pub ic: String,
}

impl FirmwareInfo {
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }
}

/// Entry of the `battery_blocks` list of the site configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryBlock {
    /// `<part number>--<serial number>`; doubles as the device DIN.
    pub vin: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl BatteryBlock {
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }

    /// Part number half of the VIN.
    pub fn part_number(&self) -> &str {
        self.vin.split_once("--").map_or(self.vin.as_str(), |(part, _)| part)
    }

    /// Serial number half of the VIN.
    pub fn serial_number(&self) -> &str {
        self.vin.split_once("--").map_or("", |(_, serial)| serial)
    }
}

/// Follow `keys` through nested JSON objects.
pub fn lookup<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |current, key| current.get(*key))
}
