// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory site and broker shared by the integration tests.

#![allow(dead_code)]

use pw3mqtt::{BridgeError, Publisher};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tedapi::{Document, FirmwareInfo, TedapiError};

pub const SYSTEM_VIN: &str = "1232100-00-E--TG0123456789";
pub const SYSTEM_ID: &str = "TeslaEnergySystem_1232100-00-E--TG0123456789";
pub const PW1_VIN: &str = "1707000-11-J--TG1234";
pub const PW2_VIN: &str = "1707000-11-J--TG5678";

pub fn config_doc() -> Value {
    json!({
        "vin": SYSTEM_VIN,
        "site_info": {
            "site_name": "Home",
            "battery_commission_date": "2024-05-01T10:00:00-07:00",
            "nominal_system_power_ac": 11.5,
            "backup_reserve_percent": 21
        },
        "battery_blocks": [
            {"vin": PW1_VIN, "type": "Powerwall3"},
            {"vin": PW2_VIN, "type": "Powerwall3"}
        ]
    })
}

pub fn status_doc() -> Value {
    json!({
        "esCan": {"bus": {"ISLANDER": {"ISLAND_GridConnection": {
            "ISLAND_GridConnected": "ISLAND_GridConnected_Connected"
        }}}},
        "control": {
            "alerts": {"active": ["SystemConnectedToGrid"]},
            "systemStatus": {
                "nominalFullPackEnergyWh": 27000,
                "nominalEnergyRemainingWh": 14850
            },
            "meterAggregates": [
                {"location": "SITE", "realPowerW": -120.456},
                {"location": "SOLAR", "realPowerW": 3200},
                {"location": "BATTERY", "realPowerW": -1500},
                {"location": "LOAD", "realPowerW": 1579.544}
            ]
        }
    })
}

pub fn firmware_doc() -> Value {
    json!({
        "gateway": {"partNumber": "1841000-01-A", "serialNumber": "GF2230"},
        "din": SYSTEM_VIN,
        "version": {"text": "25.10.1 1234abcd", "githash": "1234abcd"},
        "wireless": {"device": []}
    })
}

pub fn vitals_doc() -> Value {
    json!({
        "components": {
            "bms": [{"signals": [
                {"name": "BMS_nominalEnergyRemaining", "value": 6.75},
                {"name": "BMS_nominalFullPackEnergy", "value": 13.5}
            ]}],
            "pch": [{"signals": [
                {"name": "PCH_PvState_A", "textValue": "PV_Active"},
                {"name": "PCH_PvVoltageA", "value": 350.123},
                {"name": "PCH_PvCurrentA", "value": 4.5},
                {"name": "PCH_PvVoltageB", "value": -1.0},
                {"name": "PCH_PvCurrentB", "value": 0.2}
            ]}]
        }
    })
}

/// Site answering from fixed documents.
pub struct FakeSite {
    pub config: Mutex<Value>,
    pub status: Mutex<Value>,
    pub firmware: Mutex<Value>,
    pub vitals: Mutex<Value>,
    failing_vitals: Mutex<HashSet<String>>,
    status_error: Mutex<Option<TedapiError>>,
    pub vitals_calls: Mutex<HashMap<String, usize>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(config_doc()),
            status: Mutex::new(status_doc()),
            firmware: Mutex::new(firmware_doc()),
            vitals: Mutex::new(vitals_doc()),
            failing_vitals: Mutex::new(HashSet::new()),
            status_error: Mutex::new(None),
            vitals_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_vitals(&self, din: &str) {
        self.failing_vitals.lock().unwrap().insert(din.to_string());
    }

    pub fn fail_status(&self, error: TedapiError) {
        *self.status_error.lock().unwrap() = Some(error);
    }

    pub fn vitals_calls(&self, din: &str) -> usize {
        self.vitals_calls
            .lock()
            .unwrap()
            .get(din)
            .copied()
            .unwrap_or(0)
    }
}

impl pw3mqtt::SiteSource for FakeSite {
    fn site_config(&self) -> tedapi::Result<Document> {
        Ok(Arc::new(self.config.lock().unwrap().clone()))
    }

    fn site_status(&self) -> tedapi::Result<Document> {
        if let Some(e) = self.status_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(Arc::new(self.status.lock().unwrap().clone()))
    }

    fn site_firmware(&self) -> tedapi::Result<FirmwareInfo> {
        Ok(FirmwareInfo::from_value(&self.firmware.lock().unwrap())?)
    }

    fn device_vitals(&self, din: &str) -> tedapi::Result<Document> {
        *self
            .vitals_calls
            .lock()
            .unwrap()
            .entry(din.to_string())
            .or_insert(0) += 1;
        if self.failing_vitals.lock().unwrap().contains(din) {
            return Err(TedapiError::Protocol { status: 500 });
        }
        Ok(Arc::new(self.vitals.lock().unwrap().clone()))
    }
}

/// Publisher recording every message.
#[derive(Default)]
pub struct RecordingPublisher {
    pub messages: Mutex<Vec<(String, Value)>>,
    pub failing: AtomicBool,
    pub attempts: AtomicUsize,
}

impl RecordingPublisher {
    pub fn topics(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str) -> pw3mqtt::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Publish {
                topic: topic.to_string(),
                reason: "broker gone".into(),
            });
        }
        let payload: Value = serde_json::from_str(payload).expect("json payload");
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}
