// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Home Assistant entities as described by MQTT device discovery.
//!
//! An entity either carries a value (published in the device state message
//! under its key) or only renders a template over other values.

use serde_json::{json, Map, Value};

/// Home Assistant platform of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Sensor,
    BinarySensor,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
        }
    }
}

/// Entity flavours used by the device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Battery,
    Connectivity,
    Current,
    Duration,
    EnergyStorage,
    PowerTemplate,
    PowerValue,
    Running,
    Timestamp,
    Voltage,
    /// No device class, plain value.
    Plain(Platform),
}

impl EntityKind {
    pub fn platform(self) -> Platform {
        match self {
            Self::Connectivity | Self::Running => Platform::BinarySensor,
            Self::Plain(platform) => platform,
            _ => Platform::Sensor,
        }
    }

    pub fn device_class(self) -> Option<&'static str> {
        match self {
            Self::Battery => Some("battery"),
            Self::Connectivity => Some("connectivity"),
            Self::Current => Some("current"),
            Self::Duration => Some("duration"),
            Self::EnergyStorage => Some("energy_storage"),
            Self::PowerTemplate | Self::PowerValue => Some("power"),
            Self::Running => Some("running"),
            Self::Timestamp => Some("timestamp"),
            Self::Voltage => Some("voltage"),
            Self::Plain(_) => None,
        }
    }

    pub fn unit(self) -> Option<&'static str> {
        match self {
            Self::Battery => Some("%"),
            Self::Current => Some("A"),
            Self::Duration => Some("s"),
            Self::EnergyStorage => Some("Wh"),
            Self::PowerTemplate | Self::PowerValue => Some("W"),
            Self::Voltage => Some("V"),
            _ => None,
        }
    }

    pub fn state_class(self) -> Option<&'static str> {
        match self {
            Self::PowerTemplate | Self::PowerValue => Some("measurement"),
            _ => None,
        }
    }

    /// Template entities have no value of their own.
    pub fn holds_value(self) -> bool {
        !matches!(self, Self::PowerTemplate)
    }
}

/// A single discoverable entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    kind: EntityKind,
    key: String,
    name: String,
    unique_id: String,
    template: String,
    enabled: bool,
    value: Option<Value>,
}

impl Entity {
    /// Value entity published under the snake-cased name.
    pub fn new(kind: EntityKind, id_prefix: &str, name: &str) -> Self {
        let key = snake_case(name);
        Self {
            kind,
            unique_id: format!("{}_{}", id_prefix, key),
            template: key.clone(),
            key,
            name: name.to_string(),
            enabled: true,
            value: None,
        }
    }

    /// Publish under `key` instead of the snake-cased name.
    pub fn keyed(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self.template = key.to_string();
        self
    }

    /// Value template expression; for template entities the whole Jinja
    /// expression, otherwise the path below `value_json`.
    pub fn template(mut self, template: &str) -> Self {
        self.template = template.to_string();
        self
    }

    /// Disabled by default in Home Assistant.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Component and state key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn set(&mut self, value: impl Into<Value>) {
        self.value = Some(value.into());
    }

    /// Binary sensors report `ON` / `OFF`.
    pub fn set_flag(&mut self, on: bool) {
        self.set(if on { "ON" } else { "OFF" });
    }

    pub fn clear(&mut self) {
        self.value = None;
    }

    /// Discovery component (`cmps` entry).
    pub fn discovery(&self) -> Value {
        let template = if self.kind.holds_value() {
            format!("{{{{ value_json.{} }}}}", self.template)
        } else {
            format!("{{{{ {} }}}}", self.template)
        };

        let mut msg = Map::new();
        msg.insert("p".into(), json!(self.kind.platform().as_str()));
        msg.insert("value_template".into(), json!(template));
        msg.insert("unique_id".into(), json!(self.unique_id));
        msg.insert("name".into(), json!(self.name));
        if let Some(class) = self.kind.device_class() {
            msg.insert("device_class".into(), json!(class));
        }
        if let Some(unit) = self.kind.unit() {
            msg.insert("unit_of_measurement".into(), json!(unit));
        }
        if let Some(class) = self.kind.state_class() {
            msg.insert("state_class".into(), json!(class));
        }
        if !self.enabled {
            msg.insert("en".into(), json!("false"));
        }
        Value::Object(msg)
    }
}

fn snake_case(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}
