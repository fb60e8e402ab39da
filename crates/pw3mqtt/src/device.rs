// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Home Assistant devices built from gateway documents.
//!
//! ```text
//! TeslaSystem (TeslaEnergySystem_<vin>)
//!   +-- Powerwall (<type>_<vin>)   one per battery block, via the system
//!   +-- Powerwall ...
//! ```
//!
//! Each device publishes one discovery message
//! (`<prefix>/device/<id>/config`) and one state message
//! (`<prefix>/device/<id>/state`).

use crate::entity::{Entity, EntityKind, Platform};
use crate::error::{BridgeError, Result};
use crate::publisher::{Message, OFFLINE, ONLINE};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tedapi::{lookup, BatteryBlock, CachedQueryService, Codec, Document, FirmwareInfo, Transport};
use tracing::{debug, info, warn};

const MANUFACTURER: &str = "Tesla";
const MODEL: &str = "Powerwall3";
const PV_STRINGS: [char; 6] = ['A', 'B', 'C', 'D', 'E', 'F'];

/// Gateway documents the device model reads.
pub trait SiteSource {
    fn site_config(&self) -> tedapi::Result<Document>;
    fn site_status(&self) -> tedapi::Result<Document>;
    fn site_firmware(&self) -> tedapi::Result<FirmwareInfo>;
    fn device_vitals(&self, din: &str) -> tedapi::Result<Document>;
}

impl<T: Transport, C: Codec> SiteSource for CachedQueryService<T, C> {
    fn site_config(&self) -> tedapi::Result<Document> {
        self.config(false)
    }

    fn site_status(&self) -> tedapi::Result<Document> {
        self.status(false)
    }

    fn site_firmware(&self) -> tedapi::Result<FirmwareInfo> {
        self.firmware_info(false)
    }

    fn device_vitals(&self, din: &str) -> tedapi::Result<Document> {
        self.vitals(din, false)
    }
}

impl<S: SiteSource + ?Sized> SiteSource for std::sync::Arc<S> {
    fn site_config(&self) -> tedapi::Result<Document> {
        (**self).site_config()
    }

    fn site_status(&self) -> tedapi::Result<Document> {
        (**self).site_status()
    }

    fn site_firmware(&self) -> tedapi::Result<FirmwareInfo> {
        (**self).site_firmware()
    }

    fn device_vitals(&self, din: &str) -> tedapi::Result<Document> {
        (**self).device_vitals(din)
    }
}

/// Origin block (`o`) of discovery messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Origin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sw: None,
            url: None,
        }
    }

    pub fn with_version(mut self, sw: impl Into<String>) -> Self {
        self.sw = Some(sw.into());
        self
    }
}

/// Identity shared by every device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    id: String,
    name: String,
    via: Option<String>,
    updated: bool,
}

impl DeviceInfo {
    fn new(id: String, name: String, via: Option<String>) -> Self {
        Self {
            id,
            name,
            via,
            updated: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent device id.
    pub fn via(&self) -> Option<&str> {
        self.via.as_deref()
    }

    /// Whether the last update completed.
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn config_topic(&self, prefix: &str) -> String {
        format!("{}/device/{}/config", prefix, self.id)
    }

    pub fn state_topic(&self, prefix: &str) -> String {
        format!("{}/device/{}/state", prefix, self.id)
    }
}

/// A discoverable Home Assistant device.
pub trait Device {
    fn info(&self) -> &DeviceInfo;

    /// Every entity, keyed in discovery by [`Entity::key`].
    fn components(&self) -> Vec<&Entity>;

    /// Manufacturer and model fields of the `dev` block.
    fn hardware(&self) -> Map<String, Value>;

    /// Entity values of the state message.
    fn values(&self) -> Map<String, Value>;

    fn discovery(&self, prefix: &str, will_topic: &str, origin: &Origin) -> Message {
        let info = self.info();
        let state_topic = info.state_topic(prefix);

        let mut dev = Map::new();
        dev.insert("ids".into(), json!(info.id));
        dev.insert("name".into(), json!(info.name));
        if let Some(via) = info.via() {
            dev.insert("via_device".into(), json!(via));
        }
        dev.extend(self.hardware());

        let cmps: Map<String, Value> = self
            .components()
            .into_iter()
            .map(|entity| (entity.key().to_string(), entity.discovery()))
            .collect();

        Message::new(
            info.config_topic(prefix),
            json!({
                "dev": dev,
                "state_topic": state_topic,
                "availability": [
                    {"topic": state_topic, "value_template": "{{ value_json.mqtt_availability }}"},
                    {"topic": will_topic},
                ],
                "o": origin,
                "cmps": cmps,
            }),
        )
    }

    fn state(&self, prefix: &str) -> Message {
        let info = self.info();
        let availability = if info.is_updated() { ONLINE } else { OFFLINE };

        let mut payload = Map::new();
        payload.insert("mqtt_availability".into(), json!(availability));
        payload.extend(self.values());
        Message::new(info.state_topic(prefix), Value::Object(payload))
    }
}

/// The energy system as a whole, parent of every Powerwall.
#[derive(Debug, Clone)]
pub struct TeslaSystem {
    info: DeviceInfo,
    vin: String,
    serial: String,
    part_number: String,
    firmware_version: String,
    report_vitals: bool,

    battery: Entity,
    battery_capacity: Entity,
    battery_power: Entity,
    battery_remaining: Entity,
    battery_reserve_hidden: Entity,
    battery_reserve_user: Entity,
    battery_time_remaining: Entity,
    calibration: Entity,
    commission_date: Entity,
    grid_power: Entity,
    grid_status: Entity,
    inverter_capacity: Entity,
    load_power: Entity,
    solar_power: Entity,

    battery_power_in: Entity,
    battery_power_out: Entity,
    grid_power_in: Entity,
    grid_power_out: Entity,

    powerwalls: Vec<Powerwall>,
}

impl TeslaSystem {
    /// Build the device tree from the site configuration.
    pub fn new<S: SiteSource + ?Sized>(source: &S, report_vitals: bool) -> Result<Self> {
        let firmware = source.site_firmware()?;
        let config = source.site_config()?;
        debug!(config = %config, "Site configuration");

        let vin = text(&config, "config", &["vin"])?.to_string();
        let site_name = text(&config, "config", &["site_info", "site_name"])?.to_string();
        let id = format!("TeslaEnergySystem_{}", vin);

        let powerwalls = battery_blocks(&config)?
            .iter()
            .map(|block| Powerwall::new(&id, block, &site_name))
            .collect::<Vec<_>>();
        if powerwalls.is_empty() {
            info!("No battery blocks in site configuration, reporting the system only");
        }

        let sensor = |kind, name| Entity::new(kind, &id, name);
        let template = |name, key, expr| {
            Entity::new(EntityKind::PowerTemplate, &id, name)
                .keyed(key)
                .template(expr)
                .disabled()
        };

        Ok(Self {
            battery: sensor(EntityKind::Battery, "Battery"),
            battery_capacity: sensor(EntityKind::EnergyStorage, "Battery Capacity"),
            battery_power: sensor(EntityKind::PowerValue, "Battery Power"),
            battery_remaining: sensor(EntityKind::EnergyStorage, "Battery Remaining"),
            battery_reserve_hidden: sensor(EntityKind::EnergyStorage, "Battery Hidden Reserve")
                .keyed("battery_reserve_hidden"),
            battery_reserve_user: sensor(EntityKind::Battery, "Battery Reserve")
                .keyed("battery_reserve_user"),
            battery_time_remaining: sensor(EntityKind::Duration, "Battery Time Remaining"),
            calibration: sensor(EntityKind::Running, "Calibration"),
            commission_date: sensor(EntityKind::Timestamp, "Commission Date"),
            grid_power: sensor(EntityKind::PowerValue, "Grid Power"),
            grid_status: sensor(EntityKind::Connectivity, "Grid Status"),
            inverter_capacity: sensor(EntityKind::PowerValue, "Inverter Capacity"),
            load_power: sensor(EntityKind::PowerValue, "Load Power"),
            solar_power: sensor(EntityKind::PowerValue, "Solar Power"),

            battery_power_in: template(
                "Battery Power Charge",
                "battery_power_in",
                "[ value_json.battery_power | int, 0 ] | min | abs",
            ),
            battery_power_out: template(
                "Battery Power Discharge",
                "battery_power_out",
                "[ value_json.battery_power | int, 0 ] | max",
            ),
            grid_power_in: template(
                "Grid Power Import",
                "grid_power_in",
                "[ value_json.grid_power | int, 0 ] | max",
            ),
            grid_power_out: template(
                "Grid Power Export",
                "grid_power_out",
                "[ value_json.grid_power | int, 0 ] | min | abs",
            ),

            info: DeviceInfo::new(id.clone(), site_name, None),
            vin,
            serial: firmware.gateway.serial_number,
            part_number: firmware.gateway.part_number,
            firmware_version: firmware.version.text,
            report_vitals,
            powerwalls,
        })
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    /// Child devices, in battery block order.
    pub fn children(&self) -> &[Powerwall] {
        &self.powerwalls
    }

    /// Refresh every value from the gateway.
    ///
    /// A Powerwall failing to update is logged and does not fail the system
    /// update.
    pub fn update<S: SiteSource + ?Sized>(&mut self, source: &S) -> Result<()> {
        self.info.updated = false;

        let firmware = source.site_firmware()?;
        let config = source.site_config()?;
        let status = source.site_status()?;
        debug!(status = %status, "Site status");

        self.serial = firmware.gateway.serial_number;
        self.part_number = firmware.gateway.part_number;
        self.firmware_version = firmware.version.text;

        // site configuration
        let site_name = text(&config, "config", &["site_info", "site_name"])?.to_string();
        self.info.name = site_name.clone();
        self.commission_date
            .set(text(&config, "config", &["site_info", "battery_commission_date"])?);
        let nominal_ac = number(&config, "config", &["site_info", "nominal_system_power_ac"])?;
        self.inverter_capacity.set(to_json(nominal_ac * 1000.0));
        let backup_reserve = number(&config, "config", &["site_info", "backup_reserve_percent"])?;
        self.battery_reserve_user
            .set((backup_reserve * 100.0 / 105.0).trunc() as i64);

        // controller status
        let grid = text(
            &status,
            "status",
            &["esCan", "bus", "ISLANDER", "ISLAND_GridConnection", "ISLAND_GridConnected"],
        )?;
        self.grid_status
            .set_flag(grid == "ISLAND_GridConnected_Connected");

        let alerts = field(&status, "status", &["control", "alerts", "active"])?
            .as_array()
            .ok_or_else(|| BridgeError::mapping("status", "control.alerts.active"))?;
        self.calibration
            .set_flag(alerts.iter().any(|alert| alert == "BatteryCalibration"));

        let full_pack = number(
            &status,
            "status",
            &["control", "systemStatus", "nominalFullPackEnergyWh"],
        )?;
        let remaining = number(
            &status,
            "status",
            &["control", "systemStatus", "nominalEnergyRemainingWh"],
        )?;
        // the gateway keeps a 5% reserve it never reports as usable
        let hidden = (full_pack / 20.0).trunc();
        let capacity = full_pack - hidden;
        let usable = remaining - hidden;
        self.battery_reserve_hidden.set(to_json(hidden));
        self.battery_capacity.set(to_json(capacity));
        self.battery_remaining.set(to_json(usable));

        let meters = field(&status, "status", &["control", "meterAggregates"])?
            .as_array()
            .ok_or_else(|| BridgeError::mapping("status", "control.meterAggregates"))?;
        let load = meter_power(meters, "LOAD")?;
        self.grid_power.set(to_json(round2(meter_power(meters, "SITE")?)));
        self.solar_power.set(to_json(round2(meter_power(meters, "SOLAR")?)));
        self.battery_power.set(to_json(round2(meter_power(meters, "BATTERY")?)));
        self.load_power.set(to_json(round2(load)));

        if capacity != 0.0 {
            self.battery.set((usable * 100.0 / capacity).trunc() as i64);
        } else {
            self.battery.clear();
        }
        if round2(load) != 0.0 {
            self.battery_time_remaining
                .set((usable * 3600.0 / round2(load)).round() as i64);
        } else {
            self.battery_time_remaining.clear();
        }

        self.info.updated = true;

        if self.report_vitals {
            for powerwall in &mut self.powerwalls {
                if let Err(e) = powerwall.update(source, &site_name) {
                    warn!(
                        vin = %powerwall.vin,
                        error = %e,
                        "Failed to update Powerwall level metrics"
                    );
                }
            }
        }
        Ok(())
    }

    /// Discovery messages of the system followed by every child.
    pub fn discoveries(&self, prefix: &str, will_topic: &str, origin: &Origin) -> Vec<Message> {
        std::iter::once(self.discovery(prefix, will_topic, origin))
            .chain(
                self.powerwalls
                    .iter()
                    .map(|pw| pw.discovery(prefix, will_topic, origin)),
            )
            .collect()
    }

    /// State messages; children only when vitals are reported.
    pub fn states(&self, prefix: &str) -> Vec<Message> {
        let mut messages = vec![self.state(prefix)];
        if self.report_vitals {
            messages.extend(self.powerwalls.iter().map(|pw| pw.state(prefix)));
        }
        messages
    }
}

impl Device for TeslaSystem {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn components(&self) -> Vec<&Entity> {
        vec![
            &self.battery,
            &self.battery_capacity,
            &self.battery_power,
            &self.battery_remaining,
            &self.battery_reserve_hidden,
            &self.battery_reserve_user,
            &self.battery_time_remaining,
            &self.calibration,
            &self.commission_date,
            &self.grid_power,
            &self.grid_status,
            &self.inverter_capacity,
            &self.load_power,
            &self.solar_power,
            &self.battery_power_in,
            &self.battery_power_out,
            &self.grid_power_in,
            &self.grid_power_out,
        ]
    }

    fn hardware(&self) -> Map<String, Value> {
        let mut dev = Map::new();
        dev.insert("mf".into(), json!(MANUFACTURER));
        dev.insert("mdl".into(), json!(MODEL));
        dev.insert("mdl_id".into(), json!(self.part_number));
        dev.insert("sw".into(), json!(self.firmware_version));
        dev.insert("sn".into(), json!(self.serial));
        dev
    }

    fn values(&self) -> Map<String, Value> {
        self.components()
            .into_iter()
            .filter(|entity| entity.kind().holds_value())
            .map(|entity| {
                let value = entity.value().cloned().unwrap_or(Value::Null);
                (entity.key().to_string(), value)
            })
            .collect()
    }
}

/// One PV string input of a Powerwall 3.
#[derive(Debug, Clone)]
struct PvString {
    label: char,
    mode: Entity,
    current: Entity,
    voltage: Entity,
    power: Entity,
}

impl PvString {
    fn new(device_id: &str, label: char) -> Self {
        let entity = |kind, item: &str| {
            let title = format!("PV String {} {}", label, capitalize(item));
            Entity::new(kind, device_id, &title)
                .keyed(&format!("string_{}_{}", label, item))
                .template(&format!("strings['{}'].{}", label, item))
                .disabled()
        };

        Self {
            label,
            mode: entity(EntityKind::Plain(Platform::Sensor), "mode"),
            current: entity(EntityKind::Current, "current"),
            voltage: entity(EntityKind::Voltage, "voltage"),
            power: entity(EntityKind::PowerValue, "power"),
        }
    }

    fn entities(&self) -> [&Entity; 4] {
        [&self.mode, &self.current, &self.voltage, &self.power]
    }

    /// Values present so far, under their short names.
    fn values(&self) -> Map<String, Value> {
        [
            ("mode", &self.mode),
            ("current", &self.current),
            ("voltage", &self.voltage),
            ("power", &self.power),
        ]
        .into_iter()
        .filter_map(|(name, entity)| Some((name.to_string(), entity.value()?.clone())))
        .collect()
    }
}

/// A single Powerwall 3 unit.
#[derive(Debug, Clone)]
pub struct Powerwall {
    info: DeviceInfo,
    vin: String,
    battery_capacity: Entity,
    battery_remaining: Entity,
    strings: Vec<PvString>,
}

impl Powerwall {
    fn new(parent: &str, block: &BatteryBlock, site_name: &str) -> Self {
        let id = format!("{}_{}", block.kind, block.vin);
        let name = format!("{} {}", site_name, block.serial_number());

        Self {
            battery_capacity: Entity::new(EntityKind::EnergyStorage, &id, "Battery Capacity"),
            battery_remaining: Entity::new(EntityKind::EnergyStorage, &id, "Battery Remaining"),
            strings: PV_STRINGS.iter().map(|l| PvString::new(&id, *l)).collect(),
            info: DeviceInfo::new(id, name, Some(parent.to_string())),
            vin: block.vin.clone(),
        }
    }

    /// Device identification number, `<part number>--<serial number>`.
    pub fn vin(&self) -> &str {
        &self.vin
    }

    fn update<S: SiteSource + ?Sized>(&mut self, source: &S, site_name: &str) -> Result<()> {
        self.info.updated = false;
        self.info.name = format!("{} {}", site_name, serial_of(&self.vin));

        let vitals = source.device_vitals(&self.vin)?;
        debug!(vin = %self.vin, vitals = %vitals, "Powerwall vitals");

        let bms = field(&vitals, "vitals", &["components", "bms"])?
            .get(0)
            .ok_or_else(|| BridgeError::mapping("vitals", "components.bms[0]"))?;
        for (name, signal) in signals(bms) {
            let entity = match name {
                "BMS_nominalEnergyRemaining" => &mut self.battery_remaining,
                "BMS_nominalFullPackEnergy" => &mut self.battery_capacity,
                _ => continue,
            };
            if let Some(kwh) = signal.get("value").and_then(Value::as_f64) {
                entity.set((kwh * 1000.0).trunc() as i64);
            }
        }

        let pch = field(&vitals, "vitals", &["components", "pch"])?
            .as_array()
            .ok_or_else(|| BridgeError::mapping("vitals", "components.pch"))?;
        for string in &mut self.strings {
            let state = format!("PCH_PvState_{}", string.label);
            let voltage_name = format!("PCH_PvVoltage{}", string.label);
            let current_name = format!("PCH_PvCurrent{}", string.label);
            let mut voltage = 0.0;
            let mut current = 0.0;

            for (name, signal) in pch.iter().flat_map(signals) {
                let value = || {
                    let raw = signal.get("value").and_then(Value::as_f64).unwrap_or(0.0);
                    round2(raw.max(0.0))
                };
                if name == state {
                    if let Some(mode) = signal.get("textValue") {
                        string.mode.set(mode.clone());
                    }
                } else if name == voltage_name {
                    voltage = value();
                    string.voltage.set(to_json(voltage));
                } else if name == current_name {
                    current = value();
                    string.current.set(to_json(current));
                }
            }
            string.power.set(to_json(round2(voltage * current)));
        }

        self.info.updated = true;
        Ok(())
    }
}

impl Device for Powerwall {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn components(&self) -> Vec<&Entity> {
        let mut entities = vec![&self.battery_capacity, &self.battery_remaining];
        for string in &self.strings {
            entities.extend(string.entities());
        }
        entities
    }

    fn hardware(&self) -> Map<String, Value> {
        let (part, serial) = self.vin.split_once("--").unwrap_or((self.vin.as_str(), ""));
        let mut dev = Map::new();
        dev.insert("mf".into(), json!(MANUFACTURER));
        dev.insert("mdl".into(), json!(MODEL));
        dev.insert("mdl_id".into(), json!(part));
        dev.insert("sn".into(), json!(serial));
        dev
    }

    fn values(&self) -> Map<String, Value> {
        let mut values = Map::new();
        for entity in [&self.battery_capacity, &self.battery_remaining] {
            let value = entity.value().cloned().unwrap_or(Value::Null);
            values.insert(entity.key().to_string(), value);
        }

        let strings: Map<String, Value> = self
            .strings
            .iter()
            .map(|s| (s.label.to_string(), s.values()))
            .filter(|(_, v)| !v.is_empty())
            .map(|(label, v)| (label, Value::Object(v)))
            .collect();
        if !strings.is_empty() {
            values.insert("strings".into(), Value::Object(strings));
        }
        values
    }
}

fn battery_blocks(config: &Value) -> Result<Vec<BatteryBlock>> {
    match config.get("battery_blocks").and_then(Value::as_array) {
        Some(blocks) => blocks
            .iter()
            .map(|block| {
                BatteryBlock::from_value(block)
                    .map_err(|_| BridgeError::mapping("config", "battery_blocks"))
            })
            .collect(),
        None => Ok(Vec::new()),
    }
}

fn field<'a>(doc: &'a Value, document: &'static str, path: &[&str]) -> Result<&'a Value> {
    lookup(doc, path).ok_or_else(|| BridgeError::mapping(document, path.join(".")))
}

fn number(doc: &Value, document: &'static str, path: &[&str]) -> Result<f64> {
    field(doc, document, path)?
        .as_f64()
        .ok_or_else(|| BridgeError::mapping(document, path.join(".")))
}

fn text<'a>(doc: &'a Value, document: &'static str, path: &[&str]) -> Result<&'a str> {
    field(doc, document, path)?
        .as_str()
        .ok_or_else(|| BridgeError::mapping(document, path.join(".")))
}

/// `realPowerW` of the meter aggregate at `location` (case-insensitive).
fn meter_power(meters: &[Value], location: &str) -> Result<f64> {
    meters
        .iter()
        .find(|meter| {
            meter
                .get("location")
                .and_then(Value::as_str)
                .is_some_and(|l| l.eq_ignore_ascii_case(location))
        })
        .and_then(|meter| meter.get("realPowerW"))
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            BridgeError::mapping(
                "status",
                format!("control.meterAggregates[{}].realPowerW", location),
            )
        })
}

/// `(name, signal)` pairs of a vitals component.
fn signals<'a>(component: &'a Value) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
    component
        .get("signals")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|signal| Some((signal.get("name")?.as_str()?, signal)))
}

fn serial_of(vin: &str) -> &str {
    vin.split_once("--").map_or("", |(_, serial)| serial)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whole numbers are published as integers.
fn to_json(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        json!(value as i64)
    } else {
        json!(value)
    }
}
