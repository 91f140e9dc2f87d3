//! Turns samples into MQTT messages.
//!
//! Topics are laid out below a device topic, e.g. `battery1/soc/current`.
//! Home Assistant picks the sensors up from the retained discovery documents
//! published under `homeassistant/sensor/`.

use crate::sample::{BmsSample, CellIndexBase, CellVoltages};
use serde::Serialize;
use serde_json::{json, Value};

/// One MQTT publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Message {
    fn new(topic: String, payload: String) -> Self {
        Self {
            topic,
            payload,
            retain: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SensorDesc {
    key: &'static str,
    device_class: Option<&'static str>,
    unit: &'static str,
    value: fn(&BmsSample) -> Option<f32>,
}

const SAMPLE_SENSORS: &[SensorDesc] = &[
    SensorDesc {
        key: "soc/total_voltage",
        device_class: Some("voltage"),
        unit: "V",
        value: |s| s.voltage,
    },
    SensorDesc {
        key: "soc/current",
        device_class: Some("current"),
        unit: "A",
        value: |s| s.current,
    },
    SensorDesc {
        key: "soc/soc_percent",
        device_class: Some("battery"),
        unit: "%",
        value: |s| s.soc,
    },
    SensorDesc {
        key: "mosfet_status/capacity_ah",
        device_class: None,
        unit: "Ah",
        value: |s| s.charge,
    },
];

/// State messages for every field the sample carries.
pub fn sample_messages(device_topic: &str, sample: &BmsSample) -> Vec<Message> {
    let mut messages: Vec<Message> = SAMPLE_SENSORS
        .iter()
        .filter_map(|desc| {
            (desc.value)(sample).map(|value| {
                Message::new(format!("{device_topic}/{}", desc.key), value.to_string())
            })
        })
        .collect();
    messages.extend(sample.temperatures.iter().enumerate().map(|(i, t)| {
        Message::new(format!("{device_topic}/temperatures/{i}"), t.to_string())
    }));
    messages
}

/// One message per cell, numbered the way the device numbers its cells.
pub fn cell_voltage_messages(device_topic: &str, cells: &CellVoltages) -> Vec<Message> {
    cells
        .indexed()
        .map(|(index, volts)| {
            Message::new(
                format!("{device_topic}/cell_voltages/{index}"),
                volts.to_string(),
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct HassDevice<'a> {
    identifiers: [&'a str; 1],
    manufacturer: &'a str,
    model: &'a str,
    name: &'a str,
    sw_version: &'a str,
}

#[derive(Debug, Serialize)]
struct HassSensorConfig<'a> {
    unique_id: String,
    name: String,
    device_class: &'a str,
    unit_of_measurement: &'a str,
    json_attributes_topic: String,
    state_topic: String,
    device: HassDevice<'a>,
}

fn discovery_message(
    device_topic: &str,
    key: &str,
    device_class: Option<&str>,
    unit: &str,
) -> Option<Message> {
    let flat_key = key.replace('/', "_");
    let config = HassSensorConfig {
        unique_id: format!("{device_topic}__{flat_key}"),
        name: format!("{device_topic} {}", key.replace('/', " ")),
        device_class: device_class.unwrap_or_default(),
        unit_of_measurement: unit,
        json_attributes_topic: format!("{device_topic}/{key}"),
        state_topic: format!("{device_topic}/{key}"),
        device: HassDevice {
            identifiers: [device_topic],
            manufacturer: device_topic,
            model: "Currently not available",
            name: device_topic,
            sw_version: "Currently not available",
        },
    };
    match serde_json::to_string(&config) {
        Ok(payload) => Some(Message {
            topic: format!("homeassistant/sensor/{device_topic}/_{flat_key}/config"),
            payload,
            retain: true,
        }),
        Err(err) => {
            log::error!("Cannot serialize discovery config for {key}: {err}");
            None
        }
    }
}

/// Retained Home Assistant discovery documents for the sample sensors and
/// `num_cells` cell voltages.
pub fn hass_discovery(device_topic: &str, num_cells: usize, base: CellIndexBase) -> Vec<Message> {
    let first_cell = match base {
        CellIndexBase::Zero => 0,
        CellIndexBase::One => 1,
    };
    let samples = SAMPLE_SENSORS
        .iter()
        .filter_map(|desc| discovery_message(device_topic, desc.key, desc.device_class, desc.unit));
    let cells = (first_cell..first_cell + num_cells).filter_map(|index| {
        discovery_message(
            device_topic,
            &format!("cell_voltages/{index}"),
            Some("voltage"),
            "V",
        )
    });
    samples.chain(cells).collect()
}

/// The sample, and the cell voltages if given, as a single JSON object.
pub fn json_document(sample: &BmsSample, cells: Option<&CellVoltages>) -> Value {
    let mut document = json!({
        "voltage": sample.voltage,
        "current": sample.current,
        "charge": sample.charge,
        "charge_full": sample.charge_full,
        "num_cycles": sample.num_cycles,
        "soc": sample.soc,
        "temperatures": sample.temperatures,
    });
    if let (Some(cells), Value::Object(map)) = (cells, &mut document) {
        let volts: serde_json::Map<String, Value> = cells
            .indexed()
            .map(|(index, volts)| (index.to_string(), json!(volts)))
            .collect();
        map.insert("cell_voltages".to_string(), Value::Object(volts));
    }
    document
}
