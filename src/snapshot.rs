use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Logical device groups exposed by the vendor backend, plus the synthetic
/// group holding values computed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceGroup {
    UserSettings,
    MainTelemetry,
    SecondaryTelemetry,
    Calculated,
}

impl DeviceGroup {
    /// Groups fetched from the backend on every poll.
    pub const FETCHED: [DeviceGroup; 3] = [
        DeviceGroup::UserSettings,
        DeviceGroup::MainTelemetry,
        DeviceGroup::SecondaryTelemetry,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DeviceGroup::UserSettings => "user_sets",
            DeviceGroup::MainTelemetry => "main_data",
            DeviceGroup::SecondaryTelemetry => "other_data",
            DeviceGroup::Calculated => "calc_data",
        }
    }
}

impl fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw payload of one device group: `{obj: {lastMeasure: {address: value}}}`.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPayload {
    #[serde(default)]
    pub obj: GroupObject,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupObject {
    #[serde(default)]
    pub last_measure: Map<String, Value>,
}

impl GroupPayload {
    pub fn from_measures<I, K>(measures: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            obj: GroupObject {
                last_measure: measures.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            },
        }
    }
}

/// All group payloads of one poll, keyed by group name.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    groups: BTreeMap<String, GroupPayload>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&mut self, group: DeviceGroup, payload: GroupPayload) {
        self.groups.insert(group.name().to_string(), payload);
    }

    pub fn group(&self, group: DeviceGroup) -> Option<&GroupPayload> {
        self.groups.get(group.name())
    }

    /// Sets a measure, creating the group on first use.
    pub fn set_value(&mut self, group: DeviceGroup, address: &str, value: Value) {
        self.groups
            .entry(group.name().to_string())
            .or_default()
            .obj
            .last_measure
            .insert(address.to_string(), value);
    }

    /// Raw value of a measure. JSON `null` counts as missing.
    pub fn value(&self, group: DeviceGroup, address: &str) -> Option<&Value> {
        self.group(group)
            .and_then(|payload| payload.obj.last_measure.get(address))
            .filter(|value| !value.is_null())
    }

    pub fn number(&self, group: DeviceGroup, address: &str) -> Option<f64> {
        self.value(group, address).and_then(value_as_f64)
    }

    pub fn flag(&self, group: DeviceGroup, address: &str) -> Option<bool> {
        self.value(group, address).and_then(value_as_bool)
    }
}

/// Numbers arrive either as JSON numbers or as numeric strings.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" => Some(true),
            "false" | "off" | "" => Some(false),
            other => other.parse::<f64>().ok().map(|n| n != 0.0),
        },
        _ => None,
    }
}

/// Textual form of a raw value, the way the backend prints it (`"1"` for 1).
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
