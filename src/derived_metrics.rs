//! Values computed locally from the raw telemetry.
//!
//! Nothing in here fails: missing or odd inputs fall back to `None`,
//! [`OperatingMode::Idle`] or [`OperatingMode::Unknown`].

use crate::snapshot::{value_as_text, DeviceGroup, Snapshot};
use serde_json::{json, Value};
use std::fmt;

// Magnus formula constants
const MAGNUS_B: f64 = 17.625;
const MAGNUS_C: f64 = 243.04;

/// Return water this much above the heating set point means the pump is
/// producing domestic hot water.
const ACS_RETURN_MARGIN: f64 = 5.0;

pub const INDOOR_TEMPERATURE: &str = "103";
pub const INDOOR_HUMIDITY: &str = "102";

const RETURN_HEAT_TEMP: &str = "2";
const ACS_TEMP: &str = "11";
const HEATING_POWER: &str = "133";
const COOLING_POWER: &str = "134";
const TARGET_HEAT_TEMP: &str = "170";
const WINTER_FLAG: &str = "202";
const DG1_DEMAND: &str = "5183";

pub const CALC_DEW_POINT: &str = "0000";
pub const CALC_OPERATING_MODE: &str = "0001";
pub const CALC_ACTIVE: &str = "0002";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingDemand {
    Heating,
    Cooling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Idle,
    Cooling,
    Heating,
    /// Domestic hot water production, possibly with a space demand queued
    /// behind it.
    Acs { waiting: Option<WaitingDemand> },
    Unknown,
}

impl OperatingMode {
    pub fn is_active(self) -> bool {
        self != OperatingMode::Idle
    }
}

impl fmt::Display for WaitingDemand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitingDemand::Heating => f.write_str("HEATING"),
            WaitingDemand::Cooling => f.write_str("COOLING"),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Idle => f.write_str("IDLE"),
            OperatingMode::Cooling => f.write_str("COOLING"),
            OperatingMode::Heating => f.write_str("HEATING"),
            OperatingMode::Acs { waiting: None } => f.write_str("ACS"),
            OperatingMode::Acs {
                waiting: Some(demand),
            } => write!(f, "ACS (waiting: {demand})"),
            OperatingMode::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Dew point in °C, rounded to one decimal.
///
/// Returns `None` when either input is missing or zero, or when the inputs
/// are outside the formula's domain.
pub fn dew_point(temp_c: Option<f64>, humidity_pct: Option<f64>) -> Option<f64> {
    let temp = temp_c.filter(|t| *t != 0.0)?;
    let humidity = humidity_pct.filter(|h| *h != 0.0)?;

    let gamma = (humidity / 100.0).ln() + (MAGNUS_B * temp) / (MAGNUS_C + temp);
    let dew_point = MAGNUS_C * gamma / (MAGNUS_B - gamma);
    dew_point
        .is_finite()
        .then(|| (dew_point * 10.0).round() / 10.0)
}

/// Classifies what the heat pump is doing from the current poll.
///
/// Needs a previous snapshot to exist, the first poll after startup is always
/// reported as idle.
pub fn operating_mode(current: Option<&Snapshot>, previous: Option<&Snapshot>) -> OperatingMode {
    let (Some(current), Some(_)) = (current, previous) else {
        return OperatingMode::Idle;
    };

    let group = DeviceGroup::SecondaryTelemetry;
    let cooling_power = current.number(group, COOLING_POWER);
    let heating_power = current.number(group, HEATING_POWER);
    let acs_temp = current.number(group, ACS_TEMP);
    let target_heat = current.number(group, TARGET_HEAT_TEMP);
    let return_heat = current.number(group, RETURN_HEAT_TEMP);

    let (Some(cooling_power), Some(heating_power), Some(_), Some(target_heat), Some(return_heat)) =
        (cooling_power, heating_power, acs_temp, target_heat, return_heat)
    else {
        return OperatingMode::Idle;
    };

    if cooling_power == 0.0 && heating_power == 0.0 {
        return OperatingMode::Idle;
    }
    if cooling_power > 0.0 {
        return OperatingMode::Cooling;
    }
    if heating_power > 0.0 {
        if return_heat > target_heat + ACS_RETURN_MARGIN {
            let dg1_active = current
                .value(group, DG1_DEMAND)
                .and_then(value_as_text)
                .is_some_and(|text| text == "1");
            let waiting = dg1_active.then(|| {
                if current.flag(group, WINTER_FLAG).unwrap_or(false) {
                    WaitingDemand::Heating
                } else {
                    WaitingDemand::Cooling
                }
            });
            return OperatingMode::Acs { waiting };
        }
        return OperatingMode::Heating;
    }

    OperatingMode::Unknown
}

/// Folds the derived values into `current` under the calculated group.
pub fn enrich(current: &mut Snapshot, previous: Option<&Snapshot>) -> OperatingMode {
    let dew_point = dew_point(
        current.number(DeviceGroup::MainTelemetry, INDOOR_TEMPERATURE),
        current.number(DeviceGroup::MainTelemetry, INDOOR_HUMIDITY),
    );
    let mode = operating_mode(Some(current), previous);

    let calc = DeviceGroup::Calculated;
    current.set_value(calc, CALC_DEW_POINT, dew_point.map_or(Value::Null, |dp| json!(dp)));
    current.set_value(calc, CALC_OPERATING_MODE, json!(mode.to_string()));
    current.set_value(calc, CALC_ACTIVE, json!(u8::from(mode.is_active())));
    mode
}
