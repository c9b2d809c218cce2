//! Static catalogue of every value the bridge exposes.

use crate::derived_metrics::{CALC_ACTIVE, CALC_DEW_POINT, CALC_OPERATING_MODE};
use crate::integral_accumulator::ResetPolicy;
use crate::snapshot::DeviceGroup;

const CELSIUS: &str = "°C";
const PERCENT: &str = "%";
const KILO_WATT: &str = "kW";
const BAR: &str = "bar";
pub const KILO_WATT_HOUR: &str = "kWh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticClass {
    Temperature,
    Humidity,
    Pressure,
    Power,
    PowerFactor,
    Energy,
    Problem,
    Switch,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberBounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub group: DeviceGroup,
    pub address: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub bounds: Option<NumberBounds>,
    pub enabled_by_default: bool,
    pub class: Option<SemanticClass>,
}

impl DataPoint {
    pub const fn new(group: DeviceGroup, address: &'static str, name: &'static str) -> Self {
        Self {
            group,
            address,
            name,
            unit: None,
            bounds: None,
            enabled_by_default: true,
            class: None,
        }
    }

    pub const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn class(mut self, class: SemanticClass) -> Self {
        self.class = Some(class);
        self
    }

    pub const fn bounds(mut self, min: f64, max: f64, step: f64) -> Self {
        self.bounds = Some(NumberBounds { min, max, step });
        self
    }

    pub const fn disabled(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    /// Identifier in `group--address` form.
    pub fn key(&self) -> String {
        format!("{}--{}", self.group, self.address)
    }

    /// Clamps a requested value into the configured bounds, if any.
    pub fn clamp(&self, value: f64) -> f64 {
        match self.bounds {
            Some(bounds) => value.clamp(bounds.min, bounds.max),
            None => value,
        }
    }
}

/// A daily energy counter integrating one power data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegralDataPoint {
    pub name: &'static str,
    pub source: &'static DataPoint,
    pub reset: ResetPolicy,
}

impl IntegralDataPoint {
    pub fn unique_id(&self) -> String {
        format!("{}_daily_integral", self.source.key())
    }
}

use DeviceGroup::{Calculated, MainTelemetry, SecondaryTelemetry, UserSettings};
use SemanticClass::*;

pub static SWITCHES: [DataPoint; 2] = [
    DataPoint::new(UserSettings, "0100", "Modo Invierno").class(Switch),
    DataPoint::new(UserSettings, "0000", "En casa").class(Switch),
];

pub static NUMBERS: [DataPoint; 2] = [
    DataPoint::new(UserSettings, "1100", "Temp. min")
        .class(Temperature)
        .unit(CELSIUS)
        .bounds(17.9, 27.9, 0.1),
    DataPoint::new(UserSettings, "1101", "Temp. max")
        .class(Temperature)
        .unit(CELSIUS)
        .bounds(18.0, 28.0, 0.1),
];

pub static BINARY_SENSORS: [DataPoint; 4] = [
    DataPoint::new(UserSettings, "1800", "ngrok on").disabled(),
    DataPoint::new(SecondaryTelemetry, "201", "Modo Verano online").disabled(),
    DataPoint::new(SecondaryTelemetry, "202", "Modo Invierno online").disabled(),
    DataPoint::new(SecondaryTelemetry, "32", "Alarma")
        .class(Problem)
        .disabled(),
];

const HEATING_POWER: DataPoint =
    DataPoint::new(SecondaryTelemetry, "133", "Potencia instantánea calefacción")
        .class(Power)
        .unit(KILO_WATT);
const COOLING_POWER: DataPoint =
    DataPoint::new(SecondaryTelemetry, "134", "Potencia instantánea refrigeración")
        .class(Power)
        .unit(KILO_WATT);
const ELECTRIC_POWER: DataPoint = DataPoint::new(SecondaryTelemetry, "135", "Consumo eléctrico")
    .class(Power)
    .unit(KILO_WATT);

pub static SENSORS: [DataPoint; 27] = [
    DataPoint::new(UserSettings, "1100", "Temp. min online")
        .class(Temperature)
        .unit(CELSIUS)
        .disabled(),
    DataPoint::new(UserSettings, "1101", "Temp. max online")
        .class(Temperature)
        .unit(CELSIUS)
        .disabled(),
    DataPoint::new(MainTelemetry, "103", "Temp. interior")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(MainTelemetry, "102", "Humedad Interior")
        .class(Humidity)
        .unit(PERCENT),
    DataPoint::new(SecondaryTelemetry, "1", "Temp. impulsion interior")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "2", "Temp. retorno interior")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "4", "Temp. impulsion exterior")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "5", "Temp. retorno exterior")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "6", "Presión circuito")
        .class(Pressure)
        .unit(BAR),
    DataPoint::new(SecondaryTelemetry, "11", "Temp. ACS")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "20", "Temp. Exterior")
        .class(Temperature)
        .unit(CELSIUS),
    HEATING_POWER,
    COOLING_POWER,
    ELECTRIC_POWER,
    DataPoint::new(SecondaryTelemetry, "136", "COP").class(PowerFactor),
    DataPoint::new(SecondaryTelemetry, "137", "EER").class(PowerFactor),
    DataPoint::new(SecondaryTelemetry, "168", "Consigna temp. ACS")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "170", "Consigna temp. calefacción")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "175", "Consigna temp. refrigeración")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(SecondaryTelemetry, "5002", "RPM Compresor")
        .unit("RPM")
        .disabled(),
    DataPoint::new(SecondaryTelemetry, "5181", "Bus Demanda ACS").disabled(),
    DataPoint::new(SecondaryTelemetry, "5183", "Bus Demanda DG1").disabled(),
    DataPoint::new(SecondaryTelemetry, "5188", "Bus Programa").disabled(),
    DataPoint::new(SecondaryTelemetry, "5257", "Bus Enciende Bomba Calor").disabled(),
    DataPoint::new(Calculated, CALC_DEW_POINT, "Punto de rocío")
        .class(Temperature)
        .unit(CELSIUS),
    DataPoint::new(Calculated, CALC_OPERATING_MODE, "Modo aerotermia").class(Enum),
    DataPoint::new(Calculated, CALC_ACTIVE, "Aerotermia activa"),
];

pub static INTEGRAL_SENSORS: [IntegralDataPoint; 3] = [
    IntegralDataPoint {
        name: "Consumo eléctrico diario",
        source: &ELECTRIC_POWER,
        reset: ResetPolicy::Daily,
    },
    IntegralDataPoint {
        name: "Energía calefacción diaria",
        source: &HEATING_POWER,
        reset: ResetPolicy::Daily,
    },
    IntegralDataPoint {
        name: "Energía refrigeración diaria",
        source: &COOLING_POWER,
        reset: ResetPolicy::Daily,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn find_sensor(key: &str) -> Option<&'static DataPoint> {
        SENSORS.iter().find(|point| point.key() == key)
    }

    #[test]
    fn test_keys_are_unique_per_platform() {
        for table in [&SWITCHES[..], &NUMBERS[..], &BINARY_SENSORS[..], &SENSORS[..]] {
            let keys: HashSet<String> = table.iter().map(DataPoint::key).collect();
            assert_eq!(keys.len(), table.len());
        }
    }

    #[test]
    fn test_number_bounds_clamp() {
        let min = &NUMBERS[0];
        assert_eq!(min.key(), "user_sets--1100");
        assert_eq!(min.clamp(10.0), 17.9);
        assert_eq!(min.clamp(30.0), 27.9);
        assert_eq!(min.clamp(21.3), 21.3);
        assert_eq!(SENSORS[0].clamp(-3.0), -3.0);
    }

    #[test]
    fn test_integrals_track_power_sensors() {
        for integral in &INTEGRAL_SENSORS {
            assert_eq!(integral.source.class, Some(SemanticClass::Power));
            assert!(find_sensor(&integral.source.key()).is_some());
        }
        assert_eq!(
            INTEGRAL_SENSORS[0].unique_id(),
            "other_data--135_daily_integral"
        );
    }

    #[test]
    fn test_calculated_values_are_exposed() {
        assert!(find_sensor("calc_data--0000").is_some());
        assert!(find_sensor("calc_data--0001").is_some());
        assert!(find_sensor("calc_data--0002").is_some());
        assert!(find_sensor("calc_data--9999").is_none());
    }
}
