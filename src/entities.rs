//! Read accessors over the coordinator's snapshot, one per data point, and
//! the writable switch/number variants that push commands to the backend.

use crate::data_points::{DataPoint, BINARY_SENSORS, NUMBERS, SENSORS, SWITCHES};
use crate::error::ApiResult;
use crate::poll_coordinator::CoordinatorHandle;
use crate::snapshot::{value_as_bool, value_as_f64, DeviceGroup};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Commands are optimistic, the real state shows up on this later poll.
pub const COMMAND_REFRESH_DELAY: Duration = Duration::from_secs(5);

#[async_trait]
pub trait DeviceCommands: Send + Sync {
    async fn switch(&self, group: DeviceGroup, address: &str, on: bool) -> ApiResult<Value>;
    async fn set_number(&self, group: DeviceGroup, address: &str, value: f64) -> ApiResult<Value>;
}

/// What a host needs to render any value the bridge exposes.
pub trait EntityValue {
    fn unique_id(&self) -> String;
    fn name(&self) -> &str;
    fn native_value(&self) -> Option<Value>;
    fn available(&self) -> bool;
}

#[derive(Clone)]
struct Binding {
    point: &'static DataPoint,
    coordinator: CoordinatorHandle,
}

impl Binding {
    fn raw_value(&self) -> Option<Value> {
        self.coordinator
            .data()
            .and_then(|snapshot| snapshot.value(self.point.group, self.point.address).cloned())
    }
}

macro_rules! entity_value {
    ($entity:ty) => {
        impl EntityValue for $entity {
            fn unique_id(&self) -> String {
                self.binding.point.key()
            }

            fn name(&self) -> &str {
                self.binding.point.name
            }

            fn native_value(&self) -> Option<Value> {
                self.binding.raw_value()
            }

            fn available(&self) -> bool {
                self.binding.coordinator.last_update_success()
            }
        }
    };
}

#[derive(Clone)]
pub struct SensorEntity {
    binding: Binding,
}

impl SensorEntity {
    pub fn new(point: &'static DataPoint, coordinator: CoordinatorHandle) -> Self {
        Self {
            binding: Binding { point, coordinator },
        }
    }

    pub fn point(&self) -> &'static DataPoint {
        self.binding.point
    }
}

#[derive(Clone)]
pub struct BinarySensorEntity {
    binding: Binding,
}

impl BinarySensorEntity {
    pub fn new(point: &'static DataPoint, coordinator: CoordinatorHandle) -> Self {
        Self {
            binding: Binding { point, coordinator },
        }
    }

    pub fn is_on(&self) -> Option<bool> {
        self.binding.raw_value().as_ref().and_then(value_as_bool)
    }
}

#[derive(Clone)]
pub struct SwitchEntity {
    binding: Binding,
    commands: Arc<dyn DeviceCommands>,
}

impl SwitchEntity {
    pub fn new(
        point: &'static DataPoint,
        coordinator: CoordinatorHandle,
        commands: Arc<dyn DeviceCommands>,
    ) -> Self {
        Self {
            binding: Binding { point, coordinator },
            commands,
        }
    }

    pub fn is_on(&self) -> Option<bool> {
        self.binding.raw_value().as_ref().and_then(value_as_bool)
    }

    pub async fn turn_on(&self) -> ApiResult<Value> {
        self.set(true).await
    }

    pub async fn turn_off(&self) -> ApiResult<Value> {
        self.set(false).await
    }

    async fn set(&self, on: bool) -> ApiResult<Value> {
        let point = self.binding.point;
        let ack = self.commands.switch(point.group, point.address, on).await?;
        self.binding
            .coordinator
            .schedule_refresh(COMMAND_REFRESH_DELAY);
        Ok(ack)
    }
}

#[derive(Clone)]
pub struct NumberEntity {
    binding: Binding,
    commands: Arc<dyn DeviceCommands>,
}

impl NumberEntity {
    pub fn new(
        point: &'static DataPoint,
        coordinator: CoordinatorHandle,
        commands: Arc<dyn DeviceCommands>,
    ) -> Self {
        Self {
            binding: Binding { point, coordinator },
            commands,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.binding.raw_value().as_ref().and_then(value_as_f64)
    }

    /// Sends the value clamped into the data point's bounds.
    pub async fn set_value(&self, value: f64) -> ApiResult<Value> {
        let point = self.binding.point;
        let ack = self
            .commands
            .set_number(point.group, point.address, point.clamp(value))
            .await?;
        self.binding
            .coordinator
            .schedule_refresh(COMMAND_REFRESH_DELAY);
        Ok(ack)
    }
}

entity_value!(SensorEntity);
entity_value!(BinarySensorEntity);
entity_value!(SwitchEntity);
entity_value!(NumberEntity);

/// Every entity of the catalogue bound to one coordinator.
pub struct EntitySet {
    pub sensors: Vec<SensorEntity>,
    pub binary_sensors: Vec<BinarySensorEntity>,
    pub switches: Vec<SwitchEntity>,
    pub numbers: Vec<NumberEntity>,
}

impl EntitySet {
    pub fn build(coordinator: &CoordinatorHandle, commands: Arc<dyn DeviceCommands>) -> Self {
        Self {
            sensors: SENSORS
                .iter()
                .map(|point| SensorEntity::new(point, coordinator.clone()))
                .collect(),
            binary_sensors: BINARY_SENSORS
                .iter()
                .map(|point| BinarySensorEntity::new(point, coordinator.clone()))
                .collect(),
            switches: SWITCHES
                .iter()
                .map(|point| SwitchEntity::new(point, coordinator.clone(), commands.clone()))
                .collect(),
            numbers: NUMBERS
                .iter()
                .map(|point| NumberEntity::new(point, coordinator.clone(), commands.clone()))
                .collect(),
        }
    }

    /// All entities that start enabled, as read accessors.
    pub fn enabled(&self) -> Vec<&dyn EntityValue> {
        let sensors = self
            .sensors
            .iter()
            .filter(|e| e.binding.point.enabled_by_default)
            .map(|e| e as &dyn EntityValue);
        let binary = self
            .binary_sensors
            .iter()
            .filter(|e| e.binding.point.enabled_by_default)
            .map(|e| e as &dyn EntityValue);
        let switches = self
            .switches
            .iter()
            .filter(|e| e.binding.point.enabled_by_default)
            .map(|e| e as &dyn EntityValue);
        let numbers = self
            .numbers
            .iter()
            .filter(|e| e.binding.point.enabled_by_default)
            .map(|e| e as &dyn EntityValue);
        sensors.chain(binary).chain(switches).chain(numbers).collect()
    }

    pub fn sensor(&self, key: &str) -> Option<&SensorEntity> {
        self.sensors.iter().find(|e| e.binding.point.key() == key)
    }

    pub fn switch(&self, key: &str) -> Option<&SwitchEntity> {
        self.switches.iter().find(|e| e.binding.point.key() == key)
    }

    pub fn number(&self, key: &str) -> Option<&NumberEntity> {
        self.numbers.iter().find(|e| e.binding.point.key() == key)
    }

    pub fn binary_sensor(&self, key: &str) -> Option<&BinarySensorEntity> {
        self.binary_sensors
            .iter()
            .find(|e| e.binding.point.key() == key)
    }
}
