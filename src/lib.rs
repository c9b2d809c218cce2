//! Sunthalpy Heat Pump Bridge Library
//!
//! Polls the Sunthalpy cloud API for heat pump telemetry, derives the dew
//! point and the current operating mode, exposes every value as a typed
//! entity and integrates power readings into daily energy counters.

pub mod config;
pub mod data_points;
pub mod derived_metrics;
pub mod entities;
pub mod error;
pub mod integral_accumulator;
pub mod integral_sensor;
pub mod poll_coordinator;
pub mod snapshot;
pub mod state_store;
pub mod sunthalpy_api;

// Re-export commonly used types for easier access
pub use config::{BridgeConfig, ClientConfig, Credentials};
pub use derived_metrics::OperatingMode;
pub use entities::{DeviceCommands, EntitySet, EntityValue};
pub use error::{ApiError, ApiResult};
pub use integral_accumulator::{IntegralAccumulator, PersistedIntegral, ResetPolicy};
pub use integral_sensor::IntegralSensor;
pub use poll_coordinator::{CoordinatorHandle, PollCoordinator, TelemetrySource};
pub use snapshot::{DeviceGroup, Snapshot};
pub use state_store::{JsonFileStateStore, MemoryStateStore, StateStore};
pub use sunthalpy_api::SunthalpyApi;
