use std::sync::Arc;
use sunthalpy_bridge::data_points::INTEGRAL_SENSORS;
use sunthalpy_bridge::derived_metrics::CALC_DEW_POINT;
use sunthalpy_bridge::snapshot::DeviceGroup;
use sunthalpy_bridge::{
    BridgeConfig, EntitySet, EntityValue, IntegralSensor, JsonFileStateStore, PollCoordinator,
    StateStore, SunthalpyApi,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Sunthalpy bridge");
    let config = BridgeConfig::from_env()?;

    let api = Arc::new(SunthalpyApi::new(config.client.clone())?);
    let poller = PollCoordinator::new(api.clone(), config.poll_interval);
    let coordinator = poller.handle();

    // Sensors subscribe before the first poll so they see it as a change
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStateStore::open(&config.state_file).await?);
    let mut integrals = Vec::with_capacity(INTEGRAL_SENSORS.len());
    for point in &INTEGRAL_SENSORS {
        let sensor = IntegralSensor::setup(point, coordinator.clone(), store.clone()).await;
        sensor.clone().spawn();
        integrals.push(sensor);
    }
    poller.spawn();

    let entities = EntitySet::build(&coordinator, api);
    let mut updates = coordinator.subscribe();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    error!("Poll coordinator stopped");
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if let Some(e) = &state.last_error {
                    if state.reauth_required {
                        error!("Credentials rejected, fix SUNTHALPY_EMAIL/SUNTHALPY_PASSWORD and restart: {e}");
                    } else {
                        warn!("Last poll failed: {e}");
                    }
                    continue;
                }

                let dew_point = state
                    .current
                    .as_ref()
                    .and_then(|snapshot| snapshot.number(DeviceGroup::Calculated, CALC_DEW_POINT));
                info!(
                    "Operating mode {}, dew point {}",
                    state
                        .operating_mode
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown".to_string()),
                    dew_point
                        .map(|value| format!("{value:.1}°C"))
                        .unwrap_or_else(|| "unavailable".to_string())
                );

                if config.log_values {
                    for entity in entities.enabled() {
                        info!("{} = {:?}", entity.name(), entity.native_value());
                    }
                    for sensor in &integrals {
                        info!("{} = {} kWh", sensor.name(), sensor.display_value());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
