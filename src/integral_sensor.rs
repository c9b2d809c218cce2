//! Daily energy sensors built on top of an [`IntegralAccumulator`].
//!
//! Three independent event sources drive each sensor: changes of the source
//! value in the published snapshot, a periodic tick and the local midnight
//! reset. They all feed one queue consumed by a single task.

use crate::data_points::{IntegralDataPoint, SemanticClass, KILO_WATT_HOUR};
use crate::entities::EntityValue;
use crate::integral_accumulator::{
    IntegralAccumulator, PersistedIntegral, ResetPolicy, RestoreOutcome, UpdateOutcome,
};
use crate::poll_coordinator::CoordinatorHandle;
use crate::state_store::StateStore;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DISPLAY_PRECISION: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum IntegralEvent {
    SourceChanged(Option<Value>),
    Tick,
    MidnightReset,
}

pub struct IntegralSensor {
    point: &'static IntegralDataPoint,
    accumulator: IntegralAccumulator,
    coordinator: CoordinatorHandle,
}

impl IntegralSensor {
    /// Restores the persisted state and seeds the accumulator with the
    /// current source value when the restore left none.
    pub async fn setup(
        point: &'static IntegralDataPoint,
        coordinator: CoordinatorHandle,
        store: Arc<dyn StateStore>,
    ) -> Arc<Self> {
        let accumulator = IntegralAccumulator::new(point.unique_id(), point.reset, store);
        let now = Utc::now();
        match accumulator.restore(now).await {
            RestoreOutcome::Empty => debug!("No saved state for {}", point.unique_id()),
            RestoreOutcome::Restored => info!(
                "Restored {} at {:.3} {KILO_WATT_HOUR}",
                point.unique_id(),
                accumulator.total()
            ),
            RestoreOutcome::ResetForNewDay => {
                info!("Saved state of {} is from an earlier day", point.unique_id())
            }
        }

        let sensor = Self {
            point,
            accumulator,
            coordinator,
        };
        if sensor.accumulator.state().last_value.is_none() {
            let seed = sensor.source_value();
            sensor.accumulator.update(seed.as_ref(), now).await;
        }
        Arc::new(sensor)
    }

    pub fn point(&self) -> &'static IntegralDataPoint {
        self.point
    }

    pub fn accumulator(&self) -> &IntegralAccumulator {
        &self.accumulator
    }

    pub fn unit(&self) -> &'static str {
        KILO_WATT_HOUR
    }

    pub fn device_class(&self) -> SemanticClass {
        SemanticClass::Energy
    }

    pub fn total(&self) -> f64 {
        self.accumulator.total()
    }

    /// Total rounded for display.
    pub fn display_value(&self) -> String {
        format!("{:.*}", DISPLAY_PRECISION, self.total())
    }

    pub fn extra_state_attributes(&self) -> PersistedIntegral {
        self.accumulator.persisted()
    }

    /// Current source reading, `None` while the last poll failed.
    fn source_value(&self) -> Option<Value> {
        if !self.coordinator.last_update_success() {
            return None;
        }
        let source = self.point.source;
        self.coordinator
            .data()
            .and_then(|snapshot| snapshot.value(source.group, source.address).cloned())
    }

    pub async fn handle_event(&self, event: IntegralEvent, now: DateTime<Utc>) -> Option<UpdateOutcome> {
        match event {
            IntegralEvent::SourceChanged(value) => {
                Some(self.accumulator.update(value.as_ref(), now).await)
            }
            IntegralEvent::Tick => {
                let value = self.source_value();
                Some(self.accumulator.update(value.as_ref(), now).await)
            }
            IntegralEvent::MidnightReset => {
                if self.point.reset == ResetPolicy::Daily {
                    let seed = self.source_value();
                    self.accumulator.reset(seed.as_ref(), now).await;
                }
                None
            }
        }
    }

    /// Starts the event sources and the consumer. The returned handle is the
    /// consumer, which ends once every source has stopped.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        // A single slot: a trigger arriving while one is queued is dropped
        let (tx, mut rx) = mpsc::channel(1);

        self.spawn_source_watcher(tx.clone());
        spawn_ticker(
            tick_interval(self.coordinator.update_interval()),
            tx.clone(),
        );
        if self.point.reset == ResetPolicy::Daily {
            spawn_midnight_reset(tx);
        }

        let sensor = Arc::clone(&self);
        tokio::spawn(async move {
            debug!("Starting integral sensor {}", sensor.point.unique_id());
            while let Some(event) = rx.recv().await {
                let outcome = sensor.handle_event(event, Utc::now()).await;
                if let Some(UpdateOutcome::Accumulated { increment }) = outcome {
                    debug!(
                        "{} += {increment:.5} {KILO_WATT_HOUR}",
                        sensor.point.unique_id()
                    );
                }
            }
            debug!("Integral sensor {} exiting", sensor.point.unique_id());
        })
    }

    fn spawn_source_watcher(self: &Arc<Self>, tx: Sender<IntegralEvent>) {
        let sensor = Arc::clone(self);
        let mut updates = self.coordinator.subscribe();
        // Captured before spawning so a publish racing the task start is seen
        let mut last_seen = self.source_value();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let current = sensor.source_value();
                if current == last_seen {
                    continue;
                }
                last_seen = current.clone();
                if !offer(&tx, IntegralEvent::SourceChanged(current)) {
                    break;
                }
            }
        });
    }
}

/// Queues a trigger without waiting. Returns false once the consumer is gone.
fn offer(tx: &Sender<IntegralEvent>, event: IntegralEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            debug!("Integral update already pending, dropping {event:?}");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn spawn_ticker(period: Duration, tx: Sender<IntegralEvent>) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !offer(&tx, IntegralEvent::Tick) {
                break;
            }
        }
    });
}

fn spawn_midnight_reset(tx: Sender<IntegralEvent>) {
    tokio::spawn(async move {
        loop {
            sleep(until_next_local_midnight(Local::now())).await;
            // Resets are never dropped
            if tx.send(IntegralEvent::MidnightReset).await.is_err() {
                break;
            }
        }
    });
}

/// Tick period: the poll interval floored to whole minutes, at least one.
pub fn tick_interval(poll_interval: Duration) -> Duration {
    let minutes = (poll_interval.as_secs() / 60).max(1);
    Duration::from_secs(minutes * 60)
}

pub fn until_next_local_midnight(now: DateTime<Local>) -> Duration {
    let midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest());
    match midnight {
        Some(midnight) => (midnight - now).to_std().unwrap_or(Duration::ZERO),
        None => {
            warn!("Could not compute next local midnight after {now}");
            Duration::from_secs(24 * 60 * 60)
        }
    }
}

impl EntityValue for IntegralSensor {
    fn unique_id(&self) -> String {
        self.point.unique_id()
    }

    fn name(&self) -> &str {
        self.point.name
    }

    fn native_value(&self) -> Option<Value> {
        Some(json!(self.total()))
    }

    fn available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_points::INTEGRAL_SENSORS;
    use crate::error::{ApiError, ApiResult};
    use crate::poll_coordinator::{PollCoordinator, TelemetrySource};
    use crate::snapshot::{DeviceGroup, GroupPayload, Snapshot};
    use crate::state_store::MemoryStateStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Reports a settable electric power reading.
    struct PowerSource {
        power: Mutex<Value>,
        failing: AtomicBool,
    }

    impl PowerSource {
        fn new(power: Value) -> Arc<Self> {
            Arc::new(Self {
                power: Mutex::new(power),
                failing: AtomicBool::new(false),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn set(&self, power: Value) {
            *self.power.lock().unwrap() = power;
        }
    }

    #[async_trait]
    impl TelemetrySource for PowerSource {
        async fn fetch_all(&self) -> ApiResult<Snapshot> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ApiError::Communication("backend down".into()));
            }
            let mut snapshot = Snapshot::new();
            snapshot.insert_group(
                DeviceGroup::SecondaryTelemetry,
                GroupPayload::from_measures([("135", self.power.lock().unwrap().clone())]),
            );
            Ok(snapshot)
        }
    }

    fn electric() -> &'static IntegralDataPoint {
        &INTEGRAL_SENSORS[0]
    }

    async fn polled(power: Value) -> (PollCoordinator<PowerSource>, Arc<PowerSource>) {
        let source = PowerSource::new(power);
        let coordinator = PollCoordinator::new(source.clone(), Duration::from_secs(300));
        coordinator.refresh().await.unwrap();
        (coordinator, source)
    }

    #[tokio::test]
    async fn test_setup_seeds_from_current_source() {
        let (coordinator, _) = polled(json!(2.0)).await;
        let store = Arc::new(MemoryStateStore::new());
        let sensor = IntegralSensor::setup(electric(), coordinator.handle(), store.clone()).await;

        let state = sensor.accumulator().state();
        assert_eq!(state.total, 0.0);
        assert_eq!(state.last_value, Some(2.0));
        assert!(state.last_update.is_some());
        assert_eq!(sensor.unit(), "kWh");
        assert_eq!(sensor.device_class(), SemanticClass::Energy);
        assert_eq!(
            store.get("other_data--135_daily_integral"),
            Some(sensor.extra_state_attributes())
        );
    }

    #[tokio::test]
    async fn test_setup_keeps_restored_total() {
        let (coordinator, _) = polled(json!(2.0)).await;
        let store = Arc::new(MemoryStateStore::with_state(
            &electric().unique_id(),
            PersistedIntegral {
                last_state: Some(3.5),
                last_value: Some(1.0),
                last_update: Some(Utc::now().to_rfc3339()),
            },
        ));
        let sensor = IntegralSensor::setup(electric(), coordinator.handle(), store).await;

        assert_eq!(sensor.total(), 3.5);
        assert_eq!(sensor.accumulator().state().last_value, Some(1.0));
        assert_eq!(sensor.display_value(), "3.5");
        assert_eq!(sensor.native_value(), Some(json!(3.5)));
    }

    #[tokio::test]
    async fn test_events_accumulate_and_reset() {
        let (coordinator, source) = polled(json!(2.0)).await;
        let sensor = IntegralSensor::setup(
            electric(),
            coordinator.handle(),
            Arc::new(MemoryStateStore::new()),
        )
        .await;
        let t0 = sensor.accumulator().state().last_update.unwrap();

        let outcome = sensor
            .handle_event(
                IntegralEvent::SourceChanged(Some(json!(4.0))),
                t0 + ChronoDuration::hours(1),
            )
            .await;
        assert_eq!(outcome, Some(UpdateOutcome::Accumulated { increment: 3.0 }));

        // Ticks read the source from the latest snapshot
        source.set(json!(4.0));
        coordinator.refresh().await.unwrap();
        sensor
            .handle_event(IntegralEvent::Tick, t0 + ChronoDuration::hours(2))
            .await;
        assert_eq!(sensor.total(), 7.0);

        let outcome = sensor
            .handle_event(
                IntegralEvent::SourceChanged(Some(json!("unavailable"))),
                t0 + ChronoDuration::hours(3),
            )
            .await;
        assert_eq!(outcome, Some(UpdateOutcome::Skipped));

        let midnight = t0 + ChronoDuration::hours(4);
        assert_eq!(
            sensor.handle_event(IntegralEvent::MidnightReset, midnight).await,
            None
        );
        let state = sensor.accumulator().state();
        assert_eq!(state.total, 0.0);
        assert_eq!(state.last_value, Some(4.0));
        assert_eq!(state.last_update, Some(midnight));
    }

    #[tokio::test]
    async fn test_tick_during_outage_is_skipped() {
        let (coordinator, source) = polled(json!(2.0)).await;
        let sensor = IntegralSensor::setup(
            electric(),
            coordinator.handle(),
            Arc::new(MemoryStateStore::new()),
        )
        .await;
        let t0 = sensor.accumulator().state().last_update.unwrap();

        source.set_failing(true);
        assert!(coordinator.refresh().await.is_err());
        // The stale snapshot is still published
        assert!(coordinator.handle().data().is_some());

        let outcome = sensor
            .handle_event(IntegralEvent::Tick, t0 + ChronoDuration::hours(3))
            .await;
        assert_eq!(outcome, Some(UpdateOutcome::Skipped));
        let state = sensor.accumulator().state();
        assert_eq!(state.total, 0.0);
        assert_eq!(state.last_value, Some(2.0));
        assert_eq!(state.last_update, Some(t0));

        // Accumulation resumes once polling recovers
        source.set_failing(false);
        coordinator.refresh().await.unwrap();
        let outcome = sensor
            .handle_event(IntegralEvent::Tick, t0 + ChronoDuration::hours(4))
            .await;
        assert_eq!(outcome, Some(UpdateOutcome::Accumulated { increment: 8.0 }));
    }

    #[tokio::test]
    async fn test_sensor_set_up_before_first_poll_initialises_on_it() {
        let source = PowerSource::new(json!(2.0));
        let coordinator = PollCoordinator::new(source, Duration::from_secs(300));
        let sensor = IntegralSensor::setup(
            electric(),
            coordinator.handle(),
            Arc::new(MemoryStateStore::new()),
        )
        .await;
        assert_eq!(sensor.accumulator().state().last_value, None);
        sensor.clone().spawn();

        coordinator.refresh().await.unwrap();
        for _ in 0..100 {
            if sensor.accumulator().state().last_value.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sensor.accumulator().state().last_value, Some(2.0));
        assert_eq!(sensor.total(), 0.0);
    }

    #[tokio::test]
    async fn test_spawned_sensor_follows_source_changes() {
        let (coordinator, source) = polled(json!(2.0)).await;
        let sensor = IntegralSensor::setup(
            electric(),
            coordinator.handle(),
            Arc::new(MemoryStateStore::new()),
        )
        .await;
        sensor.clone().spawn();

        source.set(json!(6.5));
        coordinator.refresh().await.unwrap();

        for _ in 0..100 {
            if sensor.accumulator().state().last_value == Some(6.5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sensor.accumulator().state().last_value, Some(6.5));
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval(Duration::from_secs(300)), Duration::from_secs(300));
        assert_eq!(tick_interval(Duration::from_secs(150)), Duration::from_secs(120));
        assert_eq!(tick_interval(Duration::from_secs(30)), Duration::from_secs(60));
    }

    #[test]
    fn test_until_next_local_midnight() {
        let late = Local
            .with_ymd_and_hms(2026, 10, 15, 23, 0, 0)
            .single()
            .unwrap();
        assert_eq!(until_next_local_midnight(late), Duration::from_secs(3600));

        let midnight = Local
            .with_ymd_and_hms(2026, 10, 15, 0, 0, 0)
            .single()
            .unwrap();
        assert_eq!(
            until_next_local_midnight(midnight),
            Duration::from_secs(24 * 3600)
        );
    }
}
