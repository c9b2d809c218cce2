use crate::derived_metrics::{self, OperatingMode};
use crate::error::{ApiError, ApiResult};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Where the coordinator gets its raw snapshots from.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch_all(&self) -> ApiResult<Snapshot>;
}

/// What subscribers see after each poll cycle.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    pub current: Option<Arc<Snapshot>>,
    pub previous: Option<Arc<Snapshot>>,
    pub operating_mode: Option<OperatingMode>,
    pub last_update_success: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<ApiError>,
    /// Credentials were rejected, periodic polling is paused until an
    /// explicit refresh succeeds.
    pub reauth_required: bool,
}

/// Periodically polls the vendor API, enriches the result and publishes it.
///
/// Only one cycle runs at a time: periodic ticks and on-demand refresh
/// requests are served by the same loop, and requests that arrive while a
/// cycle is running collapse into a single follow-up cycle.
pub struct PollCoordinator<S> {
    source: Arc<S>,
    update_interval: Duration,
    state: watch::Sender<Arc<CoordinatorState>>,
    refresh: Arc<RefreshSignal>,
}

#[derive(Default)]
struct RefreshSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl RefreshSignal {
    fn request(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Clears a pending request, returning whether there was one.
    fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

impl<S: TelemetrySource + 'static> PollCoordinator<S> {
    pub fn new(source: Arc<S>, update_interval: Duration) -> Self {
        let (state, _) = watch::channel(Arc::new(CoordinatorState::default()));
        Self {
            source,
            update_interval,
            state,
            refresh: Arc::new(RefreshSignal::default()),
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            state: self.state.subscribe(),
            refresh: self.refresh.clone(),
            update_interval: self.update_interval,
        }
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Runs one full fetch, enrich and publish cycle.
    ///
    /// On failure the last published snapshot stays in place and only the
    /// error fields change.
    pub async fn refresh(&self) -> ApiResult<()> {
        self.refresh.take();
        debug!("Polling Sunthalpy backend");

        match self.source.fetch_all().await {
            Ok(mut snapshot) => {
                let previous = self.state.borrow().current.clone();
                let mode = derived_metrics::enrich(&mut snapshot, previous.as_deref());
                debug!("Operating mode {mode}");

                let published = CoordinatorState {
                    current: Some(Arc::new(snapshot)),
                    previous,
                    operating_mode: Some(mode),
                    last_update_success: true,
                    last_success_at: Some(Utc::now()),
                    last_error: None,
                    reauth_required: false,
                };
                self.state.send_replace(Arc::new(published));
                Ok(())
            }
            Err(e) => {
                match &e {
                    ApiError::Authentication(_) => {
                        error!("Authentication failed, re-authentication required: {e}")
                    }
                    ApiError::Communication(_) => warn!("Poll failed, will retry: {e}"),
                    ApiError::Client(_) => error!("Unexpected error while polling: {e}"),
                }
                let mut failed = CoordinatorState::clone(&self.state.borrow());
                failed.last_update_success = false;
                failed.reauth_required = e.is_authentication();
                failed.last_error = Some(e.clone());
                self.state.send_replace(Arc::new(failed));
                Err(e)
            }
        }
    }

    /// Poll loop. Never returns, errors only change the published state.
    pub async fn run(self) {
        info!(
            "Starting poll coordinator with {}s interval",
            self.update_interval.as_secs()
        );
        let mut ticker = interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let periodic = tokio::select! {
                _ = ticker.tick() => true,
                _ = self.refresh.notify.notified() => false,
            };

            if periodic {
                if self.state.borrow().reauth_required {
                    debug!("Skipping periodic poll until credentials are fixed");
                    continue;
                }
            } else if !self.refresh.take() {
                // Already served by a cycle that started after the request
                continue;
            }

            if self.refresh().await.is_err() {
                debug!("Poll cycle failed, keeping the last snapshot");
            }
            if !periodic {
                ticker.reset();
            }
        }
    }

    pub fn spawn(self) -> CoordinatorHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }
}

/// Cloneable read side of the coordinator handed to entities.
#[derive(Clone)]
pub struct CoordinatorHandle {
    state: watch::Receiver<Arc<CoordinatorState>>,
    refresh: Arc<RefreshSignal>,
    update_interval: Duration,
}

impl CoordinatorHandle {
    pub fn state(&self) -> Arc<CoordinatorState> {
        self.state.borrow().clone()
    }

    /// Latest published snapshot, stale data is kept across failed polls.
    pub fn data(&self) -> Option<Arc<Snapshot>> {
        self.state.borrow().current.clone()
    }

    pub fn previous(&self) -> Option<Arc<Snapshot>> {
        self.state.borrow().previous.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.state.borrow().last_update_success
    }

    pub fn last_error(&self) -> Option<ApiError> {
        self.state.borrow().last_error.clone()
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CoordinatorState>> {
        self.state.clone()
    }

    /// Asks for a poll as soon as possible. Requests made while one is
    /// already pending are merged.
    pub fn request_refresh(&self) {
        self.refresh.request();
    }

    /// Requests a refresh after `delay`, used after commands so the backend
    /// has time to apply them.
    pub fn schedule_refresh(&self, delay: Duration) {
        let refresh = self.refresh.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            refresh.request();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DeviceGroup, GroupPayload};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<ApiResult<Snapshot>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<ApiResult<Snapshot>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn fetch_all(&self) -> ApiResult<Snapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(heating(1.0)))
        }
    }

    fn heating(power: f64) -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert_group(
            DeviceGroup::SecondaryTelemetry,
            GroupPayload::from_measures([
                ("134", json!(0.0)),
                ("133", json!(power)),
                ("11", json!(45.0)),
                ("170", json!(30.0)),
                ("2", json!(28.0)),
            ]),
        );
        snapshot
    }

    #[tokio::test]
    async fn test_initial_state_is_unavailable() {
        let coordinator = PollCoordinator::new(ScriptedSource::new(vec![]), Duration::from_secs(60));
        let handle = coordinator.handle();
        assert!(handle.data().is_none());
        assert!(!handle.last_update_success());
    }

    #[tokio::test]
    async fn test_refresh_publishes_and_rotates_snapshots() {
        let source = ScriptedSource::new(vec![Ok(heating(2.0)), Ok(heating(3.0))]);
        let coordinator = PollCoordinator::new(source, Duration::from_secs(60));
        let handle = coordinator.handle();

        coordinator.refresh().await.unwrap();
        let first = handle.data().unwrap();
        assert!(handle.previous().is_none());
        assert!(handle.last_update_success());
        // No previous snapshot yet
        assert_eq!(handle.state().operating_mode, Some(OperatingMode::Idle));
        assert_eq!(
            first.value(DeviceGroup::Calculated, "0001"),
            Some(&json!("IDLE"))
        );

        coordinator.refresh().await.unwrap();
        let state = handle.state();
        assert!(Arc::ptr_eq(state.previous.as_ref().unwrap(), &first));
        assert_eq!(state.operating_mode, Some(OperatingMode::Heating));
        assert_eq!(
            state
                .current
                .as_ref()
                .unwrap()
                .number(DeviceGroup::SecondaryTelemetry, "133"),
            Some(3.0)
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(heating(2.0)),
            Err(ApiError::Communication("timeout".into())),
            Ok(heating(4.0)),
        ]);
        let coordinator = PollCoordinator::new(source, Duration::from_secs(60));
        let handle = coordinator.handle();

        coordinator.refresh().await.unwrap();
        let published = handle.data().unwrap();

        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, ApiError::Communication(_)));
        assert!(!handle.last_update_success());
        assert_eq!(handle.last_error(), Some(err));
        assert!(Arc::ptr_eq(&handle.data().unwrap(), &published));
        assert!(!handle.state().reauth_required);

        coordinator.refresh().await.unwrap();
        assert!(handle.last_update_success());
        assert!(handle.last_error().is_none());
        assert!(Arc::ptr_eq(handle.previous().as_ref().unwrap(), &published));
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let coordinator = PollCoordinator::new(ScriptedSource::new(vec![]), Duration::from_secs(60));
        let mut updates = coordinator.handle().subscribe();

        coordinator.refresh().await.unwrap();
        assert!(updates.has_changed().unwrap());
        assert!(updates.borrow_and_update().current.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval() {
        let source = ScriptedSource::new(vec![]);
        let handle = PollCoordinator::new(source.clone(), Duration::from_secs(60)).spawn();

        // First tick fires immediately
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);
        assert!(handle.last_update_success());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_requests_are_coalesced() {
        let source = ScriptedSource::new(vec![]);
        let handle = PollCoordinator::new(source.clone(), Duration::from_secs(600)).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);

        handle.request_refresh();
        handle.request_refresh();
        handle.request_refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_fires_after_delay() {
        let source = ScriptedSource::new(vec![]);
        let handle = PollCoordinator::new(source.clone(), Duration::from_secs(600)).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.schedule_refresh(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(source.calls(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_pauses_periodic_polling() {
        let source = ScriptedSource::new(vec![Err(ApiError::Authentication("401".into()))]);
        let handle = PollCoordinator::new(source.clone(), Duration::from_secs(60)).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.state().reauth_required);

        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(source.calls(), 1);

        // An explicit refresh after re-auth resumes polling
        handle.request_refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 2);
        assert!(!handle.state().reauth_required);
        assert!(handle.last_update_success());
    }
}
