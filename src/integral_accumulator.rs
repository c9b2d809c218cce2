//! Trapezoidal integration of a power reading into an energy counter.
//!
//! Each accumulator owns its state. Updates go through an in-flight lock:
//! a trigger arriving while another update is still being written is
//! dropped, a reset waits for it instead.

use crate::state_store::StateStore;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const UNAVAILABLE_STATES: [&str; 2] = ["unknown", "unavailable"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Back to zero at local midnight.
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntegralState {
    pub total: f64,
    pub last_value: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl IntegralState {
    fn observe(&mut self, value: f64, now: DateTime<Utc>) -> UpdateOutcome {
        let outcome = match (self.last_value, self.last_update) {
            (Some(last_value), Some(last_update)) => {
                let elapsed_ms = (now - last_update).num_milliseconds().max(0);
                let hours = elapsed_ms as f64 / 3_600_000.0;
                let increment = (last_value + value) / 2.0 * hours;
                self.total += increment;
                UpdateOutcome::Accumulated { increment }
            }
            _ => UpdateOutcome::Initialized,
        };
        self.last_value = Some(value);
        self.last_update = Some(now);
        outcome
    }
}

/// The three attributes written for the host's state restore.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistedIntegral {
    pub last_state: Option<f64>,
    pub last_value: Option<f64>,
    /// ISO 8601 timestamp.
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// First observation, recorded without accumulating.
    Initialized,
    Accumulated { increment: f64 },
    /// Reading was unavailable or not a number.
    Skipped,
    /// Another update was in flight.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Empty,
    Restored,
    /// Restored state belonged to an earlier day and was zeroed.
    ResetForNewDay,
}

pub struct IntegralAccumulator {
    key: String,
    policy: ResetPolicy,
    state: Mutex<IntegralState>,
    in_flight: tokio::sync::Mutex<()>,
    store: Arc<dyn StateStore>,
}

impl IntegralAccumulator {
    pub fn new(key: impl Into<String>, policy: ResetPolicy, store: Arc<dyn StateStore>) -> Self {
        Self {
            key: key.into(),
            policy,
            state: Mutex::new(IntegralState::default()),
            in_flight: tokio::sync::Mutex::new(()),
            store,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    pub fn state(&self) -> IntegralState {
        *self.lock_state()
    }

    pub fn total(&self) -> f64 {
        self.lock_state().total
    }

    pub fn persisted(&self) -> PersistedIntegral {
        let state = self.state();
        PersistedIntegral {
            last_state: Some(state.total),
            last_value: state.last_value,
            last_update: state.last_update.map(|at| at.to_rfc3339()),
        }
    }

    /// Loads the last persisted state from the store.
    pub async fn restore(&self, now: DateTime<Utc>) -> RestoreOutcome {
        match self.store.load(&self.key).await {
            Ok(Some(persisted)) => self.restore_from(&persisted, now),
            Ok(None) => RestoreOutcome::Empty,
            Err(e) => {
                warn!("Could not restore state of {}: {e}", self.key);
                RestoreOutcome::Empty
            }
        }
    }

    pub fn restore_from(&self, persisted: &PersistedIntegral, now: DateTime<Utc>) -> RestoreOutcome {
        let last_update = match persisted.last_update.as_deref() {
            Some(raw) => {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    warn!("Could not restore last_update '{raw}' of {}", self.key);
                }
                parsed
            }
            None => None,
        };

        let mut restored = IntegralState {
            total: persisted.last_state.unwrap_or(0.0),
            last_value: persisted.last_value,
            last_update,
        };
        debug!(
            "Restored {}: state={}, last_value={:?}, last_update={:?}",
            self.key, restored.total, restored.last_value, restored.last_update
        );

        let mut outcome = RestoreOutcome::Restored;
        if self.policy == ResetPolicy::Daily {
            if let Some(last_update) = restored.last_update {
                let last_date = last_update.with_timezone(&Local).date_naive();
                let current_date = now.with_timezone(&Local).date_naive();
                if current_date > last_date {
                    info!("New day detected, resetting {}", self.key);
                    restored = IntegralState::default();
                    outcome = RestoreOutcome::ResetForNewDay;
                }
            }
        }

        *self.lock_state() = restored;
        outcome
    }

    /// Applies one observation of the source value.
    pub async fn update(&self, reading: Option<&Value>, now: DateTime<Utc>) -> UpdateOutcome {
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            debug!("Update of {} already in progress, dropping trigger", self.key);
            return UpdateOutcome::Dropped;
        };

        let Some(value) = self.parse_reading(reading) else {
            return UpdateOutcome::Skipped;
        };

        let outcome = self.lock_state().observe(value, now);
        self.persist().await;
        outcome
    }

    /// Zeroes the counter, optionally seeding it with the current source value.
    pub async fn reset(&self, seed: Option<&Value>, now: DateTime<Utc>) {
        let _in_flight = self.in_flight.lock().await;
        info!("Resetting integral sensor {}", self.key);

        let seed = self.parse_reading(seed);
        {
            let mut state = self.lock_state();
            *state = IntegralState::default();
            if let Some(value) = seed {
                state.last_value = Some(value);
                state.last_update = Some(now);
            }
        }
        self.persist().await;
    }

    fn parse_reading(&self, reading: Option<&Value>) -> Option<f64> {
        let parsed = match reading {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) if UNAVAILABLE_STATES.contains(&raw.as_str()) => None,
            Some(Value::Number(n)) => {
                let number = n.as_f64();
                if number.is_none() {
                    warn!("Could not convert {n} to float");
                }
                number
            }
            Some(Value::String(raw)) => match raw.trim().parse::<f64>() {
                Ok(number) => Some(number),
                Err(_) => {
                    warn!("Could not convert {raw} to float");
                    None
                }
            },
            Some(other) => {
                warn!("Could not convert {other} to float");
                None
            }
        };
        parsed.filter(|n| n.is_finite())
    }

    async fn persist(&self) {
        let persisted = self.persisted();
        if let Err(e) = self.store.save(&self.key, &persisted).await {
            warn!("Could not persist state of {}: {e}", self.key);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, IntegralState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    // Offset-less timestamps are taken as UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
