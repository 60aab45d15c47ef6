//! Client status store.
//!
//! The in-process state container each device runs: it owns the polling
//! lifecycle, persists identity and home location across restarts, and
//! turns the latest threat status into a UI mode.
//!
//! Lifecycle:
//!
//! ```text
//!   init ──► app_started ──► (onboarding complete?) ──► Polling
//!                                   │ no                   │
//!                                   ▼                      ▼
//!                          init_user / complete_onboarding ──► Polling
//!   teardown (or drop) ──► Idle
//! ```
//!
//! Invariants:
//! - at most one poll timer is installed at any time;
//! - at most one status fetch is in flight, timer or refresh;
//! - each fetch result is applied in a single locked transition;
//! - a failed fetch reads as `safe`, never as a stale `danger`;
//! - results arriving after their timer was cancelled are discarded.
//!
//! Submodules:
//! - `backend`: where statuses come from (HTTP surface or in-process).
//! - `poller` : the cancellable repeating timer.
//! - `session`: session state and the persisted session file.

pub mod backend;
pub mod poller;
pub mod session;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;

use crate::config::ClientConfig;
use crate::logging::{self, DataSource};
use crate::model::{HomeLocation, LatLng, ThreatLevel};
use crate::query::{StatusResponse, ThreatView};
use crate::stations::{self, NEARBY_RADIUS_M};

pub use backend::{HttpBackend, LocalBackend, StatusBackend};
pub use poller::PollTimer;
pub use session::{
    ClientSessionState, DeviceUser, LocationPermission, NearbySensor, PersistedSession,
    SessionFile,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to start poll thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("session file {path}: {source}")]
    SessionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file is not valid JSON: {0}")]
    SessionFormat(#[from] serde_json::Error),
    #[error("no device user; call init_user first")]
    NoUser,
}

// ---------------------------------------------------------------------------
// Public state views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingState {
    Idle,
    Polling,
}

/// What the UI should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiMode {
    Onboarding,
    Safe,
    Warning,
    Danger,
    /// An active threat the user has acknowledged as safe.
    MarkedSafe,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct Inner {
    state: ClientSessionState,
    timer: Option<PollTimer>,
    next_generation: u64,
}

struct Shared {
    backend: Arc<dyn StatusBackend>,
    session_file: Option<SessionFile>,
    poll_interval: Duration,
    inner: Mutex<Inner>,
    /// Held for the duration of one fetch; taken before `inner`.
    fetch_gate: Mutex<()>,
    live_loops: Arc<AtomicUsize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetches once and applies the result. With `generation`, the result
    /// is applied only if that timer is still the installed one.
    fn fetch_and_apply(&self, generation: Option<u64>) -> bool {
        let _in_flight = self.fetch_gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = self.backend.fetch_status();

        let mut inner = self.lock();
        if let Some(generation) = generation {
            let current = inner.timer.as_ref().map(PollTimer::generation);
            if current != Some(generation) {
                tracing::debug!(generation, "discarding result of cancelled poll");
                return false;
            }
        }

        let now = Utc::now();
        let state = &mut inner.state;
        let (view, error) = match result {
            Ok(response) => (response.threat, None),
            Err(e) => {
                logging::log_fetch_failure(DataSource::Client, None, "status poll", &e);
                (StatusResponse::fallback(now).threat, Some(e.to_string()))
            }
        };
        let nearby = nearby_sensors(state.reference_point());

        state.current_status = view.status.level;
        state.last_checked = Some(now);
        state.threat_data = Some(view);
        state.nearby_sensors = nearby;
        state.last_error = error;

        tracing::info!(level = %state.current_status, "status updated");
        true
    }

    fn persist(&self, state: &ClientSessionState) -> Result<(), ClientError> {
        match &self.session_file {
            Some(file) => file.save(&state.persisted()),
            None => Ok(()),
        }
    }
}

fn nearby_sensors(point: Option<LatLng>) -> Vec<NearbySensor> {
    let Some(point) = point else {
        return Vec::new();
    };
    stations::nearby_stations(point, NEARBY_RADIUS_M)
        .into_iter()
        .map(|(station, distance_m)| NearbySensor {
            station_id: station.id.to_string(),
            name: station.name.to_string(),
            distance_m,
        })
        .collect()
}

/// Explicit per-device context; every client operation goes through it.
///
/// Not `Clone`: there is exactly one owner, and dropping it stops polling.
pub struct ClientStatusStore {
    shared: Arc<Shared>,
}

impl ClientStatusStore {
    /// Creates the store and restores the persisted session, if any. An
    /// unreadable session file is logged and replaced by a fresh session.
    pub fn init(backend: Arc<dyn StatusBackend>, config: &ClientConfig) -> Self {
        let session_file = config.session_file.clone().map(SessionFile::new);
        let persisted = match session_file.as_ref().map(SessionFile::load) {
            Some(Ok(Some(persisted))) => persisted,
            Some(Ok(None)) | None => PersistedSession::default(),
            Some(Err(e)) => {
                tracing::warn!(source = %DataSource::Client, "starting a fresh session: {}", e);
                PersistedSession::default()
            }
        };

        Self {
            shared: Arc::new(Shared {
                backend,
                session_file,
                poll_interval: config.poll_interval,
                inner: Mutex::new(Inner {
                    state: ClientSessionState::restore(persisted),
                    timer: None,
                    next_generation: 1,
                }),
                fetch_gate: Mutex::new(()),
                live_loops: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Starts polling when onboarding was completed in an earlier session.
    pub fn app_started(&self) -> Result<PollingState, ClientError> {
        if self.shared.lock().state.has_completed_onboarding {
            self.start_polling()?;
        }
        Ok(self.polling_state())
    }

    /// Returns the device user, creating and persisting one if needed.
    pub fn init_user(&self) -> Result<DeviceUser, ClientError> {
        let mut inner = self.shared.lock();
        if let Some(user) = &inner.state.user {
            return Ok(user.clone());
        }
        let user = DeviceUser::new_at(Utc::now());
        inner.state.user = Some(user.clone());
        self.shared.persist(&inner.state)?;
        tracing::info!(user = %user.id, "created device user");
        Ok(user)
    }

    /// Finishes onboarding with the chosen home location and starts polling.
    /// The location is sent to the backend best-effort.
    pub fn complete_onboarding(&self, home: HomeLocation) -> Result<(), ClientError> {
        let user_id = {
            let mut inner = self.shared.lock();
            let state = &mut inner.state;
            let user = state.user.as_mut().ok_or(ClientError::NoUser)?;
            user.home_location = Some(home.clone());
            let user_id = user.id.clone();
            state.home_location = Some(home.clone());
            state.has_completed_onboarding = true;
            state.nearby_sensors = nearby_sensors(state.reference_point());
            self.shared.persist(state)?;
            user_id
        };

        if let Err(e) = self.shared.backend.save_location(&user_id, &home) {
            logging::log_fetch_failure(DataSource::Client, Some(&user_id), "location save", &e);
        }

        self.start_polling()
    }

    /// Installs a fresh poll timer, cancelling any previous one, and
    /// fetches immediately.
    pub fn start_polling(&self) -> Result<(), ClientError> {
        let mut inner = self.shared.lock();
        if let Some(previous) = inner.timer.take() {
            previous.cancel();
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let timer = PollTimer::spawn(
            generation,
            self.shared.poll_interval,
            self.shared.live_loops.clone(),
            move || match weak.upgrade() {
                Some(shared) => {
                    shared.fetch_and_apply(Some(generation));
                    true
                }
                None => false,
            },
        )?;

        inner.timer = Some(timer);
        inner.state.is_polling = true;
        tracing::info!(generation, interval_secs = self.shared.poll_interval.as_secs(), "polling started");
        Ok(())
    }

    /// Cancels the pending timer. Idempotent; an in-flight fetch completes
    /// but its result is discarded.
    pub fn stop_polling(&self) {
        let mut inner = self.shared.lock();
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
            tracing::info!("polling stopped");
        }
        inner.state.is_polling = false;
    }

    /// One fetch outside the timer, applied unconditionally. Waits for a
    /// timer fetch already in flight.
    pub fn refresh(&self) {
        self.shared.fetch_and_apply(None);
    }

    /// Reports the user safe. The backend call is best-effort; locally the
    /// current threat is recorded as acknowledged.
    pub fn mark_safe(&self) -> Result<(), ClientError> {
        let user_id = {
            let inner = self.shared.lock();
            inner.state.user.as_ref().ok_or(ClientError::NoUser)?.id.clone()
        };

        if let Err(e) = self.shared.backend.mark_safe(&user_id) {
            logging::log_fetch_failure(DataSource::Client, Some(&user_id), "mark safe", &e);
        }

        let mut inner = self.shared.lock();
        let acknowledged = inner
            .state
            .threat_data
            .as_ref()
            .filter(|view| view.status.is_active)
            .map(|view| view.status.timestamp);
        inner.state.acknowledged_threat = acknowledged;
        tracing::info!(user = %user_id, "marked safe");
        Ok(())
    }

    /// Updates the live device position used for nearby sensors.
    pub fn set_user_location(&self, point: LatLng) {
        let mut inner = self.shared.lock();
        inner.state.user_location = Some(point);
        inner.state.nearby_sensors = nearby_sensors(Some(point));
    }

    pub fn set_location_permission(
        &self,
        permission: LocationPermission,
    ) -> Result<(), ClientError> {
        let mut inner = self.shared.lock();
        inner.state.location_permission = permission;
        self.shared.persist(&inner.state)
    }

    pub fn snapshot(&self) -> ClientSessionState {
        self.shared.lock().state.clone()
    }

    pub fn ui_mode(&self) -> UiMode {
        ui_mode_of(&self.shared.lock().state)
    }

    pub fn polling_state(&self) -> PollingState {
        if self.shared.lock().timer.is_some() {
            PollingState::Polling
        } else {
            PollingState::Idle
        }
    }

    /// Installed timers: 0 or 1.
    pub fn active_timers(&self) -> usize {
        usize::from(self.shared.lock().timer.is_some())
    }

    /// Poll threads still running. Cancelled threads exit at their next
    /// wake-up or once their in-flight tick returns.
    pub fn running_loops(&self) -> usize {
        self.shared.live_loops.load(Ordering::SeqCst)
    }

    pub fn teardown(&self) {
        self.stop_polling();
    }
}

impl Drop for ClientStatusStore {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

/// Maps session state to a UI mode.
pub fn ui_mode_of(state: &ClientSessionState) -> UiMode {
    if !state.has_completed_onboarding {
        return UiMode::Onboarding;
    }
    let current_threat = state
        .threat_data
        .as_ref()
        .filter(|view| view.status.is_active)
        .map(|view: &ThreatView| view.status.timestamp);
    if current_threat.is_some() && current_threat == state.acknowledged_threat {
        return UiMode::MarkedSafe;
    }
    match state.current_status {
        ThreatLevel::Safe => UiMode::Safe,
        ThreatLevel::Warning => UiMode::Warning,
        ThreatLevel::Danger => UiMode::Danger,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
