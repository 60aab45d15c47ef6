/// End-to-end tests for the threat status pipeline
///
/// These tests verify:
/// 1. Readings → classify → publish → query → client poll
/// 2. Concurrent reconcilers never lose a write (exactly one CAS wins)
/// 3. A danger status is only lowered by an explicit all-clear
/// 4. Unreadable status always reads as safe, in the query and the client
/// 5. Polling lifecycle: one timer at most, idempotent start/stop
/// 6. Session persistence across client restarts
///
/// Everything runs against the in-memory store; no network needed.
///
/// Run with: cargo test --test pipeline_integration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use serde_json::Value;

use bantay_service::alert::classifier::ClassifierConfig;
use bantay_service::client::{ClientStatusStore, LocalBackend, PollingState, UiMode};
use bantay_service::config::ClientConfig;
use bantay_service::ingest::ReadingsSource;
use bantay_service::model::{
    FetchError, HomeLocation, Readings, StationLevel, StoreError, ThreatLevel, ThreatStatus,
    UserRecord, threat_status_path,
};
use bantay_service::query::{FAILED_CHECK_DESCRIPTION, StatusQuery};
use bantay_service::reconcile::{ReconcileOutcome, Reconciler};
use bantay_service::store::{
    self, MemoryStore, VersionToken, VersionedDocument, VersionedStore,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Readings source whose next snapshot the test controls.
#[derive(Clone, Default)]
struct Gauge(Arc<Mutex<Readings>>);

impl Gauge {
    fn set_level(&self, level_m: f64) {
        *self.0.lock().unwrap() = Readings {
            water_levels: vec![StationLevel {
                station_id: "manila-bay".to_string(),
                level_m,
            }],
            ..Readings::default()
        };
    }
}

impl ReadingsSource for Gauge {
    fn label(&self) -> &str {
        "Test Gauge"
    }

    fn fetch(&self) -> Result<Readings, FetchError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

/// Store wrapper that can be switched into failing every read.
struct Flaky {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl VersionedStore for Flaky {
    fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        self.inner.fetch(path)
    }

    fn put(
        &self,
        path: &str,
        document: &Value,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken, StoreError> {
        self.inner.put(path, document, expected, message)
    }
}

/// Store wrapper holding every reader at a barrier after its read, so
/// that concurrent writers all act on the same version.
struct Rendezvous {
    inner: Arc<MemoryStore>,
    barrier: Arc<Barrier>,
}

impl VersionedStore for Rendezvous {
    fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        let read = self.inner.fetch(path);
        self.barrier.wait();
        read
    }

    fn put(
        &self,
        path: &str,
        document: &Value,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken, StoreError> {
        self.inner.put(path, document, expected, message)
    }
}

fn classifier() -> ClassifierConfig {
    ClassifierConfig {
        threat_threshold_m: 2.0,
        precipitation_threshold_mm: None,
    }
}

fn client_config() -> ClientConfig {
    ClientConfig {
        api_base_url: "http://127.0.0.1:9/api/v1".to_string(),
        poll_interval: Duration::from_secs(3600),
        session_file: None,
    }
}

fn home() -> HomeLocation {
    HomeLocation {
        lat: 14.5833,
        lng: 120.9667,
        address: Some("Roxas Boulevard".to_string()),
    }
}

fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn published(store: &dyn VersionedStore) -> Option<ThreatStatus> {
    store::fetch_record::<ThreatStatus>(store, threat_status_path())
        .unwrap()
        .map(|(status, _)| status)
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

#[test]
fn test_rising_water_reaches_polling_client() {
    let store = Arc::new(MemoryStore::new());
    let gauge = Gauge::default();
    gauge.set_level(0.8);
    let reconciler = Reconciler::new(store.clone(), Box::new(gauge.clone()), classifier());

    // Nothing published yet and readings are normal: no write at all.
    let outcome = reconciler.run_cycle().unwrap();
    assert_eq!(outcome, ReconcileOutcome::Unchanged { level: ThreatLevel::Safe });
    assert!(published(&*store).is_none());

    let client = ClientStatusStore::init(Arc::new(LocalBackend::new(store.clone())), &client_config());
    client.init_user().unwrap();
    client.complete_onboarding(home()).unwrap();
    assert_eq!(client.polling_state(), PollingState::Polling);
    assert!(wait_until(Duration::from_secs(5), || client.snapshot().last_checked.is_some()));
    assert_eq!(client.ui_mode(), UiMode::Safe);

    gauge.set_level(3.2);
    let outcome = reconciler.run_cycle().unwrap();
    assert!(outcome.wrote());
    assert_eq!(store.revision(threat_status_path()), 1);

    let status = published(&*store).unwrap();
    assert_eq!(status.level, ThreatLevel::Danger);
    assert!(status.is_active);
    assert!(status.polygon.as_ref().is_some_and(|p| !p.is_empty()));
    assert!(status.sources.contains("Test Gauge"));

    client.refresh();
    let snapshot = client.snapshot();
    assert_eq!(snapshot.current_status, ThreatLevel::Danger);
    assert_eq!(client.ui_mode(), UiMode::Danger);
    assert!(snapshot.threat_data.unwrap().status.description.starts_with("DANGER"));
    assert!(!snapshot.nearby_sensors.is_empty());

    client.teardown();
}

#[test]
fn test_client_mark_safe_reaches_store() {
    let store = Arc::new(MemoryStore::new());
    let gauge = Gauge::default();
    gauge.set_level(3.5);
    Reconciler::new(store.clone(), Box::new(gauge), classifier())
        .run_cycle()
        .unwrap();

    let client = ClientStatusStore::init(Arc::new(LocalBackend::new(store.clone())), &client_config());
    let user = client.init_user().unwrap();
    client.complete_onboarding(home()).unwrap();
    client.stop_polling();
    client.refresh();
    assert_eq!(client.ui_mode(), UiMode::Danger);

    client.mark_safe().unwrap();
    assert_eq!(client.ui_mode(), UiMode::MarkedSafe);

    let path = format!("users/{}", user.id);
    let (record, _) = store::fetch_record::<UserRecord>(&*store, &path).unwrap().unwrap();
    assert!(record.is_safe);
    assert_eq!(record.home_location, Some(home()));
    assert!(record.last_safe_report.is_some());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_reconcilers_exactly_one_wins() {
    let inner = Arc::new(MemoryStore::new());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [3.2, 3.4]
        .into_iter()
        .map(|level| {
            let store = Arc::new(Rendezvous {
                inner: inner.clone(),
                barrier: barrier.clone(),
            });
            let gauge = Gauge::default();
            gauge.set_level(level);
            thread::spawn(move || {
                Reconciler::new(store, Box::new(gauge), classifier())
                    .run_cycle()
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<ReconcileOutcome> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let updated = outcomes.iter().filter(|o| o.wrote()).count();
    let conflicts = outcomes
        .iter()
        .filter(|o| **o == ReconcileOutcome::Conflict)
        .count();
    assert_eq!(updated, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(inner.revision(threat_status_path()), 1);
    assert_eq!(published(&*inner).unwrap().level, ThreatLevel::Danger);
}

#[test]
fn test_warning_never_overwrites_external_danger() {
    let store = Arc::new(MemoryStore::new());
    let gauge = Gauge::default();
    gauge.set_level(2.5);
    let reconciler = Reconciler::new(store.clone(), Box::new(gauge.clone()), classifier());

    // Another writer published danger.
    let now = Utc.with_ymd_and_hms(2024, 7, 24, 6, 0, 0).unwrap();
    let danger = ThreatStatus::new(
        ThreatLevel::Danger,
        "DANGER: published elsewhere",
        &[],
        now,
        Default::default(),
    );
    store::put_record(&*store, threat_status_path(), &danger, None, "external").unwrap();

    // Warning never lowers a danger status.
    let outcome = reconciler.run_cycle().unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Suppressed { .. }));
    assert_eq!(store.revision(threat_status_path()), 1);
}

// ---------------------------------------------------------------------------
// Downgrade policy
// ---------------------------------------------------------------------------

#[test]
fn test_danger_holds_until_all_clear() {
    let store = Arc::new(MemoryStore::new());
    let gauge = Gauge::default();
    let reconciler = Reconciler::new(store.clone(), Box::new(gauge.clone()), classifier());

    gauge.set_level(3.2);
    assert!(reconciler.run_cycle().unwrap().wrote());

    gauge.set_level(2.5);
    let outcome = reconciler.run_cycle().unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Suppressed {
            current: ThreatLevel::Danger,
            candidate: ThreatLevel::Warning,
        }
    );
    assert_eq!(store.revision(threat_status_path()), 1);

    gauge.set_level(3.3);
    assert_eq!(
        reconciler.run_cycle().unwrap(),
        ReconcileOutcome::Unchanged { level: ThreatLevel::Danger }
    );

    gauge.set_level(0.4);
    match reconciler.run_cycle().unwrap() {
        ReconcileOutcome::Updated { from, to, .. } => {
            assert_eq!(from, ThreatLevel::Danger);
            assert_eq!(to, ThreatLevel::Safe);
        }
        other => panic!("expected all-clear write, got {:?}", other),
    }
    let status = published(&*store).unwrap();
    assert!(!status.is_active);
    assert!(status.polygon.is_none());
}

// ---------------------------------------------------------------------------
// Fail-safe reads
// ---------------------------------------------------------------------------

#[test]
fn test_unreadable_store_reads_as_safe_everywhere() {
    let flaky = Arc::new(Flaky {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(false),
    });
    let gauge = Gauge::default();
    gauge.set_level(3.8);
    Reconciler::new(flaky.clone(), Box::new(gauge), classifier())
        .run_cycle()
        .unwrap();

    let query = StatusQuery::new(flaky.clone());
    assert_eq!(query.current().threat.status.level, ThreatLevel::Danger);

    let client = ClientStatusStore::init(Arc::new(LocalBackend::new(flaky.clone())), &client_config());
    client.init_user().unwrap();
    client.complete_onboarding(home()).unwrap();
    client.stop_polling();
    client.refresh();
    assert_eq!(client.ui_mode(), UiMode::Danger);

    flaky.failing.store(true, Ordering::SeqCst);

    let response = query.current();
    assert_eq!(response.threat.status.level, ThreatLevel::Safe);
    assert!(!response.threat.status.is_active);
    assert_eq!(response.threat.status.description, FAILED_CHECK_DESCRIPTION);

    client.refresh();
    assert_eq!(client.snapshot().current_status, ThreatLevel::Safe);
    assert_eq!(client.ui_mode(), UiMode::Safe);
}

#[test]
fn test_failed_readings_never_publish() {
    struct Down;
    impl ReadingsSource for Down {
        fn label(&self) -> &str {
            "down"
        }
        fn fetch(&self) -> Result<Readings, FetchError> {
            Err(FetchError::HttpError(503))
        }
    }

    let store = Arc::new(MemoryStore::new());
    let outcome = Reconciler::new(store.clone(), Box::new(Down), classifier())
        .run_cycle()
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    assert_eq!(store.revision(threat_status_path()), 0);
}

// ---------------------------------------------------------------------------
// Polling lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_polling_start_and_stop_are_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let client = ClientStatusStore::init(Arc::new(LocalBackend::new(store)), &client_config());

    client.start_polling().unwrap();
    client.start_polling().unwrap();
    assert_eq!(client.active_timers(), 1);
    assert!(wait_until(Duration::from_secs(5), || client.running_loops() == 1));

    client.stop_polling();
    client.stop_polling();
    assert_eq!(client.active_timers(), 0);
    assert_eq!(client.polling_state(), PollingState::Idle);
    assert!(!client.snapshot().is_polling);
    assert!(wait_until(Duration::from_secs(5), || client.running_loops() == 0));
}

#[test]
fn test_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        session_file: Some(dir.path().join("session.json")),
        ..client_config()
    };
    let store = Arc::new(MemoryStore::new());

    let first_user = {
        let client = ClientStatusStore::init(Arc::new(LocalBackend::new(store.clone())), &config);
        assert_eq!(client.app_started().unwrap(), PollingState::Idle);
        assert_eq!(client.ui_mode(), UiMode::Onboarding);
        let user = client.init_user().unwrap();
        client.complete_onboarding(home()).unwrap();
        user
    };

    let client = ClientStatusStore::init(Arc::new(LocalBackend::new(store)), &config);
    let snapshot = client.snapshot();
    assert!(snapshot.has_completed_onboarding);
    assert_eq!(snapshot.home_location, Some(home()));
    assert_eq!(snapshot.user.as_ref().map(|u| u.id.clone()), Some(first_user.id.clone()));
    assert_eq!(client.init_user().unwrap().id, first_user.id);

    assert_eq!(client.app_started().unwrap(), PollingState::Polling);
    client.teardown();
}
