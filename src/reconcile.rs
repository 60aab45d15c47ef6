//! Status reconciliation.
//!
//! One cycle reads the published threat status, classifies fresh readings
//! and publishes the result when the level changed. Every write is
//! conditional on the version read at the start of the cycle, so two
//! overlapping cycles can never both publish: the loser sees a conflict and
//! gives up until the next trigger.
//!
//! Downgrades are clear-only. Once `danger` is published, a `warning`
//! candidate does not replace it; only an explicit all-clear (`safe`) does.
//! This keeps clients from flickering between danger and warning while a
//! reading hovers around the danger mark.
//!
//! # Clock injection
//! `run_cycle_at` takes `now` so the timestamp of the published record is
//! deterministic in tests.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::alert::classifier::{self, ClassifierConfig};
use crate::ingest::ReadingsSource;
use crate::logging;
use crate::model::{
    DEFAULT_SOURCE_LABEL, FetchError, LatLng, StoreError, ThreatLevel, ThreatStatus,
    threat_status_path,
};
use crate::stations::METRO_MANILA_POLYGON;
use crate::store::{self, VersionToken, VersionedStore};

// ---------------------------------------------------------------------------
// Transition policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Candidate equals the stored level.
    NoChange,
    /// Candidate is a partial downgrade from danger.
    Suppress,
    Write,
}

/// Decides whether `candidate` replaces the stored `current` level.
///
///   same level          →  NoChange
///   danger  → warning   →  Suppress
///   danger  → safe      →  Write    (explicit clear)
///   anything else       →  Write
pub fn transition(current: ThreatLevel, candidate: ThreatLevel) -> Transition {
    match (current, candidate) {
        (c, n) if c == n => Transition::NoChange,
        (ThreatLevel::Danger, ThreatLevel::Warning) => Transition::Suppress,
        _ => Transition::Write,
    }
}

// ---------------------------------------------------------------------------
// Cycle outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The stored status could not be read or decoded.
    StoreRead(StoreError),
    /// Readings could not be fetched; the fail-safe candidate is never
    /// published.
    Readings(FetchError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Unchanged { level: ThreatLevel },
    Updated {
        from: ThreatLevel,
        to: ThreatLevel,
        version: VersionToken,
    },
    Suppressed {
        current: ThreatLevel,
        candidate: ThreatLevel,
    },
    /// Another writer published first.
    Conflict,
    Skipped(SkipReason),
}

impl ReconcileOutcome {
    pub fn wrote(&self) -> bool {
        matches!(self, ReconcileOutcome::Updated { .. })
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Unchanged { level } => write!(f, "unchanged ({})", level),
            ReconcileOutcome::Updated { from, to, version } => {
                write!(f, "updated {} -> {} (version {})", from, to, version)
            }
            ReconcileOutcome::Suppressed { current, candidate } => {
                write!(f, "suppressed {} -> {} downgrade", current, candidate)
            }
            ReconcileOutcome::Conflict => write!(f, "conflict, another writer won"),
            ReconcileOutcome::Skipped(SkipReason::StoreRead(e)) => {
                write!(f, "skipped, status read failed: {}", e)
            }
            ReconcileOutcome::Skipped(SkipReason::Readings(e)) => {
                write!(f, "skipped, readings unavailable: {}", e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    store: Arc<dyn VersionedStore>,
    source: Box<dyn ReadingsSource>,
    classifier: ClassifierConfig,
    area: Vec<LatLng>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        source: Box<dyn ReadingsSource>,
        classifier: ClassifierConfig,
    ) -> Self {
        Self {
            store,
            source,
            classifier,
            area: METRO_MANILA_POLYGON.to_vec(),
        }
    }

    /// Replaces the affected-area polygon published with active threats.
    pub fn with_area(mut self, area: Vec<LatLng>) -> Self {
        self.area = area;
        self
    }

    pub fn run_cycle(&self) -> Result<ReconcileOutcome, StoreError> {
        self.run_cycle_at(Utc::now())
    }

    /// Runs one reconciliation cycle.
    ///
    /// Only non-conflict write failures are errors; everything else is an
    /// outcome the caller logs and moves past.
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<ReconcileOutcome, StoreError> {
        let path = threat_status_path();

        let (current, token) = match store::fetch_record::<ThreatStatus>(&*self.store, path) {
            Ok(Some((status, token))) => (status.normalized().level, Some(token)),
            Ok(None) => (ThreatLevel::Safe, None),
            Err(e) => {
                logging::log_store_failure(path, "status read", &e);
                return Ok(ReconcileOutcome::Skipped(SkipReason::StoreRead(e)));
            }
        };

        let readings = match self.source.fetch() {
            Ok(readings) => readings,
            Err(e) => {
                logging::log_fetch_failure(
                    self.source.data_source(),
                    Some(self.source.label()),
                    "readings fetch",
                    &e,
                );
                return Ok(ReconcileOutcome::Skipped(SkipReason::Readings(e)));
            }
        };

        let assessment = classifier::classify(&readings, &self.classifier);
        let candidate = assessment.level;

        match transition(current, candidate) {
            Transition::NoChange => {
                tracing::info!(level = %current, "no change in status, skipping update");
                return Ok(ReconcileOutcome::Unchanged { level: current });
            }
            Transition::Suppress => {
                tracing::info!(
                    current = %current,
                    candidate = %candidate,
                    "holding danger until an explicit all-clear"
                );
                return Ok(ReconcileOutcome::Suppressed { current, candidate });
            }
            Transition::Write => {}
        }

        tracing::info!(from = %current, to = %candidate, "status changed, publishing");

        let status = assessment.into_status(&self.area, self.source_labels(), now);
        let message = format!("Update threat status: {}", candidate.as_str().to_uppercase());

        match store::put_record(&*self.store, path, &status, token.as_ref(), &message) {
            Ok(version) => {
                tracing::info!(level = %candidate, version = %version, "threat status published");
                Ok(ReconcileOutcome::Updated {
                    from: current,
                    to: candidate,
                    version,
                })
            }
            Err(e) if e.is_conflict() => {
                logging::log_store_failure(path, "status write", &e);
                Ok(ReconcileOutcome::Conflict)
            }
            Err(e) => {
                logging::log_store_failure(path, "status write", &e);
                Err(e)
            }
        }
    }

    fn source_labels(&self) -> BTreeSet<String> {
        let mut labels: BTreeSet<String> = self.source.labels().into_iter().collect();
        if labels.is_empty() {
            labels.insert(DEFAULT_SOURCE_LABEL.to_string());
        }
        labels
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Readings, StationLevel};
    use crate::store::{MemoryStore, VersionedDocument};
    use chrono::TimeZone;
    use serde_json::Value;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 24, 6, 0, 0).unwrap()
    }

    struct Fixed(Result<Readings, FetchError>);

    impl ReadingsSource for Fixed {
        fn label(&self) -> &str {
            "Sensor Network"
        }
        fn fetch(&self) -> Result<Readings, FetchError> {
            self.0.clone()
        }
    }

    fn water(level_m: f64) -> Box<dyn ReadingsSource> {
        Box::new(Fixed(Ok(Readings {
            water_levels: vec![StationLevel {
                station_id: "pasig-river".to_string(),
                level_m,
            }],
            ..Readings::default()
        })))
    }

    fn reconciler(store: &Arc<MemoryStore>, source: Box<dyn ReadingsSource>) -> Reconciler {
        Reconciler::new(store.clone(), source, ClassifierConfig::default())
    }

    fn stored(store: &MemoryStore) -> ThreatStatus {
        store::fetch_record::<ThreatStatus>(store, threat_status_path())
            .unwrap()
            .expect("status record exists")
            .0
    }

    fn seed(store: &MemoryStore, level: ThreatLevel) {
        let status = ThreatStatus::new(
            level,
            "seeded",
            METRO_MANILA_POLYGON,
            fixed_now() - chrono::Duration::hours(1),
            BTreeSet::new(),
        );
        store::put_record(store, threat_status_path(), &status, None, "seed").unwrap();
    }

    // --- Transition policy --------------------------------------------------

    #[test]
    fn test_transition_table() {
        use ThreatLevel::*;
        let cases = [
            (Safe, Safe, Transition::NoChange),
            (Warning, Warning, Transition::NoChange),
            (Danger, Danger, Transition::NoChange),
            (Safe, Warning, Transition::Write),
            (Safe, Danger, Transition::Write),
            (Warning, Danger, Transition::Write),
            (Warning, Safe, Transition::Write),
            (Danger, Safe, Transition::Write),
            (Danger, Warning, Transition::Suppress),
        ];
        for (current, candidate, expected) in cases {
            assert_eq!(
                transition(current, candidate),
                expected,
                "{} -> {}",
                current,
                candidate
            );
        }
    }

    // --- Cycles -------------------------------------------------------------

    #[test]
    fn test_absent_record_and_safe_candidate_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let outcome = reconciler(&store, water(0.5)).run_cycle_at(fixed_now()).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged { level: ThreatLevel::Safe });
        assert_eq!(store.revision(threat_status_path()), 0);
    }

    #[test]
    fn test_danger_published_from_absent_record() {
        let store = Arc::new(MemoryStore::new());
        let outcome = reconciler(&store, water(3.2)).run_cycle_at(fixed_now()).unwrap();
        assert!(outcome.wrote(), "got {:?}", outcome);

        let status = stored(&store);
        assert_eq!(status.level, ThreatLevel::Danger);
        assert!(status.is_active);
        assert_eq!(status.polygon.as_deref(), Some(METRO_MANILA_POLYGON));
        assert_eq!(status.timestamp, fixed_now());
        assert!(status.sources.contains("Sensor Network"));
    }

    #[test]
    fn test_same_level_is_not_rewritten() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, ThreatLevel::Warning);
        let outcome = reconciler(&store, water(2.2)).run_cycle_at(fixed_now()).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged { level: ThreatLevel::Warning });
        assert_eq!(store.revision(threat_status_path()), 1);
    }

    #[test]
    fn test_danger_to_warning_is_suppressed() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, ThreatLevel::Danger);
        let outcome = reconciler(&store, water(2.4)).run_cycle_at(fixed_now()).unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Suppressed { .. }));
        assert_eq!(stored(&store).level, ThreatLevel::Danger);
        assert_eq!(store.revision(threat_status_path()), 1);
    }

    #[test]
    fn test_danger_clears_to_safe() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, ThreatLevel::Danger);
        let outcome = reconciler(&store, water(0.6)).run_cycle_at(fixed_now()).unwrap();
        assert!(outcome.wrote());

        let status = stored(&store);
        assert_eq!(status.level, ThreatLevel::Safe);
        assert!(!status.is_active);
        assert!(status.polygon.is_none());
    }

    #[test]
    fn test_fetch_failure_skips_without_writing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, ThreatLevel::Danger);
        let source = Box::new(Fixed(Err(FetchError::HttpError(503))));
        let outcome = reconciler(&store, source).run_cycle_at(fixed_now()).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::Readings(FetchError::HttpError(503)))
        );
        assert_eq!(stored(&store).level, ThreatLevel::Danger);
    }

    #[test]
    fn test_malformed_record_skips_cycle() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(threat_status_path(), &serde_json::json!({"level": "flood"}), None, "bad")
            .unwrap();
        let outcome = reconciler(&store, water(3.5)).run_cycle_at(fixed_now()).unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::StoreRead(StoreError::Malformed { .. }))
        ));
        assert_eq!(store.revision(threat_status_path()), 1);
    }

    // --- Write failures -----------------------------------------------------

    /// Reads like a memory store; every write fails with `error`.
    struct RejectingStore {
        inner: MemoryStore,
        error: StoreError,
    }

    impl VersionedStore for RejectingStore {
        fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
            self.inner.fetch(path)
        }
        fn put(
            &self,
            _path: &str,
            _document: &Value,
            _expected: Option<&VersionToken>,
            _message: &str,
        ) -> Result<VersionToken, StoreError> {
            Err(self.error.clone())
        }
    }

    #[test]
    fn test_conflict_is_an_outcome() {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            error: StoreError::VersionConflict { path: threat_status_path().to_string() },
        });
        let reconciler = Reconciler::new(store, water(3.2), ClassifierConfig::default());
        assert_eq!(reconciler.run_cycle_at(fixed_now()), Ok(ReconcileOutcome::Conflict));
    }

    #[test]
    fn test_other_write_failures_surface() {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            error: StoreError::Transport("connection reset".to_string()),
        });
        let reconciler = Reconciler::new(store, water(3.2), ClassifierConfig::default());
        assert_eq!(
            reconciler.run_cycle_at(fixed_now()),
            Err(StoreError::Transport("connection reset".to_string()))
        );
    }

    #[test]
    fn test_custom_area_is_published() {
        let store = Arc::new(MemoryStore::new());
        let area = vec![LatLng::new(14.6, 121.0), LatLng::new(14.5, 121.1), LatLng::new(14.6, 121.0)];
        reconciler(&store, water(2.1))
            .with_area(area.clone())
            .run_cycle_at(fixed_now())
            .unwrap();
        assert_eq!(stored(&store).polygon, Some(area));
    }
}
