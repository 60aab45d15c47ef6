/// ThreatLevel, ThreatStatus, UserRecord, Readings, FetchError, StoreError
/// core data structures and error handling
///
/// Core data types for the threat status service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O: only types, record paths and the invariants that hold
/// for every record written to or read from the versioned store.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Record paths
// ---------------------------------------------------------------------------

/// Store path of the singleton threat status record.
pub const THREAT_STATUS_PATH: &str = "threats/latest";

/// Provenance label used when no readings source contributed to a record.
pub const DEFAULT_SOURCE_LABEL: &str = "PAGASA";

pub fn threat_status_path() -> &'static str {
    THREAT_STATUS_PATH
}

/// Returns the store path for a user's record, `users/{user_id}`.
///
/// User ids end up inside a store path and, for the GitHub backend, inside a
/// request URL, so only ids shaped like `demo-user-1721800000000` pass.
pub fn user_record_path(user_id: &str) -> Result<String, StoreError> {
    validate_user_id(user_id)?;
    Ok(format!("users/{}", user_id))
}

/// Longest accepted user id.
pub const MAX_USER_ID_LEN: usize = 128;

/// Accepts `[A-Za-z0-9_-]{1,128}`.
pub fn validate_user_id(user_id: &str) -> Result<(), StoreError> {
    let well_formed = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !well_formed {
        return Err(StoreError::InvalidPath(user_id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Threat levels
// ---------------------------------------------------------------------------

/// Threat severity, in ascending order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    Safe,
    Warning,
    Danger,
}

impl ThreatLevel {
    pub fn is_active(self) -> bool {
        self != ThreatLevel::Safe
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreatLevel::Safe => "safe",
            ThreatLevel::Warning => "warning",
            ThreatLevel::Danger => "danger",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThreatLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(ThreatLevel::Safe),
            "warning" => Ok(ThreatLevel::Warning),
            "danger" => Ok(ThreatLevel::Danger),
            other => Err(format!("unknown threat level: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// WGS84 coordinate pair. Serialized as `[lat, lng]`, the polygon format
/// clients already render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl From<[f64; 2]> for LatLng {
    fn from(pair: [f64; 2]) -> Self {
        LatLng::new(pair[0], pair[1])
    }
}

impl From<LatLng> for [f64; 2] {
    fn from(point: LatLng) -> Self {
        [point.lat, point.lng]
    }
}

/// A user's saved home location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl HomeLocation {
    pub fn point(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The published threat status, stored at [`THREAT_STATUS_PATH`].
///
/// Invariant: `is_active == (level != safe)` and `polygon.is_some() ==
/// is_active`. The constructors uphold it; records read back from the
/// store go through [`ThreatStatus::normalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatStatus {
    pub is_active: bool,
    pub level: ThreatLevel,
    pub description: String,
    #[serde(default)]
    pub polygon: Option<Vec<LatLng>>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: BTreeSet<String>,
    /// Informational only; present when several classifier rules co-fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<u8>,
}

impl ThreatStatus {
    pub fn new(
        level: ThreatLevel,
        description: impl Into<String>,
        area: &[LatLng],
        timestamp: DateTime<Utc>,
        sources: BTreeSet<String>,
    ) -> Self {
        Self {
            is_active: level.is_active(),
            level,
            description: description.into(),
            polygon: level.is_active().then(|| area.to_vec()),
            timestamp,
            sources,
            confidence_score: None,
        }
    }

    /// Inactive record used when nothing has been published or a read failed.
    pub fn safe(description: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let sources = BTreeSet::from([DEFAULT_SOURCE_LABEL.to_string()]);
        Self::new(ThreatLevel::Safe, description, &[], timestamp, sources)
    }

    /// Re-establishes the `is_active`/`polygon` invariant from `level`.
    pub fn normalized(mut self) -> Self {
        self.is_active = self.level.is_active();
        if !self.is_active {
            self.polygon = None;
        } else if self.polygon.is_none() {
            self.polygon = Some(Vec::new());
        }
        self
    }
}

/// One record per user, stored at `users/{user_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub home_location: Option<HomeLocation>,
    #[serde(default)]
    pub is_safe: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_safe_report: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            home_location: None,
            is_safe: false,
            created_at: now,
            updated_at: now,
            last_safe_report: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Water level at a single sensor station, in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationLevel {
    pub station_id: String,
    pub level_m: f64,
}

/// The bag of numeric readings the classifier consumes.
///
/// Any field may be absent when no configured source reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    #[serde(default)]
    pub precipitation_mm: Option<f64>,
    #[serde(default)]
    pub rain_intensity_mm_hr: Option<f64>,
    #[serde(default)]
    pub water_levels: Vec<StationLevel>,
}

impl Readings {
    /// Combines readings from two sources. Scalar readings keep the larger
    /// value; station levels are concatenated.
    pub fn merge(mut self, other: Readings) -> Readings {
        self.precipitation_mm = max_option(self.precipitation_mm, other.precipitation_mm);
        self.rain_intensity_mm_hr =
            max_option(self.rain_intensity_mm_hr, other.rain_intensity_mm_hr);
        self.water_levels.extend(other.water_levels);
        self
    }

    pub fn max_water_level(&self) -> Option<&StationLevel> {
        self.water_levels
            .iter()
            .max_by(|a, b| a.level_m.total_cmp(&b.level_m))
    }
}

fn max_option(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while fetching readings or remote status. Always transient
/// from the pipeline's point of view: callers degrade to a safe default.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Non-2xx HTTP response.
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// Connection failure, timeout, DNS.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The response body could not be deserialized.
    #[error("Parse error: {0}")]
    ParseError(String),
    /// The response was well-formed but carried no usable values.
    #[error("No data available: {0}")]
    NoDataAvailable(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FetchError::HttpError(status.as_u16())
        } else if err.is_decode() {
            FetchError::ParseError(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Errors raised by a versioned record store.
///
/// An absent record is not an error; reads return `Ok(None)`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The presented version token is stale (or the record already exists
    /// for a create-only write).
    #[error("version conflict at {path}")]
    VersionConflict { path: String },
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store returned HTTP {status} for {path}")]
    HttpStatus { status: u16, path: String },
    /// The stored document does not decode into the expected record.
    #[error("malformed record at {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("invalid record path: {0:?}")]
    InvalidPath(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
