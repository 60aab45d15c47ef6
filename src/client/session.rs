//! Device-local session state and its persisted subset.
//!
//! Only identity, onboarding progress, home location and the location
//! permission survive a restart. Everything else is rebuilt from live
//! queries each session. The file layout matches what the web client keeps
//! in local storage: `{"state": {...}, "version": 0}` with camelCase keys.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ClientError;
use crate::model::{HomeLocation, LatLng, ThreatLevel};
use crate::query::ThreatView;

const SESSION_FORMAT_VERSION: u32 = 0;

/// Device identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUser {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_location: Option<HomeLocation>,
}

impl DeviceUser {
    pub fn new_at(now: DateTime<Utc>) -> Self {
        Self {
            id: format!("demo-user-{}", now.timestamp_millis()),
            created_at: now,
            home_location: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationPermission {
    #[default]
    Default,
    Prompt,
    Granted,
    Denied,
}

/// The subset of session state written to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSession {
    pub user: Option<DeviceUser>,
    pub has_completed_onboarding: bool,
    pub home_location: Option<HomeLocation>,
    pub location_permission: LocationPermission,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbySensor {
    pub station_id: String,
    pub name: String,
    pub distance_m: f64,
}

/// Full client session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientSessionState {
    // persisted
    pub user: Option<DeviceUser>,
    pub has_completed_onboarding: bool,
    pub home_location: Option<HomeLocation>,
    pub location_permission: LocationPermission,

    // ephemeral
    pub current_status: ThreatLevel,
    pub last_checked: Option<DateTime<Utc>>,
    pub threat_data: Option<ThreatView>,
    pub user_location: Option<LatLng>,
    pub nearby_sensors: Vec<NearbySensor>,
    pub is_polling: bool,
    pub last_error: Option<String>,
    /// Timestamp of the threat record the user acknowledged as safe.
    pub acknowledged_threat: Option<DateTime<Utc>>,
}

impl ClientSessionState {
    pub fn restore(persisted: PersistedSession) -> Self {
        Self {
            user: persisted.user,
            has_completed_onboarding: persisted.has_completed_onboarding,
            home_location: persisted.home_location,
            location_permission: persisted.location_permission,
            ..Self::default()
        }
    }

    pub fn persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            has_completed_onboarding: self.has_completed_onboarding,
            home_location: self.home_location.clone(),
            location_permission: self.location_permission,
        }
    }

    /// Point used to pick nearby sensors: live position, else home.
    pub fn reference_point(&self) -> Option<LatLng> {
        self.user_location
            .or_else(|| self.home_location.as_ref().map(HomeLocation::point))
    }
}

// ---------------------------------------------------------------------------
// Session file
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct Envelope {
    state: PersistedSession,
    #[serde(default)]
    version: u32,
}

#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted session; a missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<PersistedSession>, ClientError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ClientError::SessionIo {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let envelope: Envelope = serde_json::from_str(&text)?;
        Ok(Some(envelope.state))
    }

    /// Writes the session through a temporary file so a crash mid-write
    /// leaves the previous session intact.
    pub fn save(&self, session: &PersistedSession) -> Result<(), ClientError> {
        let envelope = Envelope {
            state: session.clone(),
            version: SESSION_FORMAT_VERSION,
        };
        let text = serde_json::to_string_pretty(&envelope)?;
        let tmp = self.path.with_extension("json.tmp");
        let io_err = |source| ClientError::SessionIo {
            path: self.path.clone(),
            source,
        };
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 24, 6, 0, 0).unwrap()
    }

    fn sample() -> PersistedSession {
        PersistedSession {
            user: Some(DeviceUser::new_at(fixed_now())),
            has_completed_onboarding: true,
            home_location: Some(HomeLocation {
                lat: 14.65,
                lng: 121.05,
                address: Some("Marikina".to_string()),
            }),
            location_permission: LocationPermission::Granted,
        }
    }

    #[test]
    fn test_device_user_id_format() {
        let user = DeviceUser::new_at(fixed_now());
        assert_eq!(user.id, format!("demo-user-{}", fixed_now().timestamp_millis()));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));
        assert_eq!(file.load().unwrap(), None);
    }

    #[test]
    fn test_saved_session_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));
        file.save(&sample()).unwrap();
        assert_eq!(file.load().unwrap(), Some(sample()));
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[test]
    fn test_file_uses_web_storage_layout() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));
        file.save(&sample()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 0);
        assert_eq!(raw["state"]["hasCompletedOnboarding"], true);
        assert_eq!(raw["state"]["locationPermission"], "granted");
        assert_eq!(raw["state"]["homeLocation"]["lat"], 14.65);
        assert!(raw["state"].get("currentStatus").is_none());
    }

    #[test]
    fn test_corrupt_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{ not json").unwrap();
        let err = SessionFile::new(path).load().unwrap_err();
        assert!(matches!(err, ClientError::SessionFormat(_)));
    }

    #[test]
    fn test_restore_drops_ephemeral_fields() {
        let state = ClientSessionState::restore(sample());
        assert_eq!(state.current_status, ThreatLevel::Safe);
        assert!(state.threat_data.is_none());
        assert_eq!(state.persisted(), sample());
        assert_eq!(state.reference_point(), Some(LatLng::new(14.65, 121.05)));
    }
}
