//! Read path for the published threat status.
//!
//! The query never fails. A missing record means nothing has been published
//! yet; a store failure or undecodable record degrades to a safe response so
//! a storage outage cannot raise an alarm on every client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::activity::hours_active_at;
use crate::logging;
use crate::model::{ThreatStatus, threat_status_path};
use crate::store::{self, VersionedStore};

pub const NO_THREATS_DESCRIPTION: &str = "No active threats detected";
pub const FAILED_CHECK_DESCRIPTION: &str = "Status check failed - defaulting to safe";

/// Published status plus the fields derived at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatView {
    #[serde(flatten)]
    pub status: ThreatStatus,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub hours_active: u64,
}

impl ThreatView {
    pub fn at(status: ThreatStatus, now: DateTime<Utc>) -> Self {
        let hours_active = hours_active_at(&status, now);
        Self {
            last_updated: status.timestamp,
            hours_active,
            status,
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub threat: ThreatView,
}

impl StatusResponse {
    /// Response used whenever the published status cannot be determined.
    pub fn fallback(now: DateTime<Utc>) -> Self {
        Self {
            threat: ThreatView::at(ThreatStatus::safe(FAILED_CHECK_DESCRIPTION, now), now),
        }
    }
}

pub struct StatusQuery {
    store: Arc<dyn VersionedStore>,
}

impl StatusQuery {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self { store }
    }

    pub fn current(&self) -> StatusResponse {
        self.current_at(Utc::now())
    }

    pub fn current_at(&self, now: DateTime<Utc>) -> StatusResponse {
        let path = threat_status_path();
        let status = match store::fetch_record::<ThreatStatus>(&*self.store, path) {
            Ok(Some((status, _))) => status.normalized(),
            Ok(None) => ThreatStatus::safe(NO_THREATS_DESCRIPTION, now),
            Err(e) => {
                logging::log_store_failure(path, "status query", &e);
                return StatusResponse::fallback(now);
            }
        };
        tracing::debug!(level = %status.level, "returning threat status");
        StatusResponse {
            threat: ThreatView::at(status, now),
        }
    }
}
