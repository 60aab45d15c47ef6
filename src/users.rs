//! Per-user record updates: safety acknowledgment and home location.
//!
//! Both are read-modify-write cycles against `users/{user_id}` with the
//! version token from the read. A conflict means another request for the
//! same user landed in between; the cycle is retried once from a fresh read
//! and a second conflict is returned to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logging;
use crate::model::{HomeLocation, StoreError, UserRecord, user_record_path};
use crate::store::{self, VersionToken, VersionedStore};

/// Attempts per update: the first try plus one retry after a conflict.
const MAX_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeAcknowledgment {
    pub user_id: String,
    pub is_safe: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub version: VersionToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedLocation {
    pub user_id: String,
    pub path: String,
    pub version: VersionToken,
    pub record: UserRecord,
}

pub struct UserService {
    store: Arc<dyn VersionedStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self { store }
    }

    pub fn mark_safe(&self, user_id: &str) -> Result<SafeAcknowledgment, StoreError> {
        self.mark_safe_at(user_id, Utc::now())
    }

    /// Records that `user_id` reported themselves safe at `now`, creating
    /// the user record when it does not exist yet.
    pub fn mark_safe_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SafeAcknowledgment, StoreError> {
        let message = format!("Mark user {} as safe", user_id);
        let (record, version) = self.update(user_id, &message, |existing| {
            let mut record = existing.unwrap_or_else(|| UserRecord::new(user_id, now));
            record.is_safe = true;
            record.last_safe_report = Some(now);
            record.updated_at = now;
            record
        })?;
        tracing::info!(user = user_id, "marked user as safe");
        Ok(SafeAcknowledgment {
            user_id: record.user_id,
            is_safe: record.is_safe,
            timestamp: now,
            version,
        })
    }

    pub fn save_location(
        &self,
        user_id: &str,
        home: HomeLocation,
    ) -> Result<SavedLocation, StoreError> {
        self.save_location_at(user_id, home, Utc::now())
    }

    /// Stores `home` as the user's home location. The first save creates the
    /// record; later saves keep its creation time and safety fields.
    pub fn save_location_at(
        &self,
        user_id: &str,
        home: HomeLocation,
        now: DateTime<Utc>,
    ) -> Result<SavedLocation, StoreError> {
        let message = format!("Update user {} location", user_id);
        let (record, version) = self.update(user_id, &message, |existing| {
            let mut record = existing.unwrap_or_else(|| UserRecord::new(user_id, now));
            record.home_location = Some(home.clone());
            record.updated_at = now;
            record
        })?;
        tracing::info!(user = user_id, "saved user location");
        Ok(SavedLocation {
            user_id: record.user_id.clone(),
            path: user_record_path(user_id)?,
            version,
            record,
        })
    }

    pub fn get(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let path = user_record_path(user_id)?;
        Ok(store::fetch_record::<UserRecord>(&*self.store, &path)?.map(|(record, _)| record))
    }

    fn update(
        &self,
        user_id: &str,
        message: &str,
        apply: impl Fn(Option<UserRecord>) -> UserRecord,
    ) -> Result<(UserRecord, VersionToken), StoreError> {
        let path = user_record_path(user_id)?;
        let mut attempt = 1;
        loop {
            let (existing, token) = match store::fetch_record::<UserRecord>(&*self.store, &path)? {
                Some((record, token)) => (Some(record), Some(token)),
                None => (None, None),
            };
            let record = apply(existing);

            match store::put_record(&*self.store, &path, &record, token.as_ref(), message) {
                Ok(version) => return Ok((record, version)),
                Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                    tracing::info!(path = %path, attempt, "user record changed underneath, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    logging::log_store_failure(&path, message, &e);
                    return Err(e);
                }
            }
        }
    }
}
