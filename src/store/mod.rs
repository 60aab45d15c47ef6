//! Versioned record store.
//!
//! Every shared record (the threat status singleton and one record per user)
//! lives in an external store that hands out an opaque version token with
//! each read and accepts conditional writes against it. This module exposes
//! that capability as a narrow compare-and-swap interface; the backends
//! differ only in transport.
//!
//! Submodules:
//! - `memory`: in-process store for development and tests.
//! - `github`: repository contents API (content + sha, conditional put).
//! - `pg`    : PostgreSQL table with a version column.

pub mod github;
pub mod memory;
pub mod pg;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{StoreBackend, StoreConfig};
use crate::model::StoreError;

pub use github::GitHubStore;
pub use memory::MemoryStore;
pub use pg::PgStore;

/// Opaque token identifying the version of a record a writer last read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored JSON document together with its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub document: Value,
    pub version: VersionToken,
}

/// Compare-and-swap access to path-addressed JSON records.
pub trait VersionedStore: Send + Sync {
    /// Reads the record at `path`. An absent record is `Ok(None)`.
    fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError>;

    /// Writes `document` at `path` if the record's current version equals
    /// `expected`. `expected = None` only succeeds when no record exists.
    ///
    /// Returns the new version token, or `StoreError::VersionConflict`
    /// when the precondition does not hold.
    fn put(
        &self,
        path: &str,
        document: &Value,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken, StoreError>;
}

impl<S: VersionedStore + ?Sized> VersionedStore for Arc<S> {
    fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        (**self).fetch(path)
    }

    fn put(
        &self,
        path: &str,
        document: &Value,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken, StoreError> {
        (**self).put(path, document, expected, message)
    }
}

// ---------------------------------------------------------------------------
// Typed helpers
// ---------------------------------------------------------------------------

/// Reads and decodes the record at `path`.
pub fn fetch_record<T: DeserializeOwned>(
    store: &dyn VersionedStore,
    path: &str,
) -> Result<Option<(T, VersionToken)>, StoreError> {
    let Some(stored) = store.fetch(path)? else {
        return Ok(None);
    };
    let record = serde_json::from_value(stored.document).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some((record, stored.version)))
}

/// Encodes and conditionally writes `record` at `path`.
pub fn put_record<T: Serialize>(
    store: &dyn VersionedStore,
    path: &str,
    record: &T,
    expected: Option<&VersionToken>,
    message: &str,
) -> Result<VersionToken, StoreError> {
    let document = serde_json::to_value(record).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    store.put(path, &document, expected, message)
}

/// Opens the backend selected by configuration.
pub fn connect(config: &StoreConfig) -> Result<Arc<dyn VersionedStore>, StoreError> {
    let store: Arc<dyn VersionedStore> = match &config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::GitHub(github) => Arc::new(GitHubStore::new(github.clone())?),
        StoreBackend::Postgres { database_url } => Arc::new(PgStore::connect(database_url)?),
    };
    Ok(store)
}
