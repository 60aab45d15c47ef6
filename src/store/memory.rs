//! In-process versioned store.
//!
//! Tokens are a per-path revision counter. Used for local development
//! (`STORE_BACKEND=memory`) and as the store behind the test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::{VersionToken, VersionedDocument, VersionedStore};
use crate::model::StoreError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, (Value, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes recorded at `path`.
    pub fn revision(&self, path: &str) -> u64 {
        self.lock().get(path).map(|(_, rev)| *rev).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Value, u64)>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl VersionedStore for MemoryStore {
    fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        Ok(self.lock().get(path).map(|(document, rev)| VersionedDocument {
            document: document.clone(),
            version: VersionToken::new(rev.to_string()),
        }))
    }

    fn put(
        &self,
        path: &str,
        document: &Value,
        expected: Option<&VersionToken>,
        _message: &str,
    ) -> Result<VersionToken, StoreError> {
        let mut records = self.lock();
        let current = records.get(path).map(|(_, rev)| *rev);

        let matches = match (current, expected) {
            (None, None) => true,
            (Some(rev), Some(token)) => token.as_str() == rev.to_string(),
            _ => false,
        };
        if !matches {
            return Err(StoreError::VersionConflict {
                path: path.to_string(),
            });
        }

        let next = current.unwrap_or(0) + 1;
        records.insert(path.to_string(), (document.clone(), next));
        Ok(VersionToken::new(next.to_string()))
    }
}
