/// PostgreSQL-backed versioned store
///
/// One row per record path. The `version` column is the token: updates are
/// conditioned on it and bump it, inserts only succeed for new paths.

use std::sync::Mutex;

use postgres::{Client, NoTls};
use serde_json::Value;

use super::{VersionToken, VersionedDocument, VersionedStore};
use crate::model::StoreError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS versioned_records (
        path        TEXT PRIMARY KEY,
        document    TEXT NOT NULL,
        version     BIGINT NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
";

pub struct PgStore {
    client: Mutex<Client>,
}

impl PgStore {
    /// Connects and creates the records table if needed.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let mut client = Client::connect(database_url, NoTls).map_err(pg_error)?;
        client.batch_execute(SCHEMA).map_err(pg_error)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn with_client<T>(
        &self,
        f: impl FnOnce(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, StoreError> {
        let mut client = self
            .client
            .lock()
            .map_err(|_| StoreError::Transport("database connection lock poisoned".to_string()))?;
        f(&mut client).map_err(pg_error)
    }
}

fn pg_error(err: postgres::Error) -> StoreError {
    StoreError::Transport(err.to_string())
}

impl VersionedStore for PgStore {
    fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        let row = self.with_client(|client| {
            client.query_opt(
                "SELECT document, version FROM versioned_records WHERE path = $1",
                &[&path],
            )
        })?;

        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row.get(0);
        let version: i64 = row.get(1);
        let document = serde_json::from_str(&text).map_err(|e| StoreError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Some(VersionedDocument {
            document,
            version: VersionToken::new(version.to_string()),
        }))
    }

    fn put(
        &self,
        path: &str,
        document: &Value,
        expected: Option<&VersionToken>,
        _message: &str,
    ) -> Result<VersionToken, StoreError> {
        let text = document.to_string();

        let written = match expected {
            Some(token) => {
                // A token that is not one of ours can never match.
                let Ok(expected_version) = token.as_str().parse::<i64>() else {
                    return Err(StoreError::VersionConflict {
                        path: path.to_string(),
                    });
                };
                self.with_client(|client| {
                    client.query_opt(
                        "UPDATE versioned_records
                         SET document = $2, version = version + 1, updated_at = now()
                         WHERE path = $1 AND version = $3
                         RETURNING version",
                        &[&path, &text, &expected_version],
                    )
                })?
            }
            None => self.with_client(|client| {
                client.query_opt(
                    "INSERT INTO versioned_records (path, document, version)
                     VALUES ($1, $2, 1)
                     ON CONFLICT (path) DO NOTHING
                     RETURNING version",
                    &[&path, &text],
                )
            })?,
        };

        match written {
            Some(row) => {
                let version: i64 = row.get(0);
                Ok(VersionToken::new(version.to_string()))
            }
            None => Err(StoreError::VersionConflict {
                path: path.to_string(),
            }),
        }
    }
}
