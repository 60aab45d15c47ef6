//! Where a client gets its status from and sends acknowledgments to.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::model::{FetchError, HomeLocation, StoreError};
use crate::query::{StatusQuery, StatusResponse};
use crate::store::VersionedStore;
use crate::users::UserService;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub trait StatusBackend: Send + Sync {
    fn fetch_status(&self) -> Result<StatusResponse, FetchError>;

    fn mark_safe(&self, user_id: &str) -> Result<(), FetchError>;

    fn save_location(&self, user_id: &str, home: &HomeLocation) -> Result<(), FetchError>;
}

impl<B: StatusBackend + ?Sized> StatusBackend for Arc<B> {
    fn fetch_status(&self) -> Result<StatusResponse, FetchError> {
        (**self).fetch_status()
    }

    fn mark_safe(&self, user_id: &str) -> Result<(), FetchError> {
        (**self).mark_safe(user_id)
    }

    fn save_location(&self, user_id: &str, home: &HomeLocation) -> Result<(), FetchError> {
        (**self).save_location(user_id, home)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Talks to a deployed HTTP surface, e.g. `http://localhost:8080/api/v1`.
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    fn post(&self, route: &str, body: serde_json::Value) -> Result<(), FetchError> {
        let response = self.client.post(self.url(route)).json(&body).send()?;
        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }
        Ok(())
    }
}

impl StatusBackend for HttpBackend {
    fn fetch_status(&self) -> Result<StatusResponse, FetchError> {
        let response = self
            .client
            .get(self.url("/status"))
            .header("Accept", "application/json")
            .send()?;
        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|e| FetchError::ParseError(e.to_string()))
    }

    fn mark_safe(&self, user_id: &str) -> Result<(), FetchError> {
        self.post("/user/safe", json!({ "user_id": user_id }))
    }

    fn save_location(&self, user_id: &str, home: &HomeLocation) -> Result<(), FetchError> {
        self.post(
            "/user/location",
            json!({ "user_id": user_id, "home_location": home }),
        )
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Calls the services directly against a store. Used by the CLI `watch`
/// command with a local store and by tests.
pub struct LocalBackend {
    query: StatusQuery,
    users: UserService,
}

impl LocalBackend {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self {
            query: StatusQuery::new(store.clone()),
            users: UserService::new(store),
        }
    }
}

fn store_to_fetch(err: StoreError) -> FetchError {
    match err {
        StoreError::HttpStatus { status, .. } => FetchError::HttpError(status),
        StoreError::Malformed { reason, .. } => FetchError::ParseError(reason),
        other => FetchError::Transport(other.to_string()),
    }
}

impl StatusBackend for LocalBackend {
    fn fetch_status(&self) -> Result<StatusResponse, FetchError> {
        Ok(self.query.current())
    }

    fn mark_safe(&self, user_id: &str) -> Result<(), FetchError> {
        self.users.mark_safe(user_id).map(|_| ()).map_err(store_to_fetch)
    }

    fn save_location(&self, user_id: &str, home: &HomeLocation) -> Result<(), FetchError> {
        self.users
            .save_location(user_id, home.clone())
            .map(|_| ())
            .map_err(store_to_fetch)
    }
}
