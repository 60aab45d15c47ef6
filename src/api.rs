//! HTTP surface.
//!
//! A framework-free request handler: the hosting platform (or the CLI
//! `invoke` command) hands over method, path and body, and gets back a
//! status code, headers and a JSON body. Every response carries the CORS
//! headers browser clients need, errors included.
//!
//! | Route                | Body                                   |
//! |----------------------|----------------------------------------|
//! | `GET /status`        | –                                      |
//! | `POST /user/location`| `{"user_id", "home_location": {...}}`  |
//! | `POST /user/safe`    | `{"user_id"}`                          |
//! | `GET /health`        | –                                      |
//!
//! Paths may carry the `/api/v1` prefix clients use.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::{HomeLocation, StoreError};
use crate::query::StatusQuery;
use crate::store::VersionedStore;
use crate::users::UserService;

pub const API_PREFIX: &str = "/api/v1";

pub const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: &str, path: &str, body: Option<&str>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            body: body.map(str::to_string),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path, None)
    }

    pub fn post(path: &str, body: &Value) -> Self {
        Self::new("POST", path, Some(&body.to_string()))
    }

    /// Route path without prefix, query string or trailing slash.
    fn route(&self) -> &str {
        let path = self.path.split('?').next().unwrap_or_default();
        let path = path.strip_prefix(API_PREFIX).unwrap_or(path);
        let path = path.trim_end_matches('/');
        if path.is_empty() { "/" } else { path }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ApiResponse {
    fn with_body(status: u16, body: String) -> Self {
        let mut headers: Vec<(String, String)> = CORS_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if !body.is_empty() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        Self { status, headers, body }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::with_body(status, body.to_string())
    }

    pub fn error(status: u16, error: &str, details: Option<String>) -> Self {
        let body = match details {
            Some(details) => json!({ "error": error, "details": details }),
            None => json!({ "error": error }),
        };
        Self::json(status, &body)
    }

    pub fn empty(status: u16) -> Self {
        Self::with_body(status, String::new())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed body; `Value::Null` for an empty body.
    pub fn json_body(&self) -> Result<Value, serde_json::Error> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body)
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SafeBody {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationBody {
    user_id: Option<String>,
    home_location: Option<HomeLocation>,
}

fn parse_body<T: for<'de> Deserialize<'de>>(request: &ApiRequest) -> Result<T, ApiResponse> {
    let raw = request.body.as_deref().unwrap_or("").trim();
    let raw = if raw.is_empty() { "{}" } else { raw };
    serde_json::from_str(raw)
        .map_err(|e| ApiResponse::error(400, "Invalid JSON body", Some(e.to_string())))
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn store_error_response(action: &str, err: &StoreError) -> ApiResponse {
    let status = match err {
        StoreError::InvalidPath(_) => 400,
        StoreError::VersionConflict { .. } => 409,
        _ => 500,
    };
    ApiResponse::error(status, action, Some(err.to_string()))
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

pub struct Api {
    query: StatusQuery,
    users: UserService,
}

impl Api {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self {
            query: StatusQuery::new(store.clone()),
            users: UserService::new(store),
        }
    }

    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        self.handle_at(request, Utc::now())
    }

    pub fn handle_at(&self, request: &ApiRequest, now: DateTime<Utc>) -> ApiResponse {
        let route = request.route();
        tracing::debug!(method = %request.method, route, "handling request");

        if request.method == "OPTIONS" {
            return ApiResponse::empty(200);
        }

        let response = match (request.method.as_str(), route) {
            ("GET", "/status") => self.get_status(now),
            ("POST", "/user/location") => self.save_location(request, now),
            ("POST", "/user/safe") => self.mark_safe(request, now),
            ("GET", "/health") => {
                ApiResponse::json(200, &json!({ "status": "ok", "timestamp": now }))
            }
            (_, "/status" | "/user/location" | "/user/safe" | "/health") => {
                ApiResponse::error(405, "Method not allowed", Some(request.method.clone()))
            }
            _ => ApiResponse::error(404, "Not found", Some(route.to_string())),
        };

        if response.status >= 500 {
            tracing::error!(method = %request.method, route, status = response.status, "request failed");
        }
        response
    }

    fn get_status(&self, now: DateTime<Utc>) -> ApiResponse {
        let status = self.query.current_at(now);
        match serde_json::to_value(&status) {
            Ok(body) => ApiResponse::json(200, &body),
            Err(e) => ApiResponse::error(500, "Failed to encode status", Some(e.to_string())),
        }
    }

    fn mark_safe(&self, request: &ApiRequest, now: DateTime<Utc>) -> ApiResponse {
        let body: SafeBody = match parse_body(request) {
            Ok(body) => body,
            Err(response) => return response,
        };
        let Some(user_id) = required(body.user_id) else {
            return ApiResponse::error(400, "Missing required field: user_id", None);
        };

        match self.users.mark_safe_at(&user_id, now) {
            Ok(ack) => ApiResponse::json(
                200,
                &json!({
                    "success": true,
                    "user_id": ack.user_id,
                    "is_safe": ack.is_safe,
                    "timestamp": ack.timestamp,
                    "version": ack.version.as_str(),
                }),
            ),
            Err(e) => store_error_response("Failed to mark user as safe", &e),
        }
    }

    fn save_location(&self, request: &ApiRequest, now: DateTime<Utc>) -> ApiResponse {
        let body: LocationBody = match parse_body(request) {
            Ok(body) => body,
            Err(response) => return response,
        };
        let (Some(user_id), Some(home)) = (required(body.user_id), body.home_location) else {
            return ApiResponse::error(
                400,
                "Missing required fields: user_id and home_location",
                None,
            );
        };
        if !(home.lat.is_finite() && home.lng.is_finite())
            || !(-90.0..=90.0).contains(&home.lat)
            || !(-180.0..=180.0).contains(&home.lng)
        {
            return ApiResponse::error(400, "Invalid home_location coordinates", None);
        }

        match self.users.save_location_at(&user_id, home, now) {
            Ok(saved) => ApiResponse::json(
                200,
                &json!({
                    "success": true,
                    "user_id": saved.user_id,
                    "path": saved.path,
                    "version": saved.version.as_str(),
                }),
            ),
            Err(e) => store_error_response("Failed to save user location", &e),
        }
    }
}
