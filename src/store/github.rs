/// Repository contents API client
///
/// Records are JSON files under `_data/` in a repository. A read returns the
/// base64-encoded file content plus the blob sha; a write presents the sha it
/// last read and is rejected when the file has moved on. The sha is the
/// version token.
///
/// API Documentation: https://docs.github.com/en/rest/repos/contents

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{VersionToken, VersionedDocument, VersionedStore};
use crate::config::GitHubConfig;
use crate::model::StoreError;

const DATA_DIR: &str = "_data";
const USER_AGENT: &str = concat!("bantay_service/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: PutContentsEntry,
}

#[derive(Debug, Deserialize)]
struct PutContentsEntry {
    sha: String,
}

// ============================================================================
// Store
// ============================================================================

pub struct GitHubStore {
    client: reqwest::blocking::Client,
    config: GitHubConfig,
}

impl GitHubStore {
    pub fn new(config: GitHubConfig) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Maps a logical record path to the repository file holding it.
    pub fn file_path(path: &str) -> String {
        format!("{}/{}.json", DATA_DIR, path)
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            Self::file_path(path)
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::blocking::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json");
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl VersionedStore for GitHubStore {
    fn fetch(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        let mut request = self.request(reqwest::Method::GET, &self.contents_url(path));
        if let Some(branch) = &self.config.branch {
            request = request.query(&[("ref", branch)]);
        }
        let response = request
            .send()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let body: ContentsResponse = response.json().map_err(|e| StoreError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let document = decode_content(&body).map_err(|reason| StoreError::Malformed {
            path: path.to_string(),
            reason,
        })?;

        Ok(Some(VersionedDocument {
            document,
            version: VersionToken::new(body.sha),
        }))
    }

    fn put(
        &self,
        path: &str,
        document: &Value,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken, StoreError> {
        let pretty = serde_json::to_string_pretty(document).map_err(|e| StoreError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let body = PutContentsRequest {
            message,
            content: STANDARD.encode(pretty),
            sha: expected.map(VersionToken::as_str),
            branch: self.config.branch.as_deref(),
        };

        let response = self
            .request(reqwest::Method::PUT, &self.contents_url(path))
            .json(&body)
            .send()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        // 409: sha does not match the file head. 422: sha missing for an
        // existing file, or supplied for a file that does not exist.
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(StoreError::VersionConflict {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let written: PutContentsResponse = response.json().map_err(|e| StoreError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(VersionToken::new(written.content.sha))
    }
}

/// Decodes the base64 file body of a contents response into JSON.
fn decode_content(body: &ContentsResponse) -> Result<Value, String> {
    if !body.encoding.is_empty() && body.encoding != "base64" {
        return Err(format!("unsupported content encoding: {}", body.encoding));
    }
    // The API wraps base64 output at 60 columns.
    let compact: String = body.content.split_whitespace().collect();
    let bytes = STANDARD.decode(compact).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GitHubStore {
        GitHubStore::new(GitHubConfig {
            owner: "bantay".to_string(),
            repo: "status-data".to_string(),
            token: None,
            branch: None,
            api_url: "https://api.github.com/".to_string(),
        })
        .expect("client should build")
    }

    #[test]
    fn test_record_paths_map_to_data_files() {
        assert_eq!(GitHubStore::file_path("threats/latest"), "_data/threats/latest.json");
        assert_eq!(GitHubStore::file_path("users/user-123"), "_data/users/user-123.json");
    }

    #[test]
    fn test_contents_url() {
        assert_eq!(
            store().contents_url("threats/latest"),
            "https://api.github.com/repos/bantay/status-data/contents/_data/threats/latest.json"
        );
    }

    #[test]
    fn test_decode_wrapped_base64_content() {
        let json = r#"{"level":"danger","is_active":true}"#;
        let encoded = STANDARD.encode(json);
        let (head, tail) = encoded.split_at(10);
        let body = ContentsResponse {
            sha: "abc123".to_string(),
            content: format!("{}\n{}\n", head, tail),
            encoding: "base64".to_string(),
        };
        let value = decode_content(&body).expect("should decode");
        assert_eq!(value["level"], "danger");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let body = ContentsResponse {
            sha: "abc123".to_string(),
            content: "!!!not base64!!!".to_string(),
            encoding: "base64".to_string(),
        };
        assert!(decode_content(&body).is_err());
    }

    #[test]
    fn test_put_request_omits_sha_for_create() {
        let body = PutContentsRequest {
            message: "Update threat status: DANGER",
            content: STANDARD.encode("{}"),
            sha: None,
            branch: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("sha").is_none());
        assert!(json.get("branch").is_none());
        assert_eq!(json["message"], "Update threat status: DANGER");
    }
}
