//! Service configuration.
//!
//! Settings come from the environment (a `.env` file is honored via
//! `dotenv`), optionally layered over a TOML file. Environment values win.
//!
//! ```toml
//! [classifier]
//! threat_threshold = 2.0
//! precipitation_threshold = 2.0
//!
//! [sources]
//! open_meteo_url = "https://api.open-meteo.com/v1/forecast?latitude=14.60&longitude=120.98&hourly=precipitation"
//! sensor_feed_url = "https://sensors.example.org/api/v1/sensors"
//!
//! [store]
//! backend = "github"
//! github_owner = "bantay"
//! github_repo = "status-data"
//!
//! [client]
//! api_base_url = "http://localhost:8080/api/v1"
//! poll_interval_secs = 300
//!
//! [logging]
//! level = "info"
//! ```
//!
//! `PRECIPITATION_THRESHOLD=off` disables the precipitation rule.
//!
//! A missing store target is fatal: the service never runs against an
//! undefined owner/repository or database.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::alert::classifier::{ClassifierConfig, DEFAULT_PRECIPITATION_THRESHOLD_MM};
use crate::logging::LogLevel;

pub const DEFAULT_OPEN_METEO_URL: &str =
    "https://api.open-meteo.com/v1/forecast?latitude=14.60&longitude=120.98&hourly=precipitation";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_SESSION_FILE: &str = "bantay-ai-storage.json";
pub const DEFAULT_THREAT_THRESHOLD_M: f64 = 2.0;
/// Client polling interval: five minutes.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub classifier: ClassifierConfig,
    pub sources: SourcesConfig,
    pub store: StoreConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourcesConfig {
    pub open_meteo_url: Option<String>,
    pub sensor_feed_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    GitHub(GitHubConfig),
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub token: Option<String>,
    pub branch: Option<String>,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub poll_interval: Duration,
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
}

// ---------------------------------------------------------------------------
// File layer
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub classifier: FileClassifier,
    pub sources: FileSources,
    pub store: FileStore,
    pub client: FileClient,
    pub logging: FileLogging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileClassifier {
    pub threat_threshold: Option<f64>,
    pub precipitation_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSources {
    pub open_meteo_url: Option<String>,
    pub sensor_feed_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileStore {
    pub backend: Option<String>,
    pub github_owner: Option<String>,
    pub github_repo: Option<String>,
    pub github_token: Option<String>,
    pub github_branch: Option<String>,
    pub github_api_url: Option<String>,
    pub database_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileClient {
    pub api_base_url: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLogging {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl FileConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

impl Config {
    /// Loads `.env`, then resolves settings from the process environment
    /// over the optional TOML file.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let file = match config_file {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Resolves settings from `env` (any key lookup) over `file`.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &str, fallback: Option<String>| -> Option<String> {
            env(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or(fallback)
        };

        let threat_threshold_m = match env_f64(&env, "THREAT_THRESHOLD")? {
            Some(v) => v,
            None => file
                .classifier
                .threat_threshold
                .unwrap_or(DEFAULT_THREAT_THRESHOLD_M),
        };
        if !(threat_threshold_m.is_finite() && threat_threshold_m > 0.0) {
            return Err(ConfigError::Invalid {
                key: "THREAT_THRESHOLD",
                value: threat_threshold_m.to_string(),
                reason: "must be a positive number of meters".to_string(),
            });
        }
        let precipitation_disabled = env("PRECIPITATION_THRESHOLD")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "off" | "none"));
        let precipitation_threshold_mm = if precipitation_disabled {
            None
        } else {
            let mm = match env_f64(&env, "PRECIPITATION_THRESHOLD")? {
                Some(v) => v,
                None => file
                    .classifier
                    .precipitation_threshold
                    .unwrap_or(DEFAULT_PRECIPITATION_THRESHOLD_MM),
            };
            if !(mm.is_finite() && mm > 0.0) {
                return Err(ConfigError::Invalid {
                    key: "PRECIPITATION_THRESHOLD",
                    value: mm.to_string(),
                    reason: "must be a positive number of millimeters, or off".to_string(),
                });
            }
            Some(mm)
        };

        let sources = SourcesConfig {
            open_meteo_url: lookup("OPEN_METEO_URL", file.sources.open_meteo_url)
                .or_else(|| Some(DEFAULT_OPEN_METEO_URL.to_string())),
            sensor_feed_url: lookup("SENSOR_FEED_URL", file.sources.sensor_feed_url),
        };

        let backend_name = lookup("STORE_BACKEND", file.store.backend)
            .unwrap_or_else(|| "github".to_string());
        let backend = match backend_name.to_ascii_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "github" => StoreBackend::GitHub(GitHubConfig {
                owner: lookup("GITHUB_OWNER", file.store.github_owner)
                    .ok_or(ConfigError::Missing("GITHUB_OWNER"))?,
                repo: lookup("GITHUB_REPO", file.store.github_repo)
                    .ok_or(ConfigError::Missing("GITHUB_REPO"))?,
                token: lookup("GITHUB_TOKEN", file.store.github_token),
                branch: lookup("GITHUB_BRANCH", file.store.github_branch),
                api_url: lookup("GITHUB_API_URL", file.store.github_api_url)
                    .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            }),
            "postgres" => StoreBackend::Postgres {
                database_url: lookup("DATABASE_URL", file.store.database_url)
                    .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    value: other.to_string(),
                    reason: "expected one of github, postgres, memory".to_string(),
                });
            }
        };

        let poll_interval_secs = match env("POLL_INTERVAL_SECS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "POLL_INTERVAL_SECS",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => file
                .client
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        };
        if poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "polling interval must be at least one second".to_string(),
            });
        }

        let client = ClientConfig {
            api_base_url: lookup("API_BASE_URL", file.client.api_base_url)
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            poll_interval: Duration::from_secs(poll_interval_secs),
            session_file: lookup(
                "SESSION_FILE",
                file.client
                    .session_file
                    .map(|p| p.to_string_lossy().into_owned()),
            )
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from(DEFAULT_SESSION_FILE))),
        };

        let level_raw = lookup("LOG_LEVEL", file.logging.level);
        let level = match level_raw {
            Some(raw) => raw.parse::<LogLevel>().map_err(|reason| ConfigError::Invalid {
                key: "LOG_LEVEL",
                value: raw.clone(),
                reason,
            })?,
            None => LogLevel::Info,
        };

        Ok(Config {
            classifier: ClassifierConfig {
                threat_threshold_m,
                precipitation_threshold_mm,
            },
            sources,
            store: StoreConfig { backend },
            client,
            logging: LoggingConfig {
                level,
                file: lookup("LOG_FILE", file.logging.file),
            },
        })
    }
}

fn env_f64(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<f64>, ConfigError> {
    match env(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_github_target() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("GITHUB_OWNER", "bantay"), ("GITHUB_REPO", "status-data")]),
        )
        .expect("config should resolve");

        assert_eq!(config.classifier.threat_threshold_m, 2.0);
        assert_eq!(
            config.classifier.precipitation_threshold_mm,
            Some(DEFAULT_PRECIPITATION_THRESHOLD_MM)
        );
        assert_eq!(config.sources.open_meteo_url.as_deref(), Some(DEFAULT_OPEN_METEO_URL));
        assert_eq!(config.client.poll_interval, Duration::from_secs(300));
        assert_eq!(config.logging.level, LogLevel::Info);
        match config.store.backend {
            StoreBackend::GitHub(github) => {
                assert_eq!(github.owner, "bantay");
                assert_eq!(github.repo, "status-data");
                assert_eq!(github.api_url, DEFAULT_GITHUB_API_URL);
            }
            other => panic!("expected github backend, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_owner_is_fatal() {
        let err = Config::resolve(FileConfig::default(), env_of(&[("GITHUB_REPO", "r")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GITHUB_OWNER")), "got {:?}", err);
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("STORE_BACKEND", "postgres")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn test_threshold_must_parse() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("STORE_BACKEND", "memory"), ("THREAT_THRESHOLD", "high")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "THREAT_THRESHOLD", .. }));
    }

    #[test]
    fn test_precipitation_rule_can_be_switched_off() {
        for raw in ["off", "OFF", " none "] {
            let config = Config::resolve(
                FileConfig::default(),
                env_of(&[("STORE_BACKEND", "memory"), ("PRECIPITATION_THRESHOLD", raw)]),
            )
            .expect("config should resolve");
            assert_eq!(config.classifier.precipitation_threshold_mm, None, "{:?}", raw);
        }

        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("STORE_BACKEND", "memory"), ("PRECIPITATION_THRESHOLD", "-1")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PRECIPITATION_THRESHOLD", .. }));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("STORE_BACKEND", "memory"), ("POLL_INTERVAL_SECS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "POLL_INTERVAL_SECS", .. }));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = FileConfig::from_toml_str(
            r#"
            [classifier]
            threat_threshold = 2.5
            precipitation_threshold = 4.0

            [store]
            backend = "memory"

            [client]
            poll_interval_secs = 60
            "#,
        )
        .expect("toml should parse");

        let config = Config::resolve(file, env_of(&[("THREAT_THRESHOLD", "1.8")]))
            .expect("config should resolve");

        assert_eq!(config.classifier.threat_threshold_m, 1.8);
        assert_eq!(config.classifier.precipitation_threshold_mm, Some(4.0));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.client.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        let result = FileConfig::from_toml_str("[store]\nbucket = \"x\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
