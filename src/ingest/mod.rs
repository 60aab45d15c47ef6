/// Readings sources.
///
/// Each source produces a [`Readings`] bag for one classification cycle.
/// The reconciler only sees the [`ReadingsSource`] trait, so live APIs, a
/// replay file and test fixtures are interchangeable.
///
/// Submodules:
/// - `open_meteo`: hourly precipitation forecast.
/// - `sensors`   : water level / rain intensity sensor feed.

pub mod open_meteo;
pub mod sensors;

use std::time::Duration;

use crate::config::SourcesConfig;
use crate::logging::{self, DataSource};
use crate::model::{FetchError, Readings};

pub use open_meteo::OpenMeteoSource;
pub use sensors::SensorFeedSource;

/// Request timeout for every readings API.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// A pluggable provider of classifier input.
pub trait ReadingsSource: Send + Sync {
    /// Provenance label written into the `sources` of published records.
    fn label(&self) -> &str;

    fn fetch(&self) -> Result<Readings, FetchError>;

    /// Tag for this source's log events.
    fn data_source(&self) -> DataSource {
        DataSource::System
    }

    /// All provenance labels this source stands for.
    fn labels(&self) -> Vec<String> {
        vec![self.label().to_string()]
    }
}

pub fn http_client() -> Result<reqwest::blocking::Client, FetchError> {
    reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(concat!("bantay_service/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FetchError::from)
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// Merges the readings of every member source.
///
/// A cycle must not publish a status computed from partial input, so any
/// member failure fails the whole fetch.
pub struct CompositeSource {
    members: Vec<Box<dyn ReadingsSource>>,
}

impl CompositeSource {
    pub fn new(members: Vec<Box<dyn ReadingsSource>>) -> Self {
        Self { members }
    }

    /// Builds the live sources named in configuration.
    pub fn from_config(config: &SourcesConfig) -> Result<Self, FetchError> {
        let client = http_client()?;
        let mut members: Vec<Box<dyn ReadingsSource>> = Vec::new();
        if let Some(url) = &config.open_meteo_url {
            members.push(Box::new(OpenMeteoSource::new(client.clone(), url.clone())));
        }
        if let Some(url) = &config.sensor_feed_url {
            members.push(Box::new(SensorFeedSource::new(client, url.clone())));
        }
        Ok(Self::new(members))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl ReadingsSource for CompositeSource {
    fn label(&self) -> &str {
        "composite"
    }

    fn labels(&self) -> Vec<String> {
        self.members.iter().flat_map(|m| m.labels()).collect()
    }

    fn fetch(&self) -> Result<Readings, FetchError> {
        if self.members.is_empty() {
            return Err(FetchError::NoDataAvailable(
                "no readings sources configured".to_string(),
            ));
        }

        let mut merged = Readings::default();
        let mut first_error = None;
        let mut successful = 0;

        for member in &self.members {
            match member.fetch() {
                Ok(readings) => {
                    successful += 1;
                    merged = merged.merge(readings);
                }
                Err(e) => {
                    logging::log_fetch_failure(
                        member.data_source(),
                        Some(member.label()),
                        "readings fetch",
                        &e,
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        let total = self.members.len();
        logging::log_batch_summary(
            DataSource::System,
            "readings fetch",
            total,
            successful,
            total - successful,
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
