/// Open-Meteo forecast client
///
/// Reads the hourly precipitation forecast for the monitoring area and
/// reports the most recent hour. The URL is taken verbatim from
/// configuration so the coordinates and variables can be tuned without a
/// rebuild.
///
/// API Documentation: https://open-meteo.com/en/docs

use serde::Deserialize;

use super::ReadingsSource;
use crate::logging::DataSource;
use crate::model::{FetchError, Readings};

pub const SOURCE_LABEL: &str = "Open-Meteo";

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    pub hourly: Option<HourlySeries>,
}

#[derive(Debug, Deserialize)]
pub struct HourlySeries {
    #[serde(default)]
    pub time: Vec<String>,
    /// Millimeters per hour slot; the API reports gaps as `null`.
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Extracts the first hourly precipitation value from a forecast body.
pub fn parse_forecast(body: &str) -> Result<Readings, FetchError> {
    let response: ForecastResponse =
        serde_json::from_str(body).map_err(|e| FetchError::ParseError(e.to_string()))?;

    let hourly = response
        .hourly
        .ok_or_else(|| FetchError::NoDataAvailable("response has no hourly block".to_string()))?;

    let precipitation = hourly
        .precipitation
        .first()
        .copied()
        .flatten()
        .ok_or_else(|| {
            FetchError::NoDataAvailable("no hourly precipitation value".to_string())
        })?;

    Ok(Readings {
        precipitation_mm: Some(precipitation),
        ..Readings::default()
    })
}

// ============================================================================
// Source
// ============================================================================

pub struct OpenMeteoSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl OpenMeteoSource {
    pub fn new(client: reqwest::blocking::Client, url: String) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ReadingsSource for OpenMeteoSource {
    fn label(&self) -> &str {
        SOURCE_LABEL
    }

    fn data_source(&self) -> DataSource {
        DataSource::OpenMeteo
    }

    fn fetch(&self) -> Result<Readings, FetchError> {
        tracing::debug!(source = %DataSource::OpenMeteo, url = %self.url, "fetching forecast");
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()?;

        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }

        let body = response.text()?;
        let readings = parse_forecast(&body)?;
        tracing::info!(
            source = %DataSource::OpenMeteo,
            "most recent precipitation: {:.1}mm",
            readings.precipitation_mm.unwrap_or_default()
        );
        Ok(readings)
    }
}
