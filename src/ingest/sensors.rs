/// Sensor network feed client
///
/// The feed lists every deployed sensor with its latest reading:
///
/// ```json
/// [{"sensor_id": "roxas_boulevard_water", "location": {"lat": 14.5895, "lng": 120.9752},
///   "sensor_type": "water_level", "reading_value": 2.3, "status": "warning",
///   "last_updated": "2024-07-24T06:00:00Z", "battery_level": 67}]
/// ```
///
/// `water_level` sensors become station levels (meters); rain intensity
/// sensors contribute the highest intensity reported (mm/hr). Other sensor
/// types, offline sensors and sensors without a reading are ignored.

use serde::Deserialize;

use super::ReadingsSource;
use crate::logging::DataSource;
use crate::model::{FetchError, LatLng, Readings, StationLevel};

pub const SOURCE_LABEL: &str = "Sensor Network";

#[derive(Debug, Clone, Deserialize)]
pub struct SensorReport {
    pub sensor_id: String,
    #[serde(default)]
    pub location: Option<FeedLocation>,
    pub sensor_type: String,
    #[serde(default)]
    pub reading_value: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub battery_level: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FeedLocation {
    pub lat: f64,
    pub lng: f64,
}

impl From<FeedLocation> for LatLng {
    fn from(loc: FeedLocation) -> Self {
        LatLng::new(loc.lat, loc.lng)
    }
}

impl SensorReport {
    fn is_offline(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("offline"))
    }
}

/// Folds a sensor list into classifier readings.
pub fn readings_from_reports(reports: &[SensorReport]) -> Result<Readings, FetchError> {
    let mut readings = Readings::default();
    let mut used = 0;

    for report in reports {
        if report.is_offline() {
            continue;
        }
        let Some(value) = report.reading_value.filter(|v| v.is_finite()) else {
            continue;
        };
        match report.sensor_type.as_str() {
            "water_level" => {
                readings.water_levels.push(StationLevel {
                    station_id: report.sensor_id.clone(),
                    level_m: value,
                });
                used += 1;
            }
            "rain_intensity" | "rain_gauge" => {
                readings.rain_intensity_mm_hr = Some(
                    readings
                        .rain_intensity_mm_hr
                        .map_or(value, |current| current.max(value)),
                );
                used += 1;
            }
            _ => {}
        }
    }

    if used == 0 {
        return Err(FetchError::NoDataAvailable(format!(
            "none of {} sensors reported water level or rain intensity",
            reports.len()
        )));
    }
    Ok(readings)
}

pub fn parse_feed(body: &str) -> Result<Vec<SensorReport>, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::ParseError(e.to_string()))
}

pub struct SensorFeedSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl SensorFeedSource {
    pub fn new(client: reqwest::blocking::Client, url: String) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw sensor list, for verification and diagnostics.
    pub fn fetch_reports(&self) -> Result<Vec<SensorReport>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()?;
        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }
        parse_feed(&response.text()?)
    }
}

impl ReadingsSource for SensorFeedSource {
    fn label(&self) -> &str {
        SOURCE_LABEL
    }

    fn data_source(&self) -> DataSource {
        DataSource::Sensors
    }

    fn fetch(&self) -> Result<Readings, FetchError> {
        let reports = self.fetch_reports()?;
        let readings = readings_from_reports(&reports)?;
        tracing::info!(
            source = %DataSource::Sensors,
            "{} sensors reported, {} water levels",
            reports.len(),
            readings.water_levels.len()
        );
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"[
        {"sensor_id": "mabini_bridge_water", "location": {"lat": 14.6055, "lng": 120.9892},
         "sensor_type": "water_level", "reading_value": 0.8, "status": "normal",
         "last_updated": "2024-07-24T06:00:00Z", "battery_level": 85},
        {"sensor_id": "quezon_blvd_wind", "location": {"lat": 14.5955, "lng": 120.9792},
         "sensor_type": "wind_speed", "reading_value": 15.5, "status": "normal",
         "last_updated": "2024-07-24T06:00:00Z", "battery_level": 92},
        {"sensor_id": "roxas_boulevard_water", "location": {"lat": 14.5895, "lng": 120.9752},
         "sensor_type": "water_level", "reading_value": 2.3, "status": "warning",
         "last_updated": "2024-07-24T06:00:00Z", "battery_level": 67},
        {"sensor_id": "espana_rain", "sensor_type": "rain_intensity", "reading_value": 72.0},
        {"sensor_id": "taft_rain", "sensor_type": "rain_gauge", "reading_value": 41.0}
    ]"#;

    #[test]
    fn test_feed_maps_sensor_types() {
        let reports = parse_feed(FEED).expect("valid feed");
        assert_eq!(reports.len(), 5);
        let readings = readings_from_reports(&reports).expect("usable readings");

        assert_eq!(readings.water_levels.len(), 2);
        assert_eq!(readings.max_water_level().unwrap().station_id, "roxas_boulevard_water");
        assert_eq!(readings.rain_intensity_mm_hr, Some(72.0));
        assert_eq!(readings.precipitation_mm, None);
    }

    #[test]
    fn test_feed_ids_resolve_to_registry_names() {
        use crate::alert::classifier::{ClassifierConfig, classify};

        let readings = readings_from_reports(&parse_feed(FEED).unwrap()).unwrap();
        let config = ClassifierConfig {
            threat_threshold_m: 2.0,
            precipitation_threshold_mm: None,
        };
        let assessment = classify(&readings, &config);
        assert!(assessment.level.is_active());
        assert!(
            assessment.description.contains("Roxas Boulevard"),
            "description {:?}",
            assessment.description
        );
        assert!(!assessment.description.contains("roxas_boulevard_water"));

        for report in parse_feed(FEED).unwrap() {
            if report.sensor_id != "espana_rain" && report.sensor_id != "taft_rain" {
                assert!(
                    crate::stations::find_station(&report.sensor_id).is_some(),
                    "{} missing from registry",
                    report.sensor_id
                );
            }
        }
    }

    #[test]
    fn test_offline_and_missing_readings_skipped() {
        let body = r#"[
            {"sensor_id": "a", "sensor_type": "water_level", "reading_value": 3.9, "status": "OFFLINE"},
            {"sensor_id": "b", "sensor_type": "water_level", "reading_value": null},
            {"sensor_id": "c", "sensor_type": "water_level", "reading_value": 1.1}
        ]"#;
        let readings = readings_from_reports(&parse_feed(body).unwrap()).unwrap();
        assert_eq!(readings.water_levels.len(), 1);
        assert_eq!(readings.water_levels[0].station_id, "c");
    }

    #[test]
    fn test_feed_without_relevant_sensors_is_no_data() {
        let body = r#"[{"sensor_id": "w", "sensor_type": "wind_speed", "reading_value": 10.0}]"#;
        let reports = parse_feed(body).unwrap();
        assert!(matches!(
            readings_from_reports(&reports),
            Err(FetchError::NoDataAvailable(_))
        ));
        assert!(matches!(readings_from_reports(&[]), Err(FetchError::NoDataAvailable(_))));
    }

    #[test]
    fn test_non_array_is_parse_error() {
        assert!(matches!(parse_feed(r#"{"sensors": []}"#), Err(FetchError::ParseError(_))));
    }

    #[test]
    fn test_feed_location_converts() {
        let reports = parse_feed(FEED).unwrap();
        let point: LatLng = reports[0].location.unwrap().into();
        assert_eq!(point, LatLng::new(14.6055, 120.9892));
    }
}
