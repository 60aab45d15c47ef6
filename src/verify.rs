//! Configuration Verification Module
//!
//! Probes every configured readings source and the status store to show
//! which parts of a deployment are reachable and returning data. Run it
//! (CLI `verify`) after changing URLs or store credentials, before letting
//! the reconciler publish.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{Config, StoreBackend};
use crate::ingest::{self, OpenMeteoSource, ReadingsSource, SensorFeedSource};
use crate::model::{ThreatStatus, threat_status_path};
use crate::store::{self, VersionedStore};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub source_results: Vec<SourceVerification>,
    pub store_result: StoreVerification,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub sources_total: usize,
    pub sources_working: usize,
    pub sources_failed: usize,
    pub store_working: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVerification {
    pub label: String,
    pub status: VerificationStatus,
    pub water_levels: usize,
    pub precipitation_mm: Option<f64>,
    pub rain_intensity_mm_hr: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreVerification {
    pub backend: String,
    pub status: VerificationStatus,
    pub record_present: bool,
    pub published_level: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// Probes
// ============================================================================

/// Fetches once from `source`. A source that answers without usable
/// values is a partial success.
pub fn verify_source(source: &dyn ReadingsSource) -> SourceVerification {
    let mut result = SourceVerification {
        label: source.label().to_string(),
        status: VerificationStatus::Failed,
        water_levels: 0,
        precipitation_mm: None,
        rain_intensity_mm_hr: None,
        error_message: None,
    };

    match source.fetch() {
        Ok(readings) => {
            result.water_levels = readings.water_levels.len();
            result.precipitation_mm = readings.precipitation_mm;
            result.rain_intensity_mm_hr = readings.rain_intensity_mm_hr;
            let has_values = result.water_levels > 0
                || result.precipitation_mm.is_some()
                || result.rain_intensity_mm_hr.is_some();
            result.status = if has_values {
                VerificationStatus::Success
            } else {
                VerificationStatus::PartialSuccess
            };
        }
        Err(e) => {
            result.error_message = Some(e.to_string());
        }
    }

    result
}

/// Reads the published status. An absent record is a partial success:
/// the store answers but nothing has been published yet.
pub fn verify_store(store: &dyn VersionedStore, backend: &str) -> StoreVerification {
    let mut result = StoreVerification {
        backend: backend.to_string(),
        status: VerificationStatus::Failed,
        record_present: false,
        published_level: None,
        error_message: None,
    };

    match store::fetch_record::<ThreatStatus>(store, threat_status_path()) {
        Ok(Some((status, _))) => {
            result.record_present = true;
            result.published_level = Some(status.level.to_string());
            result.status = VerificationStatus::Success;
        }
        Ok(None) => {
            result.status = VerificationStatus::PartialSuccess;
        }
        Err(e) => {
            result.error_message = Some(e.to_string());
        }
    }

    result
}

pub fn backend_name(backend: &StoreBackend) -> String {
    match backend {
        StoreBackend::Memory => "memory".to_string(),
        StoreBackend::GitHub(gh) => format!("github:{}/{}", gh.owner, gh.repo),
        StoreBackend::Postgres { .. } => "postgres".to_string(),
    }
}

// ============================================================================
// Full Verification Runner
// ============================================================================

/// Assembles a report from already-run probes.
pub fn build_report(
    source_results: Vec<SourceVerification>,
    store_result: StoreVerification,
) -> VerificationReport {
    let sources_working = source_results
        .iter()
        .filter(|r| r.status != VerificationStatus::Failed)
        .count();
    let summary = VerificationSummary {
        sources_total: source_results.len(),
        sources_working,
        sources_failed: source_results.len() - sources_working,
        store_working: store_result.status != VerificationStatus::Failed,
    };
    VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        source_results,
        store_result,
        summary,
    }
}

pub fn verify_configuration(config: &Config) -> VerificationReport {
    let mut sources: Vec<Box<dyn ReadingsSource>> = Vec::new();
    let mut source_results = Vec::new();

    match ingest::http_client() {
        Ok(client) => {
            if let Some(url) = &config.sources.open_meteo_url {
                sources.push(Box::new(OpenMeteoSource::new(client.clone(), url.clone())));
            }
            if let Some(url) = &config.sources.sensor_feed_url {
                sources.push(Box::new(SensorFeedSource::new(client, url.clone())));
            }
        }
        Err(e) => {
            source_results.push(SourceVerification {
                label: "http client".to_string(),
                status: VerificationStatus::Failed,
                water_levels: 0,
                precipitation_mm: None,
                rain_intensity_mm_hr: None,
                error_message: Some(e.to_string()),
            });
        }
    }

    println!("🔍 Verifying readings sources...");
    for source in &sources {
        print!("  {} ... ", source.label());
        let result = verify_source(source.as_ref());
        match result.status {
            VerificationStatus::Success => println!("✓ OK"),
            VerificationStatus::PartialSuccess => println!("⚠ Responsive but no values"),
            VerificationStatus::Failed => println!(
                "✗ FAILED: {}",
                result.error_message.as_deref().unwrap_or("Unknown")
            ),
        }
        source_results.push(result);
    }

    println!("\n🔍 Verifying status store...");
    let backend = backend_name(&config.store.backend);
    print!("  {} ... ", backend);
    let store_result = match store::connect(&config.store) {
        Ok(store) => verify_store(&*store, &backend),
        Err(e) => StoreVerification {
            backend: backend.clone(),
            status: VerificationStatus::Failed,
            record_present: false,
            published_level: None,
            error_message: Some(e.to_string()),
        },
    };
    match store_result.status {
        VerificationStatus::Success => println!(
            "✓ OK (published level: {})",
            store_result.published_level.as_deref().unwrap_or("-")
        ),
        VerificationStatus::PartialSuccess => println!("⚠ Reachable, nothing published yet"),
        VerificationStatus::Failed => println!(
            "✗ FAILED: {}",
            store_result.error_message.as_deref().unwrap_or("Unknown")
        ),
    }

    build_report(source_results, store_result)
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!(
        "Readings sources: {}/{} working  ({} failed)",
        report.summary.sources_working, report.summary.sources_total, report.summary.sources_failed
    );
    println!(
        "Status store:     {}",
        if report.summary.store_working { "working" } else { "FAILED" }
    );
    println!("═══════════════════════════════════════════════════════════");
}
