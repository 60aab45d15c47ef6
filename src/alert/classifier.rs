//! Rule-based threat classification.
//!
//! A single rule table maps a bag of readings to a threat level. Each rule
//! is evaluated independently (per station where it concerns water levels)
//! and the resulting candidates are unioned: the overall level is the most
//! severe candidate, and the description comes from the first rule in table
//! order that produced that level.
//!
//! Classification is a pure function of its input. The same readings and
//! configuration always yield an identical assessment, description text
//! included.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::model::{LatLng, Readings, ThreatLevel, ThreatStatus};
use crate::stations;

/// Water level above which a threshold breach is danger rather than warning.
pub const DANGER_LEVEL_M: f64 = 3.0;
/// Rain intensity that, together with elevated water, warrants a warning.
pub const INTENSE_RAIN_MM_HR: f64 = 60.0;
/// Water level considered elevated for the intense-rain rule.
pub const ELEVATED_LEVEL_M: f64 = 1.5;
/// Water level treated as a rising trend regardless of the threshold.
pub const RISING_LEVEL_M: f64 = 2.0;
/// Precipitation (mm) that alone warrants danger; half of it warrants a warning.
pub const DEFAULT_PRECIPITATION_THRESHOLD_MM: f64 = 2.0;

pub const SAFE_DESCRIPTION: &str = "All monitored areas show normal conditions.";

/// Classifier sensitivity, tuned through configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    /// `THREAT_THRESHOLD`: water level (m) at which a station is a threat.
    pub threat_threshold_m: f64,
    /// `PRECIPITATION_THRESHOLD`: precipitation (mm) at or above which the
    /// area is in danger; above half of it, a warning. `None` disables the
    /// rule.
    pub precipitation_threshold_mm: Option<f64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threat_threshold_m: 2.0,
            precipitation_threshold_mm: Some(DEFAULT_PRECIPITATION_THRESHOLD_MM),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rule {
    WaterLevelThreshold,
    IntenseRainfall,
    RisingTrend,
    HeavyPrecipitation,
}

/// One rule firing, possibly for one station.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub rule: Rule,
    pub level: ThreatLevel,
    pub station_id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
    pub description: String,
    pub triggers: Vec<Trigger>,
    /// `min(n * 20 + 60, 95)` when `n >= 2` distinct rules co-fire.
    /// Informational.
    pub confidence_score: Option<u8>,
}

impl ThreatAssessment {
    /// Builds the record to publish for this assessment.
    pub fn into_status(
        self,
        area: &[LatLng],
        sources: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> ThreatStatus {
        let mut status = ThreatStatus::new(self.level, self.description, area, now, sources);
        status.confidence_score = self.confidence_score;
        status
    }
}

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

type RuleFn = fn(&Readings, &ClassifierConfig, &mut Vec<Trigger>);

/// Evaluated in order; order decides which description wins a tie.
static RULES: &[RuleFn] = &[
    water_level_threshold,
    intense_rainfall,
    rising_trend,
    heavy_precipitation,
];

fn water_level_threshold(readings: &Readings, config: &ClassifierConfig, out: &mut Vec<Trigger>) {
    for station in &readings.water_levels {
        if !(station.level_m >= config.threat_threshold_m) {
            continue;
        }
        let name = stations::display_name(&station.station_id);
        let (level, description) = if station.level_m > DANGER_LEVEL_M {
            (
                ThreatLevel::Danger,
                format!(
                    "DANGER: Water level at {} is {:.2}m, above the {:.1}m danger mark. Risk of severe flooding.",
                    name, station.level_m, DANGER_LEVEL_M
                ),
            )
        } else {
            (
                ThreatLevel::Warning,
                format!(
                    "WARNING: Water level at {} is {:.2}m, at or above the {:.2}m alert threshold.",
                    name, station.level_m, config.threat_threshold_m
                ),
            )
        };
        out.push(Trigger {
            rule: Rule::WaterLevelThreshold,
            level,
            station_id: Some(station.station_id.clone()),
            description,
        });
    }
}

fn intense_rainfall(readings: &Readings, _config: &ClassifierConfig, out: &mut Vec<Trigger>) {
    let Some(intensity) = readings.rain_intensity_mm_hr else {
        return;
    };
    if !(intensity > INTENSE_RAIN_MM_HR) {
        return;
    }
    for station in &readings.water_levels {
        if station.level_m > ELEVATED_LEVEL_M {
            out.push(Trigger {
                rule: Rule::IntenseRainfall,
                level: ThreatLevel::Warning,
                station_id: Some(station.station_id.clone()),
                description: format!(
                    "WARNING: Intense rainfall ({:.1} mm/hr) with elevated water at {} ({:.2}m). Monitor conditions.",
                    intensity,
                    stations::display_name(&station.station_id),
                    station.level_m
                ),
            });
        }
    }
}

fn rising_trend(readings: &Readings, _config: &ClassifierConfig, out: &mut Vec<Trigger>) {
    for station in &readings.water_levels {
        if station.level_m > RISING_LEVEL_M {
            out.push(Trigger {
                rule: Rule::RisingTrend,
                level: ThreatLevel::Warning,
                station_id: Some(station.station_id.clone()),
                description: format!(
                    "WARNING: Rising water at {} ({:.2}m). Monitor conditions.",
                    stations::display_name(&station.station_id),
                    station.level_m
                ),
            });
        }
    }
}

fn heavy_precipitation(readings: &Readings, config: &ClassifierConfig, out: &mut Vec<Trigger>) {
    let (Some(threshold), Some(precipitation)) =
        (config.precipitation_threshold_mm, readings.precipitation_mm)
    else {
        return;
    };
    let (level, description) = if precipitation >= threshold {
        (
            ThreatLevel::Danger,
            format!(
                "DANGER: Heavy precipitation detected ({:.1}mm). Risk of localized flooding.",
                precipitation
            ),
        )
    } else if precipitation > threshold / 2.0 {
        (
            ThreatLevel::Warning,
            format!(
                "WARNING: Moderate precipitation detected ({:.1}mm). Monitor conditions.",
                precipitation
            ),
        )
    } else {
        return;
    };
    out.push(Trigger {
        rule: Rule::HeavyPrecipitation,
        level,
        station_id: None,
        description,
    });
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classifies `readings` against the rule table.
pub fn classify(readings: &Readings, config: &ClassifierConfig) -> ThreatAssessment {
    let mut triggers = Vec::new();
    for rule in RULES {
        rule(readings, config, &mut triggers);
    }

    let level = triggers
        .iter()
        .map(|t| t.level)
        .max()
        .unwrap_or(ThreatLevel::Safe);

    let description = triggers
        .iter()
        .find(|t| t.level == level)
        .map(|t| t.description.clone())
        .unwrap_or_else(|| SAFE_DESCRIPTION.to_string());

    let distinct_rules: BTreeSet<Rule> = triggers.iter().map(|t| t.rule).collect();
    let confidence_score = confidence_score(distinct_rules.len());

    ThreatAssessment {
        level,
        description,
        triggers,
        confidence_score,
    }
}

fn confidence_score(rule_count: usize) -> Option<u8> {
    if rule_count < 2 {
        return None;
    }
    let score = (rule_count * 20 + 60).min(95);
    Some(score as u8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
