/// Development mode utilities for replaying recorded readings
///
/// When the live weather API or sensor feed is unavailable (or a scenario
/// needs to be reproduced), use this module to replay readings snapshots
/// from a JSON file. Each fetch returns the next snapshot; once exhausted
/// the last snapshot repeats, so a long-running reconcile loop settles on
/// a final state.
///
/// ```json
/// [
///   {"water_levels": [{"station_id": "pasig-river", "level_m": 0.9}]},
///   {"water_levels": [{"station_id": "pasig-river", "level_m": 3.2}], "rain_intensity_mm_hr": 75.0}
/// ]
/// ```

use std::path::Path;
use std::sync::Mutex;

use crate::ingest::ReadingsSource;
use crate::logging::DataSource;
use crate::model::{FetchError, Readings};

pub const SOURCE_LABEL: &str = "Replay";

pub struct ReplaySource {
    snapshots: Vec<Readings>,
    cursor: Mutex<usize>,
}

impl ReplaySource {
    pub fn new(snapshots: Vec<Readings>) -> Self {
        Self {
            snapshots,
            cursor: Mutex::new(0),
        }
    }

    /// Loads snapshots from a JSON array file.
    pub fn from_file(path: &Path) -> Result<Self, FetchError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FetchError::Transport(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, FetchError> {
        let snapshots: Vec<Readings> =
            serde_json::from_str(text).map_err(|e| FetchError::ParseError(e.to_string()))?;
        Ok(Self::new(snapshots))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl ReadingsSource for ReplaySource {
    fn label(&self) -> &str {
        SOURCE_LABEL
    }

    fn fetch(&self) -> Result<Readings, FetchError> {
        let last = self
            .snapshots
            .len()
            .checked_sub(1)
            .ok_or_else(|| FetchError::NoDataAvailable("replay file is empty".to_string()))?;

        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let index = (*cursor).min(last);
        if *cursor <= last {
            *cursor += 1;
        }
        tracing::debug!(source = %DataSource::System, "replaying snapshot {}/{}", index + 1, last + 1);
        Ok(self.snapshots[index].clone())
    }
}
