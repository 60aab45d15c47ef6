/// How long a published threat has been active.
///
/// # Clock injection
/// All functions accept a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally. This keeps the derived fields deterministic in
/// tests without mocking or time manipulation.

use chrono::{DateTime, Utc};

use crate::model::ThreatStatus;

// ---------------------------------------------------------------------------
// Active duration
// ---------------------------------------------------------------------------

/// Whole hours since the status was computed, for active statuses.
///
///   inactive                 →  0
///   timestamp in the future  →  0   (clock skew between writer and reader)
///   otherwise                →  floor((now - timestamp) / 1h)
pub fn hours_active_at(status: &ThreatStatus, now: DateTime<Utc>) -> u64 {
    if !status.is_active {
        return 0;
    }
    let elapsed = now.signed_duration_since(status.timestamp);
    u64::try_from(elapsed.num_hours()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
