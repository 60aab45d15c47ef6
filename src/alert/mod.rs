/// Threat evaluation.
///
/// Submodules:
/// - `classifier`: readings → threat level, description, confidence.
/// - `activity`  : derived duration fields for a published status.

pub mod activity;
pub mod classifier;
