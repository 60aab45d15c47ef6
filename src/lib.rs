//! bantay_service: threat status propagation.
//!
//! Readings from weather and sensor sources are classified into a threat
//! level, published to a versioned record store with compare-and-swap
//! writes, served to clients through a small HTTP surface, and polled by
//! each device's client status store.

pub mod alert;
pub mod api;
pub mod client;
pub mod config;
pub mod dev_mode;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod query;
pub mod reconcile;
pub mod stations;
pub mod store;
pub mod users;
pub mod verify;
