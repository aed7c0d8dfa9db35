//! Sensor telemetry and alarm tracking backend.
//!
//! Readings arrive over HTTP or MQTT, are stored, and are evaluated against
//! each device's alert limits. Alarms are deduplicated per device and alarm
//! type: at most one unacknowledged, active alarm exists for each pair.

pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod rest;
pub mod store;
pub mod summary;
pub mod validate;
pub mod worker;
