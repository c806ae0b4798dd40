//! # vivavoce
//!
//! SQLite-backed processing queue for spoken language assessments.
//!
//! Submitted recordings are queued, scored by an external AI service
//! under bounded concurrency with classified retries, and watched by a
//! self-healing health monitor. Observability via OpenTelemetry.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod queue;
pub mod scorer;
pub mod store;
pub mod telemetry;
