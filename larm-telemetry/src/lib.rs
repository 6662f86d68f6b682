//! # Larm Telemetry
//!
//! Crate for logging and metrics of the alerting daemon.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::{AlerterStats, MetricsRecorder};
