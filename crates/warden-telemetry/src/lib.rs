#![forbid(unsafe_code)]

//! Logging initialization and metrics registry shared across the workspace.
//! Layout: `init.rs` (logging setup), `metrics.rs` (Prometheus registry),
//! `error.rs` (error types).

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use init::{init_logging, LogFormat, LoggingConfig, DEFAULT_LOG_LEVEL};
pub use metrics::{Metrics, MetricsSnapshot};
