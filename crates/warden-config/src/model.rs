//! The configuration document (§6) and its defaults.
//!
//! # Design
//! - One flat, serde-derived struct mirrors the JSON document operators
//!   author by hand; nested sections exist only where the spec groups
//!   fields (`circuit_breaker`).
//! - Every field carries a `#[serde(default = ...)]` so a minimal
//!   document (just `host`/`port`) is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WardenConfig {
    /// Remote engine hostname or IP address.
    pub host: String,
    /// Remote engine management API port.
    pub port: u16,
    /// HTTP Basic Auth username, if the remote engine requires one.
    pub username: Option<String>,
    /// HTTP Basic Auth password, if the remote engine requires one.
    pub password: Option<String>,

    /// Tag applied by the producing client to a torrent awaiting file-priority policy.
    pub added_tag: String,
    /// Tag applied by the producing client to a torrent that has finished downloading.
    pub completed_tag: String,
    /// Tag this daemon applies while a task is claimed and in flight.
    pub processing_tag: String,

    /// Case-insensitive basename patterns marking files for deletion during cleanup.
    pub file_patterns: Vec<String>,
    /// Case-insensitive basename patterns marking folders for wholesale removal during cleanup.
    pub folder_patterns: Vec<String>,
    /// Case-insensitive basename patterns marking files that should never download.
    pub disable_file_patterns: Vec<String>,

    /// Category whitelist; empty means all categories are processed.
    pub categories: Vec<String>,

    /// Worker pool size.
    pub max_workers: u32,
    /// Maximum tasks a worker claims per cycle before applying the health speed factor.
    pub batch_size: u32,
    /// Tag scanner cadence, in seconds.
    pub poll_interval_secs: u64,
    /// Supervisor idle-loop cadence, in seconds.
    pub check_interval_secs: u64,

    /// Minutes a torrent must sit below `progress_threshold` before demotion.
    pub min_stalled_minutes: u64,
    /// Stalled tracker cadence, in seconds.
    pub stalled_check_interval_secs: u64,
    /// Progress fraction below which a `stalledDL` torrent is tracked.
    pub progress_threshold: f64,

    /// Circuit breaker defaults applied to newly initialized breakers.
    pub circuit_breaker: CircuitBreakerDefaults,

    /// Path to the embedded SQLite database file.
    pub db_file: String,
    /// Optional path to a log file; when absent, logs go to stdout.
    pub log_file: Option<String>,
    /// Verbose diagnostic logging.
    pub debug_mode: bool,

    /// Optional directory polled for hash files marking newly added torrents.
    pub added_hash_dir: Option<String>,
    /// Optional directory polled for hash files marking completed torrents.
    pub completed_hash_dir: Option<String>,

    /// Minimum level emitted by the logging subsystem.
    pub log_level: String,
    /// Log encoding: `pretty` or `json`.
    pub log_format: String,
}

/// Defaults seeded into a breaker's persisted row the first time it is
/// observed (§4.5); later changes to this section do not retroactively
/// alter an already-initialized breaker's thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerDefaults {
    /// Consecutive system failures before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the breaker closes.
    pub success_threshold: u32,
    /// Seconds an open breaker waits before trying half-open.
    pub timeout_secs: u64,
    /// Minimum seconds between admitted half-open probes.
    pub half_open_timeout_secs: u64,
}

impl Default for CircuitBreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 60,
            half_open_timeout_secs: 30,
        }
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            username: None,
            password: None,

            added_tag: "added".to_string(),
            completed_tag: "completed".to_string(),
            processing_tag: "processing".to_string(),

            file_patterns: Vec::new(),
            folder_patterns: Vec::new(),
            disable_file_patterns: Vec::new(),

            categories: Vec::new(),

            max_workers: 3,
            batch_size: 10,
            poll_interval_secs: 10,
            check_interval_secs: 5,

            min_stalled_minutes: 30,
            stalled_check_interval_secs: 300,
            progress_threshold: 0.95,

            circuit_breaker: CircuitBreakerDefaults::default(),

            db_file: "warden.db".to_string(),
            log_file: None,
            debug_mode: false,

            added_hash_dir: None,
            completed_hash_dir: None,

            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}
