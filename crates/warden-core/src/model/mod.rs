//! Domain types: the external torrent view, durable tasks, breaker
//! state, and the stalled-torrent observation window.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A torrent as reported by the remote engine. Read-only: this crate
/// never constructs one to send back, only to inspect.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Torrent {
    /// 40-character lowercase hex SHA-1 hash identifying the torrent.
    pub hash: String,
    /// Display name.
    pub name: String,
    /// Completion fraction in `[0.0, 1.0]`.
    pub progress: f64,
    /// Raw state string reported by the engine (`"stalledDL"`, `"downloading"`, ...).
    pub state: TorrentState,
    /// Comma-joined lifecycle tags currently attached to the torrent.
    pub tags: Vec<String>,
    /// Category assigned in the remote engine, if any.
    pub category: Option<String>,
    /// Directory the engine is saving payload data into.
    pub save_path: String,
    /// Resolved content path, when the engine reports one directly.
    pub content_path: Option<String>,
    /// Total size in bytes.
    pub size: u64,
}

impl Torrent {
    /// Whether `tag` is currently attached.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Resolve the on-disk root for this torrent's payload.
    ///
    /// Falls back to `save_path` joined with `name` when the engine did
    /// not report a `content_path` directly (see design note on this
    /// equivalence in the project's design ledger).
    #[must_use]
    pub fn resolved_content_path(&self) -> String {
        match &self.content_path {
            Some(path) if !path.is_empty() => path.clone(),
            _ => format!("{}/{}", self.save_path.trim_end_matches('/'), self.name),
        }
    }
}

/// Lifecycle state of a torrent as reported by the remote engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TorrentState {
    /// Actively downloading payload data.
    #[default]
    Downloading,
    /// Downloading but making no measurable progress.
    StalledDl,
    /// Waiting on metadata before payload transfer can begin.
    MetaDl,
    /// Queued awaiting an available download slot.
    QueuedDl,
    /// Fetching metadata while queued.
    ForcedMetaDl,
    /// Seeding or otherwise outside the download lifecycle.
    Other,
}

impl TorrentState {
    /// Whether this state indicates metadata has not yet been resolved.
    #[must_use]
    pub const fn is_metadata_pending(self) -> bool {
        matches!(self, Self::MetaDl | Self::QueuedDl | Self::ForcedMetaDl)
    }
}

/// Which phase of processing a task represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Torrent was just admitted; file-priority policy has not run yet.
    Added,
    /// Torrent finished downloading; cleanup has not run yet.
    Completed,
}

impl TaskType {
    /// Stable string form used as the `task_type` column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "added" => Ok(Self::Added),
            "completed" => Ok(Self::Completed),
            other => Err(CoreError::InvalidTaskType {
                value: other.to_string(),
            }),
        }
    }
}

/// Current execution status of a task row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible for claim, never attempted or reaped back from a crash.
    Pending,
    /// Claimed by a worker; in flight.
    Processing,
    /// Attempted and failed; eligible again once `next_retry` elapses.
    Failed,
}

impl TaskStatus {
    /// Stable string form used as the `status` column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::InvalidTaskStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// A durable unit of work: one phase of processing for one torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Torrent this task operates on.
    pub torrent_hash: String,
    /// Which phase of processing this task represents.
    pub task_type: TaskType,
    /// Current execution status.
    pub status: TaskStatus,
    /// Number of prior failed attempts.
    pub retry_count: u32,
    /// Unix timestamp of the most recent claim, or zero if never claimed.
    pub last_attempt: i64,
    /// Unix timestamp at or after which this task becomes claimable again.
    /// Zero means eligible immediately.
    pub next_retry: i64,
    /// Reason the most recent attempt failed, if any.
    pub failure_reason: Option<String>,
    /// Unix timestamp the row was first inserted.
    pub created_time: i64,
    /// Unix timestamp of the most recent update.
    pub updated_time: i64,
}

/// The outcome vocabulary a handler may report after attempting a task.
/// Carries the free-text detail for variants that embed one, so the
/// value round-trips through the `failure_reason` column unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The attempt succeeded; the task is complete.
    Success,
    /// The remote engine no longer knows about the torrent.
    TorrentNotFound,
    /// The torrent's file listing is not yet available.
    MetadataNotReady,
    /// The remote engine returned an API-level error.
    QbitApiError,
    /// The request to the remote engine failed at the transport level.
    NetworkError,
    /// The handler requested a deferred retry without a hard failure.
    RetryLater,
    /// An unexpected error occurred while executing the handler.
    ProcessingException(String),
    /// The retry engine's budget for this task was exhausted.
    MaxRetriesReached(String),
}

impl FailureReason {
    /// Stable `failure_reason` column encoding.
    #[must_use]
    pub fn as_stored(&self) -> String {
        match self {
            Self::Success => "success".to_string(),
            Self::TorrentNotFound => "torrent_not_found".to_string(),
            Self::MetadataNotReady => "metadata_not_ready".to_string(),
            Self::QbitApiError => "qbit_api_error".to_string(),
            Self::NetworkError => "network_error".to_string(),
            Self::RetryLater => "retry_later".to_string(),
            Self::ProcessingException(msg) => format!("processing_exception:{msg}"),
            Self::MaxRetriesReached(inner) => format!("max_retries_reached:{inner}"),
        }
    }

    /// Parse a stored `failure_reason` value back into a reason.
    #[must_use]
    pub fn from_stored(value: &str) -> Self {
        if let Some(msg) = value.strip_prefix("processing_exception:") {
            return Self::ProcessingException(msg.to_string());
        }
        if let Some(inner) = value.strip_prefix("max_retries_reached:") {
            return Self::MaxRetriesReached(inner.to_string());
        }
        match value {
            "success" => Self::Success,
            "torrent_not_found" => Self::TorrentNotFound,
            "metadata_not_ready" => Self::MetadataNotReady,
            "qbit_api_error" => Self::QbitApiError,
            "network_error" => Self::NetworkError,
            _ => Self::RetryLater,
        }
    }

    /// The lookup key used to select a retry strategy, ignoring any
    /// embedded free-text detail.
    #[must_use]
    pub fn strategy_key(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TorrentNotFound => "torrent_not_found",
            Self::MetadataNotReady => "metadata_not_ready",
            Self::QbitApiError => "qbit_api_error",
            Self::NetworkError => "network_error",
            Self::RetryLater => "retry_later",
            Self::ProcessingException(_) => "processing_exception",
            Self::MaxRetriesReached(_) => "max_retries_reached",
        }
    }

    /// Whether this outcome should count against the named circuit
    /// breaker as a system failure (§4.5 distinguishes these from
    /// policy/business failures, which never trip the breaker).
    #[must_use]
    pub const fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::MetadataNotReady | Self::QbitApiError | Self::NetworkError
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_stored())
    }
}

/// State machine position of a circuit breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls are permitted; failures accumulate toward `failure_threshold`.
    Closed,
    /// Calls are rejected until `timeout` elapses.
    Open,
    /// A limited number of probe calls are permitted.
    HalfOpen,
}

impl BreakerState {
    /// Stable string form used as the `state` column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakerState {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(CoreError::InvalidBreakerState {
                value: other.to_string(),
            }),
        }
    }
}

/// Durable snapshot of one resource's circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    /// Resource this breaker guards, e.g. `"qbit_api"`.
    pub breaker_type: String,
    /// Current state-machine position.
    pub state: BreakerState,
    /// Consecutive failures observed while closed, or since the last open.
    pub failure_count: u32,
    /// Consecutive successes observed while half-open.
    pub success_count: u32,
    /// Unix timestamp of the most recent state transition.
    pub last_state_change: i64,
    /// Unix timestamp of the most recent recorded failure.
    pub last_failure_time: i64,
    /// Unix timestamp of the most recent recorded success.
    pub last_success_time: i64,
    /// Thresholds and timeouts this breaker was configured with.
    pub config: BreakerConfig,
    /// Unix timestamp the row was first inserted.
    pub created_time: i64,
    /// Unix timestamp of the most recent update.
    pub updated_time: i64,
}

/// Thresholds and timeouts for one resource's breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures while closed before opening.
    pub failure_threshold: u32,
    /// Consecutive successes while half-open before closing.
    pub success_threshold: u32,
    /// Seconds spent open before allowing a half-open probe.
    pub timeout_secs: u32,
    /// Seconds between half-open probes once the first one is admitted.
    pub half_open_timeout_secs: u32,
}

impl BreakerConfig {
    /// Default thresholds for the `qbit_api` resource (§4.5).
    #[must_use]
    pub const fn qbit_api() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_secs: 60,
            half_open_timeout_secs: 30,
        }
    }

    /// Default thresholds for the `file_operations` resource (§4.5).
    #[must_use]
    pub const fn file_operations() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_secs: 30,
            half_open_timeout_secs: 15,
        }
    }

    /// Default thresholds for the `network` resource (§4.5).
    #[must_use]
    pub const fn network() -> Self {
        Self {
            failure_threshold: 8,
            success_threshold: 4,
            timeout_secs: 45,
            half_open_timeout_secs: 20,
        }
    }
}

/// In-memory observation window for one torrent tracked as stalled.
#[derive(Debug, Clone)]
pub struct StalledSeedInfo {
    /// Display name at the time of last observation.
    pub name: String,
    /// Completion fraction at the time of last observation.
    pub progress: f64,
    /// Raw state string at the time of last observation.
    pub state: TorrentState,
    /// Unix timestamp this torrent's progress was last seen to move.
    pub tracked_since: i64,
    /// Whether this torrent has already been demoted to bottom priority.
    pub priority_downgraded: bool,
}

/// Kind of lifecycle transition recorded in the append-only task audit
/// trail. Never read back by the supervisory loop; operator debugging
/// only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// A new task row was inserted.
    Created,
    /// A task was claimed by a worker.
    Claimed,
    /// A task attempt failed and was rescheduled.
    Retried,
    /// A task reached a terminal, successful outcome.
    Completed,
}

impl TaskEventKind {
    /// Stable string form used as the `event_kind` column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Claimed => "claimed",
            Self::Retried => "retried",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only task audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Torrent the event concerns.
    pub torrent_hash: String,
    /// Task phase the event concerns.
    pub task_type: TaskType,
    /// What kind of transition occurred.
    pub event_kind: TaskEventKind,
    /// Free-text detail, e.g. the failure reason for a retry event.
    pub detail: Option<String>,
    /// Unix timestamp the event was recorded.
    pub created_time: i64,
}

/// Current wall-clock time as unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Convert a unix-second timestamp into a UTC datetime for display.
#[must_use]
pub fn to_datetime(unix_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(unix_secs, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_storage_string() {
        assert_eq!(TaskType::from_str("added").unwrap(), TaskType::Added);
        assert_eq!(TaskType::Completed.as_str(), "completed");
        assert!(TaskType::from_str("bogus").is_err());
    }

    #[test]
    fn failure_reason_round_trips_embedded_detail() {
        let reason = FailureReason::ProcessingException("boom".to_string());
        let stored = reason.as_stored();
        assert_eq!(stored, "processing_exception:boom");
        assert_eq!(FailureReason::from_stored(&stored), reason);
    }

    #[test]
    fn failure_reason_unknown_value_falls_back_to_retry_later() {
        assert_eq!(
            FailureReason::from_stored("something_new"),
            FailureReason::RetryLater
        );
    }

    #[test]
    fn only_system_failures_trip_the_breaker() {
        assert!(FailureReason::NetworkError.trips_breaker());
        assert!(!FailureReason::RetryLater.trips_breaker());
        assert!(!FailureReason::TorrentNotFound.trips_breaker());
    }

    #[test]
    fn torrent_falls_back_to_save_path_join_name() {
        let torrent = Torrent {
            hash: "a".repeat(40),
            name: "Movie.2024.mkv".to_string(),
            save_path: "/data/downloads".to_string(),
            content_path: None,
            ..Torrent::default()
        };
        assert_eq!(
            torrent.resolved_content_path(),
            "/data/downloads/Movie.2024.mkv"
        );
    }

    #[test]
    fn torrent_prefers_explicit_content_path() {
        let torrent = Torrent {
            content_path: Some("/data/downloads/Movie".to_string()),
            ..Torrent::default()
        };
        assert_eq!(torrent.resolved_content_path(), "/data/downloads/Movie");
    }

    #[test]
    fn breaker_state_round_trips_through_storage_string() {
        assert_eq!(
            BreakerState::from_str("half_open").unwrap(),
            BreakerState::HalfOpen
        );
        assert_eq!(BreakerState::Open.as_str(), "open");
    }
}
