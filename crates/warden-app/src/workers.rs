//! Claim, dispatch, and outcome translation (§4.8): each worker claims
//! a batch of due tasks, runs the handler for its `task_type`, and
//! translates the handler's [`FailureReason`] into either completion
//! or a scheduled retry.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use warden_breaker::{CircuitBreaker, RESOURCE_QBIT_API};
use warden_cleanup::CleanupPredicates;
use warden_client::{RemoteClient, RemoteOutcome};
use warden_config::{ConfigHandle, WardenConfig};
use warden_core::{now_unix, FailureReason, Task, TaskType, Torrent};
use warden_health::HealthMonitor;
use warden_retry::{RetryEngine, MAX_RETRIES_REACHED_DELAY_SECS};
use warden_store::WardenStore;
use warden_telemetry::Metrics;

use crate::shutdown::Shutdown;

const HEALTH_PAUSE_BACKOFF: Duration = Duration::from_secs(30);
const BREAKER_OPEN_BACKOFF: Duration = Duration::from_secs(10);
const IDLE_BACKOFF: Duration = Duration::from_secs(2);

/// One worker in the pool (§4.8): owns no state across iterations
/// beyond its identity, every dependency is shared.
pub struct Worker {
    id: u32,
    client: Arc<dyn RemoteClient>,
    store: WardenStore,
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthMonitor>,
    retry: Arc<RetryEngine>,
    config: ConfigHandle,
    metrics: Metrics,
    shutdown: Shutdown,
}

impl Worker {
    /// Construct a worker over its shared dependencies.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        id: u32,
        client: Arc<dyn RemoteClient>,
        store: WardenStore,
        breaker: Arc<CircuitBreaker>,
        health: Arc<HealthMonitor>,
        retry: Arc<RetryEngine>,
        config: ConfigHandle,
        metrics: Metrics,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            id,
            client,
            store,
            breaker,
            health,
            retry,
            config,
            metrics,
            shutdown,
        }
    }

    /// Run the claim/dispatch loop until [`Shutdown::is_triggered`].
    pub async fn run(&self) {
        while !self.shutdown.is_triggered() {
            if self.health.should_pause().await {
                self.shutdown.sleep(HEALTH_PAUSE_BACKOFF).await;
                continue;
            }
            if !self.breaker.can_execute(RESOURCE_QBIT_API).await {
                self.shutdown.sleep(BREAKER_OPEN_BACKOFF).await;
                continue;
            }

            let cfg = self.config.current();
            let speed = self.health.speed_factor().await;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let batch = ((f64::from(cfg.batch_size) * speed).floor() as u32).max(1);

            let tasks = match self.store.claim_pending(batch).await {
                Ok(tasks) => tasks,
                Err(err) => {
                    error!(worker = self.id, error = %err, "failed to claim tasks");
                    self.shutdown.sleep(IDLE_BACKOFF).await;
                    continue;
                }
            };

            if tasks.is_empty() {
                self.shutdown.sleep(IDLE_BACKOFF).await;
                continue;
            }

            for task in tasks {
                self.metrics.inc_tasks_claimed();
                if self.shutdown.is_triggered() {
                    debug!(worker = self.id, "shutdown during batch, abandoning remaining claims");
                    break;
                }
                self.process(task, &cfg).await;
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    #[instrument(skip(self, cfg), fields(hash = %task.torrent_hash, task_type = %task.task_type))]
    async fn process(&self, task: Task, cfg: &WardenConfig) {
        let outcome = match task.task_type {
            TaskType::Added => self.handle_added(&task, cfg).await,
            TaskType::Completed => self.handle_completed(&task, cfg).await,
        };
        self.finish(&task, outcome, &cfg.processing_tag).await;
    }

    async fn fetch_torrent(&self, hash: &str) -> Result<Torrent, FailureReason> {
        match self.client.torrent_by_hash(hash).await {
            RemoteOutcome::Ok(torrent) => Ok(torrent),
            RemoteOutcome::NotFound => Err(FailureReason::TorrentNotFound),
            RemoteOutcome::ApiError(msg) => {
                warn!(hash, error = %msg, "api error fetching torrent");
                Err(FailureReason::QbitApiError)
            }
            RemoteOutcome::NetworkError(msg) => {
                warn!(hash, error = %msg, "network error fetching torrent");
                Err(FailureReason::NetworkError)
            }
        }
    }

    fn predicates(&self, cfg: &WardenConfig) -> Result<CleanupPredicates, FailureReason> {
        CleanupPredicates::new(&cfg.file_patterns, &cfg.folder_patterns, &cfg.disable_file_patterns)
            .map_err(|err| FailureReason::ProcessingException(err.to_string()))
    }

    async fn handle_added(&self, task: &Task, cfg: &WardenConfig) -> FailureReason {
        let torrent = match self.fetch_torrent(&task.torrent_hash).await {
            Ok(torrent) => torrent,
            Err(reason) => return reason,
        };

        if !cfg.categories.is_empty() {
            let allowed = torrent
                .category
                .as_deref()
                .is_some_and(|category| cfg.categories.iter().any(|c| c == category));
            if !allowed {
                return FailureReason::Success;
            }
        }

        let files = match self.client.files(&task.torrent_hash).await {
            RemoteOutcome::Ok(files) => files,
            RemoteOutcome::NotFound => Vec::new(),
            RemoteOutcome::ApiError(msg) => {
                warn!(hash = %task.torrent_hash, error = %msg, "api error listing files");
                return FailureReason::QbitApiError;
            }
            RemoteOutcome::NetworkError(msg) => {
                warn!(hash = %task.torrent_hash, error = %msg, "network error listing files");
                return FailureReason::NetworkError;
            }
        };
        if files.is_empty() {
            return FailureReason::MetadataNotReady;
        }

        let predicates = match self.predicates(cfg) {
            Ok(predicates) => predicates,
            Err(reason) => return reason,
        };

        let indices: Vec<u32> = files
            .iter()
            .filter(|file| predicates.should_disable_file(&file.name) && file.priority != 0)
            .map(|file| file.index)
            .collect();
        if indices.is_empty() {
            return FailureReason::Success;
        }

        match self.client.set_file_priority(&task.torrent_hash, &indices, 0).await {
            RemoteOutcome::Ok(()) => FailureReason::Success,
            RemoteOutcome::NotFound => FailureReason::TorrentNotFound,
            RemoteOutcome::ApiError(msg) => {
                warn!(hash = %task.torrent_hash, error = %msg, "api error disabling files");
                FailureReason::QbitApiError
            }
            RemoteOutcome::NetworkError(msg) => {
                warn!(hash = %task.torrent_hash, error = %msg, "network error disabling files");
                FailureReason::NetworkError
            }
        }
    }

    async fn handle_completed(&self, task: &Task, cfg: &WardenConfig) -> FailureReason {
        let torrent = match self.fetch_torrent(&task.torrent_hash).await {
            Ok(torrent) => torrent,
            Err(reason) => return reason,
        };

        let content_path = torrent.resolved_content_path();
        if !Path::new(&content_path).exists() {
            return FailureReason::Success;
        }

        let predicates = match self.predicates(cfg) {
            Ok(predicates) => predicates,
            Err(reason) => return reason,
        };

        match predicates.clean(Path::new(&content_path)) {
            Ok(report) => {
                debug!(
                    hash = %task.torrent_hash,
                    files_deleted = report.files_deleted,
                    folders_deleted = report.folders_deleted,
                    "cleanup finished"
                );
                FailureReason::Success
            }
            Err(err) => FailureReason::ProcessingException(err.to_string()),
        }
    }

    async fn finish(&self, task: &Task, outcome: FailureReason, processing_tag: &str) {
        match outcome {
            FailureReason::Success | FailureReason::TorrentNotFound => {
                if let Err(err) = self.store.complete(&task.torrent_hash, task.task_type).await {
                    error!(hash = %task.torrent_hash, error = %err, "failed to delete completed task");
                }
                if let RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) =
                    self.client.remove_tag(&task.torrent_hash, processing_tag).await
                {
                    warn!(hash = %task.torrent_hash, error = %msg, "failed to clear processing tag");
                }
                self.breaker.record_success(RESOURCE_QBIT_API).await;
                self.metrics.inc_tasks_completed();
            }
            other => {
                if other.trips_breaker() {
                    self.breaker.record_failure(RESOURCE_QBIT_API).await;
                }
                self.metrics.inc_tasks_failed(other.strategy_key());

                let (next_retry, reason) = match self.retry.next_retry(&other, task.retry_count) {
                    Some(next_retry) => (next_retry, other),
                    None => (
                        now_unix() + MAX_RETRIES_REACHED_DELAY_SECS,
                        FailureReason::MaxRetriesReached(other.as_stored()),
                    ),
                };
                if let Err(err) = self
                    .store
                    .schedule_retry(&task.torrent_hash, task.task_type, next_retry, &reason)
                    .await
                {
                    error!(hash = %task.torrent_hash, error = %err, "failed to schedule retry");
                }
            }
        }
    }
}
