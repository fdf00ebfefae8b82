//! Component lifecycle (§4.10): builds every dependency bottom-up,
//! recovers state left over from a crashed prior run, starts the
//! scanner/workers/stalled tracker/optional hash feed, and runs the
//! idle loop until a shutdown signal arrives.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use warden_breaker::CircuitBreaker;
use warden_client::{QbitClient, RemoteClient, RemoteConfig, RemoteOutcome};
use warden_config::ConfigHandle;
use warden_core::TaskType;
use warden_health::HealthMonitor;
use warden_retry::RetryEngine;
use warden_store::WardenStore;
use warden_telemetry::Metrics;

use crate::error::{AppError, AppResult};
use crate::hashfeed::HashFeed;
use crate::scanner::TagScanner;
use crate::shutdown::Shutdown;
use crate::stalled::StalledTracker;
use crate::workers::Worker;

/// Cadence of the independent liveness probe backing the health monitor (§4.6).
const HEALTH_PROBE_CADENCE: Duration = Duration::from_secs(30);
/// `processing` rows older than this are reaped back to `pending` (§4.1).
const STUCK_TIMEOUT_SECS: i64 = 30 * 60;
/// Tasks older than this are checked against the remote engine and
/// dropped if the torrent is gone.
const ORPHAN_AGE_SECS: i64 = 24 * 60 * 60;
/// Ceiling on how long shutdown waits for a single worker to drain its
/// current batch before moving on.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Load `config_path`, wire the whole daemon together, and run until a
/// shutdown signal is observed.
///
/// # Errors
///
/// Returns [`AppError::Config`] if the configuration document cannot
/// be loaded, or [`AppError::Init`] if any other startup dependency
/// (database, remote client, metrics registry) fails to build.
pub async fn run(config_path: &Path) -> AppResult<()> {
    let config = ConfigHandle::open(config_path).map_err(AppError::config)?;
    let cfg = config.current();

    let store = WardenStore::open(Path::new(&cfg.db_file))
        .await
        .map_err(AppError::init)?;

    let remote_config = RemoteConfig {
        host: cfg.host.clone(),
        port: cfg.port,
        username: cfg.username.clone(),
        password: cfg.password.clone(),
    };
    let client: Arc<dyn RemoteClient> =
        Arc::new(QbitClient::new(remote_config).map_err(AppError::init)?);

    info!(host = %cfg.host, port = cfg.port, "waiting for remote engine");
    client.wait_until_ready().await;

    let breaker = CircuitBreaker::new(store.clone()).await.map_err(AppError::init)?;
    let health = Arc::new(HealthMonitor::new(HEALTH_PROBE_CADENCE));
    let retry = Arc::new(RetryEngine::with_defaults());
    let metrics = Metrics::new().map_err(AppError::init)?;

    if let Err(err) = store.reset_stuck(STUCK_TIMEOUT_SECS).await {
        warn!(error = %err, "failed to reap stuck tasks at startup");
    }
    recover_crashed_tasks(client.as_ref(), &store, &cfg.processing_tag, &cfg.added_tag, &cfg.completed_tag).await;

    let scanner_shutdown = Shutdown::new();
    let worker_shutdown = Shutdown::new();
    let stalled_shutdown = Shutdown::new();
    let hashfeed_shutdown = Shutdown::new();
    let health_shutdown = Shutdown::new();

    let scanner = Arc::new(TagScanner::new(
        client.clone(),
        store.clone(),
        breaker.clone(),
        health.clone(),
        config.clone(),
        scanner_shutdown.clone(),
    ));
    let scanner_handle = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.run().await }
    });

    let mut worker_handles = Vec::with_capacity(cfg.max_workers as usize);
    for id in 0..cfg.max_workers {
        let worker = Worker::new(
            id,
            client.clone(),
            store.clone(),
            breaker.clone(),
            health.clone(),
            retry.clone(),
            config.clone(),
            metrics.clone(),
            worker_shutdown.clone(),
        );
        worker_handles.push(tokio::spawn(async move { worker.run().await }));
    }

    let stalled = Arc::new(StalledTracker::new(
        client.clone(),
        config.clone(),
        metrics.clone(),
        stalled_shutdown.clone(),
    ));
    let stalled_handle = tokio::spawn({
        let stalled = stalled.clone();
        async move { stalled.run().await }
    });

    let hashfeed = HashFeed::new(store.clone(), config.clone(), hashfeed_shutdown.clone());
    let hashfeed_handle = hashfeed.is_enabled().then(|| tokio::spawn(async move { hashfeed.run().await }));

    let health_probe_handle = tokio::spawn(run_health_probe(
        client.clone(),
        health.clone(),
        health_shutdown.clone(),
    ));

    let idle_shutdown = Shutdown::new();
    let idle_handle = tokio::spawn(run_idle_loop(
        config.clone(),
        store.clone(),
        stalled.clone(),
        metrics.clone(),
        client.clone(),
        idle_shutdown.clone(),
    ));

    wait_for_signal().await;
    info!("shutdown signal received, draining");

    scanner_shutdown.trigger();
    let _ = scanner_handle.await;

    worker_shutdown.trigger();
    for handle in worker_handles {
        if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("worker did not drain within the grace period, abandoning");
        }
    }

    stalled_shutdown.trigger();
    let _ = stalled_handle.await;

    hashfeed_shutdown.trigger();
    if let Some(handle) = hashfeed_handle {
        let _ = handle.await;
    }

    idle_shutdown.trigger();
    let _ = idle_handle.await;

    health_shutdown.trigger();
    let _ = health_probe_handle.await;

    store.pool().close().await;
    info!("shutdown complete");
    Ok(())
}

async fn log_status(store: &WardenStore, stalled: &StalledTracker, metrics: &Metrics) {
    match store.stats().await {
        Ok(stats) => {
            let summary = stalled.summary().await;
            metrics.set_queue_depth(stats.total as i64);
            info!(
                total = stats.total,
                stalled_tracked = summary.tracked,
                stalled_downgraded = summary.downgraded,
                "status"
            );
        }
        Err(err) => warn!(error = %err, "failed to read task store stats"),
    }
}

/// Run the idle loop proper: reload configuration, reap stuck tasks,
/// sweep orphans, and log status on `check_interval` cadence (§4.10).
/// Spawned alongside the other actors and stopped last.
async fn run_idle_loop(
    config: ConfigHandle,
    store: WardenStore,
    stalled: Arc<StalledTracker>,
    metrics: Metrics,
    client: Arc<dyn RemoteClient>,
    shutdown: Shutdown,
) {
    while !shutdown.is_triggered() {
        if let Err(err) = config.reload() {
            warn!(error = %err, "failed to reload configuration");
        }
        if let Err(err) = store.reset_stuck(STUCK_TIMEOUT_SECS).await {
            warn!(error = %err, "failed to reap stuck tasks");
        }
        let client_ref = client.clone();
        if let Err(err) = store
            .cleanup_orphans(ORPHAN_AGE_SECS, move |hash| {
                let client_ref = client_ref.clone();
                async move { !matches!(client_ref.torrent_by_hash(&hash).await, RemoteOutcome::NotFound) }
            })
            .await
        {
            warn!(error = %err, "failed to clean up orphaned tasks");
        }
        log_status(&store, &stalled, &metrics).await;

        let cadence = config.current().check_interval_secs;
        shutdown.sleep(Duration::from_secs(cadence)).await;
    }
    debug!("idle loop stopped");
}

async fn run_health_probe(client: Arc<dyn RemoteClient>, health: Arc<HealthMonitor>, shutdown: Shutdown) {
    while !shutdown.is_triggered() {
        health
            .refresh(|| async {
                match client.ping().await {
                    RemoteOutcome::Ok(()) | RemoteOutcome::NotFound => Ok(()),
                    RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) => Err(msg),
                }
            })
            .await;
        shutdown.sleep(HEALTH_PROBE_CADENCE).await;
    }
    debug!("health probe stopped");
}

/// Crash recovery on startup (§4.10): every torrent still carrying
/// `processing_tag` is restored to the tag matching its actual task
/// state, with `processing_tag` removed last.
async fn recover_crashed_tasks(
    client: &dyn RemoteClient,
    store: &WardenStore,
    processing_tag: &str,
    added_tag: &str,
    completed_tag: &str,
) {
    let torrents = match client.torrents_with_tag(processing_tag).await {
        RemoteOutcome::Ok(torrents) => torrents,
        RemoteOutcome::NotFound => Vec::new(),
        RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) => {
            warn!(error = %msg, "crash recovery: failed to list torrents carrying the processing tag");
            return;
        }
    };

    for torrent in &torrents {
        let restore_tag = if matches!(store.exists(&torrent.hash, TaskType::Added).await, Ok(true)) {
            added_tag
        } else if matches!(store.exists(&torrent.hash, TaskType::Completed).await, Ok(true)) {
            completed_tag
        } else if torrent.progress >= 1.0 {
            completed_tag
        } else {
            added_tag
        };

        if let RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) =
            client.add_tag(&torrent.hash, restore_tag).await
        {
            warn!(hash = %torrent.hash, error = %msg, "crash recovery: failed to restore lifecycle tag");
        }
        if let RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) =
            client.remove_tag(&torrent.hash, processing_tag).await
        {
            warn!(hash = %torrent.hash, error = %msg, "crash recovery: failed to remove processing tag");
        }
    }

    if !torrents.is_empty() {
        info!(count = torrents.len(), "recovered torrents from a crashed prior run");
    }
}

/// Wait for either `SIGINT` or `SIGTERM` (§4.10, §6).
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use warden_client::TorrentFile;
    use warden_core::{Torrent, TorrentState};

    struct StubClient {
        tagged: Vec<Torrent>,
        added_tags: StdMutex<Vec<(String, String)>>,
        removed_tags: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RemoteClient for StubClient {
        async fn wait_until_ready(&self) {}
        async fn ping(&self) -> RemoteOutcome<()> {
            RemoteOutcome::Ok(())
        }
        async fn torrent_by_hash(&self, _hash: &str) -> RemoteOutcome<Torrent> {
            RemoteOutcome::NotFound
        }
        async fn torrents_with_tag(&self, _tag: &str) -> RemoteOutcome<Vec<Torrent>> {
            RemoteOutcome::Ok(self.tagged.clone())
        }
        async fn add_tag(&self, hash: &str, tag: &str) -> RemoteOutcome<()> {
            self.added_tags.lock().unwrap().push((hash.to_string(), tag.to_string()));
            RemoteOutcome::Ok(())
        }
        async fn remove_tag(&self, hash: &str, tag: &str) -> RemoteOutcome<()> {
            self.removed_tags.lock().unwrap().push((hash.to_string(), tag.to_string()));
            RemoteOutcome::Ok(())
        }
        async fn files(&self, _hash: &str) -> RemoteOutcome<Vec<TorrentFile>> {
            RemoteOutcome::Ok(Vec::new())
        }
        async fn set_file_priority(&self, _hash: &str, _indices: &[u32], _priority: u32) -> RemoteOutcome<()> {
            RemoteOutcome::Ok(())
        }
        async fn set_bottom_priority(&self, _hash: &str) -> RemoteOutcome<()> {
            RemoteOutcome::Ok(())
        }
        async fn stalled_downloading(&self, _progress_threshold: f64) -> RemoteOutcome<Vec<Torrent>> {
            RemoteOutcome::Ok(Vec::new())
        }
    }

    async fn store() -> (WardenStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = WardenStore::open(&dir.path().join("w.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn recovery_restores_added_tag_when_an_added_task_exists() {
        let (store, _dir) = store().await;
        let hash = "a".repeat(40);
        store.save(&hash, TaskType::Added).await.unwrap();
        let client = StubClient {
            tagged: vec![Torrent {
                hash: hash.clone(),
                progress: 0.1,
                state: TorrentState::Downloading,
                ..Torrent::default()
            }],
            added_tags: StdMutex::new(Vec::new()),
            removed_tags: StdMutex::new(Vec::new()),
        };

        recover_crashed_tasks(&client, &store, "processing", "added", "completed").await;

        assert_eq!(client.added_tags.lock().unwrap().as_slice(), [(hash.clone(), "added".to_string())]);
        assert_eq!(client.removed_tags.lock().unwrap().as_slice(), [(hash, "processing".to_string())]);
    }

    #[tokio::test]
    async fn recovery_falls_back_to_progress_when_no_task_row_exists() {
        let (store, _dir) = store().await;
        let hash = "b".repeat(40);
        let client = StubClient {
            tagged: vec![Torrent {
                hash: hash.clone(),
                progress: 1.0,
                state: TorrentState::Other,
                ..Torrent::default()
            }],
            added_tags: StdMutex::new(Vec::new()),
            removed_tags: StdMutex::new(Vec::new()),
        };

        recover_crashed_tasks(&client, &store, "processing", "added", "completed").await;

        assert_eq!(client.added_tags.lock().unwrap().as_slice(), [(hash, "completed".to_string())]);
    }

    #[tokio::test]
    async fn recovery_restores_completed_tag_when_a_completed_task_exists() {
        let (store, _dir) = store().await;
        let hash = "c".repeat(40);
        store.save(&hash, TaskType::Completed).await.unwrap();
        let client = StubClient {
            tagged: vec![Torrent {
                hash: hash.clone(),
                progress: 1.0,
                state: TorrentState::Other,
                ..Torrent::default()
            }],
            added_tags: StdMutex::new(Vec::new()),
            removed_tags: StdMutex::new(Vec::new()),
        };

        recover_crashed_tasks(&client, &store, "processing", "added", "completed").await;

        assert_eq!(client.added_tags.lock().unwrap().as_slice(), [(hash, "completed".to_string())]);
    }
}
