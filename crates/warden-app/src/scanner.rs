//! Tag-based torrent discovery (§4.7): turns tagged torrents into
//! durable tasks and promotes their tag to `processing` before a
//! worker ever sees them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use warden_breaker::{CircuitBreaker, RESOURCE_QBIT_API};
use warden_client::{RemoteClient, RemoteOutcome};
use warden_config::ConfigHandle;
use warden_core::TaskType;
use warden_health::HealthMonitor;
use warden_store::WardenStore;

use crate::shutdown::Shutdown;

const ERROR_BACKOFF: Duration = Duration::from_secs(10);
const ERROR_BACKOFF_ESCALATED: Duration = Duration::from_secs(30);
const ESCALATE_AFTER_ERRORS: u32 = 10;

/// Discovers torrents carrying `added_tag`/`completed_tag` and inserts
/// the corresponding task rows, rewriting tags as it goes (§4.7).
pub struct TagScanner {
    client: Arc<dyn RemoteClient>,
    store: WardenStore,
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthMonitor>,
    config: ConfigHandle,
    shutdown: Shutdown,
}

impl TagScanner {
    /// Construct a scanner over its dependencies.
    #[must_use]
    pub const fn new(
        client: Arc<dyn RemoteClient>,
        store: WardenStore,
        breaker: Arc<CircuitBreaker>,
        health: Arc<HealthMonitor>,
        config: ConfigHandle,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            store,
            breaker,
            health,
            config,
            shutdown,
        }
    }

    /// Run the scan loop until [`Shutdown::is_triggered`].
    pub async fn run(&self) {
        let mut consecutive_errors: u32 = 0;
        while !self.shutdown.is_triggered() {
            if self.health.should_pause().await || !self.breaker.can_execute(RESOURCE_QBIT_API).await {
                self.shutdown.sleep(ERROR_BACKOFF).await;
                continue;
            }

            let cfg = self.config.current();
            let mut errored = false;
            errored |= self
                .scan_tag(&cfg.added_tag, TaskType::Added, &cfg.processing_tag)
                .await;
            errored |= self
                .scan_tag(&cfg.completed_tag, TaskType::Completed, &cfg.processing_tag)
                .await;

            if errored {
                consecutive_errors += 1;
                let backoff = if consecutive_errors >= ESCALATE_AFTER_ERRORS {
                    ERROR_BACKOFF_ESCALATED
                } else {
                    ERROR_BACKOFF
                };
                self.shutdown.sleep(backoff).await;
                continue;
            }
            consecutive_errors = 0;

            self.shutdown
                .sleep(Duration::from_secs(cfg.poll_interval_secs))
                .await;
        }
        debug!("tag scanner stopped");
    }

    /// One discovery pass for a single tag/task_type pair. Returns
    /// `true` if a system-level error was observed.
    #[instrument(skip(self))]
    async fn scan_tag(&self, tag: &str, task_type: TaskType, processing_tag: &str) -> bool {
        if tag.is_empty() {
            return false;
        }
        match self.client.torrents_with_tag(tag).await {
            RemoteOutcome::Ok(torrents) => {
                for torrent in torrents {
                    if torrent.state.is_metadata_pending() {
                        continue;
                    }
                    self.admit(&torrent.hash, task_type, tag, processing_tag).await;
                }
                self.breaker.record_success(RESOURCE_QBIT_API).await;
                false
            }
            RemoteOutcome::NotFound => false,
            RemoteOutcome::ApiError(msg) => {
                warn!(tag, error = %msg, "scanner: api error listing tagged torrents");
                self.breaker.record_failure(RESOURCE_QBIT_API).await;
                true
            }
            RemoteOutcome::NetworkError(msg) => {
                warn!(tag, error = %msg, "scanner: network error listing tagged torrents");
                self.breaker.record_failure(RESOURCE_QBIT_API).await;
                true
            }
        }
    }

    async fn admit(&self, hash: &str, task_type: TaskType, source_tag: &str, processing_tag: &str) {
        match self.store.save(hash, task_type).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                error!(hash, %task_type, error = %err, "scanner: failed to persist discovered task");
                return;
            }
        }

        if let RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) =
            self.client.add_tag(hash, processing_tag).await
        {
            warn!(hash, error = %msg, "scanner: failed to add processing tag");
        }
        if let RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) =
            self.client.remove_tag(hash, source_tag).await
        {
            warn!(hash, error = %msg, "scanner: failed to remove source tag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex as StdMutex;
    use tempfile::NamedTempFile;
    use warden_client::TorrentFile;
    use warden_core::{Torrent, TorrentState};

    struct StubClient {
        tagged: Vec<Torrent>,
        added_tags: StdMutex<Vec<String>>,
        removed_tags: StdMutex<Vec<String>>,
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

        async fn add_tag(&self, _hash: &str, tag: &str) -> RemoteOutcome<()> {
            self.added_tags.lock().unwrap().push(tag.to_string());
            RemoteOutcome::Ok(())
        }

        async fn remove_tag(&self, _hash: &str, tag: &str) -> RemoteOutcome<()> {
            self.removed_tags.lock().unwrap().push(tag.to_string());
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

    fn config_handle(contents: &str) -> (ConfigHandle, NamedTempFile) {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        (ConfigHandle::open(file.path()).expect("open"), file)
    }

    async fn store() -> (WardenStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = WardenStore::open(&dir.path().join("w.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn admit_creates_task_and_rewrites_tags_in_order() {
        let (store, _dir) = store().await;
        let breaker = CircuitBreaker::new(store.clone()).await.unwrap();
        let health = Arc::new(HealthMonitor::new(Duration::from_secs(30)));
        let (config, _file) = config_handle("{}");

        let client: Arc<dyn RemoteClient> = Arc::new(StubClient {
            tagged: vec![Torrent {
                hash: "a".repeat(40),
                state: TorrentState::Downloading,
                ..Torrent::default()
            }],
            added_tags: StdMutex::new(Vec::new()),
            removed_tags: StdMutex::new(Vec::new()),
        });

        let scanner = TagScanner::new(
            client.clone(),
            store.clone(),
            breaker,
            health,
            config,
            Shutdown::new(),
        );

        let errored = scanner.scan_tag("added", TaskType::Added, "processing").await;
        assert!(!errored);

        assert!(store.exists(&"a".repeat(40), TaskType::Added).await.unwrap());
    }

    #[tokio::test]
    async fn metadata_pending_torrents_are_skipped() {
        let (store, _dir) = store().await;
        let breaker = CircuitBreaker::new(store.clone()).await.unwrap();
        let health = Arc::new(HealthMonitor::new(Duration::from_secs(30)));
        let (config, _file) = config_handle("{}");

        let client: Arc<dyn RemoteClient> = Arc::new(StubClient {
            tagged: vec![Torrent {
                hash: "b".repeat(40),
                state: TorrentState::MetaDl,
                ..Torrent::default()
            }],
            added_tags: StdMutex::new(Vec::new()),
            removed_tags: StdMutex::new(Vec::new()),
        });

        let scanner = TagScanner::new(client, store.clone(), breaker, health, config, Shutdown::new());
        scanner.scan_tag("added", TaskType::Added, "processing").await;

        assert!(!store.exists(&"b".repeat(40), TaskType::Added).await.unwrap());
    }

    #[tokio::test]
    async fn second_scan_does_not_duplicate_task_p8() {
        let (store, _dir) = store().await;
        let breaker = CircuitBreaker::new(store.clone()).await.unwrap();
        let health = Arc::new(HealthMonitor::new(Duration::from_secs(30)));
        let (config, _file) = config_handle("{}");

        let client: Arc<dyn RemoteClient> = Arc::new(StubClient {
            tagged: vec![Torrent {
                hash: "c".repeat(40),
                state: TorrentState::Downloading,
                ..Torrent::default()
            }],
            added_tags: StdMutex::new(Vec::new()),
            removed_tags: StdMutex::new(Vec::new()),
        });

        let scanner = TagScanner::new(client, store.clone(), breaker, health, config, Shutdown::new());
        scanner.scan_tag("added", TaskType::Added, "processing").await;
        scanner.scan_tag("added", TaskType::Added, "processing").await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 1);
    }
}
