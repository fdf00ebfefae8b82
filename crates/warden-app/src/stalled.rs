//! Stalled-torrent demotion (§4.9): an independent loop that tracks how
//! long a `stalledDL` torrent has sat without progress and demotes it
//! to bottom priority once it has stagnated past the configured
//! window.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use warden_client::{RemoteClient, RemoteOutcome};
use warden_config::ConfigHandle;
use warden_core::{now_unix, StalledSeedInfo};
use warden_telemetry::Metrics;

use crate::shutdown::Shutdown;

/// Progress must move by more than this fraction to count as movement;
/// below this the torrent is still considered stagnant.
const PROGRESS_EPSILON: f64 = 0.001;

/// Tracked-set size and downgrade count (§2.2), surfaced to the
/// supervisor's idle-loop status log.
#[derive(Debug, Clone, Copy, Default)]
pub struct StalledSummary {
    /// Torrents currently inside the stagnation window.
    pub tracked: usize,
    /// Torrents demoted to bottom priority so far.
    pub downgraded: usize,
}

/// Per-torrent stagnation window (§4.9), polled on its own cadence
/// independent of the worker pool and circuit breaker.
pub struct StalledTracker {
    client: Arc<dyn RemoteClient>,
    config: ConfigHandle,
    metrics: Metrics,
    shutdown: Shutdown,
    seeds: Mutex<HashMap<String, StalledSeedInfo>>,
}

impl StalledTracker {
    /// Construct a tracker over its dependencies.
    #[must_use]
    pub fn new(client: Arc<dyn RemoteClient>, config: ConfigHandle, metrics: Metrics, shutdown: Shutdown) -> Self {
        Self {
            client,
            config,
            metrics,
            shutdown,
            seeds: Mutex::new(HashMap::new()),
        }
    }

    /// Run the tracking loop until [`Shutdown::is_triggered`].
    pub async fn run(&self) {
        while !self.shutdown.is_triggered() {
            self.tick().await;
            let cadence = self.config.current().stalled_check_interval_secs;
            self.shutdown
                .sleep(std::time::Duration::from_secs(cadence))
                .await;
        }
        debug!("stalled tracker stopped");
    }

    /// One pass (§4.9 steps 1-4).
    #[instrument(skip(self))]
    async fn tick(&self) {
        let cfg = self.config.current();
        let stalled = match self
            .client
            .stalled_downloading(cfg.progress_threshold)
            .await
        {
            RemoteOutcome::Ok(torrents) => torrents,
            RemoteOutcome::NotFound => Vec::new(),
            RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) => {
                warn!(error = %msg, "stalled tracker: failed to list stalled torrents");
                return;
            }
        };

        let now = now_unix();
        let threshold_secs = (cfg.min_stalled_minutes * 60) as i64;
        let mut seeds = self.seeds.lock().await;
        let mut seen = std::collections::HashSet::new();

        for torrent in &stalled {
            seen.insert(torrent.hash.clone());
            let entry = seeds.entry(torrent.hash.clone()).or_insert_with(|| StalledSeedInfo {
                name: torrent.name.clone(),
                progress: torrent.progress,
                state: torrent.state,
                tracked_since: now,
                priority_downgraded: false,
            });

            if (torrent.progress - entry.progress).abs() > PROGRESS_EPSILON {
                entry.progress = torrent.progress;
                entry.tracked_since = now;
            }
            entry.name = torrent.name.clone();
            entry.state = torrent.state;

            if !entry.priority_downgraded && now - entry.tracked_since >= threshold_secs {
                match self.client.set_bottom_priority(&torrent.hash).await {
                    RemoteOutcome::Ok(()) => {
                        entry.priority_downgraded = true;
                        self.metrics.inc_stalled_downgraded();
                        debug!(hash = %torrent.hash, "demoted stalled torrent to bottom priority");
                    }
                    RemoteOutcome::NotFound => entry.priority_downgraded = true,
                    RemoteOutcome::ApiError(msg) | RemoteOutcome::NetworkError(msg) => {
                        warn!(hash = %torrent.hash, error = %msg, "failed to demote stalled torrent");
                    }
                }
            }
        }

        seeds.retain(|hash, _| seen.contains(hash));
        self.metrics.set_stalled_tracked(seeds.len() as i64);
    }

    /// Current tracked-set size and downgrade count (§2.2).
    pub async fn summary(&self) -> StalledSummary {
        let seeds = self.seeds.lock().await;
        StalledSummary {
            tracked: seeds.len(),
            downgraded: seeds.values().filter(|s| s.priority_downgraded).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use warden_client::TorrentFile;
    use warden_core::{Torrent, TorrentState};

    struct StubClient {
        stalled: std::sync::Mutex<Vec<Torrent>>,
        bottom_calls: std::sync::Mutex<Vec<String>>,
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
            RemoteOutcome::Ok(Vec::new())
        }
        async fn add_tag(&self, _hash: &str, _tag: &str) -> RemoteOutcome<()> {
            RemoteOutcome::Ok(())
        }
        async fn remove_tag(&self, _hash: &str, _tag: &str) -> RemoteOutcome<()> {
            RemoteOutcome::Ok(())
        }
        async fn files(&self, _hash: &str) -> RemoteOutcome<Vec<TorrentFile>> {
            RemoteOutcome::Ok(Vec::new())
        }
        async fn set_file_priority(&self, _hash: &str, _indices: &[u32], _priority: u32) -> RemoteOutcome<()> {
            RemoteOutcome::Ok(())
        }
        async fn set_bottom_priority(&self, hash: &str) -> RemoteOutcome<()> {
            self.bottom_calls.lock().unwrap().push(hash.to_string());
            RemoteOutcome::Ok(())
        }
        async fn stalled_downloading(&self, _progress_threshold: f64) -> RemoteOutcome<Vec<Torrent>> {
            RemoteOutcome::Ok(self.stalled.lock().unwrap().clone())
        }
    }

    fn config_handle(contents: &str) -> (ConfigHandle, NamedTempFile) {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        (ConfigHandle::open(file.path()).expect("open"), file)
    }

    #[tokio::test]
    async fn newly_stalled_torrent_is_tracked_but_not_yet_downgraded() {
        let (config, _file) = config_handle(r#"{"min_stalled_minutes":30}"#);
        let client = Arc::new(StubClient {
            stalled: std::sync::Mutex::new(vec![Torrent {
                hash: "a".repeat(40),
                state: TorrentState::StalledDl,
                progress: 0.42,
                ..Torrent::default()
            }]),
            bottom_calls: std::sync::Mutex::new(Vec::new()),
        });
        let tracker = StalledTracker::new(client.clone(), config, Metrics::new().unwrap(), Shutdown::new());

        tracker.tick().await;

        let summary = tracker.summary().await;
        assert_eq!(summary.tracked, 1);
        assert_eq!(summary.downgraded, 0);
        assert!(client.bottom_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stagnant_past_threshold_is_demoted_exactly_once() {
        let (config, _file) = config_handle(r#"{"min_stalled_minutes":30}"#);
        let hash = "b".repeat(40);
        let client = Arc::new(StubClient {
            stalled: std::sync::Mutex::new(vec![Torrent {
                hash: hash.clone(),
                state: TorrentState::StalledDl,
                progress: 0.42,
                ..Torrent::default()
            }]),
            bottom_calls: std::sync::Mutex::new(Vec::new()),
        });
        let tracker = StalledTracker::new(client.clone(), config, Metrics::new().unwrap(), Shutdown::new());

        tracker.tick().await;
        {
            let mut seeds = tracker.seeds.lock().await;
            let entry = seeds.get_mut(&hash).unwrap();
            entry.tracked_since = now_unix() - 1_800;
        }
        tracker.tick().await;
        tracker.tick().await;

        assert_eq!(client.bottom_calls.lock().unwrap().len(), 1);
        let summary = tracker.summary().await;
        assert_eq!(summary.downgraded, 1);
    }

    #[tokio::test]
    async fn progress_movement_resets_tracked_since_without_undoing_downgrade() {
        let (config, _file) = config_handle(r#"{"min_stalled_minutes":30}"#);
        let hash = "c".repeat(40);
        let client = Arc::new(StubClient {
            stalled: std::sync::Mutex::new(vec![Torrent {
                hash: hash.clone(),
                state: TorrentState::StalledDl,
                progress: 0.42,
                ..Torrent::default()
            }]),
            bottom_calls: std::sync::Mutex::new(Vec::new()),
        });
        let tracker = StalledTracker::new(client.clone(), config, Metrics::new().unwrap(), Shutdown::new());

        tracker.tick().await;
        {
            let mut seeds = tracker.seeds.lock().await;
            let entry = seeds.get_mut(&hash).unwrap();
            entry.tracked_since = now_unix() - 1_800;
            entry.priority_downgraded = true;
        }
        client.stalled.lock().unwrap()[0].progress = 0.50;
        tracker.tick().await;

        let seeds = tracker.seeds.lock().await;
        let entry = seeds.get(&hash).unwrap();
        assert!(entry.priority_downgraded);
        assert!(now_unix() - entry.tracked_since < 5);
    }

    #[tokio::test]
    async fn torrents_no_longer_stalled_are_evicted() {
        let (config, _file) = config_handle("{}");
        let hash = "d".repeat(40);
        let client = Arc::new(StubClient {
            stalled: std::sync::Mutex::new(vec![Torrent {
                hash: hash.clone(),
                state: TorrentState::StalledDl,
                progress: 0.1,
                ..Torrent::default()
            }]),
            bottom_calls: std::sync::Mutex::new(Vec::new()),
        });
        let tracker = StalledTracker::new(client.clone(), config, Metrics::new().unwrap(), Shutdown::new());
        tracker.tick().await;
        assert_eq!(tracker.summary().await.tracked, 1);

        client.stalled.lock().unwrap().clear();
        tracker.tick().await;
        assert_eq!(tracker.summary().await.tracked, 0);
    }
}
