//! Thin façade over the torrent engine's HTTP management API (§4.2).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use warden_core::Torrent;

use crate::error::ClientError;
use crate::model::{TorrentFile, WireFile, WireTorrent};
use crate::outcome::RemoteOutcome;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Connection parameters for the remote engine (§6).
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Hostname or IP address of the management API.
    pub host: String,
    /// TCP port of the management API.
    pub port: u16,
    /// Optional HTTP Basic Auth username.
    pub username: Option<String>,
    /// Optional HTTP Basic Auth password.
    pub password: Option<String>,
}

impl RemoteConfig {
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Operations required of the remote torrent engine (§4.2). Implemented
/// as a trait so the orchestration subsystem can be exercised against a
/// stub in tests without a live engine.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Poll the version endpoint until a response is received. Retries
    /// every 5s with an unbounded budget — intended for startup only.
    async fn wait_until_ready(&self);

    /// Single-shot version-endpoint probe used by the health monitor's
    /// cadence (§4.6); unlike `wait_until_ready`, does not retry.
    async fn ping(&self) -> RemoteOutcome<()>;

    /// Fetch a single torrent by hash.
    async fn torrent_by_hash(&self, hash: &str) -> RemoteOutcome<Torrent>;

    /// Fetch every torrent currently carrying `tag`, excluding torrents
    /// still downloading metadata (`hash == name` placeholder state).
    async fn torrents_with_tag(&self, tag: &str) -> RemoteOutcome<Vec<Torrent>>;

    /// Attach `tag` to the torrent.
    async fn add_tag(&self, hash: &str, tag: &str) -> RemoteOutcome<()>;

    /// Detach `tag` from the torrent.
    async fn remove_tag(&self, hash: &str, tag: &str) -> RemoteOutcome<()>;

    /// List files for a torrent; an empty list means metadata is not yet
    /// available (this is a valid `Ok(vec![])`, not `NotFound`).
    async fn files(&self, hash: &str) -> RemoteOutcome<Vec<TorrentFile>>;

    /// Set the download priority of the given file indices; `0` means
    /// "do not download".
    async fn set_file_priority(&self, hash: &str, indices: &[u32], priority: u32) -> RemoteOutcome<()>;

    /// Demote the torrent to the bottom of the download queue.
    async fn set_bottom_priority(&self, hash: &str) -> RemoteOutcome<()>;

    /// Downloading torrents whose state is `stalledDL` and whose
    /// progress is below `progress_threshold`.
    async fn stalled_downloading(&self, progress_threshold: f64) -> RemoteOutcome<Vec<Torrent>>;
}

/// Concrete [`RemoteClient`] speaking the engine's JSON management API
/// over HTTP, authenticating with optional HTTP Basic credentials.
pub struct QbitClient {
    http: Client,
    base_url: String,
    config: RemoteConfig,
}

impl QbitClient {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: RemoteConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(ClientError::Build)?;
        let base_url = config.base_url();
        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method, url);
        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_ref());
        }
        builder
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> RemoteOutcome<T> {
        let response = match self.request(reqwest::Method::GET, path).send().await {
            Ok(response) => response,
            Err(err) => return RemoteOutcome::NetworkError(err.to_string()),
        };
        Self::classify_json(response).await
    }

    async fn post_empty(&self, path: &str) -> RemoteOutcome<()> {
        let response = match self.request(reqwest::Method::POST, path).send().await {
            Ok(response) => response,
            Err(err) => return RemoteOutcome::NetworkError(err.to_string()),
        };
        if response.status().is_success() {
            RemoteOutcome::Ok(())
        } else {
            Self::classify_error(response).await
        }
    }

    async fn classify_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> RemoteOutcome<T> {
        if !response.status().is_success() {
            return Self::classify_error(response).await;
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return RemoteOutcome::NetworkError(err.to_string()),
        };
        match serde_json::from_str::<T>(&body) {
            Ok(value) => RemoteOutcome::Ok(value),
            Err(err) => RemoteOutcome::ApiError(format!("malformed response body: {err}")),
        }
    }

    async fn classify_error<T>(response: reqwest::Response) -> RemoteOutcome<T> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return RemoteOutcome::NotFound;
        }
        let body = response.text().await.unwrap_or_default();
        RemoteOutcome::ApiError(format!("{status}: {body}"))
    }
}

#[async_trait]
impl RemoteClient for QbitClient {
    async fn wait_until_ready(&self) {
        loop {
            match self.request(reqwest::Method::GET, "/api/v2/app/version").send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("remote engine ready");
                    return;
                }
                Ok(response) => {
                    warn!(status = %response.status(), "remote engine not ready yet");
                }
                Err(err) => {
                    warn!(error = %err, "remote engine unreachable, retrying");
                }
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn ping(&self) -> RemoteOutcome<()> {
        let response = match self.request(reqwest::Method::GET, "/api/v2/app/version").send().await {
            Ok(response) => response,
            Err(err) => return RemoteOutcome::NetworkError(err.to_string()),
        };
        if response.status().is_success() {
            RemoteOutcome::Ok(())
        } else {
            Self::classify_error(response).await
        }
    }

    async fn torrent_by_hash(&self, hash: &str) -> RemoteOutcome<Torrent> {
        let path = format!("/api/v2/torrents/info?hashes={hash}");
        match self.get_json::<Vec<WireTorrent>>(&path).await {
            RemoteOutcome::Ok(mut torrents) => {
                if torrents.is_empty() {
                    RemoteOutcome::NotFound
                } else {
                    RemoteOutcome::Ok(torrents.remove(0).into())
                }
            }
            RemoteOutcome::NotFound => RemoteOutcome::NotFound,
            RemoteOutcome::ApiError(msg) => RemoteOutcome::ApiError(msg),
            RemoteOutcome::NetworkError(msg) => RemoteOutcome::NetworkError(msg),
        }
    }

    async fn torrents_with_tag(&self, tag: &str) -> RemoteOutcome<Vec<Torrent>> {
        let path = format!("/api/v2/torrents/info?tag={tag}");
        self.get_json::<Vec<WireTorrent>>(&path).await.map(|wire| {
            wire.into_iter()
                .map(Torrent::from)
                .filter(|t| t.hash != t.name)
                .collect()
        })
    }

    async fn add_tag(&self, hash: &str, tag: &str) -> RemoteOutcome<()> {
        let path = format!("/api/v2/torrents/addTags?hashes={hash}&tags={tag}");
        self.post_empty(&path).await
    }

    async fn remove_tag(&self, hash: &str, tag: &str) -> RemoteOutcome<()> {
        let path = format!("/api/v2/torrents/removeTags?hashes={hash}&tags={tag}");
        self.post_empty(&path).await
    }

    async fn files(&self, hash: &str) -> RemoteOutcome<Vec<TorrentFile>> {
        let path = format!("/api/v2/torrents/files?hash={hash}");
        match self.get_json::<Vec<WireFile>>(&path).await {
            RemoteOutcome::NotFound => RemoteOutcome::Ok(Vec::new()),
            other => other.map(|files| files.into_iter().map(TorrentFile::from).collect()),
        }
    }

    async fn set_file_priority(
        &self,
        hash: &str,
        indices: &[u32],
        priority: u32,
    ) -> RemoteOutcome<()> {
        let ids = indices
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        let path = format!("/api/v2/torrents/filePrio?hashes={hash}&id={ids}&priority={priority}");
        self.post_empty(&path).await
    }

    async fn set_bottom_priority(&self, hash: &str) -> RemoteOutcome<()> {
        let path = format!("/api/v2/torrents/bottomPrio?hashes={hash}");
        self.post_empty(&path).await
    }

    async fn stalled_downloading(&self, progress_threshold: f64) -> RemoteOutcome<Vec<Torrent>> {
        let path = "/api/v2/torrents/info?filter=downloading";
        self.get_json::<Vec<WireTorrent>>(path).await.map(|wire| {
            wire.into_iter()
                .map(Torrent::from)
                .filter(|t| {
                    t.state == warden_core::TorrentState::StalledDl
                        && t.progress < progress_threshold
                })
                .collect()
        })
    }
}
