//! Optional hash-file intake feed (§2.2 ADDED): a low-priority poller
//! over `added_hash_dir`/`completed_hash_dir` that treats the
//! appearance of a `<hash>.hash` file exactly like a scanner discovery
//! for the corresponding task type.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, error, warn};
use warden_config::ConfigHandle;
use warden_core::TaskType;
use warden_store::WardenStore;

use crate::shutdown::Shutdown;

/// Feed disabled unless at least one of `added_hash_dir`/
/// `completed_hash_dir` is configured.
pub struct HashFeed {
    store: WardenStore,
    config: ConfigHandle,
    shutdown: Shutdown,
}

impl HashFeed {
    /// Construct a feed over its dependencies.
    #[must_use]
    pub const fn new(store: WardenStore, config: ConfigHandle, shutdown: Shutdown) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }

    /// `true` if either hash directory is configured; the supervisor
    /// only spawns [`HashFeed::run`] when this holds.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        let cfg = self.config.current();
        cfg.added_hash_dir.is_some() || cfg.completed_hash_dir.is_some()
    }

    /// Run the poll loop until [`Shutdown::is_triggered`].
    pub async fn run(&self) {
        while !self.shutdown.is_triggered() {
            let cfg = self.config.current();
            if let Some(dir) = &cfg.added_hash_dir {
                self.scan_dir(dir, TaskType::Added).await;
            }
            if let Some(dir) = &cfg.completed_hash_dir {
                self.scan_dir(dir, TaskType::Completed).await;
            }
            self.shutdown
                .sleep(Duration::from_secs(cfg.poll_interval_secs))
                .await;
        }
        debug!("hash feed stopped");
    }

    async fn scan_dir(&self, dir: &str, task_type: TaskType) {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir, error = %err, "hash feed: failed to list directory");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir, error = %err, "hash feed: failed to read directory entry");
                    break;
                }
            };
            let path = entry.path();
            let Some(hash) = hash_from_path(&path) else {
                continue;
            };
            self.admit(&path, &hash, task_type).await;
        }
    }

    async fn admit(&self, path: &Path, hash: &str, task_type: TaskType) {
        match self.store.save(hash, task_type).await {
            Ok(true) => {
                if let Err(err) = fs::remove_file(path).await {
                    warn!(hash, error = %err, "hash feed: failed to remove consumed hash file");
                }
            }
            Ok(false) => {
                if let Err(err) = fs::remove_file(path).await {
                    warn!(hash, error = %err, "hash feed: failed to remove duplicate hash file");
                }
            }
            Err(err) => {
                error!(hash, %task_type, error = %err, "hash feed: failed to persist discovered task");
            }
        }
    }
}

/// Extract a lowercase hex hash from a `<hash>.hash` basename, if the
/// path matches that shape.
fn hash_from_path(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != "hash" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() == 40 && stem.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(stem.to_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

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

    #[test]
    fn hash_from_path_accepts_40_char_hex_stem() {
        let hash = "a".repeat(40);
        let path = PathBuf::from(format!("/tmp/{hash}.hash"));
        assert_eq!(hash_from_path(&path), Some(hash));
    }

    #[test]
    fn hash_from_path_rejects_wrong_extension_or_length() {
        assert!(hash_from_path(&PathBuf::from("/tmp/notahash.txt")).is_none());
        assert!(hash_from_path(&PathBuf::from("/tmp/deadbeef.hash")).is_none());
    }

    #[tokio::test]
    async fn disabled_without_any_configured_directory() {
        let (store, _dir) = store().await;
        let (config, _file) = config_handle("{}");
        let feed = HashFeed::new(store, config, Shutdown::new());
        assert!(!feed.is_enabled());
    }

    #[tokio::test]
    async fn new_hash_file_creates_task_and_is_consumed() {
        let (store, _store_dir) = store().await;
        let hash_dir = tempfile::tempdir().unwrap();
        let hash = "b".repeat(40);
        tokio::fs::write(hash_dir.path().join(format!("{hash}.hash")), b"")
            .await
            .unwrap();

        let contents = format!(r#"{{"added_hash_dir":"{}"}}"#, hash_dir.path().display());
        let (config, _file) = config_handle(&contents);
        let feed = HashFeed::new(store.clone(), config, Shutdown::new());
        assert!(feed.is_enabled());

        feed.scan_dir(&hash_dir.path().display().to_string(), TaskType::Added)
            .await;

        assert!(store.exists(&hash, TaskType::Added).await.unwrap());
        let mut remaining = tokio::fs::read_dir(hash_dir.path()).await.unwrap();
        assert!(remaining.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_hash_file_is_deleted_without_error() {
        let (store, _store_dir) = store().await;
        let hash = "c".repeat(40);
        store.save(&hash, TaskType::Added).await.unwrap();

        let hash_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(hash_dir.path().join(format!("{hash}.hash")), b"")
            .await
            .unwrap();

        let (config, _file) = config_handle("{}");
        let feed = HashFeed::new(store.clone(), config, Shutdown::new());
        feed.scan_dir(&hash_dir.path().display().to_string(), TaskType::Added)
            .await;

        let mut remaining = tokio::fs::read_dir(hash_dir.path()).await.unwrap();
        assert!(remaining.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_hash_files_are_ignored() {
        let (store, _store_dir) = store().await;
        let hash_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(hash_dir.path().join("readme.txt"), b"hello")
            .await
            .unwrap();

        let (config, _file) = config_handle("{}");
        let feed = HashFeed::new(store, config, Shutdown::new());
        feed.scan_dir(&hash_dir.path().display().to_string(), TaskType::Added)
            .await;

        let mut remaining = tokio::fs::read_dir(hash_dir.path()).await.unwrap();
        assert!(remaining.next_entry().await.unwrap().is_some());
    }
}
