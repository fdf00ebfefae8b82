//! Loading, validating, and reloading the configuration document.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::model::WardenConfig;

const KNOWN_KEYS: &[&str] = &[
    "host",
    "port",
    "username",
    "password",
    "added_tag",
    "completed_tag",
    "processing_tag",
    "file_patterns",
    "folder_patterns",
    "disable_file_patterns",
    "categories",
    "max_workers",
    "batch_size",
    "poll_interval_secs",
    "check_interval_secs",
    "min_stalled_minutes",
    "stalled_check_interval_secs",
    "progress_threshold",
    "circuit_breaker",
    "db_file",
    "log_file",
    "debug_mode",
    "added_hash_dir",
    "completed_hash_dir",
    "log_level",
    "log_format",
];

/// Read and parse the configuration document at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON, or
/// fails validation.
pub fn load(path: &Path) -> ConfigResult<WardenConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    warn_unknown_keys(&raw);
    let config: WardenConfig =
        serde_json::from_value(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    validate(&config)?;
    Ok(config)
}

fn warn_unknown_keys(raw: &serde_json::Value) {
    let Some(object) = raw.as_object() else {
        return;
    };
    for key in object.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!(key = %key, "ignoring unrecognized configuration key");
        }
    }
}

fn validate(config: &WardenConfig) -> ConfigResult<()> {
    if config.host.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "host",
            reason: "must not be empty".to_string(),
        });
    }
    if config.port == 0 {
        return Err(ConfigError::Invalid {
            field: "port",
            reason: "must be between 1 and 65535".to_string(),
        });
    }
    if config.max_workers == 0 {
        return Err(ConfigError::Invalid {
            field: "max_workers",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.batch_size == 0 {
        return Err(ConfigError::Invalid {
            field: "batch_size",
            reason: "must be at least 1".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&config.progress_threshold) {
        return Err(ConfigError::Invalid {
            field: "progress_threshold",
            reason: "must be between 0.0 and 1.0".to_string(),
        });
    }
    if config.circuit_breaker.failure_threshold == 0 {
        return Err(ConfigError::Invalid {
            field: "circuit_breaker.failure_threshold",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.circuit_breaker.success_threshold == 0 {
        return Err(ConfigError::Invalid {
            field: "circuit_breaker.success_threshold",
            reason: "must be at least 1".to_string(),
        });
    }
    if !matches!(config.log_format.as_str(), "pretty" | "json") {
        return Err(ConfigError::Invalid {
            field: "log_format",
            reason: "must be 'pretty' or 'json'".to_string(),
        });
    }
    Ok(())
}

/// Sections of [`WardenConfig`] that may change at runtime without a
/// process restart (§6): pattern lists and scheduling cadences.
/// Connection parameters require a restart to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadableDelta {
    /// Whether any pattern list changed.
    pub patterns_changed: bool,
    /// Whether any cadence (poll/check/stalled interval) changed.
    pub cadences_changed: bool,
}

/// A shared, swappable handle to the live configuration document.
///
/// `reload` re-reads the file and swaps in the new value, returning a
/// [`ReloadableDelta`] describing which dynamic sections changed so
/// callers can log what actually took effect. Connection parameters
/// (`host`, `port`, credentials) are read once at startup — changing
/// them in the file has no effect until the process restarts.
#[derive(Clone)]
pub struct ConfigHandle {
    path: PathBuf,
    current: Arc<RwLock<Arc<WardenConfig>>>,
}

impl ConfigHandle {
    /// Load `path` and wrap it in a reloadable handle.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as [`load`].
    pub fn open(path: &Path) -> ConfigResult<Self> {
        let config = load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// The current configuration snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<WardenConfig> {
        self.current.read().expect("config lock poisoned").clone()
    }

    /// Re-read the configuration file and swap in the new snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can no longer be read or parsed;
    /// the previous snapshot remains in effect in that case.
    pub fn reload(&self) -> ConfigResult<ReloadableDelta> {
        let next = load(&self.path)?;
        let previous = self.current();
        let delta = ReloadableDelta {
            patterns_changed: previous.file_patterns != next.file_patterns
                || previous.folder_patterns != next.folder_patterns
                || previous.disable_file_patterns != next.disable_file_patterns,
            cadences_changed: previous.poll_interval_secs != next.poll_interval_secs
                || previous.check_interval_secs != next.check_interval_secs
                || previous.stalled_check_interval_secs != next.stalled_check_interval_secs,
        };
        *self.current.write().expect("config lock poisoned") = Arc::new(next);
        Ok(delta)
    }
}
