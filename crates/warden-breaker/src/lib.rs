#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Per-resource circuit breaker (§4.5): gates calls to an unreliable
//! resource and persists its state across restarts via [`warden_store`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, warn};
use warden_core::{now_unix, BreakerConfig, BreakerState, BreakerStatus};
use warden_store::{StoreResult, WardenStore};

/// The three well-known resources the daemon gates calls to (§4.5).
pub const RESOURCE_QBIT_API: &str = "qbit_api";
/// Filesystem cleanup operations.
pub const RESOURCE_FILE_OPERATIONS: &str = "file_operations";
/// Generic network-layer failures not attributable to the API itself.
pub const RESOURCE_NETWORK: &str = "network";

/// Persisted breaker state machine, cached in memory for hot-path reads
/// and flushed to [`WardenStore`] on every transition.
pub struct CircuitBreaker {
    store: WardenStore,
    cache: Mutex<HashMap<String, BreakerStatus>>,
    /// Ephemeral (non-persisted) timestamp of the last half-open probe
    /// admitted per resource, used to pace concurrent probing.
    half_open_gate: Mutex<HashMap<String, i64>>,
}

impl CircuitBreaker {
    /// Construct a breaker backed by `store`, initializing default rows
    /// for the three well-known resources if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial store round-trip fails.
    pub async fn new(store: WardenStore) -> StoreResult<Arc<Self>> {
        let breaker = Arc::new(Self {
            store,
            cache: Mutex::new(HashMap::new()),
            half_open_gate: Mutex::new(HashMap::new()),
        });

        breaker
            .ensure_resource(RESOURCE_QBIT_API, BreakerConfig::qbit_api())
            .await?;
        breaker
            .ensure_resource(RESOURCE_FILE_OPERATIONS, BreakerConfig::file_operations())
            .await?;
        breaker
            .ensure_resource(RESOURCE_NETWORK, BreakerConfig::network())
            .await?;

        Ok(breaker)
    }

    /// Register (or reuse) a resource with the given default config.
    ///
    /// # Errors
    ///
    /// Returns an error if the store round-trip fails.
    pub async fn ensure_resource(&self, resource: &str, config: BreakerConfig) -> StoreResult<()> {
        self.store.init_breaker(resource, config).await?;
        let status = self
            .store
            .load_breaker(resource)
            .await?
            .expect("row was just initialized");
        self.cache.lock().await.insert(resource.to_string(), status);
        Ok(())
    }

    async fn load(&self, resource: &str) -> BreakerStatus {
        self.cache
            .lock()
            .await
            .get(resource)
            .cloned()
            .unwrap_or_else(|| BreakerStatus {
                breaker_type: resource.to_string(),
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_state_change: now_unix(),
                last_failure_time: 0,
                last_success_time: 0,
                config: BreakerConfig::qbit_api(),
                created_time: now_unix(),
                updated_time: now_unix(),
            })
    }

    async fn persist(&self, status: &BreakerStatus) {
        if let Err(err) = self.store.save_breaker(status).await {
            error!(breaker = %status.breaker_type, error = %err, "failed to persist breaker state");
        }
        self.cache
            .lock()
            .await
            .insert(status.breaker_type.clone(), status.clone());
    }

    /// Whether a call against `resource` is currently permitted. Performs
    /// `open -> half_open` timeout transitions and half-open probe pacing
    /// as a side effect.
    pub async fn can_execute(&self, resource: &str) -> bool {
        let mut status = self.load(resource).await;
        let now = now_unix();

        match status.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if now - status.last_state_change > i64::from(status.config.timeout_secs) {
                    warn!(resource, "breaker timeout elapsed, admitting half-open probe");
                    status.state = BreakerState::HalfOpen;
                    status.last_state_change = now;
                    status.success_count = 0;
                    self.persist(&status).await;
                    self.half_open_gate
                        .lock()
                        .await
                        .insert(resource.to_string(), now);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                let mut gate = self.half_open_gate.lock().await;
                match gate.get(resource) {
                    None => {
                        gate.insert(resource.to_string(), now);
                        true
                    }
                    Some(&last_probe)
                        if now - last_probe > i64::from(status.config.half_open_timeout_secs) =>
                    {
                        gate.insert(resource.to_string(), now);
                        true
                    }
                    Some(_) => false,
                }
            }
        }
    }

    /// Record a system-level success against `resource` (§4.5 distinguishes
    /// these from business/policy failures, which must never be recorded
    /// here — see [`warden_core::FailureReason::trips_breaker`]).
    pub async fn record_success(&self, resource: &str) {
        let mut status = self.load(resource).await;
        let now = now_unix();
        status.last_success_time = now;

        match status.state {
            BreakerState::Closed => {
                status.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                status.success_count += 1;
                if status.success_count >= status.config.success_threshold {
                    warn!(resource, "breaker closing after successful half-open probes");
                    status.state = BreakerState::Closed;
                    status.last_state_change = now;
                    status.failure_count = 0;
                    status.success_count = 0;
                    self.half_open_gate.lock().await.remove(resource);
                }
            }
            BreakerState::Open => {}
        }

        self.persist(&status).await;
    }

    /// Record a system-level failure against `resource`.
    pub async fn record_failure(&self, resource: &str) {
        let mut status = self.load(resource).await;
        let now = now_unix();
        status.last_failure_time = now;

        match status.state {
            BreakerState::Closed => {
                status.failure_count += 1;
                if status.failure_count >= status.config.failure_threshold {
                    error!(resource, failures = status.failure_count, "breaker opening");
                    status.state = BreakerState::Open;
                    status.last_state_change = now;
                }
            }
            BreakerState::HalfOpen => {
                error!(resource, "breaker reopening after half-open probe failure");
                status.state = BreakerState::Open;
                status.last_state_change = now;
                status.success_count = 0;
                self.half_open_gate.lock().await.remove(resource);
            }
            BreakerState::Open => {}
        }

        self.persist(&status).await;
    }

    /// Current persisted status for `resource`, for logging/diagnostics.
    pub async fn status(&self, resource: &str) -> BreakerStatus {
        self.load(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn breaker() -> (Arc<CircuitBreaker>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = WardenStore::open(&dir.path().join("w.db")).await.unwrap();
        (CircuitBreaker::new(store).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn closed_breaker_permits_calls_and_resets_on_success() {
        let (breaker, _dir) = breaker().await;
        assert!(breaker.can_execute(RESOURCE_QBIT_API).await);
        breaker.record_failure(RESOURCE_QBIT_API).await;
        breaker.record_success(RESOURCE_QBIT_API).await;
        let status = breaker.status(RESOURCE_QBIT_API).await;
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn threshold_failures_open_the_breaker_p4() {
        let (breaker, _dir) = breaker().await;
        for _ in 0..3 {
            breaker.record_failure(RESOURCE_QBIT_API).await;
        }
        assert_eq!(
            breaker.status(RESOURCE_QBIT_API).await.state,
            BreakerState::Open
        );
        assert!(!breaker.can_execute(RESOURCE_QBIT_API).await);

        // While open, success never transitions to closed (P4) — only
        // the timeout does (to half-open).
        breaker.record_success(RESOURCE_QBIT_API).await;
        assert_eq!(
            breaker.status(RESOURCE_QBIT_API).await.state,
            BreakerState::Open
        );
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_immediately() {
        let (breaker, _dir) = breaker().await;
        for _ in 0..3 {
            breaker.record_failure(RESOURCE_QBIT_API).await;
        }
        // Force past the timeout by rewriting last_state_change directly.
        let mut status = breaker.status(RESOURCE_QBIT_API).await;
        status.last_state_change = now_unix() - 1_000;
        breaker.persist(&status).await;

        assert!(breaker.can_execute(RESOURCE_QBIT_API).await);
        assert_eq!(
            breaker.status(RESOURCE_QBIT_API).await.state,
            BreakerState::HalfOpen
        );

        breaker.record_failure(RESOURCE_QBIT_API).await;
        assert_eq!(
            breaker.status(RESOURCE_QBIT_API).await.state,
            BreakerState::Open
        );
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let (breaker, _dir) = breaker().await;
        for _ in 0..3 {
            breaker.record_failure(RESOURCE_QBIT_API).await;
        }
        let mut status = breaker.status(RESOURCE_QBIT_API).await;
        status.last_state_change = now_unix() - 1_000;
        breaker.persist(&status).await;
        assert!(breaker.can_execute(RESOURCE_QBIT_API).await);

        breaker.record_success(RESOURCE_QBIT_API).await;
        breaker.record_success(RESOURCE_QBIT_API).await;
        assert_eq!(
            breaker.status(RESOURCE_QBIT_API).await.state,
            BreakerState::Closed
        );
    }
}
