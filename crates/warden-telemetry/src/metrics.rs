//! Prometheus-backed metrics registry for the supervisor and its workers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Counters and gauges mirror the task lifecycle (§4.1, §4.8) and
//!   breaker state (§4.5) so operators can alert on stuck queues or open
//!   breakers without reading logs.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared across the supervisor's
/// components.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    tasks_claimed_total: IntCounter,
    tasks_completed_total: IntCounter,
    tasks_failed_total: IntCounterVec,
    tasks_orphaned_total: IntCounter,
    queue_depth: IntGauge,
    breaker_state: IntGaugeVec,
    stalled_tracked: IntGauge,
    stalled_downgraded_total: IntCounter,
    hash_intake_total: IntCounterVec,
}

/// Point-in-time snapshot of selected gauges for status logging.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Pending plus failed-awaiting-retry task rows.
    pub queue_depth: i64,
    /// Stalled torrents currently tracked.
    pub stalled_tracked: i64,
    /// Stalled torrents demoted to bottom priority so far.
    pub stalled_downgraded_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let tasks_claimed_total = IntCounter::with_opts(Opts::new(
            "tasks_claimed_total",
            "Tasks atomically claimed by a worker",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "tasks_claimed_total",
            source,
        })?;
        let tasks_completed_total = IntCounter::with_opts(Opts::new(
            "tasks_completed_total",
            "Tasks that reached a terminal success outcome",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "tasks_completed_total",
            source,
        })?;
        let tasks_failed_total = IntCounterVec::new(
            Opts::new(
                "tasks_failed_total",
                "Task handler outcomes that were not success, by failure reason",
            ),
            &["reason"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "tasks_failed_total",
            source,
        })?;
        let tasks_orphaned_total = IntCounter::with_opts(Opts::new(
            "tasks_orphaned_total",
            "Task rows removed because their torrent vanished from the remote engine",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "tasks_orphaned_total",
            source,
        })?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "queue_depth",
            "Pending plus failed-awaiting-retry task rows",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "queue_depth",
            source,
        })?;
        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "breaker_state",
                "Circuit breaker state by resource (0=closed, 1=half_open, 2=open)",
            ),
            &["breaker_type"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "breaker_state",
            source,
        })?;
        let stalled_tracked = IntGauge::with_opts(Opts::new(
            "stalled_tracked",
            "Torrents currently tracked by the stalled tracker",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "stalled_tracked",
            source,
        })?;
        let stalled_downgraded_total = IntCounter::with_opts(Opts::new(
            "stalled_downgraded_total",
            "Torrents demoted to bottom priority by the stalled tracker",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "stalled_downgraded_total",
            source,
        })?;
        let hash_intake_total = IntCounterVec::new(
            Opts::new(
                "hash_intake_total",
                "Hash files observed by the optional hash-file intake poller",
            ),
            &["task_type", "outcome"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "hash_intake_total",
            source,
        })?;

        registry
            .register(Box::new(tasks_claimed_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "tasks_claimed_total",
                source,
            })?;
        registry
            .register(Box::new(tasks_completed_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "tasks_completed_total",
                source,
            })?;
        registry
            .register(Box::new(tasks_failed_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "tasks_failed_total",
                source,
            })?;
        registry
            .register(Box::new(tasks_orphaned_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "tasks_orphaned_total",
                source,
            })?;
        registry
            .register(Box::new(queue_depth.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "queue_depth",
                source,
            })?;
        registry
            .register(Box::new(breaker_state.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "breaker_state",
                source,
            })?;
        registry
            .register(Box::new(stalled_tracked.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "stalled_tracked",
                source,
            })?;
        registry
            .register(Box::new(stalled_downgraded_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "stalled_downgraded_total",
                source,
            })?;
        registry
            .register(Box::new(hash_intake_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "hash_intake_total",
                source,
            })?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                tasks_claimed_total,
                tasks_completed_total,
                tasks_failed_total,
                tasks_orphaned_total,
                queue_depth,
                breaker_state,
                stalled_tracked,
                stalled_downgraded_total,
                hash_intake_total,
            }),
        })
    }

    /// Increment the claimed-tasks counter.
    pub fn inc_tasks_claimed(&self) {
        self.inner.tasks_claimed_total.inc();
    }

    /// Increment the completed-tasks counter.
    pub fn inc_tasks_completed(&self) {
        self.inner.tasks_completed_total.inc();
    }

    /// Increment the failed-outcome counter for `reason`.
    pub fn inc_tasks_failed(&self, reason: &str) {
        self.inner.tasks_failed_total.with_label_values(&[reason]).inc();
    }

    /// Increment the orphaned-task counter.
    pub fn inc_tasks_orphaned(&self) {
        self.inner.tasks_orphaned_total.inc();
    }

    /// Set the queue depth gauge.
    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.set(depth);
    }

    /// Set the breaker state gauge for `breaker_type` (0=closed, 1=half_open, 2=open).
    pub fn set_breaker_state(&self, breaker_type: &str, state: i64) {
        self.inner
            .breaker_state
            .with_label_values(&[breaker_type])
            .set(state);
    }

    /// Set the count of currently-tracked stalled torrents.
    pub fn set_stalled_tracked(&self, count: i64) {
        self.inner.stalled_tracked.set(count);
    }

    /// Increment the stalled-downgrade counter.
    pub fn inc_stalled_downgraded(&self) {
        self.inner.stalled_downgraded_total.inc();
    }

    /// Increment the hash-file intake counter for `task_type`/`outcome`
    /// (`outcome` one of `created`, `duplicate`).
    pub fn inc_hash_intake(&self, task_type: &str, outcome: &str) {
        self.inner
            .hash_intake_total
            .with_label_values(&[task_type, outcome])
            .inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or are not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the gauges relevant to status logging.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth: self.inner.queue_depth.get(),
            stalled_tracked: self.inner.stalled_tracked.get(),
            stalled_downgraded_total: self.inner.stalled_downgraded_total.get(),
        }
    }
}
