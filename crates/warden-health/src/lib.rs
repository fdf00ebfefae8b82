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

//! Liveness probe for the remote engine (§4.6). Independent of the
//! circuit breaker: the breaker gates on *call outcomes*, this monitors
//! *responsiveness* of the version endpoint on its own cadence.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

/// Classification of remote-engine responsiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Last probe responded in under the slow-response threshold.
    Healthy,
    /// Last probe responded, but slowly, or 1-2 consecutive failures.
    Degraded,
    /// At least 3 consecutive probe failures.
    Unhealthy,
}

impl Health {
    /// Multiplicative batch-size throttle a worker should apply (§4.6).
    #[must_use]
    pub const fn speed_factor(self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Degraded => 0.3,
            Self::Unhealthy => 0.0,
        }
    }
}

const SLOW_RESPONSE_THRESHOLD: Duration = Duration::from_secs(5);
const UNHEALTHY_AFTER_FAILURES: u32 = 3;

struct Inner {
    health: Health,
    consecutive_failures: u32,
    last_checked: Option<Instant>,
}

/// Caches the remote engine's liveness classification, refreshing at
/// most once per `cadence`.
pub struct HealthMonitor {
    cadence: Duration,
    inner: Mutex<Inner>,
}

impl HealthMonitor {
    /// Construct a monitor that refreshes at most once every `cadence`
    /// (default 30s per §4.6); starts optimistically `Healthy`.
    #[must_use]
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            inner: Mutex::new(Inner {
                health: Health::Healthy,
                consecutive_failures: 0,
                last_checked: None,
            }),
        }
    }

    /// Run `probe` (the version endpoint call) if the cache is stale,
    /// updating the cached classification; otherwise a no-op. Returns the
    /// resulting (possibly cached) classification.
    pub async fn refresh<F, Fut, E>(&self, probe: F) -> Health
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut inner = self.inner.lock().await;
        let stale = inner
            .last_checked
            .is_none_or(|last| last.elapsed() >= self.cadence);
        if !stale {
            return inner.health;
        }

        let started = Instant::now();
        let outcome = probe().await;
        let elapsed = started.elapsed();
        inner.last_checked = Some(Instant::now());

        inner.health = match outcome {
            Ok(()) => {
                inner.consecutive_failures = 0;
                if elapsed < SLOW_RESPONSE_THRESHOLD {
                    Health::Healthy
                } else {
                    Health::Degraded
                }
            }
            Err(_) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
                    warn!(
                        failures = inner.consecutive_failures,
                        "remote engine marked unhealthy"
                    );
                    Health::Unhealthy
                } else {
                    Health::Degraded
                }
            }
        };

        inner.health
    }

    /// The cached classification without performing a probe.
    pub async fn current(&self) -> Health {
        self.inner.lock().await.health
    }

    /// `true` iff the cached classification is `Unhealthy`; workers and
    /// the scanner pause dispatch while this holds.
    pub async fn should_pause(&self) -> bool {
        self.current().await == Health::Unhealthy
    }

    /// Batch-size multiplier for the cached classification.
    pub async fn speed_factor(&self) -> f64 {
        self.current().await.speed_factor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthy_probe_reports_healthy_and_full_speed() {
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        let health = monitor.refresh(|| async { Ok::<(), ()>(()) }).await;
        assert_eq!(health, Health::Healthy);
        assert!((monitor.speed_factor().await - 1.0).abs() < f64::EPSILON);
        assert!(!monitor.should_pause().await);
    }

    #[tokio::test]
    async fn two_failures_degrade_but_do_not_pause() {
        let monitor = HealthMonitor::new(Duration::from_millis(0));
        for _ in 0..2 {
            monitor.refresh(|| async { Err::<(), ()>(()) }).await;
        }
        assert_eq!(monitor.current().await, Health::Degraded);
        assert!(!monitor.should_pause().await);
        assert!((monitor.speed_factor().await - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn three_consecutive_failures_mark_unhealthy_and_pause() {
        let monitor = HealthMonitor::new(Duration::from_millis(0));
        for _ in 0..3 {
            monitor.refresh(|| async { Err::<(), ()>(()) }).await;
        }
        assert_eq!(monitor.current().await, Health::Unhealthy);
        assert!(monitor.should_pause().await);
        assert!((monitor.speed_factor().await - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cached_result_is_reused_within_cadence() {
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        monitor.refresh(|| async { Ok::<(), ()>(()) }).await;
        // A failing probe should not be invoked while the cache is fresh.
        let health = monitor.refresh(|| async { Err::<(), ()>(()) }).await;
        assert_eq!(health, Health::Healthy);
    }
}
