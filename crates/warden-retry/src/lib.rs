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

//! Pluggable retry-strategy engine (§4.4): a static map from
//! `failure_reason` to one of four backoff strategies, applied with
//! jitter and an optional bounded retry budget.

use std::collections::HashMap;

use rand::Rng;
use tracing::debug;
use warden_core::{now_unix, FailureReason};

/// The closed set of backoff shapes a strategy can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyType {
    /// `base * multiplier^min(retry_count, 10)`, capped at `max_delay`.
    Exponential,
    /// `base`, unconditionally.
    Fixed,
    /// `base * (1 + 0.5 * retry_count)`, capped at `max_delay`.
    Linear,
    /// A per-reason base looked up from a fixed table, then compounded
    /// exponentially for `retry_count > 0`.
    Adaptive,
}

/// Static configuration for one retry strategy (§3 `RetryStrategyConfig`).
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategyConfig {
    /// Human-readable label, used only in logs.
    pub name: &'static str,
    /// Which backoff shape to apply.
    pub strategy_type: StrategyType,
    /// Base delay in seconds.
    pub base_delay: f64,
    /// Delay ceiling in seconds.
    pub max_delay: f64,
    /// Maximum number of retries before the budget is exhausted.
    /// `None` means unbounded.
    pub max_retries: Option<u32>,
    /// Multiplier applied per retry for exponential/adaptive strategies.
    pub backoff_multiplier: f64,
    /// Fractional jitter applied symmetrically around the raw delay.
    pub jitter_factor: f64,
}

const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.2;

const QBIT_API_ERROR: RetryStrategyConfig = RetryStrategyConfig {
    name: "qbit_api_error",
    strategy_type: StrategyType::Exponential,
    base_delay: 60.0,
    max_delay: 600.0,
    max_retries: None,
    backoff_multiplier: DEFAULT_MULTIPLIER,
    jitter_factor: DEFAULT_JITTER,
};

const METADATA_NOT_READY: RetryStrategyConfig = RetryStrategyConfig {
    name: "metadata_not_ready",
    ..QBIT_API_ERROR
};

const NETWORK_ERROR: RetryStrategyConfig = RetryStrategyConfig {
    name: "network_error",
    strategy_type: StrategyType::Linear,
    base_delay: 10.0,
    max_delay: 60.0,
    max_retries: None,
    backoff_multiplier: DEFAULT_MULTIPLIER,
    jitter_factor: DEFAULT_JITTER,
};

const TORRENT_NOT_FOUND: RetryStrategyConfig = RetryStrategyConfig {
    name: "torrent_not_found",
    strategy_type: StrategyType::Exponential,
    base_delay: 5.0,
    max_delay: 60.0,
    max_retries: Some(3),
    backoff_multiplier: DEFAULT_MULTIPLIER,
    jitter_factor: DEFAULT_JITTER,
};

const RETRY_LATER: RetryStrategyConfig = RetryStrategyConfig {
    name: "retry_later",
    strategy_type: StrategyType::Exponential,
    base_delay: 120.0,
    max_delay: 1800.0,
    max_retries: None,
    backoff_multiplier: DEFAULT_MULTIPLIER,
    jitter_factor: DEFAULT_JITTER,
};

const PROCESSING_EXCEPTION: RetryStrategyConfig = RetryStrategyConfig {
    name: "processing_exception",
    strategy_type: StrategyType::Exponential,
    base_delay: 30.0,
    max_delay: 300.0,
    max_retries: None,
    backoff_multiplier: DEFAULT_MULTIPLIER,
    jitter_factor: DEFAULT_JITTER,
};

/// Fixed delay applied when the engine's own budget is exhausted; the
/// worker reschedules rather than deletes the task (P5).
pub const MAX_RETRIES_REACHED_DELAY_SECS: i64 = 3_600;

/// Looks up a strategy by `failure_reason` prefix and renders a concrete
/// `next_retry` timestamp, or reports budget exhaustion.
pub struct RetryEngine {
    strategies: HashMap<&'static str, RetryStrategyConfig>,
    adaptive_bases: HashMap<&'static str, f64>,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RetryEngine {
    /// Build the engine with the reason-to-strategy defaults from §4.4/§7.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut strategies = HashMap::new();
        strategies.insert("qbit_api_error", QBIT_API_ERROR);
        strategies.insert("metadata_not_ready", METADATA_NOT_READY);
        strategies.insert("network_error", NETWORK_ERROR);
        strategies.insert("torrent_not_found", TORRENT_NOT_FOUND);
        strategies.insert("retry_later", RETRY_LATER);
        strategies.insert("processing_exception", PROCESSING_EXCEPTION);

        let mut adaptive_bases = HashMap::new();
        adaptive_bases.insert("qbit_api_error", 60.0);
        adaptive_bases.insert("network_error", 10.0);
        adaptive_bases.insert("torrent_not_found", 5.0);

        Self {
            strategies,
            adaptive_bases,
        }
    }

    /// Replace or add a strategy, e.g. from operator configuration.
    pub fn set_strategy(&mut self, reason_key: &'static str, config: RetryStrategyConfig) {
        self.strategies.insert(reason_key, config);
    }

    /// The strategy that would be applied for `reason_key`. Unknown keys
    /// fall back to `retry_later`.
    #[must_use]
    pub fn strategy_for(&self, reason_key: &str) -> &RetryStrategyConfig {
        self.strategies
            .get(reason_key)
            .unwrap_or(&RETRY_LATER)
    }

    /// Compute the next retry timestamp for `reason` given the task's
    /// current `retry_count` (the count *before* this attempt). Returns
    /// `None` when `max_retries` is set and has been reached; the caller
    /// (the worker) must not delete the task on `None` (P5) — it should
    /// reschedule using [`MAX_RETRIES_REACHED_DELAY_SECS`] instead.
    #[must_use]
    pub fn next_retry(&self, reason: &FailureReason, retry_count: u32) -> Option<i64> {
        let key = reason.strategy_key();
        let cfg = self.strategies.get(key).unwrap_or(&RETRY_LATER);

        if let Some(max) = cfg.max_retries {
            if retry_count >= max {
                debug!(reason = key, retry_count, max, "retry budget exhausted");
                return None;
            }
        }

        let raw = match cfg.strategy_type {
            StrategyType::Exponential => exponential_delay(cfg, retry_count),
            StrategyType::Linear => linear_delay(cfg, retry_count),
            StrategyType::Fixed => cfg.base_delay,
            StrategyType::Adaptive => {
                adaptive_delay(cfg, key, retry_count, &self.adaptive_bases)
            }
        };

        let jittered = apply_jitter(raw, cfg.jitter_factor);
        Some(now_unix() + jittered.round() as i64)
    }
}

fn exponential_delay(cfg: &RetryStrategyConfig, retry_count: u32) -> f64 {
    let exponent = retry_count.min(10);
    (cfg.base_delay * cfg.backoff_multiplier.powi(i32::try_from(exponent).unwrap_or(10)))
        .min(cfg.max_delay)
}

fn linear_delay(cfg: &RetryStrategyConfig, retry_count: u32) -> f64 {
    (cfg.base_delay * (1.0 + 0.5 * f64::from(retry_count))).min(cfg.max_delay)
}

fn adaptive_delay(
    cfg: &RetryStrategyConfig,
    key: &str,
    retry_count: u32,
    adaptive_bases: &HashMap<&'static str, f64>,
) -> f64 {
    let base = adaptive_bases.get(key).copied().unwrap_or(cfg.base_delay);
    if retry_count == 0 {
        return base;
    }
    let exponent = retry_count.min(10);
    (base * cfg.backoff_multiplier.powi(i32::try_from(exponent).unwrap_or(10))).min(cfg.max_delay)
}

fn apply_jitter(delay: f64, jitter_factor: f64) -> f64 {
    let offset = rand::rng().random_range(-jitter_factor..=jitter_factor);
    (delay * (1.0 + offset)).max(1.0)
}
