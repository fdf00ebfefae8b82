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
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Supervisory daemon wiring (§4.7-§4.10). The task store, remote
//! client, retry engine, circuit breaker, and health monitor are
//! assembled here into the tag scanner, worker pool, stalled tracker,
//! and optional hash-file intake feed.
//!
//! Layout: `supervisor.rs` (lifecycle, crash recovery, idle loop),
//! `scanner.rs` (tag-based discovery), `workers.rs` (claim/dispatch/
//! outcome translation), `stalled.rs` (stagnation tracking),
//! `hashfeed.rs` (optional directory intake), `shutdown.rs`
//! (cooperative cancellation), `error.rs` (error types).

pub mod error;
pub mod hashfeed;
pub mod scanner;
pub mod shutdown;
pub mod stalled;
pub mod supervisor;
pub mod workers;

pub use error::{AppError, AppResult};
pub use supervisor::run;
