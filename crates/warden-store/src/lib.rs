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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Durable task queue and breaker persistence for the warden daemon
//! (§4.1, §4.5, §6): a single sqlite file shared by the scanner, every
//! worker, the stalled tracker, and the supervisor.

pub mod error;
pub mod pool;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{StoreStats, WardenStore};
