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
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Domain model shared by every crate in the supervisory daemon: the
//! external torrent view, the durable task record, breaker state, and
//! the failure-reason vocabulary that ties the retry engine to the
//! circuit breaker.

pub mod error;
pub mod model;

pub use error::{CoreError, CoreResult};
pub use model::{
    now_unix, to_datetime, BreakerConfig, BreakerState, BreakerStatus, FailureReason,
    StalledSeedInfo, Task, TaskEvent, TaskEventKind, TaskStatus, TaskType, Torrent, TorrentState,
};
