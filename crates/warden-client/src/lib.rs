//! Remote client façade over the torrent engine's management API (§4.2).
//!
//! Every operation resolves to a [`RemoteOutcome`] rather than a `Result`
//! with a crate-local error: the orchestration subsystem treats engine
//! unreachability, API errors, and "not found" as distinct, first-class
//! outcomes rather than failure paths to short-circuit on.

mod client;
mod error;
mod model;
mod outcome;

pub use client::{QbitClient, RemoteClient, RemoteConfig};
pub use error::ClientError;
pub use model::TorrentFile;
pub use outcome::RemoteOutcome;
