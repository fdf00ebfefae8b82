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

//! Binary entrypoint: parses the CLI, initializes logging, and runs
//! the supervisor until shutdown.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use warden_telemetry::{init_logging, LoggingConfig};

/// Supervisory daemon that attaches to a remote torrent engine's
/// management API, enforcing file-priority policy, post-completion
/// cleanup, and stalled-torrent demotion via a durable task queue.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the JSON configuration document.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging starts with sane defaults before the configuration file
    // is read, so early startup failures are still visible.
    let logging = LoggingConfig::default();
    if let Err(err) = init_logging(&logging) {
        eprintln!("failed to initialize logging: {err}");
    }

    match warden_app::run(&args.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "warden exited with an error");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(255))
        }
    }
}
