//! Connection setup: WAL journaling, busy timeout, and migrations.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::{StoreError, StoreResult};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open (creating if absent) the sqlite database backing the task store,
/// enabling write-ahead logging per §6, and apply pending migrations.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or migrations fail.
pub async fn open_pool(db_file: &Path) -> StoreResult<SqlitePool> {
    let uri = format!("sqlite://{}", db_file.display());
    let options = SqliteConnectOptions::from_str(&uri)
        .map_err(|source| StoreError::Query {
            operation: "parse_connect_options",
            source,
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(5_000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(|source| StoreError::Query {
            operation: "connect",
            source,
        })?;

    MIGRATOR
        .run(&pool)
        .await
        .map_err(StoreError::Migration)?;

    Ok(pool)
}
