//! Database bootstrap for the SQLite-backed job store.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Database file used by the CLI when `--db` is not given.
pub const DEFAULT_DB_PATH: &str = "queue.db";

/// Bound on how long a writer waits for the write lock before erroring.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_JOBS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    command     TEXT NOT NULL,
    state       TEXT NOT NULL DEFAULT 'pending',
    attempts    INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    priority    INTEGER NOT NULL DEFAULT 0,
    run_at      TEXT NULL,
    output      TEXT NOT NULL DEFAULT '',
    duration    REAL NOT NULL DEFAULT 0,
    last_error  TEXT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
)
";

const CREATE_CLAIM_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_jobs_claim
ON jobs (state, priority DESC, created_at ASC)
";

const CREATE_CONFIG_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Open the SQLite database at `path`, creating the file if missing.
///
/// WAL journaling allows concurrent readers while writers serialize; the busy
/// timeout bounds how long a claimer waits on the write lock.
pub async fn connect(path: impl AsRef<Path>) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
}

/// Create the `jobs` and `config` tables and the claim index.
///
/// Idempotent; run at every startup.
pub async fn setup_database(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_JOBS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_CLAIM_INDEX).execute(pool).await?;
    sqlx::query(CREATE_CONFIG_TABLE).execute(pool).await?;
    Ok(())
}
