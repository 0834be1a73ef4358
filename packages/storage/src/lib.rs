// ABOUTME: SQLite persistence for Kiln: projects, messages and fragments, step log, usage
// ABOUTME: Owns the schema migrations and the connection setup shared by every store

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use kiln_core::{Classify, ErrorClass};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

pub mod messages;
pub mod projects;
pub mod steps;
pub mod usage;

pub use messages::{Fragment, Message, MessageStorage, MessageStore, NewMessage};
pub use projects::{Project, ProjectStorage};
pub use steps::{NewRun, RunRecord, RunStatus, StepRecord, StepStatus, StepStorage, StepStore};
pub use usage::{Plan, UsageError, UsageLimits, UsageStatus, UsageStorage, GENERATION_COST};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Sqlx(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => ErrorClass::Transient,
            // SQLITE_BUSY / SQLITE_LOCKED
            Self::Sqlx(sqlx::Error::Database(db))
                if matches!(db.code().as_deref(), Some("5") | Some("6")) =>
            {
                ErrorClass::Transient
            }
            Self::Sqlx(sqlx::Error::RowNotFound) | Self::NotFound(_) => ErrorClass::NotFound,
            Self::InvalidInput(_) => ErrorClass::Validation,
            _ => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Open (creating if needed) the database at `url` and apply migrations
pub async fn open(url: &str) -> Result<SqlitePool> {
    if url.contains(":memory:") {
        return open_in_memory().await;
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!("Database ready at {}", url);
    Ok(pool)
}

/// Private in-memory database; a single connection so every query sees the same data
pub async fn open_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fixed-width RFC 3339 so lexical order matches time order
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}
