// ABOUTME: Credit gate: points consumed per user inside a fixed-length window
// ABOUTME: The window opens on the first consume and resets once it has expired

use std::time::Duration;

use chrono::{DateTime, Utc};
use kiln_core::{Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{parse_timestamp, timestamp, StorageError};

/// Points charged for one generation
pub const GENERATION_COST: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLimits {
    pub free: u32,
    pub pro: u32,
    pub window: Duration,
}

impl UsageLimits {
    pub fn points_for(&self, plan: Plan) -> u32 {
        match plan {
            Plan::Free => self.free,
            Plan::Pro => self.pro,
        }
    }
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            free: 5,
            pro: 100,
            window: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatus {
    pub consumed: u32,
    pub remaining: u32,
    pub limit: u32,
    /// None until the first consume opens a window
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("You have run out of credits")]
    QuotaExceeded {
        remaining: u32,
        resets_at: DateTime<Utc>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for UsageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(StorageError::Sqlx(e))
    }
}

impl Classify for UsageError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::QuotaExceeded { .. } => ErrorClass::Quota,
            Self::Storage(e) => e.class(),
        }
    }
}

pub type Result<T> = std::result::Result<T, UsageError>;

/// Live window for a key; expired rows read as empty
struct Window {
    points: u32,
    expire_at: Option<DateTime<Utc>>,
}

pub struct UsageStorage {
    pool: SqlitePool,
    limits: UsageLimits,
}

impl UsageStorage {
    pub fn new(pool: SqlitePool, limits: UsageLimits) -> Self {
        Self { pool, limits }
    }

    pub fn limits(&self) -> UsageLimits {
        self.limits
    }

    fn window_length(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.limits.window).unwrap_or(chrono::Duration::days(30))
    }

    async fn read_window<'e, E>(executor: E, user_id: &str, now: DateTime<Utc>) -> Result<Window>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let row: Option<(i64, Option<String>)> =
            sqlx::query_as("SELECT points, expire_at FROM usage WHERE key = ?")
                .bind(user_id)
                .fetch_optional(executor)
                .await?;

        let Some((points, expire_at)) = row else {
            return Ok(Window { points: 0, expire_at: None });
        };
        let expire_at = expire_at.as_deref().map(parse_timestamp).transpose()?;

        match expire_at {
            Some(at) if at > now => Ok(Window {
                points: points.max(0) as u32,
                expire_at: Some(at),
            }),
            _ => Ok(Window { points: 0, expire_at: None }),
        }
    }

    /// Charge `cost` points to `user_id`, failing without charging when the plan's
    /// allowance for the current window would be exceeded.
    pub async fn consume(&self, user_id: &str, plan: Plan, cost: u32) -> Result<UsageStatus> {
        let limit = self.limits.points_for(plan);
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let window = Self::read_window(&mut *tx, user_id, now).await?;
        let expire_at = window.expire_at.unwrap_or(now + self.window_length());

        if window.points.saturating_add(cost) > limit {
            tx.rollback().await?;
            warn!(user_id, plan = plan.as_str(), consumed = window.points, limit, "Credit allowance exhausted");
            return Err(UsageError::QuotaExceeded {
                remaining: limit.saturating_sub(window.points),
                resets_at: expire_at,
            });
        }

        let points = window.points + cost;
        sqlx::query(
            r#"
            INSERT INTO usage (key, points, expire_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET points = excluded.points, expire_at = excluded.expire_at
            "#,
        )
        .bind(user_id)
        .bind(i64::from(points))
        .bind(timestamp(expire_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(user_id, plan = plan.as_str(), consumed = points, limit, "Credits consumed");
        Ok(UsageStatus {
            consumed: points,
            remaining: limit - points,
            limit,
            resets_at: Some(expire_at),
        })
    }

    pub async fn status(&self, user_id: &str, plan: Plan) -> Result<UsageStatus> {
        let limit = self.limits.points_for(plan);
        let window = Self::read_window(&self.pool, user_id, Utc::now()).await?;
        Ok(UsageStatus {
            consumed: window.points,
            remaining: limit.saturating_sub(window.points),
            limit,
            resets_at: window.expire_at,
        })
    }

    /// Drop every usage row. Returns the number of rows removed.
    pub async fn reset_all(&self) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM usage")
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!(removed, "Usage counters reset");
        Ok(removed)
    }
}
