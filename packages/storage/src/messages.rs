// ABOUTME: Conversation message store with optional fragment attachments
// ABOUTME: Writes are single transactions; a caller-supplied id makes creation idempotent

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::{generate_id, FileSnapshot, FragmentData, MessageKind, MessageRole, SortOrder};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::{parse_timestamp, timestamp, Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub id: String,
    pub message_id: String,
    pub title: String,
    pub sandbox_url: String,
    pub files: FileSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Stable id for retried writes; generated when absent.
    pub id: Option<String>,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub fragment: Option<FragmentData>,
}

impl NewMessage {
    pub fn new(
        project_id: impl Into<String>,
        content: impl Into<String>,
        role: MessageRole,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: None,
            project_id: project_id.into(),
            content: content.into(),
            role,
            kind,
            fragment: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_fragment(mut self, fragment: FragmentData) -> Self {
        self.fragment = Some(fragment);
        self
    }
}

/// Persistence boundary consumed by the workflow
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` messages of a project ordered by creation time
    async fn find_messages(
        &self,
        project_id: &str,
        limit: u32,
        order: SortOrder,
    ) -> Result<Vec<Message>>;

    /// Insert a message and its fragment atomically.
    ///
    /// If a message with the same id already exists it is returned unchanged.
    async fn create_message(&self, message: NewMessage) -> Result<Message>;
}

const SELECT_MESSAGE: &str = r#"
    SELECT m.id, m.project_id, m.content, m.role, m.type, m.created_at,
           f.id AS fragment_id, f.title, f.sandbox_url, f.files
    FROM messages m
    LEFT JOIN fragments f ON f.message_id = m.id
"#;

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let id: String = row.try_get("id")?;
    let role: String = row.try_get("role")?;
    let kind: String = row.try_get("type")?;
    let created_at: String = row.try_get("created_at")?;

    let fragment = match row.try_get::<Option<String>, _>("fragment_id")? {
        Some(fragment_id) => {
            let files: String = row.try_get("files")?;
            Some(Fragment {
                id: fragment_id,
                message_id: id.clone(),
                title: row.try_get("title")?,
                sandbox_url: row.try_get("sandbox_url")?,
                files: serde_json::from_str(&files)?,
            })
        }
        None => None,
    };

    Ok(Message {
        project_id: row.try_get("project_id")?,
        content: row.try_get("content")?,
        role: MessageRole::from_str(&role)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown role '{}'", role)))?,
        kind: MessageKind::from_str(&kind)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown message type '{}'", kind)))?,
        created_at: parse_timestamp(&created_at)?,
        fragment,
        id,
    })
}

pub struct MessageStorage {
    pool: SqlitePool,
}

impl MessageStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(&format!("{} WHERE m.id = ?", SELECT_MESSAGE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    pub async fn count_messages(&self, project_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl MessageStore for MessageStorage {
    async fn find_messages(
        &self,
        project_id: &str,
        limit: u32,
        order: SortOrder,
    ) -> Result<Vec<Message>> {
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "{} WHERE m.project_id = ? ORDER BY m.created_at {dir}, m.rowid {dir} LIMIT ?",
            SELECT_MESSAGE,
            dir = direction
        );

        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let id = message.id.clone().unwrap_or_else(|| generate_id("msg"));
        let now = timestamp(Utc::now());

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (id, project_id, content, role, type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&message.project_id)
        .bind(&message.content)
        .bind(message.role.as_str())
        .bind(message.kind.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!(message_id = %id, "Message already persisted, returning existing row");
            return self
                .get_message(&id)
                .await?
                .ok_or_else(|| StorageError::NotFound(id));
        }

        if let Some(fragment) = &message.fragment {
            sqlx::query(
                r#"
                INSERT INTO fragments (id, message_id, sandbox_url, title, files, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(generate_id("frg"))
            .bind(&id)
            .bind(&fragment.sandbox_url)
            .bind(&fragment.title)
            .bind(serde_json::to_string(&fragment.files)?)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&message.project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            message_id = %id,
            project_id = %message.project_id,
            kind = message.kind.as_str(),
            fragment = message.fragment.is_some(),
            "Message created"
        );

        self.get_message(&id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::ProjectStorage;
    use pretty_assertions::assert_eq;

    async fn setup() -> (MessageStorage, String) {
        let pool = crate::open_in_memory().await.unwrap();
        let project = ProjectStorage::new(pool.clone())
            .create_project("user_1", "build a todo app")
            .await
            .unwrap();
        (MessageStorage::new(pool), project.id)
    }

    fn fragment() -> FragmentData {
        FragmentData {
            title: "Todo App".to_string(),
            sandbox_url: "https://3000-sbx.e2b.app".to_string(),
            files: [("app/page.tsx".to_string(), "page".to_string())]
                .into_iter()
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_with_fragment_round_trips() {
        let (storage, project_id) = setup().await;

        let created = storage
            .create_message(
                NewMessage::new(&project_id, "Here you go", MessageRole::Assistant, MessageKind::Result)
                    .with_fragment(fragment()),
            )
            .await
            .unwrap();

        let fragment = created.fragment.expect("fragment");
        assert_eq!(fragment.title, "Todo App");
        assert_eq!(fragment.files["app/page.tsx"], "page");
        assert!(created.id.starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_same_id_is_written_once() {
        let (storage, project_id) = setup().await;
        let message = NewMessage::new(&project_id, "done", MessageRole::Assistant, MessageKind::Result)
            .with_id("msg_run_1")
            .with_fragment(fragment());

        let first = storage.create_message(message.clone()).await.unwrap();
        let second = storage
            .create_message(message.with_fragment(FragmentData {
                title: "Other".into(),
                ..fragment()
            }))
            .await
            .unwrap();

        assert_eq!(first, second);
        // initial USER message plus one assistant message
        assert_eq!(storage.count_messages(&project_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_orders_and_limits() {
        let (storage, project_id) = setup().await;
        for i in 0..6 {
            storage
                .create_message(NewMessage::new(
                    &project_id,
                    format!("reply {}", i),
                    MessageRole::Assistant,
                    MessageKind::Result,
                ))
                .await
                .unwrap();
        }

        let latest = storage
            .find_messages(&project_id, 5, SortOrder::Desc)
            .await
            .unwrap();
        let contents: Vec<&str> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["reply 5", "reply 4", "reply 3", "reply 2", "reply 1"]);

        let oldest = storage
            .find_messages(&project_id, 1, SortOrder::Asc)
            .await
            .unwrap();
        assert_eq!(oldest[0].content, "build a todo app");
        assert_eq!(oldest[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_unknown_project_is_rejected() {
        let (storage, _) = setup().await;
        let err = storage
            .create_message(NewMessage::new("prj_missing", "x", MessageRole::User, MessageKind::Result))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Sqlx(_)));
    }
}
