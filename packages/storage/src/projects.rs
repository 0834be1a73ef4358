// ABOUTME: Project records and the user messages that open or continue a conversation
// ABOUTME: Project creation and its first message share one transaction

use chrono::{DateTime, Utc};
use kiln_core::{generate_id, generate_slug, validate_request_text, MessageKind, MessageRole};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::{parse_timestamp, timestamp, Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        user_id: row.try_get("user_id")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub struct ProjectStorage {
    pool: SqlitePool,
}

impl ProjectStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a project named with a random slug, seeded with the user's first message
    pub async fn create_project(&self, user_id: &str, initial_message: &str) -> Result<Project> {
        validate_request_text(initial_message)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;

        let id = generate_id("prj");
        let name = generate_slug();
        let now = timestamp(Utc::now());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO projects (id, name, user_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&name)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        insert_user_message(&mut tx, &id, initial_message, &now).await?;

        tx.commit().await?;

        info!(project_id = %id, name = %name, user_id, "Project created");
        self.get_project(&id).await
    }

    pub async fn get_project(&self, id: &str) -> Result<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("project {}", id)))?;

        row_to_project(&row)
    }

    pub async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects WHERE user_id = ? ORDER BY updated_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_project).collect()
    }

    /// Append a follow-up request to an existing project. Returns the new message id.
    pub async fn append_user_message(&self, project_id: &str, content: &str) -> Result<String> {
        validate_request_text(content).map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        self.get_project(project_id).await?;

        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        let message_id = insert_user_message(&mut tx, project_id, content, &now).await?;
        sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(message_id)
    }
}

async fn insert_user_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    project_id: &str,
    content: &str,
    now: &str,
) -> Result<String> {
    let id = generate_id("msg");
    sqlx::query(
        r#"
        INSERT INTO messages (id, project_id, content, role, type, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(project_id)
    .bind(content)
    .bind(MessageRole::User.as_str())
    .bind(MessageKind::Result.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::MAX_REQUEST_CHARS;

    async fn storage() -> ProjectStorage {
        ProjectStorage::new(crate::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_create_project_names_with_slug() {
        let storage = storage().await;
        let project = storage.create_project("user_1", "build a todo app").await.unwrap();

        assert!(project.id.starts_with("prj_"));
        assert_eq!(project.name.split('-').count(), 2);
        assert_eq!(storage.get_project(&project.id).await.unwrap(), project);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_and_oversized_messages() {
        let storage = storage().await;

        let empty = storage.create_project("user_1", "   ").await.unwrap_err();
        assert!(matches!(empty, StorageError::InvalidInput(_)));

        let long = "x".repeat(MAX_REQUEST_CHARS + 1);
        let too_long = storage.create_project("user_1", &long).await.unwrap_err();
        assert!(matches!(too_long, StorageError::InvalidInput(_)));

        assert!(storage.list_projects("user_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_to_missing_project_is_not_found() {
        let storage = storage().await;
        let err = storage
            .append_user_message("prj_nope", "make it blue")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_projects_is_scoped_to_user() {
        let storage = storage().await;
        storage.create_project("user_1", "first").await.unwrap();
        storage.create_project("user_2", "second").await.unwrap();

        let projects = storage.list_projects("user_1").await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].user_id, "user_1");
    }
}
