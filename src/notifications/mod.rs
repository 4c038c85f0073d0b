//! Per-user notification records.
//!
//! Rows are created only by the lifecycle engine's assignment trigger and
//! are never deleted in normal operation; the only mutation is flipping
//! `read` to true.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::now_rfc3339;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub message: String,
    pub read: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct NotificationStore {
    pool: SqlitePool,
}

impl NotificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: &str,
        task_id: &str,
        message: &str,
    ) -> Result<NotificationRow> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO notifications (id, user_id, task_id, message, read, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(task_id)
        .bind(message)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("notification not found after insert")))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<NotificationRow>> {
        Ok(sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Newest first, capped at 50 rows.
    pub async fn find_by_user(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT 50",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn find_unread_by_user(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM notifications WHERE user_id = ? AND read = 0 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Flip `read` to true. Returns the updated row, or None if the id does
    /// not exist (or belongs to a different user — callers scope by owner).
    pub async fn mark_read(&self, id: &str, user_id: &str) -> Result<Option<NotificationRow>> {
        let now = now_rfc3339();
        let affected = sqlx::query(
            "UPDATE notifications SET read = 1, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(&now)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Mark every unread notification for a user as read. Returns the count.
    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "UPDATE notifications SET read = 1, updated_at = ? WHERE user_id = ? AND read = 0",
        )
        .bind(&now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
