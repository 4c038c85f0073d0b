use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::now_rfc3339;
use crate::users::UserSummary;

// ─── Enums ────────────────────────────────────────────────────────────────────
//
// The literal strings are part of the stored-data contract — external
// consumers and pre-existing rows depend on them exactly as written.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "To Do")]
    ToDo,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Review")]
    Review,
    #[serde(rename = "Completed")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToDo => "To Do",
            Self::InProgress => "In Progress",
            Self::Review => "Review",
            Self::Completed => "Completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "To Do" => Some(Self::ToDo),
            "In Progress" => Some(Self::InProgress),
            "Review" => Some(Self::Review),
            "Completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Urgent => "Urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(Self::Low),
            "Medium" => Some(Self::Medium),
            "High" => Some(Self::High),
            "Urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub const ALL: [TaskPriority; 4] = [Self::Low, Self::Medium, Self::High, Self::Urgent];
}

// ─── Rows and views ───────────────────────────────────────────────────────────

/// Task row joined against the identity directory (creator + assignee).
/// Storage keeps raw identifiers only; the join to summaries happens here,
/// at the read boundary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskJoinRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub priority: String,
    pub status: String,
    pub creator_id: String,
    pub assigned_to_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub creator_name: String,
    pub creator_email: String,
    pub assignee_name: String,
    pub assignee_email: String,
}

/// A task as callers see it: identity references resolved to summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub creator: UserSummary,
    pub assigned_to: UserSummary,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskJoinRow {
    fn into_view(self) -> Result<TaskView> {
        let priority = TaskPriority::parse(&self.priority).ok_or_else(|| {
            Error::Internal(anyhow::anyhow!("corrupt priority value: {}", self.priority))
        })?;
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            Error::Internal(anyhow::anyhow!("corrupt status value: {}", self.status))
        })?;
        Ok(TaskView {
            id: self.id,
            title: self.title,
            description: self.description,
            due_date: self.due_date,
            priority,
            status,
            creator: UserSummary {
                id: self.creator_id,
                name: self.creator_name,
                email: self.creator_email,
            },
            assigned_to: UserSummary {
                id: self.assigned_to_id,
                name: self.assignee_name,
                email: self.assignee_email,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ─── Query params ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueDate,
    Priority,
    Title,
}

impl SortField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            "dueDate" => Some(Self::DueDate),
            "priority" => Some(Self::Priority),
            "title" => Some(Self::Title),
            _ => None,
        }
    }

    /// Whitelisted ORDER BY expression — never interpolate caller input.
    fn order_expr(&self) -> &'static str {
        match self {
            Self::CreatedAt => "t.created_at",
            Self::UpdatedAt => "t.updated_at",
            Self::DueDate => "t.due_date",
            // Priority is stored as text; alphabetical order is meaningless.
            Self::Priority => {
                "CASE t.priority WHEN 'Urgent' THEN 1 WHEN 'High' THEN 2 \
                 WHEN 'Medium' THEN 3 ELSE 4 END"
            }
            Self::Title => "t.title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter + sort specification for `find_all`. Default: newest first.
#[derive(Debug, Clone, Default)]
pub struct TaskListParams {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub sort_by: SortField,
    pub direction: SortDirection,
}

// ─── Write payloads ───────────────────────────────────────────────────────────

/// Fully-validated record handed to `create` by the engine.
#[derive(Debug, Clone)]
pub struct NewTaskRecord {
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub creator_id: String,
    pub assigned_to_id: String,
}

/// Validated partial update. `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub assigned_to_id: Option<String>,
}

// ─── TaskStore ────────────────────────────────────────────────────────────────

const SELECT_JOINED: &str = "SELECT t.id, t.title, t.description, t.due_date, t.priority, \
     t.status, t.creator_id, t.assigned_to_id, t.created_at, t.updated_at, \
     c.name AS creator_name, c.email AS creator_email, \
     a.name AS assignee_name, a.email AS assignee_email \
     FROM tasks t \
     JOIN users c ON c.id = t.creator_id \
     JOIN users a ON a.id = t.assigned_to_id";

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, record: NewTaskRecord) -> Result<TaskView> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO tasks \
             (id, title, description, due_date, priority, status, creator_id, assigned_to_id, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.due_date)
        .bind(record.priority.as_str())
        .bind(record.status.as_str())
        .bind(&record.creator_id)
        .bind(&record.assigned_to_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("task not found after insert")))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<TaskView>> {
        let row: Option<TaskJoinRow> =
            sqlx::query_as(&format!("{SELECT_JOINED} WHERE t.id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TaskJoinRow::into_view).transpose()
    }

    /// Whole-record partial replacement keyed by id. Concurrent updates are
    /// last-write-wins — there is no optimistic-concurrency token.
    pub async fn update(&self, id: &str, changes: TaskChanges) -> Result<Option<TaskView>> {
        let now = now_rfc3339();
        let affected = sqlx::query(
            "UPDATE tasks SET \
               title = COALESCE(?, title), \
               description = COALESCE(?, description), \
               due_date = COALESCE(?, due_date), \
               priority = COALESCE(?, priority), \
               status = COALESCE(?, status), \
               assigned_to_id = COALESCE(?, assigned_to_id), \
               updated_at = ? \
             WHERE id = ?",
        )
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.due_date)
        .bind(changes.priority.map(|p| p.as_str()))
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.assigned_to_id)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Returns true if a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn find_all(&self, params: &TaskListParams) -> Result<Vec<TaskView>> {
        let sql = format!(
            "{SELECT_JOINED} ORDER BY {} {}",
            params.sort_by.order_expr(),
            params.direction.sql()
        );
        let mut rows: Vec<TaskJoinRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        // Post-filter (SQLite has limited dynamic WHERE support without a query builder)
        if let Some(status) = params.status {
            rows.retain(|r| r.status == status.as_str());
        }
        if let Some(priority) = params.priority {
            rows.retain(|r| r.priority == priority.as_str());
        }

        rows.into_iter().map(TaskJoinRow::into_view).collect()
    }

    pub async fn find_by_assignee(&self, user_id: &str) -> Result<Vec<TaskView>> {
        let rows: Vec<TaskJoinRow> = sqlx::query_as(&format!(
            "{SELECT_JOINED} WHERE t.assigned_to_id = ? ORDER BY t.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskJoinRow::into_view).collect()
    }

    pub async fn find_by_creator(&self, user_id: &str) -> Result<Vec<TaskView>> {
        let rows: Vec<TaskJoinRow> = sqlx::query_as(&format!(
            "{SELECT_JOINED} WHERE t.creator_id = ? ORDER BY t.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskJoinRow::into_view).collect()
    }

    /// Tasks due strictly before `now` and not yet completed, soonest first.
    pub async fn find_overdue(&self, now: &str) -> Result<Vec<TaskView>> {
        let rows: Vec<TaskJoinRow> = sqlx::query_as(&format!(
            "{SELECT_JOINED} WHERE t.due_date < ? AND t.status != 'Completed' \
             ORDER BY t.due_date ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskJoinRow::into_view).collect()
    }
}
