//! Task lifecycle engine.
//!
//! Orchestrates create/update/delete, enforces the authorization and
//! temporal rules, detects assignment changes, and drives the two side
//! effects (notification record + live events). The engine owns no
//! persistent state of its own — it coordinates the stores and publishes
//! through the injected fanout, always after the primary mutation has
//! committed.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ipc::event::EventFanout;
use crate::notifications::NotificationStore;
use crate::storage::{now_rfc3339, to_storage_ts};
use crate::users::UserStore;

use super::store::{
    NewTaskRecord, TaskChanges, TaskListParams, TaskPriority, TaskStatus, TaskStore, TaskView,
};

const MAX_TITLE_CHARS: usize = 100;

// ─── Command payloads ─────────────────────────────────────────────────────────

/// Create command. Enum fields arrive as their literal strings and are
/// validated here, not at the deserialization edge, so a bad value surfaces
/// as a ValidationError instead of a transport error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub priority: String,
    #[serde(default)]
    pub status: Option<String>,
    pub assigned_to_id: String,
}

/// Update command — only present fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub assigned_to_id: Option<String>,
}

// ─── Engine ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TaskEngine {
    store: TaskStore,
    users: UserStore,
    notifications: NotificationStore,
    fanout: Arc<EventFanout>,
}

impl TaskEngine {
    pub fn new(
        store: TaskStore,
        users: UserStore,
        notifications: NotificationStore,
        fanout: Arc<EventFanout>,
    ) -> Self {
        Self {
            store,
            users,
            notifications,
            fanout,
        }
    }

    /// Create a task on behalf of `actor_id`.
    ///
    /// The due date must land on or after the current UTC calendar day
    /// (time of day ignored). This rule applies only at creation.
    pub async fn create_task(&self, actor_id: &str, input: NewTask) -> Result<TaskView> {
        let title = validate_title(&input.title)?;
        let description = validate_description(&input.description)?;
        let priority = parse_priority(&input.priority)?;
        let status = match input.status.as_deref() {
            Some(s) => parse_status(s)?,
            None => TaskStatus::ToDo,
        };

        let due = parse_due_date(&input.due_date)?;
        if due.date_naive() < Utc::now().date_naive() {
            return Err(Error::validation("due date must be in the future"));
        }

        let assigned_to_id = input.assigned_to_id.trim().to_string();
        if assigned_to_id.is_empty() {
            return Err(Error::validation("assignee is required"));
        }
        if self.users.find_by_id(&assigned_to_id).await?.is_none() {
            return Err(Error::validation("assigned user does not exist"));
        }

        let task = self
            .store
            .create(NewTaskRecord {
                title,
                description,
                due_date: to_storage_ts(due),
                priority,
                status,
                creator_id: actor_id.to_string(),
                assigned_to_id: assigned_to_id.clone(),
            })
            .await?;

        // Secondary effects only after the row is committed. Their failure
        // never fails the create.
        if assigned_to_id != actor_id {
            self.notify_assignment(&task).await;
        }
        self.fanout.broadcast("task:created", json!(task));

        info!(task_id = %task.id, creator = %actor_id, "task created");
        Ok(task)
    }

    /// Apply a partial update. Any authenticated actor may update any task;
    /// only delete is restricted to the creator. Past due dates are accepted
    /// here — the future-date rule is create-only.
    pub async fn update_task(
        &self,
        actor_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<TaskView> {
        let existing = self
            .store
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| Error::not_found("task not found"))?;

        let mut changes = TaskChanges::default();
        if let Some(ref title) = patch.title {
            changes.title = Some(validate_title(title)?);
        }
        if let Some(ref description) = patch.description {
            changes.description = Some(validate_description(description)?);
        }
        if let Some(ref priority) = patch.priority {
            changes.priority = Some(parse_priority(priority)?);
        }
        if let Some(ref status) = patch.status {
            changes.status = Some(parse_status(status)?);
        }
        if let Some(ref due) = patch.due_date {
            // Must parse, but any date — past or future — is accepted.
            changes.due_date = Some(to_storage_ts(parse_due_date(due)?));
        }

        let mut assignee_changed = false;
        if let Some(ref assignee) = patch.assigned_to_id {
            let assignee = assignee.trim();
            if assignee.is_empty() {
                return Err(Error::validation("assignee is required"));
            }
            if assignee != existing.assigned_to.id {
                if self.users.find_by_id(assignee).await?.is_none() {
                    return Err(Error::validation("assigned user does not exist"));
                }
                assignee_changed = true;
            }
            changes.assigned_to_id = Some(assignee.to_string());
        }

        let task = self
            .store
            .update(task_id, changes)
            .await?
            .ok_or_else(|| Error::not_found("task not found"))?;

        if assignee_changed {
            self.notify_assignment(&task).await;
        }
        self.fanout.broadcast("task:updated", json!(task));

        info!(task_id = %task.id, actor = %actor_id, "task updated");
        Ok(task)
    }

    /// Remove a task. Creator-only; checked before any mutation.
    pub async fn delete_task(&self, actor_id: &str, task_id: &str) -> Result<()> {
        let task = self
            .store
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| Error::not_found("task not found"))?;

        if task.creator.id != actor_id {
            return Err(Error::authorization("only the creator can delete this task"));
        }

        self.store.delete(task_id).await?;
        self.fanout.broadcast("task:deleted", json!({ "taskId": task_id }));

        info!(task_id = %task_id, actor = %actor_id, "task deleted");
        Ok(())
    }

    // ─── Reads ────────────────────────────────────────────────────────────────

    pub async fn get_task(&self, task_id: &str) -> Result<TaskView> {
        self.store
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| Error::not_found("task not found"))
    }

    pub async fn list_tasks(&self, params: &TaskListParams) -> Result<Vec<TaskView>> {
        self.store.find_all(params).await
    }

    pub async fn list_by_assignee(&self, user_id: &str) -> Result<Vec<TaskView>> {
        self.store.find_by_assignee(user_id).await
    }

    pub async fn list_by_creator(&self, user_id: &str) -> Result<Vec<TaskView>> {
        self.store.find_by_creator(user_id).await
    }

    pub async fn list_overdue(&self) -> Result<Vec<TaskView>> {
        self.store.find_overdue(&now_rfc3339()).await
    }

    // ─── Assignment notification (best-effort) ────────────────────────────────

    /// Persist and push an assignment notification for the task's current
    /// assignee. Strictly secondary: every failure is logged and swallowed
    /// so the triggering mutation still reports success.
    async fn notify_assignment(&self, task: &TaskView) {
        let message = format!("You have been assigned to task: {}", task.title);
        match self
            .notifications
            .create(&task.assigned_to.id, &task.id, &message)
            .await
        {
            Ok(notification) => {
                self.fanout
                    .send_to_user(&task.assigned_to.id, "notification", json!(notification))
                    .await;
            }
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    assignee = %task.assigned_to.id,
                    err = %e,
                    "failed to create assignment notification"
                );
            }
        }
    }
}

// ─── Field validation ─────────────────────────────────────────────────────────

fn validate_title(raw: &str) -> Result<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(Error::validation("title is required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(Error::validation("title cannot exceed 100 characters"));
    }
    Ok(title.to_string())
}

fn validate_description(raw: &str) -> Result<String> {
    let description = raw.trim();
    if description.is_empty() {
        return Err(Error::validation("description is required"));
    }
    Ok(description.to_string())
}

fn parse_priority(raw: &str) -> Result<TaskPriority> {
    TaskPriority::parse(raw).ok_or_else(|| Error::validation(format!("unknown priority: {raw}")))
}

fn parse_status(raw: &str) -> Result<TaskStatus> {
    TaskStatus::parse(raw).ok_or_else(|| Error::validation(format!("unknown status: {raw}")))
}

/// Accepts RFC 3339 (`2026-03-01T09:00:00Z`) or a bare calendar date
/// (`2026-03-01`, read as midnight UTC).
fn parse_due_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date
            .and_time(NaiveTime::MIN)
            .and_utc());
    }
    Err(Error::validation("invalid due date"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_bounds() {
        assert!(validate_title("x").is_ok());
        assert!(validate_title("  ").is_err());
        let max = "x".repeat(100);
        assert!(validate_title(&max).is_ok());
        let too_long = "x".repeat(101);
        assert!(matches!(
            validate_title(&too_long),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_due_date_formats() {
        assert!(parse_due_date("2026-03-01").is_ok());
        assert!(parse_due_date("2026-03-01T09:30:00Z").is_ok());
        assert!(parse_due_date("2026-03-01T09:30:00+02:00").is_ok());
        assert!(parse_due_date("next tuesday").is_err());
        assert!(parse_due_date("").is_err());
    }

    #[test]
    fn test_bare_date_is_midnight_utc() {
        let dt = parse_due_date("2026-03-01").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_unknown_enum_literals_rejected() {
        assert!(parse_priority("Critical").is_err());
        assert!(parse_status("Done").is_err());
        assert!(parse_priority("Urgent").is_ok());
        assert!(parse_status("In Progress").is_ok());
    }
}
