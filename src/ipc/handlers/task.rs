use crate::error::{Error, Result};
use crate::tasks::{NewTask, SortDirection, SortField, TaskListParams, TaskPatch, TaskPriority, TaskStatus};
use crate::AppContext;
use serde_json::{json, Value};

fn sv<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn require_task_id(params: &Value) -> Result<&str> {
    sv(params, "taskId").ok_or_else(|| Error::validation("invalid params: missing taskId"))
}

pub async fn create(actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let input: NewTask = serde_json::from_value(params)
        .map_err(|e| Error::validation(format!("invalid params: {e}")))?;
    let task = ctx.engine.create_task(actor, input).await?;
    Ok(json!({ "task": task }))
}

pub async fn update(actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let task_id = require_task_id(&params)?.to_string();
    let patch: TaskPatch = serde_json::from_value(params)
        .map_err(|e| Error::validation(format!("invalid params: {e}")))?;
    let task = ctx.engine.update_task(actor, &task_id, patch).await?;
    Ok(json!({ "task": task }))
}

pub async fn delete(actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let task_id = require_task_id(&params)?;
    ctx.engine.delete_task(actor, task_id).await?;
    Ok(json!({ "deleted": true }))
}

pub async fn get(_actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let task_id = require_task_id(&params)?;
    let task = ctx.engine.get_task(task_id).await?;
    Ok(json!({ "task": task }))
}

pub async fn list(_actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let mut query = TaskListParams::default();

    if let Some(s) = sv(&params, "status") {
        query.status =
            Some(TaskStatus::parse(s).ok_or_else(|| Error::validation(format!("unknown status: {s}")))?);
    }
    if let Some(p) = sv(&params, "priority") {
        query.priority = Some(
            TaskPriority::parse(p)
                .ok_or_else(|| Error::validation(format!("unknown priority: {p}")))?,
        );
    }
    if let Some(f) = sv(&params, "sortBy") {
        query.sort_by =
            SortField::parse(f).ok_or_else(|| Error::validation(format!("unknown sort field: {f}")))?;
    }
    if let Some(d) = sv(&params, "direction") {
        query.direction = SortDirection::parse(d)
            .ok_or_else(|| Error::validation(format!("unknown sort direction: {d}")))?;
    }

    let tasks = ctx.engine.list_tasks(&query).await?;
    Ok(json!({ "tasks": tasks }))
}

pub async fn list_by_assignee(_actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let user_id =
        sv(&params, "userId").ok_or_else(|| Error::validation("invalid params: missing userId"))?;
    let tasks = ctx.engine.list_by_assignee(user_id).await?;
    Ok(json!({ "tasks": tasks }))
}

pub async fn list_by_creator(_actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let user_id =
        sv(&params, "userId").ok_or_else(|| Error::validation("invalid params: missing userId"))?;
    let tasks = ctx.engine.list_by_creator(user_id).await?;
    Ok(json!({ "tasks": tasks }))
}

pub async fn overdue(_actor: &str, _params: Value, ctx: &AppContext) -> Result<Value> {
    let tasks = ctx.engine.list_overdue().await?;
    Ok(json!({ "tasks": tasks }))
}
