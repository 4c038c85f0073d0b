use crate::error::{Error, Result};
use crate::AppContext;
use serde_json::{json, Value};

// All notification reads and mutations are scoped to the connection's own
// identity — one user can never see or flip another user's notifications.

pub async fn list(actor: &str, _params: Value, ctx: &AppContext) -> Result<Value> {
    let notifications = ctx.notifications.find_by_user(actor).await?;
    Ok(json!({ "notifications": notifications }))
}

pub async fn unread(actor: &str, _params: Value, ctx: &AppContext) -> Result<Value> {
    let notifications = ctx.notifications.find_unread_by_user(actor).await?;
    Ok(json!({ "notifications": notifications }))
}

pub async fn mark_read(actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = params
        .get("notificationId")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("invalid params: missing notificationId"))?;
    let notification = ctx
        .notifications
        .mark_read(id, actor)
        .await?
        .ok_or_else(|| Error::not_found("notification not found"))?;
    Ok(json!({ "notification": notification }))
}

pub async fn mark_all_read(actor: &str, _params: Value, ctx: &AppContext) -> Result<Value> {
    let updated = ctx.notifications.mark_all_read(actor).await?;
    Ok(json!({ "updated": updated }))
}
