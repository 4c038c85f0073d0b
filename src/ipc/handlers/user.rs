use crate::error::{Error, Result};
use crate::users::UserSummary;
use crate::AppContext;
use serde_json::{json, Value};

fn sv<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

pub async fn create(_actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let name =
        sv(&params, "name").ok_or_else(|| Error::validation("invalid params: missing name"))?;
    let email =
        sv(&params, "email").ok_or_else(|| Error::validation("invalid params: missing email"))?;
    let user = ctx.users.create(name, email).await?;
    Ok(json!({ "user": user }))
}

pub async fn list(_actor: &str, _params: Value, ctx: &AppContext) -> Result<Value> {
    let users: Vec<UserSummary> = ctx
        .users
        .list()
        .await?
        .into_iter()
        .map(UserSummary::from)
        .collect();
    Ok(json!({ "users": users }))
}

pub async fn get(_actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let user_id =
        sv(&params, "userId").ok_or_else(|| Error::validation("invalid params: missing userId"))?;
    let user = ctx
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| Error::not_found("user not found"))?;
    Ok(json!({ "user": user }))
}

/// Update the connection's own profile.
pub async fn update(actor: &str, params: Value, ctx: &AppContext) -> Result<Value> {
    let name = sv(&params, "name");
    let email = sv(&params, "email");
    let user = ctx
        .users
        .update(actor, name, email)
        .await?
        .ok_or_else(|| Error::not_found("user not found"))?;
    Ok(json!({ "user": user }))
}
