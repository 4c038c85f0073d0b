use crate::error::Result;
use crate::AppContext;
use serde_json::{json, Value};

pub async fn ping(_params: Value, _ctx: &AppContext) -> Result<Value> {
    Ok(json!({ "pong": true }))
}

pub async fn status(_params: Value, ctx: &AppContext) -> Result<Value> {
    let uptime = ctx.started_at.elapsed().as_secs();
    let connected = ctx.fanout.connected_sessions().await;
    let db_ok = ctx.storage.ping().await;
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": uptime,
        "connectedSessions": connected,
        "port": ctx.config.port,
        "dbOk": db_ok
    }))
}
