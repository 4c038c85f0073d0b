pub mod event;
pub mod handlers;
pub mod token;

use crate::error::Error;
use crate::AppContext;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

// ─── Error codes ─────────────────────────────────────────────────────────────
//
// Standard JSON-RPC codes plus a -3202x block for the engine's typed errors.
// Clients map these onto their own error surface.

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;
const UNAUTHORIZED: i32 = -32004;
/// Out-of-policy input (past due date on create, title too long, bad enum).
pub const VALIDATION_ERROR: i32 = -32020;
/// Referenced task/notification/user does not exist.
pub const NOT_FOUND: i32 = -32021;
/// Actor is not permitted (non-creator delete).
pub const FORBIDDEN: i32 = -32022;
/// Uniqueness violation (duplicate email).
pub const CONFLICT: i32 = -32023;

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "server listening (WebSocket + HTTP health on same port)");

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    // Pinned so we can use it in the select! loop without moving.
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("server stopped");
    Ok(())
}

/// Respond to an HTTP `GET /health` request with a JSON status document.
///
/// The daemon shares one port for both WebSocket (JSON-RPC) and a plain
/// HTTP health endpoint so clients can check liveness without a WS library.
async fn handle_health_check(mut stream: tokio::net::TcpStream, ctx: &AppContext) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Consume the request (we don't inspect it — any GET /health is fine).
    let mut req_buf = vec![0u8; 2048];
    let _ = stream.read(&mut req_buf).await;

    let uptime_secs = ctx.started_at.elapsed().as_secs();
    let connected = ctx.fanout.connected_sessions().await;
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": uptime_secs,
        "connectedSessions": connected,
        "port": ctx.config.port,
    });
    let body_str = body.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body_str.len(),
        body_str
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    // Peek at the first bytes to distinguish HTTP health checks from WebSocket
    // upgrades — both share the same port. All other GET requests (including
    // WS upgrades) fall through to the handshake as normal.
    let mut peek_buf = [0u8; 12];
    let n = stream.peek(&mut peek_buf).await.unwrap_or(0);
    if n >= 11 && &peek_buf[..11] == b"GET /health" {
        return handle_health_check(stream, &ctx).await;
    }

    let ws = accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    // ── Auth handshake ───────────────────────────────────────────────────────
    // The first message from every client must be an `auth.session` RPC call
    // carrying a signed token. The identity it resolves to is fixed for the
    // life of the connection; a failed handshake closes the connection with
    // no retry.
    let first = tokio::time::timeout(std::time::Duration::from_secs(10), stream.next()).await;

    let text = match first {
        Ok(Some(Ok(Message::Text(t)))) => t,
        // Timeout, connection closed, or non-text frame — reject silently.
        _ => return Ok(()),
    };

    let req: RpcRequest = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(_) => {
            let _ = sink
                .send(Message::Text(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    "Parse error",
                )))
                .await;
            return Ok(());
        }
    };

    let id = req.id.clone().unwrap_or(Value::Null);

    if req.method != "auth.session" {
        let _ = sink
            .send(Message::Text(error_response(
                id,
                UNAUTHORIZED,
                "Unauthorized — send auth.session first",
            )))
            .await;
        return Ok(());
    }

    let provided = req
        .params
        .as_ref()
        .and_then(|p| p.get("token"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let user_id = match token::verify(provided, &ctx.token_secret) {
        Ok(session) => session.user_id,
        Err(e) => {
            debug!(err = %e, "session token rejected");
            let _ = sink
                .send(Message::Text(error_response(
                    id,
                    UNAUTHORIZED,
                    "Unauthorized — invalid token",
                )))
                .await;
            return Ok(());
        }
    };

    // The token must resolve to a known identity in the directory.
    if ctx.users.find_by_id(&user_id).await.ok().flatten().is_none() {
        let _ = sink
            .send(Message::Text(error_response(
                id,
                UNAUTHORIZED,
                "Unauthorized — unknown identity",
            )))
            .await;
        return Ok(());
    }

    let resp = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "authenticated": true, "userId": user_id }
    });
    let _ = sink.send(Message::Text(resp.to_string())).await;

    let mut session = ctx.fanout.register_session(&user_id).await;
    info!(user = %user_id, session = %session.id, "session authenticated");

    loop {
        tokio::select! {
            // Incoming message from client
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = dispatch_text(&text, &user_id, &ctx).await;
                        if let Err(e) = sink.send(Message::Text(response)).await {
                            warn!(err = %e, "send error");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(err = %e, "ws error");
                        break;
                    }
                    _ => {}
                }
            }
            // Targeted event for this session's identity
            event = session.targeted.recv() => {
                match event {
                    Some(json) => {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            warn!(err = %e, "targeted send error");
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Broadcast event for everyone
            event = session.broadcasts.recv() => {
                match event {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            warn!(err = %e, "broadcast send error");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "broadcast lagged");
                    }
                }
            }
        }
    }

    ctx.fanout.unregister_session(&user_id, session.id).await;
    debug!(user = %user_id, "session closed");
    Ok(())
}

pub(crate) async fn dispatch_text(text: &str, actor: &str, ctx: &AppContext) -> String {
    // Parse
    let req: RpcRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => {
            return error_response(Value::Null, PARSE_ERROR, "Parse error");
        }
    };

    // Validate jsonrpc field
    if req.jsonrpc != "2.0" {
        return error_response(
            req.id.unwrap_or(Value::Null),
            INVALID_REQUEST,
            "Invalid Request",
        );
    }

    let id = req.id.unwrap_or(Value::Null);
    let params = req.params.unwrap_or(Value::Null);

    debug!(method = %req.method, actor = %actor, "rpc dispatch");

    match dispatch(&req.method, actor, params, ctx).await {
        Ok(value) => {
            let resp = RpcResponse {
                jsonrpc: "2.0",
                id,
                result: Some(value),
                error: None,
            };
            serde_json::to_string(&resp).unwrap_or_default()
        }
        Err(e) => {
            let (code, msg) = classify_error(e);
            error_response(id, code, &msg)
        }
    }
}

async fn dispatch(
    method: &str,
    actor: &str,
    params: Value,
    ctx: &AppContext,
) -> crate::error::Result<Value> {
    match method {
        "daemon.ping" => handlers::daemon::ping(params, ctx).await,
        "daemon.status" => handlers::daemon::status(params, ctx).await,
        "task.create" => handlers::task::create(actor, params, ctx).await,
        "task.update" => handlers::task::update(actor, params, ctx).await,
        "task.delete" => handlers::task::delete(actor, params, ctx).await,
        "task.get" => handlers::task::get(actor, params, ctx).await,
        "task.list" => handlers::task::list(actor, params, ctx).await,
        "task.listByAssignee" => handlers::task::list_by_assignee(actor, params, ctx).await,
        "task.listByCreator" => handlers::task::list_by_creator(actor, params, ctx).await,
        "task.overdue" => handlers::task::overdue(actor, params, ctx).await,
        "notification.list" => handlers::notification::list(actor, params, ctx).await,
        "notification.unread" => handlers::notification::unread(actor, params, ctx).await,
        "notification.markRead" => handlers::notification::mark_read(actor, params, ctx).await,
        "notification.markAllRead" => {
            handlers::notification::mark_all_read(actor, params, ctx).await
        }
        "user.create" => handlers::user::create(actor, params, ctx).await,
        "user.list" => handlers::user::list(actor, params, ctx).await,
        "user.get" => handlers::user::get(actor, params, ctx).await,
        "user.update" => handlers::user::update(actor, params, ctx).await,
        _ => Err(Error::not_found(format!("METHOD_NOT_FOUND:{method}"))),
    }
}

fn classify_error(e: Error) -> (i32, String) {
    match e {
        Error::NotFound(msg) if msg.starts_with("METHOD_NOT_FOUND:") => {
            (METHOD_NOT_FOUND, "Method not found".to_string())
        }
        Error::Validation(msg) if msg.starts_with("invalid params") => (INVALID_PARAMS, msg),
        Error::Validation(msg) => (VALIDATION_ERROR, msg),
        Error::NotFound(msg) => (NOT_FOUND, msg),
        Error::Authorization(msg) => (FORBIDDEN, msg),
        Error::Conflict(msg) => (CONFLICT, msg),
        Error::Database(e) => {
            error!(err = %e, "database error");
            (INTERNAL_ERROR, "Internal error".to_string())
        }
        Error::Internal(e) => {
            error!(err = %e, "internal error");
            (INTERNAL_ERROR, "Internal error".to_string())
        }
    }
}

fn error_response(id: Value, code: i32, message: &str) -> String {
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
        }),
    };
    serde_json::to_string(&resp).unwrap_or_default()
}
