/// Integration tests for the taskd JSON-RPC server.
/// Spins up a real daemon on a free port and drives it over WebSocket.
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use taskd::{
    config::DaemonConfig,
    ipc::{event::EventFanout, token},
    notifications::NotificationStore,
    storage::Storage,
    tasks::{TaskEngine, TaskStore},
    users::UserStore,
    AppContext,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a daemon on a random port and return the WebSocket URL.
async fn start_test_daemon() -> (String, Arc<AppContext>) {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let port = get_free_port();

    let config = Arc::new(DaemonConfig::new(
        Some(port),
        Some(data_dir.clone()),
        Some("warn".to_string()),
        None,
    ));
    let storage = Arc::new(Storage::new(&data_dir).await.unwrap());
    let token_secret = token::get_or_create_secret(&data_dir).unwrap();

    let users = UserStore::new(storage.pool());
    let notifications = NotificationStore::new(storage.pool());
    let fanout = Arc::new(EventFanout::new());
    let engine = TaskEngine::new(
        TaskStore::new(storage.pool()),
        users.clone(),
        notifications.clone(),
        fanout.clone(),
    );

    let ctx = Arc::new(AppContext {
        config,
        storage,
        users,
        notifications,
        engine,
        fanout,
        token_secret,
        started_at: std::time::Instant::now(),
    });

    let ctx_server = ctx.clone();
    tokio::spawn(async move {
        taskd::ipc::run(ctx_server).await.ok();
    });

    // Give server a moment to bind
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let url = format!("ws://127.0.0.1:{}", ctx.config.port);
    (url, ctx)
}

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Connect and complete the auth handshake for `user_id`.
async fn connect_as(url: &str, ctx: &AppContext, user_id: &str) -> Ws {
    let minted = token::sign(user_id, &ctx.token_secret, 1).unwrap();
    let (mut ws, _) = connect_async(url).await.expect("ws connect failed");
    ws.send(Message::Text(
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "auth.session",
            "params": { "token": minted }
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let resp = next_text(&mut ws).await;
    assert_eq!(resp["result"]["authenticated"], true, "handshake failed: {resp}");
    ws
}

async fn next_text(ws: &mut Ws) -> Value {
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Send one RPC call and read frames until its response arrives
/// (pushed event notifications are skipped).
async fn rpc(ws: &mut Ws, method: &str, params: Value) -> Value {
    rpc_collect(ws, method, params).await.0
}

/// Like [`rpc`], but also returns any pushed events that arrived while
/// waiting for the response — the server may interleave them freely.
async fn rpc_collect(ws: &mut Ws, method: &str, params: Value) -> (Value, Vec<Value>) {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params
    });
    ws.send(Message::Text(serde_json::to_string(&request).unwrap()))
        .await
        .unwrap();

    let mut events = Vec::new();
    loop {
        let v = next_text(ws).await;
        if v.get("id").is_some() {
            return (v, events);
        }
        events.push(v);
    }
}

/// Read the next pushed event notification (frames with an `id` are skipped).
async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let v = next_text(ws).await;
        if v.get("id").is_none() {
            return v;
        }
    }
}

/// Assert no event arrives within a short window.
async fn assert_no_event(ws: &mut Ws) {
    let quiet =
        tokio::time::timeout(std::time::Duration::from_millis(200), next_event(ws)).await;
    assert!(quiet.is_err(), "unexpected event: {:?}", quiet.ok());
}

async fn seed_two_users(ctx: &AppContext) -> (String, String) {
    let u1 = ctx.users.create("Alice", "alice@example.com").await.unwrap();
    let u2 = ctx.users.create("Bob", "bob@example.com").await.unwrap();
    (u1.id, u2.id)
}

fn tomorrow() -> String {
    (chrono::Utc::now() + chrono::Duration::days(1)).to_rfc3339()
}

// ─── Auth ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_with_invalid_token_is_rejected() {
    let (url, _ctx) = start_test_daemon().await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(Message::Text(
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "auth.session",
            "params": { "token": "forged" }
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let resp = next_text(&mut ws).await;
    assert_eq!(resp["error"]["code"], -32004);

    // The server closes the connection — no retry.
    loop {
        match ws.next().await {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
}

#[tokio::test]
async fn test_first_message_must_be_auth() {
    let (url, _ctx) = start_test_daemon().await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(Message::Text(
        json!({"jsonrpc": "2.0", "id": 1, "method": "daemon.ping", "params": {}}).to_string(),
    ))
    .await
    .unwrap();

    let resp = next_text(&mut ws).await;
    assert_eq!(resp["error"]["code"], -32004);
}

#[tokio::test]
async fn test_token_for_unknown_identity_is_rejected() {
    let (url, ctx) = start_test_daemon().await;
    let minted = token::sign("ghost-user", &ctx.token_secret, 1).unwrap();
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(Message::Text(
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "auth.session",
            "params": { "token": minted }
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let resp = next_text(&mut ws).await;
    assert_eq!(resp["error"]["code"], -32004);
}

// ─── Basic RPC ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ping_and_status() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, _) = seed_two_users(&ctx).await;
    let mut ws = connect_as(&url, &ctx, &u1).await;

    let resp = rpc(&mut ws, "daemon.ping", json!({})).await;
    assert_eq!(resp["result"]["pong"], true);

    let resp = rpc(&mut ws, "daemon.status", json!({})).await;
    assert!(resp["result"]["version"].is_string());
    assert_eq!(resp["result"]["connectedSessions"], 1);
    assert_eq!(resp["result"]["dbOk"], true);
}

#[tokio::test]
async fn test_method_not_found() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, _) = seed_two_users(&ctx).await;
    let mut ws = connect_as(&url, &ctx, &u1).await;

    let resp = rpc(&mut ws, "no.such.method", json!({})).await;
    assert_eq!(resp["error"]["code"], -32601);
}

// ─── Task lifecycle over the wire ────────────────────────────────────────────

#[tokio::test]
async fn test_create_broadcasts_and_targets_notification() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, u2) = seed_two_users(&ctx).await;
    let mut s1 = connect_as(&url, &ctx, &u1).await;
    let mut s2 = connect_as(&url, &ctx, &u2).await;

    let (resp, mut s1_events) = rpc_collect(
        &mut s1,
        "task.create",
        json!({
            "title": "Ship release",
            "description": "tag and push",
            "dueDate": tomorrow(),
            "priority": "Urgent",
            "assignedToId": u2
        }),
    )
    .await;
    let task = &resp["result"]["task"];
    assert_eq!(task["status"], "To Do");
    assert_eq!(task["priority"], "Urgent");
    assert_eq!(task["creator"]["id"], Value::String(u1.clone()));
    assert_eq!(task["assignedTo"]["id"], Value::String(u2.clone()));

    // The assignee's session sees the targeted notification and the broadcast.
    let mut methods = vec![
        next_event(&mut s2).await["method"].as_str().unwrap().to_string(),
        next_event(&mut s2).await["method"].as_str().unwrap().to_string(),
    ];
    methods.sort();
    assert_eq!(methods, vec!["notification", "task:created"]);

    // The creator's session sees only the broadcast.
    if s1_events.is_empty() {
        s1_events.push(next_event(&mut s1).await);
    }
    assert_eq!(s1_events.len(), 1);
    assert_eq!(s1_events[0]["method"], "task:created");
    assert_no_event(&mut s1).await;

    // The notification record is durable and unread.
    let unread = rpc(&mut s2, "notification.unread", json!({})).await;
    let list = unread["result"]["notifications"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["read"], false);
    assert!(list[0]["message"]
        .as_str()
        .unwrap()
        .contains("Ship release"));
}

#[tokio::test]
async fn test_status_update_broadcasts_without_notification() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, u2) = seed_two_users(&ctx).await;
    let mut s1 = connect_as(&url, &ctx, &u1).await;

    let (created, mut events) = rpc_collect(
        &mut s1,
        "task.create",
        json!({
            "title": "Ship release",
            "description": "tag and push",
            "dueDate": tomorrow(),
            "priority": "Urgent",
            "assignedToId": u2
        }),
    )
    .await;
    let task_id = created["result"]["task"]["id"].as_str().unwrap().to_string();
    // Drain the create broadcast before updating.
    while events.iter().all(|e| e["method"] != "task:created") {
        events.push(next_event(&mut s1).await);
    }

    let (updated, more) = rpc_collect(
        &mut s1,
        "task.update",
        json!({ "taskId": task_id, "status": "Completed" }),
    )
    .await;
    assert_eq!(updated["result"]["task"]["status"], "Completed");
    events.extend(more);
    while events.iter().all(|e| e["method"] != "task:updated") {
        events.push(next_event(&mut s1).await);
    }

    // No second notification for the unchanged assignee.
    let notifications = rpc(&mut s1, "notification.list", json!({})).await;
    assert!(notifications["result"]["notifications"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_error_codes_over_the_wire() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, u2) = seed_two_users(&ctx).await;
    let mut s1 = connect_as(&url, &ctx, &u1).await;
    let mut s2 = connect_as(&url, &ctx, &u2).await;

    // Validation: past due date on create.
    let resp = rpc(
        &mut s1,
        "task.create",
        json!({
            "title": "late",
            "description": "d",
            "dueDate": "2020-01-01",
            "priority": "Low",
            "assignedToId": u2
        }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32020);
    assert_eq!(resp["error"]["message"], "due date must be in the future");

    // NotFound: unknown task.
    let resp = rpc(&mut s1, "task.update", json!({ "taskId": "nope", "title": "x" })).await;
    assert_eq!(resp["error"]["code"], -32021);

    // Forbidden: non-creator delete.
    let created = rpc(
        &mut s1,
        "task.create",
        json!({
            "title": "keep",
            "description": "d",
            "dueDate": tomorrow(),
            "priority": "Low",
            "assignedToId": u2
        }),
    )
    .await;
    let task_id = created["result"]["task"]["id"].as_str().unwrap();
    let resp = rpc(&mut s2, "task.delete", json!({ "taskId": task_id })).await;
    assert_eq!(resp["error"]["code"], -32022);
    assert_eq!(
        resp["error"]["message"],
        "only the creator can delete this task"
    );
    // Task is still retrievable afterwards.
    let resp = rpc(&mut s2, "task.get", json!({ "taskId": task_id })).await;
    assert_eq!(resp["result"]["task"]["id"], Value::String(task_id.to_string()));

    // Conflict: duplicate email.
    let resp = rpc(
        &mut s1,
        "user.create",
        json!({ "name": "Dupe", "email": "alice@example.com" }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32023);
}

#[tokio::test]
async fn test_notification_mark_read_flow() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, u2) = seed_two_users(&ctx).await;
    let mut s1 = connect_as(&url, &ctx, &u1).await;
    let mut s2 = connect_as(&url, &ctx, &u2).await;

    rpc(
        &mut s1,
        "task.create",
        json!({
            "title": "read me",
            "description": "d",
            "dueDate": tomorrow(),
            "priority": "Medium",
            "assignedToId": u2
        }),
    )
    .await;

    let unread = rpc(&mut s2, "notification.unread", json!({})).await;
    let id = unread["result"]["notifications"][0]["id"].as_str().unwrap().to_string();

    // Another user cannot mark it read.
    let resp = rpc(&mut s1, "notification.markRead", json!({ "notificationId": id })).await;
    assert_eq!(resp["error"]["code"], -32021);

    let resp = rpc(&mut s2, "notification.markRead", json!({ "notificationId": id })).await;
    assert_eq!(resp["result"]["notification"]["read"], true);

    let unread = rpc(&mut s2, "notification.unread", json!({})).await;
    assert!(unread["result"]["notifications"].as_array().unwrap().is_empty());
    // The record itself is never deleted.
    let all = rpc(&mut s2, "notification.list", json!({})).await;
    assert_eq!(all["result"]["notifications"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_overdue_and_list_over_the_wire() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, u2) = seed_two_users(&ctx).await;
    let mut s1 = connect_as(&url, &ctx, &u1).await;

    let created = rpc(
        &mut s1,
        "task.create",
        json!({
            "title": "slipping",
            "description": "d",
            "dueDate": tomorrow(),
            "priority": "High",
            "assignedToId": u2
        }),
    )
    .await;
    let task_id = created["result"]["task"]["id"].as_str().unwrap().to_string();

    // Backdate via update (allowed) and move to In Progress.
    let yesterday = (chrono::Utc::now() - chrono::Duration::days(1)).to_rfc3339();
    rpc(
        &mut s1,
        "task.update",
        json!({ "taskId": task_id, "dueDate": yesterday, "status": "In Progress" }),
    )
    .await;

    let overdue = rpc(&mut s1, "task.overdue", json!({})).await;
    let tasks = overdue["result"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["id"], Value::String(task_id.clone()));

    let filtered = rpc(&mut s1, "task.list", json!({ "status": "In Progress" })).await;
    assert_eq!(filtered["result"]["tasks"].as_array().unwrap().len(), 1);

    let none = rpc(&mut s1, "task.list", json!({ "status": "Completed" })).await;
    assert!(none["result"]["tasks"].as_array().unwrap().is_empty());

    let bad_sort = rpc(&mut s1, "task.list", json!({ "sortBy": "creator" })).await;
    assert_eq!(bad_sort["error"]["code"], -32020);
}

#[tokio::test]
async fn test_multi_device_targeted_delivery() {
    let (url, ctx) = start_test_daemon().await;
    let (u1, u2) = seed_two_users(&ctx).await;
    let mut s1 = connect_as(&url, &ctx, &u1).await;
    // Two concurrent sessions for the same identity (two devices/tabs).
    let mut s2a = connect_as(&url, &ctx, &u2).await;
    let mut s2b = connect_as(&url, &ctx, &u2).await;

    rpc(
        &mut s1,
        "task.create",
        json!({
            "title": "everywhere",
            "description": "d",
            "dueDate": tomorrow(),
            "priority": "Low",
            "assignedToId": u2
        }),
    )
    .await;

    for ws in [&mut s2a, &mut s2b] {
        let mut methods = vec![
            next_event(ws).await["method"].as_str().unwrap().to_string(),
            next_event(ws).await["method"].as_str().unwrap().to_string(),
        ];
        methods.sort();
        assert_eq!(methods, vec!["notification", "task:created"]);
    }
}

#[tokio::test]
async fn test_health_endpoint_on_shared_port() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (url, _ctx) = start_test_daemon().await;
    let addr = url.trim_start_matches("ws://").to_string();

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("\"status\":\"ok\""));
}
