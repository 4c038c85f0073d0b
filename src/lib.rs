pub mod config;
pub mod error;
pub mod ipc;
pub mod notifications;
pub mod storage;
pub mod tasks;
pub mod users;

use std::sync::Arc;

use config::DaemonConfig;
use ipc::event::EventFanout;
use notifications::NotificationStore;
use storage::Storage;
use tasks::TaskEngine;
use users::UserStore;

/// Shared application state passed to every RPC handler.
///
/// Built once by the composition root (`run_server` in main.rs); the fanout
/// and the stores are injected into the engine explicitly — nothing in the
/// process reaches for ambient global state.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    pub users: UserStore,
    pub notifications: NotificationStore,
    pub engine: TaskEngine,
    pub fanout: Arc<EventFanout>,
    /// HMAC secret for session tokens. Every connection must complete an
    /// `auth.session` handshake signed with this secret before any other
    /// method call.
    pub token_secret: String,
    pub started_at: std::time::Instant,
}
