use thiserror::Error;

/// Typed errors surfaced by the lifecycle engine and the stores.
///
/// The IPC layer maps these to JSON-RPC error codes; the engine never maps
/// them itself. Secondary-effect failures (notification persistence, event
/// publish) are logged and swallowed at the call site and never travel
/// through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-policy input (past due date on create, title too
    /// long, unknown enum literal). Never retried automatically.
    #[error("{0}")]
    Validation(String),

    /// Referenced task/notification/user does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Actor is not permitted to perform the operation. Raised before any
    /// mutation happens.
    #[error("{0}")]
    Authorization(String),

    /// Uniqueness violation, e.g. duplicate email in the identity directory.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
