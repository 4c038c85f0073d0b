//! Identity directory — resolves user identifiers to profile records.
//!
//! Leaf dependency of the lifecycle engine: authorization checks and the
//! read-boundary identity join both go through this store. Credential
//! material (passwords, sessions) lives outside this daemon entirely.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::now_rfc3339;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The identity data resolved onto tasks at the read boundary (name + email,
/// nothing more).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<UserRow> for UserSummary {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
        }
    }
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user. Emails are unique across the directory.
    pub async fn create(&self, name: &str, email: &str) -> Result<UserRow> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(Error::validation("name is required"));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(Error::validation("a valid email is required"));
        }
        if self.email_exists(email).await? {
            return Err(Error::conflict("email already registered"));
        }

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, name, email, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(email)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            // UNIQUE constraint backstop for concurrent creates racing the
            // email_exists check above.
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => {
                Error::conflict("email already registered")
            }
            _ => Error::from(e),
        })?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("user not found after insert")))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn list(&self) -> Result<Vec<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users ORDER BY name")
            .fetch_all(&self.pool)
            .await?)
    }

    /// Partial profile update. A new email must not belong to another user.
    pub async fn update(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserRow>> {
        let current = match self.find_by_id(id).await? {
            Some(u) => u,
            None => return Ok(None),
        };

        if let Some(email) = email {
            if email.trim().is_empty() || !email.contains('@') {
                return Err(Error::validation("a valid email is required"));
            }
            if email != current.email && self.email_exists(email).await? {
                return Err(Error::conflict("email already in use"));
            }
        }
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(Error::validation("name is required"));
            }
        }

        let now = now_rfc3339();
        sqlx::query(
            "UPDATE users SET name = COALESCE(?, name), email = COALESCE(?, email), updated_at = ?
             WHERE id = ?",
        )
        .bind(name.map(str::trim))
        .bind(email.map(str::trim))
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await
    }
}
