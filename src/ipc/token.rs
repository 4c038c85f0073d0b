// ipc/token.rs — signed session tokens for WebSocket connect.
//
// Tokens are HMAC-SHA256 signed strings minted with the daemon's secret:
//   "{user_id}:{expires_at_unix}:{hmac_hex}"
//
// The expiry is a unix timestamp so the payload stays free of ':'-bearing
// fields. Verification checks the signature first, then the expiry; a
// session that fails either is rejected at connect time with no retry.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Mint a token for `user_id` valid for `ttl_days`.
pub fn sign(user_id: &str, secret: &str, ttl_days: u32) -> Result<String> {
    if user_id.is_empty() || user_id.contains(':') {
        return Err(anyhow!("invalid user id for token payload"));
    }
    let expires_at = (Utc::now() + Duration::days(i64::from(ttl_days))).timestamp();
    let payload = format!("{user_id}:{expires_at}");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(payload.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());

    Ok(format!("{payload}:{sig}"))
}

/// Verify signature and expiry. Errors are deliberately uniform — callers
/// report "invalid token" without distinguishing the failure mode.
pub fn verify(raw: &str, secret: &str) -> Result<SessionToken> {
    let parts: Vec<&str> = raw.splitn(3, ':').collect();
    if parts.len() != 3 {
        return Err(anyhow!("malformed session token"));
    }
    let (user_id, expires_str, sig_hex) = (parts[0], parts[1], parts[2]);

    let payload = format!("{user_id}:{expires_str}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(payload.as_bytes());
    let expected = mac.finalize().into_bytes();

    let sig_bytes = hex::decode(sig_hex).map_err(|_| anyhow!("invalid token signature hex"))?;
    if expected.as_slice() != sig_bytes.as_slice() {
        return Err(anyhow!("session token signature invalid"));
    }

    let expires_unix: i64 = expires_str
        .parse()
        .map_err(|_| anyhow!("invalid token expiry"))?;
    let expires_at = DateTime::<Utc>::from_timestamp(expires_unix, 0)
        .ok_or_else(|| anyhow!("invalid token expiry"))?;
    if expires_at <= Utc::now() {
        return Err(anyhow!("session token expired"));
    }

    Ok(SessionToken {
        user_id: user_id.to_string(),
        expires_at,
    })
}

/// Return the token-signing secret for this daemon instance.
///
/// On first call, generates a random 64-character hex secret and writes it
/// to `{data_dir}/token_secret` with user-only read/write permissions
/// (mode 0600 on Unix). On subsequent calls, reads and returns the existing
/// secret.
///
/// The secret file must be kept private — anyone holding it can mint a
/// session token for any identity.
pub fn get_or_create_secret(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("token_secret");

    if path.exists() {
        let secret = std::fs::read_to_string(&path)?.trim().to_string();
        if !secret.is_empty() {
            return Ok(secret);
        }
    }

    let secret = format!(
        "{}{}",
        Uuid::new_v4().to_string().replace('-', ""),
        Uuid::new_v4().to_string().replace('-', "")
    );

    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, &secret)?;

    // Restrict to owner read/write only on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(secret)
}
