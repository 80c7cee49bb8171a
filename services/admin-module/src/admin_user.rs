//! Admin-user registry: bcrypt-backed auth with lockout, password history
//! and CRUD (spec §4.3 "Admin-user auth").

use artstore_jwt::{KeyManager, UnifiedClaims};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AdminError;
use crate::password;

const ACCESS_TOKEN_TTL: Duration = Duration::minutes(15);
const MAX_PASSWORD_HISTORY: usize = 5;

/// Row shape returned to API callers (no password material).
#[derive(Debug, Serialize)]
pub struct AdminUserView {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub is_system: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

struct AdminUserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    #[allow(dead_code)]
    password_history: Value,
    role: String,
    is_system: bool,
    failed_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
}

/// Successful login result: a short-lived access token plus the view row.
#[derive(Debug, Serialize)]
pub struct LoginResult {
    pub access_token: String,
    pub user: AdminUserView,
}

/// Create a new admin user, hashing `password` with bcrypt.
pub async fn create(
    pool: &PgPool,
    username: &str,
    password_plain: &str,
    role: &str,
    is_system: bool,
) -> Result<AdminUserView, AdminError> {
    if password::validate(password_plain, is_system).is_err() {
        return Err(AdminError::Validation("password does not meet policy".into()));
    }
    let hash = bcrypt::hash(password_plain, bcrypt::DEFAULT_COST)?;
    let id = Uuid::new_v4();

    let row = sqlx::query_as::<_, (Uuid, String, String, bool, Option<DateTime<Utc>>, Option<DateTime<Utc>>, DateTime<Utc>)>(
        "INSERT INTO admin_users (id, username, password_hash, role, is_system)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, username, role, is_system, locked_until, last_login_at, created_at",
    )
    .bind(id)
    .bind(username)
    .bind(&hash)
    .bind(role)
    .bind(is_system)
    .fetch_one(pool)
    .await?;

    Ok(AdminUserView {
        id: row.0,
        username: row.1,
        role: row.2,
        is_system: row.3,
        locked_until: row.4,
        last_login_at: row.5,
        created_at: row.6,
    })
}

async fn fetch_by_username(pool: &PgPool, username: &str) -> Result<AdminUserRow, AdminError> {
    let row = sqlx::query_as::<_, (Uuid, String, String, Value, String, bool, i32, Option<DateTime<Utc>>)>(
        "SELECT id, username, password_hash, password_history, role, is_system, failed_attempts, locked_until
         FROM admin_users WHERE username = $1",
    )
    .bind(username)
    .fetch_one(pool)
    .await?;

    Ok(AdminUserRow {
        id: row.0,
        username: row.1,
        password_hash: row.2,
        password_history: row.3,
        role: row.4,
        is_system: row.5,
        failed_attempts: row.6,
        locked_until: row.7,
    })
}

/// Authenticate `username`/`password_plain`. Lockout is checked before the
/// password is compared, so a locked account never reveals whether the
/// supplied password was correct.
pub async fn authenticate(
    pool: &PgPool,
    jwt: &KeyManager,
    username: &str,
    password_plain: &str,
    lockout_threshold: u32,
    lockout_minutes: i64,
) -> Result<LoginResult, AdminError> {
    let row = fetch_by_username(pool, username)
        .await
        .map_err(|_| AdminError::Unauthorized("invalid credentials".into()))?;

    if let Some(until) = row.locked_until {
        if until > Utc::now() {
            return Err(AdminError::Forbidden(format!("account locked until {until}")));
        }
    }

    let verified = bcrypt::verify(password_plain, &row.password_hash)?;
    if !verified {
        record_failure(pool, row.id, row.failed_attempts, lockout_threshold, lockout_minutes).await?;
        return Err(AdminError::Unauthorized("invalid credentials".into()));
    }

    sqlx::query(
        "UPDATE admin_users SET failed_attempts = 0, locked_until = NULL, last_login_at = now() WHERE id = $1",
    )
    .bind(row.id)
    .execute(pool)
    .await?;

    let now = Utc::now();
    let claims = UnifiedClaims {
        sub: row.id.to_string(),
        token_type_raw: "admin_user".into(),
        role: row.role.clone(),
        name: row.username.clone(),
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: (now + ACCESS_TOKEN_TTL).timestamp(),
        nbf: now.timestamp(),
        client_id: None,
        rate_limit: None,
    };
    let access_token = jwt
        .sign(&claims)
        .await
        .map_err(|e| AdminError::Invariant(e.to_string()))?;

    Ok(LoginResult {
        access_token,
        user: AdminUserView {
            id: row.id,
            username: row.username,
            role: row.role,
            is_system: row.is_system,
            locked_until: None,
            last_login_at: Some(now),
            created_at: now,
        },
    })
}

async fn record_failure(
    pool: &PgPool,
    id: Uuid,
    current_attempts: i32,
    lockout_threshold: u32,
    lockout_minutes: i64,
) -> Result<(), AdminError> {
    let attempts = current_attempts + 1;
    if attempts as u32 >= lockout_threshold {
        let locked_until = Utc::now() + Duration::minutes(lockout_minutes);
        sqlx::query("UPDATE admin_users SET failed_attempts = $1, locked_until = $2 WHERE id = $3")
            .bind(attempts)
            .bind(locked_until)
            .bind(id)
            .execute(pool)
            .await?;
    } else {
        sqlx::query("UPDATE admin_users SET failed_attempts = $1 WHERE id = $2")
            .bind(attempts)
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Change `user_id`'s password, rejecting it if it matches one of the last
/// [`MAX_PASSWORD_HISTORY`] hashes, then pushing the old hash into history.
pub async fn change_password(pool: &PgPool, user_id: Uuid, new_password: &str) -> Result<(), AdminError> {
    let row = sqlx::query_as::<_, (String, Value, bool)>(
        "SELECT password_hash, password_history, is_system FROM admin_users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let (current_hash, history_json, is_system) = row;
    if password::validate(new_password, is_system).is_err() {
        return Err(AdminError::Validation("password does not meet policy".into()));
    }

    let mut history: Vec<String> = serde_json::from_value(history_json).unwrap_or_default();
    let mut all_hashes = history.clone();
    all_hashes.push(current_hash.clone());
    if password::matches_history(new_password, &all_hashes) {
        return Err(AdminError::Validation("password was used recently".into()));
    }

    history.insert(0, current_hash);
    history.truncate(MAX_PASSWORD_HISTORY);

    let new_hash = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;
    sqlx::query("UPDATE admin_users SET password_hash = $1, password_history = $2 WHERE id = $3")
        .bind(&new_hash)
        .bind(serde_json::to_value(&history).unwrap_or_default())
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Admin-triggered reset: generate a new policy-compliant password and
/// apply it, returning the plaintext exactly once.
pub async fn reset_password(pool: &PgPool, user_id: Uuid, is_system: bool) -> Result<String, AdminError> {
    let new_password = password::generate(is_system);
    change_password(pool, user_id, &new_password).await?;
    Ok(new_password)
}

/// List all admin users (no password material).
pub async fn list(pool: &PgPool) -> Result<Vec<AdminUserView>, AdminError> {
    let rows = sqlx::query_as::<_, (Uuid, String, String, bool, Option<DateTime<Utc>>, Option<DateTime<Utc>>, DateTime<Utc>)>(
        "SELECT id, username, role, is_system, locked_until, last_login_at, created_at FROM admin_users ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| AdminUserView {
            id: r.0,
            username: r.1,
            role: r.2,
            is_system: r.3,
            locked_until: r.4,
            last_login_at: r.5,
            created_at: r.6,
        })
        .collect())
}

/// Delete an admin user. `is_system` accounts cannot be deleted.
pub async fn delete(pool: &PgPool, user_id: Uuid) -> Result<(), AdminError> {
    let is_system: bool = sqlx::query_scalar("SELECT is_system FROM admin_users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    if is_system {
        return Err(AdminError::Forbidden("system admin users cannot be deleted".into()));
    }
    sqlx::query("DELETE FROM admin_users WHERE id = $1").bind(user_id).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_policy_rejects_short_password() {
        assert!(password::validate("short", false).is_err());
    }
}
