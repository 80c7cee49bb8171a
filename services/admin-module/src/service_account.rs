//! Service-account registry and OAuth2 client-credentials issuance
//! (spec §4.3 "OAuth2 service-account issuance").

use artstore_jwt::{KeyManager, UnifiedClaims};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AdminError;
use crate::password;

const ACCESS_TOKEN_TTL: Duration = Duration::minutes(15);
const REFRESH_TOKEN_TTL: Duration = Duration::days(30);
const SECRET_VALIDITY: Duration = Duration::days(90);
const MAX_SECRET_HISTORY: usize = 5;

/// Row shape returned to API callers (no secret material except at
/// create/rotate time, where [`secret_plain`] is populated once).
#[derive(Debug, Serialize)]
pub struct ServiceAccountView {
    pub id: Uuid,
    pub name: String,
    pub client_id: String,
    pub role: String,
    pub status: String,
    pub rate_limit: i32,
    pub environment: String,
    pub is_system: bool,
    pub secret_expires_at: Option<DateTime<Utc>>,
    /// Present only on the response to create/rotate; never on list/get.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_plain: Option<String>,
}

fn generate_client_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Create a new service account. Returns the plaintext secret exactly once.
pub async fn create(
    pool: &PgPool,
    name: &str,
    role: &str,
    rate_limit: i32,
    environment: &str,
    is_system: bool,
) -> Result<ServiceAccountView, AdminError> {
    let id = Uuid::new_v4();
    let client_id = format!("sa_{}", Uuid::new_v4().simple());
    let secret_plain = generate_client_secret();
    let secret_hash = bcrypt::hash(&secret_plain, bcrypt::DEFAULT_COST)?;
    let secret_expires_at = Utc::now() + SECRET_VALIDITY;

    sqlx::query(
        "INSERT INTO service_accounts (id, name, client_id, client_secret_hash, role, rate_limit, environment, is_system, secret_expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(id)
    .bind(name)
    .bind(&client_id)
    .bind(&secret_hash)
    .bind(role)
    .bind(rate_limit)
    .bind(environment)
    .bind(is_system)
    .bind(secret_expires_at)
    .execute(pool)
    .await?;

    Ok(ServiceAccountView {
        id,
        name: name.to_string(),
        client_id,
        role: role.to_string(),
        status: "ACTIVE".into(),
        rate_limit,
        environment: environment.to_string(),
        is_system,
        secret_expires_at: Some(secret_expires_at),
        secret_plain: Some(secret_plain),
    })
}

#[derive(sqlx::FromRow)]
struct ServiceAccountRow {
    id: Uuid,
    name: String,
    client_id: String,
    client_secret_hash: String,
    secret_history: Value,
    role: String,
    status: String,
    rate_limit: i32,
    environment: String,
    is_system: bool,
    secret_expires_at: Option<DateTime<Utc>>,
}

async fn fetch_by_client_id(pool: &PgPool, client_id: &str) -> Result<ServiceAccountRow, AdminError> {
    let row = sqlx::query_as::<_, ServiceAccountRow>(
        "SELECT id, name, client_id, client_secret_hash, secret_history, role, status, rate_limit, environment, is_system, secret_expires_at
         FROM service_accounts WHERE client_id = $1",
    )
    .bind(client_id)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Token-pair result of a successful client-credentials grant.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// OAuth2 error body per RFC-6749 §5.2.
#[derive(Debug, Serialize)]
pub struct OAuthError {
    pub error: &'static str,
    pub error_description: String,
}

/// Verify `client_id`/`client_secret` (constant-time via bcrypt) and mint
/// an access + refresh token pair.
pub async fn issue_token(
    pool: &PgPool,
    jwt: &KeyManager,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenPair, OAuthError> {
    let row = fetch_by_client_id(pool, client_id).await.map_err(|_| OAuthError {
        error: "invalid_client",
        error_description: "unknown client_id or client_secret".into(),
    })?;

    if row.status != "ACTIVE" {
        return Err(OAuthError {
            error: "invalid_client",
            error_description: format!("account status is {}", row.status),
        });
    }

    let verified = bcrypt::verify(client_secret, &row.client_secret_hash).unwrap_or(false);
    if !verified {
        return Err(OAuthError {
            error: "invalid_client",
            error_description: "unknown client_id or client_secret".into(),
        });
    }

    let now = Utc::now();
    let base_claims = |exp: DateTime<Utc>| UnifiedClaims {
        sub: row.id.to_string(),
        token_type_raw: "service_account".into(),
        role: row.role.clone(),
        name: row.name.clone(),
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
        nbf: now.timestamp(),
        client_id: Some(row.client_id.clone()),
        rate_limit: Some(row.rate_limit as u32),
    };

    let access_token = jwt
        .sign(&base_claims(now + ACCESS_TOKEN_TTL))
        .await
        .map_err(|e| OAuthError { error: "server_error", error_description: e.to_string() })?;
    let refresh_token = jwt
        .sign(&base_claims(now + REFRESH_TOKEN_TTL))
        .await
        .map_err(|e| OAuthError { error: "server_error", error_description: e.to_string() })?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: ACCESS_TOKEN_TTL.num_seconds(),
    })
}

/// Rotate a service account's secret, rejecting a value reused from its
/// last [`MAX_SECRET_HISTORY`] hashes. Returns the new plaintext exactly once.
pub async fn rotate_secret(pool: &PgPool, account_id: Uuid) -> Result<String, AdminError> {
    let row = sqlx::query_as::<_, (String, Value)>(
        "SELECT client_secret_hash, secret_history FROM service_accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_one(pool)
    .await?;
    let (current_hash, history_json) = row;

    let new_secret = generate_client_secret();
    let mut history: Vec<String> = serde_json::from_value(history_json).unwrap_or_default();
    let mut all_hashes = history.clone();
    all_hashes.push(current_hash.clone());
    if password::matches_history(&new_secret, &all_hashes) {
        return Err(AdminError::Invariant("generated secret collided with history".into()));
    }

    history.insert(0, current_hash);
    history.truncate(MAX_SECRET_HISTORY);

    let new_hash = bcrypt::hash(&new_secret, bcrypt::DEFAULT_COST)?;
    let new_expiry = Utc::now() + SECRET_VALIDITY;

    sqlx::query(
        "UPDATE service_accounts SET client_secret_hash = $1, secret_history = $2, secret_expires_at = $3 WHERE id = $4",
    )
    .bind(&new_hash)
    .bind(serde_json::to_value(&history).unwrap_or_default())
    .bind(new_expiry)
    .bind(account_id)
    .execute(pool)
    .await?;

    Ok(new_secret)
}

/// List all service accounts (no secret material).
pub async fn list(pool: &PgPool) -> Result<Vec<ServiceAccountView>, AdminError> {
    let rows = sqlx::query_as::<_, (Uuid, String, String, String, String, i32, String, bool, Option<DateTime<Utc>>)>(
        "SELECT id, name, client_id, role, status, rate_limit, environment, is_system, secret_expires_at
         FROM service_accounts ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| ServiceAccountView {
            id: r.0,
            name: r.1,
            client_id: r.2,
            role: r.3,
            status: r.4,
            rate_limit: r.5,
            environment: r.6,
            is_system: r.7,
            secret_expires_at: r.8,
            secret_plain: None,
        })
        .collect())
}

/// Delete a service account. `is_system` accounts are undeletable.
pub async fn delete(pool: &PgPool, account_id: Uuid) -> Result<(), AdminError> {
    let is_system: bool = sqlx::query_scalar("SELECT is_system FROM service_accounts WHERE id = $1")
        .bind(account_id)
        .fetch_one(pool)
        .await?;
    if is_system {
        return Err(AdminError::Forbidden("system service accounts cannot be deleted".into()));
    }
    sqlx::query("DELETE FROM service_accounts WHERE id = $1").bind(account_id).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_unique_and_hex() {
        let a = generate_client_secret();
        let b = generate_client_secret();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
