//! Admin-module HTTP API (spec §6): storage-element / service-account /
//! admin-user CRUD, OAuth2 token issuance, and JWT key rotation control.
//!
//! Grounded on the same split as storage-element's `http.rs`: JWT auth
//! lives in a `tower`/axum middleware that injects [`UnifiedClaims`] as a
//! request extension, matching the teacher's sibling middleware pattern
//! picked up from the pack.

use std::sync::Arc;

use artstore_jwt::UnifiedClaims;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AdminError;
use crate::state::AppState;
use crate::{admin_user, file_registry, service_account, storage_element};

const ROLE_ORDER: &[&str] = &["READONLY", "ADMIN", "SUPER_ADMIN"];

fn role_rank(role: &str) -> usize {
    ROLE_ORDER.iter().position(|r| *r == role).unwrap_or(0)
}

fn role_at_least(role: &str, min: &str) -> bool {
    role_rank(role) >= role_rank(min)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AdminError> {
    let token = extract_bearer(request.headers()).ok_or_else(|| AdminError::Unauthorized("missing bearer token".into()))?;
    let claims = state
        .jwt
        .validate(token)
        .await
        .map_err(|e| AdminError::Unauthorized(e.to_string()))?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

fn require_admin(claims: &UnifiedClaims) -> Result<(), AdminError> {
    if role_at_least(&claims.role, "ADMIN") {
        Ok(())
    } else {
        Err(AdminError::Forbidden("requires ADMIN role or higher".into()))
    }
}

/// Build the router: unauthenticated health check plus the JWT-guarded API.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/storage-elements", get(list_storage_elements).post(create_storage_element))
        .route("/api/v1/storage-elements/:id", axum::routing::put(update_storage_element).delete(delete_storage_element))
        .route("/api/v1/storage-elements/:id/change-mode", post(change_mode))
        .route("/api/v1/service-accounts", get(list_service_accounts).post(create_service_account))
        .route("/api/v1/service-accounts/:id", axum::routing::delete(delete_service_account))
        .route("/api/v1/service-accounts/:id/rotate-secret", post(rotate_service_account_secret))
        .route("/api/v1/admin-users", get(list_admin_users).post(create_admin_user))
        .route("/api/v1/admin-users/:id", axum::routing::delete(delete_admin_user))
        .route("/api/v1/admin-users/:id/reset-password", post(reset_admin_user_password))
        .route("/api/v1/jwt-keys/rotate", post(rotate_jwt_keys))
        .route("/api/v1/jwt-keys/status", get(jwt_key_status))
        .route("/api/v1/files/register", post(register_file))
        .route("/api/v1/files/:file_id", get(get_file).delete(delete_file))
        .route("/api/v1/files/:file_id/finalize", post(finalize_file))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_middleware));

    let base = Router::new()
        .route("/health/live", get(|| async { StatusCode::OK }))
        .route("/health/ready", get(health_ready))
        .route("/api/v1/oauth/token", post(oauth_token))
        .merge(protected);

    base.with_state(state).layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_ready(State(state): State<Arc<AppState>>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenRequest {
    grant_type: String,
    client_id: String,
    client_secret: String,
}

async fn oauth_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OAuthTokenRequest>,
) -> Response {
    if req.grant_type != "client_credentials" {
        return (
            StatusCode::BAD_REQUEST,
            Json(service_account::OAuthError {
                error: "unsupported_grant_type",
                error_description: "only client_credentials is supported".into(),
            }),
        )
            .into_response();
    }

    match service_account::issue_token(&state.pool, &state.jwt, &req.client_id, &req.client_secret).await {
        Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, Json(err)).into_response(),
    }
}

async fn list_storage_elements(State(state): State<Arc<AppState>>) -> Result<Json<Vec<storage_element::StorageElementView>>, AdminError> {
    Ok(Json(storage_element::list(&state.pool).await?))
}

async fn create_storage_element(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Json(input): Json<storage_element::StorageElementInput>,
) -> Result<(StatusCode, Json<storage_element::StorageElementView>), AdminError> {
    require_admin(&claims)?;
    let mut redis = state.redis.clone();
    let row = storage_element::create(&state.pool, &mut redis, input).await?;
    crate::audit::record(
        state.pool.clone(),
        crate::audit::AuditEvent {
            actor_type: crate::audit::ActorType::AdminUser,
            actor_id: Some(claims.sub.clone()),
            action: "storage_element.create".into(),
            resource_type: "storage_element".into(),
            resource_id: Some(row.id.to_string()),
            ip_address: None,
            user_agent: None,
            outcome: crate::audit::Outcome::Success,
            detail: serde_json::json!({ "name": row.name }),
        },
    );
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_storage_element(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(id): Path<Uuid>,
    Json(input): Json<storage_element::StorageElementInput>,
) -> Result<Json<storage_element::StorageElementView>, AdminError> {
    require_admin(&claims)?;
    let mut redis = state.redis.clone();
    Ok(Json(storage_element::update(&state.pool, &mut redis, id, input).await?))
}

#[derive(Debug, Deserialize)]
struct ChangeModeRequest {
    new_mode: String,
}

async fn change_mode(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeModeRequest>,
) -> Result<Json<storage_element::StorageElementView>, AdminError> {
    require_admin(&claims)?;
    let mut redis = state.redis.clone();
    let new_mode = body.new_mode.to_uppercase();
    Ok(Json(storage_element::change_mode(&state.pool, &mut redis, id, &new_mode).await?))
}

async fn delete_storage_element(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AdminError> {
    require_admin(&claims)?;
    let mut redis = state.redis.clone();
    storage_element::delete(&state.pool, &mut redis, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateServiceAccountRequest {
    name: String,
    role: String,
    #[serde(default = "default_rate_limit")]
    rate_limit: i32,
    #[serde(default = "default_environment")]
    environment: String,
    #[serde(default)]
    is_system: bool,
}

fn default_rate_limit() -> i32 {
    600
}
fn default_environment() -> String {
    "production".to_string()
}

async fn list_service_accounts(State(state): State<Arc<AppState>>) -> Result<Json<Vec<service_account::ServiceAccountView>>, AdminError> {
    Ok(Json(service_account::list(&state.pool).await?))
}

async fn create_service_account(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Json(req): Json<CreateServiceAccountRequest>,
) -> Result<(StatusCode, Json<service_account::ServiceAccountView>), AdminError> {
    require_admin(&claims)?;
    let row = service_account::create(&state.pool, &req.name, &req.role, req.rate_limit, &req.environment, req.is_system).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn rotate_service_account_secret(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AdminError> {
    require_admin(&claims)?;
    let secret = service_account::rotate_secret(&state.pool, id).await?;
    Ok(Json(serde_json::json!({ "client_secret": secret })))
}

async fn delete_service_account(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AdminError> {
    require_admin(&claims)?;
    service_account::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateAdminUserRequest {
    username: String,
    password: String,
    role: String,
    #[serde(default)]
    is_system: bool,
}

async fn list_admin_users(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
) -> Result<Json<Vec<admin_user::AdminUserView>>, AdminError> {
    require_admin(&claims)?;
    Ok(Json(admin_user::list(&state.pool).await?))
}

async fn create_admin_user(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Json(req): Json<CreateAdminUserRequest>,
) -> Result<(StatusCode, Json<admin_user::AdminUserView>), AdminError> {
    if role_rank(&claims.role) < role_rank("SUPER_ADMIN") {
        return Err(AdminError::Forbidden("creating admin users requires SUPER_ADMIN".into()));
    }
    let row = admin_user::create(&state.pool, &req.username, &req.password, &req.role, req.is_system).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn delete_admin_user(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AdminError> {
    if role_rank(&claims.role) < role_rank("SUPER_ADMIN") {
        return Err(AdminError::Forbidden("deleting admin users requires SUPER_ADMIN".into()));
    }
    admin_user::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_admin_user_password(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AdminError> {
    require_admin(&claims)?;
    let new_password = admin_user::reset_password(&state.pool, id, false).await?;
    Ok(Json(serde_json::json!({ "password": new_password })))
}

async fn rotate_jwt_keys(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
) -> Result<Json<Value>, AdminError> {
    if role_rank(&claims.role) < role_rank("SUPER_ADMIN") {
        return Err(AdminError::Forbidden("rotating signing keys requires SUPER_ADMIN".into()));
    }
    let mut redis = state.redis.clone();
    let (version, expires_at) = crate::jwt_rotation::force_rotate(&state.jwt, &state.pool, &mut redis).await?;
    Ok(Json(serde_json::json!({ "version": version, "expires_at": expires_at })))
}

async fn jwt_key_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let expires_at = state.jwt.primary_expires_at().await;
    Json(serde_json::json!({ "primary_key_expires_at": expires_at }))
}

async fn register_file(
    State(state): State<Arc<AppState>>,
    Json(input): Json<file_registry::RegisterInput>,
) -> Result<(StatusCode, Json<file_registry::FileRecord>), AdminError> {
    let mut redis = state.redis.clone();
    let record = file_registry::register(&state.pool, &mut redis, input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_file(State(state): State<Arc<AppState>>, Path(file_id): Path<Uuid>) -> Result<Json<file_registry::FileRecord>, AdminError> {
    Ok(Json(file_registry::get(&state.pool, file_id).await?))
}

async fn finalize_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<file_registry::FileRecord>, AdminError> {
    let mut redis = state.redis.clone();
    Ok(Json(file_registry::finalize(&state.pool, &mut redis, file_id).await?))
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    claims: axum::Extension<UnifiedClaims>,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, AdminError> {
    require_admin(&claims)?;
    let mut redis = state.redis.clone();
    file_registry::soft_delete(&state.pool, &mut redis, file_id, "admin-requested delete").await?;
    Ok(StatusCode::NO_CONTENT)
}
