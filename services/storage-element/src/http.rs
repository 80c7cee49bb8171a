//! The storage-element HTTP API (spec §6): upload, download, metadata,
//! delete, mode management and cache reconciliation, behind a JWT-validating
//! middleware layer.
//!
//! Router shape and the auth-middleware split (validate → stash claims in
//! request extensions → handlers read them back) is grounded on the
//! teacher's sibling `middleware.rs` pattern in the examples pack
//! (bearer extraction, `excluded_paths`, claims stored via
//! `request.extensions_mut()`).

use std::sync::Arc;

use artstore_jwt::UnifiedClaims;
use artstore_wal::OperationType;
use axum::extract::{Multipart, Path as AxumPath, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::reconciliation::{self, ReconciliationLock};
use crate::state::AppState;
use crate::{download, mode::StorageMode, upload};

/// Minimum role an operation requires, lowest to highest privilege.
const ROLE_ORDER: &[&str] = &["READONLY", "VIEWER", "OPERATOR", "ADMIN", "SUPER_ADMIN"];

fn role_rank(role: &str) -> usize {
    ROLE_ORDER.iter().position(|r| r.eq_ignore_ascii_case(role)).unwrap_or(0)
}

fn role_at_least(role: &str, min: &str) -> bool {
    role_rank(role) >= role_rank(min)
}

/// Everything a handler needs: shared state plus a process-lifetime
/// reconciliation lock (one per storage-element, not per-request).
pub struct SharedState {
    /// The element's config/WAL/cache/mode/counters.
    pub app: AppState,
    /// Mutual exclusion across the three reconciliation operations.
    pub reconciliation: ReconciliationLock,
}

/// Build the full router: public health checks, JWT-guarded everything else.
pub fn router(state: Arc<SharedState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/files/upload", post(upload_handler))
        .route("/api/v1/files/:file_id", get(get_metadata).delete(delete_file))
        .route("/api/v1/files/:file_id/download", get(download_handler))
        .route("/api/v1/mode", get(mode_info))
        .route("/api/v1/mode/matrix", get(mode_matrix))
        .route("/api/v1/mode/history", get(mode_history))
        .route("/api/v1/mode/validate", post(mode_validate))
        .route("/api/v1/mode/transition", post(mode_transition))
        .route("/api/v1/cache/consistency", get(cache_consistency))
        .route("/api/v1/cache/rebuild", post(cache_rebuild_full))
        .route("/api/v1/cache/rebuild/incremental", post(cache_rebuild_incremental))
        .route("/api/v1/cache/cleanup-expired", post(cache_cleanup_expired))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_middleware));

    Router::new()
        .route("/health/live", get(|| async { StatusCode::OK }))
        .route("/health/ready", get(health_ready))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

async fn auth_middleware(
    State(state): State<Arc<SharedState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let token = extract_bearer(request.headers())
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".into()))?
        .to_string();

    let claims = state
        .app
        .jwt
        .validate(&token)
        .await
        .map_err(|e| ServiceError::Unauthorized(e.to_string()))?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[derive(Debug, Serialize)]
struct FileResponse {
    file_id: Uuid,
    original_filename: String,
    storage_filename: String,
    file_size: u64,
    content_type: String,
    checksum: String,
    storage_path: String,
}

async fn upload_handler(
    State(state): State<Arc<SharedState>>,
    claims: axum::extract::Extension<UnifiedClaims>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), ServiceError> {
    let mode = *state.app.mode.read().await;
    if !mode.allows_create() {
        return Err(ServiceError::Forbidden(format!("mode {} does not accept new files", mode.as_str())));
    }

    let mut original_filename = None;
    let mut content_type = "application/octet-stream".to_string();
    let mut description = None;
    let mut file_bytes: Option<bytes::Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ServiceError::Validation(e.to_string()))? {
        match field.name() {
            Some("file") => {
                original_filename = field.file_name().map(|s| s.to_string());
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                file_bytes = Some(field.bytes().await.map_err(|e| ServiceError::Validation(e.to_string()))?);
            }
            Some("description") => {
                description = Some(field.text().await.map_err(|e| ServiceError::Validation(e.to_string()))?);
            }
            _ => {}
        }
    }

    let original_filename =
        original_filename.ok_or_else(|| ServiceError::Validation("missing file field".into()))?;
    let file_bytes = file_bytes.ok_or_else(|| ServiceError::Validation("missing file field".into()))?;
    let body = futures::stream::once(async move { Ok::<_, ServiceError>(file_bytes) });

    let returned_filename = original_filename.clone();
    let returned_content_type = content_type.clone();
    let request = upload::UploadRequest {
        original_filename,
        content_type,
        uploader_id: claims.sub.clone(),
        uploader_username: claims.name.clone(),
        description,
    };

    let result = upload::upload(state.app.wal.as_ref(), &state.app.cache_db, &state.app.config, body, request).await?;
    state.app.record_upload(result.file_size);

    // file:created is published by admin-module once it has registered the
    // file under its own canonical file_id, not here.
    Ok((
        StatusCode::CREATED,
        Json(FileResponse {
            file_id: result.file_id,
            original_filename: returned_filename,
            storage_filename: result.storage_filename,
            file_size: result.file_size,
            content_type: returned_content_type,
            checksum: result.checksum,
            storage_path: result.storage_path,
        }),
    ))
}

async fn load_attrs(state: &AppState, file_id: Uuid) -> Result<artstore_attrfile::AttrFile, ServiceError> {
    let row = state
        .cache_db
        .get(file_id)
        .await?
        .filter(|r| !r.deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("file {file_id} not found")))?;
    let abs = std::path::Path::new(&state.config.base_path).join(&row.attr_path);
    let bytes = tokio::fs::read(&abs).await.map_err(|e| ServiceError::Invariant(e.to_string()))?;
    artstore_attrfile::AttrFile::parse(&bytes).map_err(|e| ServiceError::Invariant(e.to_string()))
}

async fn get_metadata(
    State(state): State<Arc<SharedState>>,
    AxumPath(file_id): AxumPath<Uuid>,
) -> Result<Json<artstore_attrfile::AttrFile>, ServiceError> {
    Ok(Json(load_attrs(&state.app, file_id).await?))
}

async fn download_handler(
    State(state): State<Arc<SharedState>>,
    AxumPath(file_id): AxumPath<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let mode = *state.app.mode.read().await;
    if !mode.allows_read() {
        return Err(ServiceError::Forbidden(format!("mode {} does not permit reads", mode.as_str())));
    }

    let attrs = load_attrs(&state.app, file_id).await?;
    let metadata = tokio::fs::metadata(std::path::Path::new(&state.app.config.base_path).join(&attrs.storage_path))
        .await
        .map_err(|e| ServiceError::NotFound(e.to_string()))?;
    let modified_at: chrono::DateTime<chrono::Utc> = metadata.modified().map(chrono::DateTime::from).unwrap_or(attrs.updated_at);
    let etag = download::generate_etag(&attrs.storage_path, attrs.file_size, modified_at);

    if download::etag_matches(headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()), &etag)
        || download::not_modified_since(
            headers.get(header::IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok()),
            modified_at,
        )
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let total_len = attrs.original_size.unwrap_or(attrs.file_size);

    let plan = match download::build_plan(&state.app.config.base_path, &attrs, range_header).await {
        Ok(p) => p,
        Err(ServiceError::RangeNotSatisfiable(msg)) => {
            let mut resp = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            resp.headers_mut().insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{total_len}")).unwrap(),
            );
            tracing::warn!(file_id = %file_id, %msg, "range not satisfiable");
            return Ok(resp);
        }
        Err(e) => return Err(e),
    };

    let mut response = if let Some(parts) = plan.multipart {
        let framed = download::frame_multipart(&parts, &attrs.content_type, total_len);
        let mut resp = (StatusCode::PARTIAL_CONTENT, framed).into_response();
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&format!("multipart/byteranges; boundary={}", download::MULTIPART_BOUNDARY))
                .unwrap(),
        );
        resp
    } else if let Some((range, total)) = plan.content_range {
        let mut resp = (StatusCode::PARTIAL_CONTENT, plan.body).into_response();
        resp.headers_mut().insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {}-{}/{}", range.start, range.end, total)).unwrap(),
        );
        resp.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_str(&attrs.content_type).unwrap());
        resp
    } else {
        let mut resp = (StatusCode::OK, plan.body).into_response();
        resp.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_str(&attrs.content_type).unwrap());
        resp
    };

    response.headers_mut().insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response.headers_mut().insert(header::ETAG, HeaderValue::from_str(&etag).unwrap());
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", attrs.original_filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    Ok(response)
}

async fn delete_file(
    State(state): State<Arc<SharedState>>,
    AxumPath(file_id): AxumPath<Uuid>,
    claims: axum::extract::Extension<UnifiedClaims>,
) -> Result<StatusCode, ServiceError> {
    if !role_at_least(&claims.role, "OPERATOR") {
        return Err(ServiceError::Forbidden("role must be at least OPERATOR".into()));
    }
    let mode = *state.app.mode.read().await;
    if !mode.allows_delete() {
        return Err(ServiceError::Forbidden(format!("mode {} does not permit delete", mode.as_str())));
    }

    let row = state
        .app
        .cache_db
        .get(file_id)
        .await?
        .filter(|r| !r.deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("file {file_id} not found")))?;

    // Marking a cache row deleted is idempotent and leaves the bytes on
    // disk untouched (physical cleanup is the garbage collector's job), so
    // there is nothing for a crash-recovery pass to undo here.
    let wal_entry = state
        .app
        .wal
        .begin(
            OperationType::Delete,
            serde_json::json!({"file_id": file_id, "storage_path": row.storage_path}),
            serde_json::json!({}),
            None,
        )
        .await?;
    state.app.wal.mark_in_progress(wal_entry.transaction_id).await?;

    state.app.cache_db.mark_deleted(file_id).await?;
    state.app.wal.commit(wal_entry.transaction_id, 0).await?;
    state.app.record_delete(row.file_size);

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct ModeInfo {
    mode: &'static str,
    capacity_status: String,
}

async fn mode_info(State(state): State<Arc<SharedState>>) -> Json<ModeInfo> {
    let mode = *state.app.mode.read().await;
    let status = state.app.capacity_status().await;
    Json(ModeInfo { mode: mode.as_str(), capacity_status: format!("{status:?}").to_uppercase() })
}

#[derive(Serialize)]
struct ModeMatrixEntry {
    from: &'static str,
    to: &'static str,
}

async fn mode_matrix() -> Json<Vec<ModeMatrixEntry>> {
    Json(vec![
        ModeMatrixEntry { from: "rw", to: "ro" },
        ModeMatrixEntry { from: "ro", to: "ar" },
    ])
}

async fn mode_history(State(state): State<Arc<SharedState>>) -> Json<Vec<crate::mode::ModeTransition>> {
    let history = state.app.mode_history.read().await;
    Json(history.history().to_vec())
}

#[derive(Deserialize)]
struct ModeTargetRequest {
    target: String,
    reason: Option<String>,
}

async fn mode_validate(
    State(state): State<Arc<SharedState>>,
    Json(body): Json<ModeTargetRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let target =
        StorageMode::parse(&body.target).ok_or_else(|| ServiceError::Validation("unknown mode".into()))?;
    let current = *state.app.mode.read().await;
    Ok(Json(serde_json::json!({ "allowed": current.can_transition_to(target) })))
}

async fn mode_transition(
    State(state): State<Arc<SharedState>>,
    claims: axum::extract::Extension<UnifiedClaims>,
    Json(body): Json<ModeTargetRequest>,
) -> Result<Json<crate::mode::ModeTransition>, ServiceError> {
    if !role_at_least(&claims.role, "OPERATOR") {
        return Err(ServiceError::Forbidden("role must be at least OPERATOR".into()));
    }
    let target =
        StorageMode::parse(&body.target).ok_or_else(|| ServiceError::Validation("unknown mode".into()))?;

    let mut mode = state.app.mode.write().await;
    let mut history = state.app.mode_history.write().await;
    let transition = history.apply(*mode, target, body.reason).map_err(|e| match e {
        crate::mode::ModeTransitionError::AlreadyInMode => {
            ServiceError::Validation("already in requested mode".into())
        }
        crate::mode::ModeTransitionError::NotPermitted { from, to } => ServiceError::Validation(format!(
            "transition {} -> {} is not permitted",
            from.as_str(),
            to.as_str()
        )),
    })?;

    let wal_entry = state
        .app
        .wal
        .begin(
            OperationType::ModeChange,
            serde_json::json!({"from": transition.from.as_str(), "to": transition.to.as_str()}),
            serde_json::json!({}),
            None,
        )
        .await?;
    state.app.wal.mark_in_progress(wal_entry.transaction_id).await?;
    state.app.wal.commit(wal_entry.transaction_id, 0).await?;

    *mode = target;
    Ok(Json(transition))
}

#[derive(Deserialize)]
struct ExpiryQuery {
    #[serde(default = "default_expiry_days")]
    older_than_days: i64,
}

fn default_expiry_days() -> i64 {
    30
}

async fn cache_consistency(
    State(state): State<Arc<SharedState>>,
    Query(q): Query<ExpiryQuery>,
) -> Result<Json<reconciliation::ConsistencyReport>, ServiceError> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(q.older_than_days);
    let report = reconciliation::consistency_check(
        &state.reconciliation,
        &state.app.cache_db,
        &state.app.config.base_path,
        cutoff,
    )
    .await?;
    Ok(Json(report))
}

async fn cache_rebuild_full(State(state): State<Arc<SharedState>>) -> Result<Json<serde_json::Value>, ServiceError> {
    let inserted =
        reconciliation::full_rebuild(&state.reconciliation, &state.app.cache_db, &state.app.config.base_path)
            .await?;
    Ok(Json(serde_json::json!({ "inserted": inserted })))
}

async fn cache_rebuild_incremental(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let inserted = reconciliation::incremental_rebuild(
        &state.reconciliation,
        &state.app.cache_db,
        &state.app.config.base_path,
    )
    .await?;
    Ok(Json(serde_json::json!({ "inserted": inserted })))
}

async fn cache_cleanup_expired(
    State(state): State<Arc<SharedState>>,
    Query(q): Query<ExpiryQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(q.older_than_days);
    let removed = reconciliation::cleanup_expired(&state.reconciliation, &state.app.cache_db, cutoff).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn health_ready(State(state): State<Arc<SharedState>>) -> StatusCode {
    match state.app.wal.non_terminal().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

