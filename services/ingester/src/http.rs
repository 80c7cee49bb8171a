//! The ingester's HTTP API (spec §6): a single write-router endpoint behind
//! a JWT-validating middleware, mirroring the bearer-extraction /
//! claims-in-extensions split `storage-element::http` uses.

use std::sync::Arc;

use artstore_jwt::UnifiedClaims;
use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::error::IngesterError;
use crate::proxy::{self, ProxyUpload};
use crate::selector;
use crate::state::AppState;

/// Default per-client request budget when a token carries no `rate_limit`
/// claim of its own (spec §4.6 falls back to a flat per-minute quota).
const DEFAULT_RATE_LIMIT: u32 = 60;

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes as usize;
    let protected = Router::new()
        .route("/api/v1/upload", post(upload_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_middleware));

    Router::new()
        .route("/health/live", get(|| async { StatusCode::OK }))
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
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, IngesterError> {
    let token = extract_bearer(request.headers())
        .ok_or_else(|| IngesterError::Unauthorized("missing bearer token".into()))?
        .to_string();

    let claims = state
        .jwt
        .validate(&token)
        .await
        .map_err(|e| IngesterError::Unauthorized(e.to_string()))?;

    // Rate limiting applies to automated callers (service accounts), which
    // is who spec §4.6 describes arriving with sustained write traffic;
    // an admin-user-issued upload (rare, interactive) is not throttled.
    if let Some(client_id) = claims.client_id.clone() {
        let limit = claims.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT);
        let decision = {
            let mut conn = state.redis.lock().await;
            artstore_redis::rate_limit::check(&mut conn, &client_id, limit, state.config.rate_limit_window_secs).await
        };
        if !decision.allowed {
            return Err(IngesterError::RateLimited(
                format!("client {client_id} exceeded its upload rate limit"),
                decision.retry_after_secs.unwrap_or(state.config.rate_limit_window_secs),
            ));
        }
    }

    request.extensions_mut().insert((claims, token));
    Ok(next.run(request).await)
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    claims: axum::extract::Extension<(UnifiedClaims, String)>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<proxy::UploadOutcome>), IngesterError> {
    let (claims, token) = claims.0;

    let mut original_filename = None;
    let mut content_type = "application/octet-stream".to_string();
    let mut description = None;
    let mut retention_days: i32 = 0;
    let mut user_metadata = None;
    let mut file_bytes: Option<bytes::Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| IngesterError::Validation(e.to_string()))? {
        match field.name() {
            Some("file") => {
                original_filename = field.file_name().map(|s| s.to_string());
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                file_bytes = Some(field.bytes().await.map_err(|e| IngesterError::Validation(e.to_string()))?);
            }
            Some("description") => {
                description = Some(field.text().await.map_err(|e| IngesterError::Validation(e.to_string()))?);
            }
            Some("retention_days") => {
                let text = field.text().await.map_err(|e| IngesterError::Validation(e.to_string()))?;
                retention_days = text.trim().parse().map_err(|_| {
                    IngesterError::Validation("retention_days must be an integer".into())
                })?;
            }
            Some("user_metadata") => {
                let text = field.text().await.map_err(|e| IngesterError::Validation(e.to_string()))?;
                user_metadata = Some(
                    serde_json::from_str(&text)
                        .map_err(|_| IngesterError::Validation("user_metadata must be a JSON object".into()))?,
                );
            }
            _ => {}
        }
    }

    let original_filename =
        original_filename.ok_or_else(|| IngesterError::Validation("missing file field".into()))?;
    let file_bytes = file_bytes.ok_or_else(|| IngesterError::Validation("missing file field".into()))?;

    if file_bytes.len() as u64 > state.config.max_upload_bytes {
        return Err(IngesterError::Validation(format!(
            "file exceeds the maximum accepted size of {} bytes",
            state.config.max_upload_bytes
        )));
    }

    let selection = {
        let mut conn = state.redis.lock().await;
        selector::select(&mut conn, &state.topology, file_bytes.len() as u64).await?
    };

    let upload = ProxyUpload {
        original_filename,
        content_type,
        description,
        retention_days,
        user_metadata,
        bytes: file_bytes,
    };

    let uploader_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let outcome = proxy::forward(
        &state.http,
        &state.config.admin_base_url,
        &token,
        &selection,
        upload,
        &claims.sub,
        uploader_ip,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}
