//! The query-service HTTP API (spec §2 "Download" + §6 read-side
//! surfaces): full-text search, file metadata, and download redirection to
//! whichever storage-element currently holds the bytes.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::QueryError;
use crate::search;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/search", get(search_handler))
        .route("/api/v1/files/:file_id", get(get_file))
        .route("/api/v1/files/:file_id/download", get(download_redirect))
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
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, QueryError> {
    let token = extract_bearer(request.headers())
        .ok_or_else(|| QueryError::Unauthorized("missing bearer token".into()))?;

    let claims = state.jwt.validate(token).await.map_err(|e| QueryError::Unauthorized(e.to_string()))?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<search::SearchDocument>>, QueryError> {
    if q.q.trim().is_empty() {
        return Err(QueryError::Validation("q must not be empty".into()));
    }
    let limit = q.limit.clamp(1, 100);
    Ok(Json(search::search(&state.pool, &q.q, limit).await?))
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    AxumPath(file_id): AxumPath<Uuid>,
) -> Result<Json<search::SearchDocument>, QueryError> {
    let doc = search::get(&state.pool, file_id).await?;
    if doc.deleted_at.is_some() {
        return Err(QueryError::NotFound(format!("file {file_id} has been deleted")));
    }
    Ok(Json(doc))
}

async fn download_redirect(
    State(state): State<Arc<AppState>>,
    AxumPath(file_id): AxumPath<Uuid>,
) -> Result<Response, QueryError> {
    let doc = search::get(&state.pool, file_id).await?;
    if doc.deleted_at.is_some() {
        return Err(QueryError::NotFound(format!("file {file_id} has been deleted")));
    }
    let api_url = doc.storage_element_api_url.ok_or_else(|| {
        QueryError::Transient(format!("no known api_url for storage element {}", doc.storage_element_id))
    })?;

    let target = format!("{}/api/v1/files/{file_id}/download", api_url.trim_end_matches('/'));
    let mut response = Redirect::temporary(&target).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

async fn health_ready(State(state): State<Arc<AppState>>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
