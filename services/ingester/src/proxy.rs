//! Streaming proxy to the selected storage-element, followed by admin-module
//! file registration (spec §4.4 step "route the stream"; spec §4.3 "Ingester
//! calls the admin API to register a newly uploaded file").
//!
//! Once bytes have started streaming to a storage-element, a failure there
//! is surfaced as-is rather than retried against a different element (spec
//! §4.4 rule 4) — a partially streamed upload on element A must not be
//! silently retried on element B.

use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::IngesterError;
use crate::selector::Selection;

/// Everything about an in-flight upload the proxy needs, gathered from the
/// inbound multipart body before a storage-element is even chosen.
pub struct ProxyUpload {
    pub original_filename: String,
    pub content_type: String,
    pub description: Option<String>,
    pub retention_days: i32,
    pub user_metadata: Option<serde_json::Value>,
    pub bytes: Bytes,
}

/// The storage-element's own upload response shape (mirrors
/// `storage-element::http::FileResponse`; duplicated here since ingester
/// only ever consumes it over the wire).
#[derive(Debug, Deserialize)]
struct StorageElementFileResponse {
    file_id: Uuid,
    storage_filename: String,
    file_size: u64,
    checksum: String,
    storage_path: String,
}

/// Result returned to the ingester's HTTP caller once both the
/// storage-element write and the admin-module registration have succeeded.
#[derive(Debug, serde::Serialize)]
pub struct UploadOutcome {
    pub file_id: Uuid,
    pub storage_element_id: String,
    pub original_filename: String,
    pub file_size: u64,
    pub checksum: String,
}

/// Stream `upload` through to `selection`'s storage-element, then register
/// the resulting file record with admin-module.
pub async fn forward(
    http: &reqwest::Client,
    admin_base_url: &str,
    bearer: &str,
    selection: &Selection,
    upload: ProxyUpload,
    uploader_id: &str,
    uploader_ip: Option<String>,
) -> Result<UploadOutcome, IngesterError> {
    let part = reqwest::multipart::Part::bytes(upload.bytes.to_vec())
        .file_name(upload.original_filename.clone())
        .mime_str(&upload.content_type)
        .map_err(|e| IngesterError::Validation(e.to_string()))?;

    let mut form = reqwest::multipart::Form::new().part("file", part);
    if let Some(description) = &upload.description {
        form = form.text("description", description.clone());
    }

    let upload_url = format!("{}/api/v1/files/upload", selection.api_url.trim_end_matches('/'));
    let response = http
        .post(&upload_url)
        .bearer_auth(bearer)
        .multipart(form)
        .send()
        .await
        .map_err(|e| IngesterError::Transient(format!("storage-element {} unreachable: {e}", selection.element_id)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(IngesterError::Transient(format!(
            "storage-element {} rejected the upload: {status} {body}",
            selection.element_id
        )));
    }

    let se_result: StorageElementFileResponse = response.json().await?;

    register_with_admin(http, admin_base_url, bearer, &selection.element_id, &se_result, &upload, uploader_id, uploader_ip)
        .await?;

    Ok(UploadOutcome {
        file_id: se_result.file_id,
        storage_element_id: selection.element_id.clone(),
        original_filename: upload.original_filename,
        file_size: se_result.file_size,
        checksum: se_result.checksum,
    })
}

#[derive(serde::Serialize)]
struct RegisterRequest<'a> {
    file_id: Uuid,
    original_filename: &'a str,
    storage_filename: &'a str,
    file_size: u64,
    checksum_sha256: &'a str,
    content_type: &'a str,
    description: &'a Option<String>,
    retention_days: i32,
    storage_element_id: Uuid,
    storage_path: &'a str,
    uploaded_by: &'a str,
    upload_source_ip: Option<String>,
    user_metadata: &'a Option<serde_json::Value>,
}

async fn register_with_admin(
    http: &reqwest::Client,
    admin_base_url: &str,
    bearer: &str,
    storage_element_id: &str,
    se_result: &StorageElementFileResponse,
    upload: &ProxyUpload,
    uploader_id: &str,
    uploader_ip: Option<String>,
) -> Result<(), IngesterError> {
    let storage_element_id = Uuid::parse_str(storage_element_id)
        .map_err(|e| IngesterError::Transient(format!("storage-element returned a non-UUID element id: {e}")))?;

    let body = RegisterRequest {
        file_id: se_result.file_id,
        original_filename: &upload.original_filename,
        storage_filename: &se_result.storage_filename,
        file_size: se_result.file_size,
        checksum_sha256: &se_result.checksum,
        content_type: &upload.content_type,
        description: &upload.description,
        retention_days: upload.retention_days,
        storage_element_id,
        storage_path: &se_result.storage_path,
        uploaded_by: uploader_id,
        upload_source_ip: uploader_ip,
        user_metadata: &upload.user_metadata,
    };

    let url = format!("{}/api/v1/files/register", admin_base_url.trim_end_matches('/'));
    let response = http.post(&url).bearer_auth(bearer).json(&body).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // The bytes are already durable on the storage-element; a failed
        // registration is logged and surfaced as transient rather than
        // treated as upload failure, matching spec §7's rule that
        // file-event/registration publishing never fails a durable write.
        tracing::warn!(storage_element_id = %storage_element_id, status = %status, body, "admin file registration failed");
        return Err(IngesterError::Transient(format!("file stored but admin registration failed: {status}")));
    }

    Ok(())
}
