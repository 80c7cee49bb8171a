//! The `.attr.json` sidecar: the on-disk source of truth for a file's
//! metadata on a storage-element (spec §3 AttrFile, §6 on-disk format).
//!
//! Size is capped at 4 KiB so a single write lands in one filesystem block
//! (spec §4.1 step 6 / §8 boundary behavior: exactly 4096 bytes accepted,
//! 4097 rejected). Readers transparently migrate the legacy v1.0 format
//! (no `schema_version` field) by filling in the fields v2.0 added.

#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Current schema version written by this implementation.
pub const CURRENT_SCHEMA_VERSION: &str = "2.0";

/// Maximum on-disk size of an attr.json, in bytes.
pub const MAX_ATTR_FILE_BYTES: usize = 4096;

/// Errors constructing or parsing an attr file.
#[derive(Debug, Error)]
pub enum AttrFileError {
    /// Serialized content exceeds [`MAX_ATTR_FILE_BYTES`].
    #[error("attr.json size {0} bytes exceeds maximum {MAX_ATTR_FILE_BYTES} bytes")]
    TooLarge(usize),
    /// JSON (de)serialization failed.
    #[error("invalid attr.json: {0}")]
    Json(#[from] serde_json::Error),
    /// `schema_version` is present but not one ArtStore understands.
    #[error("unsupported schema_version: {0}")]
    UnsupportedVersion(String),
}

/// The v2.0 sidecar attribute schema (spec §3 AttrFile, §6 on-disk format).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttrFile {
    /// Schema version; always `"2.0"` for records written by this code.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Identity of the file this sidecar describes.
    pub file_id: Uuid,
    /// Name as supplied by the uploader.
    pub original_filename: String,
    /// Name on disk, unique within the storage-element.
    pub storage_filename: String,
    /// Byte length of the data file (or logical length if compressed).
    pub file_size: u64,
    /// MIME type as declared or sniffed at upload.
    pub content_type: String,
    /// Creation timestamp, TZ-aware.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp, TZ-aware.
    pub updated_at: DateTime<Utc>,
    /// Identity of the uploading principal.
    pub created_by_id: String,
    /// Display name of the uploading principal.
    pub created_by_username: String,
    /// Full name of the uploading principal, if known.
    #[serde(default)]
    pub created_by_fullname: Option<String>,
    /// Free-text description supplied at upload.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional caller-supplied document version tag.
    #[serde(default)]
    pub version: Option<String>,
    /// Path of the data file relative to the storage-element's base path.
    pub storage_path: String,
    /// Lowercase 64-hex SHA-256 of the (uncompressed) byte stream.
    pub checksum: String,
    /// Whether the data file on disk is compressed.
    #[serde(default)]
    pub compressed: bool,
    /// Compression algorithm, if `compressed`.
    #[serde(default)]
    pub compression_algorithm: Option<String>,
    /// Uncompressed byte length, if `compressed`.
    #[serde(default)]
    pub original_size: Option<u64>,
    /// Freeform tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Legacy v1.0 free-form metadata map, retained for backward compat.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// v2.0 client-specific metadata map.
    #[serde(default)]
    pub custom_attributes: HashMap<String, serde_json::Value>,
}

fn default_schema_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

impl AttrFile {
    /// Serialize to the exact bytes that would be written to disk, and
    /// reject the write up front if it would exceed the 4 KiB limit.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, AttrFileError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        if bytes.len() > MAX_ATTR_FILE_BYTES {
            return Err(AttrFileError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Parse raw bytes, auto-migrating the legacy v1.0 shape (missing
    /// `schema_version`) by defaulting the fields v2.0 introduced.
    ///
    /// Idempotent: `parse(serialize(parse(x))) == parse(x)`.
    pub fn parse(raw: &[u8]) -> Result<Self, AttrFileError> {
        let value: serde_json::Value = serde_json::from_slice(raw)?;
        let version = value
            .get("schema_version")
            .and_then(|v| v.as_str())
            .unwrap_or("1.0")
            .to_string();

        if version != "1.0" && version != CURRENT_SCHEMA_VERSION {
            return Err(AttrFileError::UnsupportedVersion(version));
        }

        let mut attrs: AttrFile = serde_json::from_value(value)?;
        attrs.schema_version = CURRENT_SCHEMA_VERSION.to_string();
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AttrFile {
        AttrFile {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            file_id: Uuid::new_v4(),
            original_filename: "hello.txt".into(),
            storage_filename: "hello_alice_20260727_ab12cd.txt".into(),
            file_size: 6,
            content_type: "text/plain".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by_id: "alice".into(),
            created_by_username: "alice".into(),
            created_by_fullname: None,
            description: None,
            version: None,
            storage_path: "2026/07/27/10/hello_alice_20260727_ab12cd.txt".into(),
            checksum: "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be0".into(),
            compressed: false,
            compression_algorithm: None,
            original_size: None,
            tags: vec![],
            metadata: HashMap::new(),
            custom_attributes: HashMap::new(),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let attrs = sample();
        let bytes = attrs.to_json_bytes().unwrap();
        let parsed = AttrFile::parse(&bytes).unwrap();
        assert_eq!(attrs, parsed);
    }

    #[test]
    fn rejects_oversized_attr_file() {
        let mut attrs = sample();
        attrs.description = Some("x".repeat(MAX_ATTR_FILE_BYTES));
        let err = attrs.to_json_bytes().unwrap_err();
        assert!(matches!(err, AttrFileError::TooLarge(_)));
    }

    #[test]
    fn migrates_legacy_v1_missing_schema_version() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("schema_version");
        value.as_object_mut().unwrap().remove("custom_attributes");
        let raw = serde_json::to_vec(&value).unwrap();

        let migrated = AttrFile::parse(&raw).unwrap();
        assert_eq!(migrated.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(migrated.custom_attributes.is_empty());
    }

    #[test]
    fn migration_is_idempotent() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("schema_version");
        let raw = serde_json::to_vec(&value).unwrap();

        let once = AttrFile::parse(&raw).unwrap();
        let twice_raw = once.to_json_bytes().unwrap();
        let twice = AttrFile::parse(&twice_raw).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["schema_version"] = serde_json::json!("9.9");
        let raw = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            AttrFile::parse(&raw),
            Err(AttrFileError::UnsupportedVersion(_))
        ));
    }
}
