//! RFC 7233 range downloads, conditional requests and compression
//! transparency (spec §4.2 "Download").
//!
//! Range parsing and the multipart/byteranges framing are grounded
//! step-for-step on
//! `original_source/storage-element/tests/test_file_download.py`: suffix
//! ranges (`bytes=-100`), open-ended ranges (`bytes=500-`), end-clamping
//! past EOF, and the `RANGE_SEPARATOR` boundary token for multipart
//! responses. Compression transparency (serving a gzip'd data file as if
//! it were the original bytes) is new: when `compressed` is set the attr
//! file's `original_size` becomes the length range math is done against,
//! and a single range is re-seeked into the decompressed stream since byte
//! offsets can't be mapped onto the compressed container.

use std::path::Path;

use bytes::Bytes;
use flate2::bufread::GzDecoder;
use std::io::Read;

use artstore_attrfile::AttrFile;

use crate::error::ServiceError;

/// One inclusive byte range, `start..=end`, already clamped to the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte, inclusive.
    pub start: u64,
    /// Last byte, inclusive.
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes this range covers.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A range never covers zero bytes once constructed.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Parse a `Range: bytes=...` header value against a known total length.
/// Mirrors the original's clamp-past-EOF and suffix/open-ended handling;
/// any malformed spec is a [`ServiceError::RangeNotSatisfiable`].
pub fn parse_range_header(value: &str, total_len: u64) -> Result<Vec<ByteRange>, ServiceError> {
    let spec = value
        .strip_prefix("bytes=")
        .ok_or_else(|| ServiceError::RangeNotSatisfiable("unsupported range unit".into()))?;

    if total_len == 0 {
        return Err(ServiceError::RangeNotSatisfiable("empty file".into()));
    }

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(ServiceError::RangeNotSatisfiable("empty range spec".into()));
        }

        let (start_str, end_str) = part
            .split_once('-')
            .ok_or_else(|| ServiceError::RangeNotSatisfiable(format!("malformed range: {part}")))?;

        let range = if start_str.is_empty() {
            // Suffix range: last N bytes.
            let suffix_len: u64 = end_str
                .parse()
                .map_err(|_| ServiceError::RangeNotSatisfiable(format!("malformed range: {part}")))?;
            if suffix_len == 0 {
                return Err(ServiceError::RangeNotSatisfiable("zero-length suffix range".into()));
            }
            let start = total_len.saturating_sub(suffix_len);
            ByteRange { start, end: total_len - 1 }
        } else {
            let start: u64 = start_str
                .parse()
                .map_err(|_| ServiceError::RangeNotSatisfiable(format!("malformed range: {part}")))?;
            if start >= total_len {
                return Err(ServiceError::RangeNotSatisfiable(format!(
                    "range start {start} at or past file size {total_len}"
                )));
            }
            let end = if end_str.is_empty() {
                total_len - 1
            } else {
                let raw_end: u64 = end_str
                    .parse()
                    .map_err(|_| ServiceError::RangeNotSatisfiable(format!("malformed range: {part}")))?;
                if raw_end < start {
                    return Err(ServiceError::RangeNotSatisfiable(format!(
                        "range start {start} greater than end {raw_end}"
                    )));
                }
                raw_end.min(total_len - 1)
            };
            ByteRange { start, end }
        };
        ranges.push(range);
    }

    Ok(ranges)
}

/// A strong ETag derived from size, mtime and path — changes whenever any
/// of the three change, never recomputed from file contents.
pub fn generate_etag(storage_path: &str, file_size: u64, modified_at: chrono::DateTime<chrono::Utc>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(storage_path.as_bytes());
    hasher.update(file_size.to_le_bytes());
    hasher.update(modified_at.timestamp_millis().to_le_bytes());
    format!("\"{}\"", hex::encode(&hasher.finalize()[..16]))
}

/// Everything a download handler needs once the attr file has been read.
pub struct DownloadPlan {
    /// Bytes to send back to the client, already range-sliced and
    /// decompressed if the stored file was gzip'd.
    pub body: Bytes,
    /// `None` for a full-file 200 response, `Some` for a single-range 206.
    pub content_range: Option<(ByteRange, u64)>,
    /// Whether the caller asked for more than one range (multipart/byteranges).
    pub multipart: Option<Vec<(ByteRange, Bytes)>>,
}

/// Build the plan: read bytes off disk, decompress if needed, slice to the
/// requested range(s).
pub async fn build_plan(
    base_path: &str,
    attrs: &AttrFile,
    range_header: Option<&str>,
) -> Result<DownloadPlan, ServiceError> {
    let abs_path = Path::new(base_path).join(&attrs.storage_path);
    let raw = tokio::fs::read(&abs_path)
        .await
        .map_err(|e| ServiceError::NotFound(format!("data file missing: {e}")))?;

    let full = if attrs.compressed {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut out = Vec::with_capacity(attrs.original_size.unwrap_or(attrs.file_size) as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| ServiceError::Invariant(format!("corrupt gzip data file: {e}")))?;
        out
    } else {
        raw
    };
    let total_len = full.len() as u64;

    let Some(range_header) = range_header else {
        return Ok(DownloadPlan { body: Bytes::from(full), content_range: None, multipart: None });
    };

    let ranges = parse_range_header(range_header, total_len)?;
    if ranges.len() == 1 {
        let r = ranges[0];
        let slice = full[r.start as usize..=r.end as usize].to_vec();
        Ok(DownloadPlan { body: Bytes::from(slice), content_range: Some((r, total_len)), multipart: None })
    } else {
        let parts = ranges
            .into_iter()
            .map(|r| (r, Bytes::from(full[r.start as usize..=r.end as usize].to_vec())))
            .collect();
        Ok(DownloadPlan { body: Bytes::new(), content_range: None, multipart: Some(parts) })
    }
}

/// Multipart boundary token, matching the original implementation's literal.
pub const MULTIPART_BOUNDARY: &str = "RANGE_SEPARATOR";

/// Frame a set of ranges as a `multipart/byteranges` body.
pub fn frame_multipart(parts: &[(ByteRange, Bytes)], content_type: &str, total_len: u64) -> Bytes {
    let mut out = Vec::new();
    for (range, data) in parts {
        out.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        out.extend_from_slice(
            format!("Content-Range: bytes {}-{}/{}\r\n\r\n", range.start, range.end, total_len).as_bytes(),
        );
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    Bytes::from(out)
}

/// Whether an `If-None-Match` header matches the current ETag exactly.
pub fn etag_matches(if_none_match: Option<&str>, etag: &str) -> bool {
    if_none_match.map(|v| v == etag || v == "*").unwrap_or(false)
}

/// Whether `If-Modified-Since` means the client's cached copy is still valid.
pub fn not_modified_since(if_modified_since: Option<&str>, modified_at: chrono::DateTime<chrono::Utc>) -> bool {
    let Some(raw) = if_modified_since else { return false };
    match chrono::DateTime::parse_from_rfc2822(raw) {
        Ok(ims) => modified_at.timestamp() <= ims.timestamp(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_range() {
        let ranges = parse_range_header("bytes=0-99", 1000).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 99 }]);
    }

    #[test]
    fn parses_multiple_ranges() {
        let ranges = parse_range_header("bytes=0-99,200-299", 1000).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 99 }, ByteRange { start: 200, end: 299 }]);
    }

    #[test]
    fn parses_suffix_range() {
        let ranges = parse_range_header("bytes=-100", 1000).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 900, end: 999 }]);
    }

    #[test]
    fn parses_open_ended_range() {
        let ranges = parse_range_header("bytes=500-", 1000).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 500, end: 999 }]);
    }

    #[test]
    fn clamps_end_past_file_size() {
        let ranges = parse_range_header("bytes=0-2000", 1000).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 999 }]);
    }

    #[test]
    fn rejects_invalid_format() {
        assert!(parse_range_header("invalid", 1000).is_err());
        assert!(parse_range_header("bytes=abc-def", 1000).is_err());
    }

    #[test]
    fn rejects_start_greater_than_end() {
        assert!(parse_range_header("bytes=500-100", 1000).is_err());
    }

    #[test]
    fn rejects_start_at_or_past_file_size() {
        assert!(parse_range_header("bytes=1000-1500", 1000).is_err());
    }

    #[test]
    fn multipart_framing_contains_boundary_and_ranges() {
        let parts = vec![(ByteRange { start: 0, end: 99 }, Bytes::from(vec![b'a'; 100]))];
        let framed = frame_multipart(&parts, "text/plain", 1000);
        let text = String::from_utf8_lossy(&framed);
        assert!(text.contains("--RANGE_SEPARATOR"));
        assert!(text.contains("Content-Range: bytes 0-99/1000"));
    }

    #[test]
    fn etag_is_deterministic_and_quoted() {
        let now = chrono::Utc::now();
        let a = generate_etag("2026/07/27/10/file.bin", 1000, now);
        let b = generate_etag("2026/07/27/10/file.bin", 1000, now);
        assert_eq!(a, b);
        assert!(a.starts_with('"') && a.ends_with('"'));
    }

    #[test]
    fn not_modified_since_parses_rfc2822() {
        let modified = chrono::Utc::now() - chrono::Duration::hours(1);
        assert!(not_modified_since(Some(&modified_rfc2822(modified + chrono::Duration::hours(2))), modified));
        assert!(!not_modified_since(Some(&modified_rfc2822(modified - chrono::Duration::hours(2))), modified));
    }

    fn modified_rfc2822(t: chrono::DateTime<chrono::Utc>) -> String {
        t.to_rfc2822()
    }
}
