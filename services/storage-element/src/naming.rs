//! Deterministic storage filename and hierarchical path recipe (spec
//! §4.1 step 1-2).

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Sanitize a user-supplied filename stem to `[A-Za-z0-9._-]`, truncating
/// (while preserving the extension) so the whole name stays reasonable.
pub fn sanitize_base(original_filename: &str) -> (String, String) {
    const MAX_STEM_LEN: usize = 80;

    let (stem, ext) = match original_filename.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && !stem.is_empty() => (stem, ext),
        _ => (original_filename, ""),
    };

    let mut sanitized: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        sanitized = "file".to_string();
    }
    sanitized.truncate(MAX_STEM_LEN);

    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    (sanitized, ext)
}

/// Build the on-disk storage filename:
/// `{sanitized-base}_{uploader}_{ISO8601-ms}_{short-random}.{ext}`.
pub fn storage_filename(original_filename: &str, uploader: &str, now: DateTime<Utc>) -> String {
    let (base, ext) = sanitize_base(original_filename);
    let uploader_safe: String = uploader
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let timestamp = now.format("%Y%m%dT%H%M%S%3f");
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    if ext.is_empty() {
        format!("{base}_{uploader_safe}_{timestamp}_{random}")
    } else {
        format!("{base}_{uploader_safe}_{timestamp}_{random}.{ext}")
    }
}

/// The hierarchical `YYYY/MM/DD/HH` directory a file lands under.
pub fn hierarchical_dir(now: DateTime<Utc>) -> String {
    now.format("%Y/%m/%d/%H").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitizes_unsafe_characters() {
        let (base, ext) = sanitize_base("my report (final)!.PDF");
        assert_eq!(ext, "pdf");
        assert!(base.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'));
    }

    #[test]
    fn handles_missing_extension() {
        let (base, ext) = sanitize_base("README");
        assert_eq!(base, "README");
        assert_eq!(ext, "");
    }

    #[test]
    fn storage_filename_embeds_timestamp_and_uploader() {
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 30, 0).unwrap();
        let name = storage_filename("report.pdf", "alice", now);
        assert!(name.starts_with("report_alice_20260727T103000"));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn hierarchical_dir_is_zero_padded() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        assert_eq!(hierarchical_dir(now), "2026/01/05/03");
    }
}
