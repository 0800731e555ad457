//! Filename derivation, sanitization, and collision-free path resolution.
//!
//! Suggested names come from callers (or the last URL path segment) and may
//! contain anything; everything written to the store goes through
//! [`sanitize_filename`] first.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

use super::constants::FALLBACK_FILENAME;

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters), rewrites dot-only segments,
/// and falls back to `unnamed` when nothing usable is left.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.trim_matches('_').is_empty() {
        return FALLBACK_FILENAME.to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Derives a filename from the last URL path segment (percent-decoded).
///
/// Returns `unnamed` when the URL has no usable path segment.
#[must_use]
pub fn filename_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.into()
        });
        return sanitize_filename(&decoded);
    }
    FALLBACK_FILENAME.to_string()
}

/// Resolves a path in `dir` that no existing entry occupies.
///
/// `file.pdf` is tried first, then `file_2.pdf`, `file_3.pdf`, ... Names in
/// `reserved` are treated as occupied even when nothing exists there yet.
pub async fn resolve_unique_path(dir: &Path, filename: &str, reserved: &[String]) -> PathBuf {
    let filename = sanitize_filename(filename);

    if !path_taken(dir, &filename, reserved).await {
        return dir.join(&filename);
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 2..10_000 {
        let candidate = format!("{stem}_{i}{ext}");
        if !path_taken(dir, &candidate, reserved).await {
            return dir.join(candidate);
        }
    }

    // Fallback (extremely unlikely)
    let nonce: u64 = rand::random();
    dir.join(format!("{stem}_{nonce:016x}{ext}"))
}

async fn path_taken(dir: &Path, name: &str, reserved: &[String]) -> bool {
    if reserved.iter().any(|r| r == name) {
        return true;
    }
    // symlink_metadata also sees dangling links, which rename would replace
    tokio::fs::symlink_metadata(dir.join(name)).await.is_ok()
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
