// ABOUTME: Utility functions for the victorycard application
// ABOUTME: Path validation and probing, HTML escaping and content digests

use crate::errors::{DeckError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Validate that a file exists
pub fn validate_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(DeckError::PathNotFoundError(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(DeckError::ValidationError(format!(
            "Path is not a file: {:?}",
            path
        )));
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(DeckError::FileReadError)?;
    } else if !path.is_dir() {
        return Err(DeckError::ValidationError(format!(
            "Path exists but is not a directory: {:?}",
            path
        )));
    }
    Ok(())
}

/// Ensure a file's parent directory exists
pub fn ensure_parent_directory_exists(file_path: &Path) -> Result<()> {
    match file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_directory_exists(parent),
        _ => Ok(()),
    }
}

/// Get the absolute path
pub fn get_absolute_path(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| {
        DeckError::ValidationError(format!("Failed to get absolute path for {:?}: {}", path, e))
    })
}

/// Canonicalize when the path exists, otherwise join it onto `base`.
///
/// Paths that do not exist yet (a template the user has not written, an
/// output file) still need a stable absolute form for comparisons.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    fs::canonicalize(&joined).unwrap_or(joined)
}

/// Find the first `base + ext` that is a file.
///
/// A base that already carries an extension is returned unchanged; it is
/// assumed to name the file exactly.
pub fn find_working_ext(base: &Path, extensions: &[&str]) -> Option<PathBuf> {
    if base.extension().is_some() {
        return Some(base.to_path_buf());
    }
    extensions
        .iter()
        .map(|ext| with_suffix(base, ext))
        .find(|candidate| candidate.is_file())
}

/// Append `suffix` to the final component of `base` (`deck` + `.css` -> `deck.css`).
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut raw = base.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Escape text for use in HTML element content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Digest of whatever is at `path` right now.
///
/// Files hash their bytes, directories hash their sorted listing, and a
/// missing or unreadable path has no digest.
pub fn content_digest(path: &Path) -> Option<String> {
    if path.is_dir() {
        let mut names: Vec<String> = fs::read_dir(path)
            .ok()?
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Some(sha256_hex(names.join("\n").as_bytes()))
    } else {
        fs::read(path).ok().map(|bytes| sha256_hex(&bytes))
    }
}

/// Render a path with forward slashes, as used in URLs.
pub fn to_url_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
