// ABOUTME: Resource handling for the victorycard application
// ABOUTME: Embeds or links local stylesheets, links remote ones by URL

use crate::errors::{DeckError, Result};
use crate::utils;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Represents a resource file that can be either local or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    pub path: String,
    pub is_remote: bool,
}

impl ResourceFile {
    /// Create a new ResourceFile from a path string.
    /// The path can be either a local file path or a URL.
    pub fn new(path: &str) -> Self {
        let is_remote = path.starts_with("http://") || path.starts_with("https://");
        Self {
            path: path.to_string(),
            is_remote,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.to_string_lossy())
    }

    /// Read the content of a local resource. Remote resources are never fetched.
    pub fn content(&self) -> Result<String> {
        if self.is_remote {
            return Err(DeckError::ValidationError(format!(
                "Remote resource cannot be embedded: {}",
                self.path
            )));
        }
        info!("Reading local resource: {}", self.path);
        let path = Path::new(&self.path);
        if !path.exists() {
            return Err(DeckError::PathNotFoundError(path.to_path_buf()));
        }
        fs::read_to_string(path).map_err(DeckError::FileReadError)
    }

    /// Generate a stylesheet tag, either embedding or linking the content.
    ///
    /// Links to local files are made relative to `base_dir` (the directory of
    /// the output document) when the file lives below it, and are `file://`
    /// URLs otherwise.
    pub fn stylesheet_tag(&self, embed: bool, base_dir: &Path) -> Result<String> {
        if self.is_remote || !embed {
            Ok(format!(
                r#"<link rel="stylesheet" href="{}">"#,
                utils::escape_html(&self.href(base_dir))
            ))
        } else {
            Ok(format!("<style>\n{}\n</style>", self.content()?))
        }
    }

    /// Where a link to this resource should point.
    pub fn href(&self, base_dir: &Path) -> String {
        if self.is_remote {
            return self.path.clone();
        }
        let path = PathBuf::from(&self.path);
        match path.strip_prefix(base_dir) {
            Ok(relative) if path.is_absolute() => utils::to_url_path(relative),
            _ if path.is_relative() => utils::to_url_path(&path),
            _ => Url::from_file_path(&path)
                .map(String::from)
                .unwrap_or_else(|_| self.path.clone()),
        }
    }
}
