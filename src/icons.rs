// ABOUTME: Icon lookup for the victorycard application
// ABOUTME: Indexes an icon directory by file stem and renders icon elements with placeholder fallback

use crate::errors::{DeckError, Result};
use crate::utils::{self, escape_html};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Image formats recognised as icons, in lookup priority order.
pub const ICON_EXTENSIONS: &[&str] = &["svg", "png", "gif", "bmp", "webp", "jpeg", "jpg"];

pub const ICON_CLASS: &str = "__icon";

/// Result of resolving an icon name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconRef<'a> {
    Found(&'a str),
    Placeholder,
}

/// Icon name -> asset path, built once per build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IconIndex {
    dir: Option<PathBuf>,
    icons: BTreeMap<String, String>,
}

impl IconIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scan `icon_dir` (non-recursively) for images.
    ///
    /// Asset paths are site-absolute (`/icons/fire.svg`) relative to `root`,
    /// the directory the deck is served from. Icons outside `root` get
    /// `file://` URLs instead. A missing directory yields an empty index.
    pub fn build(icon_dir: &Path, root: &Path) -> Result<Self> {
        if !icon_dir.is_dir() {
            warn!("Icon directory {:?} does not exist; no icons available", icon_dir);
            return Ok(Self {
                dir: Some(icon_dir.to_path_buf()),
                icons: BTreeMap::new(),
            });
        }

        let pattern = format!("{}/*", glob::Pattern::escape(&icon_dir.to_string_lossy()));
        let mut found: BTreeMap<String, (usize, PathBuf)> = BTreeMap::new();
        for entry in glob::glob(&pattern)
            .map_err(|e| DeckError::ValidationError(format!("Invalid icon directory: {}", e)))?
        {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable icon entry: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) else {
                continue;
            };
            let ext = ext.to_string_lossy().to_lowercase();
            let Some(priority) = ICON_EXTENSIONS.iter().position(|known| *known == ext) else {
                continue;
            };
            let stem = stem.to_string_lossy().into_owned();
            match found.get(&stem) {
                Some((existing, _)) if *existing <= priority => {}
                _ => {
                    found.insert(stem, (priority, path));
                }
            }
        }

        let icons = found
            .into_iter()
            .map(|(name, (_, path))| {
                let asset = asset_path(&path, root);
                debug!("Icon {:?} -> {}", name, asset);
                (name, asset)
            })
            .collect::<BTreeMap<_, _>>();
        info!("Indexed {} icons in {:?}", icons.len(), icon_dir);

        Ok(Self {
            dir: Some(icon_dir.to_path_buf()),
            icons,
        })
    }

    /// Build an index directly from name/asset pairs.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            dir: None,
            icons: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Directory the index was built from, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }

    /// Exact, case-sensitive lookup without diagnostics.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.icons.get(name).map(String::as_str)
    }

    /// Resolve `name`, logging a warning and returning a placeholder on a miss.
    pub fn resolve(&self, name: &str) -> IconRef<'_> {
        match self.lookup(name) {
            Some(path) => IconRef::Found(path),
            None => {
                warn!("No icons found for {:?}. Using placeholder", name);
                IconRef::Placeholder
            }
        }
    }

    /// Standalone HTML element for `name`.
    pub fn element(&self, name: &str) -> String {
        match self.resolve(name) {
            IconRef::Found(path) => image_element(name, path),
            IconRef::Placeholder => placeholder_element(name),
        }
    }
}

pub fn image_element(name: &str, path: &str) -> String {
    format!(
        r#"<img class="{}" src="{}" alt="{}">"#,
        ICON_CLASS,
        escape_html(path),
        escape_html(name)
    )
}

pub fn placeholder_element(name: &str) -> String {
    format!(
        r#"<s class="{} __icon-missing">{}</s>"#,
        ICON_CLASS,
        escape_html(name)
    )
}

fn asset_path(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => format!("/{}", utils::to_url_path(relative)),
        Err(_) => Url::from_file_path(path)
            .map(String::from)
            .unwrap_or_else(|_| path.to_string_lossy().into_owned()),
    }
}
