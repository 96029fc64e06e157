// ABOUTME: Error types for the victorycard application
// ABOUTME: Separates fatal configuration errors from per-card and per-field recoverable ones

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a build. The previously written output is left alone.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read deck description {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed deck description {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Deck description {path:?} must be a mapping at the top level")]
    NotAMapping { path: PathBuf },

    #[error("Deck description {path:?} is missing required field '{field}'")]
    MissingRequiredField { path: PathBuf, field: String },

    #[error("Invalid value for '{field}' in {path:?}: {reason}")]
    InvalidField {
        path: PathBuf,
        field: String,
        reason: String,
    },

    #[error("Deck description {path:?} does not define any cards")]
    EmptyDeck { path: PathBuf },

    #[error("Cyclic extends: {}", format_chain(.chain))]
    CyclicExtends { chain: Vec<PathBuf> },
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A single card failed to render. The rest of the deck still renders.
#[derive(Error, Debug)]
pub enum CardRenderError {
    #[error("Card {card}: template not found: {path:?}")]
    MissingTemplate { card: String, path: PathBuf },

    #[error("Card {card}: {source}")]
    Template {
        card: String,
        #[source]
        source: minijinja::Error,
    },
}

impl CardRenderError {
    /// Label of the card that failed.
    pub fn card(&self) -> &str {
        match self {
            CardRenderError::MissingTemplate { card, .. } => card,
            CardRenderError::Template { card, .. } => card,
        }
    }
}

/// A field value that could not be interpreted; callers fall back to a default.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Malformed value for '{field}': {value}")]
pub struct MalformedFieldValue {
    pub field: String,
    pub value: String,
}

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("Failed to read file: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    PathNotFoundError(PathBuf),

    #[error("Input validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    CardRender(#[from] CardRenderError),

    #[error("HTML generation error: {0}")]
    HtmlError(String),

    #[error("Watch error: {0}")]
    WatchError(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

pub type Result<T> = std::result::Result<T, DeckError>;
