// ABOUTME: Deck description loading for the victorycard application
// ABOUTME: Resolves `extends` inheritance, derives default paths and builds card records

use crate::errors::{ConfigError, MalformedFieldValue};
use crate::markup::MarkdownMode;
use crate::utils;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Ordered, dynamically keyed card data.
pub type Fields = Mapping;

/// Candidate suffixes for card templates, most specific first.
pub const TEMPLATE_EXTENSIONS: &[&str] = &[
    ".html.jinja2",
    ".html.jinja",
    ".html.j2",
    ".jinja2",
    ".j2",
    ".html",
];
pub const STYLESHEET_EXTENSIONS: &[&str] = &[".css"];
pub const HEADER_EXTENSIONS: &[&str] = &[".html.header", ".header.html"];

const DEFAULT_CARD_SPACING: &str = "2pt";

/// Files a deck can derive from its own path when `general` omits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubSource {
    Template,
    Stylesheet,
    Header,
    Output,
}

impl SubSource {
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            SubSource::Template => TEMPLATE_EXTENSIONS,
            SubSource::Stylesheet => STYLESHEET_EXTENSIONS,
            SubSource::Header => HEADER_EXTENSIONS,
            SubSource::Output => &[".html"],
        }
    }
}

/// Derive the default path of `field` for a deck living in `dir` with base name `base`.
///
/// Candidates are probed in order and the first existing file wins. When
/// none exists, required sources fall back to their first candidate and
/// optional ones (the header) to `None`.
pub fn default_sub_source(dir: &Path, base: &str, field: SubSource) -> Option<PathBuf> {
    let stem = dir.join(base);
    let candidates = field.candidates();
    if field == SubSource::Output {
        return Some(utils::with_suffix(&stem, candidates[0]));
    }
    match utils::find_working_ext(&stem, candidates) {
        Some(found) => Some(found),
        None if field == SubSource::Header => None,
        None => Some(utils::with_suffix(&stem, candidates[0])),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MarkdownConfig {
    pub default_mode: MarkdownMode,
    pub extensions: BTreeSet<String>,
    pub extension_configs: BTreeMap<String, Mapping>,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            default_mode: MarkdownMode::Auto,
            extensions: BTreeSet::from(["smarty".to_string()]),
            extension_configs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralConfig {
    /// Base name used to derive default paths.
    pub name: String,
    pub template_path: PathBuf,
    pub stylesheet_path: PathBuf,
    pub embed_styles: bool,
    pub card_spacing: String,
    pub header_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub icon_path: Option<PathBuf>,
    pub markdown: MarkdownConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardRecord {
    /// `card1`, `card2`, ... for sequences, the key for mappings.
    pub id: String,
    pub fields: Fields,
    pub template: PathBuf,
    pub copies: u32,
}

impl CardRecord {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Identity used in diagnostics: the id, plus the card's name when it has one.
    pub fn label(&self) -> String {
        let name = ["name", "title"]
            .iter()
            .find_map(|key| self.field(key).and_then(scalar_to_string));
        match name {
            Some(name) => format!("{} ({})", self.id, name),
            None => self.id.clone(),
        }
    }
}

/// A fully resolved deck, immutable for the duration of one build.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckSpec {
    /// Absolute path of the deck description that was resolved.
    pub source: PathBuf,
    /// Directory every relative path is resolved against.
    pub root: PathBuf,
    /// Every description file read while resolving, leaf first.
    pub sources: Vec<PathBuf>,
    pub title: Option<String>,
    pub general: GeneralConfig,
    pub defaults: Fields,
    pub cards: Vec<CardRecord>,
}

impl DeckSpec {
    /// Cards that produce output.
    pub fn printed_cards(&self) -> impl Iterator<Item = &CardRecord> {
        self.cards.iter().filter(|card| card.copies > 0)
    }
}

/// Load the deck description at `path` and resolve it completely.
pub fn resolve(path: &Path) -> Result<DeckSpec, ConfigError> {
    let source = fs::canonicalize(path).map_err(|e| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("Resolving deck description {:?}", source);

    let mut chain = Vec::new();
    let mut sources = Vec::new();
    let document = load_with_extends(&source, &mut chain, &mut sources)?;

    interpret(source, document, sources)
}

/// Deep-merge `over` onto `base`.
///
/// Mappings merge key by key, sequences concatenate (base first), anything
/// else is replaced by the override.
pub fn merge(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Mapping(mut base), Value::Mapping(over)) => {
            merge_mapping(&mut base, over);
            Value::Mapping(base)
        }
        (Value::Sequence(mut base), Value::Sequence(over)) => {
            base.extend(over);
            Value::Sequence(base)
        }
        (_, over) => over,
    }
}

fn merge_mapping(base: &mut Mapping, over: Mapping) {
    for (key, value) in over {
        match base.get_mut(&key) {
            Some(slot) => {
                let previous = std::mem::replace(slot, Value::Null);
                *slot = merge(previous, value);
            }
            None => {
                base.insert(key, value);
            }
        }
    }
}

fn load_with_extends(
    path: &Path,
    chain: &mut Vec<PathBuf>,
    sources: &mut Vec<PathBuf>,
) -> Result<Mapping, ConfigError> {
    if chain.iter().any(|seen| seen == path) {
        let mut cycle = chain.clone();
        cycle.push(path.to_path_buf());
        return Err(ConfigError::CyclicExtends { chain: cycle });
    }

    let text = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut document = match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Mapping(mapping)) => mapping,
        Ok(Value::Null) => Mapping::new(),
        Ok(_) => {
            return Err(ConfigError::NotAMapping {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(ConfigError::Malformed {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    if !sources.iter().any(|seen| seen == path) {
        sources.push(path.to_path_buf());
    }

    let parents = match document.remove("extends") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(parent)) => vec![parent],
        Some(Value::Sequence(list)) => list
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(path, "extends", "entries must be paths"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid(path, "extends", "expected a path or a list of paths")),
    };
    if parents.is_empty() {
        return Ok(document);
    }

    chain.push(path.to_path_buf());
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut merged = Mapping::new();
    for parent in parents {
        let parent_path = dir.join(&parent);
        let parent_path = fs::canonicalize(&parent_path).map_err(|e| ConfigError::Unreadable {
            path: parent_path.clone(),
            source: e,
        })?;
        debug!("{:?} extends {:?}", path, parent_path);
        let base = load_with_extends(&parent_path, chain, sources)?;
        merge_mapping(&mut merged, base);
    }
    chain.pop();

    merge_mapping(&mut merged, document);
    Ok(merged)
}

fn interpret(
    source: PathBuf,
    mut document: Mapping,
    sources: Vec<PathBuf>,
) -> Result<DeckSpec, ConfigError> {
    let root = source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let title = document.get("title").and_then(scalar_to_string);

    let general = match document.remove("general") {
        None | Some(Value::Null) => Mapping::new(),
        Some(Value::Mapping(general)) => general,
        Some(_) => return Err(invalid(&source, "general", "expected a mapping")),
    };
    let general = interpret_general(&source, &root, &general)?;

    let mut defaults = Fields::new();
    defaults.insert(Value::from("copies"), Value::from(1));
    match get_first(&document, &["defaults", "default"]) {
        None | Some(Value::Null) => {}
        Some(Value::Mapping(mapping)) => {
            for (key, value) in mapping {
                defaults.insert(key.clone(), value.clone());
            }
        }
        Some(_) => return Err(invalid(&source, "defaults", "expected a mapping")),
    }

    let entries: Vec<(String, Mapping)> = match document.get("cards") {
        None => {
            return Err(ConfigError::MissingRequiredField {
                path: source,
                field: "cards".to_string(),
            })
        }
        Some(Value::Sequence(list)) => list
            .iter()
            .enumerate()
            .map(|(index, card)| Ok((format!("card{}", index + 1), card_mapping(&source, card)?)))
            .collect::<Result<_, ConfigError>>()?,
        Some(Value::Mapping(keyed)) => keyed
            .iter()
            .map(|(key, card)| {
                let id = scalar_to_string(key)
                    .ok_or_else(|| invalid(&source, "cards", "card keys must be scalars"))?;
                Ok((id, card_mapping(&source, card)?))
            })
            .collect::<Result<_, ConfigError>>()?,
        Some(Value::Null) => Vec::new(),
        Some(_) => return Err(invalid(&source, "cards", "expected a list or a mapping")),
    };
    if entries.is_empty() {
        return Err(ConfigError::EmptyDeck { path: source });
    }

    let cards = entries
        .into_iter()
        .map(|(id, card)| build_card(&root, &general, &defaults, id, card))
        .collect::<Vec<_>>();

    info!(
        "Resolved deck {:?}: {} cards from {} source file(s)",
        source,
        cards.len(),
        sources.len()
    );

    Ok(DeckSpec {
        source,
        root,
        sources,
        title,
        general,
        defaults,
        cards,
    })
}

fn interpret_general(
    source: &Path,
    root: &Path,
    general: &Mapping,
) -> Result<GeneralConfig, ConfigError> {
    let name = match get_first(general, &["name"]) {
        Some(value) => {
            scalar_to_string(value).ok_or_else(|| invalid(source, "name", "expected a string"))?
        }
        None => source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "deck".to_string()),
    };

    let path_field = |field: &str, aliases: &[&str]| -> Result<Option<PathBuf>, ConfigError> {
        match get_first(general, aliases) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => Ok(Some(utils::resolve_path(root, Path::new(raw)))),
            Some(_) => Err(invalid(source, field, "expected a path")),
        }
    };

    let output_path = match path_field("output", &["output", "destination", "dest"])? {
        Some(explicit) => explicit,
        None => derived(root, &name, SubSource::Output),
    };
    let template_path = match path_field("template", &["template"])? {
        Some(explicit) => utils::find_working_ext(&explicit, TEMPLATE_EXTENSIONS)
            .unwrap_or_else(|| utils::with_suffix(&explicit, TEMPLATE_EXTENSIONS[0])),
        None => derived(root, &name, SubSource::Template),
    };
    // The output is rewritten on every build and can never be a template.
    let template_path = if template_path == output_path {
        warn!(
            "Template {:?} is also the output file; expecting {}{} instead",
            template_path, name, TEMPLATE_EXTENSIONS[0]
        );
        utils::with_suffix(&root.join(&name), TEMPLATE_EXTENSIONS[0])
    } else {
        template_path
    };
    // Stylesheets may be remote, so they are kept verbatim when they look like URLs.
    let stylesheet_path = match get_first(general, &["stylesheet", "styles", "css", "style"]) {
        Some(Value::String(raw)) if raw.starts_with("http://") || raw.starts_with("https://") => {
            PathBuf::from(raw)
        }
        _ => match path_field("stylesheet", &["stylesheet", "styles", "css", "style"])? {
            Some(explicit) => utils::find_working_ext(&explicit, STYLESHEET_EXTENSIONS)
                .unwrap_or(explicit),
            None => derived(root, &name, SubSource::Stylesheet),
        },
    };
    let header_path = match path_field("header", &["header"])? {
        Some(explicit) => Some(explicit),
        None => default_sub_source(root, &name, SubSource::Header),
    };
    let icon_path = match path_field("icon_path", &["icon_path", "icon_dir", "icon_root"])? {
        Some(explicit) => Some(explicit),
        None => Some(root.to_path_buf()),
    };

    let embed_styles = match get_first(general, &["embed_styles", "embed"]) {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => return Err(invalid(source, "embed_styles", "expected true or false")),
    };
    let card_spacing = match get_first(general, &["card_spacing", "spacing"]) {
        None | Some(Value::Null) => DEFAULT_CARD_SPACING.to_string(),
        Some(value) => scalar_to_string(value)
            .ok_or_else(|| invalid(source, "card_spacing", "expected a CSS length"))?,
    };
    let markdown = match get_first(general, &["markdown"]) {
        None | Some(Value::Null) => MarkdownConfig::default(),
        Some(value) => serde_yaml::from_value(value.clone())
            .map_err(|e| invalid(source, "markdown", &e.to_string()))?,
    };

    Ok(GeneralConfig {
        name,
        template_path,
        stylesheet_path,
        embed_styles,
        card_spacing,
        header_path,
        output_path,
        icon_path,
        markdown,
    })
}

fn derived(root: &Path, name: &str, field: SubSource) -> PathBuf {
    default_sub_source(root, name, field)
        .unwrap_or_else(|| utils::with_suffix(&root.join(name), field.candidates()[0]))
}

fn build_card(
    root: &Path,
    general: &GeneralConfig,
    defaults: &Fields,
    id: String,
    card: Mapping,
) -> CardRecord {
    let mut fields = defaults.clone();
    for (key, value) in card {
        fields.insert(key, value);
    }
    fields.insert(Value::from("_id"), Value::from(id.clone()));

    let template = match fields.get("template") {
        None | Some(Value::Null) => general.template_path.clone(),
        Some(Value::String(raw)) => {
            let base = utils::resolve_path(root, Path::new(raw));
            utils::find_working_ext(&base, TEMPLATE_EXTENSIONS)
                .unwrap_or_else(|| utils::with_suffix(&base, TEMPLATE_EXTENSIONS[0]))
        }
        Some(other) => {
            warn!(
                "Card {}: ignoring template {:?}, expected a path",
                id, other
            );
            general.template_path.clone()
        }
    };

    let copies = match parse_copies(fields.get("copies")) {
        Ok(copies) => copies,
        Err(e) => {
            warn!("Card {}: {}; using 1", id, e);
            1
        }
    };

    CardRecord {
        id,
        fields,
        template,
        copies,
    }
}

/// Interpret a `copies` value. Absent means one copy.
pub fn parse_copies(value: Option<&Value>) -> Result<u32, MalformedFieldValue> {
    let malformed = |shown: String| MalformedFieldValue {
        field: "copies".to_string(),
        value: shown,
    };
    match value {
        None | Some(Value::Null) => Ok(1),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed(n.to_string())),
        Some(Value::String(s)) => s.trim().parse::<u32>().map_err(|_| malformed(s.clone())),
        Some(other) => Err(malformed(format!("{:?}", other))),
    }
}

fn card_mapping(source: &Path, card: &Value) -> Result<Mapping, ConfigError> {
    match card {
        Value::Mapping(mapping) => Ok(mapping.clone()),
        Value::Null => Ok(Mapping::new()),
        _ => Err(invalid(source, "cards", "each card must be a mapping")),
    }
}

fn get_first<'a>(mapping: &'a Mapping, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| mapping.get(*key))
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn invalid(path: &Path, field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_path_buf(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
