// ABOUTME: Card rendering for the victorycard application
// ABOUTME: Evaluates each card's template with markdown, icon and embed helpers injected

use crate::deck::{scalar_to_string, CardRecord, DeckSpec};
use crate::errors::CardRenderError;
use crate::markup::{MarkdownMode, MarkupEngine};
use crate::utils;
use log::{debug, error, info};
use minijinja::value::Value;
use minijinja::{AutoEscape, Environment, Error, ErrorKind, UndefinedBehavior};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Length of the hex version marker attached to each card block.
const VERSION_LEN: usize = 12;

/// One card's HTML, repeated `copies` times in the deck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCard {
    pub id: String,
    pub html: String,
    pub copies: u32,
}

impl RenderedCard {
    /// Content-derived marker: identical fragments always get identical markers.
    pub fn version(&self) -> String {
        let mut digest = utils::sha256_hex(self.html.as_bytes());
        digest.truncate(VERSION_LEN);
        digest
    }
}

#[derive(Debug, Default)]
pub struct RenderOutcome {
    pub cards: Vec<RenderedCard>,
    pub failures: Vec<CardRenderError>,
}

/// Template environment for one build.
///
/// Every file the templates load (card templates, includes, embedded
/// files) is recorded so the watcher knows what the deck depends on.
pub struct CardRenderer {
    env: Environment<'static>,
    root: PathBuf,
    loaded: Arc<Mutex<BTreeSet<PathBuf>>>,
    deck: Value,
}

impl CardRenderer {
    pub fn new(spec: &DeckSpec, markup: Arc<MarkupEngine>) -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_undefined_behavior(UndefinedBehavior::Lenient);

        let loaded = Arc::new(Mutex::new(BTreeSet::new()));
        {
            let root = spec.root.clone();
            let loaded = loaded.clone();
            env.set_loader(move |name| load_template(&root, name, &loaded));
        }

        for mode in MarkdownMode::ALL {
            let markup = markup.clone();
            env.add_filter(mode.filter_name(), move |value: Value| {
                markdown_filter(&markup, &value, mode)
            });
        }
        {
            let markup = markup.clone();
            let mode = spec.general.markdown.default_mode;
            env.add_filter("markdown", move |value: Value| {
                markdown_filter(&markup, &value, mode)
            });
        }

        {
            let markup = markup.clone();
            env.add_function("icon", move |name: Value| {
                Value::from_safe_string(markup.icons().element(&value_text(&name)))
            });
        }
        env.add_filter("icon_src", move |name: Value| {
            markup
                .icons()
                .lookup(&value_text(&name))
                .unwrap_or_default()
                .to_string()
        });

        env.add_function("embed", embedder(&spec.root, &loaded));
        env.add_filter("embed", embedder(&spec.root, &loaded));

        let deck = Value::from_serialize(&BTreeMap::from([
            ("title", spec.title.clone().unwrap_or_default()),
            ("name", spec.general.name.clone()),
        ]));

        Self {
            env,
            root: spec.root.clone(),
            loaded,
            deck,
        }
    }

    /// Render every card with `copies > 0`. Failures are collected, never fatal.
    pub fn render_all(&self, spec: &DeckSpec) -> RenderOutcome {
        let mut outcome = RenderOutcome::default();
        for record in spec.printed_cards() {
            match self.render_card(record) {
                Ok(card) => outcome.cards.push(card),
                Err(e) => {
                    error!("{}", e);
                    outcome.failures.push(e);
                }
            }
        }
        let skipped = spec.cards.len() - spec.printed_cards().count();
        info!(
            "Rendered {} cards ({} failed, {} with zero copies)",
            outcome.cards.len(),
            outcome.failures.len(),
            skipped
        );
        outcome
    }

    pub fn render_card(&self, record: &CardRecord) -> Result<RenderedCard, CardRenderError> {
        if !record.template.is_file() {
            return Err(CardRenderError::MissingTemplate {
                card: record.label(),
                path: record.template.clone(),
            });
        }

        let name = self.template_name(&record.template);
        debug!("Rendering card {} with template {}", record.id, name);
        let template_error = |source: Error| CardRenderError::Template {
            card: record.label(),
            source,
        };

        let template = self.env.get_template(&name).map_err(template_error)?;

        let mut context: BTreeMap<String, Value> = record
            .fields
            .iter()
            .filter_map(|(key, value)| Some((scalar_to_string(key)?, Value::from_serialize(value))))
            .collect();
        context.insert("deck".to_string(), self.deck.clone());

        let html = template.render(&context).map_err(template_error)?;

        Ok(RenderedCard {
            id: record.id.clone(),
            html: html.trim().to_string(),
            copies: record.copies,
        })
    }

    /// Files loaded through the template environment so far.
    pub fn dependencies(&self) -> BTreeSet<PathBuf> {
        self.loaded.lock().clone()
    }

    fn template_name(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => utils::to_url_path(relative),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

fn load_template(
    root: &Path,
    name: &str,
    loaded: &Mutex<BTreeSet<PathBuf>>,
) -> Result<Option<String>, Error> {
    let path = utils::resolve_path(root, Path::new(name));
    match fs::read_to_string(&path) {
        Ok(source) => {
            loaded.lock().insert(path);
            Ok(Some(source))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("could not read template {:?}", path),
        )
        .with_source(e)),
    }
}

fn embedder(
    root: &Path,
    loaded: &Arc<Mutex<BTreeSet<PathBuf>>>,
) -> impl Fn(Value) -> Result<Value, Error> + Send + Sync + 'static {
    let root = root.to_path_buf();
    let loaded = loaded.clone();
    move |path: Value| embed_file(&root, &value_text(&path), &loaded)
}

fn embed_file(root: &Path, name: &str, loaded: &Mutex<BTreeSet<PathBuf>>) -> Result<Value, Error> {
    let path = utils::resolve_path(root, Path::new(name));
    let content = fs::read_to_string(&path).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("could not embed {:?}", path),
        )
        .with_source(e)
    })?;
    loaded.lock().insert(path);
    Ok(Value::from_safe_string(content))
}

fn markdown_filter(markup: &MarkupEngine, value: &Value, mode: MarkdownMode) -> Value {
    Value::from_safe_string(markup.render(&value_text(value), mode))
}

/// Text of a template value; undefined and none render as nothing.
fn value_text(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
