// ABOUTME: Full deck rebuild for the victorycard application
// ABOUTME: Runs resolve, icon indexing, card rendering, assembly and output writing in order

use crate::cards::{CardRenderer, RenderedCard};
use crate::deck::{self, DeckSpec, HEADER_EXTENSIONS};
use crate::errors::{CardRenderError, Result};
use crate::html::{self, Document};
use crate::icons::IconIndex;
use crate::markup::MarkupEngine;
use crate::resources::ResourceFile;
use crate::utils;
use log::{info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Script appended to the page, used by the live-reload server.
    pub reload_script: Option<String>,
}

/// Everything one successful rebuild produced.
#[derive(Debug)]
pub struct BuildReport {
    pub spec: DeckSpec,
    pub output: PathBuf,
    pub cards: Vec<RenderedCard>,
    pub failures: Vec<CardRenderError>,
    pub document: Document,
    /// Files whose change should trigger another rebuild.
    pub dependencies: BTreeSet<PathBuf>,
    /// Directory whose icon images should trigger another rebuild.
    pub icon_dir: Option<PathBuf>,
}

/// Rebuild the deck described at `path` and write its document.
///
/// Configuration errors return before anything is written, so the previous
/// output stays in place. Card failures are reported in the result.
pub fn build_deck(path: &Path, options: &BuildOptions) -> Result<BuildReport> {
    let spec = deck::resolve(path)?;

    let icons = match &spec.general.icon_path {
        Some(dir) => IconIndex::build(dir, &spec.root).unwrap_or_else(|e| {
            warn!("Failed to index icons in {:?}: {}", dir, e);
            IconIndex::empty()
        }),
        None => IconIndex::empty(),
    };
    let markup = Arc::new(MarkupEngine::new(&spec.general.markdown, Arc::new(icons)));
    let renderer = CardRenderer::new(&spec, markup);
    let outcome = renderer.render_all(&spec);

    let document = html::assemble(&spec, &outcome.cards, options.reload_script.as_deref())?;
    html::write_html_to_file(&document.html, &spec.general.output_path)?;
    info!(
        "Wrote {} card blocks to {:?}",
        document.blocks, spec.general.output_path
    );

    let mut dependencies = static_dependencies(&spec);
    dependencies.extend(renderer.dependencies());

    Ok(BuildReport {
        output: spec.general.output_path.clone(),
        cards: outcome.cards,
        failures: outcome.failures,
        document,
        dependencies,
        icon_dir: spec.general.icon_path.clone(),
        spec,
    })
}

/// Dependencies known from the resolved spec alone.
///
/// Card templates are included even when missing so that creating one
/// triggers a rebuild; the same goes for the header candidates.
pub fn static_dependencies(spec: &DeckSpec) -> BTreeSet<PathBuf> {
    let mut deps: BTreeSet<PathBuf> = spec.sources.iter().cloned().collect();
    deps.extend(spec.cards.iter().map(|card| card.template.clone()));

    let stylesheet = ResourceFile::from_path(&spec.general.stylesheet_path);
    if !stylesheet.is_remote {
        deps.insert(spec.general.stylesheet_path.clone());
    }

    match &spec.general.header_path {
        Some(header) => {
            deps.insert(header.clone());
        }
        None => {
            let stem = spec.root.join(&spec.general.name);
            deps.extend(
                HEADER_EXTENSIONS
                    .iter()
                    .map(|ext| utils::with_suffix(&stem, ext)),
            );
        }
    }
    deps
}
