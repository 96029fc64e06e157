// ABOUTME: Deck document assembly for the victorycard application
// ABOUTME: Wraps rendered cards in the deck page with styles, header and client script

use crate::cards::RenderedCard;
use crate::deck::DeckSpec;
use crate::errors::{DeckError, Result};
use crate::resources::ResourceFile;
use crate::utils::{self, escape_html};
use log::{info, warn};
use std::fs;
use std::path::Path;

/// Styles every deck needs regardless of its own stylesheet.
const BASE_STYLE: &str = r#".deck { display: flex; flex-wrap: wrap; align-items: flex-start; gap: var(--card-spacing); }
.card { break-inside: avoid; page-break-inside: avoid; }
img.__icon { height: 1em; vertical-align: middle; }
s.__icon { text-decoration: none; font-size: 0.8em; padding: 0 0.2em; border: 1px dashed currentColor; border-radius: 0.2em; }
del.__icon-struck { text-decoration: line-through; background: rgba(220, 0, 0, 0.15); border: 1px solid rgba(220, 0, 0, 0.6); border-radius: 0.2em; padding: 0 0.1em; }
.nowrap { white-space: nowrap; }"#;

/// Icon path rewriting for `file:` pages and shrink-to-fit autosizing.
const CLIENT_SCRIPT: &str = r#"(function () {
  if (location.protocol === 'file:') {
    document.querySelectorAll('img.__icon').forEach(function (img) {
      var src = img.getAttribute('src');
      if (src && src.charAt(0) === '/' && src.charAt(1) !== '/') {
        img.setAttribute('src', src.slice(1));
      }
    });
  }
  function fit(el) {
    var size = parseFloat(window.getComputedStyle(el).fontSize);
    while (el.scrollWidth > el.clientWidth && size > 4) {
      size -= 0.5;
      el.style.fontSize = size + 'px';
    }
  }
  function autosize(root) {
    (root || document).querySelectorAll('.autosize, [data-autosize]').forEach(fit);
  }
  window.victorycard = { autosize: autosize };
  if (document.readyState === 'loading') {
    document.addEventListener('DOMContentLoaded', function () { autosize(); });
  } else {
    autosize();
  }
})();"#;

/// The assembled deck page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub html: String,
    /// Number of card blocks, copies included.
    pub blocks: usize,
}

/// Assemble the deck document from rendered cards.
///
/// Each card is emitted `copies` times in a row, in deck order.
pub fn assemble(
    spec: &DeckSpec,
    cards: &[RenderedCard],
    auto_reload_script: Option<&str>,
) -> Result<Document> {
    info!("Assembling deck {:?}", spec.source);

    let mut html_doc = String::from("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html_doc.push_str("<meta charset=\"UTF-8\">\n");
    if let Some(title) = &spec.title {
        html_doc.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    }
    html_doc.push_str(&format!(
        "<style>\n:root {{ --card-spacing: {}; }}\n{}\n</style>\n",
        spec.general.card_spacing, BASE_STYLE
    ));

    let base_dir = spec.general.output_path.parent().unwrap_or(spec.root.as_path());
    let stylesheet = ResourceFile::from_path(&spec.general.stylesheet_path);
    match stylesheet.stylesheet_tag(spec.general.embed_styles, base_dir) {
        Ok(tag) => {
            html_doc.push_str(&tag);
            html_doc.push('\n');
        }
        // Continue without the stylesheet rather than failing the deck.
        Err(e) => warn!("Failed to include stylesheet {}: {}", stylesheet.path, e),
    }

    if let Some(header) = &spec.general.header_path {
        match fs::read_to_string(header) {
            Ok(content) => {
                html_doc.push_str(&content);
                if !content.ends_with('\n') {
                    html_doc.push('\n');
                }
            }
            Err(e) => warn!("Failed to include header {:?}: {}", header, e),
        }
    }

    html_doc.push_str("</head>\n<body>\n<div class=\"deck\">\n");

    let mut blocks = 0;
    for card in cards {
        let version = card.version();
        for _ in 0..card.copies {
            html_doc.push_str(&format!(
                "<div class=\"card\" data-card=\"{}\" data-version=\"{}\">\n{}\n</div>\n",
                escape_html(&card.id),
                version,
                card.html
            ));
            blocks += 1;
        }
    }

    html_doc.push_str("</div>\n<script>\n");
    html_doc.push_str(CLIENT_SCRIPT);
    html_doc.push_str("\n</script>\n");

    if let Some(script) = auto_reload_script {
        html_doc.push_str(script);
        html_doc.push('\n');
    }

    html_doc.push_str("</body>\n</html>\n");

    Ok(Document {
        html: html_doc,
        blocks,
    })
}

/// Write the document, replacing any previous output only once it is complete.
pub fn write_html_to_file(html_content: &str, output_path: &Path) -> Result<()> {
    info!("Writing HTML to file: {:?}", output_path);

    utils::ensure_parent_directory_exists(output_path)?;

    let file_name = output_path
        .file_name()
        .ok_or_else(|| DeckError::HtmlError(format!("Invalid output path: {:?}", output_path)))?;
    let mut staging_name = file_name.to_os_string();
    staging_name.push(".partial");
    let staging = output_path.with_file_name(staging_name);

    fs::write(&staging, html_content).map_err(DeckError::FileReadError)?;
    fs::rename(&staging, output_path).map_err(DeckError::FileReadError)?;

    Ok(())
}
