// ABOUTME: Markdown rendering for the victorycard application
// ABOUTME: Layers icon tokens, strikethrough, attributed spans and nowrap spans over comrak

use crate::deck::MarkdownConfig;
use crate::icons::{self, IconIndex, IconRef};
use crate::utils::escape_html;
use comrak::{markdown_to_html, ComrakOptions};
use log::warn;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

/// How paragraph containers are treated in rendered markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkdownMode {
    /// Keep the converter's paragraphs, even for a single line.
    Paragraph,
    /// Strip every paragraph container.
    Inline,
    /// Paragraphs only when the text spans several lines.
    #[default]
    Auto,
}

impl MarkdownMode {
    pub const ALL: [MarkdownMode; 3] = [
        MarkdownMode::Paragraph,
        MarkdownMode::Inline,
        MarkdownMode::Auto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MarkdownMode::Paragraph => "paragraph",
            MarkdownMode::Inline => "inline",
            MarkdownMode::Auto => "auto",
        }
    }

    /// Template filter name for this mode.
    pub fn filter_name(self) -> &'static str {
        match self {
            MarkdownMode::Paragraph => "md_paragraph",
            MarkdownMode::Inline => "md_inline",
            MarkdownMode::Auto => "md_auto",
        }
    }
}

impl fmt::Display for MarkdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkdownMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(MarkdownMode::Paragraph),
            "inline" => Ok(MarkdownMode::Inline),
            "auto" => Ok(MarkdownMode::Auto),
            other => Err(format!("unknown markdown mode '{}'", other)),
        }
    }
}

static INLINE_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\[(?:icon|i):(?P<bracket>[-\w]+)\]",
        r"|&(?P<entity>[-\w]+);",
        r"|\{(?P<attrs>(?:[#.][-\w]+)*)\}\[(?P<text>(?:[^\[\]]|\[[^\[\]]*\])*)\]",
        r"|~~(?P<struck>\S|\S.*?\S)~~",
        r"|\(\((?P<nowrap>.+?)\)\)",
    ))
    .expect("inline pattern is valid")
});

static ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([#.])([-\w]+)").expect("attribute pattern is valid"));

/// Places where the converter does not emit text as-is: raw HTML tags,
/// autolinks, image alt text and link destinations.
static LITERALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"<!--.*?-->",
        r"|</?[A-Za-z][-A-Za-z0-9]*(?:\s[^<>]*)?/?>",
        r"|<[A-Za-z][-A-Za-z0-9+.]*:[^<>\s]*>",
        r"|!\[[^\[\]]*\](?:\([^()\s](?:[^()]|\([^()]*\))*\))?",
        r"|\](?P<dest>\([^()\s](?:[^()]|\([^()]*\))*\))",
    ))
    .expect("literal pattern is valid")
});

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new("\u{E000}([0-9]+)\u{E001}").expect("token pattern is valid"));

/// Markdown renderer shared read-only by every card of a build.
#[derive(Debug, Clone)]
pub struct MarkupEngine {
    options: ComrakOptions,
    icons: Arc<IconIndex>,
}

impl MarkupEngine {
    pub fn new(config: &MarkdownConfig, icons: Arc<IconIndex>) -> Self {
        Self {
            options: comrak_options(config),
            icons,
        }
    }

    pub fn icons(&self) -> &IconIndex {
        &self.icons
    }

    pub fn render(&self, text: &str, mode: MarkdownMode) -> String {
        match mode {
            MarkdownMode::Paragraph => self.convert(text),
            MarkdownMode::Inline => strip_paragraphs(&self.convert(text)),
            MarkdownMode::Auto => {
                if text.trim().contains('\n') {
                    self.render(text, MarkdownMode::Paragraph)
                } else {
                    self.render(text, MarkdownMode::Inline)
                }
            }
        }
    }

    fn convert(&self, text: &str) -> String {
        let mut fragments = Vec::new();
        let mut source = String::with_capacity(text.len());
        for segment in split_code_segments(text) {
            match segment {
                Segment::Code(code) => source.push_str(code),
                Segment::Text(plain) => source.push_str(&self.expand(plain, &mut fragments).text),
            }
        }

        let html = markdown_to_html(&source, &self.options);
        let html = TOKEN.replace_all(&html, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| fragments.get(index))
                .cloned()
                .unwrap_or_default()
        });
        html.trim_end().to_string()
    }

    /// Replace custom inline syntax with placeholder tokens.
    ///
    /// The HTML behind each token is kept in `fragments` and substituted
    /// after conversion, so it never influences block structure.
    fn expand(&self, text: &str, fragments: &mut Vec<String>) -> Expanded {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut icons_seen = 0;
        let mut only_icons = true;

        let literals = literal_ranges(text);
        let mut pos = 0;

        while let Some(caps) = INLINE_PATTERNS.captures_at(text, pos) {
            let Some(whole) = caps.get(0) else { break };
            let start = whole.start();
            if is_escaped(text, start) || literals.iter().any(|range| range.contains(&start)) {
                pos = start + text[start..].chars().next().map_or(1, char::len_utf8);
                continue;
            }
            pos = whole.end();

            let between = &text[last..start];
            if !between.trim().is_empty() {
                only_icons = false;
            }
            out.push_str(between);
            last = whole.end();

            if let Some(name) = caps.name("bracket") {
                let html = match self.icons.resolve(name.as_str()) {
                    IconRef::Found(path) => icons::image_element(name.as_str(), path),
                    IconRef::Placeholder => icons::placeholder_element(name.as_str()),
                };
                out.push_str(&token(fragments, html));
                icons_seen += 1;
            } else if let Some(name) = caps.name("entity") {
                match self.icons.lookup(name.as_str()) {
                    Some(path) => {
                        out.push_str(&token(fragments, icons::image_element(name.as_str(), path)));
                        icons_seen += 1;
                    }
                    None => {
                        out.push_str(whole.as_str());
                        only_icons = false;
                    }
                }
            } else if let Some(inner) = caps.name("struck") {
                let inner = self.expand(inner.as_str(), fragments);
                let open = if inner.only_icons {
                    r#"<del class="__icon-struck">"#
                } else {
                    "<del>"
                };
                wrap(&mut out, fragments, open.to_string(), inner.text, "</del>");
                only_icons = false;
            } else if let Some(inner) = caps.name("text") {
                let attrs = caps.name("attrs").map_or("", |m| m.as_str());
                let inner = self.expand(inner.as_str(), fragments);
                wrap(&mut out, fragments, span_open(attrs), inner.text, "</span>");
                only_icons = false;
            } else if let Some(inner) = caps.name("nowrap") {
                let inner = self.expand(inner.as_str(), fragments);
                wrap(
                    &mut out,
                    fragments,
                    r#"<span class="nowrap">"#.to_string(),
                    inner.text,
                    "</span>",
                );
                only_icons = false;
            }
        }

        let rest = &text[last..];
        if !rest.trim().is_empty() {
            only_icons = false;
        }
        out.push_str(rest);

        Expanded {
            text: out,
            only_icons: only_icons && icons_seen > 0,
        }
    }
}

fn wrap(out: &mut String, fragments: &mut Vec<String>, open: String, inner: String, close: &str) {
    out.push_str(&token(fragments, open));
    out.push_str(&inner);
    out.push_str(&token(fragments, close.to_string()));
}

struct Expanded {
    text: String,
    only_icons: bool,
}

fn token(fragments: &mut Vec<String>, html: String) -> String {
    fragments.push(html);
    format!("\u{E000}{}\u{E001}", fragments.len() - 1)
}

fn literal_ranges(text: &str) -> Vec<Range<usize>> {
    LITERALS
        .captures_iter(text)
        .filter_map(|caps| caps.name("dest").or_else(|| caps.get(0)))
        .map(|m| m.range())
        .collect()
}

/// Whether the byte at `index` is preceded by an odd number of backslashes.
fn is_escaped(text: &str, index: usize) -> bool {
    text[..index]
        .bytes()
        .rev()
        .take_while(|&b| b == b'\\')
        .count()
        % 2
        == 1
}

fn span_open(attrs: &str) -> String {
    let mut id = None;
    let mut classes = Vec::new();
    for caps in ATTRIBUTE.captures_iter(attrs) {
        match &caps[1] {
            "#" => id = Some(caps[2].to_string()),
            _ => classes.push(caps[2].to_string()),
        }
    }
    let mut open = String::from("<span");
    if let Some(id) = id {
        open.push_str(&format!(r#" id="{}""#, escape_html(&id)));
    }
    if !classes.is_empty() {
        open.push_str(&format!(r#" class="{}""#, escape_html(&classes.join(" "))));
    }
    open.push('>');
    open
}

fn strip_paragraphs(html: &str) -> String {
    html.replace("<p>", "").replace("</p>", "").trim().to_string()
}

/// Piece of markdown source; custom syntax is never expanded inside code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    /// Fenced or indented code blocks and inline code spans.
    Code(&'a str),
}

/// Split `text` into code blocks / inline code spans and everything else.
pub(crate) fn split_code_segments(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut fence: Option<(char, usize)> = None;
    let mut indented = false;
    let mut after_blank = true;
    let mut in_list = false;
    let mut text_start = 0;
    let mut code_start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let blank = line.trim().is_empty();

        if let Some((ch, len)) = fence {
            if let Some((close_ch, close_len)) = fence_marker(line) {
                if ch == close_ch && close_len >= len && line.trim().chars().all(|c| c == ch) {
                    segments.push(Segment::Code(&text[code_start..offset]));
                    fence = None;
                    text_start = offset;
                }
            }
            continue;
        }

        if indented {
            if blank || is_indented(line) {
                continue;
            }
            segments.push(Segment::Code(&text[code_start..line_start]));
            indented = false;
            text_start = line_start;
        }

        if let Some(open) = fence_marker(line) {
            split_inline_code(&text[text_start..line_start], &mut segments);
            fence = Some(open);
            code_start = line_start;
        } else if !blank && is_indented(line) && after_blank && !in_list {
            // An indented block never interrupts a paragraph or a list item.
            split_inline_code(&text[text_start..line_start], &mut segments);
            indented = true;
            code_start = line_start;
        }

        if !blank && !is_indented(line) {
            in_list = is_list_item(line);
        }
        after_blank = blank;
    }

    if fence.is_some() || indented {
        segments.push(Segment::Code(&text[code_start..]));
    } else {
        split_inline_code(&text[text_start..], &mut segments);
    }
    segments
}

fn is_indented(line: &str) -> bool {
    let mut column = 0;
    for c in line.chars() {
        match c {
            ' ' => column += 1,
            '\t' => column += 4 - column % 4,
            _ => break,
        }
        if column >= 4 {
            return true;
        }
    }
    false
}

fn is_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    if ["- ", "* ", "+ "].iter().any(|marker| trimmed.starts_with(marker)) {
        return true;
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && (trimmed[digits..].starts_with(". ") || trimmed[digits..].starts_with(") "))
}

fn fence_marker(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let ch = trimmed.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

fn split_inline_code<'a>(text: &'a str, segments: &mut Vec<Segment<'a>>) {
    let bytes = text.as_bytes();
    let mut plain_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < bytes.len() && bytes[i] == b'`' {
            i += 1;
        }
        let run = i - run_start;

        // Look for a closing run of exactly the same length.
        let mut j = i;
        let mut close = None;
        while j < bytes.len() {
            if bytes[j] == b'`' {
                let start = j;
                while j < bytes.len() && bytes[j] == b'`' {
                    j += 1;
                }
                if j - start == run {
                    close = Some(j);
                    break;
                }
            } else {
                j += 1;
            }
        }

        if let Some(end) = close {
            if plain_start < run_start {
                segments.push(Segment::Text(&text[plain_start..run_start]));
            }
            segments.push(Segment::Code(&text[run_start..end]));
            plain_start = end;
            i = end;
        }
    }

    if plain_start < text.len() {
        segments.push(Segment::Text(&text[plain_start..]));
    }
}

fn comrak_options(config: &MarkdownConfig) -> ComrakOptions {
    let mut options = ComrakOptions::default();
    options.render.unsafe_ = true;

    for name in &config.extensions {
        match name.as_str() {
            "smarty" => options.parse.smart = true,
            "tables" | "table" => options.extension.table = true,
            "strikethrough" => options.extension.strikethrough = true,
            "autolink" => options.extension.autolink = true,
            "tasklist" => options.extension.tasklist = true,
            "superscript" => options.extension.superscript = true,
            "footnotes" => options.extension.footnotes = true,
            "def_list" | "description_lists" => options.extension.description_lists = true,
            "nl2br" | "hardbreaks" => options.render.hardbreaks = true,
            "header_ids" | "toc" => {
                let prefix = config
                    .extension_configs
                    .get(name)
                    .and_then(|conf| conf.get("prefix"))
                    .and_then(|prefix| prefix.as_str())
                    .unwrap_or("");
                options.extension.header_ids = Some(prefix.to_string());
            }
            "extra" => {
                options.extension.table = true;
                options.extension.footnotes = true;
                options.extension.description_lists = true;
            }
            other => warn!("Unknown markdown extension '{}' ignored", other),
        }
    }

    options
}
