use std::sync::Arc;
use victorycard::{IconIndex, MarkdownConfig, MarkdownMode, MarkupEngine};

const FIRE: &str = r#"<img class="__icon" src="/icons/fire.svg" alt="fire">"#;

fn engine() -> MarkupEngine {
    engine_with(MarkdownConfig::default())
}

fn engine_with(config: MarkdownConfig) -> MarkupEngine {
    let icons = IconIndex::from_entries([("fire", "/icons/fire.svg"), ("shield", "/icons/shield.png")]);
    MarkupEngine::new(&config, Arc::new(icons))
}

#[test]
fn test_inline_mode_never_wraps_in_paragraphs() {
    let md = engine();
    assert_eq!(md.render("Hello *world*", MarkdownMode::Inline), "Hello <em>world</em>");
    assert!(!md
        .render("first\n\nsecond", MarkdownMode::Inline)
        .contains("<p>"));
}

#[test]
fn test_paragraph_mode_always_wraps() {
    let md = engine();
    assert_eq!(
        md.render("Hello *world*", MarkdownMode::Paragraph),
        "<p>Hello <em>world</em></p>"
    );
}

#[test]
fn test_auto_mode_wraps_only_multiline_text() {
    let md = engine();
    assert_eq!(
        md.render("one line", MarkdownMode::Auto),
        md.render("one line", MarkdownMode::Inline)
    );
    assert_eq!(md.render("one line\n", MarkdownMode::Auto), "one line");

    let multi = md.render("line one\nline two", MarkdownMode::Auto);
    assert!(multi.starts_with("<p>"));
    assert!(multi.ends_with("</p>"));
}

#[test]
fn test_bracket_icons() {
    let md = engine();
    assert_eq!(
        md.render("Deal 3 [icon:fire] damage", MarkdownMode::Inline),
        format!("Deal 3 {} damage", FIRE)
    );
    assert_eq!(md.render("[i:fire]", MarkdownMode::Inline), FIRE);
}

#[test]
fn test_missing_icon_renders_placeholder() {
    let md = engine();
    assert_eq!(
        md.render("[icon:ice]", MarkdownMode::Inline),
        r#"<s class="__icon __icon-missing">ice</s>"#
    );
}

#[test]
fn test_entity_icons_only_replace_known_names() {
    let md = engine();
    assert_eq!(md.render("&fire;", MarkdownMode::Inline), FIRE);
    assert_eq!(
        md.render("Salt &amp; pepper", MarkdownMode::Inline),
        "Salt &amp; pepper"
    );
}

#[test]
fn test_icon_names_are_case_sensitive() {
    let md = engine();
    assert!(md
        .render("[icon:Fire]", MarkdownMode::Inline)
        .contains("__icon-missing"));
}

#[test]
fn test_strikethrough_of_icons_gets_icon_class() {
    let md = engine();
    assert_eq!(
        md.render("~~[icon:fire]~~", MarkdownMode::Inline),
        format!(r#"<del class="__icon-struck">{}</del>"#, FIRE)
    );
    assert_eq!(md.render("~~old~~ new", MarkdownMode::Inline), "<del>old</del> new");
}

#[test]
fn test_attributed_spans() {
    let md = engine();
    assert_eq!(
        md.render("{#hp.big.red}[10]", MarkdownMode::Inline),
        r#"<span id="hp" class="big red">10</span>"#
    );
    assert_eq!(
        md.render("{.cost}[3 [icon:fire]]", MarkdownMode::Inline),
        format!(r#"<span class="cost">3 {}</span>"#, FIRE)
    );
}

#[test]
fn test_nowrap_spans() {
    let md = engine();
    assert_eq!(
        md.render("((2 *fire*))", MarkdownMode::Inline),
        r#"<span class="nowrap">2 <em>fire</em></span>"#
    );
}

#[test]
fn test_custom_syntax_is_literal_inside_code() {
    let md = engine();
    assert_eq!(
        md.render("`[icon:fire]`", MarkdownMode::Inline),
        "<code>[icon:fire]</code>"
    );
    let block = md.render("```\n((keep))\n```", MarkdownMode::Paragraph);
    assert!(block.contains("((keep))"));
    assert!(!block.contains("nowrap"));
}

#[test]
fn test_smart_punctuation_is_on_by_default() {
    let md = engine();
    let html = md.render("\"quoted\"", MarkdownMode::Inline);
    assert!(html.contains('\u{201c}'));
    assert!(html.contains('\u{201d}'));
}

#[test]
fn test_extensions_are_configurable() {
    let mut config = MarkdownConfig::default();
    config.extensions.insert("tables".to_string());
    let md = engine_with(config);

    let html = md.render("| a |\n|---|\n| b |", MarkdownMode::Paragraph);
    assert!(html.contains("<table>"));

    let plain = engine().render("| a |\n|---|\n| b |", MarkdownMode::Paragraph);
    assert!(!plain.contains("<table>"));
}

#[test]
fn test_raw_html_passes_through() {
    let md = engine();
    assert_eq!(
        md.render("<b>bold</b> text", MarkdownMode::Inline),
        "<b>bold</b> text"
    );
}

#[test]
fn test_struck_damage_with_entity_icon() {
    let md = engine();
    assert_eq!(
        md.render("Deals ~~10~~ 15 damage. &fire;", MarkdownMode::Auto),
        format!("Deals <del>10</del> 15 damage. {}", FIRE)
    );
}

#[test]
fn test_escaped_syntax_stays_literal() {
    let md = engine();
    assert_eq!(md.render(r"\[icon:fire]", MarkdownMode::Inline), "[icon:fire]");
    assert_eq!(md.render(r"\&fire;", MarkdownMode::Inline), "&amp;fire;");
    assert_eq!(md.render(r"\((keep))", MarkdownMode::Inline), "((keep))");
    assert_eq!(
        md.render(r"\\[icon:fire]", MarkdownMode::Inline),
        format!(r"\{}", FIRE)
    );
}

#[test]
fn test_link_destinations_are_not_expanded() {
    let md = engine();
    let html = md.render("[x](/a/&fire;) and [icon:fire]", MarkdownMode::Inline);
    assert!(html.contains(r#"href="/a/&amp;fire;""#));
    assert!(!html.contains('\u{E000}'));
    assert!(html.ends_with(&format!(" and {}", FIRE)));

    let image = md.render("![&fire;](/art/&fire;.png)", MarkdownMode::Inline);
    assert!(!image.contains("__icon"));
}

#[test]
fn test_raw_html_attributes_are_not_expanded() {
    let md = engine();
    assert_eq!(
        md.render(r#"<img alt="&fire;">"#, MarkdownMode::Inline),
        r#"<img alt="&fire;">"#
    );
    assert_eq!(
        md.render(r#"<span title="((x))">&fire;</span>"#, MarkdownMode::Inline),
        format!(r#"<span title="((x))">{}</span>"#, FIRE)
    );
}

#[test]
fn test_indented_code_blocks_are_not_expanded() {
    let md = engine();
    let block = md.render("Intro\n\n    [icon:fire] ((keep))\n", MarkdownMode::Paragraph);
    assert!(block.contains("<pre><code>[icon:fire] ((keep))"));
    assert!(!block.contains("__icon"));

    // Indented continuation of a list item is still ordinary text.
    let list = md.render("- item\n\n    more [icon:fire]\n", MarkdownMode::Paragraph);
    assert!(list.contains(FIRE));
}
