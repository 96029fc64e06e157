use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use victorycard::{build_deck, BuildOptions, DeckError};

const TEMPLATE: &str = "<h2>{{ name }}</h2>\n<div class=\"text\">{{ text | markdown }}</div>\n";

fn fixture(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let root = dir.path().canonicalize().expect("Failed to canonicalize temp dir");
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).expect("Failed to write fixture");
    }
    (dir, root)
}

fn build(deck: &Path) -> victorycard::BuildReport {
    build_deck(deck, &BuildOptions::default()).expect("deck should build")
}

#[test]
fn test_copies_control_card_blocks() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            "cards:\n  - name: Fireball\n    copies: 2\n  - name: Shield\n    copies: 0\n",
        ),
        ("deck.html.jinja2", TEMPLATE),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(report.output, root.join("deck.html"));
    assert_eq!(report.document.blocks, 2);
    assert_eq!(report.cards.len(), 1);
    assert!(report.failures.is_empty());

    let html = fs::read_to_string(root.join("deck.html")).unwrap();
    assert_eq!(html, report.document.html);
    assert_eq!(html.matches("<div class=\"card\"").count(), 2);
    assert_eq!(html.matches("<h2>Fireball</h2>").count(), 2);
    assert_eq!(html.matches("data-card=\"card1\"").count(), 2);
    assert!(!html.contains("Shield"));
    assert!(!root.join("deck.html.partial").exists());
}

#[test]
fn test_document_structure() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            "title: Spells & Wards\ngeneral:\n  card_spacing: 3mm\ncards:\n  - name: Fireball\n",
        ),
        ("deck.html.jinja2", TEMPLATE),
        ("deck.html.header", "<meta name=\"deck\" content=\"spells\">"),
    ]);

    let html = build(&root.join("deck.yaml")).document.html;

    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<title>Spells &amp; Wards</title>"));
    assert!(html.contains("--card-spacing: 3mm;"));
    assert!(html.contains("<meta name=\"deck\" content=\"spells\">"));
    assert!(html.contains("<div class=\"deck\">"));
    assert!(html.contains("window.victorycard"));
}

#[test]
fn test_markdown_and_icons_in_cards() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            "general:\n  icon_path: icons\ncards:\n  - name: Fireball\n    text: Deal 3 [icon:fire] damage\n",
        ),
        ("deck.html.jinja2", TEMPLATE),
        ("icons/fire.svg", "<svg/>"),
        ("icons/fire.png", "png"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(report.icon_dir, Some(root.join("icons")));
    assert!(report.document.html.contains(
        r#"<div class="text">Deal 3 <img class="__icon" src="/icons/fire.svg" alt="fire"> damage</div>"#
    ));
}

#[test]
fn test_template_helpers() {
    let template = concat!(
        "{{ icon(\"fire\") }}|{{ \"fire\" | icon_src }}|{{ \"ice\" | icon_src }}|",
        "{{ text | md_paragraph }}|{{ text | md_inline }}|{{ text | md_auto }}|",
        "{{ deck.title }}|{{ _id }}"
    );
    let (_dir, root) = fixture(&[
        ("deck.yaml", "title: Spells\ncards:\n  - text: Hot\n"),
        ("deck.j2", template),
        ("fire.svg", "<svg/>"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(
        report.cards[0].html,
        concat!(
            r#"<img class="__icon" src="/fire.svg" alt="fire">|/fire.svg||"#,
            "<p>Hot</p>|Hot|Hot|Spells|card1"
        )
    );
}

#[test]
fn test_markdown_filter_follows_default_mode() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            "general:\n  markdown:\n    default_mode: paragraph\ncards:\n  - text: Hot\n",
        ),
        ("deck.j2", "{{ text | markdown }}"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(report.cards[0].html, "<p>Hot</p>");
}

#[test]
fn test_failed_card_does_not_abort_deck() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            concat!(
                "cards:\n",
                "  - name: Fireball\n",
                "  - name: Ghost\n",
                "    template: nowhere\n",
                "  - name: Broken\n",
                "    template: broken\n",
                "  - name: Shield\n",
            ),
        ),
        ("deck.html.jinja2", TEMPLATE),
        ("broken.html", "{{ name | no_such_filter }}"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(report.cards.len(), 2);
    assert_eq!(report.document.blocks, 2);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].card(), "card2 (Ghost)");
    assert_eq!(report.failures[1].card(), "card3 (Broken)");
    assert!(report.document.html.contains("<h2>Fireball</h2>"));
    assert!(report.document.html.contains("<h2>Shield</h2>"));
}

#[test]
fn test_version_markers_are_content_derived() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            "cards:\n  - name: Fireball\n  - name: Shield\n",
        ),
        ("deck.html.jinja2", TEMPLATE),
        ("deck.css", ".card { width: 63mm; }"),
    ]);
    let deck = root.join("deck.yaml");

    let first = build(&deck);
    let versions: Vec<String> = first.cards.iter().map(|c| c.version()).collect();
    assert_eq!(versions[0].len(), 12);
    assert_ne!(versions[0], versions[1]);
    assert!(first
        .document
        .html
        .contains(&format!("data-version=\"{}\"", versions[0])));

    fs::write(root.join("deck.css"), ".card { width: 70mm; }").unwrap();
    let restyled = build(&deck);
    assert!(restyled.document.html.contains("70mm"));
    let after: Vec<String> = restyled.cards.iter().map(|c| c.version()).collect();
    assert_eq!(after, versions);

    fs::write(
        &deck,
        "cards:\n  - name: Fireball\n  - name: Greater Shield\n",
    )
    .unwrap();
    let edited = build(&deck);
    assert_eq!(edited.cards[0].version(), versions[0]);
    assert_ne!(edited.cards[1].version(), versions[1]);
}

#[test]
fn test_stylesheet_embed_or_link() {
    let (_dir, root) = fixture(&[
        ("embedded.yaml", "general:\n  template: card\ncards:\n  - name: A\n"),
        (
            "linked.yaml",
            "general:\n  template: card\n  stylesheet: embedded.css\n  embed_styles: false\ncards:\n  - name: A\n",
        ),
        ("card.html", "{{ name }}"),
        ("embedded.css", "body { color: red; }"),
    ]);

    let embedded = build(&root.join("embedded.yaml")).document.html;
    assert!(embedded.contains("<style>\nbody { color: red; }\n</style>"));
    assert!(!embedded.contains("<link rel=\"stylesheet\""));

    let linked = build(&root.join("linked.yaml")).document.html;
    assert!(linked.contains(r#"<link rel="stylesheet" href="embedded.css">"#));
    assert!(!linked.contains("color: red"));
}

#[test]
fn test_missing_stylesheet_only_warns() {
    let (_dir, root) = fixture(&[
        ("deck.yaml", "cards:\n  - name: A\n"),
        ("deck.j2", "{{ name }}"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(report.document.blocks, 1);
}

#[test]
fn test_embed_and_include_are_dependencies() {
    let (_dir, root) = fixture(&[
        ("deck.yaml", "cards:\n  - name: Fireball\n"),
        (
            "deck.j2",
            "{% include \"parts/title.html\" %}{{ embed(\"parts/flame.svg\") }}{{ \"parts/note.txt\" | embed }}",
        ),
        ("parts/title.html", "<h2>{{ name }}</h2>"),
        ("parts/flame.svg", "<svg id=\"flame\"/>"),
        ("parts/note.txt", "note"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(
        report.cards[0].html,
        "<h2>Fireball</h2><svg id=\"flame\"/>note"
    );
    for dep in [
        "deck.yaml",
        "deck.j2",
        "deck.css",
        "parts/title.html",
        "parts/flame.svg",
        "parts/note.txt",
    ] {
        assert!(
            report.dependencies.contains(&root.join(dep)),
            "missing dependency {}",
            dep
        );
    }
    assert!(!report.dependencies.contains(&root.join("deck.html.partial")));
}

#[test]
fn test_missing_embed_fails_only_that_card() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            "cards:\n  - file: present.txt\n  - file: absent.txt\n",
        ),
        ("deck.j2", "{{ embed(file) }}"),
        ("present.txt", "here"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(report.cards.len(), 1);
    assert_eq!(report.cards[0].html, "here");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].card(), "card2");
}

#[test]
fn test_config_error_keeps_previous_output() {
    let (_dir, root) = fixture(&[
        ("deck.yaml", "cards:\n  - name: Fireball\n"),
        ("deck.html.jinja2", TEMPLATE),
    ]);
    let deck = root.join("deck.yaml");
    build(&deck);
    let before = fs::read_to_string(root.join("deck.html")).unwrap();

    fs::write(&deck, "cards: [\n").unwrap();
    let err = build_deck(&deck, &BuildOptions::default()).unwrap_err();

    assert!(matches!(err, DeckError::Config(_)));
    assert_eq!(fs::read_to_string(root.join("deck.html")).unwrap(), before);
}

#[test]
fn test_reload_script_is_appended() {
    let (_dir, root) = fixture(&[
        ("deck.yaml", "cards:\n  - name: A\n"),
        ("deck.j2", "{{ name }}"),
    ]);
    let options = BuildOptions {
        reload_script: Some("<script>/* reload */</script>".to_string()),
    };

    let report = build_deck(&root.join("deck.yaml"), &options).unwrap();

    assert!(report
        .document
        .html
        .contains("<script>/* reload */</script>\n</body>"));
}

#[test]
fn test_output_directory_is_created() {
    let (_dir, root) = fixture(&[
        (
            "deck.yaml",
            "general:\n  output: build/print.html\ncards:\n  - name: A\n",
        ),
        ("deck.j2", "{{ name }}"),
    ]);

    let report = build(&root.join("deck.yaml"));

    assert_eq!(report.output, root.join("build/print.html"));
    assert!(root.join("build/print.html").is_file());
}
