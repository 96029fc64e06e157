// ABOUTME: Library module for the victorycard program.
// ABOUTME: Contains the deck resolver, markup engine, card renderer, assembler and watch loop.

// Reexport modules
pub mod build;
pub mod cards;
pub mod config;
pub mod deck;
pub mod errors;
pub mod html;
pub mod icons;
pub mod markup;
pub mod resources;
pub mod server;
pub mod utils;
pub mod watch;

// Reexport common types and functions
pub use build::{build_deck, BuildOptions, BuildReport};
pub use cards::{CardRenderer, RenderedCard};
pub use config::Config;
pub use deck::{resolve, CardRecord, DeckSpec, GeneralConfig, MarkdownConfig};
pub use errors::{CardRenderError, ConfigError, DeckError, Result};
pub use html::{assemble, write_html_to_file};
pub use icons::IconIndex;
pub use markup::{MarkdownMode, MarkupEngine};
pub use resources::ResourceFile;
pub use watch::{watch_decks, LoopState, RebuildLoop, ReloadNotifier, WatchConfig, WatchEvent};
