// ABOUTME: Main entry point for the victorycard program.
// ABOUTME: Provides CLI interface and builds, serves and watches decks.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use victorycard::{build_deck, watch, BuildOptions, Config};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Deck definition files; all must live in the same directory
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Port for the preview server
    #[arg(short, long)]
    port: Option<u16>,

    /// Address the preview server binds to
    #[arg(long)]
    host: Option<String>,

    /// Port for the reload notification socket (defaults to port + 1)
    #[arg(long)]
    reload_port: Option<u16>,

    /// Coalescing window for file changes, in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Build every deck once and exit without serving or watching
    #[arg(short = 'n', long)]
    no_server: bool,
}

fn build_once(paths: &[PathBuf]) -> anyhow::Result<()> {
    watch::common_root(paths)?;
    let options = BuildOptions::default();
    let mut failed = Vec::new();
    for path in paths {
        match build_deck(path, &options) {
            Ok(report) => println!(
                "Built {:?}: {} card blocks ({} failed)",
                report.output,
                report.document.blocks,
                report.failures.len()
            ),
            Err(e) => {
                eprintln!("Error building {:?}: {}", path, e);
                failed.push(path.display().to_string());
            }
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Failed to build: {}", failed.join(", ")))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let result = if cli.no_server {
        build_once(&cli.paths)
    } else {
        let watch_config = config.get_watch_config(
            cli.paths,
            cli.host,
            cli.port,
            cli.reload_port,
            cli.debounce_ms,
            true,
        );
        watch::watch_decks(watch_config).context("Watch mode stopped")
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
