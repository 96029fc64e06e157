// ABOUTME: Watch module for monitoring deck sources and rebuilding on change
// ABOUTME: Drives a single-threaded rebuild loop from a queue of coalesced file events

use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};

use crate::build::{self, BuildOptions};
use crate::errors::{DeckError, Result};
use crate::icons::ICON_EXTENSIONS;
use crate::server::{self, ReloadHub};
use crate::utils;

/// Configuration for watch mode
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Deck descriptions to build and watch
    pub deck_paths: Vec<PathBuf>,

    /// Coalescing window in milliseconds
    pub debounce_ms: u64,

    /// Whether to serve the output using a local web server
    pub serve: bool,

    /// Address the servers bind to
    pub host: String,

    /// Port for the local web server
    pub port: u16,

    /// Port for the reload notification socket
    pub reload_port: u16,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            deck_paths: Vec::new(),
            debounce_ms: 200,
            serve: true,
            host: "0.0.0.0".to_string(),
            port: 8800,
            reload_port: 8801,
        }
    }
}

/// Input to the rebuild loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed(Vec<PathBuf>),
    Failed(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Rebuilding,
}

/// Receives one notification per successful rebuild.
pub trait ReloadNotifier {
    fn notify(&self, output: &Path);
}

impl ReloadNotifier for () {
    fn notify(&self, _output: &Path) {}
}

impl<N: ReloadNotifier + ?Sized> ReloadNotifier for Arc<N> {
    fn notify(&self, output: &Path) {
        (**self).notify(output)
    }
}

impl<N: ReloadNotifier> ReloadNotifier for Option<N> {
    fn notify(&self, output: &Path) {
        if let Some(notifier) = self {
            notifier.notify(output)
        }
    }
}

/// Content digests of every path the loop has looked at.
#[derive(Debug, Default)]
pub struct FileStamps {
    stamps: HashMap<PathBuf, Option<String>>,
}

impl FileStamps {
    /// Whether `path` differs from what was recorded. Unrecorded paths count as changed.
    pub fn is_changed(&self, path: &Path) -> bool {
        match self.stamps.get(path) {
            Some(previous) => *previous != utils::content_digest(path),
            None => true,
        }
    }

    pub fn refresh(&mut self, path: &Path) {
        self.stamps
            .insert(path.to_path_buf(), utils::content_digest(path));
    }

    /// Record a digest taken earlier, so edits made since then still count as changes.
    pub fn record(&mut self, path: PathBuf, digest: Option<String>) {
        self.stamps.insert(path, digest);
    }
}

/// Digests of `paths` as they are right now.
fn snapshot<'a, I>(paths: I) -> HashMap<PathBuf, Option<String>>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    paths
        .into_iter()
        .map(|path| (path.clone(), utils::content_digest(path)))
        .collect()
}

/// One deck under watch and what it was last built from.
#[derive(Debug)]
struct WatchTarget {
    source: PathBuf,
    output: Option<PathBuf>,
    dependencies: BTreeSet<PathBuf>,
    icon_dir: Option<PathBuf>,
}

impl WatchTarget {
    fn new(source: PathBuf) -> Self {
        let dependencies = BTreeSet::from([source.clone()]);
        Self {
            source,
            output: None,
            dependencies,
            icon_dir: None,
        }
    }

    fn is_dependency(&self, path: &Path) -> bool {
        if self.output.as_deref() == Some(path) {
            return false;
        }
        if self.dependencies.contains(path) {
            return true;
        }
        match &self.icon_dir {
            Some(dir) if path == dir => true,
            Some(dir) => path.parent() == Some(dir.as_path()) && is_icon_file(path),
            None => false,
        }
    }

    fn tracked_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.dependencies.iter().chain(self.icon_dir.iter())
    }
}

fn is_icon_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map_or(false, |ext| ICON_EXTENSIONS.contains(&ext.as_str()))
}

/// Serialized rebuilds driven by an event queue.
///
/// Events that arrive while a rebuild runs stay queued and are handled as
/// one follow-up batch afterwards.
pub struct RebuildLoop<N: ReloadNotifier> {
    targets: Vec<WatchTarget>,
    options: BuildOptions,
    stamps: FileStamps,
    state: LoopState,
    notifier: N,
    coalesce: Duration,
    rebuilds: usize,
}

impl<N: ReloadNotifier> RebuildLoop<N> {
    pub fn new(deck_paths: &[PathBuf], options: BuildOptions, notifier: N, coalesce: Duration) -> Self {
        let targets = deck_paths
            .iter()
            .map(|path| WatchTarget::new(normalize(path)))
            .collect();
        Self {
            targets,
            options,
            stamps: FileStamps::default(),
            state: LoopState::Idle,
            notifier,
            coalesce,
            rebuilds: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Rebuild attempts so far, failed ones included.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Output of the first deck that has been built, if any.
    pub fn primary_output(&self) -> Option<&Path> {
        self.targets.iter().find_map(|t| t.output.as_deref())
    }

    /// Build every deck once without notifying. Returns the number of decks that failed.
    pub fn build_all(&mut self) -> usize {
        (0..self.targets.len())
            .filter(|&index| !self.rebuild(index, false))
            .count()
    }

    /// Rebuild the decks affected by `paths`. Returns how many decks were rebuilt.
    pub fn handle_changes(&mut self, paths: &[PathBuf]) -> usize {
        let paths: BTreeSet<PathBuf> = paths.iter().map(|p| normalize(p)).collect();
        let changed: Vec<&PathBuf> = paths
            .iter()
            .filter(|path| self.targets.iter().any(|t| t.is_dependency(path)))
            .filter(|path| self.stamps.is_changed(path))
            .collect();
        if changed.is_empty() {
            debug!("No relevant content changes in {} event path(s)", paths.len());
            return 0;
        }
        for path in &changed {
            debug!("Detected relevant change in {:?}", path);
        }
        // Taken before building: an edit landing mid-build must stay visible.
        let seen = snapshot(changed.iter().copied());

        let affected: Vec<usize> = self
            .targets
            .iter()
            .enumerate()
            .filter(|(_, target)| changed.iter().any(|path| target.is_dependency(path)))
            .map(|(index, _)| index)
            .collect();
        for &index in &affected {
            self.rebuild(index, true);
        }
        for (path, digest) in seen {
            self.stamps.record(path, digest);
        }
        affected.len()
    }

    /// Consume events until shutdown or until every sender is gone.
    ///
    /// `on_rebuilt` receives the current watch roots after each batch that
    /// rebuilt something, so new directories can be watched.
    pub fn run<F>(&mut self, events: Receiver<WatchEvent>, mut on_rebuilt: F)
    where
        F: FnMut(&[PathBuf]),
    {
        loop {
            let first = match events.recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            let mut batch = Vec::new();
            let mut shutdown = absorb(first, &mut batch);

            let deadline = Instant::now() + self.coalesce;
            while !shutdown {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match events.recv_timeout(remaining) {
                    Ok(event) => shutdown = absorb(event, &mut batch),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => shutdown = true,
                }
            }

            if !batch.is_empty() && self.handle_changes(&batch) > 0 {
                on_rebuilt(&self.watch_roots());
            }
            if shutdown {
                info!("Watch loop shutting down");
                break;
            }
        }
    }

    /// Directories that must be watched (recursively) to see every dependency.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
        for target in &self.targets {
            for path in target.tracked_paths() {
                let dir = if path.is_dir() {
                    Some(path.as_path())
                } else {
                    path.parent()
                };
                if let Some(dir) = dir.filter(|d| d.is_dir()) {
                    dirs.insert(dir.to_path_buf());
                }
            }
        }
        let mut roots: Vec<PathBuf> = Vec::new();
        for dir in dirs {
            if !roots.iter().any(|root| dir.starts_with(root)) {
                roots.push(dir);
            }
        }
        roots
    }

    /// Returns whether the deck built successfully.
    fn rebuild(&mut self, index: usize, notify: bool) -> bool {
        self.state = LoopState::Rebuilding;
        self.rebuilds += 1;
        let source = self.targets[index].source.clone();
        let seen = snapshot(self.targets[index].tracked_paths());
        info!("Rebuilding {:?}", source);

        let built = match build::build_deck(&source, &self.options) {
            Ok(report) => {
                if !report.failures.is_empty() {
                    warn!(
                        "{} card(s) of {:?} failed to render",
                        report.failures.len(),
                        source
                    );
                }
                let target = &mut self.targets[index];
                target.dependencies = report.dependencies;
                target.dependencies.insert(source.clone());
                target.icon_dir = report.icon_dir;
                target.output = Some(report.output.clone());
                if notify {
                    self.notifier.notify(&report.output);
                }
                true
            }
            Err(e) => {
                // Keep the previous output and dependencies so a fix is noticed.
                error!("Failed to rebuild {:?}: {}", source, e);
                self.targets[index].dependencies.insert(source);
                false
            }
        };

        let tracked: Vec<PathBuf> = self.targets[index].tracked_paths().cloned().collect();
        for path in tracked {
            match seen.get(&path) {
                Some(digest) => self.stamps.record(path, digest.clone()),
                None => self.stamps.refresh(&path),
            }
        }
        self.state = LoopState::Idle;
        built
    }
}

fn absorb(event: WatchEvent, batch: &mut Vec<PathBuf>) -> bool {
    match event {
        WatchEvent::Changed(paths) => {
            batch.extend(paths);
            false
        }
        WatchEvent::Failed(message) => {
            error!("Watch error: {}", message);
            false
        }
        WatchEvent::Shutdown => true,
    }
}

fn normalize(path: &Path) -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) => utils::resolve_path(&cwd, path),
        Err(_) => path.to_path_buf(),
    }
}

/// The single directory all deck descriptions live in.
pub fn common_root(deck_paths: &[PathBuf]) -> Result<PathBuf> {
    let mut root: Option<PathBuf> = None;
    for path in deck_paths {
        utils::validate_file_exists(path)?;
        let dir = utils::get_absolute_path(path)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        match &root {
            Some(existing) if *existing != dir => {
                return Err(DeckError::ValidationError(
                    "All deck files must be in the same directory.".to_string(),
                ))
            }
            Some(_) => {}
            None => root = Some(dir),
        }
    }
    root.ok_or_else(|| DeckError::ValidationError("No deck files given".to_string()))
}

fn sync_roots(watcher: &mut dyn Watcher, watched: &mut BTreeSet<PathBuf>, roots: &[PathBuf]) {
    for root in roots {
        if watched.iter().any(|existing| root.starts_with(existing)) {
            continue;
        }
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                debug!("Watching {:?}", root);
                watched.insert(root.clone());
            }
            Err(e) => warn!("Failed to watch {:?}: {}", root, e),
        }
    }
}

/// Build every deck, then serve and rebuild on change until the process ends.
pub fn watch_decks(config: WatchConfig) -> Result<()> {
    let root = common_root(&config.deck_paths)?;

    let hub = if config.serve {
        Some(Arc::new(ReloadHub::start(&config.host, config.reload_port)?))
    } else {
        None
    };
    let options = BuildOptions {
        reload_script: hub.as_ref().map(|hub| hub.script()),
    };

    let mut rebuild_loop = RebuildLoop::new(
        &config.deck_paths,
        options,
        hub.clone(),
        Duration::from_millis(config.debounce_ms),
    );
    let failed = rebuild_loop.build_all();
    if failed > 0 {
        warn!("{} deck(s) failed to build; watching for corrections", failed);
    }

    if config.serve {
        let index = rebuild_loop
            .primary_output()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join("index.html"));
        server::start_server(root.clone(), index, &config.host, config.port)?;
    }

    let (tx, rx) = mpsc::channel();
    let mut debouncer = new_debouncer(
        Duration::from_millis(config.debounce_ms),
        None,
        move |result: DebounceEventResult| {
            let event = match result {
                Ok(events) => {
                    WatchEvent::Changed(events.into_iter().flat_map(|e| e.event.paths).collect())
                }
                Err(errors) => WatchEvent::Failed(
                    errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
            };
            // The loop only stops receiving when the process is ending.
            let _ = tx.send(event);
        },
    )
    .map_err(|e| DeckError::WatchError(format!("Failed to create file watcher: {}", e)))?;

    let mut watched = BTreeSet::new();
    sync_roots(debouncer.watcher(), &mut watched, &rebuild_loop.watch_roots());

    info!("Watching for changes in {:?}", root);
    println!("Watching for changes in {:?} (Press Ctrl+C to stop)", root);

    rebuild_loop.run(rx, |roots| sync_roots(debouncer.watcher(), &mut watched, roots));
    Ok(())
}
