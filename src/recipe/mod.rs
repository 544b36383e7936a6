//! Recipe aggregation.
//!
//! Turns scattered recipe-source events into one coherent build recipe: a
//! directory-keyed collection of [`DirBundle`]s plus the external reference
//! names. Every bundle's watch subscription feeds the shared `DirChange`
//! channel, which the hot-swap controller consumes as its rebuild signal.
//!
//! ```text
//! RecipeEvent → RecipeAggregator (mutex-guarded map) ⇄ DirBundle (WatchGuard)
//! ```

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::watch::{WatchError, WatchHub};

// Membership predicates per category.
mod classifier;
// Per-directory file grouping + watch subscription.
mod bundle;


pub use bundle::DirBundle;
pub use classifier::{FileKind, SourceFilter};

/// Events emitted by the external recipe source.
///
/// File and directory events carry absolute paths; extern events carry a
/// reference name resolved from outside the watched tree.
#[derive(Debug, Clone)]
pub enum RecipeEvent {
    SourceAdded(PathBuf),
    SourceRemoved(PathBuf),
    ReferenceAdded(PathBuf),
    ReferenceRemoved(PathBuf),
    ResourceAdded(PathBuf),
    ResourceRemoved(PathBuf),
    DirAdded(PathBuf),
    DirRemoved(PathBuf),
    ExternAdded(String),
    ExternRemoved(String),
}

/// Recipe mutation errors
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("path has no parent directory: `{0}`")]
    NoParent(PathBuf),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Shared mutable recipe state. One mutex guards both collections: add and
/// remove calls race with watch-driven reads, so mutations and snapshot
/// queries go through the same critical section.
#[derive(Default)]
struct RecipeState {
    bundles: FxHashMap<PathBuf, DirBundle>,
    externs: Vec<String>,
}

/// Aggregates recipe-source events into the current build recipe.
pub struct RecipeAggregator {
    hub: Arc<WatchHub>,
    inner: Mutex<RecipeState>,
}

impl RecipeAggregator {
    pub fn new(hub: Arc<WatchHub>) -> Self {
        Self {
            hub,
            inner: Mutex::new(RecipeState::default()),
        }
    }

    /// Route one recipe-source event to the matching mutation.
    pub fn apply(&self, event: RecipeEvent) -> Result<(), RecipeError> {
        match event {
            RecipeEvent::SourceAdded(p) => self.add_file(p, FileKind::Source),
            RecipeEvent::SourceRemoved(p) => {
                self.remove_file(&p, FileKind::Source);
                Ok(())
            }
            RecipeEvent::ReferenceAdded(p) => self.add_file(p, FileKind::Reference),
            RecipeEvent::ReferenceRemoved(p) => {
                self.remove_file(&p, FileKind::Reference);
                Ok(())
            }
            RecipeEvent::ResourceAdded(p) => self.add_file(p, FileKind::Resource),
            RecipeEvent::ResourceRemoved(p) => {
                self.remove_file(&p, FileKind::Resource);
                Ok(())
            }
            RecipeEvent::DirAdded(d) => self.add_directory(&d),
            RecipeEvent::DirRemoved(d) => {
                self.remove_directory(&d);
                Ok(())
            }
            RecipeEvent::ExternAdded(n) => {
                self.add_extern(n);
                Ok(())
            }
            RecipeEvent::ExternRemoved(n) => {
                self.remove_extern(&n);
                Ok(())
            }
        }
    }

    /// Add a file to its directory's bundle, creating the bundle (and its
    /// watch subscription) if the directory is not yet tracked.
    ///
    /// A watch subscription failure aborts bundle creation; the file is not
    /// recorded anywhere.
    pub fn add_file(&self, path: PathBuf, kind: FileKind) -> Result<(), RecipeError> {
        let dir = parent_dir(&path)?;

        let mut state = self.inner.lock();
        crate::debug!("recipe"; "add {} file: {}", kind.label(), path.display());

        if let Some(bundle) = state.bundles.get_mut(&dir) {
            bundle.add(kind, path);
            return Ok(());
        }

        let watch = self.hub.subscribe(&dir)?;
        let mut bundle = DirBundle::new(dir.clone(), watch);
        bundle.add(kind, path);
        state.bundles.insert(dir.clone(), bundle);
        crate::debug!("recipe"; "tracking directory: {}", dir.display());
        Ok(())
    }

    /// Remove a file from its directory's bundle. If the bundle becomes
    /// empty, it is destroyed and its watch subscription released.
    pub fn remove_file(&self, path: &Path, kind: FileKind) {
        let Ok(dir) = parent_dir(path) else { return };

        let mut state = self.inner.lock();
        let Some(bundle) = state.bundles.get_mut(&dir) else {
            return;
        };

        bundle.remove(kind, path);
        crate::debug!("recipe"; "remove {} file: {}", kind.label(), path.display());

        if bundle.is_empty() {
            state.bundles.remove(&dir);
            crate::debug!("recipe"; "dropped empty directory: {}", dir.display());
        }
    }

    /// Track a directory independent of file membership.
    pub fn add_directory(&self, dir: &Path) -> Result<(), RecipeError> {
        let mut state = self.inner.lock();
        if state.bundles.contains_key(dir) {
            return Ok(());
        }

        let watch = self.hub.subscribe(dir)?;
        state
            .bundles
            .insert(dir.to_path_buf(), DirBundle::new(dir.to_path_buf(), watch));
        crate::debug!("recipe"; "tracking directory: {}", dir.display());
        Ok(())
    }

    /// Stop tracking a directory regardless of its file membership.
    pub fn remove_directory(&self, dir: &Path) {
        if self.inner.lock().bundles.remove(dir).is_some() {
            crate::debug!("recipe"; "dropped directory: {}", dir.display());
        }
    }

    /// Record an external reference name. Set semantics: duplicates are
    /// ignored.
    pub fn add_extern(&self, name: String) {
        let mut state = self.inner.lock();
        if !state.externs.contains(&name) {
            state.externs.push(name);
        }
    }

    /// Forget an external reference name. Unknown names are a no-op.
    pub fn remove_extern(&self, name: &str) {
        let mut state = self.inner.lock();
        if let Some(pos) = state.externs.iter().position(|n| n == name) {
            state.externs.remove(pos);
        }
    }

    // ------------------------------------------------------------------
    // Snapshot queries. All return owned copies, never live views, so the
    // caller can iterate while watch threads keep mutating the recipe.
    // ------------------------------------------------------------------

    pub fn directories(&self) -> Vec<PathBuf> {
        self.inner.lock().bundles.keys().cloned().collect()
    }

    pub fn source_files(&self) -> Vec<PathBuf> {
        self.files_of(FileKind::Source)
    }

    pub fn reference_files(&self) -> Vec<PathBuf> {
        self.files_of(FileKind::Reference)
    }

    pub fn resource_files(&self) -> Vec<PathBuf> {
        self.files_of(FileKind::Resource)
    }

    pub fn extern_refs(&self) -> Vec<String> {
        self.inner.lock().externs.clone()
    }

    fn files_of(&self, kind: FileKind) -> Vec<PathBuf> {
        let state = self.inner.lock();
        let mut files: Vec<PathBuf> = state
            .bundles
            .values()
            .flat_map(|b| b.filter(kind).entries().cloned())
            .collect();
        files.sort();
        files
    }

    /// Multi-line recipe dump for verbose logging.
    pub fn summary(&self) -> String {
        let state = self.inner.lock();
        let mut out = String::from("recipe:\n");
        let mut dirs: Vec<_> = state.bundles.values().collect();
        dirs.sort_by(|a, b| a.dir().cmp(b.dir()));

        for bundle in dirs {
            let _ = writeln!(out, "  {}", bundle.dir().display());
            for kind in [FileKind::Source, FileKind::Reference, FileKind::Resource] {
                let filter = bundle.filter(kind);
                if filter.is_empty() {
                    continue;
                }
                let mut entries: Vec<_> = filter.entries().collect();
                entries.sort();
                for path in entries {
                    let name = path.file_name().map_or_else(
                        || path.display().to_string(),
                        |n| n.to_string_lossy().into_owned(),
                    );
                    let _ = writeln!(out, "    {} {}", kind.label(), name);
                }
            }
        }

        for name in &state.externs {
            let _ = writeln!(out, "  extern {name}");
        }
        out
    }

    /// Release every bundle and its watch subscription.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        let dropped = state.bundles.len();
        state.bundles.clear();
        state.externs.clear();
        if dropped > 0 {
            crate::debug!("recipe"; "released {} watch subscription(s)", dropped);
        }
    }
}

fn parent_dir(path: &Path) -> Result<PathBuf, RecipeError> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .ok_or_else(|| RecipeError::NoParent(path.to_path_buf()))
}
