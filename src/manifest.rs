//! Recipe manifest.
//!
//! The concrete recipe source behind the CLI: a TOML file naming the
//! source/reference/resource files and external reference names of one
//! buildable unit. At startup it is replayed as recipe-source events; after
//! that the core stays purely event-driven.
//!
//! ```toml
//! sources = ["hot.rs", "util.rs"]
//! externs = ["libm"]
//!
//! [build]
//! timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::builder::BuildProfile;
use crate::recipe::RecipeEvent;

/// Manifest-related errors
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("manifest parsing error")]
    Toml(#[from] toml::de::Error),
}

/// One buildable unit as written by the user.
///
/// Relative paths resolve against the manifest's directory.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    /// Source files, crate root first (the order is the build order).
    pub sources: Vec<PathBuf>,
    /// Compiled libraries referenced by path.
    pub references: Vec<PathBuf>,
    /// Resource files carried alongside the unit.
    pub resources: Vec<PathBuf>,
    /// Reference names resolved from the library search path.
    pub externs: Vec<String>,
    pub build: BuildSection,
}

/// `[build]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    /// Compile to scratch artifacts (default) instead of a fixed output.
    pub in_memory: Option<bool>,
    /// Artifact path when `in_memory = false`.
    pub output: Option<PathBuf>,
    /// Extra reference entries merged into every build.
    pub references: Vec<String>,
    /// Bound on one compiler invocation.
    pub timeout_secs: Option<u64>,
}

impl Manifest {
    /// Load a manifest and return it with its root directory (the anchor for
    /// relative paths).
    pub fn load(path: &Path) -> Result<(Self, PathBuf), ManifestError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Io(path.to_path_buf(), e))?;
        let manifest: Manifest = toml::from_str(&text)?;

        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok((manifest, root))
    }

    /// Build profile from the `[build]` table.
    pub fn profile(&self) -> BuildProfile {
        BuildProfile {
            in_memory: self.build.in_memory.unwrap_or(true),
            output: self.build.output.clone(),
            references: self.build.references.clone(),
            timeout: self.build.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Replay the manifest as recipe-source events, category by category.
    pub fn events(&self, root: &Path) -> Vec<RecipeEvent> {
        let mut events = Vec::new();
        for path in &self.sources {
            events.push(RecipeEvent::SourceAdded(resolve(path, root)));
        }
        for path in &self.references {
            events.push(RecipeEvent::ReferenceAdded(resolve(path, root)));
        }
        for path in &self.resources {
            events.push(RecipeEvent::ResourceAdded(resolve(path, root)));
        }
        for name in &self.externs {
            events.push(RecipeEvent::ExternAdded(name.clone()));
        }
        events
    }

    /// Absolute source list for a one-shot build, in manifest order.
    pub fn resolved_sources(&self, root: &Path) -> Vec<PathBuf> {
        self.sources.iter().map(|p| resolve(p, root)).collect()
    }

    /// Absolute reference-file list for a one-shot build.
    pub fn resolved_references(&self, root: &Path) -> Vec<PathBuf> {
        self.references.iter().map(|p| resolve(p, root)).collect()
    }
}

fn resolve(path: &Path, root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
