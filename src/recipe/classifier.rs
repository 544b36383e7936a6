//! Source classification: does a path belong to a named category?

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

/// File categories tracked per directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Source,
    Reference,
    Resource,
}

impl FileKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Reference => "reference",
            Self::Resource => "resource",
        }
    }
}

/// Membership predicate for one file category.
///
/// Two modes:
/// - list mode (`filter == None`): a path is included iff it is in `paths`
/// - filter mode (`filter == Some(text)`): a path is included iff its file
///   name contains `text` and the path is NOT in `paths` (exclusion set)
#[derive(Debug, Default)]
pub struct SourceFilter {
    filter: Option<String>,
    paths: FxHashSet<PathBuf>,
}

impl SourceFilter {
    /// List-mode filter with an empty membership set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter-mode: match by file-name substring, `paths` acts as exclusions.
    pub fn with_filter(text: impl Into<String>) -> Self {
        Self {
            filter: Some(text.into()),
            paths: FxHashSet::default(),
        }
    }

    /// Pure membership predicate. No side effects.
    pub fn includes(&self, path: &Path) -> bool {
        match &self.filter {
            Some(text) => {
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| name.contains(text.as_str()));
                matches && !self.paths.contains(path)
            }
            None => self.paths.contains(path),
        }
    }

    /// Add a path to the backing set (exclusions in filter mode).
    pub fn add(&mut self, path: PathBuf) {
        self.paths.insert(path);
    }

    /// Remove a path from the backing set. Removing a non-member is a no-op.
    pub fn remove(&mut self, path: &Path) {
        self.paths.remove(path);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Contents of the backing set (exclusions in filter mode).
    pub fn entries(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }
}
