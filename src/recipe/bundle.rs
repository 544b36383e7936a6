//! Per-directory grouping of classified files plus its watch subscription.

use std::path::{Path, PathBuf};

use super::classifier::{FileKind, SourceFilter};
use crate::watch::WatchGuard;

/// One watched directory and its classified files.
///
/// The bundle exclusively owns its watch subscription; dropping the bundle
/// releases it. A bundle whose three filters are all empty is considered
/// empty and gets removed from the aggregator.
pub struct DirBundle {
    dir: PathBuf,
    sources: SourceFilter,
    references: SourceFilter,
    resources: SourceFilter,
    watch: WatchGuard,
}

impl DirBundle {
    pub fn new(dir: PathBuf, watch: WatchGuard) -> Self {
        Self {
            dir,
            sources: SourceFilter::new(),
            references: SourceFilter::new(),
            resources: SourceFilter::new(),
            watch,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn add(&mut self, kind: FileKind, path: PathBuf) {
        self.filter_mut(kind).add(path);
    }

    pub fn remove(&mut self, kind: FileKind, path: &Path) {
        self.filter_mut(kind).remove(path);
    }

    pub fn filter(&self, kind: FileKind) -> &SourceFilter {
        match kind {
            FileKind::Source => &self.sources,
            FileKind::Reference => &self.references,
            FileKind::Resource => &self.resources,
        }
    }

    fn filter_mut(&mut self, kind: FileKind) -> &mut SourceFilter {
        match kind {
            FileKind::Source => &mut self.sources,
            FileKind::Reference => &mut self.references,
            FileKind::Resource => &mut self.resources,
        }
    }

    /// True iff all three filters hold zero entries.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.references.is_empty() && self.resources.is_empty()
    }
}
