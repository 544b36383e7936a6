//! Directory watch service.
//!
//! One `notify` watcher shared by every directory subscription. Subscriptions
//! are explicit tokens tracked in a registry, so disposal can release every
//! handle and a dropped [`WatchGuard`] can never leave an orphaned watch
//! behind.
//!
//! ```text
//! notify thread → route by registered root → DirChange channel (many producers)
//! ```
//!
//! The channel consumer (the hot-swap controller) does its own coalescing;
//! this layer emits one `DirChange` per underlying event, unfiltered.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Watch layer errors
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to initialize file watcher")]
    Init(#[source] notify::Error),

    #[error("failed to watch directory `{path}`")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// What happened under a watched root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// A change signal for one subscription.
///
/// `dir` is the subscribed root; `path` is the touched descendant. The watch
/// is coarse-grained: any touch inside the tree produces a signal, whether or
/// not the path is tracked by a classifier. False-positive rebuild triggers
/// are acceptable; false negatives are not.
#[derive(Debug, Clone)]
pub struct DirChange {
    pub dir: PathBuf,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Subscription registry: token → watched root.
#[derive(Default)]
struct Routes {
    subs: FxHashMap<u64, PathBuf>,
    next_id: u64,
}

/// Shared watch service.
///
/// Owns the single `notify` watcher; the notify callback routes each raw
/// event to every subscription whose root is a prefix of the event path.
/// Nested roots each receive their own signal.
pub struct WatchHub {
    watcher: Mutex<RecommendedWatcher>,
    routes: Arc<Mutex<Routes>>,
}

impl WatchHub {
    /// Create the hub and the receiving end of the change channel.
    ///
    /// The watcher starts immediately; events for roots subscribed later
    /// begin flowing as soon as [`WatchHub::subscribe`] returns.
    pub fn new() -> Result<(Arc<Self>, Receiver<DirChange>), WatchError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let routes = Arc::new(Mutex::new(Routes::default()));

        let cb_routes = Arc::clone(&routes);
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => route_event(&cb_routes, &tx, &event),
                Err(e) => crate::log!("watch"; "notify error: {}", e),
            }
        })
        .map_err(WatchError::Init)?;

        let hub = Arc::new(Self {
            watcher: Mutex::new(watcher),
            routes,
        });
        Ok((hub, rx))
    }

    /// Subscribe to recursive change notifications rooted at `root`.
    ///
    /// The returned guard owns the subscription and releases it on drop.
    pub fn subscribe(self: &Arc<Self>, root: &Path) -> Result<WatchGuard, WatchError> {
        self.watcher
            .lock()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Subscribe {
                path: root.to_path_buf(),
                source,
            })?;

        let id = {
            let mut routes = self.routes.lock();
            let id = routes.next_id;
            routes.next_id += 1;
            routes.subs.insert(id, root.to_path_buf());
            id
        };

        crate::debug!("watch"; "subscribed: {}", root.display());
        Ok(WatchGuard {
            hub: Arc::clone(self),
            id,
        })
    }

    /// Release a subscription.
    ///
    /// Synchronous: the registry entry is removed under the routing lock, so
    /// once this returns no further `DirChange` is emitted for the token.
    fn unsubscribe(&self, id: u64) {
        let root = self.routes.lock().subs.remove(&id);
        let Some(root) = root else { return };

        // Another subscription may still cover the same root.
        let still_watched = self.routes.lock().subs.values().any(|r| *r == root);
        if !still_watched
            && let Err(e) = self.watcher.lock().unwatch(&root)
        {
            // Root may already be gone from disk; nothing left to release.
            crate::debug!("watch"; "unwatch {}: {}", root.display(), e);
        }
        crate::debug!("watch"; "unsubscribed: {}", root.display());
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.routes.lock().subs.len()
    }
}

/// Owned handle to one directory subscription.
///
/// Dropping the guard releases the subscription.
pub struct WatchGuard {
    hub: Arc<WatchHub>,
    id: u64,
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard").field("id", &self.id).finish()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

/// Route one raw notify event into per-subscription change signals.
fn route_event(routes: &Mutex<Routes>, tx: &Sender<DirChange>, event: &notify::Event) {
    use notify::EventKind;

    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(modify) => {
            // Ignore metadata-only changes (mtime/atime/chmod noise)
            // may trigger endless rebuild loops
            if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                return;
            }
            ChangeKind::Modified
        }
        _ => return,
    };

    let routes = routes.lock();
    for path in &event.paths {
        for root in routes.subs.values() {
            if path.starts_with(root) {
                let _ = tx.send(DirChange {
                    dir: root.clone(),
                    path: path.clone(),
                    kind,
                });
            }
        }
    }
}
