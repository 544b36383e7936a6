use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::controller::HotSwap;
use super::isolate::{Isolator, SwapError};
use crate::builder::{BuildError, BuildProfile, Compiler, CompiledUnit};
use crate::recipe::{FileKind, RecipeAggregator};
use crate::watch::{ChangeKind, DirChange, WatchHub};

// ----------------------------------------------------------------------------
// Fakes at the external-collaborator seams
// ----------------------------------------------------------------------------

/// Shared observation log for one controller run.
#[derive(Default)]
struct Journal {
    events: Mutex<Vec<String>>,
    builds: AtomicUsize,
    loads: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl Journal {
    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn contains(&self, event: &str) -> bool {
        self.events.lock().iter().any(|e| e == event)
    }

    fn index_of(&self, event: &str) -> usize {
        let events = self.events();
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event `{event}` not found in {events:?}"))
    }
}

struct FakeCompiler {
    journal: Arc<Journal>,
    fail: Arc<AtomicBool>,
}

impl Compiler for FakeCompiler {
    fn compile(
        &self,
        _profile: &BuildProfile,
        _sources: &[PathBuf],
    ) -> Result<CompiledUnit, BuildError> {
        let n = self.journal.builds.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.push(format!("compile {n}"));

        if self.fail.load(Ordering::SeqCst) {
            return Err(BuildError::Diagnostics("error: broken unit".into()));
        }
        Ok(CompiledUnit {
            artifact: PathBuf::from(format!("/scratch/unit_{n}.so")),
            scratch: false,
        })
    }
}

struct FakeContext {
    id: usize,
}

struct FakeIsolator {
    journal: Arc<Journal>,
    fail_invoke: Arc<AtomicBool>,
    fail_unload: Arc<AtomicBool>,
}

impl Isolator for FakeIsolator {
    type Context = FakeContext;

    fn load(&self, _unit: &CompiledUnit) -> Result<FakeContext, SwapError> {
        let id = self.journal.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.journal.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.max_live.fetch_max(live, Ordering::SeqCst);
        self.journal.push(format!("load {id}"));
        Ok(FakeContext { id })
    }

    fn invoke(&self, ctx: &FakeContext) -> Result<(), SwapError> {
        if self.fail_invoke.load(Ordering::SeqCst) {
            self.journal.push(format!("invoke {} failed", ctx.id));
            return Err(SwapError::MissingEntry {
                path: PathBuf::from("/scratch/fake.so"),
            });
        }
        self.journal.push(format!("invoke {}", ctx.id));
        Ok(())
    }

    fn unload(&self, ctx: FakeContext) -> Result<(), SwapError> {
        if self.fail_unload.load(Ordering::SeqCst) {
            self.journal.push(format!("unload {} failed", ctx.id));
            return Err(SwapError::MissingEntry {
                path: PathBuf::from("/scratch/fake.so"),
            });
        }
        self.journal.live.fetch_sub(1, Ordering::SeqCst);
        self.journal.push(format!("unload {}", ctx.id));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

struct Rig {
    journal: Arc<Journal>,
    compile_fail: Arc<AtomicBool>,
    invoke_fail: Arc<AtomicBool>,
    unload_fail: Arc<AtomicBool>,
    recipe: Arc<RecipeAggregator>,
    root: PathBuf,
    _temp: TempDir,
}

impl Rig {
    /// Aggregator tracking one real source file in a temp directory.
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let (hub, _watch_rx) = WatchHub::new().unwrap();
        let recipe = Arc::new(RecipeAggregator::new(hub));

        let src = temp.path().join("hot.rs");
        std::fs::write(&src, "// hot unit\n").unwrap();
        recipe.add_file(src, FileKind::Source).unwrap();

        Self {
            journal: Arc::new(Journal::default()),
            compile_fail: Arc::new(AtomicBool::new(false)),
            invoke_fail: Arc::new(AtomicBool::new(false)),
            unload_fail: Arc::new(AtomicBool::new(false)),
            root: temp.path().to_path_buf(),
            recipe,
            _temp: temp,
        }
    }

    /// Aggregator with no files at all.
    fn empty() -> Self {
        let rig = Self::new();
        rig.recipe.remove_file(&rig.root.join("hot.rs"), FileKind::Source);
        rig
    }

    fn controller(&self) -> HotSwap<FakeCompiler, FakeIsolator> {
        let compiler = FakeCompiler {
            journal: Arc::clone(&self.journal),
            fail: Arc::clone(&self.compile_fail),
        };
        let isolator = FakeIsolator {
            journal: Arc::clone(&self.journal),
            fail_invoke: Arc::clone(&self.invoke_fail),
            fail_unload: Arc::clone(&self.unload_fail),
        };
        HotSwap::new(
            Arc::clone(&self.recipe),
            BuildProfile::default(),
            compiler,
            isolator,
        )
    }

    fn change(&self) -> DirChange {
        DirChange {
            dir: self.root.clone(),
            path: self.root.join("hot.rs"),
            kind: ChangeKind::Modified,
        }
    }
}

async fn wait_until(journal: &Journal, event: &str) {
    for _ in 0..500 {
        if journal.contains(event) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event `{event}` never appeared in {:?}", journal.events());
}

async fn finish(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("controller did not stop")
        .expect("controller panicked");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_successful_build_swaps_in_new_context() {
    let rig = Rig::new();
    let (tx, rx) = mpsc::channel(16);

    tx.send(rig.change()).await.unwrap();
    drop(tx);
    rig.controller().run(rx, None).await;

    // Shutdown unloads the context that the swap activated.
    assert_eq!(
        rig.journal.events(),
        vec!["compile 1", "load 1", "invoke 1", "unload 1"]
    );
    assert_eq!(rig.journal.max_live.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failing_build_leaves_active_context_untouched() {
    let rig = Rig::new();
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(rig.controller().run(rx, None));

    tx.send(rig.change()).await.unwrap();
    wait_until(&rig.journal, "invoke 1").await;

    rig.compile_fail.store(true, Ordering::SeqCst);
    tx.send(rig.change()).await.unwrap();
    wait_until(&rig.journal, "compile 2").await;

    // The failed build must not have disturbed the loaded context.
    assert!(!rig.journal.contains("unload 1"));

    drop(tx);
    finish(handle).await;

    // Context 1 survives until shutdown, after the failed build.
    assert!(rig.journal.index_of("unload 1") > rig.journal.index_of("compile 2"));
    assert_eq!(rig.journal.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_queued_signals_coalesce_into_one_rebuild() {
    let rig = Rig::new();
    let (tx, rx) = mpsc::channel(16);

    for _ in 0..4 {
        tx.send(rig.change()).await.unwrap();
    }
    drop(tx);
    rig.controller().run(rx, None).await;

    // Latest request wins; intermediates are dropped.
    assert_eq!(rig.journal.builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sequential_swaps_unload_before_load() {
    let rig = Rig::new();
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(rig.controller().run(rx, None));

    tx.send(rig.change()).await.unwrap();
    wait_until(&rig.journal, "invoke 1").await;

    tx.send(rig.change()).await.unwrap();
    wait_until(&rig.journal, "invoke 2").await;

    drop(tx);
    finish(handle).await;

    // Old context fully released before the new one exists.
    assert!(rig.journal.index_of("unload 1") < rig.journal.index_of("load 2"));
    assert_eq!(rig.journal.max_live.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unload_failure_halts_further_swaps() {
    let rig = Rig::new();
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(rig.controller().run(rx, None));

    tx.send(rig.change()).await.unwrap();
    wait_until(&rig.journal, "invoke 1").await;

    rig.unload_fail.store(true, Ordering::SeqCst);
    tx.send(rig.change()).await.unwrap();

    // Controller must stop on its own, with the sender still alive.
    finish(handle).await;

    assert!(rig.journal.contains("unload 1 failed"));
    assert!(!rig.journal.contains("load 2"));
    assert_eq!(rig.journal.max_live.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_entry_failure_unloads_fresh_context() {
    let rig = Rig::new();
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(rig.controller().run(rx, None));

    rig.invoke_fail.store(true, Ordering::SeqCst);
    tx.send(rig.change()).await.unwrap();
    wait_until(&rig.journal, "unload 1").await;

    // Recovered: the next build swaps in cleanly with no stale context.
    rig.invoke_fail.store(false, Ordering::SeqCst);
    tx.send(rig.change()).await.unwrap();
    wait_until(&rig.journal, "invoke 2").await;

    drop(tx);
    finish(handle).await;

    assert!(rig.journal.contains("invoke 1 failed"));
    assert_eq!(rig.journal.max_live.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_recipe_skips_build() {
    let rig = Rig::empty();
    let (tx, rx) = mpsc::channel(16);

    tx.send(DirChange {
        dir: rig.root.clone(),
        path: rig.root.join("ghost.rs"),
        kind: ChangeKind::Removed,
    })
    .await
    .unwrap();
    drop(tx);
    rig.controller().run(rx, None).await;

    assert_eq!(rig.journal.builds.load(Ordering::SeqCst), 0);
    assert!(rig.journal.events().is_empty());
}

#[tokio::test]
async fn test_initial_build_runs_without_a_signal() {
    let rig = Rig::new();
    let (tx, rx) = mpsc::channel::<DirChange>(16);

    drop(tx);
    rig.controller().with_initial_build().run(rx, None).await;

    assert_eq!(
        rig.journal.events(),
        vec!["compile 1", "load 1", "invoke 1", "unload 1"]
    );
}

#[test]
fn test_change_kind_labels() {
    assert_eq!(ChangeKind::Created.label(), "created");
    assert_eq!(ChangeKind::Modified.label(), "modified");
    assert_eq!(ChangeKind::Removed.label(), "removed");
}
