//! Hot-swap controller.
//!
//! Sole consumer of the rebuild channel. One state variable: the active
//! isolated context (zero or one). Rebuilds are serialized by construction -
//! one actor task - and signals that queue up while a build is in flight are
//! coalesced when the task comes back around: the latest request wins,
//! intermediate ones are dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver as ShutdownRx;
use tokio::sync::mpsc;

use super::isolate::Isolator;
use crate::builder::{BuildError, BuildProfile, Compiler, CompiledUnit};
use crate::logger;
use crate::recipe::RecipeAggregator;
use crate::watch::DirChange;

pub struct HotSwap<C: Compiler, I: Isolator> {
    recipe: Arc<RecipeAggregator>,
    profile: BuildProfile,
    compiler: Arc<C>,
    isolator: I,
    /// The at-most-one live isolated context. Owned exclusively here.
    active: Option<I::Context>,
    /// Set when unload fails: a context may still be partially resident, so
    /// no further swap is allowed.
    halted: bool,
    initial_build: bool,
    builds: u64,
}

impl<C: Compiler, I: Isolator> HotSwap<C, I> {
    pub fn new(
        recipe: Arc<RecipeAggregator>,
        profile: BuildProfile,
        compiler: C,
        isolator: I,
    ) -> Self {
        Self {
            recipe,
            profile,
            compiler: Arc::new(compiler),
            isolator,
            active: None,
            halted: false,
            initial_build: false,
            builds: 0,
        }
    }

    /// Build and load once at startup instead of waiting for the first
    /// change signal.
    pub fn with_initial_build(mut self) -> Self {
        self.initial_build = true;
        self
    }

    /// Run until the change channel closes, a shutdown signal arrives, or an
    /// unload failure halts swapping. The active context is unloaded on the
    /// way out.
    pub async fn run(mut self, mut changes: mpsc::Receiver<DirChange>, shutdown: Option<ShutdownRx<()>>) {
        if self.initial_build {
            self.rebuild().await;
        }

        loop {
            if self.halted {
                crate::log!("error"; "hot swapping halted; restart to recover");
                break;
            }

            tokio::select! {
                biased;
                maybe = changes.recv() => {
                    let Some(change) = maybe else { break };
                    let change = drain_latest(&mut changes, change);
                    crate::debug!(
                        "swap";
                        "{}: {}",
                        change.kind.label(),
                        change.path.display()
                    );
                    self.rebuild().await;
                }
                _ = wait_shutdown(&shutdown) => {
                    crate::debug!("swap"; "shutdown signal received");
                    break;
                }
            }
        }

        self.unload_active();
    }

    /// One rebuild attempt: snapshot the recipe, compile, swap on success.
    async fn rebuild(&mut self) {
        let sources = self.recipe.source_files();
        if sources.is_empty() {
            logger::status_warning("recipe has no source files; nothing to build");
            return;
        }

        let profile = self
            .profile
            .clone()
            .with_recipe_refs(&self.recipe.reference_files(), &self.recipe.extern_refs());

        self.builds += 1;
        crate::log!(
            "build";
            "rebuild #{} ({} source file{})",
            self.builds,
            sources.len(),
            if sources.len() == 1 { "" } else { "s" }
        );

        match run_build(Arc::clone(&self.compiler), profile, sources).await {
            Ok(unit) => self.swap(unit),
            Err(e) => logger::status_error("build failed", &render(&e)),
        }
    }

    /// Unload-then-load. Strictly sequential: the old context must be fully
    /// released before the new one is created, and a failed unload forbids
    /// the load entirely.
    fn swap(&mut self, unit: CompiledUnit) {
        if let Some(old) = self.active.take()
            && let Err(e) = self.isolator.unload(old)
        {
            self.halted = true;
            logger::status_error("unload failed; refusing further swaps", &render(&e));
            return;
        }

        let ctx = match self.isolator.load(&unit) {
            Ok(ctx) => ctx,
            Err(e) => {
                logger::status_error("load failed", &render(&e));
                return;
            }
        };

        if let Err(e) = self.isolator.invoke(&ctx) {
            logger::status_error("entry point failed", &render(&e));
            // A context whose entry never ran is not worth keeping alive.
            if let Err(e) = self.isolator.unload(ctx) {
                self.halted = true;
                logger::status_error("unload failed; refusing further swaps", &render(&e));
            }
            return;
        }

        self.active = Some(ctx);
        logger::status_success(&format!("swapped in {}", unit.artifact.display()));
    }

    fn unload_active(&mut self) {
        if let Some(ctx) = self.active.take()
            && let Err(e) = self.isolator.unload(ctx)
        {
            crate::log!("error"; "failed to unload active context on shutdown: {}", e);
        }
    }
}

/// Collapse everything already queued behind `first` into one request.
fn drain_latest(changes: &mut mpsc::Receiver<DirChange>, first: DirChange) -> DirChange {
    let mut latest = first;
    let mut dropped = 0usize;
    while let Ok(next) = changes.try_recv() {
        latest = next;
        dropped += 1;
    }
    if dropped > 0 {
        crate::debug!("swap"; "coalesced {} queued signal(s)", dropped);
    }
    latest
}

/// Resolve when a shutdown signal arrives; pend forever without one.
async fn wait_shutdown(shutdown: &Option<ShutdownRx<()>>) {
    let Some(rx) = shutdown else {
        return std::future::pending::<()>().await;
    };

    // Poll-based since the sender side lives on the Ctrl+C handler thread.
    loop {
        if rx.try_recv().is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Run the compiler on the blocking pool, bounded by the profile timeout.
///
/// Timeout is a reporting bound, not a kill switch: an overrunning compiler
/// process finishes on its own and its result is discarded.
async fn run_build<C: Compiler>(
    compiler: Arc<C>,
    profile: BuildProfile,
    sources: Vec<PathBuf>,
) -> Result<CompiledUnit, BuildError> {
    let limit = profile.timeout;
    let task = tokio::task::spawn_blocking(move || compiler.compile(&profile, &sources));

    let joined = match limit {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| BuildError::Timeout(limit))?,
        None => task.await,
    };

    joined.unwrap_or_else(|e| Err(BuildError::Spawn(std::io::Error::other(e))))
}

/// Error with its source chain, one line per cause.
fn render(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(e) = cause {
        out.push('\n');
        out.push_str(&e.to_string());
        cause = e.source();
    }
    out
}
