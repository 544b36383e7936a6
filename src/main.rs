//! Rekindle - live code hot-swapping for a running host.

#![allow(dead_code)]

mod builder;
mod cli;
mod logger;
mod manifest;
mod recipe;
mod state;
mod swap;
mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use crossbeam::channel::Receiver;

use builder::{Compiler, RustcCompiler};
use cli::{Cli, Commands};
use manifest::Manifest;
use recipe::RecipeAggregator;
use swap::{HotSwap, LibIsolator};
use watch::WatchHub;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    let shutdown_rx = state::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    match &cli.command {
        Commands::Run { manifest } => run_hot(manifest, shutdown_rx),
        Commands::Build { manifest } => build_once(manifest),
    }
}

// =============================================================================
// Run Command
// =============================================================================

/// Watch the recipe and hot-swap the compiled unit on every change.
fn run_hot(path: &Path, shutdown_rx: Receiver<()>) -> Result<()> {
    let (manifest, root) = Manifest::load(path)?;

    let (hub, watch_rx) = WatchHub::new()?;
    let recipe = Arc::new(RecipeAggregator::new(hub));
    for event in manifest.events(&root) {
        recipe.apply(event)?;
    }
    debug!("watch"; "{}", recipe.summary());
    log!("watch"; "watching {} directories", recipe.directories().len());

    let compiler = RustcCompiler::discover()?;
    let controller = HotSwap::new(Arc::clone(&recipe), manifest.profile(), compiler, LibIsolator)
        .with_initial_build();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    rt.block_on(async move {
        // Bridge the sync watch channel into the actor world (notify doesn't
        // support async delivery)
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        std::thread::spawn(move || {
            while let Ok(change) = watch_rx.recv() {
                if tx.blocking_send(change).is_err() {
                    break; // Receiver dropped
                }
            }
        });

        controller.run(rx, Some(shutdown_rx)).await;
    });

    // Release every watch subscription before exit.
    recipe.close();
    Ok(())
}

// =============================================================================
// Build Command
// =============================================================================

/// One-shot build of the manifest's recipe, no watching, no swap.
fn build_once(path: &Path) -> Result<()> {
    let (manifest, root) = Manifest::load(path)?;
    let profile = manifest
        .profile()
        .with_recipe_refs(&manifest.resolved_references(&root), &manifest.externs);
    let sources = manifest.resolved_sources(&root);

    let compiler = RustcCompiler::discover()?;
    let unit = compiler.compile(&profile, &sources)?;
    log!("build"; "compiled unit: {}", unit.artifact.display());
    Ok(())
}
