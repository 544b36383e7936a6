//! Isolated execution contexts over dynamic libraries.
//!
//! A compiled unit is a cdylib exporting the C-ABI entry symbol
//! `rekindle_entry`:
//!
//! ```ignore
//! #[no_mangle]
//! pub extern "C" fn rekindle_entry() {
//!     // new version of the hot code starts here
//! }
//! ```
//!
//! `unload` must release every resource the context holds - the library
//! handle and, for scratch builds, the artifact file - before it returns.
//! The controller never creates a new context while unload of the old one is
//! unresolved.

use std::path::PathBuf;

use libloading::{Library, Symbol};
use thiserror::Error;

use crate::builder::CompiledUnit;

/// Entry symbol every hot-swappable unit must export.
pub const ENTRY_SYMBOL: &[u8] = b"rekindle_entry\0";

type EntryFn = unsafe extern "C" fn();

/// Swap-layer errors
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("failed to load compiled unit `{path}`")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("compiled unit `{path}` exports no `rekindle_entry` symbol")]
    MissingEntry { path: PathBuf },

    #[error("failed to unload isolated context `{path}`")]
    Unload {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

/// The isolation mechanism: create/load, invoke, unload.
///
/// Exactly one context may be live at a time; that invariant is enforced by
/// the controller, not here.
pub trait Isolator: Send + Sync + 'static {
    type Context: Send;

    fn load(&self, unit: &CompiledUnit) -> Result<Self::Context, SwapError>;
    fn invoke(&self, ctx: &Self::Context) -> Result<(), SwapError>;
    fn unload(&self, ctx: Self::Context) -> Result<(), SwapError>;
}

/// One loaded dynamic library.
#[derive(Debug)]
pub struct IsolatedContext {
    lib: Library,
    artifact: PathBuf,
    scratch: bool,
}

impl IsolatedContext {
    pub fn artifact(&self) -> &PathBuf {
        &self.artifact
    }
}

/// Production isolator backed by `libloading`.
pub struct LibIsolator;

impl Isolator for LibIsolator {
    type Context = IsolatedContext;

    fn load(&self, unit: &CompiledUnit) -> Result<Self::Context, SwapError> {
        let lib = unsafe { Library::new(&unit.artifact) }.map_err(|source| SwapError::Load {
            path: unit.artifact.clone(),
            source,
        })?;

        // Probe the entry symbol up front so a malformed unit never becomes
        // the active context.
        {
            let entry: Result<Symbol<'_, EntryFn>, _> = unsafe { lib.get(ENTRY_SYMBOL) };
            if entry.is_err() {
                return Err(SwapError::MissingEntry {
                    path: unit.artifact.clone(),
                });
            }
        }

        crate::debug!("swap"; "loaded {}", unit.artifact.display());
        Ok(IsolatedContext {
            lib,
            artifact: unit.artifact.clone(),
            scratch: unit.scratch,
        })
    }

    fn invoke(&self, ctx: &Self::Context) -> Result<(), SwapError> {
        let entry: Symbol<'_, EntryFn> =
            unsafe { ctx.lib.get(ENTRY_SYMBOL) }.map_err(|_| SwapError::MissingEntry {
                path: ctx.artifact.clone(),
            })?;

        unsafe { entry() };
        Ok(())
    }

    fn unload(&self, ctx: Self::Context) -> Result<(), SwapError> {
        let IsolatedContext {
            lib,
            artifact,
            scratch,
        } = ctx;

        lib.close().map_err(|source| SwapError::Unload {
            path: artifact.clone(),
            source,
        })?;

        // Only after the handle is released may the artifact file go; a
        // still-mapped library can hold a lock on it.
        if scratch {
            let _ = std::fs::remove_file(&artifact);
        }

        crate::debug!("swap"; "unloaded {}", artifact.display());
        Ok(())
    }
}
