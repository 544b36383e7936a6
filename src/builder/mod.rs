//! Build orchestration.
//!
//! The [`Compiler`] trait is the seam to the external compiler service; the
//! production implementation shells out to rustc ([`RustcCompiler`]).
//! Building is side-effect-free with respect to the running isolated context:
//! a build produces an artifact or diagnostics, never a swap.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

mod rustc;

pub use rustc::RustcCompiler;

/// Immutable configuration for one build invocation.
#[derive(Debug, Clone)]
pub struct BuildProfile {
    /// Compile to a fresh scratch artifact instead of a fixed output path.
    pub in_memory: bool,
    /// Artifact path when `in_memory` is false.
    pub output: Option<PathBuf>,
    /// Reference list: file paths to compiled libraries, or bare registry
    /// names resolved from the library search path.
    pub references: Vec<String>,
    /// Optional bound on the compiler-service call.
    pub timeout: Option<Duration>,
}

impl Default for BuildProfile {
    fn default() -> Self {
        Self {
            in_memory: true,
            output: None,
            references: Vec::new(),
            timeout: None,
        }
    }
}

impl BuildProfile {
    /// Extend the reference list with the recipe's reference files and
    /// external reference names, skipping duplicates.
    pub fn with_recipe_refs(mut self, ref_files: &[PathBuf], externs: &[String]) -> Self {
        for file in ref_files {
            let entry = file.display().to_string();
            if !self.references.contains(&entry) {
                self.references.push(entry);
            }
        }
        for name in externs {
            if !self.references.contains(name) {
                self.references.push(name.clone());
            }
        }
        self
    }
}

/// Opaque handle to the artifact a successful build produced.
///
/// Owned by exactly one isolated execution context once loaded; `scratch`
/// marks in-memory artifacts the context deletes on unload.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub artifact: PathBuf,
    pub scratch: bool,
}

/// Build failures. All recoverable: reported, no state change.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("recipe has no source files")]
    NoSources,

    #[error("compiler not found on PATH")]
    CompilerMissing(#[from] which::Error),

    #[error("failed to prepare build output directory `{0}`")]
    Scratch(PathBuf, #[source] std::io::Error),

    #[error("failed to run compiler")]
    Spawn(#[source] std::io::Error),

    #[error("compilation failed:\n{0}")]
    Diagnostics(String),

    #[error("build timed out after {0:?}")]
    Timeout(Duration),
}

/// The external compiler service.
///
/// Accepts an ordered list of source file paths plus a build profile and
/// returns a loadable compiled unit or diagnostics. Implementations must not
/// mutate any running code.
pub trait Compiler: Send + Sync + 'static {
    fn compile(&self, profile: &BuildProfile, sources: &[PathBuf])
    -> Result<CompiledUnit, BuildError>;
}
