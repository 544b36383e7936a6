//! rustc-backed compiler service.
//!
//! Hot-swappable units are ordinary cdylib crates exporting the entry symbol
//! (see `swap::isolate`). The first source path is the crate root; rustc
//! resolves the remaining module files from there, which is why the source
//! list is ordered.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{BuildError, BuildProfile, Compiler, CompiledUnit};

/// Platform extension for dynamic libraries.
const fn dylib_ext() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

pub struct RustcCompiler {
    rustc: PathBuf,
    scratch_dir: PathBuf,
    /// Build sequence number. Each in-memory build gets a fresh artifact
    /// path: the previous artifact may still be loaded in the active context
    /// and must not be overwritten underneath it.
    seq: AtomicU64,
}

impl RustcCompiler {
    /// Locate rustc on PATH.
    pub fn discover() -> Result<Self, BuildError> {
        let rustc = which::which("rustc")?;
        crate::debug!("build"; "using compiler: {}", rustc.display());
        Ok(Self::with_binary(rustc))
    }

    pub fn with_binary(rustc: PathBuf) -> Self {
        Self {
            rustc,
            scratch_dir: std::env::temp_dir().join(format!("rekindle-{}", std::process::id())),
            seq: AtomicU64::new(0),
        }
    }

    /// Artifact location for this build: the configured output path, or a
    /// fresh file in the scratch directory for in-memory builds.
    fn artifact_path(&self, profile: &BuildProfile) -> Result<(PathBuf, bool), BuildError> {
        if !profile.in_memory
            && let Some(output) = &profile.output
        {
            return Ok((output.clone(), false));
        }

        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| BuildError::Scratch(self.scratch_dir.clone(), e))?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let artifact = self
            .scratch_dir
            .join(format!("swap_{seq}.{}", dylib_ext()));
        Ok((artifact, true))
    }
}

impl Compiler for RustcCompiler {
    fn compile(
        &self,
        profile: &BuildProfile,
        sources: &[PathBuf],
    ) -> Result<CompiledUnit, BuildError> {
        let Some(root) = sources.first() else {
            return Err(BuildError::NoSources);
        };

        let (artifact, scratch) = self.artifact_path(profile)?;
        let args = assemble_args(profile, root, &artifact);
        crate::debug!("build"; "rustc {}", display_args(&args));

        let output = Command::new(&self.rustc)
            .args(&args)
            .output()
            .map_err(BuildError::Spawn)?;

        if !output.status.success() {
            return Err(BuildError::Diagnostics(
                String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            ));
        }

        Ok(CompiledUnit { artifact, scratch })
    }
}

/// Assemble the rustc command line.
///
/// References that name an existing file become a `-L` search dir plus a
/// path-pinned `--extern`; everything else is passed as a bare `--extern`
/// resolved from the search path.
fn assemble_args(profile: &BuildProfile, root: &Path, artifact: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--crate-type".into(),
        "cdylib".into(),
        "--edition".into(),
        "2021".into(),
        "--crate-name".into(),
        crate_name(root).into(),
        "-o".into(),
        artifact.into(),
    ];

    for reference in &profile.references {
        let path = Path::new(reference);
        if path.is_file() {
            if let Some(dir) = path.parent() {
                args.push("-L".into());
                args.push(dir.into());
            }
            let mut pinned = OsString::from(extern_name(path));
            pinned.push("=");
            pinned.push(path);
            args.push("--extern".into());
            args.push(pinned);
        } else {
            args.push("--extern".into());
            args.push(sanitize_ident(reference).into());
        }
    }

    args.push(root.into());
    args
}

/// Crate name derived from the root source file.
fn crate_name(root: &Path) -> String {
    let stem = root
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hot_unit".to_string());
    sanitize_ident(&stem)
}

/// Extern name for a reference file: strip the `lib` prefix convention.
fn extern_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_prefix("lib").unwrap_or(&stem);
    sanitize_ident(stem)
}

/// Map a free-form name onto a valid crate identifier.
fn sanitize_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if ident.is_empty() {
        ident.push_str("hot_unit");
    }
    ident
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn profile_with_refs(references: Vec<String>) -> BuildProfile {
        BuildProfile {
            references,
            ..Default::default()
        }
    }

    #[test]
    fn test_assemble_args_shape() {
        let profile = profile_with_refs(vec![]);
        let args = assemble_args(&profile, Path::new("/proj/hot.rs"), Path::new("/tmp/swap_0.so"));

        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[0], "--crate-type");
        assert_eq!(args[1], "cdylib");
        assert!(args.contains(&"--crate-name".to_string()));
        assert!(args.contains(&"hot".to_string()));
        // Crate root is the only input file, and it comes last.
        assert_eq!(args.last().unwrap(), "/proj/hot.rs");
    }

    #[test]
    fn test_bare_reference_becomes_extern() {
        let profile = profile_with_refs(vec!["serde".to_string()]);
        let args = assemble_args(&profile, Path::new("/proj/hot.rs"), Path::new("/tmp/out.so"));

        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let pos = args.iter().position(|a| a == "--extern").unwrap();
        assert_eq!(args[pos + 1], "serde");
    }

    #[test]
    fn test_file_reference_becomes_search_dir_and_pinned_extern() {
        let temp = TempDir::new().unwrap();
        let dep = temp.path().join("libdep.rlib");
        std::fs::write(&dep, b"").unwrap();

        let profile = profile_with_refs(vec![dep.display().to_string()]);
        let args = assemble_args(&profile, Path::new("/proj/hot.rs"), Path::new("/tmp/out.so"));

        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let l_pos = args.iter().position(|a| a == "-L").unwrap();
        assert_eq!(args[l_pos + 1], temp.path().display().to_string());

        let pinned = format!("dep={}", dep.display());
        assert!(args.contains(&pinned));
    }

    #[test]
    fn test_sanitize_ident() {
        assert_eq!(sanitize_ident("hot-unit"), "hot_unit");
        assert_eq!(sanitize_ident("3d"), "_3d");
        assert_eq!(sanitize_ident(""), "hot_unit");
    }

    #[test]
    fn test_empty_source_list_is_rejected() {
        let compiler = RustcCompiler::with_binary(PathBuf::from("rustc"));
        let profile = BuildProfile {
            timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };

        let err = compiler.compile(&profile, &[]).unwrap_err();
        assert!(matches!(err, BuildError::NoSources));
    }

    #[test]
    fn test_in_memory_artifacts_get_fresh_paths() {
        let compiler = RustcCompiler::with_binary(PathBuf::from("rustc"));
        let profile = BuildProfile::default();

        let (first, scratch_first) = compiler.artifact_path(&profile).unwrap();
        let (second, scratch_second) = compiler.artifact_path(&profile).unwrap();
        assert_ne!(first, second);
        assert!(scratch_first && scratch_second);
    }

    #[test]
    fn test_output_mode_uses_configured_path() {
        let compiler = RustcCompiler::with_binary(PathBuf::from("rustc"));
        let profile = BuildProfile {
            in_memory: false,
            output: Some(PathBuf::from("/out/unit.so")),
            ..Default::default()
        };

        let (artifact, scratch) = compiler.artifact_path(&profile).unwrap();
        assert_eq!(artifact, PathBuf::from("/out/unit.so"));
        assert!(!scratch);
    }
}
