// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel source registration, compilation, and entry-point lookup.
//!
//! The cache tracks registered WGSL sources (on-disk files, whole
//! directories, or embedded `include_str!` constants) and compiles each
//! exactly once. Registration is idempotent, keyed by canonical path for
//! files and by name for embedded sources — re-registering the same source
//! is a no-op. Compilation goes through naga first so a compile failure
//! surfaces as [`Error::Build`] with the full diagnostic text; entry
//! points are resolved by name into one table spanning all sources.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One compute entry point discovered in a WGSL source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointInfo {
    /// Entry-point function name.
    pub name: String,
    /// Declared `@workgroup_size`.
    pub workgroup_size: [u32; 3],
}

/// A compiled, launchable kernel.
pub struct CompiledKernel {
    /// Source key (canonical path or embedded name) the kernel came from.
    pub source: String,
    /// Declared `@workgroup_size`.
    pub workgroup_size: [u32; 3],
    /// Ready compute pipeline (auto layout, bound by ordered buffers).
    pub pipeline: wgpu::ComputePipeline,
}

enum SourceKind {
    /// WGSL file on disk, read at load time.
    File(PathBuf),
    /// Embedded source text (shipped via `include_str!`).
    Embedded(String),
}

struct Registered {
    key: String,
    kind: SourceKind,
    loaded: bool,
}

/// Parse a WGSL source and list its compute entry points.
///
/// Pure front-end pass (naga parse + validation), usable without a
/// device. This is the diagnostic path [`KernelCache::load`] reuses.
///
/// # Errors
///
/// `Build` carrying the naga diagnostic, attributed to `source_key`.
pub fn parse_entry_points(source_key: &str, source: &str) -> Result<Vec<EntryPointInfo>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| Error::Build {
        source: source_key.to_string(),
        diagnostic: e.emit_to_string(source),
    })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| Error::Build {
        source: source_key.to_string(),
        diagnostic: e.emit_to_string(source),
    })?;
    Ok(module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Compute)
        .map(|ep| EntryPointInfo {
            name: ep.name.clone(),
            workgroup_size: ep.workgroup_size,
        })
        .collect())
}

/// Registered kernel sources plus the compiled entry-point table.
#[derive(Default)]
pub struct KernelCache {
    sources: Vec<Registered>,
    kernels: HashMap<String, CompiledKernel>,
    compile_count: usize,
}

impl KernelCache {
    /// Register a WGSL file. Keyed by canonical path; returns false when
    /// the path was already registered (no-op).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the path cannot be canonicalized.
    pub fn add_file(&mut self, path: &Path) -> Result<bool> {
        let canonical = path.canonicalize().map_err(|e| {
            Error::InvalidArgument(format!("kernel file {}: {e}", path.display()))
        })?;
        let key = canonical.display().to_string();
        if self.sources.iter().any(|s| s.key == key) {
            return Ok(false);
        }
        self.sources.push(Registered {
            key,
            kind: SourceKind::File(canonical),
            loaded: false,
        });
        Ok(true)
    }

    /// Register every `.wgsl` file in a directory (non-recursive, sorted
    /// for a deterministic load order). Returns the number of new
    /// registrations.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the directory cannot be read.
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::InvalidArgument(format!("kernel dir {}: {e}", dir.display()))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "wgsl"))
            .collect();
        paths.sort();
        let mut added = 0;
        for p in &paths {
            if self.add_file(p)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Register an embedded source under a unique name. Re-registering
    /// the same name is a no-op returning false — this is how process
    /// factories register their kernel exactly once per app.
    pub fn add_source(&mut self, name: &str, source: &str) -> bool {
        if self.sources.iter().any(|s| s.key == name) {
            return false;
        }
        self.sources.push(Registered {
            key: name.to_string(),
            kind: SourceKind::Embedded(source.to_string()),
            loaded: false,
        });
        true
    }

    /// Number of registered sources not yet compiled.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.sources.iter().filter(|s| !s.loaded).count()
    }

    /// Total compilations performed over the cache's lifetime.
    #[must_use]
    pub const fn compile_count(&self) -> usize {
        self.compile_count
    }

    /// Number of registered sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Compile every registered, not-yet-loaded source. Returns the
    /// number of sources compiled by this call; a second call after
    /// success compiles nothing.
    ///
    /// # Errors
    ///
    /// `Build` with the compiler diagnostic on the first failing source
    /// (already-compiled sources stay loaded), or on a duplicate entry-
    /// point name across sources.
    pub fn load(&mut self, device: &wgpu::Device) -> Result<usize> {
        let mut compiled = 0;
        for i in 0..self.sources.len() {
            if self.sources[i].loaded {
                continue;
            }
            let key = self.sources[i].key.clone();
            let text = match &self.sources[i].kind {
                SourceKind::File(path) => {
                    std::fs::read_to_string(path).map_err(|e| Error::Build {
                        source: key.clone(),
                        diagnostic: format!("cannot read source: {e}"),
                    })?
                }
                SourceKind::Embedded(src) => src.clone(),
            };

            let entry_points = parse_entry_points(&key, &text)?;
            for ep in &entry_points {
                if let Some(existing) = self.kernels.get(&ep.name) {
                    return Err(Error::Build {
                        source: key.clone(),
                        diagnostic: format!(
                            "entry point '{}' already defined by '{}'",
                            ep.name, existing.source
                        ),
                    });
                }
            }

            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&key),
                source: wgpu::ShaderSource::Wgsl(text.as_str().into()),
            });
            for ep in entry_points {
                let pipeline =
                    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(&ep.name),
                        layout: None,
                        module: &module,
                        entry_point: &ep.name,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        cache: None,
                    });
                self.kernels.insert(
                    ep.name.clone(),
                    CompiledKernel {
                        source: key.clone(),
                        workgroup_size: ep.workgroup_size,
                        pipeline,
                    },
                );
            }
            self.sources[i].loaded = true;
            self.compile_count += 1;
            compiled += 1;
        }
        Ok(compiled)
    }

    /// Resolve a compiled kernel by entry-point name.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown name (or one whose source has not
    /// been loaded yet).
    pub fn kernel(&self, name: &str) -> Result<&CompiledKernel> {
        self.kernels.get(name).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "unknown kernel '{name}' ({} loaded)",
                self.kernels.len()
            ))
        })
    }

    /// Names of all compiled kernels, sorted (reporting surface).
    #[must_use]
    pub fn kernel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const GOOD_SHADER: &str = r"
@group(0) @binding(0) var<storage, read_write> buf: array<u32>;

@compute @workgroup_size(64)
fn bump(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&buf)) {
        buf[gid.x] = buf[gid.x] + 1u;
    }
}
";

    #[test]
    fn parse_finds_compute_entry_point() {
        let eps = parse_entry_points("good", GOOD_SHADER).expect("valid WGSL");
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].name, "bump");
        assert_eq!(eps[0].workgroup_size, [64, 1, 1]);
    }

    #[test]
    fn parse_error_carries_diagnostic() {
        let err = parse_entry_points("bad.wgsl", "fn nope( {").expect_err("syntax error");
        match err {
            Error::Build { source, diagnostic } => {
                assert_eq!(source, "bad.wgsl");
                assert!(!diagnostic.is_empty(), "diagnostic must not be empty");
            }
            other => panic!("expected Build error, got {other}"),
        }
    }

    #[test]
    fn validation_error_carries_diagnostic() {
        // Parses but fails validation: assigning a float to a u32 array.
        let bad = r"
@group(0) @binding(0) var<storage, read_write> buf: array<u32>;
@compute @workgroup_size(1)
fn broken() {
    buf[0] = 1.5;
}
";
        let err = parse_entry_points("broken.wgsl", bad).expect_err("type error");
        assert!(matches!(err, Error::Build { .. }));
    }

    #[test]
    fn embedded_registration_is_idempotent() {
        let mut cache = KernelCache::default();
        assert!(cache.add_source("bump", GOOD_SHADER));
        assert!(!cache.add_source("bump", GOOD_SHADER), "second add is a no-op");
        assert_eq!(cache.source_count(), 1);
        assert_eq!(cache.pending_count(), 1);
        assert_eq!(cache.compile_count(), 0);
    }

    #[test]
    fn file_registration_keyed_by_canonical_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bump.wgsl");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(GOOD_SHADER.as_bytes()).expect("write");

        let mut cache = KernelCache::default();
        assert!(cache.add_file(&path).expect("register"));
        // Same file through a non-normalized path collapses to one entry.
        let dotted = dir.path().join(".").join("bump.wgsl");
        assert!(!cache.add_file(&dotted).expect("re-register"));
        assert_eq!(cache.source_count(), 1);
    }

    #[test]
    fn add_dir_picks_up_only_wgsl() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.wgsl"), GOOD_SHADER).expect("a");
        std::fs::write(dir.path().join("notes.txt"), "not a shader").expect("txt");

        let mut cache = KernelCache::default();
        assert_eq!(cache.add_dir(dir.path()).expect("dir"), 1);
        assert_eq!(cache.add_dir(dir.path()).expect("dir again"), 0);
    }

    #[test]
    fn missing_file_is_invalid_argument() {
        let mut cache = KernelCache::default();
        let err = cache
            .add_file(Path::new("/nonexistent/kernel.wgsl"))
            .expect_err("missing file");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn unknown_kernel_lookup_fails() {
        let cache = KernelCache::default();
        assert!(cache.kernel("fft_radix2").is_err());
    }
}
