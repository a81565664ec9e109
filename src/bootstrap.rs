//! Bootstrap resolution
//!
//! Locates a valid database file among ranked candidate locations, or
//! materializes one from the bundled seed asset. Validity is decided by
//! exact byte size only:
//! 1. Integrity sweep: every existing candidate of the wrong size is deleted
//! 2. Reuse search: the first candidate still holding a valid file wins
//! 3. Materialization: copy the seed to each candidate in turn and keep the
//!    first copy that verifies; wrong-sized copies are deleted again

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Result};

/// One ranked filesystem path considered during bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLocation {
    pub path: PathBuf,
    /// Higher is tried first
    pub priority: i32,
    pub expected_size: u64,
}

impl CandidateLocation {
    pub fn new(path: impl Into<PathBuf>, priority: i32, expected_size: u64) -> Self {
        Self { path: path.into(), priority, expected_size }
    }
}

/// Writes the seed asset to a candidate path
pub trait Materializer: Send + Sync {
    /// Copy `seed` to `dest`, returning the number of bytes reported written.
    ///
    /// The reported count is not trusted; the resolver re-reads the file size.
    fn materialize(&self, seed: &Path, dest: &Path) -> io::Result<u64>;
}

/// Plain filesystem copy, creating missing parent directories
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCopy;

impl Materializer for FsCopy {
    fn materialize(&self, seed: &Path, dest: &Path) -> io::Result<u64> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::copy(seed, dest)
    }
}

/// How the resolved file came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Reused,
    Materialized,
}

impl BootstrapOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            BootstrapOutcome::Reused => "reused",
            BootstrapOutcome::Materialized => "materialized",
        }
    }
}

/// A validated, ready-to-open database file
#[derive(Debug, Clone)]
pub struct Resolution {
    pub path: PathBuf,
    pub outcome: BootstrapOutcome,
    /// What was checked, deleted and tried along the way
    pub trail: Vec<String>,
}

/// Resolves a logical database name to a validated file path
#[derive(Clone)]
pub struct BootstrapResolver {
    materializer: Arc<dyn Materializer>,
}

impl Default for BootstrapResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapResolver {
    pub fn new() -> Self {
        Self::with_materializer(FsCopy)
    }

    pub fn with_materializer(materializer: impl Materializer + 'static) -> Self {
        Self { materializer: Arc::new(materializer) }
    }

    /// Produce a valid file path for `name`.
    ///
    /// `obsolete` paths are removed before anything else; `candidates` may be
    /// given in any order and are searched by descending priority.
    pub fn resolve(
        &self,
        name: &str,
        seed: &Path,
        candidates: &[CandidateLocation],
        obsolete: &[PathBuf],
    ) -> Result<Resolution> {
        let mut trail = Vec::new();

        remove_obsolete(obsolete, &mut trail);

        if candidates.is_empty() {
            trail.push("no candidate locations".to_string());
            return Err(Error::BootstrapFailed { name: name.to_string(), trail });
        }

        let mut ranked: Vec<&CandidateLocation> = candidates.iter().collect();
        ranked.sort_by(|a, b| b.priority.cmp(&a.priority));

        // ========== Integrity sweep ==========

        tracing::debug!(db = name, "checking for existing database files");
        for candidate in &ranked {
            sweep(candidate, &mut trail);
        }

        // ========== Reuse search ==========

        for candidate in &ranked {
            if file_size(&candidate.path) == Some(candidate.expected_size) {
                tracing::debug!(db = name, path = %candidate.path.display(), "reusing existing database file");
                trail.push(format!("reused {}", candidate.path.display()));
                return Ok(Resolution {
                    path: candidate.path.clone(),
                    outcome: BootstrapOutcome::Reused,
                    trail,
                });
            }
        }

        // ========== Materialization ==========

        if let Err(e) = fs::metadata(seed) {
            tracing::error!(db = name, seed = %seed.display(), "seed asset unavailable: {}", e);
            trail.push(format!("seed asset {} unavailable: {}", seed.display(), e));
            return Err(Error::BootstrapFailed { name: name.to_string(), trail });
        }

        for candidate in &ranked {
            if self.try_materialize(name, seed, candidate, &mut trail) {
                return Ok(Resolution {
                    path: candidate.path.clone(),
                    outcome: BootstrapOutcome::Materialized,
                    trail,
                });
            }
        }

        tracing::error!(db = name, "no candidate location could hold a valid database file");
        Err(Error::BootstrapFailed { name: name.to_string(), trail })
    }

    /// Copy the seed to one candidate and verify the size of the result
    fn try_materialize(&self, name: &str, seed: &Path, candidate: &CandidateLocation, trail: &mut Vec<String>) -> bool {
        let path = &candidate.path;

        // A wrong-sized file that survived the sweep is never overwritten in place
        if path.exists() {
            trail.push(format!("skipped {}: stale file could not be removed", path.display()));
            return false;
        }

        tracing::debug!(db = name, path = %path.display(), "copying seed database");
        if let Err(e) = self.materializer.materialize(seed, path) {
            tracing::warn!(db = name, path = %path.display(), "copy failed: {}", e);
            trail.push(format!("copy to {} failed: {}", path.display(), e));
            discard(path);
            return false;
        }

        match file_size(path) {
            Some(size) if size == candidate.expected_size => {
                tracing::info!(db = name, path = %path.display(), "materialized seed database");
                trail.push(format!("copied seed to {}", path.display()));
                true
            }
            Some(size) => {
                tracing::warn!(
                    db = name,
                    path = %path.display(),
                    "copied file is {} bytes instead of {}, deleting it",
                    size,
                    candidate.expected_size
                );
                trail.push(format!(
                    "copy to {} produced {} bytes instead of {}",
                    path.display(),
                    size,
                    candidate.expected_size
                ));
                discard(path);
                false
            }
            None => {
                trail.push(format!("copy to {} left no file", path.display()));
                false
            }
        }
    }
}

/// Delete an existing candidate file whose size differs from the expected size
fn sweep(candidate: &CandidateLocation, trail: &mut Vec<String>) {
    let path = &candidate.path;
    let size = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            trail.push(format!("{} is not a regular file", path.display()));
            return;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            trail.push(format!("cannot inspect {}: {}", path.display(), e));
            return;
        }
    };

    if size == candidate.expected_size {
        tracing::debug!(path = %path.display(), "file has the expected size {}", size);
        return;
    }

    tracing::warn!(
        path = %path.display(),
        "file has {} bytes instead of the expected {}, deleting it",
        size,
        candidate.expected_size
    );
    match fs::remove_file(path) {
        Ok(()) => trail.push(format!("deleted {} ({} bytes, expected {})", path.display(), size, candidate.expected_size)),
        Err(e) => trail.push(format!("failed to delete {}: {}", path.display(), e)),
    }
}

fn remove_obsolete(obsolete: &[PathBuf], trail: &mut Vec<String>) {
    for path in obsolete {
        if !path.exists() {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "deleted database file from obsolete location");
                trail.push(format!("deleted obsolete copy {}", path.display()));
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "could not delete obsolete copy: {}", e);
                trail.push(format!("failed to delete obsolete copy {}: {}", path.display(), e));
            }
        }
    }
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::error!(path = %path.display(), "could not delete invalid copy: {}", e);
        }
    }
}
