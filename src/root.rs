//! Project root discovery.
//!
//! The root is the nearest directory, walking outward from a start path,
//! that carries one of the project markers. Inside a sandboxed run the
//! start path defaults to the caller's original working directory, so a
//! script that has been moved into a temp directory still finds its project.

use std::path::{Path, PathBuf};

use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Name of the project configuration file, which also marks the root.
pub const CONFIG_FILE: &str = "sandbox-snap.toml";

/// Suffix of project files that mark the root.
pub const PROJECT_SUFFIX: &str = ".proj";

/// Version-control directory that marks a repository root.
pub const VCS_MARKER: &str = ".git";

/// Which marker identified the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The fixed-name configuration file.
    ConfigFile,
    /// A file with the project suffix.
    ProjectFile,
    /// The version-control root.
    VcsRoot,
}

/// Markers checked at each directory level, in priority order.
#[derive(Debug, Clone)]
pub struct RootMarkers {
    pub config_file: String,
    pub project_suffix: String,
    pub vcs_dir: String,
}

impl Default for RootMarkers {
    fn default() -> Self {
        Self {
            config_file: CONFIG_FILE.to_string(),
            project_suffix: PROJECT_SUFFIX.to_string(),
            vcs_dir: VCS_MARKER.to_string(),
        }
    }
}

impl RootMarkers {
    /// Returns the highest-priority marker present in `dir`.
    fn matching(&self, dir: &Path) -> Option<Marker> {
        if dir.join(&self.config_file).is_file() {
            return Some(Marker::ConfigFile);
        }
        if self.has_project_file(dir) {
            return Some(Marker::ProjectFile);
        }
        if dir.join(&self.vcs_dir).exists() {
            return Some(Marker::VcsRoot);
        }
        None
    }

    fn has_project_file(&self, dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        entries.flatten().any(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.len() > self.project_suffix.len()
                && name.ends_with(&self.project_suffix)
                && entry.path().is_file()
        })
    }
}

/// A resolved project root and the marker that identified it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMatch {
    pub root: PathBuf,
    pub marker: Marker,
}

/// Locates project roots.
#[derive(Debug, Clone, Default)]
pub struct RootResolver {
    markers: RootMarkers,
}

impl RootResolver {
    /// Creates a resolver with the default markers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver with custom markers.
    pub fn with_markers(markers: RootMarkers) -> Self {
        Self { markers }
    }

    /// Resolves the project root from `start`, or from the default start path.
    pub fn resolve(&self, start: Option<&Path>) -> Result<PathBuf> {
        self.resolve_match(start).map(|m| m.root)
    }

    /// Resolves the project root and reports which marker matched.
    pub fn resolve_match(&self, start: Option<&Path>) -> Result<RootMatch> {
        let start = match start {
            Some(path) => path.to_path_buf(),
            None => default_start()?,
        };
        if !start.exists() {
            return Err(Error::InvalidStartPath(start));
        }
        let start = start
            .canonicalize()
            .map_err(|_| Error::InvalidStartPath(start.clone()))?;

        for dir in start.ancestors() {
            if let Some(marker) = self.markers.matching(dir) {
                tracing::debug!(root = ?dir, ?marker, "resolved project root");
                return Ok(RootMatch {
                    root: dir.to_path_buf(),
                    marker,
                });
            }
        }
        Err(Error::RootNotFound(start))
    }
}

/// The caller's real working directory: the one recorded by an active
/// strict run if it still exists, else the process working directory.
fn default_start() -> Result<PathBuf> {
    if let Some(ctx) = ExecutionContext::current() {
        if let Some(dir) = ctx.live_working_dir() {
            return Ok(dir.to_path_buf());
        }
    }
    Ok(std::env::current_dir()?)
}

/// Resolves the project root with the default markers and start path.
pub fn project_root() -> Result<PathBuf> {
    RootResolver::new().resolve(None)
}
