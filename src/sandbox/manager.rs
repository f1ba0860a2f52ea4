//! Temp-directory sandboxes with structure-preserving file staging.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::SnapConfig;
use crate::error::{Error, Result};
use crate::root::RootResolver;

use super::paths;

/// Directory under the system temp dir used when no base is configured.
const DEFAULT_BASE_NAME: &str = "sandbox-snap";

/// Length of the random part of a sandbox id.
const ID_SUFFIX_LEN: usize = 12;

/// Handle to a sandbox directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    id: String,
    path: PathBuf,
}

impl Sandbox {
    /// Unique id of this sandbox.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute path of the sandbox directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the sandbox directory is still on disk.
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }
}

#[derive(Debug, Default)]
struct Registry {
    /// Sandboxes issued by this manager and not yet removed, by id.
    issued: HashMap<String, PathBuf>,
    /// Ids of sandboxes this manager has removed.
    removed: HashSet<String>,
    /// Id of the most recently created sandbox that has not been cleaned up.
    last: Option<String>,
}

impl Registry {
    /// Drops a sandbox from the live set once its directory is gone.
    fn retire(&mut self, id: &str) {
        self.issued.remove(id);
        self.removed.insert(id.to_string());
        if self.last.as_deref() == Some(id) {
            self.last = None;
        }
    }
}

/// Creates, tracks and removes sandboxes.
///
/// The manager remembers the last sandbox it created so callers may omit
/// the handle; passing handles explicitly is always supported.
#[derive(Debug, Default)]
pub struct SandboxManager {
    /// Fixed project root. If None, resolved per call.
    root: Option<PathBuf>,
    /// Base directory for sandboxes. If None, uses a temp directory.
    base_dir: Option<PathBuf>,
    registry: Mutex<Registry>,
}

impl SandboxManager {
    /// Creates a manager that resolves the project root on each call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager using the sandbox base from `config`.
    pub fn from_config(config: &SnapConfig) -> Self {
        Self {
            base_dir: config.sandbox.base_dir.clone(),
            ..Self::default()
        }
    }

    /// Stages files relative to `root` instead of the resolved project root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Creates sandboxes under `base_dir` unless a call overrides it.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the project root files are staged from.
    ///
    /// Falls back to the current directory when no root can be found.
    pub fn project_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        match RootResolver::new().resolve(None) {
            Ok(root) => Ok(root),
            Err(e) => {
                let cwd = std::env::current_dir()?;
                tracing::warn!(error = %e, cwd = ?cwd, "no project root found, staging from current directory");
                Ok(cwd)
            }
        }
    }

    /// Creates a sandbox and copies `files` into it.
    ///
    /// Every path must be relative and free of `..` components; they are
    /// all checked before anything touches the disk. Files that do not
    /// exist are skipped with a warning.
    pub fn setup<I, S>(&self, files: I, temp_base: Option<&Path>) -> Result<Sandbox>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let files = validate_all(files)?;
        let root = self.project_root()?;

        let id = generate_id();
        let base = match (temp_base, &self.base_dir) {
            (Some(base), _) => base.to_path_buf(),
            (None, Some(base)) => base.clone(),
            (None, None) => std::env::temp_dir().join(DEFAULT_BASE_NAME),
        };
        let path = create_sandbox_dir(&base, &id)?;
        let sandbox = Sandbox { id, path };

        let staged = match stage_validated(&sandbox, &root, &files) {
            Ok(staged) => staged,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&sandbox.path);
                return Err(e);
            }
        };

        tracing::info!(
            id = %sandbox.id,
            path = ?sandbox.path,
            staged,
            requested = files.len(),
            "created sandbox"
        );

        let mut registry = self.registry();
        registry
            .issued
            .insert(sandbox.id.clone(), sandbox.path.clone());
        registry.last = Some(sandbox.id.clone());
        Ok(sandbox)
    }

    /// Copies more files into an existing sandbox under the same rules as
    /// [`setup`](Self::setup). Returns how many files were copied.
    pub fn stage<I, S>(&self, sandbox: &Sandbox, files: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sandbox = self.resolve(Some(sandbox))?;
        if !sandbox.exists() {
            return Err(Error::SandboxMissing(sandbox.path));
        }
        let files = validate_all(files)?;
        let root = self.project_root()?;
        stage_validated(&sandbox, &root, &files)
    }

    /// Returns the most recently created sandbox that is still tracked.
    pub fn last(&self) -> Option<Sandbox> {
        let registry = self.registry();
        let id = registry.last.as_ref()?;
        registry.issued.get(id).map(|path| Sandbox {
            id: id.clone(),
            path: path.clone(),
        })
    }

    /// Returns the explicit handle, or the last created sandbox.
    ///
    /// Fails if there is neither, if the handle was not issued here, or if
    /// the sandbox has already been removed.
    pub fn resolve(&self, sandbox: Option<&Sandbox>) -> Result<Sandbox> {
        let sandbox = match sandbox {
            Some(sandbox) => sandbox.clone(),
            None => self.last().ok_or(Error::NoSandbox)?,
        };
        let registry = self.registry();
        match registry.issued.get(&sandbox.id) {
            Some(path) if *path == sandbox.path => Ok(sandbox),
            None if registry.removed.contains(&sandbox.id) => {
                Err(Error::SandboxMissing(sandbox.path))
            }
            _ => Err(Error::InvalidSandbox(sandbox.id)),
        }
    }

    /// Removes a sandbox directory.
    ///
    /// Returns `Ok(false)` with a warning if the directory is already gone
    /// or could not be removed. With `force`, read-only entries are made
    /// writable and removal is retried.
    pub fn cleanup(&self, sandbox: Option<&Sandbox>, force: bool) -> Result<bool> {
        let sandbox = match self.resolve(sandbox) {
            Ok(sandbox) => sandbox,
            Err(Error::SandboxMissing(path)) => {
                tracing::warn!(path = ?path, "sandbox already cleaned up");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !sandbox.path.exists() {
            tracing::warn!(id = %sandbox.id, path = ?sandbox.path, "sandbox directory already removed");
            self.registry().retire(&sandbox.id);
            return Ok(false);
        }

        let mut removed = std::fs::remove_dir_all(&sandbox.path);
        if removed.is_err() && force {
            make_writable(&sandbox.path);
            removed = std::fs::remove_dir_all(&sandbox.path);
        }
        if let Err(e) = removed {
            tracing::warn!(id = %sandbox.id, path = ?sandbox.path, error = %e, "failed to remove sandbox");
            return Ok(false);
        }

        self.registry().retire(&sandbox.id);
        tracing::info!(id = %sandbox.id, "removed sandbox");
        Ok(true)
    }
}

fn validate_all<I, S>(files: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    files
        .into_iter()
        .map(|f| paths::validate_relative(f.as_ref()))
        .collect()
}

/// Timestamp plus random alphanumeric suffix.
fn generate_id() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ID_SUFFIX_LEN)
        .collect();
    format!("{}-{}", timestamp, suffix)
}

fn create_sandbox_dir(base: &Path, id: &str) -> Result<PathBuf> {
    let path = base.join(format!("sandbox-{}", id));
    let create_error = |reason: String| Error::SandboxCreate {
        path: path.clone(),
        reason,
    };

    std::fs::create_dir_all(base).map_err(|e| create_error(e.to_string()))?;
    // Never reuse an existing directory.
    std::fs::create_dir(&path).map_err(|e| create_error(e.to_string()))?;
    if !path.is_dir() {
        return Err(create_error("directory missing after creation".to_string()));
    }
    path.canonicalize().map_err(|e| create_error(e.to_string()))
}

/// Copies already validated relative paths from `root` into the sandbox.
fn stage_validated(sandbox: &Sandbox, root: &Path, files: &[PathBuf]) -> Result<usize> {
    let mut staged = 0;
    for relative in files {
        let source = root.join(relative);
        if !source.is_file() {
            tracing::warn!(path = ?relative, root = ?root, "file to stage does not exist, skipping");
            continue;
        }
        copy_preserving(&source, &sandbox.path.join(relative))?;
        staged += 1;
    }
    Ok(staged)
}

/// Copies file content (following symlinks), creating parent directories.
pub(crate) fn copy_preserving(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, dest)?;
    tracing::debug!(from = ?source, to = ?dest, "staged file");
    Ok(())
}

/// Makes everything under `path` removable by its owner.
///
/// A directory that cannot be listed is only walked after its own mode is
/// fixed, so passes repeat until one changes nothing.
fn make_writable(path: &Path) {
    loop {
        let mut changed = false;
        for entry in WalkDir::new(path).follow_links(false) {
            match entry {
                Ok(entry) => changed |= grant_owner_write(entry.path()),
                Err(e) => {
                    tracing::debug!(path = ?e.path(), error = %e, "cannot walk sandbox entry");
                    if let Some(failed) = e.path() {
                        changed |= grant_owner_write(failed);
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Adds owner write (and list, for directories) permission.
///
/// Returns true if the mode was changed.
fn grant_owner_write(path: &Path) -> bool {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::debug!(path = ?path, error = %e, "cannot read sandbox entry");
            return false;
        }
    };
    if meta.file_type().is_symlink() {
        return false;
    }
    let mut perms = meta.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let wanted = if meta.is_dir() { 0o700 } else { 0o200 };
        if perms.mode() & wanted == wanted {
            return false;
        }
        perms.set_mode(perms.mode() | wanted);
    }
    #[cfg(not(unix))]
    {
        if !perms.readonly() {
            return false;
        }
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
    }

    match std::fs::set_permissions(path, perms) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(path = ?path, error = %e, "cannot make sandbox entry writable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        project: TempDir,
        base: TempDir,
        manager: SandboxManager,
    }

    fn fixture() -> Fixture {
        let project = TempDir::new().unwrap();
        std::fs::create_dir(project.path().join(".git")).unwrap();
        std::fs::create_dir_all(project.path().join("data/raw")).unwrap();
        std::fs::write(project.path().join("data/raw/input.csv"), "x,y\n1,2\n").unwrap();
        std::fs::write(project.path().join("file..txt"), "dots").unwrap();
        let base = TempDir::new().unwrap();
        let manager = SandboxManager::new()
            .with_root(project.path())
            .with_base_dir(base.path());
        Fixture {
            project,
            base,
            manager,
        }
    }

    #[test]
    fn generates_unique_ids() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        let suffix = a.rsplit('-').next().unwrap();
        assert!(suffix.len() >= 8);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn setup_copies_files_preserving_structure() {
        let fx = fixture();
        let sandbox = fx
            .manager
            .setup(["data/raw/input.csv", "file..txt"], None)
            .unwrap();

        assert!(sandbox.path().starts_with(fx.base.path().canonicalize().unwrap()));
        let copied = std::fs::read(sandbox.path().join("data/raw/input.csv")).unwrap();
        let original = std::fs::read(fx.project.path().join("data/raw/input.csv")).unwrap();
        assert_eq!(copied, original);
        assert!(sandbox.path().join("file..txt").is_file());
    }

    #[test]
    fn setup_honors_explicit_temp_base() {
        let fx = fixture();
        let other = TempDir::new().unwrap();
        let sandbox = fx.manager.setup(Vec::<&str>::new(), Some(other.path())).unwrap();
        assert!(sandbox.path().starts_with(other.path().canonicalize().unwrap()));
    }

    #[test]
    fn setup_skips_missing_files() {
        let fx = fixture();
        let sandbox = fx
            .manager
            .setup(["missing.csv", "data/raw/input.csv"], None)
            .unwrap();
        assert!(!sandbox.path().join("missing.csv").exists());
        assert!(sandbox.path().join("data/raw/input.csv").exists());
    }

    #[test]
    fn setup_rejects_traversal_before_creating_anything() {
        let fx = fixture();
        let err = fx
            .manager
            .setup(["data/raw/input.csv", "data/../../secret"], None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
        assert_eq!(std::fs::read_dir(fx.base.path()).unwrap().count(), 0);
        assert!(fx.manager.last().is_none());
    }

    #[test]
    fn setup_rejects_absolute_paths() {
        let fx = fixture();
        let absolute = fx.project.path().join("data/raw/input.csv");
        let err = fx
            .manager
            .setup([absolute.to_string_lossy()], None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn setup_stages_drive_like_names_on_unix() {
        let fx = fixture();
        std::fs::write(fx.project.path().join("x:data.csv"), "a,b\n").unwrap();
        let sandbox = fx.manager.setup(["x:data.csv"], None).unwrap();
        assert_eq!(
            std::fs::read(sandbox.path().join("x:data.csv")).unwrap(),
            b"a,b\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn setup_dereferences_symlinks() {
        let fx = fixture();
        std::os::unix::fs::symlink(
            fx.project.path().join("data/raw/input.csv"),
            fx.project.path().join("link.csv"),
        )
        .unwrap();
        let sandbox = fx.manager.setup(["link.csv"], None).unwrap();
        let staged = sandbox.path().join("link.csv");
        assert!(!std::fs::symlink_metadata(&staged).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(staged).unwrap(), "x,y\n1,2\n");
    }

    #[test]
    fn tracks_last_created_sandbox() {
        let fx = fixture();
        assert!(matches!(fx.manager.resolve(None), Err(Error::NoSandbox)));
        let first = fx.manager.setup(Vec::<&str>::new(), None).unwrap();
        let second = fx.manager.setup(Vec::<&str>::new(), None).unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(fx.manager.last(), Some(second));
    }

    #[test]
    fn cleanup_removes_directory_and_clears_default() {
        let fx = fixture();
        let sandbox = fx.manager.setup(["data/raw/input.csv"], None).unwrap();

        assert!(fx.manager.cleanup(None, true).unwrap());
        assert!(!sandbox.path().exists());
        assert!(fx.manager.last().is_none());
        assert!(matches!(fx.manager.cleanup(None, true), Err(Error::NoSandbox)));
    }

    #[test]
    fn cleanup_of_older_sandbox_keeps_default() {
        let fx = fixture();
        let first = fx.manager.setup(Vec::<&str>::new(), None).unwrap();
        let second = fx.manager.setup(Vec::<&str>::new(), None).unwrap();

        assert!(fx.manager.cleanup(Some(&first), true).unwrap());
        assert_eq!(fx.manager.last(), Some(second));
    }

    #[test]
    fn cleanup_twice_warns_instead_of_failing() {
        let fx = fixture();
        let sandbox = fx.manager.setup(Vec::<&str>::new(), None).unwrap();
        assert!(fx.manager.cleanup(Some(&sandbox), true).unwrap());
        assert!(!fx.manager.cleanup(Some(&sandbox), true).unwrap());
    }

    #[test]
    fn cleanup_retires_the_handle() {
        let fx = fixture();
        let sandbox = fx.manager.setup(Vec::<&str>::new(), None).unwrap();
        assert!(fx.manager.cleanup(Some(&sandbox), false).unwrap());

        assert!(fx.manager.registry().issued.is_empty());
        assert!(matches!(
            fx.manager.resolve(Some(&sandbox)),
            Err(Error::SandboxMissing(_))
        ));
    }

    #[test]
    fn externally_removed_sandbox_is_retired_on_cleanup() {
        let fx = fixture();
        let sandbox = fx.manager.setup(Vec::<&str>::new(), None).unwrap();
        std::fs::remove_dir_all(sandbox.path()).unwrap();

        assert!(!fx.manager.cleanup(None, false).unwrap());
        assert!(fx.manager.last().is_none());
        assert!(fx.manager.registry().issued.is_empty());
    }

    #[test]
    fn unusable_base_is_a_create_error() {
        let fx = fixture();
        let file_base = fx.base.path().join("not-a-dir");
        std::fs::write(&file_base, "").unwrap();

        let err = fx
            .manager
            .setup(["data/raw/input.csv"], Some(&file_base))
            .unwrap_err();
        assert!(matches!(err, Error::SandboxCreate { .. }), "{err}");
        assert!(fx.manager.last().is_none());
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let fx = fixture();
        let other = SandboxManager::new().with_root(fx.project.path());
        let foreign = other.setup(Vec::<&str>::new(), Some(fx.base.path())).unwrap();

        let err = fx.manager.cleanup(Some(&foreign), true).unwrap_err();
        assert!(matches!(err, Error::InvalidSandbox(_)));
        assert!(foreign.exists());
    }

    #[test]
    fn stage_adds_files_to_existing_sandbox() {
        let fx = fixture();
        let sandbox = fx.manager.setup(Vec::<&str>::new(), None).unwrap();
        let copied = fx.manager.stage(&sandbox, ["file..txt", "nope.txt"]).unwrap();
        assert_eq!(copied, 1);
        assert!(sandbox.path().join("file..txt").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn forced_cleanup_removes_read_only_trees() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let sandbox = fx.manager.setup(["data/raw/input.csv"], None).unwrap();
        let locked = sandbox.path().join("data/raw");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        assert!(fx.manager.cleanup(Some(&sandbox), true).unwrap());
        assert!(!sandbox.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn forced_cleanup_opens_unlistable_directories() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let sandbox = fx.manager.setup(["data/raw/input.csv"], None).unwrap();
        let nested = sandbox.path().join("data/raw/nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("out.rds"), "x").unwrap();
        std::fs::set_permissions(&nested, std::fs::Permissions::from_mode(0o200)).unwrap();
        std::fs::set_permissions(
            sandbox.path().join("data/raw"),
            std::fs::Permissions::from_mode(0o555),
        )
        .unwrap();

        assert!(fx.manager.cleanup(Some(&sandbox), true).unwrap());
        assert!(!sandbox.path().exists());
    }
}
