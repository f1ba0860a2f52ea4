//! Snapshot storage and the create/compare/update protocol.

use std::path::{Path, PathBuf};

use crate::config::SnapConfig;
use crate::context::{is_strict, ExecutionContext};
use crate::diff::SnapshotStrategy;
use crate::error::{Error, Result};
use crate::root::RootResolver;
use crate::sandbox::paths;

use super::prompt::{Confirm, TerminalPrompt};

/// Bucket used for snapshots taken outside any script run.
pub const INTERACTIVE_BUCKET: &str = "interactive";

/// Script extensions removed from bucket names, compared case-insensitively.
const SCRIPT_EXTENSIONS: &[&str] = &["r", "py", "sh", "jl", "rs", "rmd", "qmd"];

/// What a snapshot call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No snapshot existed; the value was stored.
    Created,
    /// The stored snapshot equals the value.
    Matched,
    /// The snapshot differed and was replaced after confirmation.
    Updated,
    /// The snapshot differed and was left as it was.
    NotUpdated,
}

/// Reads and writes snapshots under `<root>/<dir>/<bucket>/<name>.<ext>`.
///
/// Whether a mismatch fails or prompts is decided per call from the active
/// [`ExecutionContext`]: strict inside a sandboxed run, permissive otherwise.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore<C = TerminalPrompt> {
    /// Fixed project root. If None, resolved per call.
    root: Option<PathBuf>,
    /// Snapshot directory under the root. If None, read from the config.
    dir: Option<String>,
    confirm: C,
}

impl SnapshotStore<TerminalPrompt> {
    /// Creates a store that resolves the project root on each call.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Confirm> SnapshotStore<C> {
    /// Stores snapshots under `root` instead of the resolved project root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Overrides the snapshot directory name.
    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Uses `confirm` to decide permissive updates.
    pub fn with_confirm<D: Confirm>(self, confirm: D) -> SnapshotStore<D> {
        SnapshotStore {
            root: self.root,
            dir: self.dir,
            confirm,
        }
    }

    fn snapshot_root(&self) -> Result<PathBuf> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => RootResolver::new().resolve(None)?,
        };
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => SnapConfig::load(&root)?.snapshots.dir,
        };
        Ok(root.join(paths::validate_relative(&dir)?))
    }

    fn locate(&self, name: &str, bucket: Option<&str>, extension: &str) -> Result<PathBuf> {
        let bucket = bucket_name(bucket)?;
        let mut file = paths::validate_relative(name)?.into_os_string();
        file.push(".");
        file.push(extension);
        Ok(self.snapshot_root()?.join(bucket).join(file))
    }

    /// Returns where snapshot `name` is stored, creating its directory.
    ///
    /// The bucket is `bucket` if given, else the stem of the script being
    /// run, else [`INTERACTIVE_BUCKET`]. The file itself need not exist.
    pub fn path_for(&self, name: &str, bucket: Option<&str>, extension: &str) -> Result<PathBuf> {
        let path = self.locate(name, bucket, extension)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Returns true if snapshot `name` has been stored.
    pub fn exists(&self, name: &str, bucket: Option<&str>, extension: &str) -> Result<bool> {
        Ok(self.locate(name, bucket, extension)?.is_file())
    }

    /// Reads the stored payload of snapshot `name`.
    pub fn load(&self, name: &str, bucket: Option<&str>, extension: &str) -> Result<Vec<u8>> {
        let path = self.locate(name, bucket, extension)?;
        if !path.is_file() {
            return Err(Error::SnapshotMissing(path));
        }
        Ok(std::fs::read(&path)?)
    }

    /// Checks `value` against snapshot `name`.
    ///
    /// A missing snapshot is an error in strict mode and is created
    /// otherwise. A mismatch is an error in strict mode; otherwise it is
    /// logged and the snapshot is replaced only if the user confirms.
    pub fn record<T, S>(
        &self,
        strategy: &S,
        value: &T,
        name: &str,
        bucket: Option<&str>,
    ) -> Result<SnapshotOutcome>
    where
        T: ?Sized,
        S: SnapshotStrategy<T>,
    {
        self.check(strategy, value, name, bucket, false)
    }

    /// Like [`record`](Self::record), but also writes a missing snapshot in
    /// strict mode.
    pub fn create<T, S>(
        &self,
        strategy: &S,
        value: &T,
        name: &str,
        bucket: Option<&str>,
    ) -> Result<SnapshotOutcome>
    where
        T: ?Sized,
        S: SnapshotStrategy<T>,
    {
        self.check(strategy, value, name, bucket, true)
    }

    fn check<T, S>(
        &self,
        strategy: &S,
        value: &T,
        name: &str,
        bucket: Option<&str>,
        create_missing: bool,
    ) -> Result<SnapshotOutcome>
    where
        T: ?Sized,
        S: SnapshotStrategy<T>,
    {
        let strict = is_strict();
        let path = self.locate(name, bucket, strategy.extension())?;

        if !path.is_file() {
            if strict && !create_missing {
                return Err(Error::SnapshotMissing(path));
            }
            write_atomic(&path, &strategy.encode(value)?)?;
            tracing::info!(path = ?path, "created snapshot");
            return Ok(SnapshotOutcome::Created);
        }

        let stored = std::fs::read(&path)?;
        let diff = match strategy.compare(&stored, value) {
            Ok(diff) => diff,
            Err(Error::Serialization(e)) => {
                return Err(Error::SnapshotCorrupt {
                    path,
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        if diff.is_empty() {
            if strict {
                tracing::debug!(path = ?path, "snapshot matches");
            } else {
                tracing::info!(path = ?path, "snapshot matches");
            }
            return Ok(SnapshotOutcome::Matched);
        }

        if strict {
            return Err(Error::SnapshotMismatch {
                path,
                diff: diff.to_string(),
            });
        }

        tracing::warn!(path = ?path, differences = diff.len(), "snapshot differs:\n{}", diff);
        let question = format!("Update snapshot {}?", path.display());
        if self.confirm.confirm(&question) == Some(true) {
            write_atomic(&path, &strategy.encode(value)?)?;
            tracing::info!(path = ?path, "updated snapshot");
            Ok(SnapshotOutcome::Updated)
        } else {
            tracing::info!(path = ?path, "snapshot left unchanged");
            Ok(SnapshotOutcome::NotUpdated)
        }
    }
}

/// Picks and validates the bucket for a snapshot.
fn bucket_name(explicit: Option<&str>) -> Result<PathBuf> {
    let name = match explicit {
        Some(bucket) => strip_script_extension(bucket).to_string(),
        None => ExecutionContext::current()
            .and_then(|ctx| ctx.script)
            .and_then(|script| {
                script
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| INTERACTIVE_BUCKET.to_string()),
    };
    paths::validate_relative(&name)
}

fn strip_script_extension(name: &str) -> &str {
    if let Some((stem, ext)) = name.rsplit_once('.') {
        let ext = ext.to_ascii_lowercase();
        if !stem.is_empty() && SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
            return stem;
        }
    }
    name
}

/// Writes through a temp file in the same directory, then renames.
///
/// Creates the parent directory on first write.
fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut temp = path.as_os_str().to_os_string();
    temp.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
    let temp = PathBuf::from(temp);

    std::fs::write(&temp, payload)?;
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}
