//! Free functions over a process-wide default [`SandboxManager`].
//!
//! For scripts and quick checks that do not want to carry handles around.
//! The manager is created on first use with the sandbox settings of the
//! project found from the working directory at that moment.

use std::path::Path;
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SnapConfig;
use crate::diff::{ExactValue, RenderedText};
use crate::error::Result;
use crate::root::project_root;
use crate::runner::{CommandExecutor, RunOptions, ScriptOutput, ScriptRunner};
use crate::sandbox::{Sandbox, SandboxManager};
use crate::snapshot::{SnapshotOutcome, SnapshotStore};

static DEFAULT_MANAGER: OnceLock<SandboxManager> = OnceLock::new();

fn load_config() -> SnapConfig {
    let loaded = project_root().and_then(|root| SnapConfig::load(&root));
    match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::debug!(error = %e, "using default configuration");
            SnapConfig::default()
        }
    }
}

/// Returns the process-wide manager.
pub fn manager() -> &'static SandboxManager {
    DEFAULT_MANAGER.get_or_init(|| SandboxManager::from_config(&load_config()))
}

/// Creates a sandbox with the default manager and stages `files` into it.
pub fn setup_sandbox<I, S>(files: I) -> Result<Sandbox>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    manager().setup(files, None)
}

/// Removes `sandbox`, or the last one created by the default manager.
pub fn cleanup_sandbox(sandbox: Option<&Sandbox>, force: bool) -> Result<bool> {
    manager().cleanup(sandbox, force)
}

/// Runs `script` as a child process in `sandbox` (or the last sandbox).
///
/// Interpreters come from the project's `sandbox-snap.toml`.
pub fn run_in_sandbox(
    script: impl AsRef<Path>,
    sandbox: Option<&Sandbox>,
    options: RunOptions,
) -> Result<ScriptOutput> {
    let manager = manager();
    let config = SnapConfig::load(&manager.project_root()?)?;
    ScriptRunner::new(CommandExecutor::from_config(&config))
        .with_options(options)
        .run(manager, script, sandbox)
}

/// Checks `value` against a stored JSON snapshot.
pub fn snapshot_value<T>(value: &T, name: &str, bucket: Option<&str>) -> Result<SnapshotOutcome>
where
    T: Serialize + DeserializeOwned,
{
    SnapshotStore::new().record(&ExactValue, value, name, bucket)
}

/// Like [`snapshot_value`], but writes a missing snapshot even in strict mode.
pub fn create_snapshot_value<T>(
    value: &T,
    name: &str,
    bucket: Option<&str>,
) -> Result<SnapshotOutcome>
where
    T: Serialize + DeserializeOwned,
{
    SnapshotStore::new().create(&ExactValue, value, name, bucket)
}

/// Checks `value` against a stored rendered-text snapshot.
pub fn snapshot_text<T>(value: &T, name: &str, bucket: Option<&str>) -> Result<SnapshotOutcome>
where
    T: Serialize + ?Sized,
{
    SnapshotStore::new().record(&RenderedText::new(), value, name, bucket)
}
