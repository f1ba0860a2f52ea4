//! Execution context shared between the script runner and snapshot calls.
//!
//! A sandboxed run pushes an [`ExecutionContext`] for its duration. Code
//! called from inside the script reads it to find the caller's real working
//! directory (for root resolution) and to decide whether snapshot checks
//! are strict. Like the working directory it redirects, the slot is
//! process-wide, so threads spawned by a script see the same context. It is
//! always restored by [`ContextGuard`]; child processes receive the same
//! context through environment variables.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Set to `1` in a child process when the parent run is strict.
pub const ENV_STRICT: &str = "SANDBOX_SNAP_STRICT";
/// The caller's working directory before it was redirected into the sandbox.
pub const ENV_ORIGINAL_WD: &str = "SANDBOX_SNAP_ORIGINAL_WD";
/// The script being executed, relative to the sandbox.
pub const ENV_SCRIPT: &str = "SANDBOX_SNAP_SCRIPT";
/// The sandbox directory the child runs in.
pub const ENV_SANDBOX: &str = "SANDBOX_SNAP_SANDBOX";

static CURRENT: Mutex<Option<ExecutionContext>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<ExecutionContext>> {
    CURRENT.lock().unwrap_or_else(|e| e.into_inner())
}

/// State recorded by the runner for the duration of a sandboxed run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    /// Working directory of the caller before the run changed it.
    pub original_working_dir: Option<PathBuf>,
    /// Whether snapshot checks fail instead of prompting.
    pub strict_mode: bool,
    /// Script being executed, used to name snapshot buckets.
    pub script: Option<PathBuf>,
}

impl ExecutionContext {
    /// Creates a strict context rooted at the caller's working directory.
    pub fn strict(original_working_dir: impl Into<PathBuf>) -> Self {
        Self {
            original_working_dir: Some(original_working_dir.into()),
            strict_mode: true,
            script: None,
        }
    }

    /// Records the script this context belongs to.
    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Returns the active context for this call chain, if any.
    ///
    /// The in-process slot wins; otherwise a context inherited from a parent
    /// run through the environment is used.
    pub fn current() -> Option<ExecutionContext> {
        Self::installed().or_else(Self::from_env)
    }

    /// Returns the context installed in this process, ignoring the environment.
    pub(crate) fn installed() -> Option<ExecutionContext> {
        slot().clone()
    }

    /// Reads a context exported by a parent process.
    pub fn from_env() -> Option<ExecutionContext> {
        Self::from_vars(|key| std::env::var_os(key))
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<OsString>) -> Option<ExecutionContext> {
        let strict = lookup(ENV_STRICT)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !strict {
            return None;
        }
        Some(ExecutionContext {
            original_working_dir: lookup(ENV_ORIGINAL_WD).map(PathBuf::from),
            strict_mode: true,
            script: lookup(ENV_SCRIPT).map(PathBuf::from),
        })
    }

    /// Environment variables that hand this context to a child process.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let strict = if self.strict_mode { "1" } else { "0" };
        let mut vars = vec![(ENV_STRICT, strict.to_string())];
        if let Some(dir) = &self.original_working_dir {
            vars.push((ENV_ORIGINAL_WD, dir.display().to_string()));
        }
        if let Some(script) = &self.script {
            vars.push((ENV_SCRIPT, script.display().to_string()));
        }
        vars
    }

    /// Returns the recorded working directory if strict and still on disk.
    ///
    /// A recorded directory that has since disappeared is reported with a
    /// warning and ignored.
    pub fn live_working_dir(&self) -> Option<&Path> {
        if !self.strict_mode {
            return None;
        }
        let dir = self.original_working_dir.as_deref()?;
        if dir.is_dir() {
            Some(dir)
        } else {
            tracing::warn!(
                path = ?dir,
                "recorded working directory no longer exists, using current directory"
            );
            None
        }
    }
}

/// Returns true when the active call chain runs in strict mode.
pub fn is_strict() -> bool {
    ExecutionContext::current()
        .map(|ctx| ctx.strict_mode)
        .unwrap_or(false)
}

/// Keeps an [`ExecutionContext`] installed until dropped.
///
/// Dropping restores whatever was installed before, so nested runs unwind
/// to the enclosing run's state and the outermost run leaves the slot empty.
#[must_use = "the context is removed as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<ExecutionContext>,
}

impl ContextGuard {
    /// Installs `context` for the whole process.
    pub fn enter(context: ExecutionContext) -> Self {
        let previous = slot().replace(context);
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        *slot() = self.previous.take();
    }
}
