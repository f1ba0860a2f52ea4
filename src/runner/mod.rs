//! Script execution inside a sandbox.
//!
//! [`ScriptRunner`] finds or stages the script, installs a strict
//! [`ExecutionContext`], moves the working directory into the sandbox and
//! hands the script to a [`ScriptExecutor`]. Context and working directory
//! are restored by guards before any result reaches the caller.

mod command;
mod inline;

pub use command::CommandExecutor;
pub use inline::{InlineExecutor, ScriptEnv, ScriptResult};

use std::path::{Path, PathBuf};

use crate::context::{ContextGuard, ExecutionContext};
use crate::error::{Error, Result};
use crate::sandbox::{copy_preserving, paths, Sandbox, SandboxManager};

/// Output handling for a run. Everything is suppressed by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Hide informational messages from the script.
    pub suppress_messages: bool,
    /// Hide warnings from the script.
    pub suppress_warnings: bool,
    /// Collect standard output instead of letting it through.
    pub capture_output: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            suppress_messages: true,
            suppress_warnings: true,
            capture_output: true,
        }
    }
}

impl RunOptions {
    /// Lets everything through to the caller's terminal and log.
    pub fn verbose() -> Self {
        Self {
            suppress_messages: false,
            suppress_warnings: false,
            capture_output: false,
        }
    }

    /// Sets whether informational messages are hidden.
    pub fn with_suppress_messages(mut self, suppress: bool) -> Self {
        self.suppress_messages = suppress;
        self
    }

    /// Sets whether warnings are hidden.
    pub fn with_suppress_warnings(mut self, suppress: bool) -> Self {
        self.suppress_warnings = suppress;
        self
    }

    /// Sets whether standard output is collected.
    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }
}

/// What a script produced while running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Captured standard output. Empty when output was not captured.
    pub stdout: String,
    /// Informational messages, whether or not they were shown.
    pub messages: Vec<String>,
    /// Warnings, whether or not they were shown.
    pub warnings: Vec<String>,
}

impl ScriptOutput {
    pub(crate) fn message(&mut self, script: &Path, text: &str, options: &RunOptions) {
        if !options.suppress_messages {
            tracing::info!(script = ?script, "{}", text);
        }
        self.messages.push(text.to_string());
    }

    pub(crate) fn warning(&mut self, script: &Path, text: &str, options: &RunOptions) {
        if !options.suppress_warnings {
            tracing::warn!(script = ?script, "{}", text);
        }
        self.warnings.push(text.to_string());
    }
}

/// Everything an executor needs to run one script.
#[derive(Debug)]
pub struct Invocation<'a> {
    /// Absolute path of the staged script.
    pub script: &'a Path,
    /// Script path relative to the sandbox.
    pub relative: &'a Path,
    /// Sandbox the script runs in; also the working directory.
    pub sandbox: &'a Sandbox,
    /// Context installed for the run.
    pub context: &'a ExecutionContext,
    /// Output handling requested by the caller.
    pub options: &'a RunOptions,
}

/// Trait for script executors.
pub trait ScriptExecutor {
    /// Runs the script and blocks until it finishes.
    fn execute(&self, invocation: &Invocation<'_>) -> Result<ScriptOutput>;

    /// Returns the name of this executor.
    fn name(&self) -> &str;
}

impl<E: ScriptExecutor + ?Sized> ScriptExecutor for Box<E> {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<ScriptOutput> {
        (**self).execute(invocation)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Changes the process working directory until dropped.
#[must_use = "the working directory is restored as soon as the guard is dropped"]
pub struct WorkdirGuard {
    previous: PathBuf,
}

impl WorkdirGuard {
    /// Moves into `dir`, remembering the current directory.
    pub fn change_to(dir: &Path) -> Result<Self> {
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(dir)?;
        Ok(Self { previous })
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            tracing::error!(error = %e, path = ?self.previous, "failed to restore working directory");
        }
    }
}

/// Runs scripts inside sandboxes.
pub struct ScriptRunner<E> {
    executor: E,
    options: RunOptions,
}

impl<E: ScriptExecutor> ScriptRunner<E> {
    /// Creates a runner with default (fully suppressed) output options.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            options: RunOptions::default(),
        }
    }

    /// Sets the output options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the output options.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs `script` in `sandbox`, or in the manager's last sandbox.
    ///
    /// The script is taken from the sandbox if already staged, otherwise
    /// from the project root, otherwise from `script` as given; the latter
    /// two are copied into the sandbox first. While the script runs, the
    /// working directory is the sandbox and the context is strict.
    pub fn run(
        &self,
        manager: &SandboxManager,
        script: impl AsRef<Path>,
        sandbox: Option<&Sandbox>,
    ) -> Result<ScriptOutput> {
        let script = script.as_ref();
        let sandbox = manager.resolve(sandbox)?;
        if !sandbox.exists() {
            return Err(Error::SandboxMissing(sandbox.path().to_path_buf()));
        }

        let caller_dir = std::env::current_dir()?;
        let relative = locate_script(manager, &sandbox, script, &caller_dir)?;
        let staged = sandbox.path().join(&relative);

        // A nested run starts from inside the outer sandbox; keep pointing
        // at the directory the outermost run was started from.
        let original_dir = ExecutionContext::current()
            .and_then(|ctx| ctx.live_working_dir().map(Path::to_path_buf))
            .unwrap_or(caller_dir);
        let context = ExecutionContext::strict(original_dir).with_script(&relative);

        tracing::info!(
            script = ?relative,
            sandbox = %sandbox.id(),
            executor = self.executor.name(),
            "running script in sandbox"
        );

        let outcome = {
            let _context = ContextGuard::enter(context.clone());
            let _workdir = WorkdirGuard::change_to(sandbox.path())?;
            self.executor.execute(&Invocation {
                script: &staged,
                relative: &relative,
                sandbox: &sandbox,
                context: &context,
                options: &self.options,
            })
        };

        match outcome {
            Ok(output) => {
                tracing::debug!(script = ?relative, "script finished");
                Ok(output)
            }
            Err(e @ Error::ScriptExecution { .. }) => Err(e),
            Err(e) => Err(Error::ScriptExecution {
                script: relative,
                reason: e.to_string(),
            }),
        }
    }
}

/// Finds the script and makes sure a copy exists inside the sandbox.
///
/// Returns the script path relative to the sandbox.
fn locate_script(
    manager: &SandboxManager,
    sandbox: &Sandbox,
    script: &Path,
    caller_dir: &Path,
) -> Result<PathBuf> {
    let raw = script.to_string_lossy();
    let safe_relative = paths::validate_relative(&raw).ok();

    if let Some(relative) = &safe_relative {
        if sandbox.path().join(relative).is_file() {
            return Ok(relative.clone());
        }
        let root = manager.project_root()?;
        let source = root.join(relative);
        if source.is_file() {
            copy_preserving(&source, &sandbox.path().join(relative))?;
            return Ok(relative.clone());
        }
    }

    let direct = if script.is_absolute() {
        script.to_path_buf()
    } else {
        caller_dir.join(script)
    };
    if direct.is_file() {
        let relative = match safe_relative {
            Some(relative) => relative,
            None => match within_root(manager, &direct) {
                Some(relative) => relative,
                None => direct
                    .file_name()
                    .map(PathBuf::from)
                    .ok_or_else(|| Error::ScriptNotFound(script.to_path_buf()))?,
            },
        };
        copy_preserving(&direct, &sandbox.path().join(&relative))?;
        return Ok(relative);
    }

    Err(Error::ScriptNotFound(script.to_path_buf()))
}

/// Path of `file` relative to the project root, if it lives under it.
fn within_root(manager: &SandboxManager, file: &Path) -> Option<PathBuf> {
    let root = manager.project_root().ok()?.canonicalize().ok()?;
    let file = file.canonicalize().ok()?;
    let relative = file.strip_prefix(&root).ok()?;
    paths::validate_relative(&relative.to_string_lossy()).ok()
}
