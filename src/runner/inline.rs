//! Runs Rust closures as scripts, in-process.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::error::{Error, Result};

use super::{Invocation, ScriptExecutor, ScriptOutput};

/// What an inline script body returns.
pub type ScriptResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Handle given to an inline script body.
///
/// Output written through it honors the run's suppression and capture
/// settings.
pub struct ScriptEnv<'a> {
    invocation: &'a Invocation<'a>,
    output: ScriptOutput,
}

impl<'a> ScriptEnv<'a> {
    /// Absolute path of the staged script.
    pub fn script(&self) -> &Path {
        self.invocation.script
    }

    /// Sandbox directory, which is also the working directory.
    pub fn sandbox_dir(&self) -> &Path {
        self.invocation.sandbox.path()
    }

    /// Writes a line of standard output.
    pub fn print(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if self.invocation.options.capture_output {
            self.output.stdout.push_str(text);
            self.output.stdout.push('\n');
        } else {
            println!("{}", text);
        }
    }

    /// Emits an informational message.
    pub fn message(&mut self, text: impl AsRef<str>) {
        self.output
            .message(self.invocation.relative, text.as_ref(), self.invocation.options);
    }

    /// Emits a warning.
    pub fn warning(&mut self, text: impl AsRef<str>) {
        self.output
            .warning(self.invocation.relative, text.as_ref(), self.invocation.options);
    }
}

/// Executor whose script body is a Rust closure.
///
/// The script file is still located and staged like any other script; it
/// gives the run its identity (and the snapshot bucket its name).
pub struct InlineExecutor<F> {
    body: F,
}

impl<F> InlineExecutor<F> {
    /// Wraps `body` as a script.
    pub fn new(body: F) -> Self
    where
        F: Fn(&mut ScriptEnv<'_>) -> ScriptResult,
    {
        Self { body }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<F> ScriptExecutor for InlineExecutor<F>
where
    F: Fn(&mut ScriptEnv<'_>) -> ScriptResult,
{
    fn execute(&self, invocation: &Invocation<'_>) -> Result<ScriptOutput> {
        let mut env = ScriptEnv {
            invocation,
            output: ScriptOutput::default(),
        };
        let failure = |reason: String| Error::ScriptExecution {
            script: invocation.relative.to_path_buf(),
            reason,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| (self.body)(&mut env))) {
            Ok(Ok(())) => Ok(env.output),
            Ok(Err(e)) => Err(failure(e.to_string())),
            Err(payload) => Err(failure(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn name(&self) -> &str {
        "inline"
    }
}
