//! Runs scripts as child processes.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::SnapConfig;
use crate::context::ENV_SANDBOX;
use crate::error::{Error, Result};

use super::{Invocation, ScriptExecutor, ScriptOutput};

/// Number of stderr lines kept in a failure description.
const STDERR_TAIL_LINES: usize = 20;

/// Runner that executes scripts through an interpreter chosen by extension.
///
/// Scripts whose extension has no interpreter are executed directly and
/// must be executable.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Interpreter command lines keyed by script extension.
    interpreters: BTreeMap<String, Vec<String>>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    /// Creates an executor with interpreters for common analysis languages.
    pub fn new() -> Self {
        let interpreters = [
            ("sh", "sh"),
            ("bash", "bash"),
            ("py", "python3"),
            ("R", "Rscript"),
            ("r", "Rscript"),
            ("jl", "julia"),
        ]
        .into_iter()
        .map(|(ext, program)| (ext.to_string(), vec![program.to_string()]))
        .collect();
        Self { interpreters }
    }

    /// Creates an executor with the defaults plus interpreters from `config`.
    pub fn from_config(config: &SnapConfig) -> Self {
        let mut executor = Self::new();
        for (ext, command) in &config.runner.interpreters {
            executor
                .interpreters
                .insert(ext.trim_start_matches('.').to_string(), command.clone());
        }
        executor
    }

    /// Registers the command line used for scripts with extension `ext`.
    pub fn with_interpreter<I, S>(mut self, ext: &str, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreters.insert(
            ext.trim_start_matches('.').to_string(),
            command.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Returns the program and arguments that run `script`.
    fn build_command(&self, script: &Path) -> (String, Vec<String>) {
        let interpreter = script
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.interpreters.get(ext))
            .filter(|command| !command.is_empty());

        match interpreter {
            Some(command) => {
                let mut args = command[1..].to_vec();
                args.push(script.display().to_string());
                (command[0].clone(), args)
            }
            None => (script.display().to_string(), Vec::new()),
        }
    }
}

/// Returns true for stderr lines that are warnings rather than messages.
fn is_warning(line: &str) -> bool {
    line.trim_start().to_ascii_lowercase().starts_with("warning")
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl ScriptExecutor for CommandExecutor {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<ScriptOutput> {
        let (program, args) = self.build_command(invocation.script);
        let options = invocation.options;

        tracing::info!(
            program = %program,
            args = ?args,
            working_dir = ?invocation.sandbox.path(),
            "spawning script process"
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(invocation.sandbox.path())
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .stdout(if options.capture_output {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });
        for (key, value) in invocation.context.env_vars() {
            command.env(key, value);
        }
        command.env(ENV_SANDBOX, invocation.sandbox.path());
        // Send plots to a null device instead of a display.
        command
            .env_remove("DISPLAY")
            .env_remove("WAYLAND_DISPLAY")
            .env("MPLBACKEND", "Agg");

        let output = command.output().map_err(|e| Error::ScriptExecution {
            script: invocation.relative.to_path_buf(),
            reason: format!("failed to start {}: {}", program, e),
        })?;

        let mut result = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            ..Default::default()
        };
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            if is_warning(line) {
                result.warning(invocation.relative, line, options);
            } else {
                result.message(invocation.relative, line, options);
            }
        }

        if !output.status.success() {
            let tail = stderr_tail(&stderr);
            let reason = if tail.is_empty() {
                format!("{} exited with {}", program, output.status)
            } else {
                format!("{} exited with {}:\n{}", program, output.status, tail)
            };
            return Err(Error::ScriptExecution {
                script: invocation.relative.to_path_buf(),
                reason,
            });
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn command_executor_uses_interpreter_by_extension() {
        let executor = CommandExecutor::new();
        let (program, args) = executor.build_command(Path::new("/sb/scripts/fit.R"));
        assert_eq!(program, "Rscript");
        assert_eq!(args, vec!["/sb/scripts/fit.R".to_string()]);
    }

    #[test]
    fn command_executor_runs_unknown_extensions_directly() {
        let executor = CommandExecutor::new();
        let (program, args) = executor.build_command(Path::new("/sb/run-all"));
        assert_eq!(program, "/sb/run-all");
        assert!(args.is_empty());
    }

    #[test]
    fn command_executor_keeps_interpreter_arguments() {
        let executor = CommandExecutor::new().with_interpreter(".py", ["python3", "-u"]);
        let (program, args) = executor.build_command(Path::new("clean.py"));
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-u".to_string(), "clean.py".to_string()]);
    }

    #[test]
    fn command_executor_reads_config_interpreters() {
        let config = SnapConfig::parse("[runner.interpreters]\njl = [\"julia\", \"--project\"]\n")
            .unwrap();
        let executor = CommandExecutor::from_config(&config);
        let (program, args) = executor.build_command(Path::new("model.jl"));
        assert_eq!(program, "julia");
        assert_eq!(args[0], "--project");
        assert_eq!(executor.build_command(Path::new("a.sh")).0, "sh");
    }

    #[test]
    fn classifies_warning_lines() {
        assert!(is_warning("Warning message:"));
        assert!(is_warning("  warning: NAs introduced by coercion"));
        assert!(!is_warning("Loading required package: stats"));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&stderr);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::runner::{RunOptions, ScriptRunner};
        use crate::sandbox::SandboxManager;
        use crate::test_support::process_lock;
        use tempfile::TempDir;

        fn project_with_script(name: &str, body: &str) -> (TempDir, TempDir, SandboxManager) {
            let root = TempDir::new().unwrap();
            std::fs::create_dir(root.path().join(".git")).unwrap();
            std::fs::write(root.path().join("data.txt"), "a\nb\n").unwrap();
            std::fs::write(root.path().join(name), body).unwrap();
            let base = TempDir::new().unwrap();
            let manager = SandboxManager::new()
                .with_root(root.path())
                .with_base_dir(base.path());
            (root, base, manager)
        }

        #[test]
        fn script_output_is_captured_and_split() {
            let _lock = process_lock();
            let script = "wc -l < data.txt | tr -d ' '\n\
                          echo \"strict=$SANDBOX_SNAP_STRICT\"\n\
                          echo 'Warning: small sample' >&2\n\
                          echo 'reading data' >&2\n\
                          echo derived > out.txt\n";
            let (root, _base, manager) = project_with_script("count.sh", script);
            let sandbox = manager.setup(["data.txt"], None).unwrap();

            let runner = ScriptRunner::new(CommandExecutor::new());
            let output = runner.run(&manager, "count.sh", Some(&sandbox)).unwrap();

            assert_eq!(output.stdout, "2\nstrict=1\n");
            assert_eq!(output.warnings, vec!["Warning: small sample".to_string()]);
            assert_eq!(output.messages, vec!["reading data".to_string()]);
            assert!(sandbox.path().join("out.txt").is_file());
            assert!(!root.path().join("out.txt").exists());
        }

        #[test]
        fn uncaptured_output_is_not_collected() {
            let _lock = process_lock();
            let (_root, _base, manager) = project_with_script("hello.sh", "echo hello\n");
            let sandbox = manager.setup(Vec::<&str>::new(), None).unwrap();

            let runner = ScriptRunner::new(CommandExecutor::new())
                .with_options(RunOptions::default().with_capture_output(false));
            let output = runner.run(&manager, "hello.sh", Some(&sandbox)).unwrap();
            assert!(output.stdout.is_empty());
        }

        #[test]
        fn failing_process_reports_stderr() {
            let _lock = process_lock();
            let (_root, _base, manager) =
                project_with_script("fail.sh", "echo 'object not found' >&2\nexit 3\n");
            let sandbox = manager.setup(Vec::<&str>::new(), None).unwrap();
            let before = std::env::current_dir().unwrap();

            let runner = ScriptRunner::new(CommandExecutor::new());
            let err = runner.run(&manager, "fail.sh", Some(&sandbox)).unwrap_err();

            match err {
                Error::ScriptExecution { script, reason } => {
                    assert_eq!(script, PathBuf::from("fail.sh"));
                    assert!(reason.contains("object not found"));
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(std::env::current_dir().unwrap(), before);
        }
    }
}
