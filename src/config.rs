//! Project configuration loaded from `sandbox-snap.toml`.
//!
//! The file is optional; every field has a default. Its presence also marks
//! the project root (see [`crate::root`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::root::CONFIG_FILE;
use crate::sandbox::paths;

/// Directory under the project root that holds snapshots.
pub const DEFAULT_SNAPSHOT_DIR: &str = "_snapshots";

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// Snapshot storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory name under the project root.
    #[serde(default = "default_snapshot_dir")]
    pub dir: String,
}

fn default_snapshot_dir() -> String {
    DEFAULT_SNAPSHOT_DIR.to_string()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
        }
    }
}

/// Sandbox placement settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Base directory for sandboxes. If None, uses a temp directory.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

/// Script runner settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Extra interpreters keyed by script extension, e.g. `py = ["python3", "-u"]`.
    #[serde(default)]
    pub interpreters: BTreeMap<String, Vec<String>>,
}

/// Complete project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapConfig {
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl SnapConfig {
    /// Parses a configuration from TOML text and validates it.
    pub fn parse(text: &str) -> Result<Self> {
        let config: SnapConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", CONFIG_FILE, e)))?;
        for warning in config.validate().into_result()? {
            tracing::warn!(%warning, "configuration warning");
        }
        Ok(config)
    }

    /// Loads `sandbox-snap.toml` from `root`, falling back to defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        tracing::debug!(path = ?path, "loading project configuration");
        Self::parse(&text)
    }
}

impl Validate for SnapConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(e) = paths::validate_relative(&self.snapshots.dir) {
            result.add_error(format!("snapshots.dir: {}", e));
        }

        if let Some(base) = &self.sandbox.base_dir {
            if !base.is_absolute() {
                result.add_warning(format!(
                    "sandbox.base_dir '{}' is relative and will move with the working directory",
                    base.display()
                ));
            }
        }

        for (ext, command) in &self.runner.interpreters {
            if command.is_empty() || command[0].trim().is_empty() {
                result.add_error(format!("runner.interpreters.{} has no program", ext));
            }
            if ext.starts_with('.') {
                result.add_warning(format!(
                    "runner.interpreters key '{}' should not include the leading dot",
                    ext
                ));
            }
        }

        result
    }
}
