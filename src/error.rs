//! Error types for sandboxed runs and snapshot checks.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sandbox and snapshot operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No ancestor of the start path carries a project marker.
    #[error("no project root found above {0}")]
    RootNotFound(PathBuf),

    /// The directory to start the root search from does not exist.
    #[error("start path does not exist: {0}")]
    InvalidStartPath(PathBuf),

    /// A path handed to the sandbox is absolute or escapes its base.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Failed to create a sandbox directory.
    #[error("failed to create sandbox at {path}: {reason}")]
    SandboxCreate { path: PathBuf, reason: String },

    /// No sandbox was given and none has been created yet.
    #[error("no sandbox given and no sandbox has been created")]
    NoSandbox,

    /// The handle was not issued by this manager.
    #[error("sandbox '{0}' is not known to this manager")]
    InvalidSandbox(String),

    /// The sandbox directory was removed from under its handle.
    #[error("sandbox directory no longer exists: {0}")]
    SandboxMissing(PathBuf),

    /// The script is neither staged, under the project root, nor at the given path.
    #[error("script not found: {0}")]
    ScriptNotFound(PathBuf),

    /// The script ran and failed.
    #[error("script {script} failed: {reason}")]
    ScriptExecution { script: PathBuf, reason: String },

    /// Strict mode never creates snapshots on its own.
    #[error("snapshot {0} does not exist; record it interactively first")]
    SnapshotMissing(PathBuf),

    /// Strict mode found drift against the stored snapshot.
    #[error("snapshot {path} does not match:\n{diff}")]
    SnapshotMismatch { path: PathBuf, diff: String },

    /// The stored payload could not be decoded.
    #[error("snapshot {path} is unreadable: {reason}")]
    SnapshotCorrupt { path: PathBuf, reason: String },

    /// The value does not survive a trip through the payload format.
    #[error("value cannot be stored exactly: {0}")]
    Unrepresentable(String),

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during sandbox or snapshot operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sandbox and snapshot operations.
pub type Result<T> = std::result::Result<T, Error>;
