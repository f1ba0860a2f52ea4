//! Sandbox Snap - sandboxed script execution and snapshot drift checks
//!
//! This library runs analysis scripts inside throwaway temp-directory
//! sandboxes staged from the project root, and compares their results
//! against snapshots stored in the project. Inside a sandboxed run snapshot
//! checks are strict; interactively they prompt before updating.

pub mod config;
pub mod context;
pub mod defaults;
pub mod diff;
pub mod error;
pub mod root;
pub mod runner;
pub mod sandbox;
pub mod snapshot;

#[cfg(test)]
mod test_support;

pub use config::{SnapConfig, Validate, ValidationResult};
pub use context::{is_strict, ContextGuard, ExecutionContext};
pub use diff::{
    Diff, Discrepancy, DisplayRenderer, ExactValue, RenderedText, Renderer, Rendering,
    SerdeRenderer, SnapshotStrategy,
};
pub use error::{Error, Result};
pub use root::{project_root, Marker, RootMarkers, RootMatch, RootResolver};
pub use runner::{
    CommandExecutor, InlineExecutor, RunOptions, ScriptEnv, ScriptExecutor, ScriptOutput,
    ScriptResult, ScriptRunner,
};
pub use sandbox::{Sandbox, SandboxManager};
pub use snapshot::{Confirm, NoPrompt, SnapshotOutcome, SnapshotStore, TerminalPrompt};
