//! Snapshot storage.
//!
//! Snapshots live under `<root>/_snapshots/<bucket>/<name>.<ext>`. The
//! [`SnapshotStore`] creates, compares and updates them using a
//! [`SnapshotStrategy`](crate::diff::SnapshotStrategy); inside a sandboxed
//! run it is strict, otherwise it asks before overwriting.

mod prompt;
mod store;

pub use prompt::{Confirm, NoPrompt, TerminalPrompt};
pub use store::{SnapshotOutcome, SnapshotStore, INTERACTIVE_BUCKET};
