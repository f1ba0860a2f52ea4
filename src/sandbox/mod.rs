//! Sandbox module for isolated script execution directories.
//!
//! This module provides the [`SandboxManager`] for creating throwaway copies
//! of selected project files, and the path checks that keep staged files
//! inside the sandbox.

mod manager;
pub mod paths;

pub use manager::{Sandbox, SandboxManager};

pub(crate) use manager::copy_preserving;
