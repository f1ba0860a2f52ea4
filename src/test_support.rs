//! Helpers shared by unit tests.

use std::sync::{Mutex, MutexGuard};

static PROCESS_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch process-wide state: the working directory
/// and the installed execution context.
pub(crate) fn process_lock() -> MutexGuard<'static, ()> {
    PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
