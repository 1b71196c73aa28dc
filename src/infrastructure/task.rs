//! Detached background tasks

use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

/// Spawn `future` on the current tokio runtime
///
/// Returns `None` and logs when called outside a runtime, so synchronous
/// callers on plain threads lose the background work instead of panicking.
pub fn spawn_detached<F>(task: &'static str, future: F) -> Option<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(e) => {
            warn!(task, error = %e, "No tokio runtime available, background task skipped");
            None
        }
    }
}

/// Whether background tasks can be spawned from the calling thread
pub fn runtime_available() -> bool {
    Handle::try_current().is_ok()
}
