//! Exit-time cleanup
//!
//! One hook, reachable from every way the program can end: normal return,
//! unwinding (through [`CleanupGuard`]) and termination signals (the CLI
//! registers [`CleanupHook::run`] with its signal handler).

use std::sync::{Arc, Mutex, PoisonError};

use crate::protocol::Connection;

/// Shared handle that leaves the strip dark and the port released
#[derive(Clone)]
pub struct CleanupHook {
    connection: Arc<Mutex<Connection>>,
}

impl CleanupHook {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    /// Clear the strip and disconnect if still connected. Never fails and
    /// does nothing the second time.
    pub fn run(&self) {
        let mut conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !conn.is_connected() {
            return;
        }

        tracing::info!("cleaning up controller connection");
        // disconnect clears the strip itself unless configured not to
        if !conn.config().clear_on_disconnect {
            if let Err(e) = conn.clear_all() {
                tracing::warn!("cleanup: clearing strip failed: {e}");
            }
        }
        conn.disconnect();
    }

    /// Guard that runs this hook when dropped
    pub fn guard(&self) -> CleanupGuard {
        CleanupGuard { hook: self.clone() }
    }
}

/// Runs its [`CleanupHook`] on drop
pub struct CleanupGuard {
    hook: CleanupHook,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.hook.run();
    }
}
