//! Registry of live control sessions' child-process handles, swept on
//! server shutdown.
//!
//! Grounded in `sessions::SessionManager::kill_all`'s three-phase shape
//! (SIGTERM every tracked process group, wait up to a bounded deadline for
//! ordinary teardown, then SIGKILL whatever's still listed) — adapted here
//! to a plain id-keyed map of [`ChildHandle`] rather than a full session
//! map, since liveness in this registry already means "the session hasn't
//! torn down yet"; a session removes itself on exit via [`ActiveSessions::remove`]
//! before it releases its admission slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::child::{ChildHandle, TerminationMode};

/// Bounded wait for ordinary teardown to remove a session before shutdown
/// escalates to SIGKILL, matching the reference server's 3s sweep window.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Key returned by [`ActiveSessions::register`]; pass it back to
/// [`ActiveSessions::remove`] when the session ends.
pub type ActiveSessionId = Uuid;

/// Tracks the [`ChildHandle`] of every live control session so shutdown can
/// terminate engines that would otherwise outlive the server process.
#[derive(Clone)]
pub struct ActiveSessions {
    inner: Arc<Mutex<HashMap<ActiveSessionId, ChildHandle>>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a session's child for the shutdown sweep. Call once the
    /// child has spawned successfully.
    pub fn register(&self, handle: ChildHandle) -> ActiveSessionId {
        let id = Uuid::new_v4();
        self.inner.lock().expect("active session registry poisoned").insert(id, handle);
        id
    }

    /// Deregister a session. Call on every exit path once its child no
    /// longer needs to be reachable from the shutdown sweep.
    pub fn remove(&self, id: ActiveSessionId) {
        self.inner.lock().expect("active session registry poisoned").remove(&id);
    }

    /// Terminate every still-registered session's engine: SIGTERM all
    /// process groups, wait for ordinary teardown to drain the registry,
    /// then SIGKILL whatever's still listed.
    pub async fn kill_all(&self) {
        let pending: Vec<ChildHandle> = {
            let sessions = self.inner.lock().expect("active session registry poisoned");
            sessions.values().copied().collect()
        };
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "sending soft termination to live session engine(s)");
        for handle in &pending {
            handle.terminate(TerminationMode::Soft);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while tokio::time::Instant::now() < deadline {
            if self.inner.lock().expect("active session registry poisoned").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let stragglers: Vec<ChildHandle> = {
            let mut sessions = self.inner.lock().expect("active session registry poisoned");
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        if !stragglers.is_empty() {
            info!(count = stragglers.len(), "force-killing session engine(s) still live at shutdown");
            for handle in &stragglers {
                handle.terminate(TerminationMode::Hard);
            }
        }
    }
}

impl Default for ActiveSessions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kill_all_is_a_no_op_on_an_empty_registry() {
        let sessions = ActiveSessions::new();
        sessions.kill_all().await;
    }

    #[tokio::test]
    async fn remove_drops_a_session_before_the_sweep_sees_it() {
        let sessions = ActiveSessions::new();
        let id = sessions.register(ChildHandle::for_test(0));
        sessions.remove(id);
        assert!(sessions.inner.lock().unwrap().is_empty());
    }
}
