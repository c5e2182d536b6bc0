//! Per-session mutual exclusion.
//!
//! Every stream handler that mutates session state holds the session's
//! lock for the whole stream. This serializes the turns of one
//! conversation and is the sole concurrency barrier around conversation
//! history, FSM context, and plan mutation. A second request for a busy
//! session queues on the semaphore and runs when the current turn ends.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Map of session id to its single-permit semaphore. The permit is the
/// lock: hold it for the duration of the turn, drop it to release.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a session, waiting until the in-flight turn
    /// (if any) finishes.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        // The semaphore is never closed, so acquire cannot fail.
        sem.acquire_owned()
            .await
            .expect("session semaphore closed")
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove locks for sessions that aren't actively held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
