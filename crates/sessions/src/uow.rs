//! Unit of work for long-lived streams.
//!
//! A stream handler opens one scope per request. Mutations go straight to
//! the in-memory stores; handlers mark the entities they touched, and an
//! explicit `commit("label")` makes them durable mid-stream (a
//! micro-transaction). Dropping the scope commits what is still dirty;
//! calling `rollback()` instead discards uncommitted mutations by
//! re-reading the last persisted state.
//!
//! Every commit records a labeled duration; commits slower than 100 ms
//! are logged as slow.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ens_domain::error::Result;

use crate::approvals::ApprovalStore;
use crate::plans::PlanStore;
use crate::store::ConversationStore;

const SLOW_COMMIT: Duration = Duration::from_millis(100);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commit metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate duration statistics for one commit label.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitStats {
    pub count: u64,
    pub errors: u64,
    pub total: Duration,
    pub max: Duration,
}

/// Process-wide registry of per-label commit timings.
#[derive(Default)]
pub struct CommitMetrics {
    stats: Mutex<HashMap<String, CommitStats>>,
}

impl CommitMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &str, duration: Duration, ok: bool) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(operation.to_owned()).or_default();
        entry.count += 1;
        if !ok {
            entry.errors += 1;
        }
        entry.total += duration;
        entry.max = entry.max.max(duration);
    }

    pub fn snapshot(&self) -> HashMap<String, CommitStats> {
        self.stats.lock().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unit of work
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One transactional scope over the session-state repositories.
pub struct UnitOfWork {
    pub conversations: Arc<ConversationStore>,
    pub plans: Arc<PlanStore>,
    pub approvals: Arc<ApprovalStore>,
    metrics: Arc<CommitMetrics>,
    dirty_conversations: HashSet<String>,
    plans_dirty: bool,
    approvals_dirty: bool,
    finished: bool,
}

impl UnitOfWork {
    pub fn new(
        conversations: Arc<ConversationStore>,
        plans: Arc<PlanStore>,
        approvals: Arc<ApprovalStore>,
        metrics: Arc<CommitMetrics>,
    ) -> Self {
        Self {
            conversations,
            plans,
            approvals,
            metrics,
            dirty_conversations: HashSet::new(),
            plans_dirty: false,
            approvals_dirty: false,
            finished: false,
        }
    }

    // ── Dirty tracking ──────────────────────────────────────────────

    pub fn mark_conversation(&mut self, session_id: &str) {
        self.dirty_conversations.insert(session_id.to_owned());
    }

    pub fn mark_plans(&mut self) {
        self.plans_dirty = true;
    }

    pub fn mark_approvals(&mut self) {
        self.approvals_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_conversations.is_empty() || self.plans_dirty || self.approvals_dirty
    }

    // ── Transaction boundaries ──────────────────────────────────────

    /// Persist everything marked dirty since the last commit.
    pub fn commit(&mut self, operation: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.flush();
        let duration = start.elapsed();
        self.metrics.record(operation, duration, result.is_ok());

        match &result {
            Ok(()) => {
                tracing::debug!(
                    operation = operation,
                    duration_ms = duration.as_millis() as u64,
                    "transaction committed"
                );
                if duration > SLOW_COMMIT {
                    tracing::warn!(
                        operation = operation,
                        duration_ms = duration.as_millis() as u64,
                        "slow transaction commit (> 100ms)"
                    );
                }
            }
            Err(e) => {
                tracing::error!(operation = operation, error = %e, "commit failed");
            }
        }
        result
    }

    /// Write dirty entities without clearing error state; used by commit
    /// and for FK-style pre-checks.
    pub fn flush(&mut self) -> Result<()> {
        for session_id in std::mem::take(&mut self.dirty_conversations) {
            self.conversations.persist(&session_id)?;
        }
        if std::mem::take(&mut self.plans_dirty) {
            self.plans.persist()?;
        }
        if std::mem::take(&mut self.approvals_dirty) {
            self.approvals.persist()?;
        }
        Ok(())
    }

    /// Discard uncommitted mutations by reloading the persisted state of
    /// every dirty entity.
    pub fn rollback(&mut self) -> Result<()> {
        for session_id in std::mem::take(&mut self.dirty_conversations) {
            self.conversations.reload(&session_id)?;
        }
        if std::mem::take(&mut self.plans_dirty) {
            self.plans.reload()?;
        }
        if std::mem::take(&mut self.approvals_dirty) {
            self.approvals.reload()?;
        }
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    /// Normal scope exit: commit anything still dirty.
    pub fn finish(&mut self, operation: &str) -> Result<()> {
        self.finished = true;
        if self.is_dirty() {
            self.commit(operation)?;
        }
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished && self.is_dirty() {
            // Scope ended without an explicit finish (likely an error
            // path that already streamed a terminal event). Committing
            // here would persist a half-applied mutation set.
            if let Err(e) = self.rollback() {
                tracing::error!(error = %e, "rollback on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::message::Message;

    struct Fixture {
        _dir: tempfile::TempDir,
        conversations: Arc<ConversationStore>,
        plans: Arc<PlanStore>,
        approvals: Arc<ApprovalStore>,
        metrics: Arc<CommitMetrics>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                conversations: Arc::new(ConversationStore::new(dir.path()).unwrap()),
                plans: Arc::new(PlanStore::new(dir.path()).unwrap()),
                approvals: Arc::new(ApprovalStore::new(dir.path()).unwrap()),
                metrics: Arc::new(CommitMetrics::new()),
                _dir: dir,
            }
        }

        fn uow(&self) -> UnitOfWork {
            UnitOfWork::new(
                self.conversations.clone(),
                self.plans.clone(),
                self.approvals.clone(),
                self.metrics.clone(),
            )
        }
    }

    #[test]
    fn commit_persists_marked_conversation() {
        let fx = Fixture::new();
        let mut uow = fx.uow();

        fx.conversations.get_or_create("s-1");
        fx.conversations
            .append_message("s-1", Message::user("hi"))
            .unwrap();
        uow.mark_conversation("s-1");
        uow.commit("append_message").unwrap();
        assert!(!uow.is_dirty());

        // Reload wipes nothing because the state was committed.
        fx.conversations.reload("s-1").unwrap();
        assert_eq!(fx.conversations.get_history("s-1").unwrap().len(), 1);
        uow.finish("test").unwrap();
    }

    #[test]
    fn rollback_discards_uncommitted_mutations() {
        let fx = Fixture::new();

        fx.conversations.get_or_create("s-1");
        fx.conversations.persist("s-1").unwrap();

        let mut uow = fx.uow();
        fx.conversations
            .append_message("s-1", Message::user("scratch"))
            .unwrap();
        uow.mark_conversation("s-1");
        uow.rollback().unwrap();

        assert!(fx.conversations.get_history("s-1").unwrap().is_empty());
        uow.finish("test").unwrap();
    }

    #[test]
    fn drop_without_finish_rolls_back() {
        let fx = Fixture::new();
        fx.conversations.get_or_create("s-1");
        fx.conversations.persist("s-1").unwrap();

        {
            let mut uow = fx.uow();
            fx.conversations
                .append_message("s-1", Message::user("doomed"))
                .unwrap();
            uow.mark_conversation("s-1");
            // Dropped dirty: simulates an error path.
        }

        assert!(fx.conversations.get_history("s-1").unwrap().is_empty());
    }

    #[test]
    fn finish_commits_remaining_dirty_state() {
        let fx = Fixture::new();
        {
            let mut uow = fx.uow();
            fx.conversations.get_or_create("s-1");
            fx.conversations
                .append_message("s-1", Message::user("kept"))
                .unwrap();
            uow.mark_conversation("s-1");
            uow.finish("scope_exit").unwrap();
        }
        fx.conversations.reload("s-1").unwrap();
        assert_eq!(fx.conversations.get_history("s-1").unwrap().len(), 1);
    }

    #[test]
    fn commit_records_labeled_metrics() {
        let fx = Fixture::new();
        let mut uow = fx.uow();
        fx.conversations.get_or_create("s-1");
        uow.mark_conversation("s-1");
        uow.commit("save_messages").unwrap();
        uow.finish("test").unwrap();

        let stats = fx.metrics.snapshot();
        assert_eq!(stats.get("save_messages").unwrap().count, 1);
        assert_eq!(stats.get("save_messages").unwrap().errors, 0);
    }
}
