//! Pending-approval repository.
//!
//! Keyed by request id, filterable by session and kind. Resolution is
//! monotonic: the entity enforces pending -> approved/rejected, and this
//! store surfaces the violation unchanged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use ens_domain::approval::{ApprovalKind, ApprovalStatus, PendingApproval};
use ens_domain::error::{Error, Result};

pub struct ApprovalStore {
    path: PathBuf,
    approvals: RwLock<HashMap<String, PendingApproval>>,
}

impl ApprovalStore {
    pub fn new(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).map_err(Error::Io)?;
        let path = state_dir.join("approvals.json");
        let approvals = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        tracing::info!(
            approvals = approvals.len(),
            path = %path.display(),
            "approval store loaded"
        );
        Ok(Self {
            path,
            approvals: RwLock::new(approvals),
        })
    }

    /// Register a new pending approval. At most one row per request id.
    pub fn add_pending(&self, approval: PendingApproval) -> Result<()> {
        let mut map = self.approvals.write();
        if map.contains_key(&approval.request_id) {
            return Err(Error::Validation(format!(
                "approval {} already exists",
                approval.request_id
            )));
        }
        map.insert(approval.request_id.clone(), approval);
        Ok(())
    }

    /// Fetch by id, pending entries only.
    pub fn get_pending(&self, request_id: &str) -> Option<PendingApproval> {
        self.approvals
            .read()
            .get(request_id)
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
    }

    /// Fetch by id regardless of status.
    pub fn get(&self, request_id: &str) -> Option<PendingApproval> {
        self.approvals.read().get(request_id).cloned()
    }

    /// All pending approvals for a session, optionally filtered by kind,
    /// oldest first.
    pub fn get_all_pending(
        &self,
        session_id: &str,
        kind: Option<ApprovalKind>,
    ) -> Vec<PendingApproval> {
        let mut list: Vec<PendingApproval> = self
            .approvals
            .read()
            .values()
            .filter(|a| a.session_id == session_id && a.status == ApprovalStatus::Pending)
            .filter(|a| kind.map_or(true, |k| a.kind == k))
            .cloned()
            .collect();
        list.sort_by_key(|a| a.created_at);
        list
    }

    /// pending -> approved.
    pub fn approve(&self, request_id: &str) -> Result<PendingApproval> {
        let mut map = self.approvals.write();
        let approval = map
            .get_mut(request_id)
            .ok_or_else(|| Error::not_found("approval", request_id))?;
        approval.approve()?;
        Ok(approval.clone())
    }

    /// pending -> rejected.
    pub fn reject(&self, request_id: &str, reason: Option<String>) -> Result<PendingApproval> {
        let mut map = self.approvals.write();
        let approval = map
            .get_mut(request_id)
            .ok_or_else(|| Error::not_found("approval", request_id))?;
        approval.reject(reason)?;
        Ok(approval.clone())
    }

    /// Drop resolved approvals older than `max_age`.
    pub fn cleanup_resolved(&self, max_age: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - max_age;
        let mut map = self.approvals.write();
        let before = map.len();
        map.retain(|_, a| {
            a.status == ApprovalStatus::Pending || a.decided_at.map_or(true, |t| t > cutoff)
        });
        before - map.len()
    }

    // ── Persistence (driven by the unit of work) ────────────────────

    pub fn persist(&self) -> Result<()> {
        let map = self.approvals.read();
        let json = serde_json::to_string_pretty(&*map)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let fresh: HashMap<String, PendingApproval> = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };
        *self.approvals.write() = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ApprovalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ApprovalStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn approval(id: &str, session: &str, kind: ApprovalKind) -> PendingApproval {
        PendingApproval::new(
            id,
            kind,
            "write_file",
            session,
            serde_json::json!({}),
            None,
        )
    }

    #[test]
    fn add_and_get_pending() {
        let (_d, store) = store();
        store
            .add_pending(approval("r-1", "s-1", ApprovalKind::Tool))
            .unwrap();
        assert!(store.get_pending("r-1").is_some());
    }

    #[test]
    fn duplicate_request_id_rejected() {
        let (_d, store) = store();
        store
            .add_pending(approval("r-1", "s-1", ApprovalKind::Tool))
            .unwrap();
        assert!(store
            .add_pending(approval("r-1", "s-1", ApprovalKind::Tool))
            .is_err());
    }

    #[test]
    fn approve_hides_from_pending_queries() {
        let (_d, store) = store();
        store
            .add_pending(approval("r-1", "s-1", ApprovalKind::Tool))
            .unwrap();
        store.approve("r-1").unwrap();
        assert!(store.get_pending("r-1").is_none());
        assert_eq!(store.get("r-1").unwrap().status, ApprovalStatus::Approved);
    }

    #[test]
    fn re_approving_fails() {
        let (_d, store) = store();
        store
            .add_pending(approval("r-1", "s-1", ApprovalKind::Tool))
            .unwrap();
        store.approve("r-1").unwrap();
        assert!(store.approve("r-1").is_err());
        assert!(store.reject("r-1", None).is_err());
    }

    #[test]
    fn get_all_pending_filters_by_session_and_kind() {
        let (_d, store) = store();
        store
            .add_pending(approval("r-1", "s-1", ApprovalKind::Tool))
            .unwrap();
        store
            .add_pending(approval("r-2", "s-1", ApprovalKind::Plan))
            .unwrap();
        store
            .add_pending(approval("r-3", "s-2", ApprovalKind::Tool))
            .unwrap();

        assert_eq!(store.get_all_pending("s-1", None).len(), 2);
        assert_eq!(
            store.get_all_pending("s-1", Some(ApprovalKind::Plan)).len(),
            1
        );
        assert_eq!(store.get_all_pending("s-2", None).len(), 1);
    }

    #[test]
    fn missing_approval_is_not_found() {
        let (_d, store) = store();
        assert!(matches!(
            store.approve("ghost").unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn cleanup_drops_only_resolved() {
        let (_d, store) = store();
        store
            .add_pending(approval("r-1", "s-1", ApprovalKind::Tool))
            .unwrap();
        store
            .add_pending(approval("r-2", "s-1", ApprovalKind::Tool))
            .unwrap();
        store.approve("r-1").unwrap();

        let removed = store.cleanup_resolved(chrono::Duration::zero());
        assert_eq!(removed, 1);
        assert!(store.get_pending("r-2").is_some());
    }
}
