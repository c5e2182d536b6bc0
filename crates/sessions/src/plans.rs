//! Execution-plan repository.
//!
//! Single-file JSON persistence: the whole plan map serializes to
//! `plans.json` under the state directory. Subtasks are embedded in their
//! plan, so deleting a plan removes its subtasks with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use ens_domain::error::{Error, Result};
use ens_domain::plan::{ExecutionPlan, PlanStatus};

pub struct PlanStore {
    path: PathBuf,
    plans: RwLock<HashMap<String, ExecutionPlan>>,
}

impl PlanStore {
    pub fn new(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).map_err(Error::Io)?;
        let path = state_dir.join("plans.json");
        let plans = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        tracing::info!(plans = plans.len(), path = %path.display(), "plan store loaded");
        Ok(Self {
            path,
            plans: RwLock::new(plans),
        })
    }

    pub fn find_by_id(&self, plan_id: &str) -> Option<ExecutionPlan> {
        self.plans.read().get(plan_id).cloned()
    }

    /// The session's plan currently awaiting or undergoing execution.
    pub fn find_active_by_session(&self, session_id: &str) -> Option<ExecutionPlan> {
        self.plans
            .read()
            .values()
            .filter(|p| p.conversation_id == session_id)
            .filter(|p| matches!(p.status, PlanStatus::Approved | PlanStatus::InProgress))
            .max_by_key(|p| p.created_at)
            .cloned()
    }

    /// The session's most recent plan in any status.
    pub fn find_latest_by_session(&self, session_id: &str) -> Option<ExecutionPlan> {
        self.plans
            .read()
            .values()
            .filter(|p| p.conversation_id == session_id)
            .max_by_key(|p| p.created_at)
            .cloned()
    }

    pub fn list_by_session(&self, session_id: &str) -> Vec<ExecutionPlan> {
        let mut plans: Vec<ExecutionPlan> = self
            .plans
            .read()
            .values()
            .filter(|p| p.conversation_id == session_id)
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.created_at);
        plans
    }

    /// Insert or replace a plan.
    pub fn save(&self, plan: &ExecutionPlan) {
        self.plans
            .write()
            .insert(plan.id.clone(), plan.clone());
    }

    /// Remove a plan (cascades to its embedded subtasks).
    pub fn delete(&self, plan_id: &str) -> Result<()> {
        self.plans
            .write()
            .remove(plan_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("plan", plan_id))
    }

    // ── Persistence (driven by the unit of work) ────────────────────

    pub fn persist(&self) -> Result<()> {
        let plans = self.plans.read();
        let json = serde_json::to_string_pretty(&*plans)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let fresh: HashMap<String, ExecutionPlan> = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };
        *self.plans.write() = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::agent::AgentKind;
    use ens_domain::plan::Subtask;

    fn plan(id: &str, session: &str) -> ExecutionPlan {
        let mut p = ExecutionPlan::new(id, session, "goal").unwrap();
        p.add_subtask(Subtask::new("st-1", "work", AgentKind::Coder, vec![]).unwrap())
            .unwrap();
        p
    }

    #[test]
    fn save_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(dir.path()).unwrap();
        store.save(&plan("p-1", "s-1"));
        assert!(store.find_by_id("p-1").is_some());
        assert!(store.find_by_id("p-404").is_none());
    }

    #[test]
    fn active_plan_requires_approved_or_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(dir.path()).unwrap();

        let draft = plan("p-draft", "s-1");
        store.save(&draft);
        assert!(store.find_active_by_session("s-1").is_none());

        let mut approved = plan("p-approved", "s-1");
        approved.approve().unwrap();
        store.save(&approved);
        assert_eq!(store.find_active_by_session("s-1").unwrap().id, "p-approved");
    }

    #[test]
    fn delete_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(dir.path()).unwrap();
        store.save(&plan("p-1", "s-1"));
        store.delete("p-1").unwrap();
        assert!(store.find_by_id("p-1").is_none());
        assert!(store.delete("p-1").is_err());
    }

    #[test]
    fn persist_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(dir.path()).unwrap();
        store.save(&plan("p-1", "s-1"));
        store.persist().unwrap();

        store.save(&plan("p-2", "s-1"));
        store.reload().unwrap();
        assert!(store.find_by_id("p-1").is_some());
        assert!(store.find_by_id("p-2").is_none(), "uncommitted plan dropped");
    }
}
