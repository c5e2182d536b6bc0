//! Conversation store.
//!
//! In-memory map of conversations with JSON-file persistence under the
//! state directory (one file per session). Mutations happen under the
//! caller's session lock; durability points are driven by the unit of
//! work, which calls [`ConversationStore::persist`] on commit and
//! [`ConversationStore::reload`] on rollback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use ens_domain::error::{Error, Result};
use ens_domain::message::Message;

use crate::conversation::{Conversation, ConversationSnapshot};

/// Result of one dependency subtask, rendered into the snapshot context
/// so the child agent sees what its inputs produced.
#[derive(Debug, Clone)]
pub struct DependencyResult {
    pub subtask_id: String,
    pub description: String,
    pub result: String,
    pub agent: String,
}

/// Conversation store backed by JSON files.
pub struct ConversationStore {
    dir: PathBuf,
    conversations: RwLock<HashMap<String, Conversation>>,
    snapshots: RwLock<HashMap<String, ConversationSnapshot>>,
}

impl ConversationStore {
    /// Load or create the store at `state_dir/conversations`.
    pub fn new(state_dir: &Path) -> Result<Self> {
        let dir = state_dir.join("conversations");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let mut conversations = HashMap::new();
        for entry in std::fs::read_dir(&dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(raw) => match serde_json::from_str::<Conversation>(&raw) {
                    Ok(conv) => {
                        conversations.insert(conv.session_id.clone(), conv);
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %entry.path().display(),
                            error = %e,
                            "skipping unreadable conversation file"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "read failed");
                }
            }
        }

        tracing::info!(
            conversations = conversations.len(),
            path = %dir.display(),
            "conversation store loaded"
        );

        Ok(Self {
            dir,
            conversations: RwLock::new(conversations),
            snapshots: RwLock::new(HashMap::new()),
        })
    }

    fn file_path(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    // ── Core operations ─────────────────────────────────────────────

    pub fn exists(&self, session_id: &str) -> bool {
        self.conversations.read().contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Conversation> {
        self.conversations.read().get(session_id).cloned()
    }

    /// Idempotent lookup-or-create. Returns `(conversation, is_new)`.
    pub fn get_or_create(&self, session_id: &str) -> (Conversation, bool) {
        {
            let map = self.conversations.read();
            if let Some(conv) = map.get(session_id) {
                return (conv.clone(), false);
            }
        }
        let conv = Conversation::new(session_id);
        self.conversations
            .write()
            .insert(session_id.to_owned(), conv.clone());
        tracing::info!(session_id = %session_id, "conversation created");
        (conv, true)
    }

    /// Atomic append with the tool-binding invariant check.
    pub fn append_message(&self, session_id: &str, message: Message) -> Result<()> {
        let mut map = self.conversations.write();
        let conv = map
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        conv.append(message)
    }

    /// Full ordered history for the session.
    pub fn get_history(&self, session_id: &str) -> Result<Vec<Message>> {
        self.conversations
            .read()
            .get(session_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| Error::not_found("session", session_id))
    }

    pub fn set_active_agent(&self, session_id: &str, agent: &str) -> Result<String> {
        let mut map = self.conversations.write();
        let conv = map
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        let previous = std::mem::replace(&mut conv.active_agent, agent.to_owned());
        Ok(previous)
    }

    pub fn active_agent(&self, session_id: &str) -> Option<String> {
        self.conversations
            .read()
            .get(session_id)
            .map(|c| c.active_agent.clone())
    }

    /// Replace the arguments of a declared tool call (user-edited before
    /// approval), so the history matches what actually runs.
    pub fn update_tool_call_arguments(
        &self,
        session_id: &str,
        call_id: &str,
        arguments: serde_json::Value,
    ) -> Result<()> {
        let mut map = self.conversations.write();
        let conv = map
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        for message in conv.messages.iter_mut().rev() {
            if let Some(tc) = message
                .tool_calls
                .iter_mut()
                .find(|tc| tc.call_id == call_id)
            {
                tc.arguments = arguments;
                return Ok(());
            }
        }
        Err(Error::not_found("tool call", call_id))
    }

    pub fn list_sessions(&self) -> Vec<String> {
        self.conversations.read().keys().cloned().collect()
    }

    /// Destroy conversations idle for longer than `ttl`. Returns the
    /// removed session ids.
    pub fn prune_idle(&self, ttl: chrono::Duration) -> Vec<String> {
        let cutoff = chrono::Utc::now() - ttl;
        let expired: Vec<String> = self
            .conversations
            .read()
            .values()
            .filter(|c| c.last_activity < cutoff)
            .map(|c| c.session_id.clone())
            .collect();
        for session_id in &expired {
            if let Err(e) = self.delete(session_id) {
                tracing::warn!(session_id = %session_id, error = %e, "ttl delete failed");
            }
        }
        expired
    }

    /// Remove a conversation and its file.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let removed = self.conversations.write().remove(session_id);
        if removed.is_none() {
            return Err(Error::not_found("session", session_id));
        }
        let path = self.file_path(session_id);
        if path.exists() {
            std::fs::remove_file(path).map_err(Error::Io)?;
        }
        tracing::info!(session_id = %session_id, "conversation deleted");
        Ok(())
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// Snapshot the live message list for a subtask and seed the live
    /// conversation with a synthetic description of dependency outputs.
    ///
    /// Dependency sections are rendered in subtask-id order so the child
    /// agent's context is deterministic across retries.
    pub fn create_subtask_snapshot(
        &self,
        session_id: &str,
        subtask_id: &str,
        dependency_results: &[DependencyResult],
    ) -> Result<String> {
        let snapshot_id = format!("snap-{}", uuid::Uuid::new_v4());

        let mut map = self.conversations.write();
        let conv = map
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;

        let snapshot = ConversationSnapshot {
            snapshot_id: snapshot_id.clone(),
            session_id: session_id.to_owned(),
            messages: conv.messages.clone(),
            created_at: chrono::Utc::now(),
        };
        self.snapshots
            .write()
            .insert(snapshot_id.clone(), snapshot);

        if !dependency_results.is_empty() {
            let mut ordered: Vec<&DependencyResult> = dependency_results.iter().collect();
            ordered.sort_by(|a, b| a.subtask_id.cmp(&b.subtask_id));

            let mut text = String::from("Results from completed prerequisite subtasks:\n");
            for dep in ordered {
                text.push_str(&format!(
                    "\n[{}] {} (agent: {})\n{}\n",
                    dep.subtask_id, dep.description, dep.agent, dep.result
                ));
            }
            conv.append(Message::system(text))?;
        }

        tracing::info!(
            session_id = %session_id,
            subtask_id = %subtask_id,
            snapshot_id = %snapshot_id,
            "subtask snapshot created"
        );
        Ok(snapshot_id)
    }

    /// Replace the live message list with the snapshot and discard it.
    ///
    /// With `preserve_last_result`, the final assistant message produced
    /// during the subtask run is re-appended on top of the restored list
    /// so the session keeps the subtask's outcome.
    pub fn restore_from_snapshot(
        &self,
        session_id: &str,
        snapshot_id: &str,
        preserve_last_result: bool,
    ) -> Result<()> {
        let snapshot = self
            .snapshots
            .write()
            .remove(snapshot_id)
            .ok_or_else(|| Error::not_found("snapshot", snapshot_id))?;
        if snapshot.session_id != session_id {
            return Err(Error::Validation(format!(
                "snapshot {snapshot_id} belongs to session {}",
                snapshot.session_id
            )));
        }

        let mut map = self.conversations.write();
        let conv = map
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;

        let last_result = if preserve_last_result {
            conv.last_assistant().cloned()
        } else {
            None
        };

        conv.messages = snapshot.messages;
        if let Some(mut msg) = last_result {
            // The declared tool calls were answered inside the discarded
            // branch; keep only the text so no binding dangles.
            msg.tool_calls.clear();
            conv.messages.push(msg);
        }
        conv.last_activity = chrono::Utc::now();

        tracing::info!(
            session_id = %session_id,
            snapshot_id = %snapshot_id,
            preserved = preserve_last_result,
            "conversation restored from snapshot"
        );
        Ok(())
    }

    /// Drop any snapshots belonging to a session (plan terminated).
    pub fn discard_session_snapshots(&self, session_id: &str) {
        self.snapshots
            .write()
            .retain(|_, s| s.session_id != session_id);
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    // ── Persistence (driven by the unit of work) ────────────────────

    /// Write one conversation to disk.
    pub fn persist(&self, session_id: &str) -> Result<()> {
        let conv = self
            .get(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        let json = serde_json::to_string_pretty(&conv)?;
        std::fs::write(self.file_path(session_id), json).map_err(Error::Io)?;
        Ok(())
    }

    /// Discard in-memory changes by re-reading the last persisted state.
    /// A session that was never persisted is removed entirely.
    pub fn reload(&self, session_id: &str) -> Result<()> {
        let path = self.file_path(session_id);
        let mut map = self.conversations.write();
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            let conv: Conversation = serde_json::from_str(&raw)?;
            map.insert(session_id.to_owned(), conv);
        } else {
            map.remove(session_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::message::{Message, ToolCall};

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let (_dir, store) = store();
        let (_, created) = store.get_or_create("s-1");
        assert!(created);
        let (_, created_again) = store.get_or_create("s-1");
        assert!(!created_again);
    }

    #[test]
    fn append_then_history_returns_appended_message() {
        let (_dir, store) = store();
        store.get_or_create("s-1");
        store.append_message("s-1", Message::user("hi")).unwrap();
        let history = store.get_history("s-1").unwrap();
        assert_eq!(history.last().unwrap().content, "hi");
    }

    #[test]
    fn append_to_missing_session_fails() {
        let (_dir, store) = store();
        let err = store.append_message("ghost", Message::user("x")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn snapshot_then_restore_round_trips() {
        let (_dir, store) = store();
        store.get_or_create("s-1");
        store.append_message("s-1", Message::user("base")).unwrap();

        let snap = store.create_subtask_snapshot("s-1", "st-1", &[]).unwrap();
        store
            .append_message("s-1", Message::assistant("scratch work"))
            .unwrap();

        store.restore_from_snapshot("s-1", &snap, false).unwrap();
        let history = store.get_history("s-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "base");
        assert_eq!(store.snapshot_count(), 0);
    }

    #[test]
    fn restore_preserves_last_assistant_result() {
        let (_dir, store) = store();
        store.get_or_create("s-1");
        store.append_message("s-1", Message::user("base")).unwrap();

        let snap = store.create_subtask_snapshot("s-1", "st-1", &[]).unwrap();
        store
            .append_message("s-1", Message::assistant("subtask answer"))
            .unwrap();

        store.restore_from_snapshot("s-1", &snap, true).unwrap();
        let history = store.get_history("s-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "subtask answer");
    }

    #[test]
    fn preserved_result_drops_dangling_tool_calls() {
        let (_dir, store) = store();
        store.get_or_create("s-1");
        let snap = store.create_subtask_snapshot("s-1", "st-1", &[]).unwrap();
        store
            .append_message(
                "s-1",
                Message::assistant_with_tool_calls(
                    "final",
                    vec![ToolCall {
                        call_id: "c-1".into(),
                        tool_name: "t".into(),
                        arguments: serde_json::json!({}),
                    }],
                ),
            )
            .unwrap();

        store.restore_from_snapshot("s-1", &snap, true).unwrap();
        let history = store.get_history("s-1").unwrap();
        assert!(history.last().unwrap().tool_calls.is_empty());
    }

    #[test]
    fn snapshot_seeds_dependency_context_in_id_order() {
        let (_dir, store) = store();
        store.get_or_create("s-1");

        let deps = vec![
            DependencyResult {
                subtask_id: "st-2".into(),
                description: "second".into(),
                result: "r2".into(),
                agent: "coder".into(),
            },
            DependencyResult {
                subtask_id: "st-1".into(),
                description: "first".into(),
                result: "r1".into(),
                agent: "coder".into(),
            },
        ];
        store.create_subtask_snapshot("s-1", "st-3", &deps).unwrap();

        let history = store.get_history("s-1").unwrap();
        let ctx = &history.last().unwrap().content;
        let pos1 = ctx.find("[st-1]").unwrap();
        let pos2 = ctx.find("[st-2]").unwrap();
        assert!(pos1 < pos2, "dependency sections must be ordered by id");
    }

    #[test]
    fn restore_rejects_foreign_session() {
        let (_dir, store) = store();
        store.get_or_create("s-1");
        store.get_or_create("s-2");
        let snap = store.create_subtask_snapshot("s-1", "st-1", &[]).unwrap();
        assert!(store.restore_from_snapshot("s-2", &snap, false).is_err());
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        store.get_or_create("s-1");
        store.append_message("s-1", Message::user("kept")).unwrap();
        store.persist("s-1").unwrap();

        store
            .append_message("s-1", Message::user("uncommitted"))
            .unwrap();
        store.reload("s-1").unwrap();
        let history = store.get_history("s-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "kept");
    }

    #[test]
    fn reload_of_never_persisted_session_removes_it() {
        let (_dir, store) = store();
        store.get_or_create("s-1");
        store.reload("s-1").unwrap();
        assert!(!store.exists("s-1"));
    }

    #[test]
    fn store_reloads_from_disk_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ConversationStore::new(dir.path()).unwrap();
            store.get_or_create("s-1");
            store.append_message("s-1", Message::user("hello")).unwrap();
            store.persist("s-1").unwrap();
        }
        let store = ConversationStore::new(dir.path()).unwrap();
        assert!(store.exists("s-1"));
        assert_eq!(store.get_history("s-1").unwrap().len(), 1);
    }
}
