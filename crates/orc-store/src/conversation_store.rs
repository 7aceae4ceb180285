use std::collections::HashMap;
use std::path::PathBuf;

use orc_domain::conversation::{
    Conversation, ConversationFilter, ConversationMeta, ConversationMetaPatch,
    ConversationStatus,
};
use orc_domain::{Error, Result};
use parking_lot::RwLock;
use uuid::Uuid;

/// CRUD over conversation rows.
///
/// Persistence mirrors a session store: the whole table is a single
/// snapshot file, rewritten under the lock on every mutation. There is no
/// per-row durability requirement strong enough to justify a WAL here —
/// conversations mutate far less often than events do.
pub struct ConversationStore {
    rows: RwLock<HashMap<String, Conversation>>,
    snapshot_path: Option<PathBuf>,
}

impl ConversationStore {
    pub fn new(state_dir: Option<PathBuf>) -> Self {
        let snapshot_path = state_dir.map(|d| d.join("conversations.json"));
        let rows = snapshot_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        ConversationStore {
            rows: RwLock::new(rows),
            snapshot_path,
        }
    }

    pub fn create(&self, meta: ConversationMeta) -> Conversation {
        let now = chrono::Utc::now();
        let conv = Conversation {
            id: Uuid::new_v4().to_string(),
            meta,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        };
        {
            let mut rows = self.rows.write();
            rows.insert(conv.id.clone(), conv.clone());
        }
        self.flush();
        tracing::info!(conversation = %conv.id, "conversation created");
        conv
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.rows.read().get(id).cloned()
    }

    pub fn list(&self, filter: ConversationFilter) -> Vec<Conversation> {
        let rows = self.rows.read();
        let mut out: Vec<Conversation> = rows
            .values()
            .filter(|c| filter.status.map(|s| s == c.status).unwrap_or(true))
            .filter(|c| {
                filter
                    .scenario_ref
                    .as_deref()
                    .map(|want| c.meta.scenario_ref.as_deref() == Some(want))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        let offset = filter.offset.unwrap_or(0);
        let out = out.into_iter().skip(offset).collect::<Vec<_>>();
        match filter.limit {
            Some(n) => out.into_iter().take(n).collect(),
            None => out,
        }
    }

    pub fn update_meta(&self, id: &str, patch: ConversationMetaPatch) -> Result<Conversation> {
        let updated = {
            let mut rows = self.rows.write();
            let conv = rows
                .get_mut(id)
                .ok_or_else(|| Error::ConversationNotFound(id.to_string()))?;
            if let Some(title) = patch.title {
                conv.meta.title = Some(title);
            }
            if let Some(description) = patch.description {
                conv.meta.description = Some(description);
            }
            if let Some(participants) = patch.participants {
                conv.meta.participants = participants;
            }
            if let Some(starting) = patch.starting_agent_id {
                conv.meta.starting_agent_id = Some(starting);
            }
            conv.updated_at = chrono::Utc::now();
            conv.clone()
        };
        self.flush();
        Ok(updated)
    }

    /// Marks a conversation completed. Called by the event store once a
    /// message with finality=conversation commits.
    pub fn complete(&self, id: &str) -> Result<()> {
        {
            let mut rows = self.rows.write();
            let conv = rows
                .get_mut(id)
                .ok_or_else(|| Error::ConversationNotFound(id.to_string()))?;
            conv.status = ConversationStatus::Completed;
            conv.updated_at = chrono::Utc::now();
        }
        self.flush();
        Ok(())
    }

    /// Bumps `updatedAt` on any child-event insert.
    pub fn touch(&self, id: &str) {
        let changed = {
            let mut rows = self.rows.write();
            if let Some(conv) = rows.get_mut(id) {
                conv.updated_at = chrono::Utc::now();
                true
            } else {
                false
            }
        };
        if changed {
            self.flush();
        }
    }

    fn flush(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let rows = self.rows.read();
        if let Ok(json) = serde_json::to_string_pretty(&*rows) {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(path, json) {
                tracing::warn!(error = %e, "failed to persist conversation snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_domain::conversation::ConversationMeta;

    #[test]
    fn create_then_get() {
        let store = ConversationStore::new(None);
        let conv = store.create(ConversationMeta::default());
        assert_eq!(store.get(&conv.id).unwrap().id, conv.id);
    }

    #[test]
    fn complete_unknown_fails() {
        let store = ConversationStore::new(None);
        assert!(store.complete("nope").is_err());
    }

    #[test]
    fn list_filters_by_status() {
        let store = ConversationStore::new(None);
        let a = store.create(ConversationMeta::default());
        let _b = store.create(ConversationMeta::default());
        store.complete(&a.id).unwrap();

        let active = store.list(ConversationFilter {
            status: Some(ConversationStatus::Active),
            ..Default::default()
        });
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn snapshot_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let conv = {
            let store = ConversationStore::new(Some(dir.path().to_path_buf()));
            store.create(ConversationMeta::default())
        };
        let reloaded = ConversationStore::new(Some(dir.path().to_path_buf()));
        assert_eq!(reloaded.get(&conv.id).unwrap().id, conv.id);
    }
}
