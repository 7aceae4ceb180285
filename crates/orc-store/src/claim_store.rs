use std::collections::HashMap;

use orc_domain::claim::{Claim, ClaimOutcome};
use orc_domain::guidance::GuidanceSeq;
use parking_lot::RwLock;

/// Unique turn-claim records with expiry.
///
/// The primary key is `(conversation, guidance_seq)`; re-insertion by the
/// winning agent is reported back as a distinct outcome from a fresh claim
/// so the Orchestrator can decide whether to emit `turn_claimed` again.
#[derive(Default)]
pub struct ClaimStore {
    rows: RwLock<HashMap<(String, GuidanceSeq), Claim>>,
}

impl ClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts a unique insert on `(conversation, guidance_seq)`.
    pub fn claim(
        &self,
        conversation: &str,
        guidance_seq: GuidanceSeq,
        agent_id: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> ClaimOutcome {
        let key = (conversation.to_string(), guidance_seq);
        let mut rows = self.rows.write();
        match rows.get(&key) {
            Some(existing) if existing.agent_id == agent_id => ClaimOutcome::AlreadyMine,
            Some(_) => ClaimOutcome::Contended,
            None => {
                rows.insert(
                    key,
                    Claim {
                        conversation: conversation.to_string(),
                        guidance_seq,
                        agent_id: agent_id.to_string(),
                        claimed_at: chrono::Utc::now(),
                        expires_at,
                    },
                );
                ClaimOutcome::Claimed
            }
        }
    }

    pub fn get_active(&self, conversation: &str) -> Vec<Claim> {
        self.rows
            .read()
            .values()
            .filter(|c| c.conversation == conversation)
            .cloned()
            .collect()
    }

    pub fn get_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Claim> {
        self.rows
            .read()
            .values()
            .filter(|c| c.expires_at <= now)
            .cloned()
            .collect()
    }

    pub fn delete(&self, conversation: &str, guidance_seq: GuidanceSeq) -> bool {
        self.rows
            .write()
            .remove(&(conversation.to_string(), guidance_seq))
            .is_some()
    }

    /// Deletes every expired claim, returning how many were reclaimed.
    pub fn delete_expired(&self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, c| c.expires_at > now);
        before - rows.len()
    }

    /// Deletes every claim for a conversation, e.g. when it completes.
    pub fn delete_all_for(&self, conversation: &str) -> usize {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|k, _| k.0 != conversation);
        before - rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: i64) -> GuidanceSeq {
        GuidanceSeq::after_event(n)
    }

    #[test]
    fn first_claim_wins() {
        let store = ClaimStore::new();
        let exp = chrono::Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(store.claim("c1", seq(1), "B", exp), ClaimOutcome::Claimed);
    }

    #[test]
    fn second_agent_contends() {
        let store = ClaimStore::new();
        let exp = chrono::Utc::now() + chrono::Duration::seconds(30);
        store.claim("c1", seq(1), "B", exp);
        assert_eq!(store.claim("c1", seq(1), "C", exp), ClaimOutcome::Contended);
    }

    #[test]
    fn reclaim_by_winner_is_idempotent() {
        let store = ClaimStore::new();
        let exp = chrono::Utc::now() + chrono::Duration::seconds(30);
        store.claim("c1", seq(1), "B", exp);
        assert_eq!(store.claim("c1", seq(1), "B", exp), ClaimOutcome::AlreadyMine);
    }

    #[test]
    fn expired_claims_are_deleted_and_counted() {
        let store = ClaimStore::new();
        let past = chrono::Utc::now() - chrono::Duration::seconds(1);
        store.claim("c1", seq(1), "B", past);
        assert_eq!(store.delete_expired(chrono::Utc::now()), 1);
        assert!(store.get_active("c1").is_empty());
    }
}
