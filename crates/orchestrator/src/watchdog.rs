//! Periodic reaper for expired turn claims. Runs as a background task owned
//! by the server; never surfaces errors, only emits `claim_expired` advisory
//! events for whatever it reclaims.

use std::sync::Arc;
use std::time::Duration;

use crate::service::OrchestratorService;

pub fn spawn(service: Arc<OrchestratorService>, interval_ms: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            let reclaimed = service.sweep_expired_claims().await;
            if reclaimed > 0 {
                tracing::debug!(reclaimed, "watchdog swept expired claims");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_domain::conversation::ConversationMeta;
    use orc_domain::guidance::GuidanceSeq;

    #[tokio::test]
    async fn sweeps_an_expired_claim_within_one_tick() {
        let service = Arc::new(OrchestratorService::new(Arc::new(orc_domain::config::Config::default())));
        let conv = service.create_conversation(ConversationMeta::default());
        let seq = GuidanceSeq::after_event(1);
        service
            .claims
            .claim(&conv.id, seq, "B", chrono::Utc::now() - chrono::Duration::seconds(1));

        let handle = spawn(service.clone(), 20);
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        assert!(service.claims.get_active(&conv.id).is_empty());
    }
}
