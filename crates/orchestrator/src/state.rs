use std::sync::Arc;

use crate::service::OrchestratorService;

/// Shared application state passed to the RPC connection handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrchestratorService>,
}

impl AppState {
    pub fn new(config: orc_domain::config::Config) -> Self {
        AppState {
            service: Arc::new(OrchestratorService::new(Arc::new(config))),
        }
    }
}
