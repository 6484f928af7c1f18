use std::sync::Arc;
use tubeid_core::{Config, RunOrchestrator, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<RunOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<RunOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &RunOrchestrator {
        self.orchestrator.as_ref()
    }
}
