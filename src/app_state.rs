use crate::services::orchestrator::JobOrchestrator;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: JobOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self { orchestrator }
    }
}
