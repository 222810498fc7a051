use std::sync::Arc;

use crate::agent::ComputerUseAgent;
use crate::config::Config;
use crate::runner::PlanRunner;
use crate::runs::RunRegistry;
use crate::storage::{PlanStore, RecordingStore};
use crate::synthesis::{GeminiPlanSynthesizer, PlanSynthesis};
use crate::teach::TeachManager;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub recordings: RecordingStore,
    pub plans: PlanStore,
    pub registry: Arc<RunRegistry>,
    pub teach: TeachManager,
    pub agent: Arc<ComputerUseAgent>,
    pub synthesizer: Arc<dyn PlanSynthesis>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let agent = Arc::new(ComputerUseAgent::new(config.agent.clone()));
        Self {
            recordings: RecordingStore::new(),
            plans: PlanStore::new(),
            registry: Arc::new(RunRegistry::new(config.retention.clone())),
            teach: TeachManager::new(config.teach.clone(), config.runner.viewport),
            agent,
            synthesizer: Arc::new(GeminiPlanSynthesizer::from_env()),
            config,
        }
    }

    /// A runner bound to this process's agent and tunables.
    pub fn plan_runner(&self) -> PlanRunner {
        PlanRunner::new(Arc::clone(&self.agent), self.config.runner.clone())
    }
}
