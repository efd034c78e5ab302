use std::sync::{Arc, OnceLock};

use documind_agent::AgentPipeline;

/// Shared handler state. The agent slot is filled once, after startup
/// loading finishes; until then requests get 503.
#[derive(Clone, Default)]
pub struct AppState {
    agent: Arc<OnceLock<Arc<AgentPipeline>>>,
}

impl AppState {
    /// State with the agent already loaded.
    pub fn loaded(agent: AgentPipeline) -> Self {
        let state = Self::default();
        state.install(agent);
        state
    }

    /// Install the agent. Returns `false` if one was already installed.
    pub fn install(&self, agent: AgentPipeline) -> bool {
        self.agent.set(Arc::new(agent)).is_ok()
    }

    pub fn agent(&self) -> Option<Arc<AgentPipeline>> {
        self.agent.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.agent.get().is_some()
    }
}
