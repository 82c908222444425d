//! Agent trait and the static agent registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use cgvip_types::{AgentContext, AgentOutput, GovernanceError, Payload, Result};

use crate::agents;

// ---------------------------------------------------------------------------
// Agent trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Agent: Send + Sync {
    /// The identifier the registry resolves (e.g. "dataset_governance").
    fn agent_id(&self) -> &str;

    /// Version tag written to audit entries.
    fn version(&self) -> Option<&str> {
        None
    }

    /// Evaluate the payload. Agents never mutate their input; anything they
    /// want merged goes into `outputPayload`.
    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput>;
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: impl Agent + 'static) {
        let id = agent.agent_id().to_string();
        self.agents.insert(id, Arc::new(agent));
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(agent_id).cloned()
    }

    /// Like [`get`](Self::get) but unresolved ids are an `AgentNotFound` error.
    pub fn resolve(&self, agent_id: &str) -> Result<Arc<dyn Agent>> {
        self.get(agent_id)
            .ok_or_else(|| GovernanceError::AgentNotFound {
                agent: agent_id.to_string(),
            })
    }

    pub fn has(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Registry with every built-in agent.
pub fn default_registry() -> AgentRegistry {
    let mut reg = AgentRegistry::new();
    reg.register(agents::DatasetGovernanceAgent);
    reg.register(agents::ComplianceIntelligenceAgent);
    reg.register(agents::TemplateCompatibilityAgent);
    reg.register(agents::RenderHandoffAgent);
    reg.register(agents::BehavioralAggregatorAgent);
    reg.register(agents::QaRiskAgent);
    reg.register(agents::PerformancePredictionAgent);
    reg.register(agents::ComplianceRiskPredictionAgent);
    reg.register(agents::VariantOptimizationAgent);
    reg.register(agents::EconomicAttributionAgent);
    reg.register(agents::PerformanceIntelligenceAgent);
    reg
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
