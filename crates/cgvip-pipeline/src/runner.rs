//! Uniform agent invocation.
//!
//! [`AgentRunner::run`] is total: whatever the agent does (returns, errors,
//! panics, or does not exist), the caller gets a normalized [`AgentResult`].

use cgvip_types::{AgentContext, AgentResult, GovernanceError, Payload};

use crate::agent::AgentRegistry;

pub struct AgentRunner {
    registry: AgentRegistry,
}

impl AgentRunner {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Version tag of a registered agent.
    pub fn version_of(&self, agent_id: &str) -> Option<String> {
        self.registry
            .get(agent_id)
            .and_then(|a| a.version().map(String::from))
    }

    /// Resolve `agent_id`, evaluate it to completion, and normalize the verdict.
    pub async fn run(
        &self,
        agent_id: &str,
        payload: &Payload,
        context: &AgentContext,
    ) -> AgentResult {
        let agent = match self.registry.resolve(agent_id) {
            Ok(agent) => agent,
            Err(e) => {
                tracing::warn!(agent = %agent_id, run_id = %context.run_id, "agent not registered");
                return AgentResult::from_error(agent_id, &e);
            }
        };

        tracing::debug!(agent = %agent_id, run_id = %context.run_id, "evaluating agent");

        // Evaluate on its own task so a panic is contained to that task.
        let payload = payload.clone();
        let task_context = context.clone();
        let handle =
            tokio::spawn(async move { agent.evaluate(&payload, &task_context).await });

        match handle.await {
            Ok(Ok(output)) => AgentResult::normalize(output),
            Ok(Err(e)) => {
                tracing::warn!(agent = %agent_id, error = %e, "agent returned an error");
                AgentResult::from_error(agent_id, &e)
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                tracing::error!(agent = %agent_id, message = %message, "agent panicked");
                let err = GovernanceError::AgentPanicked {
                    agent: agent_id.to_string(),
                    message,
                };
                AgentResult::from_error(agent_id, &err)
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use async_trait::async_trait;
    use cgvip_types::{AgentOutput, ApprovalState, GovernanceConfig, Result, RunId};
    use std::sync::Arc;

    struct Panicky;

    #[async_trait]
    impl Agent for Panicky {
        fn agent_id(&self) -> &str {
            "panicky"
        }

        async fn evaluate(&self, _payload: &Payload, _ctx: &AgentContext) -> Result<AgentOutput> {
            panic!("rule table exploded");
        }
    }

    struct Erroring;

    #[async_trait]
    impl Agent for Erroring {
        fn agent_id(&self) -> &str {
            "erroring"
        }

        async fn evaluate(&self, _payload: &Payload, _ctx: &AgentContext) -> Result<AgentOutput> {
            Err(GovernanceError::Other("disk on fire".into()))
        }
    }

    struct Sparse;

    #[async_trait]
    impl Agent for Sparse {
        fn agent_id(&self) -> &str {
            "sparse"
        }

        fn version(&self) -> Option<&str> {
            Some("0.1")
        }

        async fn evaluate(&self, _payload: &Payload, _ctx: &AgentContext) -> Result<AgentOutput> {
            Ok(AgentOutput::default())
        }
    }

    fn runner() -> AgentRunner {
        let mut reg = AgentRegistry::new();
        reg.register(Panicky);
        reg.register(Erroring);
        reg.register(Sparse);
        AgentRunner::new(reg)
    }

    fn ctx() -> AgentContext {
        AgentContext::new(
            RunId::new("run_test"),
            Arc::new(GovernanceConfig::with_root(".")),
        )
    }

    #[tokio::test]
    async fn missing_agent_becomes_failing_result() {
        let result = runner().run("ghost", &Payload::new(), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.approval_state, ApprovalState::Fail);
        assert_eq!(result.reasoning_log, vec!["Agent not found: ghost"]);
        assert!(result.halts_pipeline());
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let result = runner().run("panicky", &Payload::new(), &ctx()).await;
        assert_eq!(result.approval_state, ApprovalState::Fail);
        assert!(result.errors[0].contains("rule table exploded"));
    }

    #[tokio::test]
    async fn error_is_converted() {
        let result = runner().run("erroring", &Payload::new(), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["disk on fire"]);
    }

    #[tokio::test]
    async fn sparse_output_is_normalized() {
        let r = runner();
        let result = r.run("sparse", &Payload::new(), &ctx()).await;
        assert!(result.success);
        assert_eq!(result.approval_state, ApprovalState::Pass);
        assert!(result.errors.is_empty());
        assert_eq!(r.version_of("sparse").as_deref(), Some("0.1"));
        assert_eq!(r.version_of("ghost"), None);
    }
}
