//! Post-render QA gate: render failures, preflight, and disclaimer presence.

use async_trait::async_trait;

use cgvip_types::{AgentContext, AgentOutput, Payload, RenderTarget, Result};

use super::ids;
use crate::agent::Agent;
use crate::qa::{load_manifests, QaReport};

pub struct QaRiskAgent;

impl QaRiskAgent {
    const VERSION: &'static str = "1.0.0";
}

#[async_trait]
impl Agent for QaRiskAgent {
    fn agent_id(&self) -> &str {
        ids::QA_RISK
    }

    fn version(&self) -> Option<&str> {
        Some(Self::VERSION)
    }

    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let policy = &context.config.qa_risk;

        let report = match payload
            .get("report")
            .and_then(|v| serde_json::from_value::<QaReport>(v.clone()).ok())
        {
            Some(report) => report,
            None => {
                let targets = match context.target {
                    Some(target) => vec![target],
                    None => RenderTarget::ALL.to_vec(),
                };
                QaReport::aggregate(&load_manifests(&context.config, &targets).await)
            }
        };

        let mut reasoning = vec![format!(
            "QA report: {} passed, {} failed.",
            report.passed, report.failed
        )];
        let mut errors = Vec::new();

        if policy.block_on_any_failure && report.failed > 0 {
            errors.push(format!("{} variant(s) failed QA", report.failed));
            for f in &report.failures {
                reasoning.push(format!(
                    "[{}] {}: {}",
                    f.target,
                    f.variant_id.as_deref().unwrap_or("?"),
                    f.errors.join("; ")
                ));
            }
        }

        // Preflight and disclaimer flags are checked across every target.
        if policy.require_preflight_ok || policy.require_disclaimer_in_manifest {
            let manifests = load_manifests(&context.config, &RenderTarget::ALL).await;
            for (target, entries) in &manifests {
                for entry in entries {
                    let id = entry.variant_id.as_deref().unwrap_or("?");
                    if policy.require_preflight_ok && entry.preflight_ok == Some(false) {
                        errors.push(format!("[{target}] {id}: preflight failed"));
                        reasoning.push(format!("Preflight failed: {target} {id}"));
                    }
                    if policy.require_disclaimer_in_manifest && entry.disclaimer_present == Some(false)
                    {
                        errors.push(format!("[{target}] {id}: disclaimer missing"));
                        reasoning.push(format!("Disclaimer missing: {target} {id}"));
                    }
                }
            }
        }

        let approved = errors.is_empty();
        tracing::info!(
            passed = report.passed,
            failed = report.failed,
            approved,
            "QA risk evaluated"
        );

        let mut out = Payload::new().with("qaApproved", approved);
        if !approved {
            out.set("failures", serde_json::to_value(&report.failures)?);
        }
        Ok(AgentOutput::verdict(approved)
            .with_reasoning(reasoning)
            .with_errors(errors)
            .with_payload(out))
    }
}
