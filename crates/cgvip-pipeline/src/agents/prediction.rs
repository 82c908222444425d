//! Advisory scoring over feature-store records.
//!
//! Both agents emit placeholder scores until a trained model exists; the
//! output shapes are what downstream optimization consumes.

use async_trait::async_trait;
use serde::Serialize;

use cgvip_types::{AgentContext, AgentOutput, Payload, Result};

use super::{advisory_records, ids};
use crate::agent::Agent;

const MISSING_INPUT: &str = "payload.records or payload.featureStorePath required";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceScore {
    pub variant_id: Option<String>,
    pub predicted_score: f64,
    pub conversion_probability: f64,
    pub engagement_lift: f64,
    pub fatigue_score: f64,
    pub ctr_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskScore {
    pub variant_id: Option<String>,
    pub risk_score: f64,
    pub reasons: Vec<String>,
}

// ---------------------------------------------------------------------------
// Performance prediction
// ---------------------------------------------------------------------------

pub struct PerformancePredictionAgent;

#[async_trait]
impl Agent for PerformancePredictionAgent {
    fn agent_id(&self) -> &str {
        ids::PERFORMANCE_PREDICTION
    }

    fn version(&self) -> Option<&str> {
        Some("0.1.0")
    }

    async fn evaluate(&self, payload: &Payload, _context: &AgentContext) -> Result<AgentOutput> {
        let Some(records) = advisory_records(payload).await? else {
            return Ok(AgentOutput::fail()
                .with_reasoning(["Performance Prediction: no records or featureStorePath in payload"])
                .with_errors([MISSING_INPUT]));
        };

        let scores: Vec<PerformanceScore> = records
            .iter()
            .map(|r| PerformanceScore {
                variant_id: r.variant_id(),
                predicted_score: 0.5,
                conversion_probability: 0.5,
                engagement_lift: 0.0,
                fatigue_score: 0.0,
                ctr_score: 0.5,
            })
            .collect();

        Ok(AgentOutput::pass()
            .with_reasoning([format!(
                "Stub: assigned placeholder scores for {} variants",
                scores.len()
            )])
            .with_payload(Payload::new().with("scores", serde_json::to_value(&scores)?)))
    }
}

// ---------------------------------------------------------------------------
// Compliance risk prediction
// ---------------------------------------------------------------------------

pub struct ComplianceRiskPredictionAgent;

#[async_trait]
impl Agent for ComplianceRiskPredictionAgent {
    fn agent_id(&self) -> &str {
        ids::COMPLIANCE_RISK_PREDICTION
    }

    fn version(&self) -> Option<&str> {
        Some("0.1.0")
    }

    async fn evaluate(&self, payload: &Payload, _context: &AgentContext) -> Result<AgentOutput> {
        let Some(records) = advisory_records(payload).await? else {
            return Ok(AgentOutput::fail()
                .with_reasoning(["Compliance Risk Prediction: no records or featureStorePath in payload"])
                .with_errors([MISSING_INPUT]));
        };

        let risk_scores: Vec<RiskScore> = records
            .iter()
            .map(|r| {
                if r.approved() {
                    RiskScore {
                        variant_id: r.variant_id(),
                        risk_score: 0.1,
                        reasons: Vec::new(),
                    }
                } else {
                    RiskScore {
                        variant_id: r.variant_id(),
                        risk_score: 0.5,
                        reasons: vec!["Unapproved variant; stub risk".to_string()],
                    }
                }
            })
            .collect();

        Ok(AgentOutput::pass()
            .with_reasoning([format!(
                "Stub: assigned risk scores for {} variants",
                risk_scores.len()
            )])
            .with_payload(
                Payload::new().with("riskScores", serde_json::to_value(&risk_scores)?),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::default_context;
    use serde_json::json;

    #[tokio::test]
    async fn placeholder_scores_per_record() {
        let payload = Payload::new().with("records", json!([{"variant_id": "V1"}, {"variant_id": "V2"}]));
        let out = PerformancePredictionAgent
            .evaluate(&payload, &default_context())
            .await
            .unwrap();
        assert_eq!(
            out.reasoning_log.unwrap(),
            vec!["Stub: assigned placeholder scores for 2 variants"]
        );
        let scores = out.output_payload.unwrap();
        assert_eq!(scores.get("scores").unwrap()[1]["variant_id"], "V2");
        assert_eq!(scores.get("scores").unwrap()[1]["ctr_score"], 0.5);
    }

    #[tokio::test]
    async fn risk_follows_approval() {
        let payload = Payload::new().with(
            "records",
            json!([{"variant_id": "V1", "approved": true}, {"variant_id": "V2", "approved": "no"}]),
        );
        let out = ComplianceRiskPredictionAgent
            .evaluate(&payload, &default_context())
            .await
            .unwrap();
        let payload = out.output_payload.unwrap();
        let risks = payload.get("riskScores").unwrap();
        assert_eq!(risks[0]["risk_score"], 0.1);
        assert_eq!(risks[0]["reasons"], json!([]));
        assert_eq!(risks[1]["risk_score"], 0.5);
        assert_eq!(risks[1]["reasons"], json!(["Unapproved variant; stub risk"]));
    }

    #[tokio::test]
    async fn reads_feature_store_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_x.json");
        std::fs::write(&path, json!([{"variant_id": "V7", "approved": false}]).to_string()).unwrap();
        let payload = Payload::new().with("featureStorePath", path.display().to_string());
        let out = ComplianceRiskPredictionAgent
            .evaluate(&payload, &default_context())
            .await
            .unwrap();
        assert_eq!(out.success, Some(true));
        assert_eq!(out.output_payload.unwrap().get("riskScores").unwrap()[0]["variant_id"], "V7");
    }

    #[tokio::test]
    async fn no_input_fails() {
        let out = PerformancePredictionAgent
            .evaluate(&Payload::new(), &default_context())
            .await
            .unwrap();
        assert_eq!(out.success, Some(false));
        assert_eq!(out.errors.unwrap(), vec![MISSING_INPUT]);
    }
}
