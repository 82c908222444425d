//! Variant optimization: chooses the next test set from scores and risk.
//!
//! Currently recommends every variant at equal weight and suppresses none.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use cgvip_types::{AgentContext, AgentOutput, Payload, Result};

use super::ids;
use crate::agent::Agent;

pub struct VariantOptimizationAgent;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SpendAllocation {
    variant_id: String,
    recommended_weight: f64,
}

#[async_trait]
impl Agent for VariantOptimizationAgent {
    fn agent_id(&self) -> &str {
        ids::VARIANT_OPTIMIZATION
    }

    fn version(&self) -> Option<&str> {
        Some("0.1.0")
    }

    async fn evaluate(&self, payload: &Payload, _context: &AgentContext) -> Result<AgentOutput> {
        let variant_ids = if payload.has_records() {
            payload
                .records()
                .iter()
                .filter_map(|r| r.variant_id())
                .collect()
        } else {
            ids_from(payload.get("scores"))
        };

        if variant_ids.is_empty() {
            return Ok(AgentOutput::fail()
                .with_reasoning(["Variant Optimization: no variants to optimize"])
                .with_errors(["payload.records or payload.scores required"]));
        }

        let weight = 1.0 / variant_ids.len() as f64;
        let allocation: Vec<SpendAllocation> = variant_ids
            .iter()
            .map(|id| SpendAllocation {
                variant_id: id.clone(),
                recommended_weight: weight,
            })
            .collect();

        Ok(AgentOutput::pass()
            .with_reasoning([format!(
                "Stub: recommended all {} variants; no suppression",
                variant_ids.len()
            )])
            .with_payload(
                Payload::new()
                    .with("variantIds", serde_json::to_value(&variant_ids)?)
                    .with("suppressionList", Value::Array(Vec::new()))
                    .with("spendAllocation", serde_json::to_value(&allocation)?)
                    .with("testSet", serde_json::to_value(&variant_ids)?),
            ))
    }
}

/// `variant_id` of every entry in a list of score objects.
fn ids_from(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("variant_id").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
