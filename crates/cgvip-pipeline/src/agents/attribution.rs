//! Economic attribution: stamps feature-store records with attribution
//! fields and writes them as a new snapshot. The value metrics stay null
//! until analytics ingestion exists.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use cgvip_types::{AgentContext, AgentOutput, GovernanceError, Payload, Result, VariantRecord};

use super::{ids, FEATURE_STORE_PATH_KEY};
use crate::agent::Agent;
use crate::feature_store::{read_snapshot, FeatureStore};

/// Value metrics attached to every attributed record.
const VALUE_FIELDS: [&str; 4] = [
    "roas_uplift",
    "cost_per_asset_reduction",
    "compliance_review_time_reduction",
    "creative_reuse_rate",
];

pub struct EconomicAttributionAgent;

#[async_trait]
impl Agent for EconomicAttributionAgent {
    fn agent_id(&self) -> &str {
        ids::ECONOMIC_ATTRIBUTION
    }

    fn version(&self) -> Option<&str> {
        Some("0.1.0")
    }

    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let records = match payload.get_str(FEATURE_STORE_PATH_KEY) {
            Some(path) => match read_snapshot(Path::new(path)).await {
                Ok(records) => records,
                Err(GovernanceError::MissingInput { .. }) => Vec::new(),
                Err(e) => {
                    let message = format!("Failed to read feature store: {e}");
                    return Ok(AgentOutput::fail()
                        .with_reasoning([message.clone()])
                        .with_errors([message]));
                }
            },
            None => Vec::new(),
        };

        if records.is_empty() {
            return Ok(AgentOutput::pass()
                .with_reasoning(["No feature store records to attribute; skipping write"])
                .with_payload(
                    Payload::new()
                        .with("attributionPath", Value::Null)
                        .with("recordCount", 0),
                ));
        }

        let attributed_at = Utc::now().to_rfc3339();
        let attributed: Vec<VariantRecord> = records
            .into_iter()
            .map(|record| {
                VALUE_FIELDS.iter().fold(
                    record
                        .with("attribution_run_id", context.run_id.as_str())
                        .with("attributed_at", attributed_at.as_str()),
                    |r, field| r.with(*field, Value::Null),
                )
            })
            .collect();

        let store = FeatureStore::new(context.config.feature_store_dir());
        let path = store.write_attribution(&context.run_id, &attributed).await?;

        Ok(AgentOutput::pass()
            .with_reasoning([format!(
                "Stub: wrote {} attributed records to {}",
                attributed.len(),
                path.display()
            )])
            .with_payload(
                Payload::new()
                    .with("attributionPath", path.display().to_string())
                    .with("recordCount", attributed.len()),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::context;
    use cgvip_types::GovernanceConfig;
    use serde_json::json;

    #[tokio::test]
    async fn attributes_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = GovernanceConfig::with_root(dir.path());
        let snapshot = dir.path().join("run_a.json");
        std::fs::write(&snapshot, json!([{"variant_id": "V1"}, {"variant_id": "V2"}]).to_string())
            .unwrap();

        let payload = Payload::new().with(FEATURE_STORE_PATH_KEY, snapshot.display().to_string());
        let out = EconomicAttributionAgent
            .evaluate(&payload, &context(config))
            .await
            .unwrap();

        assert_eq!(out.success, Some(true));
        let out_payload = out.output_payload.unwrap();
        assert_eq!(out_payload.get("recordCount"), Some(&json!(2)));
        let path = out_payload.get_str("attributionPath").unwrap();
        assert!(path.ends_with("attribution_run_test.json"));

        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written[0]["attribution_run_id"], "run_test");
        assert!(written[0]["roas_uplift"].is_null());
        assert!(written[1].get("creative_reuse_rate").is_some());
    }

    #[tokio::test]
    async fn no_records_skips_write() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload::new()
            .with(FEATURE_STORE_PATH_KEY, dir.path().join("missing.json").display().to_string());
        let out = EconomicAttributionAgent
            .evaluate(&payload, &context(GovernanceConfig::with_root(dir.path())))
            .await
            .unwrap();
        assert_eq!(out.success, Some(true));
        let out_payload = out.output_payload.unwrap();
        assert_eq!(out_payload.get("attributionPath"), Some(&Value::Null));
        assert_eq!(out_payload.get("recordCount"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn unreadable_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("run_bad.json");
        std::fs::write(&snapshot, "{not json").unwrap();
        let payload = Payload::new().with(FEATURE_STORE_PATH_KEY, snapshot.display().to_string());
        let out = EconomicAttributionAgent
            .evaluate(&payload, &context(GovernanceConfig::with_root(dir.path())))
            .await
            .unwrap();
        assert_eq!(out.success, Some(false));
        assert!(out.errors.unwrap()[0].starts_with("Failed to read feature store"));
    }
}
