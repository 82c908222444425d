//! Behavioral signal aggregation: snapshots variants, render outcomes, and
//! signals into the feature store. Collection only, no scoring.

use async_trait::async_trait;

use cgvip_types::{AgentContext, AgentOutput, Payload, RenderTarget, Result};

use super::{ids, FEATURE_STORE_PATH_KEY};
use crate::agent::Agent;
use crate::feature_store::{build_feature_records, FeatureStore, ManifestIndex, SignalIndex};
use crate::qa::{load_manifests, ManifestSet};

pub struct BehavioralAggregatorAgent;

impl BehavioralAggregatorAgent {
    const VERSION: &'static str = "1.0.0";
}

#[async_trait]
impl Agent for BehavioralAggregatorAgent {
    fn agent_id(&self) -> &str {
        ids::BEHAVIORAL_AGGREGATOR
    }

    fn version(&self) -> Option<&str> {
        Some(Self::VERSION)
    }

    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let variants = payload.records();
        if variants.is_empty() {
            return Ok(AgentOutput::fail()
                .with_reasoning(["Behavioral Signal Aggregator: no records in payload"])
                .with_errors(["payload.records is required and must be a non-empty array"]));
        }

        let mut reasoning = Vec::new();

        // Manifests passed in the payload win; otherwise read them from disk.
        let manifests = match payload.get("manifests") {
            Some(value) => match serde_json::from_value::<ManifestSet>(value.clone()) {
                Ok(set) => set,
                Err(e) => {
                    reasoning.push(format!("Ignoring malformed manifests in payload: {e}"));
                    ManifestSet::new()
                }
            },
            None => load_manifests(&context.config, &RenderTarget::ALL).await,
        };
        let index = ManifestIndex::build(&manifests);

        let signals_path = payload
            .get_str("signalsPath")
            .map(std::path::PathBuf::from)
            .or_else(|| context.signals_path.clone());
        let (signals, note) = SignalIndex::load(signals_path.as_deref()).await;
        reasoning.extend(note);

        let records = build_feature_records(&variants, &index, &signals, &context.run_id);
        let store = FeatureStore::new(context.config.feature_store_dir());
        let path = store.write_snapshot(&context.run_id, &records).await?;

        tracing::debug!(
            run_id = %context.run_id,
            manifests = index.len(),
            signals = signals.len(),
            "behavioral signals aggregated"
        );
        reasoning.push(format!("Wrote {} records to {}", records.len(), path.display()));

        Ok(AgentOutput::pass().with_reasoning(reasoning).with_payload(
            Payload::new()
                .with(FEATURE_STORE_PATH_KEY, path.display().to_string())
                .with("recordCount", records.len())
                .with("runId", context.run_id.as_str()),
        ))
    }
}
