//! Built-in agents.
//!
//! The governance stages (dataset, compliance, template) validate records and
//! gate a run. Render hand-off emits the artifacts the host script consumes.
//! The remaining agents observe rendered output or advise on the next run and
//! never gate anything.

mod attribution;
mod behavioral_aggregator;
mod compliance;
mod dataset_governance;
mod optimization;
mod performance;
mod prediction;
mod qa_risk;
mod render_handoff;
mod template_compatibility;

pub use attribution::EconomicAttributionAgent;
pub use behavioral_aggregator::BehavioralAggregatorAgent;
pub use compliance::ComplianceIntelligenceAgent;
pub use dataset_governance::DatasetGovernanceAgent;
pub use optimization::VariantOptimizationAgent;
pub use performance::PerformanceIntelligenceAgent;
pub use prediction::{ComplianceRiskPredictionAgent, PerformancePredictionAgent};
pub use qa_risk::QaRiskAgent;
pub use render_handoff::RenderHandoffAgent;
pub use template_compatibility::TemplateCompatibilityAgent;

use std::path::PathBuf;

use cgvip_types::{Payload, Result, VariantRecord};

use crate::feature_store::read_snapshot;

/// Registry identifiers of the built-in agents.
pub mod ids {
    pub const DATASET_GOVERNANCE: &str = "dataset_governance";
    pub const COMPLIANCE_INTELLIGENCE: &str = "compliance_intelligence";
    pub const TEMPLATE_COMPATIBILITY: &str = "template_compatibility";
    pub const RENDER_ORCHESTRATION: &str = "render_orchestration";
    pub const BEHAVIORAL_AGGREGATOR: &str = "behavioral_aggregator";
    pub const QA_RISK: &str = "qa_risk";
    pub const PERFORMANCE_PREDICTION: &str = "performance_prediction";
    pub const COMPLIANCE_RISK_PREDICTION: &str = "compliance_risk_prediction";
    pub const VARIANT_OPTIMIZATION: &str = "variant_optimization";
    pub const ECONOMIC_ATTRIBUTION: &str = "economic_attribution";
    pub const PERFORMANCE_INTELLIGENCE: &str = "performance_intelligence";

    /// The gating stages, in execution order.
    pub const GOVERNANCE_STAGES: [&str; 3] =
        [DATASET_GOVERNANCE, COMPLIANCE_INTELLIGENCE, TEMPLATE_COMPATIBILITY];
}

/// Payload key naming a feature-store snapshot to read records from.
pub const FEATURE_STORE_PATH_KEY: &str = "featureStorePath";

/// Records for the advisory agents: the payload's `records` when present,
/// else the snapshot named by `featureStorePath`. `None` when the payload has
/// neither.
pub(crate) async fn advisory_records(payload: &Payload) -> Result<Option<Vec<VariantRecord>>> {
    if payload.has_records() {
        return Ok(Some(payload.records()));
    }
    match payload.get_str(FEATURE_STORE_PATH_KEY) {
        Some(path) => Ok(Some(read_snapshot(&PathBuf::from(path)).await?)),
        None => Ok(None),
    }
}

/// Language used for per-language rules; lowercased, `en` when absent.
pub(crate) fn record_language(record: &VariantRecord) -> String {
    record
        .trimmed("language")
        .map(|l| l.to_lowercase())
        .unwrap_or_else(|| "en".to_string())
}

/// `[variant] message`, the per-record error format shared by the
/// governance stages.
pub(crate) fn tagged(record: &VariantRecord, message: &str) -> String {
    format!("[{}] {}", no_id_label(record), message)
}

pub(crate) fn no_id_label(record: &VariantRecord) -> String {
    record
        .variant_id()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "(no id)".to_string())
}
