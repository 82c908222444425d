//! Dataset governance: the first gate of every run.
//!
//! Checks each record against the variant schema and the dataset rules, keeps
//! the valid ones, and stamps them with the dataset version.

use std::path::PathBuf;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use cgvip_types::{
    AgentContext, AgentOutput, DatasetGovernanceRules, GovernanceError, Payload, Result,
    VariantRecord, VariantSchema,
};

use super::{ids, no_id_label, tagged};
use crate::agent::Agent;

pub struct DatasetGovernanceAgent;

impl DatasetGovernanceAgent {
    const VERSION: &'static str = "1.0.0";
}

#[async_trait]
impl Agent for DatasetGovernanceAgent {
    fn agent_id(&self) -> &str {
        ids::DATASET_GOVERNANCE
    }

    fn version(&self) -> Option<&str> {
        Some(Self::VERSION)
    }

    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let records = payload.records();
        if records.is_empty() {
            return Ok(AgentOutput::fail()
                .with_reasoning(["No records in payload"])
                .with_errors(["Empty dataset"]));
        }

        let config = &context.config;
        let naming = compile_naming_regex(&config.governance)?;

        let dataset_version = payload
            .get_str("datasetVersion")
            .filter(|v| !v.is_empty())
            .map(String::from)
            .or_else(|| config.dataset_version.clone())
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());

        let mut reasoning = vec![format!("Dataset version: {dataset_version}")];
        let mut errors = Vec::new();
        let mut valid = Vec::new();

        for record in &records {
            let mut problems = validate_schema(record, &config.schema);
            problems.extend(validate_rules(record, &config.governance, naming.as_ref()));

            if problems.is_empty() {
                valid.push(record.clone().with("_datasetVersion", dataset_version.as_str()));
            } else {
                errors.extend(problems.iter().map(|p| tagged(record, p)));
                reasoning.push(format!("{}: {}", no_id_label(record), problems.join("; ")));
            }
        }

        let invalid = records.len() - valid.len();
        if invalid > 0 {
            reasoning.push(format!(
                "Filtered to {} valid records ({} invalid).",
                valid.len(),
                invalid
            ));
        }
        tracing::debug!(
            valid = valid.len(),
            invalid,
            version = %dataset_version,
            "dataset governance evaluated"
        );

        Ok(AgentOutput::verdict(errors.is_empty())
            .with_reasoning(reasoning)
            .with_errors(errors)
            .with_payload(
                Payload::from_records(valid).with("datasetVersion", dataset_version),
            ))
    }
}

fn compile_naming_regex(rules: &DatasetGovernanceRules) -> Result<Option<Regex>> {
    rules
        .naming_regex
        .as_deref()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| GovernanceError::Config {
                path: PathBuf::from("dataset_governance.json"),
                message: format!("invalid namingRegex: {e}"),
            })
        })
        .transpose()
}

/// Required fields and declared property types.
fn validate_schema(record: &VariantRecord, schema: &VariantSchema) -> Vec<String> {
    let mut problems = Vec::new();
    for field in &schema.required {
        if record.is_blank(field) {
            problems.push(format!("missing required field: {field}"));
        }
    }
    for (key, prop) in &schema.properties {
        let (Some(value), Some(kind)) = (record.get(key), prop.kind.as_deref()) else {
            continue;
        };
        if !matches_type(value, kind) {
            problems.push(format!("invalid type for {key} (expected {kind})"));
        }
    }
    problems
}

/// Only `string`, `boolean`, and `number` are checked; other types accept anything.
fn matches_type(value: &Value, kind: &str) -> bool {
    match (value, kind) {
        (Value::Null, _) => true,
        (v, "string") => v.is_string(),
        (v, "boolean") => v.is_boolean(),
        (v, "number") => v.is_number(),
        _ => true,
    }
}

/// Naming convention, per-market required fields, and conflicting claims.
fn validate_rules(
    record: &VariantRecord,
    rules: &DatasetGovernanceRules,
    naming: Option<&Regex>,
) -> Vec<String> {
    let mut problems = Vec::new();

    if let (Some(re), Some(id)) = (naming, record.variant_id().filter(|id| !id.is_empty())) {
        if !re.is_match(&id) {
            problems.push("variant_id does not match naming convention".to_string());
        }
    }

    let market = record.text("market");
    if let Some(required) = market
        .as_deref()
        .and_then(|m| rules.required_fields_per_market.get(m))
    {
        let market = market.as_deref().unwrap_or_default();
        for field in required {
            if record.is_blank(field) {
                problems.push(format!(
                    "missing market-required field: {field} for market {market}"
                ));
            }
        }
    }

    for rule in &rules.conflicting_claims {
        if let Some(rule_market) = &rule.market {
            if market.as_deref() != Some(rule_market.as_str()) {
                continue;
            }
        }
        let a = record.text(&rule.claim_field_a).as_deref() == Some(rule.claim_a.as_str());
        let b = record.text(&rule.claim_field_b).as_deref() == Some(rule.claim_b.as_str());
        if a && b {
            let scope = rule
                .market
                .as_ref()
                .map(|m| format!(" in market {m}"))
                .unwrap_or_default();
            problems.push(format!(
                "conflict: {} and {} not allowed together{scope}",
                rule.claim_a, rule.claim_b
            ));
        }
    }

    problems
}
