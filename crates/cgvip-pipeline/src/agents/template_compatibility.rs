//! Template compatibility: copy must fit the template's text frames.

use async_trait::async_trait;
use serde_json::json;

use cgvip_types::{AgentContext, AgentOutput, Payload, Result, TemplateLimits, VariantRecord};

use super::{ids, no_id_label, record_language, tagged};
use crate::agent::Agent;

/// Copy fields with per-language character limits.
const LIMITED_FIELDS: [&str; 3] = ["headline", "subheadline", "cta"];

pub struct TemplateCompatibilityAgent;

impl TemplateCompatibilityAgent {
    const VERSION: &'static str = "1.0.0";
}

#[async_trait]
impl Agent for TemplateCompatibilityAgent {
    fn agent_id(&self) -> &str {
        ids::TEMPLATE_COMPATIBILITY
    }

    fn version(&self) -> Option<&str> {
        Some(Self::VERSION)
    }

    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let records = payload.records();
        let limits = &context.config.template_limits;
        let template_version = payload
            .get_str("templateVersion")
            .filter(|v| !v.is_empty())
            .unwrap_or("1.0")
            .to_string();

        if limits.is_empty() {
            return Ok(AgentOutput::pass()
                .with_reasoning(["No template limits configured; skipping character limit checks."])
                .with_errors(Vec::<String>::new())
                .with_payload(
                    Payload::from_records(records).with("templateVersion", template_version),
                ));
        }

        let mut reasoning = Vec::new();
        let mut errors = Vec::new();
        let mut out = Vec::with_capacity(records.len());

        for record in records {
            let problems = check_lengths(&record, limits);
            if problems.is_empty() {
                out.push(record);
                continue;
            }
            errors.extend(problems.iter().map(|p| tagged(&record, p)));
            reasoning.push(format!("{}: {}", no_id_label(&record), problems.join("; ")));
            out.push(record.with("_templateCompatibilityErrors", json!(problems)));
        }

        if !errors.is_empty() {
            reasoning.push(format!(
                "Template compatibility: {} issue(s) in {} records.",
                errors.len(),
                out.len()
            ));
        }

        Ok(AgentOutput::verdict(errors.is_empty())
            .with_reasoning(reasoning)
            .with_errors(errors)
            .with_payload(Payload::from_records(out).with("templateVersion", template_version)))
    }
}

/// Lengths are counted in characters.
fn check_lengths(record: &VariantRecord, limits: &TemplateLimits) -> Vec<String> {
    let lang = record_language(record);
    LIMITED_FIELDS
        .iter()
        .filter_map(|&field| {
            let max = limits.limit_for(field, &lang)?;
            let len = record.text(field)?.chars().count();
            (len > max).then(|| format!("{field} length {len} > {max} for {lang}"))
        })
        .collect()
}
