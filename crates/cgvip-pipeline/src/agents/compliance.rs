//! Compliance intelligence: claim, disclaimer, and expiry rules.
//!
//! Every record is kept and annotated with `compliance_approved` and
//! `compliance_errors`; records with problems also land in the exception
//! report.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::json;

use cgvip_types::{AgentContext, AgentOutput, ComplianceRules, Payload, Result, VariantRecord};

use super::{ids, no_id_label, tagged};
use crate::agent::Agent;

pub struct ComplianceIntelligenceAgent;

impl ComplianceIntelligenceAgent {
    const VERSION: &'static str = "1.0.0";
}

#[derive(Debug, Clone, Serialize)]
struct ComplianceException {
    variant_id: String,
    reasons: Vec<String>,
}

#[async_trait]
impl Agent for ComplianceIntelligenceAgent {
    fn agent_id(&self) -> &str {
        ids::COMPLIANCE_INTELLIGENCE
    }

    fn version(&self) -> Option<&str> {
        Some(Self::VERSION)
    }

    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let records = payload.records();
        let rules = &context.config.compliance;
        let today = chrono::Local::now().date_naive();

        let compliance_version = payload
            .get_str("complianceVersion")
            .filter(|v| !v.is_empty())
            .unwrap_or("v1")
            .to_string();

        let mut reasoning = vec![format!("Compliance version: {compliance_version}")];
        let mut errors = Vec::new();
        let mut exceptions = Vec::new();
        let mut annotated = Vec::with_capacity(records.len());

        for record in &records {
            let problems = check_record(record, rules, today);
            let approved = problems.is_empty();
            if !approved {
                errors.extend(problems.iter().map(|p| tagged(record, p)));
                reasoning.push(format!("{}: {}", no_id_label(record), problems.join("; ")));
                exceptions.push(ComplianceException {
                    variant_id: no_id_label(record),
                    reasons: problems.clone(),
                });
            }
            annotated.push(
                record
                    .clone()
                    .with("compliance_approved", approved)
                    .with("compliance_errors", json!(problems)),
            );
        }

        if !exceptions.is_empty() {
            reasoning.push(format!(
                "Compliance exceptions: {} of {} records",
                exceptions.len(),
                records.len()
            ));
        }
        tracing::debug!(
            records = records.len(),
            exceptions = exceptions.len(),
            "compliance evaluated"
        );

        Ok(AgentOutput::verdict(exceptions.is_empty())
            .with_reasoning(reasoning)
            .with_errors(errors)
            .with_payload(
                Payload::from_records(annotated)
                    .with("complianceVersion", compliance_version)
                    .with("exceptionReport", serde_json::to_value(&exceptions)?),
            ))
    }
}

fn check_record(record: &VariantRecord, rules: &ComplianceRules, today: NaiveDate) -> Vec<String> {
    let mut problems = Vec::new();
    let market = record.text("market").unwrap_or_default();

    if let Some(claim) = record.text("claim_id").filter(|c| !c.is_empty()) {
        if let Some(allowed) = rules.claim_market.get(&market) {
            if !allowed.iter().any(|a| a == claim.trim()) {
                problems.push(format!("claim {claim} not allowed for market {market}"));
            }
        }
    }

    if let Some(id) = record.trimmed("legal_disclaimer_id") {
        match rules.disclaimer_library.get(&id) {
            None => problems.push(format!("legal_disclaimer_id {id} not in disclaimer library")),
            Some(entry) => {
                if let Some(markets) = &entry.markets {
                    if !markets.contains(&market) {
                        problems.push(format!("disclaimer {id} not approved for market {market}"));
                    }
                }
                let language = record.trimmed("language").map(|l| l.to_lowercase());
                if let (Some(languages), Some(language)) = (&entry.languages, language) {
                    if !languages.contains(&language) {
                        problems.push(format!(
                            "disclaimer {id} not approved for language {language}"
                        ));
                    }
                }
            }
        }
    }

    let expiry = &rules.expiry;
    if expiry.require_start_date && record.is_blank("start_date") {
        problems.push("start_date required by expiry rules".to_string());
    }
    if expiry.require_end_date && record.is_blank("end_date") {
        problems.push("end_date required by expiry rules".to_string());
    }

    let start = record.get_str("start_date").and_then(parse_date);
    let end = record.get_str("end_date").and_then(parse_date);
    if let Some(end) = end {
        if expiry.reject_past_end_date && end < today {
            problems.push("end_date is in the past".to_string());
        }
    }
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            problems.push("end_date must be after start_date".to_string());
        }
        if let Some(max) = expiry.max_range_days.filter(|m| *m > 0) {
            if (end - start).num_days() > max {
                problems.push(format!("date range exceeds max {max} days"));
            }
        }
    }

    problems
}

/// Calendar dates (`2024-06-30`) or ISO timestamps; anything else is no date.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{context, record};
    use cgvip_types::{DisclaimerEntry, ExpiryRules, GovernanceConfig};

    fn rules() -> ComplianceRules {
        ComplianceRules {
            claim_market: [("US".to_string(), vec!["C1".to_string()])].into_iter().collect(),
            disclaimer_library: [(
                "D1".to_string(),
                DisclaimerEntry {
                    text: Some("Terms apply.".into()),
                    markets: Some(vec!["US".into()]),
                    languages: Some(vec!["en".into()]),
                },
            )]
            .into_iter()
            .collect(),
            expiry: ExpiryRules::default(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn claims_checked_against_market_allow_list() {
        let r = record(json!({"variant_id": "V1", "market": "US", "claim_id": "C9"}));
        assert_eq!(
            check_record(&r, &rules(), today()),
            vec!["claim C9 not allowed for market US"]
        );
        // Markets without a list are unrestricted.
        let r = record(json!({"variant_id": "V1", "market": "FR", "claim_id": "C9"}));
        assert!(check_record(&r, &rules(), today()).is_empty());
    }

    #[test]
    fn disclaimer_library_market_and_language() {
        let r = record(json!({"market": "US", "legal_disclaimer_id": "NOPE"}));
        assert_eq!(
            check_record(&r, &rules(), today()),
            vec!["legal_disclaimer_id NOPE not in disclaimer library"]
        );

        let r = record(json!({"market": "DE", "language": "DE", "legal_disclaimer_id": " D1 "}));
        assert_eq!(
            check_record(&r, &rules(), today()),
            vec![
                "disclaimer D1 not approved for market DE",
                "disclaimer D1 not approved for language de",
            ]
        );

        let r = record(json!({"market": "US", "language": "EN", "legal_disclaimer_id": "D1"}));
        assert!(check_record(&r, &rules(), today()).is_empty());
    }

    #[test]
    fn expiry_rules() {
        let mut rules = rules();
        rules.expiry = ExpiryRules {
            require_start_date: true,
            require_end_date: true,
            reject_past_end_date: true,
            max_range_days: Some(30),
        };

        let r = record(json!({"market": "US"}));
        assert_eq!(
            check_record(&r, &rules, today()),
            vec![
                "start_date required by expiry rules",
                "end_date required by expiry rules",
            ]
        );

        let r = record(json!({"start_date": "2025-01-10", "end_date": "2025-01-01"}));
        assert_eq!(
            check_record(&r, &rules, today()),
            vec!["end_date is in the past", "end_date must be after start_date"]
        );

        let r = record(json!({"start_date": "2025-02-01", "end_date": "2025-06-01"}));
        assert_eq!(
            check_record(&r, &rules, today()),
            vec!["date range exceeds max 30 days"]
        );
    }

    #[test]
    fn dates_parse_leniently() {
        assert_eq!(parse_date("2025-03-01"), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(parse_date("2025-03-01T10:00:00Z"), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(parse_date("next tuesday"), None);
        assert_eq!(parse_date(""), None);
    }

    #[tokio::test]
    async fn unknown_disclaimer_is_an_exception() {
        let mut config = GovernanceConfig::with_root("/nonexistent");
        config.compliance = rules();
        let payload = Payload::new().with(
            "records",
            json!([
                {"variant_id": "V1", "market": "US", "language": "en", "legal_disclaimer_id": "D1"},
                {"variant_id": "V2", "market": "US", "language": "en", "legal_disclaimer_id": "GHOST"}
            ]),
        );
        let out = ComplianceIntelligenceAgent
            .evaluate(&payload, &context(config))
            .await
            .unwrap();

        assert_eq!(out.success, Some(false));
        assert_eq!(
            out.errors.unwrap(),
            vec!["[V2] legal_disclaimer_id GHOST not in disclaimer library"]
        );
        let reasoning = out.reasoning_log.unwrap();
        assert_eq!(reasoning[0], "Compliance version: v1");
        assert_eq!(reasoning.last().unwrap(), "Compliance exceptions: 1 of 2 records");

        let out_payload = out.output_payload.unwrap();
        let records = out_payload.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("compliance_approved"), Some(&json!(true)));
        assert_eq!(records[1].get("compliance_approved"), Some(&json!(false)));
        assert_eq!(
            out_payload.get("exceptionReport").unwrap()[0]["variant_id"],
            "V2"
        );
    }
}
