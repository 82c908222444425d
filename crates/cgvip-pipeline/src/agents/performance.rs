//! Performance intelligence: ranks variants by click-through rate from the
//! channel performance export and suggests what to suppress or retest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use cgvip_types::{AgentContext, AgentOutput, MetricColumns, Payload, Result, VariantRecord};

use super::ids;
use crate::agent::Agent;

/// Variants listed in each of the top and bottom rankings.
const RANK_SIZE: usize = 5;

pub struct PerformanceIntelligenceAgent;

impl PerformanceIntelligenceAgent {
    const VERSION: &'static str = "1.0.0";
}

#[derive(Debug, Clone, PartialEq)]
struct PerformanceRow {
    variant_id: Option<String>,
    hypothesis_id: Option<String>,
    impressions: f64,
    ctr: f64,
}

impl PerformanceRow {
    fn from_record(record: &VariantRecord, columns: &MetricColumns) -> Self {
        let metric = |col: &str| {
            record
                .text(col)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        };
        let impressions = metric(&columns.impressions);
        let clicks = metric(&columns.clicks);
        Self {
            variant_id: record.trimmed("variant_id"),
            hypothesis_id: record.trimmed("hypothesis_id"),
            impressions,
            ctr: if impressions > 0.0 { clicks / impressions } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct RankedVariant {
    variant_id: Option<String>,
    hypothesis_id: Option<String>,
    ctr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SuggestedVariation {
    hypothesis_id: Option<String>,
    suggested_change: String,
    reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
struct Insights {
    top: Vec<RankedVariant>,
    bottom: Vec<RankedVariant>,
    suppressed: Vec<String>,
    fatigue: Vec<String>,
    suggested_tests: Vec<SuggestedVariation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PerformanceReport<'a> {
    generated_at: DateTime<Utc>,
    insights: &'a Insights,
    #[serde(rename = "suggested_suppressions")]
    suggested_suppressions: &'a [String],
    #[serde(rename = "suggested_variations")]
    suggested_variations: &'a [SuggestedVariation],
    reasoning_log: &'a [String],
}

#[derive(Debug, Serialize)]
struct Recommendations<'a> {
    suggested_variations: &'a [SuggestedVariation],
    suggested_suppressions: &'a [String],
}

#[async_trait]
impl Agent for PerformanceIntelligenceAgent {
    fn agent_id(&self) -> &str {
        ids::PERFORMANCE_INTELLIGENCE
    }

    fn version(&self) -> Option<&str> {
        Some(Self::VERSION)
    }

    async fn evaluate(&self, _payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let config = &context.config;
        let data_path = config.performance_data_path();
        let out_dir = config.performance_dir();
        let rows = load_rows(&data_path, &config.performance.metric_columns).await?;

        let mut reasoning = Vec::new();
        let mut insights = Insights::default();

        if rows.is_empty() {
            reasoning.push(format!("No performance data found at {}", data_path.display()));
            let report_path = write_report(&out_dir, &insights, &[], &[], &reasoning).await?;
            return Ok(AgentOutput::pass().with_reasoning(reasoning).with_payload(
                Payload::new()
                    .with("reportPath", report_path.display().to_string())
                    .with("suggested_suppressions", serde_json::json!([]))
                    .with("suggested_variations", serde_json::json!([])),
            ));
        }

        let threshold = config.performance.suppress_below_ctr;
        let mut by_ctr: Vec<&PerformanceRow> = rows.iter().filter(|r| r.impressions > 0.0).collect();
        by_ctr.sort_by(|a, b| b.ctr.total_cmp(&a.ctr));

        let ranked = |r: &&PerformanceRow| RankedVariant {
            variant_id: r.variant_id.clone(),
            hypothesis_id: r.hypothesis_id.clone(),
            ctr: r.ctr,
        };
        insights.top = by_ctr.iter().take(RANK_SIZE).map(ranked).collect();
        insights.bottom = by_ctr.iter().rev().take(RANK_SIZE).map(ranked).collect();

        let suppressions: Vec<String> = rows
            .iter()
            .filter(|r| r.impressions > 0.0 && r.ctr < threshold)
            .filter_map(|r| r.variant_id.clone())
            .collect();
        insights.suppressed = suppressions.clone();
        reasoning.push(format!(
            "Underperforming (CTR < {threshold}): {} variant(s)",
            suppressions.len()
        ));
        if context.suppress_underperformers && !suppressions.is_empty() {
            reasoning.push(format!(
                "Suppression list for next run: {}",
                suppressions.join(", ")
            ));
        }

        let variations: Vec<SuggestedVariation> = insights
            .bottom
            .iter()
            .map(|r| SuggestedVariation {
                hypothesis_id: r.hypothesis_id.clone(),
                suggested_change: "Consider new variation; current CTR among lowest".to_string(),
                reason: format!(
                    "Variant {} CTR {:.3}%",
                    r.variant_id.as_deref().unwrap_or("?"),
                    r.ctr * 100.0
                ),
            })
            .collect();
        insights.suggested_tests = variations.clone();

        let report_path =
            write_report(&out_dir, &insights, &suppressions, &variations, &reasoning).await?;
        let rec_path = out_dir.join("recommendations.json");
        let recommendations = Recommendations {
            suggested_variations: &variations,
            suggested_suppressions: &suppressions,
        };
        tokio::fs::write(&rec_path, serde_json::to_string_pretty(&recommendations)?).await?;
        tracing::info!(
            rows = rows.len(),
            suppressed = suppressions.len(),
            path = %report_path.display(),
            "performance report written"
        );

        Ok(AgentOutput::pass().with_reasoning(reasoning).with_payload(
            Payload::new()
                .with("reportPath", report_path.display().to_string())
                .with("recPath", rec_path.display().to_string())
                .with("suggested_suppressions", serde_json::to_value(&suppressions)?)
                .with("suggested_variations", serde_json::to_value(&variations)?),
        ))
    }
}

/// Rows of the performance export. A missing export has no rows.
async fn load_rows(path: &Path, columns: &MetricColumns) -> Result<Vec<PerformanceRow>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }
    let text = tokio::fs::read_to_string(path).await?;
    let table = cgvip_dataset::parse_csv(&text)?;
    Ok(table
        .records
        .iter()
        .map(|r| PerformanceRow::from_record(r, columns))
        .collect())
}

async fn write_report(
    dir: &Path,
    insights: &Insights,
    suppressions: &[String],
    variations: &[SuggestedVariation],
    reasoning: &[String],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join("performance_report.json");
    let report = PerformanceReport {
        generated_at: Utc::now(),
        insights,
        suggested_suppressions: suppressions,
        suggested_variations: variations,
        reasoning_log: reasoning,
    };
    tokio::fs::write(&path, serde_json::to_string_pretty(&report)?).await?;
    Ok(path)
}
