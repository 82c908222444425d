//! DAM sidecar metadata for rendered assets.
//!
//! For every asset in a target's manifest a `<variant_id>.metadata.json`
//! sidecar is written next to it, carrying the variant's market attributes
//! and the versions and run that produced it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cgvip_types::{sanitize_identifier, GovernanceConfig, RenderTarget, Result, RunId, VariantRecord};

use crate::qa::load_manifests;
use crate::render::{job_dir, read_job_manifest};

/// Manifest rows with this id summarize the run rather than an asset.
const RUN_SUMMARY_ID: &str = "run";

#[derive(Debug, Clone, Default)]
pub struct DamOptions {
    /// Run whose job descriptor supplies versions and the agent signature.
    pub run_id: Option<RunId>,
    pub campaign_id: Option<String>,
    /// Defaults to the time of writing.
    pub approval_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamMetadata {
    pub variant_id: String,
    pub market: String,
    pub language: String,
    pub channel: String,
    pub size: String,
    pub template_version: String,
    pub dataset_version: String,
    pub compliance_version: String,
    pub created_by: String,
    pub created_at: String,
    pub campaign_id: String,
    pub approval_timestamp: String,
    pub automation_agent_signature: String,
}

/// Write a sidecar for every manifest entry across all targets. Returns the
/// written paths.
pub async fn write_dam_metadata(
    config: &GovernanceConfig,
    variants: &[VariantRecord],
    options: &DamOptions,
) -> Result<Vec<PathBuf>> {
    let created_at = Utc::now().to_rfc3339();
    let mut template_version = "1.0".to_string();
    let mut dataset_version = Utc::now().format("%Y-%m-%d").to_string();
    let mut job_compliance = None;
    let mut signature = "cgvip-v1".to_string();

    if let Some(run_id) = &options.run_id {
        if let Some(job) = read_job_manifest(&job_dir(config, run_id)).await? {
            template_version = job.template_version.unwrap_or(template_version);
            dataset_version = job.dataset_version.unwrap_or(dataset_version);
            job_compliance = job.compliance_version;
        }
        signature = format!("runId={run_id}");
    }

    let by_id: HashMap<String, &VariantRecord> = variants
        .iter()
        .filter_map(|v| v.variant_id().map(|id| (id, v)))
        .collect();

    let mut written = Vec::new();
    for (target, entries) in load_manifests(config, &RenderTarget::ALL).await {
        for entry in entries {
            let Some(vid) = entry
                .variant_id
                .filter(|id| !id.is_empty() && id != RUN_SUMMARY_ID)
            else {
                continue;
            };
            let record = by_id.get(&vid);
            let field = |name: &str| {
                record
                    .and_then(|r| r.text(name))
                    .unwrap_or_default()
            };
            let compliance_version = record
                .and_then(|r| r.trimmed("compliance_version"))
                .or_else(|| job_compliance.clone())
                .unwrap_or_default();

            let meta = DamMetadata {
                variant_id: vid.clone(),
                market: field("market"),
                language: field("language"),
                channel: field("channel"),
                size: field("size"),
                template_version: template_version.clone(),
                dataset_version: dataset_version.clone(),
                compliance_version,
                created_by: "automation".to_string(),
                created_at: created_at.clone(),
                campaign_id: options.campaign_id.clone().unwrap_or_default(),
                approval_timestamp: options
                    .approval_timestamp
                    .clone()
                    .unwrap_or_else(|| created_at.clone()),
                automation_agent_signature: signature.clone(),
            };

            let path = config
                .target_output_dir(target)
                .join(format!("{}.metadata.json", sanitize_identifier(&vid)));
            tokio::fs::write(&path, serde_json::to_string_pretty(&meta)?).await?;
            written.push(path);
        }
    }

    tracing::info!(sidecars = written.len(), "DAM metadata written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{write_job_manifest, JobManifest};
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, GovernanceConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = GovernanceConfig::with_root(dir.path());
        let out = config.target_output_dir(RenderTarget::InDesign);
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(
            out.join("manifest.json"),
            json!([
                {"variant_id": "V1", "status": "ok"},
                {"variant_id": "run", "status": "ok"},
                {"variant_id": "V9", "status": "error"}
            ])
            .to_string(),
        )
        .unwrap();
        (dir, config)
    }

    fn variants() -> Vec<VariantRecord> {
        serde_json::from_value(json!([
            {"variant_id": "V1", "market": "US", "language": "en", "channel": "social", "size": "1080x1080"}
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn sidecars_skip_run_summary() {
        let (_dir, config) = setup();
        let options = DamOptions {
            campaign_id: Some("spring".into()),
            approval_timestamp: Some("2025-01-01T00:00:00Z".into()),
            ..DamOptions::default()
        };
        let paths = write_dam_metadata(&config, &variants(), &options).await.unwrap();
        assert_eq!(paths.len(), 2);

        let meta: DamMetadata =
            serde_json::from_str(&std::fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(meta.variant_id, "V1");
        assert_eq!(meta.market, "US");
        assert_eq!(meta.campaign_id, "spring");
        assert_eq!(meta.approval_timestamp, "2025-01-01T00:00:00Z");
        assert_eq!(meta.automation_agent_signature, "cgvip-v1");
        assert_eq!(meta.template_version, "1.0");

        // Unknown variants still get a sidecar with blank attributes.
        let meta: DamMetadata =
            serde_json::from_str(&std::fs::read_to_string(&paths[1]).unwrap()).unwrap();
        assert_eq!(meta.market, "");
    }

    #[tokio::test]
    async fn job_descriptor_supplies_versions() {
        let (_dir, config) = setup();
        let run_id = RunId::new("run_7");
        write_job_manifest(
            &job_dir(&config, &run_id),
            &JobManifest {
                run_id: run_id.clone(),
                app: RenderTarget::InDesign,
                status: "pending".into(),
                variant_count: 1,
                dataset_version: Some("2024-09".into()),
                compliance_version: Some("v3".into()),
                template_version: Some("2.0".into()),
            },
        )
        .await
        .unwrap();

        let options = DamOptions {
            run_id: Some(run_id),
            ..DamOptions::default()
        };
        let paths = write_dam_metadata(&config, &variants(), &options).await.unwrap();
        let meta: DamMetadata =
            serde_json::from_str(&std::fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(meta.automation_agent_signature, "runId=run_7");
        assert_eq!(meta.dataset_version, "2024-09");
        assert_eq!(meta.template_version, "2.0");
        assert_eq!(meta.compliance_version, "v3");
    }
}
